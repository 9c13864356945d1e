// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning profile decoding and on-disk enumeration.

use {
    crate::{
        error::AppleProvisioningError,
        tool_invocation::ToolInvoker,
        toolchain::SigningToolchain,
    },
    chrono::{DateTime, Utc},
    log::{debug, info},
    plist::{Dictionary, Value},
    std::{
        ffi::OsStr,
        path::{Path, PathBuf},
    },
};

/// A decoded provisioning profile.
///
/// Profiles are read-only: they are loaded fresh from disk per query, never
/// mutated, and discarded once a matching decision has been made.
#[derive(Clone, Debug)]
pub struct ProvisioningProfile {
    /// Team identifiers this profile belongs to. The first element is
    /// authoritative.
    pub team_identifiers: Vec<String>,

    pub expiration_date: DateTime<Utc>,

    /// Device identifiers this profile is restricted to.
    ///
    /// Empty means not device-restricted, which is how the signed payload
    /// expresses an absent `ProvisionedDevices` key.
    pub provisioned_device_ids: Vec<String>,

    pub platform_names: Vec<String>,

    /// Allowed application identifier expression, `TEAMID.bundle.id` or
    /// `TEAMID.prefix.*`. The team identifier segment is always present;
    /// a wildcard is always the final dot-separated component.
    pub application_identifier_pattern: String,

    /// DER encodings of the certificates this profile embeds.
    pub embedded_certificates: Vec<Vec<u8>>,

    /// Profile UUID, when the payload declares one. Used for logging.
    pub uuid: Option<String>,
}

fn string_array(dict: &Dictionary, key: &'static str) -> Result<Vec<String>, AppleProvisioningError> {
    match dict.get(key) {
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| {
                v.as_string()
                    .map(|s| s.to_string())
                    .ok_or(AppleProvisioningError::ProfileField(key))
            })
            .collect(),
        _ => Err(AppleProvisioningError::ProfileField(key)),
    }
}

impl ProvisioningProfile {
    /// Decode a profile from its property list payload.
    pub fn from_xml(data: &[u8]) -> Result<Self, AppleProvisioningError> {
        let value =
            Value::from_reader_xml(data).map_err(AppleProvisioningError::PlistParseXml)?;
        let dict = value
            .as_dictionary()
            .ok_or(AppleProvisioningError::ProfileField("root dictionary"))?;

        let team_identifiers = string_array(dict, "TeamIdentifier")?;

        let expiration_date = match dict.get("ExpirationDate") {
            Some(Value::Date(date)) => {
                DateTime::<Utc>::from(std::time::SystemTime::from(date.to_owned()))
            }
            _ => return Err(AppleProvisioningError::ProfileField("ExpirationDate")),
        };

        // An absent key means "not device-restricted", which collapses to
        // the same matcher behavior as an empty list.
        let provisioned_device_ids = if dict.get("ProvisionedDevices").is_some() {
            string_array(dict, "ProvisionedDevices")?
        } else {
            vec![]
        };

        let platform_names = string_array(dict, "Platform")?;

        let application_identifier_pattern = dict
            .get("Entitlements")
            .and_then(|v| v.as_dictionary())
            .and_then(|entitlements| entitlements.get("application-identifier"))
            .and_then(|v| v.as_string())
            .map(|s| s.to_string())
            .ok_or(AppleProvisioningError::ProfileField(
                "Entitlements.application-identifier",
            ))?;

        let embedded_certificates = match dict.get("DeveloperCertificates") {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_data().map(|d| d.to_vec()).ok_or(
                        AppleProvisioningError::ProfileField("DeveloperCertificates"),
                    )
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(AppleProvisioningError::ProfileField(
                    "DeveloperCertificates",
                ))
            }
        };

        let uuid = dict
            .get("UUID")
            .and_then(|v| v.as_string())
            .map(|s| s.to_string());

        Ok(Self {
            team_identifiers,
            expiration_date,
            provisioned_device_ids,
            platform_names,
            application_identifier_pattern,
            embedded_certificates,
            uuid,
        })
    }

    /// The authoritative team identifier (first in the payload's list).
    pub fn team_identifier(&self) -> Option<&str> {
        self.team_identifiers.first().map(|s| s.as_str())
    }
}

/// Enumerates and decodes provisioning profiles installed on the host.
///
/// Profiles are cryptographically signed containers wrapping a property
/// list. Decoding extracts the signed payload without checking the signer
/// against a trust store: the profile's embedded certificates are later
/// cross-checked against the signing identity, which is the trust decision
/// this subsystem actually cares about.
pub struct ProfileRepository<'a> {
    toolchain: &'a dyn SigningToolchain,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> ProfileRepository<'a> {
    pub fn new(toolchain: &'a dyn SigningToolchain, invoker: &'a dyn ToolInvoker) -> Self {
        Self { toolchain, invoker }
    }

    /// Decode every installed profile.
    ///
    /// Returns each profile alongside its on-disk location, in directory
    /// enumeration order. A missing profile directory is an empty list, not
    /// an error.
    pub fn load_all(
        &self,
    ) -> Result<Vec<(PathBuf, ProvisioningProfile)>, AppleProvisioningError> {
        let dir = self.toolchain.profiles_directory();

        if !dir.is_dir() {
            info!("profile directory {} does not exist", dir.display());
            return Ok(vec![]);
        }

        let mut profiles = vec![];

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().and_then(OsStr::to_str)
                != Some(self.toolchain.profile_extension())
            {
                continue;
            }

            let profile = self.load(&path)?;
            profiles.push((path, profile));
        }

        debug!("decoded {} installed profile(s)", profiles.len());

        Ok(profiles)
    }

    /// Decode a single profile file.
    ///
    /// Also usable on a profile embedded inside an app bundle, e.g. to
    /// recover the team identifier it was built with.
    pub fn load(&self, path: &Path) -> Result<ProvisioningProfile, AppleProvisioningError> {
        let output = self
            .invoker
            .run(&self.toolchain.profile_decode_command(path))?
            .success_or_error()?;

        ProvisioningProfile::from_xml(output.stdout.as_bytes())
    }
}

#[cfg(test)]
pub(crate) fn profile_xml(
    team_id: &str,
    app_id: &str,
    expiration: &str,
    devices: Option<&[&str]>,
    platforms: &[&str],
    cert_base64: &str,
) -> String {
    let devices_xml = match devices {
        Some(devices) => format!(
            "<key>ProvisionedDevices</key><array>{}</array>",
            devices
                .iter()
                .map(|d| format!("<string>{}</string>", d))
                .collect::<String>()
        ),
        None => String::new(),
    };

    let platforms_xml = platforms
        .iter()
        .map(|p| format!("<string>{}</string>", p))
        .collect::<String>();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Name</key>
    <string>generated profile</string>
    <key>TeamIdentifier</key>
    <array><string>{team_id}</string></array>
    <key>ExpirationDate</key>
    <date>{expiration}</date>
    {devices_xml}
    <key>Platform</key>
    <array>{platforms_xml}</array>
    <key>Entitlements</key>
    <dict>
        <key>application-identifier</key>
        <string>{app_id}</string>
    </dict>
    <key>DeveloperCertificates</key>
    <array><data>{cert_base64}</data></array>
    <key>UUID</key>
    <string>aaaabbbb-cccc-dddd-eeee-ffff00001111</string>
</dict>
</plist>
"#
    )
}
