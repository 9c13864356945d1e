// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host toolchain capabilities.
//!
//! [SigningToolchain] describes everything this crate needs from the host:
//! which tools to run for identity enumeration, certificate lookup, profile
//! payload extraction, signing, and auto-provisioning, plus where installed
//! provisioning profiles live. The embedding process selects an
//! implementation once at startup and passes it through explicitly; nothing
//! here branches on the compile-time target.

use {
    crate::{
        error::AppleProvisioningError,
        identity::Identity,
        tool_invocation::ToolCommand,
    },
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        str::FromStr,
    },
};

/// Relative path from the home directory to installed provisioning profiles.
pub const PROFILES_RELATIVE_PATH: &str = "Library/MobileDevice/Provisioning Profiles";

/// File extension used by installed provisioning profiles.
pub const PROFILE_EXTENSION: &str = "mobileprovision";

/// A target platform an app bundle can be built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    MacOs,
    Ios,
    TvOs,
    WatchOs,
}

impl Platform {
    /// Whether apps for this platform need a provisioning profile to run.
    ///
    /// Desktop targets do not; everything else does.
    pub fn requires_provisioning(&self) -> bool {
        !matches!(self, Self::MacOs)
    }

    /// The platform name as it appears in a profile's `Platform` array.
    pub fn profile_platform_name(&self) -> &'static str {
        match self {
            Self::MacOs => "OSX",
            Self::Ios => "iOS",
            Self::TvOs => "tvOS",
            Self::WatchOs => "watchOS",
        }
    }

    /// The SDK name passed to the build tool for this platform.
    pub fn sdk_name(&self) -> &'static str {
        match self {
            Self::MacOs => "macosx",
            Self::Ios => "iphoneos",
            Self::TvOs => "appletvos",
            Self::WatchOs => "watchos",
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MacOs => "macOS",
            Self::Ios => "iOS",
            Self::TvOs => "tvOS",
            Self::WatchOs => "watchOS",
        })
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "macos" | "osx" => Ok(Self::MacOs),
            "ios" => Ok(Self::Ios),
            "tvos" => Ok(Self::TvOs),
            "watchos" => Ok(Self::WatchOs),
            _ => Err(format!("unknown platform: {}", s)),
        }
    }
}

/// Capabilities of a host able to sign code and provision devices.
pub trait SigningToolchain: Send + Sync {
    /// Command enumerating code signing identities in the host keystore.
    fn identity_list_command(&self) -> ToolCommand;

    /// Command emitting the PEM certificate(s) stored under a keystore label.
    fn certificate_lookup_command(&self, label: &str) -> ToolCommand;

    /// Command emitting the property list payload of a signed profile.
    fn profile_decode_command(&self, profile: &Path) -> ToolCommand;

    /// Command signing `path` with `identity` and optional entitlements.
    fn sign_command(
        &self,
        identity: &Identity,
        entitlements: Option<&Path>,
        path: &Path,
    ) -> ToolCommand;

    /// Command building `project` with automatic provisioning enabled,
    /// targeted at a specific device.
    fn auto_provision_command(
        &self,
        project: &Path,
        scheme: &str,
        platform: Platform,
        device_id: &str,
    ) -> ToolCommand;

    /// Directory holding installed provisioning profiles.
    fn profiles_directory(&self) -> &Path;

    /// File extension of installed provisioning profiles, without the dot.
    fn profile_extension(&self) -> &str;
}

/// [SigningToolchain] backed by the Xcode command line tools.
pub struct XcodeToolchain {
    profiles_directory: PathBuf,
}

impl XcodeToolchain {
    /// Construct an instance using the standard profile storage location
    /// under the current user's home directory.
    pub fn new() -> Result<Self, AppleProvisioningError> {
        let home = dirs::home_dir().ok_or(AppleProvisioningError::HomeDirectoryUnavailable)?;

        Ok(Self {
            profiles_directory: home.join(PROFILES_RELATIVE_PATH),
        })
    }

    /// Construct an instance reading profiles from a non-standard directory.
    pub fn with_profiles_directory(profiles_directory: impl Into<PathBuf>) -> Self {
        Self {
            profiles_directory: profiles_directory.into(),
        }
    }
}

impl SigningToolchain for XcodeToolchain {
    fn identity_list_command(&self) -> ToolCommand {
        ToolCommand::new("security").args(["find-identity", "-v", "-p", "codesigning"])
    }

    fn certificate_lookup_command(&self, label: &str) -> ToolCommand {
        ToolCommand::new("security")
            .args(["find-certificate", "-a", "-c"])
            .arg(label)
            .arg("-p")
    }

    fn profile_decode_command(&self, profile: &Path) -> ToolCommand {
        ToolCommand::new("security")
            .args(["cms", "-D", "-i"])
            .arg(profile.display())
    }

    fn sign_command(
        &self,
        identity: &Identity,
        entitlements: Option<&Path>,
        path: &Path,
    ) -> ToolCommand {
        let mut command = ToolCommand::new("codesign").arg("--sign").arg(&identity.id);

        if let Some(entitlements) = entitlements {
            command = command
                .arg("--entitlements")
                .arg(entitlements.display())
                .arg("--generate-entitlement-der");
        }

        command.args(["--force", "--deep"]).arg(path.display())
    }

    fn auto_provision_command(
        &self,
        project: &Path,
        scheme: &str,
        platform: Platform,
        device_id: &str,
    ) -> ToolCommand {
        ToolCommand::new("xcodebuild")
            .arg("-project")
            .arg(project.display())
            .arg("-scheme")
            .arg(scheme)
            .arg("-sdk")
            .arg(platform.sdk_name())
            .arg("-destination")
            .arg(format!("id={}", device_id))
            .arg("-allowProvisioningUpdates")
            .arg("-allowProvisioningDeviceRegistration")
            .arg("build")
    }

    fn profiles_directory(&self) -> &Path {
        &self.profiles_directory
    }

    fn profile_extension(&self) -> &str {
        PROFILE_EXTENSION
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn platform_provisioning_requirements() {
        assert!(!Platform::MacOs.requires_provisioning());
        assert!(Platform::Ios.requires_provisioning());
        assert!(Platform::TvOs.requires_provisioning());
        assert!(Platform::WatchOs.requires_provisioning());
    }

    #[test]
    fn platform_from_str() {
        assert_eq!(Platform::from_str("iOS").unwrap(), Platform::Ios);
        assert_eq!(Platform::from_str("macos").unwrap(), Platform::MacOs);
        assert!(Platform::from_str("solaris").is_err());
    }

    #[test]
    fn sign_command_flag_order() {
        let toolchain = XcodeToolchain::with_profiles_directory("/tmp/profiles");
        let identity = Identity {
            id: "a".repeat(40),
            display_name: "Apple Development: Jane Doe (ABCD1234)".into(),
        };

        let command = toolchain.sign_command(
            &identity,
            Some(Path::new("/tmp/app.xcent")),
            Path::new("/tmp/My.app"),
        );

        assert_eq!(
            command.command_line(),
            format!(
                "codesign --sign {} --entitlements /tmp/app.xcent --generate-entitlement-der --force --deep /tmp/My.app",
                "a".repeat(40)
            )
        );
    }

    #[test]
    fn sign_command_without_entitlements() {
        let toolchain = XcodeToolchain::with_profiles_directory("/tmp/profiles");
        let identity = Identity {
            id: "b".repeat(40),
            display_name: "ignored".into(),
        };

        let command = toolchain.sign_command(&identity, None, Path::new("/tmp/lib.dylib"));

        assert!(!command.command_line().contains("--entitlements"));
        assert!(command.command_line().ends_with("--force --deep /tmp/lib.dylib"));
    }

    #[test]
    fn auto_provision_command_shape() {
        let toolchain = XcodeToolchain::with_profiles_directory("/tmp/profiles");

        let command = toolchain.auto_provision_command(
            Path::new("/tmp/stub/Stub.xcodeproj"),
            "Stub",
            Platform::Ios,
            "00008030-001234567890402E",
        );

        let line = command.command_line();
        assert!(line.starts_with("xcodebuild -project /tmp/stub/Stub.xcodeproj -scheme Stub"));
        assert!(line.contains("-sdk iphoneos"));
        assert!(line.contains("-destination id=00008030-001234567890402E"));
        assert!(line.contains("-allowProvisioningUpdates"));
        assert!(line.contains("-allowProvisioningDeviceRegistration"));
        assert!(line.ends_with("build"));
    }
}
