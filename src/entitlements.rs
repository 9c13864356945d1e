// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entitlements derived from a provisioning profile.

use {
    crate::error::AppleProvisioningError,
    plist::Value,
    std::io::Write,
};

/// The minimal entitlements claim set for a development-signed bundle.
///
/// Holds exactly the claims derivable from a provisioning profile's team
/// identifier and the bundle's identifier. Anything beyond these belongs in
/// an explicit entitlements file supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entitlements {
    pub application_identifier: String,
    pub team_identifier: String,
    pub get_task_allow: bool,
}

impl Entitlements {
    /// Derive entitlements for a bundle signed under a team.
    ///
    /// The application identifier is the team identifier prepended to the
    /// bundle identifier. Debugger attachment is always allowed; this claim
    /// set is only ever used for development signing.
    pub fn new(team_identifier: &str, bundle_identifier: &str) -> Self {
        Self {
            application_identifier: format!("{}.{}", team_identifier, bundle_identifier),
            team_identifier: team_identifier.to_string(),
            get_task_allow: true,
        }
    }

    pub fn to_plist_value(&self) -> Value {
        let mut dict = plist::Dictionary::new();
        dict.insert(
            "application-identifier".into(),
            Value::String(self.application_identifier.clone()),
        );
        dict.insert(
            "com.apple.developer.team-identifier".into(),
            Value::String(self.team_identifier.clone()),
        );
        dict.insert("get-task-allow".into(), Value::Boolean(self.get_task_allow));

        Value::Dictionary(dict)
    }

    /// Serialize as XML plist, the form the signing tool consumes.
    pub fn write_xml(&self, writer: impl Write) -> Result<(), AppleProvisioningError> {
        self.to_plist_value()
            .to_writer_xml(writer)
            .map_err(AppleProvisioningError::PlistSerializeXml)
    }
}
