// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {std::path::PathBuf, thiserror::Error, x509_certificate::X509CertificateError};

/// Unified error type for identity and provisioning profile resolution.
#[derive(Debug, Error)]
pub enum AppleProvisioningError {
    #[error("error running `{command}`: {source}")]
    ToolSpawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` failed\nstdout: {stdout}\nstderr: {stderr}")]
    ToolFailure {
        command: String,
        stdout: String,
        stderr: String,
    },

    #[error("malformed identity listing line: {0}")]
    IdentityLineMalformed(String),

    #[error("no signing identity matches \"{0}\"")]
    NoIdentityMatch(String),

    #[error("no unexpired certificate located for identity \"{0}\"")]
    NoValidCertificate(String),

    #[error("certificate for \"{0}\" has no organizational unit (team identifier)")]
    MissingTeamIdentifier(String),

    #[error("unable to determine the current user's home directory")]
    HomeDirectoryUnavailable,

    #[error("provisioning profile payload key missing or ill-typed: {0}")]
    ProfileField(&'static str),

    #[error("error parsing plist XML: {0}")]
    PlistParseXml(plist::Error),

    #[error("error serializing plist to XML: {0}")]
    PlistSerializeXml(plist::Error),

    #[error("unable to write provisioning stub project: {0}")]
    StubProjectWrite(std::io::Error),

    #[error("bundle identifier {0} cannot be registered to your development team; is it already registered to another team?")]
    BundleIdentifierUnavailable(String),

    #[error("could not find a provisioning profile reference in the build output:\n{0}")]
    ProvisioningOutputParse(String),

    #[error("auto-provisioning reported success but no profile exists at {}", .0.display())]
    GeneratedProfileMissing(PathBuf),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
