// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing identity enumeration and resolution.

use {
    crate::{
        error::AppleProvisioningError,
        tool_invocation::ToolInvoker,
        toolchain::SigningToolchain,
    },
    log::{debug, warn},
};

/// Length in characters of a hex encoded identity id (SHA-1 of the
/// certificate's DER encoding).
const IDENTITY_ID_HEX_LENGTH: usize = 40;

/// A reference to a private key + certificate pair in the host keystore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Hex encoded SHA-1 digest of the certificate's DER encoding.
    ///
    /// Unique within a keystore.
    pub id: String,

    /// Human readable certificate label. Not guaranteed unique.
    pub display_name: String,
}

/// Parse one line of identity listing output.
///
/// Lines have the shape `<40 hex chars> "<display name>"`. The name is
/// everything between the quote following the id and the final quote on the
/// line, so it may contain spaces, punctuation, and interior quotes.
fn parse_identity_line(line: &str) -> Result<Identity, AppleProvisioningError> {
    let malformed = || AppleProvisioningError::IdentityLineMalformed(line.to_string());

    if line.len() <= IDENTITY_ID_HEX_LENGTH || !line.is_char_boundary(IDENTITY_ID_HEX_LENGTH) {
        return Err(malformed());
    }

    let (id, rest) = line.split_at(IDENTITY_ID_HEX_LENGTH);

    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    // A single space, an opening quote, then the name running to the final
    // quote before end of line.
    let rest = rest.strip_prefix(" \"").ok_or_else(malformed)?;
    let name = rest.strip_suffix('"').ok_or_else(malformed)?;

    Ok(Identity {
        id: id.to_string(),
        display_name: name.to_string(),
    })
}

/// Enumerates and resolves signing identities in the host keystore.
///
/// Identity lists are fetched fresh on every call; nothing is cached across
/// resolutions.
pub struct IdentityCatalog<'a> {
    toolchain: &'a dyn SigningToolchain,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> IdentityCatalog<'a> {
    pub fn new(toolchain: &'a dyn SigningToolchain, invoker: &'a dyn ToolInvoker) -> Self {
        Self { toolchain, invoker }
    }

    /// Enumerate every code signing identity the keystore knows about.
    ///
    /// Any malformed listing line fails the whole enumeration. A truncated
    /// identity list is worse than an explicit failure: a silently missing
    /// identity could let a caller sign with an unintended fallback.
    pub fn enumerate(&self) -> Result<Vec<Identity>, AppleProvisioningError> {
        let output = self
            .invoker
            .run(&self.toolchain.identity_list_command())?
            .success_or_error()?;

        let identities = output
            .stdout
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(parse_identity_line)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("enumerated {} signing identities", identities.len());

        Ok(identities)
    }

    /// Resolve a short user-supplied name to a single identity.
    ///
    /// A candidate matches if its id equals `short_name` exactly or its
    /// display name contains `short_name` as a substring. When several
    /// identities match, the first in enumeration order is used and a
    /// warning is emitted; resolution deliberately never blocks on
    /// ambiguity.
    pub fn resolve(&self, short_name: &str) -> Result<Identity, AppleProvisioningError> {
        let matches = self
            .enumerate()?
            .into_iter()
            .filter(|identity| {
                identity.id == short_name || identity.display_name.contains(short_name)
            })
            .collect::<Vec<_>>();

        match matches.len() {
            0 => Err(AppleProvisioningError::NoIdentityMatch(
                short_name.to_string(),
            )),
            1 => Ok(matches.into_iter().next().expect("length checked")),
            n => {
                let first = matches.into_iter().next().expect("length checked");
                warn!(
                    "\"{}\" matches {} signing identities; using \"{}\" ({})",
                    short_name, n, first.display_name, first.id
                );
                Ok(first)
            }
        }
    }
}
