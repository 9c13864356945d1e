// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolve code signing identities and provisioning profiles for Apple
//! app bundles.
//!
//! # Important Concepts
//!
//! A *signing identity* is a private key + certificate pair in the host
//! keystore, addressed by the hex SHA-1 digest of its certificate or by a
//! substring of its human readable label. [Identity] references one;
//! [IdentityCatalog] enumerates and resolves them.
//!
//! A *provisioning profile* is a signed property list authorizing a set of
//! application identifiers, devices, platforms, and certificates.
//! Installed profiles live under `~/Library/MobileDevice/Provisioning
//! Profiles`. [ProvisioningProfile] models a decoded profile and
//! [ProfileRepository] enumerates and decodes installed ones.
//!
//! *Matching* decides whether an installed profile can sign a given bundle
//! for a given device, platform, and identity. See [MatchQuery] and
//! [best_match]. When nothing matches, [ProfileGenerator] requests a fresh
//! profile by running an auto-provisioning build of a throwaway project.
//!
//! [CodeSigningCoordinator] glues these together: it locates or generates a
//! usable profile and signs bundles, deriving [Entitlements] from the
//! profile embedded in the bundle when the caller supplies none.
//!
//! # Host Tools
//!
//! All keystore, profile, and signing operations are performed by invoking
//! the host's own tools. The [SigningToolchain] trait describes the
//! required capabilities and [XcodeToolchain] implements them with the
//! Xcode command line tools. Tool processes are spawned through the
//! [ToolInvoker] trait; the default [SystemToolInvoker] registers children
//! with a [ProcessScope] so an embedding application can terminate
//! everything this crate started.

mod certificate;
mod coordinator;
mod entitlements;
mod error;
mod identity;
mod profile_generation;
mod profile_matching;
mod provisioning_profile;
#[cfg(test)]
mod testutil;
mod tool_invocation;
mod toolchain;

pub use {
    certificate::CertificateStore,
    coordinator::CodeSigningCoordinator,
    entitlements::Entitlements,
    error::AppleProvisioningError,
    identity::{Identity, IdentityCatalog},
    profile_generation::{ProfileGenerator, ProvisioningRequest},
    profile_matching::{best_match, MatchQuery, MatchResult},
    provisioning_profile::{ProfileRepository, ProvisioningProfile},
    tool_invocation::{ProcessScope, SystemToolInvoker, ToolCommand, ToolInvoker, ToolOutput},
    toolchain::{Platform, SigningToolchain, XcodeToolchain, PROFILES_RELATIVE_PATH, PROFILE_EXTENSION},
};
