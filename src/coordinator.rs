// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High level signing and provisioning orchestration.

use {
    crate::{
        certificate::CertificateStore,
        entitlements::Entitlements,
        error::AppleProvisioningError,
        identity::Identity,
        profile_generation::{ProfileGenerator, ProvisioningRequest},
        profile_matching::{best_match, MatchQuery, MatchResult},
        provisioning_profile::ProfileRepository,
        tool_invocation::ToolInvoker,
        toolchain::{Platform, SigningToolchain},
    },
    glob::Pattern,
    log::{debug, info},
    std::path::{Path, PathBuf},
};

/// Coordinates identity resolution, profile lookup, and bundle signing.
pub struct CodeSigningCoordinator<'a> {
    toolchain: &'a dyn SigningToolchain,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> CodeSigningCoordinator<'a> {
    pub fn new(toolchain: &'a dyn SigningToolchain, invoker: &'a dyn ToolInvoker) -> Self {
        Self { toolchain, invoker }
    }

    /// Find an installed provisioning profile compatible with the target, or
    /// generate and install one.
    ///
    /// Returns the on-disk location of the usable profile.
    pub fn locate_or_generate_profile(
        &self,
        bundle_identifier: &str,
        device_id: &str,
        platform: Platform,
        identity: &Identity,
    ) -> Result<PathBuf, AppleProvisioningError> {
        let repository = ProfileRepository::new(self.toolchain, self.invoker);
        let candidates = repository.load_all()?;

        let query = MatchQuery {
            bundle_identifier,
            device_id,
            platform,
            identity,
        };

        if let MatchResult::Found(location) = best_match(&query, &candidates) {
            info!("using installed profile {}", location.display());
            return Ok(location);
        }

        // The team identifier needed for generation comes from the identity's
        // certificate, not from any installed profile.
        let store = CertificateStore::new(self.toolchain, self.invoker);
        let team_identifier = store.team_identifier(identity)?;

        let generator = ProfileGenerator::new(self.toolchain, self.invoker);

        generator.generate(&ProvisioningRequest {
            bundle_identifier,
            team_identifier: &team_identifier,
            device_id,
            platform,
        })
    }

    /// Sign an app bundle, nested libraries first.
    ///
    /// When the caller supplies an entitlements file it is used verbatim.
    /// Otherwise, for platforms that require provisioning, entitlements are
    /// derived from the profile embedded in the bundle; a bundle without an
    /// embedded profile is signed without entitlements.
    pub fn sign_bundle(
        &self,
        bundle_path: &Path,
        identity: &Identity,
        bundle_identifier: &str,
        platform: Platform,
        entitlements_file: Option<&Path>,
    ) -> Result<(), AppleProvisioningError> {
        // The temp file guard must outlive the final sign invocation.
        let mut generated_entitlements = None;

        let entitlements_path = match entitlements_file {
            Some(path) => Some(path.to_path_buf()),
            None if platform.requires_provisioning() => {
                match self.derive_entitlements(bundle_path, bundle_identifier)? {
                    Some(temp) => {
                        let path = temp.path().to_path_buf();
                        generated_entitlements = Some(temp);
                        Some(path)
                    }
                    None => None,
                }
            }
            None => None,
        };

        self.sign_nested_libraries(bundle_path, identity)?;

        info!("signing {} as {}", bundle_path.display(), identity.id);
        self.invoker
            .run(&self.toolchain.sign_command(
                identity,
                entitlements_path.as_deref(),
                bundle_path,
            ))?
            .success_or_error()?;

        drop(generated_entitlements);

        Ok(())
    }

    /// Derive entitlements from the bundle's embedded provisioning profile,
    /// serialized into a temporary file the signing tool can read.
    ///
    /// Returns `None` when the bundle embeds no profile.
    fn derive_entitlements(
        &self,
        bundle_path: &Path,
        bundle_identifier: &str,
    ) -> Result<Option<tempfile::NamedTempFile>, AppleProvisioningError> {
        let embedded =
            bundle_path.join(format!("embedded.{}", self.toolchain.profile_extension()));

        if !embedded.is_file() {
            debug!(
                "{} embeds no provisioning profile; signing without entitlements",
                bundle_path.display()
            );
            return Ok(None);
        }

        let repository = ProfileRepository::new(self.toolchain, self.invoker);
        let profile = repository.load(&embedded)?;

        let team_identifier = profile
            .team_identifier()
            .ok_or(AppleProvisioningError::ProfileField("TeamIdentifier"))?;

        let entitlements = Entitlements::new(team_identifier, bundle_identifier);

        let temp = tempfile::Builder::new()
            .prefix("entitlements-")
            .suffix(".xcent")
            .tempfile()?;
        entitlements.write_xml(temp.as_file())?;

        Ok(Some(temp))
    }

    /// Sign every dynamic library nested under the bundle's `Frameworks`
    /// directory. Nested code must carry a valid signature before the outer
    /// bundle is signed, or outer signature validation fails.
    fn sign_nested_libraries(
        &self,
        bundle_path: &Path,
        identity: &Identity,
    ) -> Result<(), AppleProvisioningError> {
        let pattern = format!(
            "{}/Frameworks/**/*.dylib",
            Pattern::escape(&bundle_path.display().to_string())
        );

        for entry in glob::glob(&pattern)? {
            let library = entry.map_err(std::io::Error::from)?;

            info!("signing nested library {}", library.display());
            self.invoker
                .run(&self.toolchain.sign_command(identity, None, &library))?
                .success_or_error()?;
        }

        Ok(())
    }
}
