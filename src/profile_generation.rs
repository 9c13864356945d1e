// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning profile generation via the host's auto-provisioning build.
//!
//! When no installed profile matches, we materialize a throwaway buildable
//! project whose single target carries the requested bundle and team
//! identifiers, run the build tool with provisioning updates allowed, and
//! recover the freshly installed profile from the build output.

use {
    crate::{
        error::AppleProvisioningError,
        tool_invocation::ToolInvoker,
        toolchain::{Platform, SigningToolchain},
    },
    log::{info, warn},
    plist::Value,
    std::path::{Path, PathBuf},
};

/// Name of the single target in the stub project.
const STUB_TARGET_NAME: &str = "ProvisioningStub";

/// Build output label preceding the profile reference.
const PROFILE_OUTPUT_LABEL: &str = "Provisioning Profile:";

/// Diagnostic substring emitted when a bundle identifier is taken by
/// another team.
const IDENTIFIER_UNAVAILABLE_MARKER: &str = "cannot be registered to your development team";

const STUB_PBXPROJ_TEMPLATE: &str = r#"// !$*UTF8*$!
{
	archiveVersion = 1;
	classes = {
	};
	objectVersion = 56;
	objects = {
		AA0000000000000000000001 /* main.swift */ = {isa = PBXFileReference; lastKnownFileType = sourcecode.swift; path = main.swift; sourceTree = "<group>"; };
		AA0000000000000000000002 /* ProvisioningStub.app */ = {isa = PBXFileReference; explicitFileType = wrapper.application; includeInIndex = 0; path = ProvisioningStub.app; sourceTree = BUILT_PRODUCTS_DIR; };
		AA0000000000000000000003 /* main.swift in Sources */ = {isa = PBXBuildFile; fileRef = AA0000000000000000000001 /* main.swift */; };
		AA0000000000000000000004 /* Sources */ = {isa = PBXSourcesBuildPhase; buildActionMask = 2147483647; files = (AA0000000000000000000003,); runOnlyForDeploymentPostprocessing = 0; };
		AA0000000000000000000005 = {isa = PBXGroup; children = (AA0000000000000000000001, AA0000000000000000000002,); sourceTree = "<group>"; };
		AA0000000000000000000006 /* Debug */ = {isa = XCBuildConfiguration; buildSettings = {
			CODE_SIGN_STYLE = Automatic;
			DEVELOPMENT_TEAM = __TEAM_IDENTIFIER__;
			INFOPLIST_FILE = Info.plist;
			PRODUCT_BUNDLE_IDENTIFIER = "__BUNDLE_IDENTIFIER__";
			PRODUCT_NAME = ProvisioningStub;
			SDKROOT = __SDK_NAME__;
		}; name = Debug; };
		AA0000000000000000000007 /* target configurations */ = {isa = XCConfigurationList; buildConfigurations = (AA0000000000000000000006,); defaultConfigurationIsVisible = 0; defaultConfigurationName = Debug; };
		AA0000000000000000000008 /* ProvisioningStub */ = {isa = PBXNativeTarget; buildConfigurationList = AA0000000000000000000007; buildPhases = (AA0000000000000000000004,); buildRules = (); dependencies = (); name = ProvisioningStub; productName = ProvisioningStub; productReference = AA0000000000000000000002; productType = "com.apple.product-type.application"; };
		AA0000000000000000000009 /* Debug */ = {isa = XCBuildConfiguration; buildSettings = {
		}; name = Debug; };
		AA000000000000000000000A /* project configurations */ = {isa = XCConfigurationList; buildConfigurations = (AA0000000000000000000009,); defaultConfigurationIsVisible = 0; defaultConfigurationName = Debug; };
		AA000000000000000000000B /* Project object */ = {isa = PBXProject; buildConfigurationList = AA000000000000000000000A; compatibilityVersion = "Xcode 14.0"; mainGroup = AA0000000000000000000005; productRefGroup = AA0000000000000000000005; projectDirPath = ""; projectRoot = ""; targets = (AA0000000000000000000008,); };
	};
	rootObject = AA000000000000000000000B /* Project object */;
}
"#;

/// Everything the generator needs to request a profile.
#[derive(Clone, Debug)]
pub struct ProvisioningRequest<'a> {
    pub bundle_identifier: &'a str,
    pub team_identifier: &'a str,
    pub device_id: &'a str,
    pub platform: Platform,
}

/// Extract the generated profile's identifier from build output.
///
/// The tool prints a fixed two-line pattern: a line beginning with the
/// `Provisioning Profile:` label, immediately followed by a line carrying
/// the profile identifier in parentheses.
pub(crate) fn parse_generated_profile_id(stdout: &str) -> Option<String> {
    let mut lines = stdout.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.trim_start().starts_with(PROFILE_OUTPUT_LABEL) {
            continue;
        }

        if let Some(next) = lines.peek() {
            if let (Some(open), Some(close)) = (next.find('('), next.rfind(')')) {
                if open < close {
                    return Some(next[open + 1..close].to_string());
                }
            }
        }
    }

    None
}

fn stub_info_plist(request: &ProvisioningRequest<'_>) -> Value {
    let mut dict = plist::Dictionary::new();
    dict.insert(
        "CFBundleIdentifier".into(),
        Value::String(request.bundle_identifier.to_string()),
    );
    dict.insert("CFBundleName".into(), Value::String(STUB_TARGET_NAME.into()));
    dict.insert(
        "CFBundleExecutable".into(),
        Value::String(STUB_TARGET_NAME.into()),
    );
    dict.insert("CFBundlePackageType".into(), Value::String("APPL".into()));
    dict.insert("CFBundleVersion".into(), Value::String("1".into()));
    dict.insert(
        "CFBundleShortVersionString".into(),
        Value::String("1.0".into()),
    );

    Value::Dictionary(dict)
}

/// Write the throwaway project into `dir` and return the `.xcodeproj` path.
pub(crate) fn write_stub_project(
    dir: &Path,
    request: &ProvisioningRequest<'_>,
) -> Result<PathBuf, AppleProvisioningError> {
    std::fs::write(dir.join("main.swift"), "import Foundation\n")
        .map_err(AppleProvisioningError::StubProjectWrite)?;

    let mut info_plist = Vec::new();
    stub_info_plist(request)
        .to_writer_xml(&mut info_plist)
        .map_err(AppleProvisioningError::PlistSerializeXml)?;
    std::fs::write(dir.join("Info.plist"), info_plist)
        .map_err(AppleProvisioningError::StubProjectWrite)?;

    let pbxproj = STUB_PBXPROJ_TEMPLATE
        .replace("__BUNDLE_IDENTIFIER__", request.bundle_identifier)
        .replace("__TEAM_IDENTIFIER__", request.team_identifier)
        .replace("__SDK_NAME__", request.platform.sdk_name());

    let project = dir.join(format!("{}.xcodeproj", STUB_TARGET_NAME));
    std::fs::create_dir_all(&project).map_err(AppleProvisioningError::StubProjectWrite)?;
    std::fs::write(project.join("project.pbxproj"), pbxproj)
        .map_err(AppleProvisioningError::StubProjectWrite)?;

    Ok(project)
}

/// Generates provisioning profiles by driving the auto-provisioning build.
pub struct ProfileGenerator<'a> {
    toolchain: &'a dyn SigningToolchain,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> ProfileGenerator<'a> {
    pub fn new(toolchain: &'a dyn SigningToolchain, invoker: &'a dyn ToolInvoker) -> Self {
        Self { toolchain, invoker }
    }

    /// Generate and install a profile for the request, returning the
    /// location of the installed profile file.
    ///
    /// Each failure mode is distinguishable: stub project write, tool
    /// failure (with the bundle-identifier-taken case reclassified into an
    /// actionable error), output parse, and missing profile file. The
    /// tool's exit code alone is not trusted as proof the file exists.
    pub fn generate(
        &self,
        request: &ProvisioningRequest<'_>,
    ) -> Result<PathBuf, AppleProvisioningError> {
        let project_dir = tempfile::Builder::new()
            .prefix("provisioning-stub-")
            .tempdir()
            .map_err(AppleProvisioningError::StubProjectWrite)?;

        let project = write_stub_project(project_dir.path(), request)?;

        warn!(
            "no usable provisioning profile; requesting one for {} via {}",
            request.bundle_identifier,
            project.display()
        );

        let output = self.invoker.run(&self.toolchain.auto_provision_command(
            &project,
            STUB_TARGET_NAME,
            request.platform,
            request.device_id,
        ))?;

        if !output.success
            && (output.stdout.contains(IDENTIFIER_UNAVAILABLE_MARKER)
                || output.stderr.contains(IDENTIFIER_UNAVAILABLE_MARKER))
        {
            return Err(AppleProvisioningError::BundleIdentifierUnavailable(
                request.bundle_identifier.to_string(),
            ));
        }

        let output = output.success_or_error()?;

        let profile_id = parse_generated_profile_id(&output.stdout).ok_or(
            AppleProvisioningError::ProvisioningOutputParse(output.stdout),
        )?;

        let location = self.toolchain.profiles_directory().join(format!(
            "{}.{}",
            profile_id,
            self.toolchain.profile_extension()
        ));

        if !location.is_file() {
            return Err(AppleProvisioningError::GeneratedProfileMissing(location));
        }

        info!("generated provisioning profile {}", location.display());

        // project_dir is removed on drop; failure to remove it is not an
        // error.
        Ok(location)
    }
}
