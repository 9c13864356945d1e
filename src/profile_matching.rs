// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compatibility scoring of installed provisioning profiles.

use {
    crate::{
        identity::Identity,
        provisioning_profile::ProvisioningProfile,
        toolchain::Platform,
    },
    chrono::{DateTime, Duration, Utc},
    log::debug,
    ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY},
    std::path::{Path, PathBuf},
};

/// How much remaining validity a profile needs before it is considered
/// usable. Protects against signing with a profile that expires
/// mid-operation.
const EXPIRATION_BUFFER_MINUTES: i64 = 12;

/// The target an installed profile must be compatible with.
#[derive(Clone, Debug)]
pub struct MatchQuery<'a> {
    pub bundle_identifier: &'a str,
    pub device_id: &'a str,
    pub platform: Platform,
    pub identity: &'a Identity,
}

/// Outcome of matching a query against installed profiles.
///
/// `NotFound` is a normal, expected result that callers handle by falling
/// through to profile generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchResult {
    Found(PathBuf),
    NotFound,
}

/// Whether an application identifier pattern is suitable for a bundle
/// identifier.
///
/// The pattern's leading team identifier segment is stripped, then pattern
/// and target are compared segment by segment. A `*` is only meaningful as
/// the pattern's final segment, where it matches any remaining target
/// suffix; without a trailing wildcard the segment counts must agree
/// exactly.
pub(crate) fn app_id_pattern_matches(pattern: &str, bundle_identifier: &str) -> bool {
    let mut pattern_segments = pattern.split('.');
    // The team identifier segment is always present.
    let _team = pattern_segments.next();

    let pattern_segments = pattern_segments.collect::<Vec<_>>();
    let target_segments = bundle_identifier.split('.').collect::<Vec<_>>();

    if pattern_segments.len() > target_segments.len() {
        return false;
    }

    for (i, segment) in pattern_segments.iter().enumerate() {
        if *segment == "*" {
            return i == pattern_segments.len() - 1;
        }

        if *segment != target_segments[i] {
            return false;
        }
    }

    pattern_segments.len() == target_segments.len()
}

fn identity_matches_embedded_certificates(
    identity: &Identity,
    profile: &ProvisioningProfile,
) -> bool {
    let wanted = identity.id.to_ascii_lowercase();

    profile.embedded_certificates.iter().any(|der| {
        hex::encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, der).as_ref()) == wanted
    })
}

fn profile_passes(
    query: &MatchQuery<'_>,
    location: &Path,
    profile: &ProvisioningProfile,
    cutoff: DateTime<Utc>,
) -> bool {
    // An empty device list means the profile is not device-restricted.
    if !profile.provisioned_device_ids.is_empty()
        && !profile
            .provisioned_device_ids
            .iter()
            .any(|d| d == query.device_id)
    {
        debug!(
            "{}: device {} not provisioned",
            location.display(),
            query.device_id
        );
        return false;
    }

    if profile.expiration_date <= cutoff {
        debug!(
            "{}: expires {} which is within the expiration buffer",
            location.display(),
            profile.expiration_date.to_rfc3339()
        );
        return false;
    }

    if !profile
        .platform_names
        .iter()
        .any(|p| p == query.platform.profile_platform_name())
    {
        debug!("{}: not valid for {}", location.display(), query.platform);
        return false;
    }

    if !app_id_pattern_matches(&profile.application_identifier_pattern, query.bundle_identifier) {
        debug!(
            "{}: pattern {} does not cover {}",
            location.display(),
            profile.application_identifier_pattern,
            query.bundle_identifier
        );
        return false;
    }

    if !identity_matches_embedded_certificates(query.identity, profile) {
        debug!(
            "{}: identity {} not among embedded certificates",
            location.display(),
            query.identity.id
        );
        return false;
    }

    true
}

/// Find the first installed profile compatible with a query.
///
/// Candidates are evaluated in enumeration order and the first one passing
/// every filter wins. When several candidates would pass, which one is
/// returned therefore depends on directory listing order; no tie-break rule
/// is applied. This never fails: an empty or fully-filtered candidate list
/// is simply [MatchResult::NotFound].
pub fn best_match(
    query: &MatchQuery<'_>,
    candidates: &[(PathBuf, ProvisioningProfile)],
) -> MatchResult {
    let cutoff = Utc::now() + Duration::minutes(EXPIRATION_BUFFER_MINUTES);

    for (location, profile) in candidates {
        if profile_passes(query, location, profile, cutoff) {
            debug!(
                "{} is compatible with {}",
                location.display(),
                query.bundle_identifier
            );
            return MatchResult::Found(location.clone());
        }
    }

    MatchResult::NotFound
}

#[cfg(test)]
mod test {
    use super::*;

    // SHA-1 of b"not a real certificate".
    const CERT_SHA1: &str = "60daeca6ef739d4a9b8dbba83dfed482f15d12cb";

    fn test_identity() -> Identity {
        Identity {
            id: CERT_SHA1.to_string(),
            display_name: "Apple Development: Jane Doe (ABCD1234)".into(),
        }
    }

    fn test_profile(expiration: DateTime<Utc>) -> ProvisioningProfile {
        ProvisioningProfile {
            team_identifiers: vec!["TEAM".into()],
            expiration_date: expiration,
            provisioned_device_ids: vec![],
            platform_names: vec!["iOS".into()],
            application_identifier_pattern: "TEAM.com.example.*".into(),
            embedded_certificates: vec![b"not a real certificate".to_vec()],
            uuid: None,
        }
    }

    fn query<'a>(identity: &'a Identity) -> MatchQuery<'a> {
        MatchQuery {
            bundle_identifier: "com.example.App",
            device_id: "device-1",
            platform: Platform::Ios,
            identity,
        }
    }

    #[test]
    fn wildcard_pattern_matches_prefix_and_deeper_suffixes() {
        assert!(app_id_pattern_matches("TEAM.com.example.*", "com.example.App"));
        assert!(app_id_pattern_matches(
            "TEAM.com.example.*",
            "com.example.App.Extension"
        ));
        assert!(!app_id_pattern_matches("TEAM.com.example.*", "com.other.App"));
    }

    #[test]
    fn exact_pattern_matches_only_the_exact_identifier() {
        assert!(app_id_pattern_matches(
            "TEAM.com.example.App",
            "com.example.App"
        ));
        assert!(!app_id_pattern_matches(
            "TEAM.com.example.App",
            "com.example.App.Extension"
        ));
        assert!(!app_id_pattern_matches("TEAM.com.example.App", "com.example"));
    }

    #[test]
    fn bare_team_wildcard_matches_everything() {
        assert!(app_id_pattern_matches("TEAM.*", "com.example.App"));
        assert!(app_id_pattern_matches("TEAM.*", "anything"));
    }

    #[test]
    fn interior_wildcard_never_matches() {
        assert!(!app_id_pattern_matches(
            "TEAM.com.*.App",
            "com.example.App"
        ));
    }

    #[test]
    fn empty_candidate_list_is_not_found() {
        let identity = test_identity();

        assert_eq!(best_match(&query(&identity), &[]), MatchResult::NotFound);
    }

    #[test]
    fn expiration_buffer_boundary() {
        let identity = test_identity();
        let q = query(&identity);

        let expiring = vec![(
            PathBuf::from("/p/expiring.mobileprovision"),
            test_profile(Utc::now() + Duration::minutes(11)),
        )];
        assert_eq!(best_match(&q, &expiring), MatchResult::NotFound);

        let usable = vec![(
            PathBuf::from("/p/usable.mobileprovision"),
            test_profile(Utc::now() + Duration::minutes(13)),
        )];
        assert_eq!(
            best_match(&q, &usable),
            MatchResult::Found(PathBuf::from("/p/usable.mobileprovision"))
        );
    }

    #[test]
    fn device_restriction_is_honored() {
        let identity = test_identity();
        let q = query(&identity);

        let mut restricted = test_profile(Utc::now() + Duration::days(30));
        restricted.provisioned_device_ids = vec!["some-other-device".into()];

        let candidates = vec![(PathBuf::from("/p/a.mobileprovision"), restricted)];
        assert_eq!(best_match(&q, &candidates), MatchResult::NotFound);

        let mut listed = test_profile(Utc::now() + Duration::days(30));
        listed.provisioned_device_ids = vec!["device-1".into(), "device-2".into()];

        let candidates = vec![(PathBuf::from("/p/b.mobileprovision"), listed)];
        assert_eq!(
            best_match(&q, &candidates),
            MatchResult::Found(PathBuf::from("/p/b.mobileprovision"))
        );
    }

    #[test]
    fn unrestricted_profile_accepts_any_device() {
        let identity = test_identity();
        let q = query(&identity);

        let candidates = vec![(
            PathBuf::from("/p/unrestricted.mobileprovision"),
            test_profile(Utc::now() + Duration::days(30)),
        )];

        assert_eq!(
            best_match(&q, &candidates),
            MatchResult::Found(PathBuf::from("/p/unrestricted.mobileprovision"))
        );
    }

    #[test]
    fn platform_mismatch_is_rejected() {
        let identity = test_identity();
        let q = query(&identity);

        let mut profile = test_profile(Utc::now() + Duration::days(30));
        profile.platform_names = vec!["tvOS".into()];

        let candidates = vec![(PathBuf::from("/p/tv.mobileprovision"), profile)];
        assert_eq!(best_match(&q, &candidates), MatchResult::NotFound);
    }

    #[test]
    fn embedded_certificate_must_match_identity() {
        let identity = test_identity();
        let q = query(&identity);

        let mut profile = test_profile(Utc::now() + Duration::days(30));
        profile.embedded_certificates = vec![b"some other certificate".to_vec()];

        let candidates = vec![(PathBuf::from("/p/other.mobileprovision"), profile)];
        assert_eq!(best_match(&q, &candidates), MatchResult::NotFound);
    }

    #[test]
    fn identity_id_comparison_is_case_insensitive() {
        let mut identity = test_identity();
        identity.id = CERT_SHA1.to_ascii_uppercase();
        let q = query(&identity);

        let candidates = vec![(
            PathBuf::from("/p/a.mobileprovision"),
            test_profile(Utc::now() + Duration::days(30)),
        )];

        assert_eq!(
            best_match(&q, &candidates),
            MatchResult::Found(PathBuf::from("/p/a.mobileprovision"))
        );
    }

    #[test]
    fn first_passing_candidate_in_enumeration_order_wins() {
        let identity = test_identity();
        let q = query(&identity);

        let candidates = vec![
            (
                PathBuf::from("/p/first.mobileprovision"),
                test_profile(Utc::now() + Duration::days(10)),
            ),
            (
                PathBuf::from("/p/second.mobileprovision"),
                test_profile(Utc::now() + Duration::days(300)),
            ),
        ];

        assert_eq!(
            best_match(&q, &candidates),
            MatchResult::Found(PathBuf::from("/p/first.mobileprovision"))
        );
    }
}
