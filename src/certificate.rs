// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate retrieval and validation for signing identities.

use {
    crate::{
        error::AppleProvisioningError,
        identity::Identity,
        tool_invocation::ToolInvoker,
        toolchain::SigningToolchain,
    },
    bcder::Oid,
    chrono::{DateTime, Duration, Utc},
    log::{debug, warn},
    x509_certificate::CapturedX509Certificate,
};

/// Certificates expiring within this margin trigger a warning even though
/// they are still considered valid.
const EXPIRATION_WARNING_MARGIN_HOURS: i64 = 24;

const PEM_CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERTIFICATE_END: &str = "-----END CERTIFICATE-----";

/// Split concatenated PEM output into individual certificate blocks.
///
/// Each returned string is a complete `BEGIN CERTIFICATE` .. `END
/// CERTIFICATE` block. Text outside block markers is discarded; a block
/// whose end marker never arrives is dropped.
pub(crate) fn split_certificate_pem(text: &str) -> Vec<String> {
    text.split(PEM_CERTIFICATE_BEGIN)
        .skip(1)
        .filter_map(|chunk| {
            chunk.find(PEM_CERTIFICATE_END).map(|end| {
                format!(
                    "{}{}{}",
                    PEM_CERTIFICATE_BEGIN,
                    &chunk[..end],
                    PEM_CERTIFICATE_END
                )
            })
        })
        .collect()
}

/// Pick the entry with the greatest `not_before` among entries whose
/// `not_after` is strictly in the future.
pub(crate) fn select_latest_valid<T>(
    candidates: Vec<(DateTime<Utc>, DateTime<Utc>, T)>,
    now: DateTime<Utc>,
) -> Option<T> {
    candidates
        .into_iter()
        .filter(|(_, not_after, _)| *not_after > now)
        .max_by_key(|(not_before, _, _)| *not_before)
        .map(|(_, _, value)| value)
}

/// Extract the team identifier (first organizational unit) from a
/// certificate subject.
pub(crate) fn team_identifier_from_certificate(cert: &CapturedX509Certificate) -> Option<String> {
    cert.subject_name()
        .find_first_attribute_string(Oid(
            x509_certificate::rfc4519::OID_ORGANIZATIONAL_UNIT_NAME
                .as_ref()
                .into(),
        ))
        .unwrap_or(None)
}

/// Retrieves and validates the X.509 certificates behind signing identities.
///
/// Certificates are loaded fresh per call and owned by the caller; nothing
/// is cached across resolutions.
pub struct CertificateStore<'a> {
    toolchain: &'a dyn SigningToolchain,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> CertificateStore<'a> {
    pub fn new(toolchain: &'a dyn SigningToolchain, invoker: &'a dyn ToolInvoker) -> Self {
        Self { toolchain, invoker }
    }

    /// Load every certificate stored under the identity's keystore label.
    ///
    /// A keystore may legitimately hold several certificates under one label
    /// across renewal periods, so a malformed PEM chunk fails that chunk
    /// only: it is skipped with a warning and the rest of the list survives.
    pub fn load_certificates(
        &self,
        identity: &Identity,
    ) -> Result<Vec<CapturedX509Certificate>, AppleProvisioningError> {
        let output = self
            .invoker
            .run(
                &self
                    .toolchain
                    .certificate_lookup_command(&identity.display_name),
            )?
            .success_or_error()?;

        let mut certificates = vec![];

        for block in split_certificate_pem(&output.stdout) {
            match CapturedX509Certificate::from_pem(block.as_bytes()) {
                Ok(cert) => certificates.push(cert),
                Err(e) => {
                    warn!(
                        "skipping unparseable certificate under label \"{}\": {}",
                        identity.display_name, e
                    );
                }
            }
        }

        debug!(
            "loaded {} certificate(s) for \"{}\"",
            certificates.len(),
            identity.display_name
        );

        Ok(certificates)
    }

    /// The most recently issued certificate for this identity that has not
    /// expired.
    ///
    /// Expired certificates are never silently selected; if nothing passes
    /// the validity filter this is an error. Certificates within the
    /// expiration warning margin are still returned, with a warning.
    pub fn latest_valid(
        &self,
        identity: &Identity,
    ) -> Result<CapturedX509Certificate, AppleProvisioningError> {
        let now = Utc::now();
        let warning_cutoff = now + Duration::hours(EXPIRATION_WARNING_MARGIN_HOURS);

        let candidates = self
            .load_certificates(identity)?
            .into_iter()
            .map(|cert| {
                let not_before = cert.validity_not_before();
                let not_after = cert.validity_not_after();

                if not_after > now && not_after < warning_cutoff {
                    warn!(
                        "certificate for \"{}\" expires within {} hours (at {})",
                        identity.display_name,
                        EXPIRATION_WARNING_MARGIN_HOURS,
                        not_after.to_rfc3339()
                    );
                }

                (not_before, not_after, cert)
            })
            .collect::<Vec<_>>();

        select_latest_valid(candidates, now).ok_or_else(|| {
            AppleProvisioningError::NoValidCertificate(identity.display_name.clone())
        })
    }

    /// The team identifier embedded in the identity's latest valid
    /// certificate.
    ///
    /// This is the first organizational unit attribute of the subject.
    /// Absence is a hard failure, never a default.
    pub fn team_identifier(&self, identity: &Identity) -> Result<String, AppleProvisioningError> {
        let cert = self.latest_valid(identity)?;

        team_identifier_from_certificate(&cert).ok_or_else(|| {
            AppleProvisioningError::MissingTeamIdentifier(identity.display_name.clone())
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::testutil::TestEnv,
        x509_certificate::{KeyAlgorithm, X509CertificateBuilder},
    };

    fn test_identity() -> Identity {
        Identity {
            id: "c".repeat(40),
            display_name: "Apple Development: Jane Doe (ABCD1234)".into(),
        }
    }

    fn self_signed_pem(team_id: Option<&str>, validity_days: i64) -> String {
        let mut builder = X509CertificateBuilder::default();
        builder
            .subject()
            .append_common_name_utf8_string("Apple Development: Jane Doe (ABCD1234)")
            .unwrap();
        if let Some(team_id) = team_id {
            builder
                .subject()
                .append_organizational_unit_utf8_string(team_id)
                .unwrap();
        }
        builder.validity_duration(Duration::days(validity_days));

        let (cert, _) = builder
            .create_with_random_keypair(KeyAlgorithm::Ed25519)
            .unwrap();

        cert.encode_pem()
    }

    #[test]
    fn pem_split_recovers_each_block() {
        let text = format!(
            "junk before\n{}\nAAAA\n{}\ntrailing\n{}\nBBBB\n{}\n",
            PEM_CERTIFICATE_BEGIN, PEM_CERTIFICATE_END, PEM_CERTIFICATE_BEGIN, PEM_CERTIFICATE_END
        );

        let blocks = split_certificate_pem(&text);

        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("AAAA"));
        assert!(blocks[1].contains("BBBB"));
    }

    #[test]
    fn pem_split_drops_unterminated_block() {
        let text = format!(
            "{}\nAAAA\n{}\n{}\nBBBB no end marker\n",
            PEM_CERTIFICATE_BEGIN, PEM_CERTIFICATE_END, PEM_CERTIFICATE_BEGIN
        );

        let blocks = split_certificate_pem(&text);

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].contains("AAAA"));
    }

    #[test]
    fn latest_valid_selection_prefers_greatest_not_before() {
        let now = Utc::now();

        let candidates = vec![
            (now - Duration::days(400), now + Duration::days(10), "old"),
            (now - Duration::days(30), now + Duration::days(300), "renewed"),
            (now - Duration::days(100), now + Duration::days(200), "middle"),
        ];

        assert_eq!(select_latest_valid(candidates, now), Some("renewed"));
    }

    #[test]
    fn latest_valid_selection_never_picks_expired() {
        let now = Utc::now();

        let candidates = vec![
            // Most recently issued, but already expired.
            (now - Duration::days(1), now - Duration::hours(1), "expired"),
            (now - Duration::days(200), now + Duration::days(5), "valid"),
        ];

        assert_eq!(select_latest_valid(candidates, now), Some("valid"));
    }

    #[test]
    fn latest_valid_selection_empty_when_all_expired() {
        let now = Utc::now();

        let candidates = vec![(
            now - Duration::days(400),
            now - Duration::days(35),
            "expired",
        )];

        assert_eq!(select_latest_valid(candidates, now), None);
    }

    #[test]
    fn load_certificates_skips_malformed_chunk_only() {
        let env = TestEnv::new();
        let good = self_signed_pem(Some("TEAM123"), 300);
        env.invoker.push_success(format!(
            "{}\n{}\nnot base64 at all!!\n{}\n",
            good, PEM_CERTIFICATE_BEGIN, PEM_CERTIFICATE_END
        ));

        let store = CertificateStore::new(&env.toolchain, &env.invoker);
        let certs = store.load_certificates(&test_identity()).unwrap();

        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn team_identifier_happy_path() {
        let env = TestEnv::new();
        env.invoker.push_success(self_signed_pem(Some("TEAM123"), 300));

        let store = CertificateStore::new(&env.toolchain, &env.invoker);

        assert_eq!(store.team_identifier(&test_identity()).unwrap(), "TEAM123");
    }

    #[test]
    fn team_identifier_absence_is_fatal() {
        let env = TestEnv::new();
        env.invoker.push_success(self_signed_pem(None, 300));

        let store = CertificateStore::new(&env.toolchain, &env.invoker);

        assert!(matches!(
            store.team_identifier(&test_identity()),
            Err(AppleProvisioningError::MissingTeamIdentifier(_))
        ));
    }

    #[test]
    fn latest_valid_errors_when_nothing_parses() {
        let env = TestEnv::new();
        env.invoker.push_success("no certificates here");

        let store = CertificateStore::new(&env.toolchain, &env.invoker);

        assert!(matches!(
            store.latest_valid(&test_identity()),
            Err(AppleProvisioningError::NoValidCertificate(_))
        ));
    }
}
