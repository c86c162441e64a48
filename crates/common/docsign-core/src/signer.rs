//! CMS (PKCS#7) SignedData production and verification.

use chrono::{DateTime, Utc};
use cryptographic_message_syntax::{SignedData, SignedDataBuilder, SignerBuilder};
use docsign_config::SignatureMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use x509_certificate::{CapturedX509Certificate, DigestAlgorithm, InMemorySigningKeyPair, SignatureAlgorithm};

use crate::identity::{crypto, user_id_from_common_name, KeyCryptoError, SignerIdentity};
use crate::types::{base64_bytes, UserId};

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Certificate expired at {not_after}")]
    CertificateExpired { not_after: DateTime<Utc> },

    #[error("Certificate is not valid before {not_before}")]
    CertificateNotYetValid { not_before: DateTime<Utc> },

    #[error("Private key could not be decrypted: {0}")]
    KeyDecryption(#[from] KeyCryptoError),

    #[error("Stored key or certificate is unusable: {0}")]
    InvalidMaterial(String),

    #[error("Failed to build signed data: {0}")]
    Build(String),
}

/// Input that is not a well-formed CMS SignedData structure.
#[derive(Error, Debug)]
pub enum SignatureDecodeError {
    #[error("Not a CMS SignedData structure: {0}")]
    Malformed(String),

    #[error("SignedData carries no signer info")]
    NoSignerInfo,

    #[error("Detached signature verified without its content")]
    MissingContent,
}

/// A produced signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureBlob {
    #[serde(with = "base64_bytes")]
    pub der: Vec<u8>,
    pub mode: SignatureMode,
}

/// Signs with SHA-256 over Ed25519 and embeds the signer certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmsSigner {
    mode: SignatureMode,
}

impl CmsSigner {
    pub fn new(mode: SignatureMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SignatureMode {
        self.mode
    }

    pub fn sign(
        &self,
        identity: &SignerIdentity,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SignatureBlob, SignerError> {
        let info = &identity.certificate;
        if now < info.not_before {
            return Err(SignerError::CertificateNotYetValid {
                not_before: info.not_before,
            });
        }
        if now > info.not_after {
            return Err(SignerError::CertificateExpired {
                not_after: info.not_after,
            });
        }

        let certificate = info.to_certificate().map_err(SignerError::InvalidMaterial)?;
        let pkcs8 = crypto::open_private_key(&identity.encrypted_private_key)?;
        let key_pair = InMemorySigningKeyPair::from_pkcs8_der(pkcs8.as_slice())
            .map_err(|e| SignerError::InvalidMaterial(e.to_string()))?;

        let builder = SignedDataBuilder::default();
        let builder = match self.mode {
            SignatureMode::Attached => builder.content_inline(payload.to_vec()),
            SignatureMode::Detached => builder.content_external(payload.to_vec()),
        };
        // Self-signed, so the certificate is the whole chain
        let der = builder
            .certificate(certificate.clone())
            .signer(SignerBuilder::new(&key_pair, certificate))
            .build_der()
            .map_err(|e| SignerError::Build(e.to_string()))?;

        debug!(user_id = %identity.user_id, mode = ?self.mode, size = der.len(), "Produced CMS signature");
        Ok(SignatureBlob { der, mode: self.mode })
    }

    /// Check `blob` is a valid signature by `expected_signer` at `now`.
    ///
    /// Any cryptographic, algorithm, validity or ownership mismatch is
    /// `Ok(false)`. `content` is required when the blob does not embed its
    /// content; for attached blobs it must equal the embedded bytes when given.
    pub fn verify(
        &self,
        blob: &[u8],
        expected_signer: UserId,
        now: DateTime<Utc>,
        content: Option<&[u8]>,
    ) -> Result<bool, SignatureDecodeError> {
        let signed_data = SignedData::parse_ber(blob).map_err(|e| {
            error!(error = %e, "Undecodable signature blob");
            SignatureDecodeError::Malformed(e.to_string())
        })?;

        let signers: Vec<_> = signed_data.signers().collect();
        if signers.is_empty() {
            error!("Signature blob has no signer info");
            return Err(SignatureDecodeError::NoSignerInfo);
        }

        for signer in signers {
            if signer.digest_algorithm() != DigestAlgorithm::Sha256 {
                debug!(algorithm = ?signer.digest_algorithm(), "Rejected digest algorithm");
                return Ok(false);
            }
            if signer.signature_algorithm() != SignatureAlgorithm::Ed25519 {
                debug!(algorithm = ?signer.signature_algorithm(), "Rejected signature algorithm");
                return Ok(false);
            }

            let Some(certificate) = signer_certificate(&signed_data, signer) else {
                debug!("Signer certificate not carried in blob");
                return Ok(false);
            };
            if !certificate_acceptable(certificate, expected_signer, now) {
                return Ok(false);
            }

            if signer.verify_signature_with_signed_data(&signed_data).is_err() {
                debug!("Signature does not match signed attributes");
                return Ok(false);
            }

            let digest_ok = match signed_data.signed_content() {
                Some(embedded) => {
                    content.map_or(true, |expected| expected == embedded)
                        && signer.verify_message_digest_with_signed_data(&signed_data).is_ok()
                }
                None => {
                    let content = content.ok_or(SignatureDecodeError::MissingContent)?;
                    signer.verify_message_digest_with_content(content).is_ok()
                }
            };
            if !digest_ok {
                debug!("Content digest mismatch");
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn signer_certificate<'a>(
    signed_data: &'a SignedData,
    signer: &cryptographic_message_syntax::SignerInfo,
) -> Option<&'a CapturedX509Certificate> {
    let (_, serial) = signer.certificate_issuer_and_serial()?;
    signed_data
        .certificates()
        .find(|cert| cert.serial_number_asn1() == serial)
}

fn certificate_acceptable(certificate: &CapturedX509Certificate, expected_signer: UserId, now: DateTime<Utc>) -> bool {
    if now < certificate.validity_not_before() || now > certificate.validity_not_after() {
        debug!(not_after = %certificate.validity_not_after(), "Certificate outside validity window");
        return false;
    }
    if certificate.signature_algorithm() != Some(SignatureAlgorithm::Ed25519) {
        debug!("Certificate not self-signed with Ed25519");
        return false;
    }
    if certificate.verify_signed_by_certificate(certificate).is_err() {
        debug!("Certificate self-signature invalid");
        return false;
    }

    let owner = certificate
        .subject_common_name()
        .and_then(|cn| user_id_from_common_name(&cn));
    if owner != Some(expected_signer) {
        debug!(?owner, %expected_signer, "Certificate belongs to another user");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_identity;
    use chrono::Duration;
    use docsign_config::{IdentityConfig, KdfConfig};
    use x509_certificate::{EcdsaCurve, KeyAlgorithm, X509CertificateBuilder};

    const PAYLOAD: &[u8] = b"supply contract #4411 for 300 desks";

    fn identity(user: i64) -> SignerIdentity {
        let config = IdentityConfig {
            kdf: KdfConfig::insecure_fast(),
            ..IdentityConfig::default()
        };
        generate_identity(UserId(user), &config).unwrap()
    }

    #[test]
    fn ecdsa_signature_is_rejected() {
        let key_pair =
            InMemorySigningKeyPair::generate_random(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1)).unwrap();
        let mut builder = X509CertificateBuilder::default();
        builder.subject().append_common_name_utf8_string("10").unwrap();
        builder.constraint_not_ca();
        builder.validity_duration(Duration::days(30));
        let certificate = builder.create_with_key_pair(&key_pair).unwrap();

        let blob = SignedDataBuilder::default()
            .content_inline(PAYLOAD.to_vec())
            .certificate(certificate.clone())
            .signer(SignerBuilder::new(&key_pair, certificate))
            .build_der()
            .unwrap();

        let signer = CmsSigner::default();
        assert!(!signer.verify(&blob, UserId(10), Utc::now(), Some(PAYLOAD)).unwrap());
    }

    #[test]
    fn non_sha256_digest_is_rejected() {
        let identity = identity(10);
        let certificate = identity.certificate.to_certificate().unwrap();
        let pkcs8 = crypto::open_private_key(&identity.encrypted_private_key).unwrap();
        let key_pair = InMemorySigningKeyPair::from_pkcs8_der(pkcs8.as_slice()).unwrap();

        let blob = SignedDataBuilder::default()
            .content_inline(PAYLOAD.to_vec())
            .certificate(certificate.clone())
            .signer(SignerBuilder::new(&key_pair, certificate).digest_algorithm(DigestAlgorithm::Sha384))
            .build_der()
            .unwrap();

        let signer = CmsSigner::default();
        assert!(!signer.verify(&blob, UserId(10), Utc::now(), Some(PAYLOAD)).unwrap());
    }

    #[test]
    fn attached_signature_verifies() {
        let signer = CmsSigner::new(SignatureMode::Attached);
        let identity = identity(10);
        let now = Utc::now();

        let blob = signer.sign(&identity, PAYLOAD, now).unwrap();
        assert_eq!(blob.mode, SignatureMode::Attached);
        assert!(signer.verify(&blob.der, UserId(10), now, None).unwrap());
    }

    #[test]
    fn detached_signature_needs_matching_content() {
        let signer = CmsSigner::new(SignatureMode::Detached);
        let identity = identity(10);
        let now = Utc::now();

        let blob = signer.sign(&identity, PAYLOAD, now).unwrap();
        assert!(signer.verify(&blob.der, UserId(10), now, Some(PAYLOAD)).unwrap());
        assert!(!signer
            .verify(&blob.der, UserId(10), now, Some(b"supply contract #4411 for 301 desks"))
            .unwrap());
        assert!(matches!(
            signer.verify(&blob.der, UserId(10), now, None),
            Err(SignatureDecodeError::MissingContent)
        ));
    }

    #[test]
    fn tampered_inline_content_fails() {
        let signer = CmsSigner::new(SignatureMode::Attached);
        let identity = identity(10);
        let now = Utc::now();

        let mut der = signer.sign(&identity, PAYLOAD, now).unwrap().der;
        let offset = der
            .windows(PAYLOAD.len())
            .position(|window| window == PAYLOAD)
            .unwrap();
        der[offset + 5] ^= 0x01;

        assert!(!signer.verify(&der, UserId(10), now, None).unwrap());
    }

    #[test]
    fn attached_content_must_match_expected_document() {
        let signer = CmsSigner::new(SignatureMode::Attached);
        let identity = identity(10);
        let now = Utc::now();

        let blob = signer.sign(&identity, PAYLOAD, now).unwrap();
        assert!(signer.verify(&blob.der, UserId(10), now, Some(PAYLOAD)).unwrap());
        assert!(!signer.verify(&blob.der, UserId(10), now, Some(b"another document")).unwrap());
    }

    #[test]
    fn other_user_is_rejected() {
        let signer = CmsSigner::default();
        let identity = identity(10);
        let now = Utc::now();

        let blob = signer.sign(&identity, PAYLOAD, now).unwrap();
        assert!(!signer.verify(&blob.der, UserId(11), now, None).unwrap());
    }

    #[test]
    fn expired_certificate() {
        let signer = CmsSigner::default();
        let identity = identity(10);
        let later = identity.certificate.not_after + Duration::days(1);

        let err = signer.sign(&identity, PAYLOAD, later).unwrap_err();
        assert!(matches!(err, SignerError::CertificateExpired { .. }));

        let blob = signer.sign(&identity, PAYLOAD, Utc::now()).unwrap();
        assert!(!signer.verify(&blob.der, UserId(10), later, None).unwrap());
    }

    #[test]
    fn not_yet_valid_certificate() {
        let signer = CmsSigner::default();
        let identity = identity(10);
        let earlier = identity.certificate.not_before - Duration::days(1);

        let err = signer.sign(&identity, PAYLOAD, earlier).unwrap_err();
        assert!(matches!(err, SignerError::CertificateNotYetValid { .. }));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let signer = CmsSigner::default();
        let result = signer.verify(b"definitely not ber", UserId(10), Utc::now(), None);
        assert!(matches!(result, Err(SignatureDecodeError::Malformed(_))));
    }

    #[test]
    fn undecryptable_key_cannot_sign() {
        let signer = CmsSigner::default();
        let mut identity = identity(10);
        identity.encrypted_private_key.passphrase = "not the passphrase".to_string();

        let err = signer.sign(&identity, PAYLOAD, Utc::now()).unwrap_err();
        assert!(matches!(err, SignerError::KeyDecryption(_)));
    }
}
