//! Personal signing identities.
//!
//! Every user that signs gets a self-issued X.509 certificate whose common
//! name is their user id, plus an Ed25519 private key kept encrypted at rest.
//! Identities are created lazily on the first signing attempt and are never
//! rotated afterwards.

pub mod crypto;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use docsign_config::IdentityConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use x509_certificate::{
    CapturedX509Certificate, InMemorySigningKeyPair, KeyAlgorithm, X509CertificateBuilder,
};

use crate::storage::{IdentityInsert, IdentityStore, StorageError};
use crate::types::{base64_bytes, UserId};
pub use crypto::{EncryptedPrivateKey, KeyCryptoError};

#[derive(Error, Debug)]
pub enum IdentityError {
    /// Key pair or certificate could not be produced.
    #[error("Identity generation failed: {0}")]
    Generation(String),

    /// Generated material could not be persisted; nothing was linked.
    #[error("Identity persistence failed: {0}")]
    Persistence(#[source] StorageError),

    #[error("Identity lookup failed: {0}")]
    Lookup(#[source] StorageError),
}

/// Certificate fields kept alongside the DER so they can be shown without
/// re-parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Upper-case hex of the serial number
    pub serial_number: String,
    /// Subject distinguished name, human readable
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// Hex SHA-256 of the DER encoding
    pub thumbprint: String,
    /// Full self-signed certificate
    #[serde(with = "base64_bytes")]
    pub der: Vec<u8>,
}

impl CertificateInfo {
    pub fn from_certificate(cert: &CapturedX509Certificate) -> Result<Self, String> {
        let der = cert.constructed_data().to_vec();
        let subject = cert
            .subject_name()
            .user_friendly_str()
            .map_err(|e| format!("unprintable subject: {e:?}"))?;

        Ok(Self {
            serial_number: hex::encode_upper(cert.serial_number_asn1().as_slice()),
            subject,
            not_before: cert.validity_not_before(),
            not_after: cert.validity_not_after(),
            public_key: cert.public_key_data().to_vec(),
            thumbprint: thumbprint_of(&der),
            der,
        })
    }

    pub fn to_certificate(&self) -> Result<CapturedX509Certificate, String> {
        CapturedX509Certificate::from_der(self.der.clone()).map_err(|e| e.to_string())
    }

    /// Whether `now` lies inside `[not_before, not_after]`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// Hex SHA-256 digest of a DER certificate.
pub fn thumbprint_of(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Recover the owner from a certificate common name of the form `<user id>`.
pub fn user_id_from_common_name(common_name: &str) -> Option<UserId> {
    let trimmed = common_name.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// A user's certificate and encrypted private key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignerIdentity {
    pub user_id: UserId,
    pub certificate: CertificateInfo,
    pub encrypted_private_key: EncryptedPrivateKey,
    pub created_at: DateTime<Utc>,
}

/// Build a fresh identity. Pure CPU work, no persistence.
pub fn generate_identity(user_id: UserId, config: &IdentityConfig) -> Result<SignerIdentity, IdentityError> {
    let key_pair = InMemorySigningKeyPair::generate_random(KeyAlgorithm::Ed25519)
        .map_err(|e| IdentityError::Generation(format!("key generation: {e}")))?;
    let pkcs8 = key_pair.to_pkcs8_one_asymmetric_key_der();

    let mut builder = X509CertificateBuilder::default();
    builder
        .subject()
        .append_common_name_utf8_string(&user_id.to_string())
        .map_err(|e| IdentityError::Generation(format!("subject CN: {e:?}")))?;
    builder
        .subject()
        .append_organization_utf8_string(&config.organization)
        .map_err(|e| IdentityError::Generation(format!("subject O: {e:?}")))?;
    builder.constraint_not_ca();
    // Positive, never zero
    builder.serial_number(rand::thread_rng().gen_range(1..i64::MAX));
    builder.validity_duration(Duration::days(i64::from(config.validity_days)));

    let certificate = builder
        .create_with_key_pair(&key_pair)
        .map_err(|e| IdentityError::Generation(format!("self-signing: {e}")))?;
    let certificate = CertificateInfo::from_certificate(&certificate).map_err(IdentityError::Generation)?;

    let passphrase = crypto::generate_passphrase();
    let encrypted_private_key = crypto::seal_private_key(&pkcs8, &passphrase, &config.kdf)
        .map_err(|e| IdentityError::Generation(e.to_string()))?;

    Ok(SignerIdentity {
        user_id,
        certificate,
        encrypted_private_key,
        created_at: Utc::now(),
    })
}

/// Resolves and lazily creates signing identities.
#[derive(Clone)]
pub struct IdentityRegistry {
    store: Arc<dyn IdentityStore>,
    config: IdentityConfig,
}

impl IdentityRegistry {
    pub fn new(store: Arc<dyn IdentityStore>, config: IdentityConfig) -> Self {
        Self { store, config }
    }

    pub async fn identity(&self, user_id: UserId) -> Result<Option<SignerIdentity>, IdentityError> {
        self.store.get_identity(user_id).await.map_err(IdentityError::Lookup)
    }

    /// Return the user's identity, generating and linking one if absent.
    ///
    /// Concurrent first calls for the same user all return the single
    /// identity that won the insert; material generated by the losers is
    /// dropped.
    pub async fn ensure_identity(&self, user_id: UserId) -> Result<SignerIdentity, IdentityError> {
        if let Some(existing) = self.identity(user_id).await? {
            return Ok(existing);
        }

        debug!(%user_id, "No signing identity, generating one");
        let config = self.config.clone();
        let generated = tokio::task::spawn_blocking(move || generate_identity(user_id, &config))
            .await
            .map_err(|e| IdentityError::Generation(format!("generation task failed: {e}")))??;

        match self.store.insert_identity_if_absent(generated).await {
            Ok(IdentityInsert::Inserted(identity)) => {
                info!(
                    %user_id,
                    serial = %identity.certificate.serial_number,
                    not_after = %identity.certificate.not_after,
                    "Issued signing identity"
                );
                Ok(identity)
            }
            Ok(IdentityInsert::Existing(identity)) => {
                debug!(%user_id, "Concurrent issuance won by another request, using stored identity");
                Ok(identity)
            }
            Err(e) => Err(IdentityError::Persistence(e)),
        }
    }

    /// Find who a certificate belongs to.
    ///
    /// The common name is authoritative. The thumbprint lookup only runs when
    /// the name cannot be parsed and is logged since it points at an
    /// inconsistent record.
    pub async fn resolve_certificate_owner(
        &self,
        certificate: &CertificateInfo,
    ) -> Result<Option<UserId>, IdentityError> {
        let parsed = certificate
            .to_certificate()
            .ok()
            .and_then(|cert| cert.subject_common_name())
            .and_then(|cn| user_id_from_common_name(&cn));
        if let Some(user_id) = parsed {
            return Ok(Some(user_id));
        }

        warn!(
            thumbprint = %certificate.thumbprint,
            "Certificate subject carries no user id, falling back to thumbprint lookup"
        );
        self.store
            .find_user_by_thumbprint(&certificate.thumbprint)
            .await
            .map_err(IdentityError::Lookup)
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }
}
