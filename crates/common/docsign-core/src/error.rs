use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::notifier::NotifierError;
use crate::quorum::QuorumError;
use crate::signer::{SignatureDecodeError, SignerError};
use crate::storage::StorageError;
use crate::types::{DocumentId, UserId};
use thiserror::Error;

/// Errors surfaced by the signing service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Signing(#[from] SignerError),

    #[error(transparent)]
    Decode(#[from] SignatureDecodeError),

    #[error("Signature produced for user {signer_id} did not verify")]
    VerificationFailed { signer_id: UserId },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Quorum(#[from] QuorumError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Document {0} is not signed by every required party")]
    NotComplete(DocumentId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Duplicate signature attempts, reported as a conflict rather than a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Ledger(LedgerError::AlreadySigned { .. }))
    }

    /// Text safe to show to the user. Never includes key material or
    /// storage detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceError::Identity(_) => {
                "Your signing certificate could not be created. Please try again."
            }
            ServiceError::Signing(SignerError::CertificateExpired { .. }) => {
                "Your signing certificate has expired. Contact the administrator to renew it."
            }
            ServiceError::Signing(SignerError::CertificateNotYetValid { .. }) => {
                "Your signing certificate is not valid yet. Contact the administrator."
            }
            ServiceError::Signing(_) => "The document cannot be signed. Contact the administrator.",
            ServiceError::Decode(_) | ServiceError::VerificationFailed { .. } => {
                "The signature could not be verified. Contact the administrator."
            }
            ServiceError::Ledger(LedgerError::AlreadySigned { .. }) => "You have already signed this document.",
            ServiceError::NotComplete(_) => "The document has not been signed by all required parties yet.",
            ServiceError::Storage(StorageError::NotFound(_))
            | ServiceError::Quorum(QuorumError::Context {
                source: StorageError::NotFound(_),
                ..
            }) => "The document was not found.",
            _ => "An internal error occurred. Please try again later.",
        }
    }
}
