use crate::identity::SignerIdentity;
use crate::ledger::{SignatureRecord, StatementTemplate};
use crate::types::{DocumentId, SigningContext, TemplateId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemorySigningStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSigningStore;

/// Errors that can occur when working with a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The write would invalidate data that already depends on the row.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result of an insert-if-absent write on the identity table.
#[derive(Debug, Clone)]
pub enum IdentityInsert {
    /// The offered identity is now linked to the user.
    Inserted(SignerIdentity),
    /// Another writer got there first; this is the identity that is linked.
    Existing(SignerIdentity),
}

/// One-shot follow-up actions that must not fire twice for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Milestone {
    /// The "ready for final approval" notice went to this director.
    DirectorNotified(UserId),
    /// The creator was told the completed document awaits their signature.
    CompletionNoticeSent,
    /// Everyone required at the time had signed. Never cleared, so the
    /// quorum stays complete when membership changes later.
    QuorumReached,
    /// The signed bundle was accepted by the packaging sink.
    Packaged,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::DirectorNotified(user) => write!(f, "director_notified:{user}"),
            Milestone::CompletionNoticeSent => write!(f, "completion_notice_sent"),
            Milestone::QuorumReached => write!(f, "quorum_reached"),
            Milestone::Packaged => write!(f, "packaged"),
        }
    }
}

/// Persistence of signing identities, keyed by user.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_identity(&self, user_id: UserId) -> Result<Option<SignerIdentity>, StorageError>;

    /// Link `identity` to its user unless one is already linked. Must be a
    /// single atomic operation.
    async fn insert_identity_if_absent(
        &self,
        identity: SignerIdentity,
    ) -> Result<IdentityInsert, StorageError>;

    /// Consistency-repair lookup by SHA-256 certificate thumbprint (hex).
    async fn find_user_by_thumbprint(&self, thumbprint: &str) -> Result<Option<UserId>, StorageError>;
}

/// Append-only signature table plus the small bits of state the ledger and
/// notifier need.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Insert a record. Fails with `StorageError::UniqueViolation` when the
    /// `(document_id, signer_id)` pair already exists.
    async fn insert_signature(&self, record: &SignatureRecord) -> Result<(), StorageError>;

    /// All records for a document, oldest first.
    async fn list_signatures(&self, document_id: DocumentId) -> Result<Vec<SignatureRecord>, StorageError>;

    async fn statement_template(&self, template_id: TemplateId) -> Result<Option<StatementTemplate>, StorageError>;

    async fn list_statement_templates(&self) -> Result<Vec<StatementTemplate>, StorageError>;

    /// Insert-if-absent on a milestone flag. Returns `true` only for the
    /// caller that set it.
    async fn claim_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<bool, StorageError>;

    async fn has_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<bool, StorageError>;

    /// Drop a claim whose follow-up failed so a later pass can retry it.
    async fn release_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<(), StorageError>;
}

/// Typed read of the role metadata that drives the quorum.
#[async_trait]
pub trait SigningContextSource: Send + Sync {
    async fn load_signing_context(&self, document_id: DocumentId) -> Result<SigningContext, StorageError>;
}

/// Upstream artifact being signed; opaque bytes.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load_document(&self, document_id: DocumentId) -> Result<Vec<u8>, StorageError>;
}
