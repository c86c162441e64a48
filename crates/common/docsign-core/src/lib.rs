//! docsign-core
//! Per-user signing identities, CMS signatures, the signature ledger and the
//! signer quorum that gates packaging of fully signed documents.

pub mod bundle;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod notifier;
pub mod quorum;
pub mod service;
pub mod signer;
pub mod storage;
pub mod types;

// Re-export key structs/functions
pub use bundle::{BundleSignature, SignatureSheetRow, SignedBundle};
pub use error::ServiceError;
pub use identity::{CertificateInfo, IdentityError, IdentityRegistry, SignerIdentity};
pub use ledger::{LedgerError, SignatureLedger, SignatureRecord, StatementChoice, StatementTemplate};
pub use notifier::{
    BundleSink, CompletionAction, CompletionNotifier, LogNotificationSender, MemoryOutbox, NotificationSender,
    NotifierError,
};
pub use quorum::{QuorumError, QuorumEvaluator, QuorumPhase, QuorumReport, QuorumState};
pub use service::{SignRequest, SigningOutcome, SigningService};
pub use signer::{CmsSigner, SignatureBlob, SignatureDecodeError, SignerError};
pub use storage::{
    DocumentSource, IdentityStore, MemorySigningStore, Milestone, SignatureStore, SigningContextSource, StorageError,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteSigningStore;
pub use types::{DocumentId, SigningContext, TemplateId, UserId};
