pub mod engine;

pub use engine::{evaluate, reached, QuorumPhase, QuorumReport, QuorumState};

use crate::storage::{Milestone, SignatureStore, SigningContextSource, StorageError};
use crate::types::{DocumentId, SigningContext, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum QuorumError {
    #[error("Signing context unavailable for document {document_id}: {source}")]
    Context {
        document_id: DocumentId,
        source: StorageError,
    },
    #[error("Signatures unavailable for document {document_id}: {source}")]
    Ledger {
        document_id: DocumentId,
        source: StorageError,
    },
}

/// Loads role assignments and ledger state and evaluates the quorum.
///
/// The context is read on every call, so the result reflects director
/// membership at evaluation time. The first evaluation that sees the quorum
/// complete persists `Milestone::QuorumReached`; from then on the document
/// reports complete whatever the membership.
#[derive(Clone)]
pub struct QuorumEvaluator {
    contexts: Arc<dyn SigningContextSource>,
    signatures: Arc<dyn SignatureStore>,
}

impl QuorumEvaluator {
    pub fn new(contexts: Arc<dyn SigningContextSource>, signatures: Arc<dyn SignatureStore>) -> Self {
        Self { contexts, signatures }
    }

    pub async fn signing_context(&self, document_id: DocumentId) -> Result<SigningContext, QuorumError> {
        self.contexts
            .load_signing_context(document_id)
            .await
            .map_err(|source| QuorumError::Context { document_id, source })
    }

    pub async fn report(&self, document_id: DocumentId) -> Result<QuorumReport, QuorumError> {
        let context = self.signing_context(document_id).await?;
        let signed: BTreeSet<UserId> = self
            .signatures
            .list_signatures(document_id)
            .await
            .map_err(|source| QuorumError::Ledger { document_id, source })?
            .into_iter()
            .map(|record| record.signer_id)
            .collect();

        let already_reached = self
            .signatures
            .has_milestone(document_id, Milestone::QuorumReached)
            .await
            .map_err(|source| QuorumError::Ledger { document_id, source })?;

        let report = if already_reached {
            reached(&context, &signed)
        } else {
            let report = evaluate(&context, &signed);
            if report.is_complete() {
                self.signatures
                    .claim_milestone(document_id, Milestone::QuorumReached)
                    .await
                    .map_err(|source| QuorumError::Ledger { document_id, source })?;
            }
            report
        };
        debug!(%document_id, phase = ?report.phase, missing = report.missing.len(), "Evaluated quorum");
        Ok(report)
    }

    pub async fn evaluate(&self, document_id: DocumentId) -> Result<QuorumState, QuorumError> {
        Ok(self.report(document_id).await?.state)
    }

    pub async fn missing_signers(&self, document_id: DocumentId) -> Result<BTreeSet<UserId>, QuorumError> {
        Ok(self.report(document_id).await?.missing)
    }
}
