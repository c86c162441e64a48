//! Request-level orchestration of a signature.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsign_config::DocsignConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::bundle::{SignatureSheetRow, SignedBundle};
use crate::error::ServiceError;
use crate::identity::{IdentityRegistry, SignerIdentity};
use crate::ledger::{LedgerError, NewSignature, SignatureLedger, SignatureRecord, StatementChoice, StatementTemplate};
use crate::notifier::{BundleSink, CompletionAction, CompletionNotifier, NotificationSender};
use crate::quorum::{QuorumEvaluator, QuorumReport};
use crate::signer::{CmsSigner, SignerError};
use crate::storage::{DocumentSource, IdentityStore, SignatureStore, SigningContextSource, StorageError};
use crate::types::{DocumentId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub document_id: DocumentId,
    pub signer_id: UserId,
    /// User the signer acts on behalf of
    pub delegated_signer_id: Option<UserId>,
    #[serde(default)]
    pub statement: StatementChoice,
}

/// Result of a committed signature.
#[derive(Debug, Clone)]
pub struct SigningOutcome {
    pub record: SignatureRecord,
    /// `None` when the follow-up pass failed; see `follow_up_error`.
    pub action: Option<CompletionAction>,
    pub follow_up_error: Option<String>,
}

/// Everything one signature touches, wired over shared capabilities.
pub struct SigningService {
    identities: IdentityRegistry,
    signer: CmsSigner,
    ledger: SignatureLedger,
    quorum: QuorumEvaluator,
    notifier: CompletionNotifier,
    documents: Arc<dyn DocumentSource>,
}

impl SigningService {
    pub fn new<B>(
        backend: Arc<B>,
        sender: Arc<dyn NotificationSender>,
        sink: Arc<dyn BundleSink>,
        config: &DocsignConfig,
    ) -> Self
    where
        B: IdentityStore + SignatureStore + SigningContextSource + DocumentSource + 'static,
    {
        let quorum = QuorumEvaluator::new(backend.clone(), backend.clone());
        let notifier = CompletionNotifier::new(
            quorum.clone(),
            backend.clone(),
            backend.clone(),
            sender,
            sink,
            config.notifications.clone(),
        );

        Self {
            identities: IdentityRegistry::new(backend.clone(), config.identity.clone()),
            signer: CmsSigner::new(config.signing.mode),
            ledger: SignatureLedger::new(backend.clone()),
            quorum,
            notifier,
            documents: backend,
        }
    }

    /// Sign a document on behalf of `request.signer_id`.
    ///
    /// Nothing is written to the ledger unless the fresh signature verifies
    /// against the producing identity. Follow-up failures are reported in the
    /// outcome and never undo the record.
    pub async fn sign_document(&self, request: SignRequest) -> Result<SigningOutcome, ServiceError> {
        let SignRequest {
            document_id,
            signer_id,
            delegated_signer_id,
            statement,
        } = request;

        if self.ledger.has_signed(document_id, signer_id).await? {
            info!(%document_id, %signer_id, "Duplicate signing attempt rejected");
            return Err(LedgerError::AlreadySigned { document_id, signer_id }.into());
        }

        let identity = self.identities.ensure_identity(signer_id).await?;
        let document = self.documents.load_document(document_id).await?;
        let signed_at = Utc::now();

        let signer = self.signer;
        let (identity, signature) = tokio::task::spawn_blocking(move || {
            let signature = signer.sign(&identity, &document, signed_at)?;
            let verified = signer.verify(&signature.der, identity.user_id, signed_at, Some(&document))?;
            if !verified {
                return Err(ServiceError::VerificationFailed {
                    signer_id: identity.user_id,
                });
            }
            Ok::<_, ServiceError>((identity, signature))
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("signing task failed: {e}")))?
        .map_err(|e| {
            log_signing_failure(document_id, signer_id, &e);
            e
        })?;

        let record = self
            .ledger
            .record_signature(NewSignature {
                document_id,
                signer_id,
                delegated_signer_id,
                statement,
                signature,
                certificate_snapshot: identity.certificate,
                signed_at,
            })
            .await
            .map_err(|e| {
                if matches!(e, LedgerError::AlreadySigned { .. }) {
                    info!(%document_id, %signer_id, "Concurrent duplicate signature rejected");
                }
                ServiceError::from(e)
            })?;

        let (action, follow_up_error) = match self.notifier.on_signature_recorded(document_id).await {
            Ok(action) => (Some(action), None),
            Err(e) => {
                warn!(%document_id, error = %e, "Post-signature follow-up failed");
                (None, Some(e.to_string()))
            }
        };

        Ok(SigningOutcome {
            record,
            action,
            follow_up_error,
        })
    }

    /// Called once the workflow has assigned the completer.
    pub async fn document_completed(&self, document_id: DocumentId) -> Result<Vec<CompletionAction>, ServiceError> {
        Ok(self.notifier.on_document_completed(document_id).await?)
    }

    pub async fn report(&self, document_id: DocumentId) -> Result<QuorumReport, ServiceError> {
        Ok(self.quorum.report(document_id).await?)
    }

    /// Original document plus all signatures. Only for fully signed documents.
    pub async fn export_bundle(&self, document_id: DocumentId) -> Result<SignedBundle, ServiceError> {
        if !self.quorum.report(document_id).await?.is_complete() {
            return Err(ServiceError::NotComplete(document_id));
        }
        Ok(self.notifier.assemble(document_id).await?)
    }

    pub async fn signature_sheet(&self, document_id: DocumentId) -> Result<Vec<SignatureSheetRow>, ServiceError> {
        let records = self.ledger.signatures(document_id).await?;
        Ok(records.iter().map(SignatureSheetRow::from).collect())
    }

    /// Re-verify a stored signature against the current document bytes.
    pub async fn verify_signature(
        &self,
        document_id: DocumentId,
        signer_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let record = self
            .ledger
            .signatures(document_id)
            .await?
            .into_iter()
            .find(|record| record.signer_id == signer_id)
            .ok_or_else(|| StorageError::NotFound(format!("signature ({document_id}, {signer_id})")))?;
        let document = self.documents.load_document(document_id).await?;

        let signer = self.signer;
        tokio::task::spawn_blocking(move || {
            signer
                .verify(&record.signature, signer_id, now, Some(&document))
                .map_err(ServiceError::from)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("verification task failed: {e}")))?
    }

    pub async fn identity(&self, user_id: UserId) -> Result<Option<SignerIdentity>, ServiceError> {
        Ok(self.identities.identity(user_id).await?)
    }

    pub async fn statement_templates(&self) -> Result<Vec<StatementTemplate>, ServiceError> {
        Ok(self.ledger.statement_templates().await?)
    }
}

fn log_signing_failure(document_id: DocumentId, signer_id: UserId, err: &ServiceError) {
    match err {
        ServiceError::Signing(SignerError::CertificateExpired { not_after }) => {
            warn!(%document_id, %signer_id, %not_after, "Signing certificate expired");
        }
        ServiceError::Decode(e) => {
            error!(%document_id, %signer_id, error = %e, "Freshly produced signature is undecodable");
        }
        ServiceError::VerificationFailed { .. } => {
            error!(%document_id, %signer_id, "Freshly produced signature failed verification");
        }
        other => {
            warn!(%document_id, %signer_id, error = %other, "Signing failed");
        }
    }
}
