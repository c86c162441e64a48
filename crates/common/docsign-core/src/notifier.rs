//! Follow-up actions driven by quorum transitions.

use std::sync::Arc;

use async_trait::async_trait;
use docsign_config::NotificationConfig;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle::SignedBundle;
use crate::quorum::{QuorumError, QuorumEvaluator, QuorumPhase};
use crate::storage::{DocumentSource, Milestone, SignatureStore, StorageError};
use crate::types::{DocumentId, UserId};

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error(transparent)]
    Quorum(#[from] QuorumError),

    #[error("Notifier storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound message transport. Failures are logged by the caller and never
/// retried.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, user_id: UserId, subject: &str, body: &str) -> Result<(), NotifierError>;
}

/// Receives the bundle of a fully signed document.
#[async_trait]
pub trait BundleSink: Send + Sync {
    async fn deliver(&self, bundle: &SignedBundle) -> Result<(), NotifierError>;
}

/// What a notifier pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "users", rename_all = "snake_case")]
pub enum CompletionAction {
    /// Nothing to do in the current phase, or already done before.
    None,
    /// "Ready for final approval" sent to these directors for the first time.
    DirectorsNotified(Vec<UserId>),
    /// Bundle handed to the sink.
    Packaged,
    /// Creator told the completed document awaits their signature.
    CreatorReminded(UserId),
}

pub struct CompletionNotifier {
    quorum: QuorumEvaluator,
    signatures: Arc<dyn SignatureStore>,
    documents: Arc<dyn DocumentSource>,
    sender: Arc<dyn NotificationSender>,
    sink: Arc<dyn BundleSink>,
    templates: NotificationConfig,
}

impl CompletionNotifier {
    pub fn new(
        quorum: QuorumEvaluator,
        signatures: Arc<dyn SignatureStore>,
        documents: Arc<dyn DocumentSource>,
        sender: Arc<dyn NotificationSender>,
        sink: Arc<dyn BundleSink>,
        templates: NotificationConfig,
    ) -> Self {
        Self {
            quorum,
            signatures,
            documents,
            sender,
            sink,
            templates,
        }
    }

    /// Run after every committed signature. Reads state only and sets
    /// milestone flags; it never touches identities or the ledger.
    pub async fn on_signature_recorded(&self, document_id: DocumentId) -> Result<CompletionAction, NotifierError> {
        let report = self.quorum.report(document_id).await?;

        match report.phase {
            QuorumPhase::CollectingParticipants => Ok(CompletionAction::None),
            QuorumPhase::ReadyForFinalParty => {
                let mut notified = Vec::new();
                for director in &report.missing {
                    if !self
                        .signatures
                        .claim_milestone(document_id, Milestone::DirectorNotified(*director))
                        .await?
                    {
                        continue;
                    }
                    self.send(
                        *director,
                        &self.templates.ready_subject,
                        &self.templates.ready_body,
                        document_id,
                    )
                    .await;
                    notified.push(*director);
                }
                if notified.is_empty() {
                    Ok(CompletionAction::None)
                } else {
                    info!(%document_id, directors = ?notified, "Directors asked for final approval");
                    Ok(CompletionAction::DirectorsNotified(notified))
                }
            }
            QuorumPhase::Complete => {
                if !self.signatures.claim_milestone(document_id, Milestone::Packaged).await? {
                    debug!(%document_id, "Bundle already packaged");
                    return Ok(CompletionAction::None);
                }
                match self.package(document_id).await {
                    Ok(signatures) => {
                        info!(%document_id, signatures, "Packaged fully signed document");
                        Ok(CompletionAction::Packaged)
                    }
                    Err(e) => {
                        // Unclaim so the next pass delivers again
                        self.signatures.release_milestone(document_id, Milestone::Packaged).await?;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Run when the workflow assigns a completer. Reminds the creator once, if
    /// they have not signed, then re-evaluates the quorum since the new
    /// completer may have changed the phase.
    pub async fn on_document_completed(&self, document_id: DocumentId) -> Result<Vec<CompletionAction>, NotifierError> {
        let context = self.quorum.signing_context(document_id).await?;
        let mut actions = Vec::new();

        if context.completer.is_some() {
            let signed = self
                .signatures
                .list_signatures(document_id)
                .await?
                .iter()
                .any(|record| record.signer_id == context.creator);

            if !signed
                && self
                    .signatures
                    .claim_milestone(document_id, Milestone::CompletionNoticeSent)
                    .await?
            {
                self.send(
                    context.creator,
                    &self.templates.pending_subject,
                    &self.templates.pending_body,
                    document_id,
                )
                .await;
                actions.push(CompletionAction::CreatorReminded(context.creator));
            }
        }

        match self.on_signature_recorded(document_id).await? {
            CompletionAction::None => {}
            action => actions.push(action),
        }
        Ok(actions)
    }

    pub async fn assemble(&self, document_id: DocumentId) -> Result<SignedBundle, NotifierError> {
        let original = self.documents.load_document(document_id).await?;
        let records = self.signatures.list_signatures(document_id).await?;
        Ok(SignedBundle::assemble(document_id, original, &records))
    }

    async fn package(&self, document_id: DocumentId) -> Result<usize, NotifierError> {
        let bundle = self.assemble(document_id).await?;
        self.sink.deliver(&bundle).await?;
        Ok(bundle.signatures.len())
    }

    async fn send(&self, user_id: UserId, subject: &str, body: &str, document_id: DocumentId) {
        let subject = NotificationConfig::render(subject, document_id);
        let body = NotificationConfig::render(body, document_id);
        if let Err(e) = self.sender.notify(user_id, &subject, &body).await {
            warn!(%document_id, %user_id, error = %e, "Notification failed");
        }
    }
}

/// Sender that only writes the message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn notify(&self, user_id: UserId, subject: &str, body: &str) -> Result<(), NotifierError> {
        info!(%user_id, subject, body, "Notification");
        Ok(())
    }
}

/// Captures notifications and bundles in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryOutbox {
    messages: Arc<Mutex<Vec<(UserId, String, String)>>>,
    bundles: Arc<Mutex<Vec<SignedBundle>>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(recipient, subject, body)` in send order
    pub async fn messages(&self) -> Vec<(UserId, String, String)> {
        self.messages.lock().await.clone()
    }

    pub async fn bundles(&self) -> Vec<SignedBundle> {
        self.bundles.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSender for MemoryOutbox {
    async fn notify(&self, user_id: UserId, subject: &str, body: &str) -> Result<(), NotifierError> {
        self.messages
            .lock()
            .await
            .push((user_id, subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[async_trait]
impl BundleSink for MemoryOutbox {
    async fn deliver(&self, bundle: &SignedBundle) -> Result<(), NotifierError> {
        self.bundles.lock().await.push(bundle.clone());
        Ok(())
    }
}
