//! Append-only record of who signed what.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsign_config::SignatureMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::identity::CertificateInfo;
use crate::signer::SignatureBlob;
use crate::storage::{SignatureStore, StorageError};
use crate::types::{base64_bytes, DocumentId, TemplateId, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User {signer_id} has already signed document {document_id}")]
    AlreadySigned {
        document_id: DocumentId,
        signer_id: UserId,
    },

    #[error("Ledger storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Reusable delegation clause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatementTemplate {
    pub template_id: TemplateId,
    pub text: String,
}

/// What the signer chose to attach as a statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatementChoice {
    pub custom_text: Option<String>,
    pub template_id: Option<TemplateId>,
}

impl StatementChoice {
    pub fn custom(text: impl Into<String>) -> Self {
        Self {
            custom_text: Some(text.into()),
            template_id: None,
        }
    }

    pub fn template(template_id: TemplateId) -> Self {
        Self {
            custom_text: None,
            template_id: Some(template_id),
        }
    }

    /// Trimmed custom text, if it is not blank.
    fn custom_text(&self) -> Option<&str> {
        self.custom_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// One signature. Unique on `(document_id, signer_id)` and never changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureRecord {
    pub document_id: DocumentId,
    pub signer_id: UserId,
    pub signed_at: DateTime<Utc>,
    pub certificate_snapshot: CertificateInfo,
    pub delegated_signer_id: Option<UserId>,
    pub statement_id: Option<TemplateId>,
    pub statement_text: Option<String>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub mode: SignatureMode,
}

/// Everything needed to append one signature.
#[derive(Debug, Clone)]
pub struct NewSignature {
    pub document_id: DocumentId,
    pub signer_id: UserId,
    pub delegated_signer_id: Option<UserId>,
    pub statement: StatementChoice,
    pub signature: SignatureBlob,
    pub certificate_snapshot: CertificateInfo,
    pub signed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SignatureLedger {
    store: Arc<dyn SignatureStore>,
}

impl SignatureLedger {
    pub fn new(store: Arc<dyn SignatureStore>) -> Self {
        Self { store }
    }

    /// Append a signature, rejecting a second one by the same signer.
    pub async fn record_signature(&self, new: NewSignature) -> Result<SignatureRecord, LedgerError> {
        let (statement_id, statement_text) = self.resolve_statement(&new.statement).await?;

        let record = SignatureRecord {
            document_id: new.document_id,
            signer_id: new.signer_id,
            signed_at: new.signed_at,
            certificate_snapshot: new.certificate_snapshot,
            delegated_signer_id: new.delegated_signer_id,
            statement_id,
            statement_text,
            signature: new.signature.der,
            mode: new.signature.mode,
        };

        match self.store.insert_signature(&record).await {
            Ok(()) => {
                info!(
                    document_id = %record.document_id,
                    signer_id = %record.signer_id,
                    delegated = ?record.delegated_signer_id,
                    "Recorded signature"
                );
                Ok(record)
            }
            Err(StorageError::UniqueViolation(_)) => Err(LedgerError::AlreadySigned {
                document_id: record.document_id,
                signer_id: record.signer_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Custom text wins over the template. An unknown template keeps its id
    /// but contributes no text.
    async fn resolve_statement(
        &self,
        choice: &StatementChoice,
    ) -> Result<(Option<TemplateId>, Option<String>), LedgerError> {
        if let Some(text) = choice.custom_text() {
            return Ok((choice.template_id, Some(text.to_string())));
        }
        match choice.template_id {
            Some(template_id) => {
                let text = self
                    .store
                    .statement_template(template_id)
                    .await?
                    .map(|template| template.text);
                Ok((Some(template_id), text))
            }
            None => Ok((None, None)),
        }
    }

    pub async fn signatures(&self, document_id: DocumentId) -> Result<Vec<SignatureRecord>, LedgerError> {
        Ok(self.store.list_signatures(document_id).await?)
    }

    pub async fn has_signed(&self, document_id: DocumentId, signer_id: UserId) -> Result<bool, LedgerError> {
        let signatures = self.store.list_signatures(document_id).await?;
        Ok(signatures.iter().any(|record| record.signer_id == signer_id))
    }

    pub async fn statement_templates(&self) -> Result<Vec<StatementTemplate>, LedgerError> {
        Ok(self.store.list_statement_templates().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySigningStore;

    fn certificate() -> CertificateInfo {
        CertificateInfo {
            serial_number: "01".to_string(),
            subject: "CN=10".to_string(),
            not_before: Utc::now(),
            not_after: Utc::now(),
            public_key: vec![1, 2, 3],
            thumbprint: "ab".to_string(),
            der: vec![0x30],
        }
    }

    fn new_signature(signer: i64, statement: StatementChoice) -> NewSignature {
        NewSignature {
            document_id: DocumentId(1),
            signer_id: UserId(signer),
            delegated_signer_id: None,
            statement,
            signature: SignatureBlob {
                der: vec![0x30, 0x00],
                mode: SignatureMode::Attached,
            },
            certificate_snapshot: certificate(),
            signed_at: Utc::now(),
        }
    }

    async fn ledger_with_template() -> SignatureLedger {
        let store = MemorySigningStore::new();
        store
            .add_template(StatementTemplate {
                template_id: TemplateId(3),
                text: "On behalf of the director".to_string(),
            })
            .await;
        SignatureLedger::new(Arc::new(store))
    }

    #[tokio::test]
    async fn second_signature_is_rejected() {
        let ledger = ledger_with_template().await;
        ledger.record_signature(new_signature(10, StatementChoice::default())).await.unwrap();

        let err = ledger
            .record_signature(new_signature(10, StatementChoice::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AlreadySigned { signer_id: UserId(10), .. }
        ));
        assert_eq!(ledger.signatures(DocumentId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn custom_text_beats_template() {
        let ledger = ledger_with_template().await;
        let choice = StatementChoice {
            custom_text: Some("  Approved, see memo 12  ".to_string()),
            template_id: Some(TemplateId(3)),
        };
        let record = ledger.record_signature(new_signature(10, choice)).await.unwrap();
        assert_eq!(record.statement_text.as_deref(), Some("Approved, see memo 12"));
        assert_eq!(record.statement_id, Some(TemplateId(3)));
    }

    #[tokio::test]
    async fn blank_custom_text_falls_back_to_template() {
        let ledger = ledger_with_template().await;
        let choice = StatementChoice {
            custom_text: Some("   ".to_string()),
            template_id: Some(TemplateId(3)),
        };
        let record = ledger.record_signature(new_signature(10, choice)).await.unwrap();
        assert_eq!(record.statement_text.as_deref(), Some("On behalf of the director"));
    }

    #[tokio::test]
    async fn unknown_template_keeps_id_without_text() {
        let ledger = ledger_with_template().await;
        let record = ledger
            .record_signature(new_signature(10, StatementChoice::template(TemplateId(99))))
            .await
            .unwrap();
        assert_eq!(record.statement_id, Some(TemplateId(99)));
        assert_eq!(record.statement_text, None);
    }

    #[tokio::test]
    async fn has_signed_tracks_ledger() {
        let ledger = ledger_with_template().await;
        assert!(!ledger.has_signed(DocumentId(1), UserId(10)).await.unwrap());
        ledger.record_signature(new_signature(10, StatementChoice::default())).await.unwrap();
        assert!(ledger.has_signed(DocumentId(1), UserId(10)).await.unwrap());
        assert!(!ledger.has_signed(DocumentId(1), UserId(11)).await.unwrap());
        assert_eq!(ledger.statement_templates().await.unwrap().len(), 1);
    }
}
