//! Export shapes handed to packaging and to external renderers.

use chrono::{DateTime, Utc};
use docsign_config::SignatureMode;
use serde::{Deserialize, Serialize};

use crate::identity::CertificateInfo;
use crate::ledger::SignatureRecord;
use crate::types::{base64_bytes, DocumentId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleSignature {
    pub signer_id: UserId,
    pub delegated_signer_id: Option<UserId>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub mode: SignatureMode,
    pub certificate: CertificateInfo,
}

/// Original document plus every signature over it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedBundle {
    pub document_id: DocumentId,
    #[serde(with = "base64_bytes")]
    pub original_document: Vec<u8>,
    pub signatures: Vec<BundleSignature>,
    pub assembled_at: DateTime<Utc>,
}

impl SignedBundle {
    pub fn assemble(document_id: DocumentId, original_document: Vec<u8>, records: &[SignatureRecord]) -> Self {
        let signatures = records
            .iter()
            .map(|record| BundleSignature {
                signer_id: record.signer_id,
                delegated_signer_id: record.delegated_signer_id,
                signature: record.signature.clone(),
                mode: record.mode,
                certificate: record.certificate_snapshot.clone(),
            })
            .collect();

        Self {
            document_id,
            original_document,
            signatures,
            assembled_at: Utc::now(),
        }
    }
}

/// One signature block as shown on a rendered document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureSheetRow {
    pub signer_id: UserId,
    pub delegated_signer_id: Option<UserId>,
    pub statement: Option<String>,
    pub certificate_serial: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub signed_at: DateTime<Utc>,
}

impl From<&SignatureRecord> for SignatureSheetRow {
    fn from(record: &SignatureRecord) -> Self {
        Self {
            signer_id: record.signer_id,
            delegated_signer_id: record.delegated_signer_id,
            statement: record.statement_text.clone(),
            certificate_serial: record.certificate_snapshot.serial_number.clone(),
            valid_from: record.certificate_snapshot.not_before,
            valid_to: record.certificate_snapshot.not_after,
            signed_at: record.signed_at,
        }
    }
}
