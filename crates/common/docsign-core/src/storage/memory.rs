use super::{
    DocumentSource, IdentityInsert, IdentityStore, Milestone, SignatureStore, SigningContextSource,
    StorageError,
};
use crate::identity::SignerIdentity;
use crate::ledger::{SignatureRecord, StatementTemplate};
use crate::types::{DocumentId, SigningContext, TemplateId, UserId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct DocumentEntry {
    creator: UserId,
    completer: Option<UserId>,
    content: Vec<u8>,
}

/// An in-memory implementation of every storage capability, for tests and
/// embedding.
///
/// Each uniqueness check and its insert happen under one write lock, which is
/// the in-memory equivalent of a unique constraint.
#[derive(Debug, Default, Clone)]
pub struct MemorySigningStore {
    /// user_id -> identity
    identities: Arc<RwLock<HashMap<UserId, SignerIdentity>>>,

    /// (document_id, signer_id) -> record
    signatures: Arc<RwLock<BTreeMap<(DocumentId, UserId), SignatureRecord>>>,

    templates: Arc<RwLock<BTreeMap<TemplateId, StatementTemplate>>>,

    milestones: Arc<RwLock<HashSet<(DocumentId, Milestone)>>>,

    documents: Arc<RwLock<HashMap<DocumentId, DocumentEntry>>>,

    /// Users currently holding the director role
    directors: Arc<RwLock<BTreeSet<UserId>>>,
}

impl MemorySigningStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a document with its creator and content. Refused
    /// once anyone has signed it.
    pub async fn register_document(
        &self,
        document_id: DocumentId,
        creator: UserId,
        content: Vec<u8>,
    ) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        let signatures = self.signatures.read().await;
        if signatures
            .range((document_id, UserId(i64::MIN))..=(document_id, UserId(i64::MAX)))
            .next()
            .is_some()
        {
            return Err(StorageError::Conflict(format!("document {document_id} already has signatures")));
        }
        documents.insert(
            document_id,
            DocumentEntry {
                creator,
                completer: None,
                content,
            },
        );
        Ok(())
    }

    /// Record who completed the workflow for a document.
    pub async fn set_completer(&self, document_id: DocumentId, completer: UserId) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        let entry = documents
            .get_mut(&document_id)
            .ok_or_else(|| StorageError::NotFound(format!("document {document_id}")))?;
        entry.completer = Some(completer);
        Ok(())
    }

    /// Replace the director role membership.
    pub async fn set_directors(&self, directors: impl IntoIterator<Item = UserId>) {
        let mut lock = self.directors.write().await;
        *lock = directors.into_iter().collect();
    }

    pub async fn add_template(&self, template: StatementTemplate) {
        let mut templates = self.templates.write().await;
        templates.insert(template.template_id, template);
    }

    /// Number of identities held (test helper).
    pub async fn identity_count(&self) -> usize {
        self.identities.read().await.len()
    }
}

#[async_trait]
impl IdentityStore for MemorySigningStore {
    async fn get_identity(&self, user_id: UserId) -> Result<Option<SignerIdentity>, StorageError> {
        let identities = self.identities.read().await;
        Ok(identities.get(&user_id).cloned())
    }

    async fn insert_identity_if_absent(
        &self,
        identity: SignerIdentity,
    ) -> Result<IdentityInsert, StorageError> {
        let mut identities = self.identities.write().await;
        if let Some(existing) = identities.get(&identity.user_id) {
            return Ok(IdentityInsert::Existing(existing.clone()));
        }
        identities.insert(identity.user_id, identity.clone());
        Ok(IdentityInsert::Inserted(identity))
    }

    async fn find_user_by_thumbprint(&self, thumbprint: &str) -> Result<Option<UserId>, StorageError> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .find(|identity| identity.certificate.thumbprint.eq_ignore_ascii_case(thumbprint))
            .map(|identity| identity.user_id))
    }
}

#[async_trait]
impl SignatureStore for MemorySigningStore {
    async fn insert_signature(&self, record: &SignatureRecord) -> Result<(), StorageError> {
        let mut signatures = self.signatures.write().await;
        let key = (record.document_id, record.signer_id);
        if signatures.contains_key(&key) {
            return Err(StorageError::UniqueViolation(format!(
                "signature ({}, {})",
                record.document_id, record.signer_id
            )));
        }
        signatures.insert(key, record.clone());
        Ok(())
    }

    async fn list_signatures(&self, document_id: DocumentId) -> Result<Vec<SignatureRecord>, StorageError> {
        let signatures = self.signatures.read().await;
        let mut result: Vec<SignatureRecord> = signatures
            .range((document_id, UserId(i64::MIN))..=(document_id, UserId(i64::MAX)))
            .map(|(_, record)| record.clone())
            .collect();
        result.sort_by_key(|record| record.signed_at);
        Ok(result)
    }

    async fn statement_template(&self, template_id: TemplateId) -> Result<Option<StatementTemplate>, StorageError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&template_id).cloned())
    }

    async fn list_statement_templates(&self) -> Result<Vec<StatementTemplate>, StorageError> {
        let templates = self.templates.read().await;
        Ok(templates.values().cloned().collect())
    }

    async fn claim_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<bool, StorageError> {
        let mut milestones = self.milestones.write().await;
        Ok(milestones.insert((document_id, milestone)))
    }

    async fn has_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<bool, StorageError> {
        Ok(self.milestones.read().await.contains(&(document_id, milestone)))
    }

    async fn release_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<(), StorageError> {
        self.milestones.write().await.remove(&(document_id, milestone));
        Ok(())
    }
}

#[async_trait]
impl SigningContextSource for MemorySigningStore {
    async fn load_signing_context(&self, document_id: DocumentId) -> Result<SigningContext, StorageError> {
        let documents = self.documents.read().await;
        let entry = documents
            .get(&document_id)
            .ok_or_else(|| StorageError::NotFound(format!("document {document_id}")))?;
        let directors = self.directors.read().await;
        Ok(SigningContext {
            document_id,
            creator: entry.creator,
            completer: entry.completer,
            director_ids: directors.clone(),
        })
    }
}

#[async_trait]
impl DocumentSource for MemorySigningStore {
    async fn load_document(&self, document_id: DocumentId) -> Result<Vec<u8>, StorageError> {
        let documents = self.documents.read().await;
        documents
            .get(&document_id)
            .map(|entry| entry.content.clone())
            .ok_or_else(|| StorageError::NotFound(format!("document {document_id}")))
    }
}
