use super::{
    DocumentSource, IdentityInsert, IdentityStore, Milestone, SignatureStore, SigningContextSource,
    StorageError,
};
use crate::identity::SignerIdentity;
use crate::ledger::{SignatureRecord, StatementTemplate};
use crate::types::{DocumentId, SigningContext, TemplateId, UserId};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    user_id INTEGER PRIMARY KEY,
    thumbprint TEXT NOT NULL,
    identity_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_thumbprint ON identities(thumbprint);

CREATE TABLE IF NOT EXISTS signatures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    signer_id INTEGER NOT NULL,
    signed_at TEXT NOT NULL,
    record_json TEXT NOT NULL,
    UNIQUE(document_id, signer_id)
);

CREATE TABLE IF NOT EXISTS statement_templates (
    template_id INTEGER PRIMARY KEY,
    text TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS milestones (
    document_id INTEGER NOT NULL,
    milestone TEXT NOT NULL,
    PRIMARY KEY (document_id, milestone)
);

CREATE TABLE IF NOT EXISTS documents (
    document_id INTEGER PRIMARY KEY,
    creator_id INTEGER NOT NULL,
    completer_id INTEGER,
    content BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS directors (
    user_id INTEGER PRIMARY KEY
);
"#;

fn backend(context: &str) -> impl Fn(rusqlite::Error) -> StorageError + '_ {
    move |e| StorageError::Backend(format!("{context}: {e}"))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// SQLite implementation of every storage capability.
///
/// Uniqueness lives in the schema: `identities.user_id` is the primary key and
/// `signatures` carries `UNIQUE(document_id, signer_id)`.
#[derive(Clone)]
pub struct SqliteSigningStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSigningStore {
    /// Open or create the database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        info!("Opening SQLite signing store at {:?}", path);

        let conn = Connection::open(path).map_err(backend("Failed to open SQLite"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(backend("Failed to set PRAGMA"))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite signing store");
        let conn = Connection::open_in_memory().map_err(backend("Failed to open in-memory SQLite"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(backend("Failed to initialize schema"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::Backend(format!("Lock poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("spawn_blocking join error: {e}")))?
    }

    /// Register or replace a document with its creator and content. Refused
    /// once anyone has signed it.
    pub async fn register_document(
        &self,
        document_id: DocumentId,
        creator: UserId,
        content: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(backend("Failed to begin transaction"))?;
            let signed: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM signatures WHERE document_id = ?1)",
                    params![document_id.0],
                    |row| row.get(0),
                )
                .map_err(backend("Failed to check signatures"))?;
            if signed {
                return Err(StorageError::Conflict(format!("document {document_id} already has signatures")));
            }
            tx.execute(
                "INSERT INTO documents (document_id, creator_id, content) VALUES (?1, ?2, ?3)
                 ON CONFLICT(document_id) DO UPDATE SET creator_id = excluded.creator_id, content = excluded.content",
                params![document_id.0, creator.0, content],
            )
            .map_err(backend("Failed to register document"))?;
            tx.commit().map_err(backend("Failed to commit document"))
        })
        .await
    }

    pub async fn set_completer(&self, document_id: DocumentId, completer: UserId) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE documents SET completer_id = ?2 WHERE document_id = ?1",
                    params![document_id.0, completer.0],
                )
                .map_err(backend("Failed to set completer"))?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("document {document_id}")));
            }
            Ok(())
        })
        .await
    }

    /// Replace the director role membership.
    pub async fn set_directors(&self, directors: Vec<UserId>) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(backend("Failed to begin transaction"))?;
            tx.execute("DELETE FROM directors", [])
                .map_err(backend("Failed to clear directors"))?;
            for director in &directors {
                tx.execute(
                    "INSERT OR IGNORE INTO directors (user_id) VALUES (?1)",
                    params![director.0],
                )
                .map_err(backend("Failed to insert director"))?;
            }
            tx.commit().map_err(backend("Failed to commit directors"))
        })
        .await
    }

    pub async fn add_template(&self, template: StatementTemplate) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO statement_templates (template_id, text) VALUES (?1, ?2)
                 ON CONFLICT(template_id) DO UPDATE SET text = excluded.text",
                params![template.template_id.0, template.text],
            )
            .map_err(backend("Failed to store template"))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl IdentityStore for SqliteSigningStore {
    async fn get_identity(&self, user_id: UserId) -> Result<Option<SignerIdentity>, StorageError> {
        self.with_conn(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT identity_json FROM identities WHERE user_id = ?1",
                    params![user_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend("Failed to load identity"))?;
            json.map(|json| serde_json::from_str(&json).map_err(StorageError::Serialization))
                .transpose()
        })
        .await
    }

    async fn insert_identity_if_absent(
        &self,
        identity: SignerIdentity,
    ) -> Result<IdentityInsert, StorageError> {
        let json = serde_json::to_string(&identity)?;
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO identities (user_id, thumbprint, identity_json, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        identity.user_id.0,
                        identity.certificate.thumbprint,
                        json,
                        identity.created_at.to_rfc3339()
                    ],
                )
                .map_err(backend("Failed to insert identity"))?;
            if inserted == 1 {
                return Ok(IdentityInsert::Inserted(identity));
            }

            let existing: String = conn
                .query_row(
                    "SELECT identity_json FROM identities WHERE user_id = ?1",
                    params![identity.user_id.0],
                    |row| row.get(0),
                )
                .map_err(backend("Failed to load existing identity"))?;
            Ok(IdentityInsert::Existing(serde_json::from_str(&existing)?))
        })
        .await
    }

    async fn find_user_by_thumbprint(&self, thumbprint: &str) -> Result<Option<UserId>, StorageError> {
        let thumbprint = thumbprint.to_ascii_lowercase();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT user_id FROM identities WHERE lower(thumbprint) = ?1",
                params![thumbprint],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|user| user.map(UserId))
            .map_err(backend("Failed to look up thumbprint"))
        })
        .await
    }
}

#[async_trait]
impl SignatureStore for SqliteSigningStore {
    async fn insert_signature(&self, record: &SignatureRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(record)?;
        let (document_id, signer_id, signed_at) = (record.document_id, record.signer_id, record.signed_at);
        self.with_conn(move |conn| {
            match conn.execute(
                "INSERT INTO signatures (document_id, signer_id, signed_at, record_json) VALUES (?1, ?2, ?3, ?4)",
                params![document_id.0, signer_id.0, signed_at.to_rfc3339(), json],
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StorageError::UniqueViolation(format!(
                    "signature ({document_id}, {signer_id})"
                ))),
                Err(e) => Err(StorageError::Backend(format!("Failed to insert signature: {e}"))),
            }
        })
        .await
    }

    async fn list_signatures(&self, document_id: DocumentId) -> Result<Vec<SignatureRecord>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT record_json FROM signatures WHERE document_id = ?1 ORDER BY id")
                .map_err(backend("Failed to prepare signature query"))?;
            let rows = stmt
                .query_map(params![document_id.0], |row| row.get::<_, String>(0))
                .map_err(backend("Failed to query signatures"))?;

            let mut records = Vec::new();
            for json in rows {
                let json = json.map_err(backend("Failed to read signature row"))?;
                records.push(serde_json::from_str(&json)?);
            }
            Ok(records)
        })
        .await
    }

    async fn statement_template(&self, template_id: TemplateId) -> Result<Option<StatementTemplate>, StorageError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT text FROM statement_templates WHERE template_id = ?1",
                params![template_id.0],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|text| text.map(|text| StatementTemplate { template_id, text }))
            .map_err(backend("Failed to load template"))
        })
        .await
    }

    async fn list_statement_templates(&self) -> Result<Vec<StatementTemplate>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT template_id, text FROM statement_templates ORDER BY template_id")
                .map_err(backend("Failed to prepare template query"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(StatementTemplate {
                        template_id: TemplateId(row.get(0)?),
                        text: row.get(1)?,
                    })
                })
                .map_err(backend("Failed to query templates"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(backend("Failed to read template row"))
        })
        .await
    }

    async fn claim_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<bool, StorageError> {
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO milestones (document_id, milestone) VALUES (?1, ?2)",
                    params![document_id.0, milestone.to_string()],
                )
                .map_err(backend("Failed to claim milestone"))?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn has_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<bool, StorageError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM milestones WHERE document_id = ?1 AND milestone = ?2)",
                params![document_id.0, milestone.to_string()],
                |row| row.get(0),
            )
            .map_err(backend("Failed to read milestone"))
        })
        .await
    }

    async fn release_milestone(&self, document_id: DocumentId, milestone: Milestone) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM milestones WHERE document_id = ?1 AND milestone = ?2",
                params![document_id.0, milestone.to_string()],
            )
            .map_err(backend("Failed to release milestone"))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SigningContextSource for SqliteSigningStore {
    async fn load_signing_context(&self, document_id: DocumentId) -> Result<SigningContext, StorageError> {
        self.with_conn(move |conn| {
            let (creator, completer): (i64, Option<i64>) = conn
                .query_row(
                    "SELECT creator_id, completer_id FROM documents WHERE document_id = ?1",
                    params![document_id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(backend("Failed to load document roles"))?
                .ok_or_else(|| StorageError::NotFound(format!("document {document_id}")))?;

            let mut stmt = conn
                .prepare("SELECT user_id FROM directors")
                .map_err(backend("Failed to prepare director query"))?;
            let director_ids = stmt
                .query_map([], |row| row.get::<_, i64>(0).map(UserId))
                .map_err(backend("Failed to query directors"))?
                .collect::<Result<_, _>>()
                .map_err(backend("Failed to read director row"))?;

            Ok(SigningContext {
                document_id,
                creator: UserId(creator),
                completer: completer.map(UserId),
                director_ids,
            })
        })
        .await
    }
}

#[async_trait]
impl DocumentSource for SqliteSigningStore {
    async fn load_document(&self, document_id: DocumentId) -> Result<Vec<u8>, StorageError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT content FROM documents WHERE document_id = ?1",
                params![document_id.0],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(backend("Failed to load document"))?
            .ok_or_else(|| StorageError::NotFound(format!("document {document_id}")))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::CertificateInfo;
    use chrono::Utc;
    use docsign_config::SignatureMode;

    fn record(document: i64, signer: i64) -> SignatureRecord {
        SignatureRecord {
            document_id: DocumentId(document),
            signer_id: UserId(signer),
            signed_at: Utc::now(),
            certificate_snapshot: CertificateInfo {
                serial_number: "01".to_string(),
                subject: format!("CN={signer}"),
                not_before: Utc::now(),
                not_after: Utc::now(),
                public_key: vec![7; 32],
                thumbprint: "00".to_string(),
                der: vec![0x30, 0x00],
            },
            delegated_signer_id: None,
            statement_id: Some(TemplateId(1)),
            statement_text: None,
            signature: vec![1, 2, 3],
            mode: SignatureMode::Detached,
        }
    }

    #[tokio::test]
    async fn unique_signer_per_document() {
        let store = SqliteSigningStore::open_in_memory().unwrap();
        store.insert_signature(&record(1, 10)).await.unwrap();
        store.insert_signature(&record(2, 10)).await.unwrap();

        let err = store.insert_signature(&record(1, 10)).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation(_)));

        let listed = store.list_signatures(DocumentId(1)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].signer_id, UserId(10));
        assert_eq!(listed[0].mode, SignatureMode::Detached);
        assert_eq!(listed[0].signature, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn roles_and_documents() {
        let store = SqliteSigningStore::open_in_memory().unwrap();
        store.register_document(DocumentId(5), UserId(10), b"body".to_vec()).await.unwrap();
        store.set_directors(vec![UserId(20), UserId(21)]).await.unwrap();

        let ctx = store.load_signing_context(DocumentId(5)).await.unwrap();
        assert_eq!(ctx.completer, None);
        assert_eq!(ctx.director_ids.len(), 2);

        store.set_completer(DocumentId(5), UserId(10)).await.unwrap();
        store.set_directors(vec![UserId(21)]).await.unwrap();
        let ctx = store.load_signing_context(DocumentId(5)).await.unwrap();
        assert_eq!(ctx.completer, Some(UserId(10)));
        assert_eq!(ctx.director_ids.into_iter().collect::<Vec<_>>(), vec![UserId(21)]);

        assert_eq!(store.load_document(DocumentId(5)).await.unwrap(), b"body".to_vec());

        // Replaceable until the first signature lands
        store.register_document(DocumentId(5), UserId(10), b"body v2".to_vec()).await.unwrap();
        store.insert_signature(&record(5, 10)).await.unwrap();
        let err = store
            .register_document(DocumentId(5), UserId(11), b"body v3".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.load_document(DocumentId(5)).await.unwrap(), b"body v2".to_vec());
        assert_eq!(store.load_signing_context(DocumentId(5)).await.unwrap().creator, UserId(10));

        assert!(matches!(
            store.set_completer(DocumentId(6), UserId(1)).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn milestones_and_templates() {
        let store = SqliteSigningStore::open_in_memory().unwrap();
        assert!(store.claim_milestone(DocumentId(1), Milestone::Packaged).await.unwrap());
        assert!(!store.claim_milestone(DocumentId(1), Milestone::Packaged).await.unwrap());
        assert!(store.has_milestone(DocumentId(1), Milestone::Packaged).await.unwrap());
        assert!(!store.has_milestone(DocumentId(1), Milestone::QuorumReached).await.unwrap());

        store.release_milestone(DocumentId(1), Milestone::Packaged).await.unwrap();
        assert!(!store.has_milestone(DocumentId(1), Milestone::Packaged).await.unwrap());
        assert!(store.claim_milestone(DocumentId(1), Milestone::Packaged).await.unwrap());

        store
            .add_template(StatementTemplate {
                template_id: TemplateId(2),
                text: "Signed for the head of procurement".to_string(),
            })
            .await
            .unwrap();
        let template = store.statement_template(TemplateId(2)).await.unwrap().unwrap();
        assert_eq!(template.text, "Signed for the head of procurement");
        assert!(store.statement_template(TemplateId(3)).await.unwrap().is_none());
        assert_eq!(store.list_statement_templates().await.unwrap().len(), 1);
    }
}
