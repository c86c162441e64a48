#![cfg(feature = "sqlite")]

use docsign_config::{DocsignConfig, KdfConfig};
use docsign_core::{
    CompletionAction, DocumentId, IdentityStore, LogNotificationSender, MemoryOutbox, SignRequest, SigningService,
    SqliteSigningStore, StatementChoice, UserId,
};
use std::sync::Arc;
use tempfile::tempdir;

fn fast_config() -> DocsignConfig {
    let mut config = DocsignConfig::default();
    config.identity.kdf = KdfConfig::insecure_fast();
    config
}

fn request(document: i64, signer: i64) -> SignRequest {
    SignRequest {
        document_id: DocumentId(document),
        signer_id: UserId(signer),
        delegated_signer_id: None,
        statement: StatementChoice::custom("Approved"),
    }
}

#[tokio::test]
async fn test_workflow_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("docsign.db");
    let outbox = MemoryOutbox::new();

    {
        let store = Arc::new(SqliteSigningStore::open(&path).unwrap());
        store.register_document(DocumentId(3), UserId(10), b"Contract #3".to_vec()).await.unwrap();
        store.set_completer(DocumentId(3), UserId(10)).await.unwrap();
        store.set_directors(vec![UserId(20)]).await.unwrap();

        let service = SigningService::new(store, Arc::new(LogNotificationSender), Arc::new(outbox.clone()), &fast_config());
        let outcome = service.sign_document(request(3, 10)).await.unwrap();
        assert_eq!(outcome.record.statement_text.as_deref(), Some("Approved"));
    }

    let store = Arc::new(SqliteSigningStore::open(&path).unwrap());
    assert!(store.get_identity(UserId(10)).await.unwrap().is_some());

    let service = SigningService::new(store, Arc::new(LogNotificationSender), Arc::new(outbox.clone()), &fast_config());
    let err = service.sign_document(request(3, 10)).await.unwrap_err();
    assert!(err.is_conflict());

    let outcome = service.sign_document(request(3, 20)).await.unwrap();
    assert_eq!(outcome.action, Some(CompletionAction::Packaged));
    assert_eq!(outbox.bundles().await.len(), 1);
    assert!(service.export_bundle(DocumentId(3)).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unique_constraint_under_concurrency() {
    let store = Arc::new(SqliteSigningStore::open_in_memory().unwrap());
    store.register_document(DocumentId(1), UserId(10), b"Request #1".to_vec()).await.unwrap();

    let service = Arc::new(SigningService::new(
        store.clone(),
        Arc::new(LogNotificationSender),
        Arc::new(MemoryOutbox::new()),
        &fast_config(),
    ));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.sign_document(request(1, 10)).await })
        })
        .collect();

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(committed, 1);
}
