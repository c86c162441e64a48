use docsign_config::{DocsignConfig, KdfConfig};
use docsign_core::{
    DocumentId, IdentityRegistry, MemoryOutbox, MemorySigningStore, SignRequest, SignatureStore, SigningService,
    StatementChoice, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;

const DOC: DocumentId = DocumentId(9);

fn fast_config() -> DocsignConfig {
    let mut config = DocsignConfig::default();
    config.identity.kdf = KdfConfig::insecure_fast();
    config
}

async fn setup() -> (MemorySigningStore, MemoryOutbox, Arc<SigningService>) {
    let store = MemorySigningStore::new();
    store.register_document(DOC, UserId(10), b"Contract #9".to_vec()).await.unwrap();
    store.set_completer(DOC, UserId(11)).await.unwrap();
    store.set_directors([UserId(20), UserId(21)]).await;

    let outbox = MemoryOutbox::new();
    let service = SigningService::new(
        Arc::new(store.clone()),
        Arc::new(outbox.clone()),
        Arc::new(outbox.clone()),
        &fast_config(),
    );
    (store, outbox, Arc::new(service))
}

fn request(signer: i64) -> SignRequest {
    SignRequest {
        document_id: DOC,
        signer_id: UserId(signer),
        delegated_signer_id: None,
        statement: StatementChoice::default(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_signer_race_records_exactly_once() {
    let (store, _, service) = setup().await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.sign_document(request(10)).await })
        })
        .collect();

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(store.list_signatures(DOC).await.unwrap().len(), 1);
    assert_eq!(store.identity_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_parties_signing_at_once_packages_once() {
    let (_, outbox, service) = setup().await;

    let handles: Vec<_> = [10, 11, 20, 21]
        .into_iter()
        .map(|signer| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.sign_document(request(signer)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(service.report(DOC).await.unwrap().is_complete());
    assert_eq!(outbox.bundles().await.len(), 1);

    // No director is asked twice, however the commits interleaved
    let recipients: Vec<UserId> = outbox.messages().await.into_iter().map(|(user, _, _)| user).collect();
    let unique: HashSet<UserId> = recipients.iter().copied().collect();
    assert_eq!(unique.len(), recipients.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identity_creation_converges() {
    let store = Arc::new(MemorySigningStore::new());
    let registry = IdentityRegistry::new(store.clone(), fast_config().identity);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.ensure_identity(UserId(5)).await })
        })
        .collect();

    let mut thumbprints = HashSet::new();
    for handle in handles {
        let identity = handle.await.unwrap().unwrap();
        thumbprints.insert(identity.certificate.thumbprint);
    }

    assert_eq!(thumbprints.len(), 1);
    assert_eq!(store.identity_count().await, 1);
}
