use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use witness_protocol::attestation_service::AttestationService;
use witness_protocol::chunk_processor::ChunkProcessor;
use witness_protocol::config::WitnessConfig;
use witness_protocol::discovery_service::DiscoveryService;
use witness_protocol::external::{FakeObjectStore, FakeRegistry, FakeSigningProvider, Registry};
use witness_protocol::group_service::GroupService;
use witness_protocol::identity::get_or_create;
use witness_protocol::keyvault::KeyVault;
use witness_protocol::recovery::Recovery;
use witness_protocol::secure_store::SecureStore;
use witness_protocol::session_manager::{Session, SessionRecordStatus};
use witness_protocol::upload_queue::UploadQueue;

fn test_config() -> WitnessConfig {
    let mut config = WitnessConfig::default();
    config.registry_address = "0xregistry".into();
    config.group_registry_address = "0xgroupregistry".into();
    config
}

fn temp_store(seed: u8) -> Arc<SecureStore> {
    let dir = tempfile::tempdir().unwrap();
    Arc::new(SecureStore::open(dir.into_path(), [seed; 32]).unwrap())
}

#[tokio::test]
async fn group_creation_round_trip() {
    let registry = Arc::new(FakeRegistry::new());
    let store = temp_store(1);
    let provider = FakeSigningProvider::new("0xcreator");
    let identity = get_or_create(&store, &provider, 1).await.unwrap();

    let service = GroupService::new(registry.clone(), store);
    let (group_id, _tx) = service.create("Family Safety", &identity, 0).await.unwrap();

    let group_id_bytes: [u8; 32] = hex::decode(&group_id).unwrap().try_into().unwrap();
    let on_chain = registry.group(&group_id_bytes).await.unwrap().unwrap();
    assert!(on_chain.active);
}

#[tokio::test]
async fn invite_join_adds_member_to_group() {
    let registry = Arc::new(FakeRegistry::new());
    let creator_store = temp_store(2);
    let creator_provider = FakeSigningProvider::new("0xcreator2");
    let creator_identity = get_or_create(&creator_store, &creator_provider, 1).await.unwrap();
    let creator_service = GroupService::new(registry.clone(), creator_store);
    let (group_id, _) = creator_service
        .create("Family Safety", &creator_identity, 0)
        .await
        .unwrap();
    let invite = creator_service
        .export_invite(&group_id, 84532, "0xregistry")
        .unwrap();

    let joiner_store = temp_store(3);
    let joiner_provider = FakeSigningProvider::new("0xjoiner");
    let joiner_identity = get_or_create(&joiner_store, &joiner_provider, 1).await.unwrap();
    let joiner_service = GroupService::new(registry.clone(), joiner_store);
    joiner_service
        .join(&invite, &joiner_identity, 84532, "0xregistry", "member", 0)
        .await
        .unwrap();

    let group_id_bytes: [u8; 32] = hex::decode(&group_id).unwrap().try_into().unwrap();
    assert!(registry
        .group_members(&group_id_bytes, "member")
        .await
        .unwrap());
}

#[tokio::test]
async fn three_chunk_session_then_playback_integrity() {
    let registry = Arc::new(FakeRegistry::new());
    let object_store = Arc::new(FakeObjectStore::new());
    let config = test_config();

    let vault = KeyVault::new();
    let session_key = vault.session_key();
    let group_secret = [7u8; 32];
    let group_id = KeyVault::derive_group_id(&group_secret);
    let wrapped = vault.wrap(&session_key, &group_secret).unwrap();
    let mut access_list = HashMap::new();
    access_list.insert(hex::encode(group_id), wrapped);

    let mut session = Session::create(
        "content-playback".into(),
        "0xuploader".into(),
        vec![group_id],
        session_key,
        access_list,
        object_store.clone(),
        registry.clone(),
        temp_store(8),
        &config,
        0,
    )
    .await
    .unwrap();

    for i in 0..3u64 {
        let blob = vec![(10 + i) as u8; 64];
        session.process_chunk(blob, 5_000, i * 1000, None).await.unwrap();
    }
    session.end_session().await.unwrap();

    let word = witness_protocol::session_manager::session_id_to_ledger_word(&session.record.session_id);
    let on_ledger_session = registry.session(&word).await.unwrap().unwrap();
    registry
        .commit_content(
            hex::decode("00000000000000000000000000000000000000000000000000000000000001")
                .unwrap()
                .try_into()
                .unwrap(),
            on_ledger_session.merkle_root,
            on_ledger_session.manifest_cid.clone(),
            vec![group_id],
        )
        .await
        .unwrap();

    let discovery = DiscoveryService::new(registry, object_store, Duration::from_secs(60));
    let content_id: [u8; 32] =
        hex::decode("00000000000000000000000000000000000000000000000000000000000001")
            .unwrap()
            .try_into()
            .unwrap();
    let plaintext = discovery.playback(&content_id, &group_secret).await.unwrap();
    assert_eq!(plaintext.len(), 3 * 64);
}

#[tokio::test]
async fn double_attestation_is_prevented() {
    let registry = Arc::new(FakeRegistry::new());
    let identity_store = temp_store(9);
    let provider = FakeSigningProvider::new("0xattestor");
    let identity = get_or_create(&identity_store, &provider, 1).await.unwrap();

    let secret = [5u8; 32];
    let group_id = witness_protocol::primitives::sha256(&secret);
    registry.create_group(group_id, identity.commitment).await.unwrap();

    let attestation_store = temp_store(10);
    let service = AttestationService::new(registry, attestation_store);
    let content_id = witness_protocol::primitives::to_hex(&[1u8; 32]);

    let first = service.attest(&content_id, group_id, &identity, 0).await.unwrap();
    assert_eq!(first.new_count, 1);

    let second = service.attest(&content_id, group_id, &identity, 1).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn interrupted_session_recovers_pending_chunks() {
    let object_store = Arc::new(FakeObjectStore::new());
    let processor = Arc::new(ChunkProcessor::new(object_store));
    let queue = UploadQueue::new(
        processor,
        witness_protocol::config::RetryPolicy::default(),
        temp_store(11),
        "interrupted-session",
    )
    .unwrap();

    queue.enqueue(0, b"chunk-0".to_vec(), 0).await.unwrap();
    queue.enqueue(1, b"chunk-1".to_vec(), 1).await.unwrap();
    queue.drain(&[1u8; 32], |_| {}).await.unwrap();

    queue.enqueue(2, b"chunk-2".to_vec(), 2).await.unwrap();

    let mut record = witness_protocol::session_manager::SessionRecord {
        session_id: uuid::Uuid::new_v4(),
        status: SessionRecordStatus::Interrupted,
        group_ids: vec![],
        created_at_ms: 0,
        completed_at_ms: None,
        interrupted_at_ms: Some(500),
        discarded_at_ms: None,
        chunk_count: 2,
        latest_manifest_cid: None,
        latest_merkle_root: None,
    };

    Recovery::resume(&mut record, &queue).await.unwrap();
    assert_eq!(record.status, SessionRecordStatus::Uploading);

    let mut completed = Vec::new();
    queue
        .drain(&[1u8; 32], |event| {
            if let witness_protocol::upload_queue::QueueEvent::Complete { chunk_index, .. } = event {
                completed.push(chunk_index);
            }
        })
        .await
        .unwrap();
    assert_eq!(completed, vec![2]);
    assert_eq!(queue.pending_and_failed_count().await, 0);
}
