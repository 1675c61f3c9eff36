//! Read-Through Tests
//!
//! A fresh engine over a populated store starts with a cold cache. These tests
//! cover both cold-cache modes: reading as empty (default) and rebuilding entries
//! from the store's membership relationships.

#[cfg(test)]
mod read_through_tests {
    use sequence_core::db::{GraphStore, InMemoryGraphStore, NoopEventSink};
    use sequence_core::models::NodeSpec;
    use sequence_core::{InMemoryMembershipCache, SequenceConfig, SequenceEngine, SequenceError};
    use std::sync::Arc;
    use tokio::time::Duration;
    use tokio_test::assert_err;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn read_through_engine(store: Arc<InMemoryGraphStore>) -> SequenceEngine {
        SequenceEngine::with_components(
            store,
            Arc::new(InMemoryMembershipCache::new()),
            Arc::new(NoopEventSink),
            SequenceConfig {
                read_through_on_miss: true,
                ..Default::default()
            },
        )
        .unwrap()
    }

    /// Persist a sequence through one engine and return its id
    async fn persisted_sequence(store: &Arc<InMemoryGraphStore>, members: &[&str]) -> String {
        for id in ["m1", "m2", "m3", "m4"] {
            store.insert_node("g1", id, NodeSpec::new("concept")).await;
        }
        let engine = SequenceEngine::new(store.clone());
        let id = engine.create("g1", ids(members)).await.unwrap();
        engine.wait_for_background_writes().await;
        id
    }

    #[tokio::test]
    async fn test_cold_cache_reads_empty_by_default() {
        let store = Arc::new(InMemoryGraphStore::new());
        let c1 = persisted_sequence(&store, &["m1", "m2"]).await;

        let cold = SequenceEngine::new(store);
        assert!(cold.get_members("g1", &c1).await.unwrap().is_empty());
        assert_err!(cold.add_member("g1", &c1, "m3").await);
    }

    #[tokio::test]
    async fn test_read_through_rebuilds_entry() {
        let store = Arc::new(InMemoryGraphStore::new());
        let c1 = persisted_sequence(&store, &["m1", "m2", "m3"]).await;

        let engine = read_through_engine(store);
        assert_eq!(engine.get_members("g1", &c1).await.unwrap(), ids(&["m1", "m2", "m3"]));
        assert_eq!(engine.index_of("g1", &c1, "m3").await.unwrap(), Some(2));

        // New members continue past the highest persisted index
        assert_eq!(engine.add_member("g1", &c1, "m4").await.unwrap(), 3);
        assert_eq!(engine.cache_stats().await.sequences, 1);
    }

    #[tokio::test]
    async fn test_read_through_restores_empty_sequence() {
        let store = Arc::new(InMemoryGraphStore::new());
        let c1 = persisted_sequence(&store, &[]).await;

        let engine = read_through_engine(store);
        assert_eq!(engine.add_member("g1", &c1, "m1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_through_ignores_unknown_sequence() {
        let store = Arc::new(InMemoryGraphStore::new());
        let engine = read_through_engine(store);

        assert!(engine.get_members("g1", "nope").await.unwrap().is_empty());
        assert_err!(engine.add_member("g1", "nope", "m1").await);
        assert_eq!(engine.cache_stats().await.sequences, 0);
    }

    #[tokio::test]
    async fn test_deleted_sequence_is_not_read_back() {
        let store = Arc::new(InMemoryGraphStore::new());
        let c1 = persisted_sequence(&store, &["m1", "m2"]).await;

        let engine = read_through_engine(store);
        assert_eq!(engine.get_cardinality("g1", &c1).await.unwrap(), 2);

        engine.delete("g1", &c1).await.unwrap();
        // Checked before the store deletion has necessarily landed
        assert!(engine.get_members("g1", &c1).await.unwrap().is_empty());

        engine.wait_for_background_writes().await;
        assert!(engine.get_members("g1", &c1).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_during_load_is_not_undone() {
        let store = Arc::new(InMemoryGraphStore::with_latency(Duration::from_millis(50)));
        let c1 = persisted_sequence(&store, &["m1", "m2"]).await;
        let engine = Arc::new(read_through_engine(store.clone()));

        // Start a cold load, then delete while its store read is still pending
        let loader = {
            let engine = Arc::clone(&engine);
            let c1 = c1.clone();
            tokio::spawn(async move { engine.get_members("g1", &c1).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.delete("g1", &c1).await.unwrap();

        loader.await.unwrap().unwrap();
        engine.wait_for_background_writes().await;

        assert!(engine.get_members("g1", &c1).await.unwrap().is_empty());
        assert_eq!(engine.get_cardinality("g1", &c1).await.unwrap(), 0);
        assert!(!engine.is_member("g1", &c1, "m1").await.unwrap());
        assert_err!(engine.add_member("g1", &c1, "m3").await);
        assert_eq!(engine.cache_stats().await.sequences, 0);
        assert!(!store.node_exists("g1", &c1).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_through_store_outage_is_reported() {
        let store = Arc::new(InMemoryGraphStore::new());
        let c1 = persisted_sequence(&store, &["m1"]).await;

        let engine = read_through_engine(store.clone());
        store.set_available(false);

        let err = assert_err!(engine.get_members("g1", &c1).await);
        assert!(matches!(err, SequenceError::StoreUnavailable { .. }));
    }
}
