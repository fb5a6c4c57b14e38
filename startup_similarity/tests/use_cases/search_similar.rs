use std::time::Duration;

use startup_similarity::{
    domain::entities::dataset_record::{DatasetRecord, Payload, StableKey},
    use_cases::search_similar::SearchError,
};

use crate::helpers::{
    acme_and_zento, fake_records, spawn_app, test_app, FakeEmbeddingProvider, DIMENSION,
};

#[tokio::test]
async fn the_closest_startup_of_an_idea_comes_first() {
    // Arrange
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    // Act
    let results = app
        .similarity_search
        .search("enterprise analytics platform", 1)
        .await
        .unwrap();

    // Assert
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, StableKey::from_name("Acme"));
    assert_eq!(results[0].name(), Some("Acme"));
    // One shared word out of three on each side
    assert!((results[0].score - 1.0 / 3.0).abs() < 1e-5);
}

#[tokio::test]
async fn results_are_capped_ranked_and_bounded() {
    let app = spawn_app();
    let records = fake_records(20);
    app.sync_orchestrator.sync(&records, false).await.unwrap();

    let results = app
        .similarity_search
        .search(records[3].description(), 5)
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results[0].id, records[3].key());
    assert!((results[0].score - 1.0).abs() < 1e-5);
    for pair in results.windows(2) {
        assert!(
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].id < pair[1].id)
        );
    }
    assert!(results
        .iter()
        .all(|result| (-1.0..=1.0).contains(&result.score)));
}

#[tokio::test]
async fn equal_scores_are_ordered_by_key() {
    let app = spawn_app();
    let records = vec![
        DatasetRecord::new("Twin One", "drone delivery", Payload::new()),
        DatasetRecord::new("Twin Two", "drone delivery", Payload::new()),
        DatasetRecord::new("Twin Three", "drone delivery", Payload::new()),
    ];
    app.sync_orchestrator.sync(&records, false).await.unwrap();

    let results = app
        .similarity_search
        .search("drone delivery", 3)
        .await
        .unwrap();

    let mut expected: Vec<StableKey> = records.iter().map(|record| record.key()).collect();
    expected.sort();
    let ids: Vec<StableKey> = results.iter().map(|result| result.id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn a_top_k_larger_than_the_index_returns_every_entry() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    let results = app.similarity_search.search("fintech", 10).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].name(), Some("Zento"));
}

#[tokio::test]
async fn results_carry_the_dataset_fields_without_bookkeeping() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    let results = app.similarity_search.search("analytics", 1).await.unwrap();

    let payload = &results[0].payload;
    assert_eq!(
        payload.get("industry").and_then(|v| v.as_text()),
        Some("Software")
    );
    assert_eq!(
        payload.get("valuation_b").and_then(|v| v.as_number()),
        Some(2.5)
    );
    assert!(payload.keys().all(|key| !key.starts_with('_')));
}

#[tokio::test]
async fn a_zero_top_k_returns_nothing_without_embedding() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();
    let calls_after_sync = app.provider.calls();

    let results = app.similarity_search.search("analytics", 0).await.unwrap();

    assert!(results.is_empty());
    assert_eq!(app.provider.calls(), calls_after_sync);
}

#[tokio::test]
async fn search_before_any_sync_is_unavailable() {
    let app = spawn_app();

    let result = app.similarity_search.search("analytics", 3).await;

    assert!(matches!(result, Err(SearchError::Unavailable(_))));
}

#[tokio::test]
async fn an_unreachable_store_makes_search_unavailable() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();
    app.store.set_reachable(false);

    let result = app.similarity_search.search("analytics", 3).await;

    assert!(matches!(result, Err(SearchError::Unavailable(_))));
}

#[tokio::test]
async fn an_index_of_another_dimension_is_rejected() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    let result = app
        .search_with(FakeEmbeddingProvider::new(64))
        .search("analytics", 3)
        .await;

    assert!(matches!(
        result,
        Err(SearchError::DimensionMismatch {
            expected: 64,
            found: DIMENSION
        })
    ));
}

#[tokio::test]
async fn an_index_built_by_another_provider_is_rejected() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    let result = app
        .search_with(FakeEmbeddingProvider::new(DIMENSION).with_identifier("remote:other-model"))
        .search("analytics", 3)
        .await;

    assert!(matches!(result, Err(SearchError::ProviderMismatch { .. })));
}

#[tokio::test]
async fn a_failing_embedding_fails_the_search() {
    let app = test_app()
        .provider(FakeEmbeddingProvider::new(DIMENSION).failing_on("blocked"))
        .spawn();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    let result = app.similarity_search.search("blocked idea", 3).await;

    assert!(matches!(result, Err(SearchError::Embedding(_))));
}

#[tokio::test]
async fn a_slow_search_times_out_as_unavailable() {
    let app = test_app()
        .provider(FakeEmbeddingProvider::new(DIMENSION).with_delay(Duration::from_millis(200)))
        .search_timeout(Duration::from_millis(50))
        .spawn();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    let result = app.similarity_search.search("analytics", 3).await;

    assert!(matches!(result, Err(SearchError::Unavailable(_))));
}
