use std::sync::Arc;

use startup_similarity::{
    configuration::get_configuration,
    domain::services::dataset_loader::load_dataset,
    repositories::index_entry_memory_repository::InMemoryVectorIndexStore,
    startup::Application,
};

use crate::helpers::{acme_and_zento, spawn_app};

#[tokio::test]
async fn analysis_lists_similar_startups_when_the_index_answers() {
    // Arrange
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();

    // Act
    let analysis = app
        .idea_analyzer
        .analyze("enterprise analytics platform")
        .await;

    // Assert
    let similar = analysis.similar.expect("similar startups");
    assert_eq!(similar.len(), 2);
    assert_eq!(similar[0].label, "Acme (Software • France • $2.5B)");
    assert!(similar[0].similarity > similar[1].similarity);
    assert!(similar
        .iter()
        .all(|startup| (0.0..=1.0).contains(&startup.similarity)));
}

#[tokio::test]
async fn analysis_is_returned_without_similar_startups_when_the_index_is_down() {
    let app = spawn_app();
    app.sync_orchestrator
        .sync(&acme_and_zento(), false)
        .await
        .unwrap();
    app.store.set_reachable(false);

    let analysis = app.idea_analyzer.analyze("drone delivery").await;

    assert!(analysis.similar.is_none());
    assert!(analysis.summary.contains("drone delivery"));
    assert!(!analysis.competitors.is_empty());
    assert!(analysis.score.value <= 100);
}

#[tokio::test]
async fn analysis_before_any_sync_has_no_similar_startups() {
    let app = spawn_app();

    let analysis = app.idea_analyzer.analyze("drone delivery").await;

    assert!(analysis.similar.is_none());
}

#[tokio::test]
async fn application_built_from_the_local_configuration_serves_the_sample_dataset() {
    // Local configuration selects the mock provider
    let settings = get_configuration().expect("Failed to read configuration.");
    let dataset = load_dataset(&settings.dataset.path).expect("Failed to load sample dataset");
    let application =
        Application::build_with_store(settings, Arc::new(InMemoryVectorIndexStore::new()))
            .expect("Failed to build application");

    let report = application
        .sync_orchestrator()
        .sync(&dataset.records, false)
        .await
        .unwrap();
    let analysis = application
        .idea_analyzer()
        .analyze("B2B SaaS analytics for finance teams")
        .await;

    assert_eq!(report.upserted, dataset.records.len());
    let similar = analysis.similar.expect("similar startups");
    assert!(similar[0].label.starts_with("Acme"));
}
