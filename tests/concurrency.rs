//! Concurrent capture against one manager

use local_learner::learning::Details;
use local_learner::{LearnerConfig, LearningManager, NaiveBayesEngine};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LearnerConfig::with_data_dir(dir.path());
    config.debounce_delay_ms = 60_000;
    let manager = LearningManager::start(config, Arc::new(NaiveBayesEngine::new())).unwrap();
    manager.set_learning_enabled(true);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let manager = manager.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            for i in 0..25 {
                let id = manager
                    .record_interaction(&format!("worker {worker} message {i}"), "ok", "chat", 0.5)
                    .unwrap();
                manager.record_behavior("open", "Home", 0.1, Details::new());
                manager.record_usage("chat", 1.0, vec![], i % 2 == 0);
                manager.record_feedback(&id, 3, None);
                let _ = manager.statistics();
            }
        }));
    }

    let all = join_all(tasks);
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("no deadlock");

    assert!(manager.flush());
    let stats = manager.statistics();
    assert_eq!(stats.total_interactions, 200);
    assert_eq!(stats.interactions_with_feedback, 200);
    assert_eq!(stats.behavior_count, 200);
    assert_eq!(stats.pattern_count, 200);

    let on_disk: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(dir.path().join("interactions.json")).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 200);
}

async fn join_all(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        task.await.unwrap();
    }
}
