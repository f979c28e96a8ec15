mod common;

use common::*;
use teachable_lib::error::SessionError;
use teachable_lib::ml::Hyperparameters;
use teachable_lib::resources::ResourceKind;

#[tokio::test]
async fn test_cat_dog_training_produces_probabilities() {
    let (workbench, events) = cat_dog_workbench();

    let summary = workbench
        .train(quick_hyperparameters())
        .await
        .unwrap()
        .expect("学習結果があるはず");
    assert_eq!(summary.epochs, 5);
    assert_eq!(summary.samples, 10);
    assert_eq!(summary.num_classes, 2);

    let prediction = workbench.predict_once(&cat_frame(7)).unwrap();
    assert_eq!(prediction.probabilities.len(), 2);
    let total: f32 = prediction.probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-5, "合計 {}", total);
    assert_eq!(prediction.entries[0].name, "cat");
    assert_eq!(prediction.entries[1].name, "dog");

    // エポックごとの進捗と完了通知
    let progress: Vec<_> = events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Recorded::Progress(epoch) => Some(epoch),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0, 1, 2, 3, 4]);
    assert_eq!(events.count(|e| matches!(e, Recorded::Finished(5))), 1);

    let ledger = workbench.ledger();
    assert_eq!(ledger.live(ResourceKind::Classifier), 1);
    assert_eq!(ledger.live(ResourceKind::Scratch), 0);
}

#[tokio::test]
async fn test_training_without_classes_fails_cleanly() {
    let (workbench, _events) = workbench();

    let err = workbench.train(quick_hyperparameters()).await.unwrap_err();
    assert!(matches!(err, SessionError::InsufficientClasses { found: 0 }));
    assert_eq!(workbench.ledger().total_live(), 0);
    assert!(!workbench.is_training());
}

#[tokio::test]
async fn test_training_without_samples_reports_no_data() {
    let (workbench, _events) = workbench();
    workbench.add_class("cat");
    workbench.add_class("dog");

    let err = workbench.train(quick_hyperparameters()).await.unwrap_err();
    assert!(matches!(err, SessionError::NoData));
    assert!(!workbench.is_training());
}

#[tokio::test]
async fn test_failed_training_keeps_previous_classifier() {
    let (workbench, _events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();
    let before = workbench.predict_once(&dog_frame(1)).unwrap();

    let broken = Hyperparameters {
        epochs: 0,
        ..quick_hyperparameters()
    };
    let err = workbench.train(broken).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidHyperparameters(_)));

    let after = workbench.predict_once(&dog_frame(1)).unwrap();
    assert_eq!(before.probabilities, after.probabilities);
    assert_eq!(workbench.ledger().live(ResourceKind::Classifier), 1);
    assert!(!workbench.is_training());
}

#[tokio::test]
async fn test_diverging_training_keeps_previous_classifier() {
    let (workbench, events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();
    let before = workbench.predict_once(&dog_frame(1)).unwrap();

    // 学習率が大きすぎて途中で損失が発散する
    let diverging = Hyperparameters {
        learning_rate: 1e30,
        ..quick_hyperparameters()
    };
    let err = workbench.train(diverging).await.unwrap_err();
    assert!(matches!(err, SessionError::Training(_)), "{:?}", err);

    let after = workbench.predict_once(&dog_frame(1)).unwrap();
    assert_eq!(before.probabilities, after.probabilities);
    let ledger = workbench.ledger();
    assert_eq!(ledger.live(ResourceKind::Classifier), 1);
    assert_eq!(ledger.live(ResourceKind::Scratch), 0);
    assert!(!workbench.is_training());
    assert_eq!(events.count(|e| matches!(e, Recorded::Finished(_))), 1);
}

#[tokio::test]
async fn test_retraining_replaces_classifier() {
    let (workbench, _events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();

    workbench.add_sample(0, &cat_frame(6)).unwrap();
    let summary = workbench
        .train(quick_hyperparameters())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.samples, 11);

    let ledger = workbench.ledger();
    assert_eq!(ledger.live(ResourceKind::Classifier), 1);
    assert_eq!(ledger.live(ResourceKind::Scratch), 0);
}

#[tokio::test]
async fn test_concurrent_training_is_ignored() {
    let (workbench, _events) = cat_dog_workbench();

    let (first, second) = tokio::join!(
        workbench.train(quick_hyperparameters()),
        workbench.train(quick_hyperparameters())
    );
    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_none());
    assert_eq!(workbench.ledger().live(ResourceKind::Classifier), 1);
}

#[tokio::test]
async fn test_samples_added_during_training_are_dropped() {
    let (workbench, _events) = cat_dog_workbench();
    let long = Hyperparameters {
        epochs: 20,
        ..quick_hyperparameters()
    };

    let (result, added) = tokio::join!(workbench.train(long), async {
        wait_until(|| workbench.is_training()).await;
        workbench.add_sample(0, &cat_frame(9)).unwrap()
    });
    assert!(result.unwrap().is_some());
    assert_eq!(added, None);
    assert_eq!(workbench.status().samples, 10);
}

#[tokio::test]
async fn test_reset_during_training_discards_result() {
    let (workbench, events) = cat_dog_workbench();
    let long = Hyperparameters {
        epochs: 5000,
        ..quick_hyperparameters()
    };

    let (result, _) = tokio::join!(workbench.train(long), async {
        wait_until(|| workbench.is_training()).await;
        workbench.reset().await;
    });
    assert!(result.unwrap().is_none());

    let status = workbench.status();
    assert!(!status.trained);
    assert!(!status.training);
    assert_eq!(workbench.ledger().total_live(), 0);
    assert_eq!(events.count(|e| matches!(e, Recorded::Finished(_))), 0);
}
