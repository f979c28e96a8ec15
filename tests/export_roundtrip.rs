mod common;

use common::*;
use teachable_lib::error::SessionError;
use teachable_lib::extractor::{FeatureExtractor, PooledEmbedder};
use teachable_lib::model::{ViewerModel, BUNDLE_ENTRIES};

#[tokio::test]
async fn test_exported_bundle_matches_in_app_predictions() {
    let (workbench, _events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();

    let bytes = workbench.bundle_bytes().unwrap();
    let viewer = ViewerModel::from_bundle(&bytes).unwrap();

    assert_eq!(viewer.entries, BUNDLE_ENTRIES);
    assert_eq!(viewer.metadata.classes, vec!["cat", "dog"]);
    assert_eq!(viewer.metadata.image_size, 8);
    let extractor = viewer.metadata.extractor.as_ref().unwrap();
    assert_eq!(extractor.kind, "pooled");
    assert_eq!(extractor.grid, Some(2));
    assert_eq!(viewer.input_dim(), workbench.extractor().embedding_dim());
    assert_eq!(viewer.artifacts.format, "layers-model");

    for frame in [cat_frame(0), cat_frame(3), dog_frame(1), dog_frame(4)] {
        let feature = workbench.extractor().extract(&frame).unwrap();
        let in_app = workbench.state().lock().predict(&feature).unwrap();
        let exported = viewer.predict(&feature).unwrap();

        assert_eq!(exported.len(), 2);
        for (a, b) in in_app.probabilities.iter().zip(&exported) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}

#[tokio::test]
async fn test_metadata_image_size_follows_extractor() {
    let mut config = test_config();
    config.extractor.image_size = 16;
    let (workbench, _events) = workbench_with(config);
    workbench.add_class("cat");
    workbench.add_class("dog");
    for i in 0..5 {
        workbench.add_sample(0, &cat_frame(i)).unwrap();
        workbench.add_sample(1, &dog_frame(i)).unwrap();
    }
    workbench.train(quick_hyperparameters()).await.unwrap();

    let viewer = ViewerModel::from_bundle(&workbench.bundle_bytes().unwrap()).unwrap();
    assert_eq!(viewer.metadata.image_size, 16);

    // ブラウザ側と同じく metadata の値で特徴を作り直す
    let grid = viewer.metadata.extractor.as_ref().unwrap().grid.unwrap();
    let rebuilt = PooledEmbedder::new(viewer.metadata.image_size, grid).unwrap();
    for frame in [cat_frame(7), dog_frame(7)] {
        let in_app = workbench.extractor().extract(&frame).unwrap();
        let from_metadata = rebuilt.extract(&frame).unwrap();
        assert_eq!(in_app, from_metadata);

        let expected = workbench.state().lock().predict(&in_app).unwrap();
        let exported = viewer.predict(&from_metadata).unwrap();
        for (a, b) in expected.probabilities.iter().zip(&exported) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}

#[tokio::test]
async fn test_export_uses_classes_at_training_time() {
    let (workbench, _events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();
    workbench.add_class("bird");

    let viewer = ViewerModel::from_bundle(&workbench.bundle_bytes().unwrap()).unwrap();
    assert_eq!(viewer.metadata.classes, vec!["cat", "dog"]);
}

#[tokio::test]
async fn test_export_into_directory_uses_default_name() {
    let (workbench, _events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let written = workbench.export_bundle(dir.path()).unwrap();
    assert_eq!(written.parent(), Some(dir.path()));
    let name = written.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("teachable-model-"));
    assert!(name.ends_with(".zip"));

    let bytes = std::fs::read(&written).unwrap();
    assert!(ViewerModel::from_bundle(&bytes).is_ok());
}

#[tokio::test]
async fn test_export_to_nested_file_creates_parents() {
    let (workbench, _events) = cat_dog_workbench();
    workbench.train(quick_hyperparameters()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out").join("model.zip");

    let written = workbench.export_bundle(&target).unwrap();
    assert_eq!(written, target);
    assert!(target.is_file());
}

#[tokio::test]
async fn test_export_before_training_fails() {
    let (workbench, _events) = cat_dog_workbench();
    let dir = tempfile::tempdir().unwrap();

    let err = workbench.export_bundle(dir.path()).unwrap_err();
    assert!(matches!(err, SessionError::NotTrained));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
