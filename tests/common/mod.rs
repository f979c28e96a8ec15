#![allow(dead_code)]

use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use teachable_lib::error::{Result, SessionError};
use teachable_lib::events::{Notice, NoticeLevel, SessionEvents};
use teachable_lib::extractor::{FeatureExtractor, PooledEmbedder};
use teachable_lib::ml::{EpochReport, Hyperparameters, TrainingSummary};
use teachable_lib::model::{AppConfig, DeviceType};
use teachable_lib::prediction::Prediction;
use teachable_lib::session::ClassLabel;
use teachable_lib::video::{FrameSource, ImageSequence};
use teachable_lib::workbench::Workbench;

pub type TestBackend = NdArray<f32>;

/// 記録されたイベント
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Classes { len: usize, ready: bool },
    Sample { class_id: usize, count: usize },
    Stopped(usize),
    Progress(usize),
    Finished(usize),
    Prediction(usize),
    Notice(NoticeLevel, String),
}

#[derive(Default)]
pub struct RecordingEvents {
    log: Mutex<Vec<Recorded>>,
}

impl RecordingEvents {
    fn push(&self, event: Recorded) {
        self.log.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Notice(level, message) => Some((level, message)),
                _ => None,
            })
            .collect()
    }
}

impl SessionEvents for RecordingEvents {
    fn classes_changed(&self, classes: &[ClassLabel], ready: bool) {
        self.push(Recorded::Classes {
            len: classes.len(),
            ready,
        });
    }

    fn sample_added(&self, class_id: usize, count: usize) {
        self.push(Recorded::Sample { class_id, count });
    }

    fn collection_stopped(&self, class_id: usize) {
        self.push(Recorded::Stopped(class_id));
    }

    fn training_progress(&self, report: &EpochReport) {
        self.push(Recorded::Progress(report.epoch));
    }

    fn training_finished(&self, summary: &TrainingSummary) {
        self.push(Recorded::Finished(summary.epochs));
    }

    fn prediction(&self, prediction: &Prediction) {
        self.push(Recorded::Prediction(prediction.winner));
    }

    fn notice(&self, notice: &Notice) {
        self.push(Recorded::Notice(notice.level, notice.message.clone()));
    }
}

/// 常に失敗するカメラ
pub struct BrokenCamera;

impl FrameSource for BrokenCamera {
    fn capture(&self) -> Result<RgbImage> {
        Err(SessionError::Capture("カメラが切断されました".to_string()))
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }
}

/// 小さな画像・短い周期の設定
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.device_type = DeviceType::Cpu;
    config.collection.sample_interval_ms = 5;
    config.inference.frames_per_second = 200;
    config.extractor.image_size = 8;
    config.extractor.grid = 2;
    config.training.seed = 7;
    config
}

pub fn workbench() -> (Workbench<TestBackend>, Arc<RecordingEvents>) {
    workbench_with(test_config())
}

/// 設定の抽出器サイズに合わせたワークベンチ
pub fn workbench_with(config: AppConfig) -> (Workbench<TestBackend>, Arc<RecordingEvents>) {
    let events = Arc::new(RecordingEvents::default());
    let extractor: Arc<dyn FeatureExtractor> = Arc::new(
        PooledEmbedder::new(config.extractor.image_size, config.extractor.grid).unwrap(),
    );
    let workbench = Workbench::new(Default::default(), extractor, events.clone(), config);
    (workbench, events)
}

pub fn solid(r: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([r, g, b]))
}

/// 赤系の画像（i ごとに少しずつ違う）
pub fn cat_frame(i: u8) -> RgbImage {
    solid(200 + i * 5, 30 + i * 3, 20)
}

/// 青系の画像
pub fn dog_frame(i: u8) -> RgbImage {
    solid(20, 40 + i * 3, 200 + i * 5)
}

pub fn sequence(frames: Vec<RgbImage>) -> Arc<dyn FrameSource> {
    Arc::new(ImageSequence::new(frames).unwrap())
}

/// cat / dog を5枚ずつ登録したワークベンチ
pub fn cat_dog_workbench() -> (Workbench<TestBackend>, Arc<RecordingEvents>) {
    let (workbench, events) = workbench();
    assert_eq!(workbench.add_class("cat"), Some(0));
    assert_eq!(workbench.add_class("dog"), Some(1));
    for i in 0..5 {
        workbench.add_sample(0, &cat_frame(i)).unwrap();
        workbench.add_sample(1, &dog_frame(i)).unwrap();
    }
    (workbench, events)
}

pub fn quick_hyperparameters() -> Hyperparameters {
    Hyperparameters {
        epochs: 5,
        learning_rate: 0.01,
        batch_size: 4,
    }
}

/// 条件が満たされるまで待つ（最大5秒）
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "条件が満たされないままタイムアウトしました"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
