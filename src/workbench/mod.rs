//! アプリケーション状態
//!
//! セッション・特徴抽出器・カメラ・イベント通知と、収集／学習／推論の
//! 3つのコントローラをまとめたオブジェクトです。

pub mod collector;
pub mod predictor;
pub mod schedule;
pub mod trainer;

pub use collector::CollectionController;
pub use predictor::InferenceLoop;
pub use schedule::{LoopRuntime, LoopToken};
pub use trainer::TrainingOrchestrator;

use burn::tensor::backend::Backend;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::events::SessionEvents;
use crate::extractor::FeatureExtractor;
use crate::ml::{Hyperparameters, TrainingSummary};
use crate::model::bundle::{build_bundle, default_bundle_name, write_bundle};
use crate::model::topology::{BundleMetadata, ExtractorDescriptor};
use crate::model::{AppConfig, ExtractorKind};
use crate::prediction::Prediction;
use crate::resources::ResourceLedger;
use crate::session::{ClassLabel, Session, SessionState};
use crate::video::FrameSource;

/// ループに渡す共有オブジェクト
pub struct LoopContext<B: Backend> {
    pub state: Arc<SessionState<B>>,
    pub source: Arc<dyn FrameSource>,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub events: Arc<dyn SessionEvents>,
}

impl<B: Backend> Clone for LoopContext<B> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            source: self.source.clone(),
            extractor: self.extractor.clone(),
            events: self.events.clone(),
        }
    }
}

/// フレームを1枚取得して特徴ベクトルにする（ブロッキングスレッドで実行）
pub(crate) async fn capture_feature<B: Backend>(context: &LoopContext<B>) -> Result<Vec<f32>> {
    let source = context.source.clone();
    let extractor = context.extractor.clone();
    tokio::task::spawn_blocking(move || {
        let frame = source.capture()?;
        extractor.extract(&frame)
    })
    .await
    .map_err(|e| SessionError::Capture(format!("取得タスクが異常終了しました: {}", e)))?
}

/// 画面表示用の状態
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub classes: Vec<ClassLabel>,
    pub ready: bool,
    pub samples: usize,
    pub embedding_dim: Option<usize>,
    pub trained: bool,
    pub training: bool,
    pub collecting: Option<usize>,
    pub predicting: bool,
    pub camera: Option<String>,
    pub extractor: String,
}

/// アプリケーション状態
pub struct Workbench<B: Backend> {
    state: Arc<SessionState<B>>,
    extractor: Arc<dyn FeatureExtractor>,
    camera: Mutex<Option<Arc<dyn FrameSource>>>,
    events: Arc<dyn SessionEvents>,
    collector: CollectionController,
    trainer: TrainingOrchestrator,
    predictor: InferenceLoop,
    config: AppConfig,
    runtime: LoopRuntime,
}

impl<B: Backend> Workbench<B> {
    pub fn new(
        device: B::Device,
        extractor: Arc<dyn FeatureExtractor>,
        events: Arc<dyn SessionEvents>,
        config: AppConfig,
    ) -> Self {
        Self::with_ledger(device, extractor, events, config, ResourceLedger::new())
    }

    pub fn with_ledger(
        device: B::Device,
        extractor: Arc<dyn FeatureExtractor>,
        events: Arc<dyn SessionEvents>,
        config: AppConfig,
        ledger: ResourceLedger,
    ) -> Self {
        Self {
            state: Arc::new(SessionState::new(Session::with_ledger(device, ledger))),
            extractor,
            camera: Mutex::new(None),
            events,
            collector: CollectionController::new(config.collection.interval()),
            trainer: TrainingOrchestrator::new(config.training.seed),
            predictor: InferenceLoop::new(config.inference.period()),
            config,
            runtime: LoopRuntime::new(),
        }
    }

    pub fn state(&self) -> &Arc<SessionState<B>> {
        &self.state
    }

    pub fn ledger(&self) -> ResourceLedger {
        self.state.lock().ledger().clone()
    }

    pub fn extractor(&self) -> &Arc<dyn FeatureExtractor> {
        &self.extractor
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn camera_slot(&self) -> MutexGuard<'_, Option<Arc<dyn FrameSource>>> {
        self.camera.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loop_context(&self) -> Result<LoopContext<B>> {
        let source = self.camera_slot().clone().ok_or(SessionError::CameraNotReady)?;
        Ok(LoopContext {
            state: self.state.clone(),
            source,
            extractor: self.extractor.clone(),
            events: self.events.clone(),
        })
    }

    fn notify_classes(&self) {
        let (classes, ready) = {
            let session = self.state.lock();
            (session.registry().classes().to_vec(), session.is_ready())
        };
        self.events.classes_changed(&classes, ready);
    }

    /// クラスを追加（空白のみの名前は無視）
    pub fn add_class(&self, name: &str) -> Option<usize> {
        let id = self.state.lock().add_class(name)?;
        self.notify_classes();
        Some(id)
    }

    pub fn classes(&self) -> Vec<ClassLabel> {
        self.state.lock().registry().classes().to_vec()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().is_ready()
    }

    /// カメラを接続
    pub fn attach_camera(&self, source: Arc<dyn FrameSource>) {
        info!(source = %source.describe(), "カメラを接続しました");
        *self.camera_slot() = Some(source);
    }

    /// 収集と推論を止めてからカメラを切り離す
    pub async fn detach_camera(&self) {
        self.stop_collecting().await;
        self.predictor.stop().await;
        if self.camera_slot().take().is_some() {
            info!("カメラを切り離しました");
        }
    }

    pub fn has_camera(&self) -> bool {
        self.camera_slot().is_some()
    }

    /// 指定クラスの収集を開始
    ///
    /// 学習中は何もせず `Ok(())` を返します。Tokioランタイムの外から
    /// 呼ばれた場合はループ用のランタイムで動かします。
    pub fn start_collecting(&self, class_id: usize) -> Result<()> {
        let context = self.loop_context()?;
        self.state.lock().registry().ensure_valid(class_id)?;
        if self.state.is_training() {
            debug!(class_id, "学習中のため収集を開始しません");
            return Ok(());
        }
        let runtime = self.runtime.handle()?;
        self.collector.start(class_id, context, &runtime);
        Ok(())
    }

    /// 収集を停止（何度呼んでも安全）
    pub async fn stop_collecting(&self) -> Option<usize> {
        let stopped = self.collector.stop().await;
        if let Some(class_id) = stopped {
            self.events.collection_stopped(class_id);
        }
        stopped
    }

    pub fn collecting_class(&self) -> Option<usize> {
        self.collector.active_class()
    }

    /// 静止画1枚をサンプルとして追加
    ///
    /// 学習中は追加せず `Ok(None)` を返します。
    pub fn add_sample(&self, class_id: usize, frame: &RgbImage) -> Result<Option<usize>> {
        let feature = self.extractor.extract(frame)?;
        let count = {
            let mut session = self.state.lock();
            if self.state.is_training() {
                return Ok(None);
            }
            session.append_sample(class_id, &feature)?
        };
        self.events.sample_added(class_id, count);
        Ok(Some(count))
    }

    /// 学習を実行
    ///
    /// 収集中であれば先に収集を終了します。既に学習中なら `Ok(None)`。
    pub async fn train(&self, hyperparameters: Hyperparameters) -> Result<Option<TrainingSummary>> {
        if self.state.is_training() {
            info!("既に学習中のため要求を無視しました");
            return Ok(None);
        }
        self.stop_collecting().await;
        self.trainer
            .train(&self.state, hyperparameters, &self.events)
            .await
    }

    pub fn is_training(&self) -> bool {
        self.state.is_training()
    }

    /// 推論を開始。既に動いていれば `Ok(false)`
    pub fn start_prediction(&self) -> Result<bool> {
        if self.state.lock().classifier().is_none() {
            return Err(SessionError::NotTrained);
        }
        let context = self.loop_context()?;
        let runtime = self.runtime.handle()?;
        Ok(self.predictor.start(context, &runtime))
    }

    pub async fn stop_prediction(&self) -> bool {
        self.predictor.stop().await
    }

    /// 推論の開始／停止を切り替え、切り替え後に動いているかを返す
    pub async fn toggle_prediction(&self) -> Result<bool> {
        if self.predictor.is_running() {
            self.predictor.stop().await;
            Ok(false)
        } else {
            self.start_prediction()?;
            Ok(true)
        }
    }

    pub fn is_predicting(&self) -> bool {
        self.predictor.is_running()
    }

    /// 画像1枚を分類
    pub fn predict_once(&self, frame: &RgbImage) -> Result<Prediction> {
        let feature = self.extractor.extract(frame)?;
        self.state.lock().predict(&feature)
    }

    /// 現在のカメラから1枚取得
    pub fn capture_frame(&self) -> Result<RgbImage> {
        let source = self.camera_slot().clone().ok_or(SessionError::CameraNotReady)?;
        source.capture()
    }

    fn bundle_metadata(&self, classes: Vec<String>) -> BundleMetadata {
        let metadata = BundleMetadata::new(classes, self.config.extractor.image_size);
        match self.config.extractor.kind {
            ExtractorKind::Pooled => metadata.with_extractor(ExtractorDescriptor {
                kind: "pooled".to_string(),
                grid: Some(self.config.extractor.grid),
            }),
            ExtractorKind::Conv => metadata.with_extractor(ExtractorDescriptor {
                kind: "conv".to_string(),
                grid: None,
            }),
        }
    }

    /// エクスポート用zipをメモリ上に作る
    pub fn bundle_bytes(&self) -> Result<Vec<u8>> {
        let session = self.state.lock();
        let classifier = session.classifier().ok_or(SessionError::NotTrained)?;
        let metadata = self.bundle_metadata(session.trained_classes().to_vec());
        build_bundle(classifier, &metadata)
    }

    /// エクスポート用zipを書き出す
    ///
    /// `path` がディレクトリなら既定のファイル名で保存します。
    pub fn export_bundle(&self, path: &Path) -> Result<PathBuf> {
        let bytes = self.bundle_bytes()?;
        let target = if path.is_dir() {
            path.join(default_bundle_name())
        } else {
            path.to_path_buf()
        };
        write_bundle(&target, &bytes)?;
        Ok(target)
    }

    /// 全状態を破棄
    pub async fn reset(&self) {
        self.trainer.abort();
        self.stop_collecting().await;
        self.predictor.stop().await;
        self.state.lock().reset();
        self.notify_classes();
    }

    pub fn status(&self) -> SessionStatus {
        let session = self.state.lock();
        SessionStatus {
            classes: session.registry().classes().to_vec(),
            ready: session.is_ready(),
            samples: session.store().len(),
            embedding_dim: session.store().dim(),
            trained: session.classifier().is_some(),
            training: self.state.is_training(),
            collecting: self.collector.active_class(),
            predicting: self.predictor.is_running(),
            camera: self.camera_slot().as_ref().map(|source| source.describe()),
            extractor: self.extractor.name().to_string(),
        }
    }
}
