//! デスクトップ版のTauriコマンド

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tauri::ipc::Channel;
use tauri::{AppHandle, Emitter, State};
use tracing::{error, info, warn};

use burn::backend::Wgpu;
use burn_wgpu::WgpuDevice;
use burn_ndarray::{NdArray, NdArrayDevice};

use crate::events::{Notice, SessionEvents};
use crate::extractor::load_extractor;
use crate::ml::{EpochReport, Hyperparameters, TrainingSummary};
use crate::model::{AppConfig, DeviceType};
use crate::prediction::Prediction;
use crate::session::ClassLabel;
use crate::video::{encode_preview, GstCamera};
use crate::workbench::{SessionStatus, Workbench};

/// 計算デバイスごとのワークベンチ
pub enum Bench {
    Gpu(Workbench<Wgpu>),
    Cpu(Workbench<NdArray<f32>>),
}

macro_rules! with_bench {
    ($bench:expr, $w:ident => $body:expr) => {
        match $bench {
            Bench::Gpu($w) => $body,
            Bench::Cpu($w) => $body,
        }
    };
}

/// Tauriのイベントへ転送する受け口
pub struct TauriEvents {
    app: AppHandle,
    progress: Mutex<Option<Channel<EpochReport>>>,
}

impl TauriEvents {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            progress: Mutex::new(None),
        }
    }

    fn set_progress(&self, channel: Option<Channel<EpochReport>>) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = channel;
    }

    fn emit<S: Serialize + Clone>(&self, event: &str, payload: S) {
        if let Err(e) = self.app.emit(event, payload) {
            warn!(event, "イベントの送信に失敗しました: {}", e);
        }
    }
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassesChanged {
    classes: Vec<ClassLabel>,
    ready: bool,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SampleAdded {
    class_id: usize,
    count: usize,
}

impl SessionEvents for TauriEvents {
    fn classes_changed(&self, classes: &[ClassLabel], ready: bool) {
        self.emit(
            "classes-changed",
            ClassesChanged {
                classes: classes.to_vec(),
                ready,
            },
        );
    }

    fn sample_added(&self, class_id: usize, count: usize) {
        self.emit("sample-added", SampleAdded { class_id, count });
    }

    fn collection_stopped(&self, class_id: usize) {
        self.emit("collection-stopped", class_id);
    }

    fn training_progress(&self, report: &EpochReport) {
        let guard = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = guard.as_ref() {
            if let Err(e) = channel.send(report.clone()) {
                warn!("進捗の送信に失敗しました: {}", e);
            }
        }
    }

    fn training_finished(&self, summary: &TrainingSummary) {
        self.emit("training-finished", summary.clone());
    }

    fn prediction(&self, prediction: &Prediction) {
        self.emit("prediction", prediction.clone());
    }

    fn notice(&self, notice: &Notice) {
        self.emit("notice", notice.clone());
    }
}

/// アプリケーション状態
pub struct AppState {
    /// 抽出器の読み込みに失敗した場合はそのエラー
    bench: Result<Bench, String>,
    events: Arc<TauriEvents>,
    config: Mutex<AppConfig>,
    config_path: PathBuf,
}

impl AppState {
    /// 設定に従ってワークベンチを作る
    pub fn new(app: AppHandle, config: AppConfig, config_path: PathBuf) -> Self {
        let events = Arc::new(TauriEvents::new(app));
        let bench = build_bench(&config, events.clone()).map_err(|e| {
            error!("特徴抽出器の読み込みに失敗しました: {}", e);
            e
        });
        if let Err(message) = &bench {
            events.notice(&Notice::error(message.clone()));
        }

        Self {
            bench,
            events,
            config: Mutex::new(config),
            config_path,
        }
    }

    fn bench(&self) -> Result<&Bench, String> {
        self.bench.as_ref().map_err(|e| e.clone())
    }

    fn config(&self) -> AppConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn build_bench(config: &AppConfig, events: Arc<TauriEvents>) -> Result<Bench, String> {
    let events: Arc<dyn SessionEvents> = events;
    match config.device_type {
        DeviceType::Wgpu => {
            let device = WgpuDevice::default();
            let extractor =
                load_extractor::<Wgpu>(&config.extractor, &device).map_err(|e| e.to_string())?;
            Ok(Bench::Gpu(Workbench::new(device, extractor, events, config.clone())))
        }
        DeviceType::Cpu => {
            let device = NdArrayDevice::default();
            let extractor = load_extractor::<NdArray<f32>>(&config.extractor, &device)
                .map_err(|e| e.to_string())?;
            Ok(Bench::Cpu(Workbench::new(device, extractor, events, config.clone())))
        }
    }
}

/// 画面表示用の状態
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopStatus {
    session: Option<SessionStatus>,
    extractor_error: Option<String>,
    device: String,
}

#[tauri::command]
pub fn session_status(state: State<'_, AppState>) -> DesktopStatus {
    DesktopStatus {
        session: state.bench.as_ref().ok().map(|bench| with_bench!(bench, w => w.status())),
        extractor_error: state.bench.as_ref().err().cloned(),
        device: state.config().device_type.to_string(),
    }
}

#[tauri::command]
pub fn add_class(name: String, state: State<'_, AppState>) -> Result<Option<usize>, String> {
    let bench = state.bench()?;
    Ok(with_bench!(bench, w => w.add_class(&name)))
}

#[tauri::command]
pub async fn attach_camera(state: State<'_, AppState>) -> Result<String, String> {
    let bench = state.bench()?;
    let settings = state.config().camera;
    let camera = tauri::async_runtime::spawn_blocking(move || GstCamera::open(&settings))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
    let camera = Arc::new(camera);
    let description = crate::video::FrameSource::describe(camera.as_ref());
    with_bench!(bench, w => w.attach_camera(camera));
    Ok(description)
}

#[tauri::command]
pub async fn start_collecting(class_id: usize, state: State<'_, AppState>) -> Result<(), String> {
    let bench = state.bench()?;
    with_bench!(bench, w => w.start_collecting(class_id)).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_collecting(state: State<'_, AppState>) -> Result<Option<usize>, String> {
    let bench = state.bench()?;
    Ok(with_bench!(bench, w => w.stop_collecting().await))
}

#[tauri::command]
pub async fn train_model(
    epochs: usize,
    learning_rate: f64,
    batch_size: usize,
    on_progress: Channel<EpochReport>,
    state: State<'_, AppState>,
) -> Result<Option<TrainingSummary>, String> {
    let bench = state.bench()?;
    let hyperparameters = Hyperparameters {
        epochs,
        learning_rate,
        batch_size,
    };

    state.events.set_progress(Some(on_progress));
    let result = with_bench!(bench, w => w.train(hyperparameters).await);
    state.events.set_progress(None);

    result.map_err(|e| {
        state.events.notice(&Notice::error(e.to_string()));
        e.to_string()
    })
}

#[tauri::command]
pub async fn toggle_prediction(state: State<'_, AppState>) -> Result<bool, String> {
    let bench = state.bench()?;
    with_bench!(bench, w => w.toggle_prediction().await).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn export_bundle(path: Option<String>, state: State<'_, AppState>) -> Result<String, String> {
    let bench = state.bench()?;
    let target = path
        .map(PathBuf::from)
        .or_else(|| state.config().export.output_dir.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let written = with_bench!(bench, w => w.export_bundle(&target)).map_err(|e| {
        state.events.notice(&Notice::error(e.to_string()));
        e.to_string()
    })?;

    if let Some(dir) = written.parent() {
        let mut config = state.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.update_output_dir(dir);
        if let Err(e) = config.save(&state.config_path) {
            warn!("設定の保存に失敗しました: {:#}", e);
        }
    }
    info!(path = %written.display(), "エクスポートが完了しました");
    Ok(written.to_string_lossy().to_string())
}

#[tauri::command]
pub async fn reset_session(state: State<'_, AppState>) -> Result<(), String> {
    let bench = state.bench()?;
    with_bench!(bench, w => w.reset().await);
    Ok(())
}

#[tauri::command]
pub async fn preview_frame(state: State<'_, AppState>) -> Result<String, String> {
    let bench = state.bench()?;
    let frame = with_bench!(bench, w => w.capture_frame()).map_err(|e| e.to_string())?;
    encode_preview(&frame, 70).map_err(|e| e.to_string())
}
