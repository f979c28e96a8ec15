//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・学習・カメラ・抽出器の設定をJSON形式で保存・読み込みします。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// シャッフル用のランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 16,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

#[cfg(feature = "ml")]
impl TrainingSettings {
    pub fn hyperparameters(&self) -> crate::ml::Hyperparameters {
        crate::ml::Hyperparameters {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
        }
    }
}

/// サンプル収集設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionSettings {
    /// 1サンプル取得後の待ち時間（ミリ秒）
    pub sample_interval_ms: u64,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
        }
    }
}

impl CollectionSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// 連続推論設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceSettings {
    pub frames_per_second: u32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            frames_per_second: 30,
        }
    }
}

impl InferenceSettings {
    /// 1フレームあたりの周期（0fpsは1fps扱い）
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frames_per_second.max(1) as f64)
    }
}

/// カメラ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSettings {
    /// デバイスパス（例: /dev/video0）。未指定なら自動選択
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: None,
            width: 640,
            height: 480,
        }
    }
}

/// 特徴抽出器の種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ExtractorKind {
    /// 格子平均（重みファイル不要）
    #[default]
    Pooled,
    /// 畳み込みトランク（burnレコードから読み込み）
    Conv,
}

/// 特徴抽出器設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorSettings {
    pub kind: ExtractorKind,
    /// 入力画像サイズ（正方形）
    pub image_size: u32,
    /// Pooled抽出器の格子数
    pub grid: u32,
    /// Conv抽出器の重みファイル
    pub weights_path: Option<String>,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            kind: ExtractorKind::default(),
            image_size: 224,
            grid: 8,
            weights_path: None,
        }
    }
}

/// エクスポート設定
///
/// metadata.json の画像サイズは抽出器の入力サイズをそのまま使います。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    /// 保存先ディレクトリ（前回値を保存）
    pub output_dir: Option<String>,
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    pub training: TrainingSettings,
    pub collection: CollectionSettings,
    pub inference: InferenceSettings,
    pub camera: CameraSettings,
    pub extractor: ExtractorSettings,
    pub export: ExportSettings,
    /// tracingのフィルタ（RUST_LOGが優先）
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            training: TrainingSettings::default(),
            collection: CollectionSettings::default(),
            inference: InferenceSettings::default(),
            camera: CameraSettings::default(),
            extractor: ExtractorSettings::default(),
            export: ExportSettings::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを開けません: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        Ok(config)
    }

    /// 設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "設定ファイルを読み込みました");
                config
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "設定ファイルの読み込みに失敗しました: {:#}。デフォルト設定を使用します",
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("設定ファイルを書き込めません: {}", path.display()))?;
        info!(path = %path.display(), "設定ファイルを保存しました");
        Ok(())
    }

    /// 最後に使用した出力ディレクトリを更新
    pub fn update_output_dir<P: AsRef<Path>>(&mut self, path: P) {
        self.export.output_dir = Some(path.as_ref().to_string_lossy().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.training.epochs, 50);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.collection.sample_interval_ms, 100);
        assert_eq!(config.extractor.kind, ExtractorKind::Pooled);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "device_type": "Cpu", "training": { "epochs": 5 } }"#)
                .unwrap();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.inference.frames_per_second, 30);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.extractor.grid = 4;
        config.update_output_dir("exports");
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(AppConfig::load(&path).is_err());
        assert_eq!(AppConfig::load_or_default(&path), AppConfig::default());
        assert_eq!(
            AppConfig::load_or_default(dir.path().join("missing.json")),
            AppConfig::default()
        );
    }

    #[test]
    fn test_periods() {
        let inference = InferenceSettings {
            frames_per_second: 0,
        };
        assert_eq!(inference.period(), Duration::from_secs(1));
        assert_eq!(
            CollectionSettings::default().interval(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
