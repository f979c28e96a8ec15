//! 畳み込みネットワークによる特徴抽出器
//!
//! 事前学習済みの重みをburnのレコードファイルから1度だけ読み込みます。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Relu,
    },
    record::{DefaultFileRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use image::RgbImage;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::error::{Result, SessionError};
use crate::extractor::{normalize_frame, FeatureExtractor};

/// 埋め込み次元（最終畳み込み層のチャネル数）
pub const EMBEDDING_DIM: usize = 128;

/// Conv1 -> Pool1 -> Conv2 -> Pool2 -> Conv3 を通せる最小の入力サイズ
pub const MIN_INPUT_SIZE: usize = 18;

/// 畳み込みトランク設定
#[derive(Config, Debug)]
pub struct ConvTrunkConfig {
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ConvTrunkConfig {
    /// 入力サイズがトランクを通せる大きさか確認
    pub fn check_input_size(&self) -> Result<()> {
        if self.image_size < MIN_INPUT_SIZE {
            return Err(SessionError::ExtractorLoad(format!(
                "入力サイズが小さすぎます: {} (最小{}x{}が必要)",
                self.image_size, MIN_INPUT_SIZE, MIN_INPUT_SIZE
            )));
        }
        Ok(())
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvTrunk<B> {
        ConvTrunk {
            // Conv1: 3x3 (no padding, stride 1)
            conv1: Conv2dConfig::new([3, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).init(),

            // Conv2: 3x3 (no padding, stride 1)
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).init(),

            // Conv3: 3x3 (no padding, stride 1)
            conv3: Conv2dConfig::new([64, EMBEDDING_DIM], [3, 3])
                .with_stride([1, 1])
                .init(device),

            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }
}

/// 畳み込みトランク
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 + ReLU
/// - Global Average Pooling -> 128次元
#[derive(Module, Debug)]
pub struct ConvTrunk<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d, // 2x2
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d, // 2x2
    conv3: Conv2d<B>, // 64 -> 128
    global_pool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> ConvTrunk<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - 埋め込み [batch_size, 128]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        self.global_pool.forward(x).reshape([batch_size, EMBEDDING_DIM])
    }
}

/// 畳み込みトランクを使う特徴抽出器
pub struct ConvEmbedder<B: Backend> {
    trunk: Mutex<ConvTrunk<B>>,
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> ConvEmbedder<B> {
    /// 重みファイル（拡張子 .mpk）を読み込んで初期化
    pub fn load(weights_path: &Path, image_size: u32, device: &B::Device) -> Result<Self> {
        let record_path = weights_path.with_extension("mpk");
        if !record_path.exists() {
            return Err(SessionError::ExtractorLoad(format!(
                "重みファイルが見つかりません: {}",
                record_path.display()
            )));
        }

        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        let record = Recorder::<B>::load(&recorder, record_path.clone(), device)
            .map_err(|e| SessionError::ExtractorLoad(format!("重みの読み込みエラー: {:?}", e)))?;

        let config = ConvTrunkConfig::new().with_image_size(image_size as usize);
        config.check_input_size()?;
        let trunk = config.init::<B>(device).load_record(record);

        info!(path = %record_path.display(), image_size, "conv抽出器の重みを読み込みました");
        Self::from_trunk(trunk, &config, device.clone())
    }

    /// 初期化済みのトランクから作る（入力サイズは `config` に従う）
    pub fn from_trunk(trunk: ConvTrunk<B>, config: &ConvTrunkConfig, device: B::Device) -> Result<Self> {
        config.check_input_size()?;
        Ok(Self {
            trunk: Mutex::new(trunk),
            device,
            image_size: config.image_size,
        })
    }
}

impl<B: Backend> FeatureExtractor for ConvEmbedder<B> {
    fn name(&self) -> &str {
        "conv"
    }

    fn embedding_dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn extract(&self, frame: &RgbImage) -> Result<Vec<f32>> {
        let size = self.image_size;
        let data = normalize_frame(frame, size as u32);
        let images =
            Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([1, 3, size, size]);

        let trunk = self
            .trunk
            .lock()
            .map_err(|_| SessionError::Capture("抽出器のロックが破損しています".to_string()))?;
        trunk
            .forward(images)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SessionError::Capture(format!("埋め込みの取得エラー: {:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn missing_weights_is_a_fatal_load_error() {
        let device = Default::default();
        let err = ConvEmbedder::<TestBackend>::load(Path::new("no/such/weights"), 32, &device)
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn saved_trunk_round_trips_through_record_file() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedder");

        let trunk = ConvTrunkConfig::new().with_image_size(32).init::<TestBackend>(&device);
        trunk
            .save_file(&path, &DefaultFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let embedder = ConvEmbedder::<TestBackend>::load(&path, 32, &device).unwrap();
        let embedding = embedder.extract(&RgbImage::new(40, 40)).unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        assert!(embedder.warm_up().is_ok());
    }

    #[test]
    fn tiny_inputs_are_rejected() {
        let device = Default::default();
        let config = ConvTrunkConfig::new().with_image_size(8);
        assert!(config.check_input_size().unwrap_err().is_fatal());

        let trunk = config.init::<TestBackend>(&device);
        assert!(ConvEmbedder::from_trunk(trunk, &config, device).is_err());
    }

    #[test]
    fn embedder_uses_configured_input_size() {
        let device = Default::default();
        let config = ConvTrunkConfig::new().with_image_size(MIN_INPUT_SIZE);
        let trunk = config.init::<TestBackend>(&device);
        let embedder = ConvEmbedder::from_trunk(trunk, &config, device).unwrap();

        // 入力サイズに関係なく設定サイズへ縮小される
        let embedding = embedder.extract(&RgbImage::new(64, 48)).unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        assert_eq!(ConvTrunkConfig::new().image_size, 224);
    }
}
