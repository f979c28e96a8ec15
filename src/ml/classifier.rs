//! 分類ヘッドの定義
//!
//! 特徴ベクトルをクラス確率に変換する2層の全結合ネットワークです。

use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig, Relu},
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Tensor,
    },
};

use crate::error::{Result, SessionError};
use crate::model::DenseLayer;
use crate::resources::Tracked;

/// 隠れ層のユニット数
pub const HIDDEN_UNITS: usize = 128;

/// 分類ヘッド設定
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// 入力次元 D
    pub input_dim: usize,
    /// 分類クラス数 C
    pub num_classes: usize,
    /// 隠れ層のユニット数
    #[config(default = 128)]
    pub hidden_units: usize,
}

impl ClassifierConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            hidden: LinearConfig::new(self.input_dim, self.hidden_units).init(device),
            output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 分類ヘッド
///
/// # アーキテクチャ
/// - FC: D -> 128 + ReLU
/// - FC: 128 -> C
/// - Softmax (確率出力時)
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `features`: 特徴ベクトル [batch_size, D]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, C]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden.forward(features);
        let x = self.activation.forward(x);
        self.output.forward(x)
    }

    /// クラス確率 [batch_size, C]
    pub fn probabilities(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(features), 1)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 戻り値
    /// - (損失 [1], ロジット [batch_size, C])
    pub fn forward_classification(
        &self,
        features: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(features);
        let loss = categorical_cross_entropy(logits.clone(), targets);
        (loss, logits)
    }

    /// 重みをホストメモリへ取り出す（隠れ層、出力層の順）
    pub fn dense_layers(&self) -> Result<[DenseLayer; 2]> {
        Ok([
            linear_to_dense(&self.hidden)?,
            linear_to_dense(&self.output)?,
        ])
    }
}

/// one-hotターゲットに対するカテゴリカル交差エントロピー
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (targets * log_probs).sum_dim(1).mean().neg()
}

fn linear_to_dense<B: Backend>(layer: &Linear<B>) -> Result<DenseLayer> {
    let weight = layer.weight.val();
    let [inputs, units] = weight.dims();
    let kernel = weight
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SessionError::Export(format!("重みの読み出しエラー: {:?}", e)))?;
    let bias = match &layer.bias {
        Some(bias) => bias
            .val()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SessionError::Export(format!("バイアスの読み出しエラー: {:?}", e)))?,
        None => vec![0.0; units],
    };

    Ok(DenseLayer {
        inputs,
        units,
        kernel,
        bias,
    })
}

/// 学習済み分類器
///
/// セッション内で同時に存在するのは1つだけです。
pub struct TrainedClassifier<B: Backend> {
    model: Tracked<ClassifierHead<B>>,
    device: B::Device,
    input_dim: usize,
    num_classes: usize,
}

impl<B: Backend> TrainedClassifier<B> {
    pub(crate) fn new(
        model: Tracked<ClassifierHead<B>>,
        device: B::Device,
        input_dim: usize,
        num_classes: usize,
    ) -> Self {
        Self {
            model,
            device,
            input_dim,
            num_classes,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn model(&self) -> &ClassifierHead<B> {
        &self.model
    }

    /// 1ベクトル分の確率分布を計算
    pub fn predict(&self, feature: &[f32]) -> Result<Vec<f32>> {
        if feature.len() != self.input_dim {
            return Err(SessionError::DimensionMismatch {
                expected: self.input_dim,
                found: feature.len(),
            });
        }

        let input = Tensor::<B, 1>::from_floats(feature, &self.device).reshape([1, self.input_dim]);
        self.model
            .probabilities(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SessionError::Training(format!("推論結果の取得エラー: {:?}", e)))
    }

    pub fn dense_layers(&self) -> Result<[DenseLayer; 2]> {
        self.model.dense_layers()
    }
}
