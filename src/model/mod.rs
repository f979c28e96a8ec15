//! 設定とエクスポート形式
//!
//! 学習済み分類器をブラウザで読める形式（model.json + weights.bin）へ変換し、
//! ビューアと一緒にzipへまとめます。

pub mod bundle;
pub mod config;
pub mod topology;
pub mod viewer;

pub use bundle::{bundle_from_layers, default_bundle_name, write_bundle, BUNDLE_ENTRIES};
#[cfg(feature = "ml")]
pub use bundle::build_bundle;
pub use config::{
    AppConfig, CameraSettings, CollectionSettings, DeviceType, ExportSettings, ExtractorKind,
    ExtractorSettings, InferenceSettings, TrainingSettings,
};
pub use topology::{BundleMetadata, ModelArtifacts};
pub use viewer::ViewerModel;

/// ホストメモリ上の全結合層
///
/// `kernel` は [inputs, units] の行優先で格納されます。
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub inputs: usize,
    pub units: usize,
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
}

impl DenseLayer {
    /// x・kernel + bias
    pub fn apply(&self, input: &[f32]) -> Vec<f32> {
        let mut output = self.bias.clone();
        for (i, &x) in input.iter().enumerate().take(self.inputs) {
            let row = &self.kernel[i * self.units..(i + 1) * self.units];
            for (out, &w) in output.iter_mut().zip(row) {
                *out += x * w;
            }
        }
        output
    }

    /// kernel・biasの長さが形状と一致するか
    pub fn is_consistent(&self) -> bool {
        self.kernel.len() == self.inputs * self.units && self.bias.len() == self.units
    }
}
