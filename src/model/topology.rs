//! model.json / metadata.json のスキーマ
//!
//! ブラウザ側のlayers-model読み込み処理が期待する形に合わせています。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::DenseLayer;

/// 重みファイル名（weightsManifest の paths と一致させる）
pub const WEIGHTS_FILE: &str = "weights.bin";

/// model.json のルート
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifacts {
    pub model_topology: Value,
    pub format: String,
    pub generated_by: String,
    pub converted_by: Option<String>,
    pub weights_manifest: Vec<WeightsGroup>,
}

/// weightsManifest の1グループ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightsGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightSpec>,
}

/// 重みテンソル1個分の記述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl WeightSpec {
    fn float32(name: String, shape: Vec<usize>) -> Self {
        Self {
            name,
            shape,
            dtype: "float32".to_string(),
        }
    }

    /// 要素数
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// 変換時に使用する特徴抽出器の情報
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractorDescriptor {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<u32>,
}

/// metadata.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// 登録順のクラス名
    pub classes: Vec<String>,
    pub image_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<ExtractorDescriptor>,
}

impl BundleMetadata {
    pub fn new(classes: Vec<String>, image_size: u32) -> Self {
        Self {
            classes,
            image_size,
            extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: ExtractorDescriptor) -> Self {
        self.extractor = Some(extractor);
        self
    }
}

/// 層名（dense_Dense1, dense_Dense2）
pub fn layer_name(index: usize) -> String {
    format!("dense_Dense{}", index + 1)
}

impl ModelArtifacts {
    /// 2層の全結合分類器を記述する
    pub fn for_dense_layers(layers: &[DenseLayer; 2]) -> Self {
        let [hidden, output] = layers;
        let model_topology = json!({
            "class_name": "Sequential",
            "config": {
                "name": "sequential_1",
                "layers": [
                    dense_config(&layer_name(0), hidden.units, "relu", Some(hidden.inputs)),
                    dense_config(&layer_name(1), output.units, "softmax", None),
                ]
            },
            "keras_version": "tfjs-layers",
            "backend": "tensor_flow.js"
        });

        let weights = layers
            .iter()
            .enumerate()
            .flat_map(|(index, layer)| {
                let name = layer_name(index);
                [
                    WeightSpec::float32(format!("{}/kernel", name), vec![layer.inputs, layer.units]),
                    WeightSpec::float32(format!("{}/bias", name), vec![layer.units]),
                ]
            })
            .collect();

        Self {
            model_topology,
            format: "layers-model".to_string(),
            generated_by: format!("teachable {}", env!("CARGO_PKG_VERSION")),
            converted_by: None,
            weights_manifest: vec![WeightsGroup {
                paths: vec![format!("./{}", WEIGHTS_FILE)],
                weights,
            }],
        }
    }

    /// マニフェスト順の重み記述
    pub fn weight_specs(&self) -> impl Iterator<Item = &WeightSpec> {
        self.weights_manifest.iter().flat_map(|group| group.weights.iter())
    }
}

fn dense_config(name: &str, units: usize, activation: &str, input_dim: Option<usize>) -> Value {
    let mut config = json!({
        "name": name,
        "trainable": true,
        "dtype": "float32",
        "units": units,
        "activation": activation,
        "use_bias": true,
        "kernel_initializer": { "class_name": "VarianceScaling", "config": { "scale": 1, "mode": "fan_in", "distribution": "normal", "seed": null } },
        "bias_initializer": { "class_name": "Zeros", "config": {} },
        "kernel_regularizer": null,
        "bias_regularizer": null,
        "activity_regularizer": null,
        "kernel_constraint": null,
        "bias_constraint": null
    });
    if let (Some(dim), Some(object)) = (input_dim, config.as_object_mut()) {
        object.insert("batch_input_shape".to_string(), json!([null, dim]));
    }
    json!({ "class_name": "Dense", "config": config })
}
