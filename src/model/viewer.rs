//! エクスポート済みzipの読み戻し
//!
//! ビューアと同じ計算（dense → ReLU → dense → softmax）をホスト上で行います。

use std::io::{Cursor, Read};
use zip::ZipArchive;

use super::topology::{BundleMetadata, ModelArtifacts, WEIGHTS_FILE};
use super::DenseLayer;
use crate::error::{Result, SessionError};

/// 読み戻したモデル
#[derive(Debug, Clone)]
pub struct ViewerModel {
    pub artifacts: ModelArtifacts,
    pub metadata: BundleMetadata,
    pub layers: [DenseLayer; 2],
    /// zip内のエントリ名（格納順）
    pub entries: Vec<String>,
}

impl ViewerModel {
    pub fn from_bundle(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| SessionError::Export(format!("zipを開けません: {}", e)))?;
        let entries = (0..archive.len())
            .map(|i| {
                archive
                    .by_index(i)
                    .map(|entry| entry.name().to_string())
                    .map_err(|e| SessionError::Export(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let artifacts: ModelArtifacts =
            serde_json::from_slice(&read_entry(&mut archive, "model.json")?)?;
        let metadata: BundleMetadata =
            serde_json::from_slice(&read_entry(&mut archive, "metadata.json")?)?;
        let weights = decode_weights(&read_entry(&mut archive, WEIGHTS_FILE)?)?;

        let layers = split_layers(&artifacts, &weights)?;
        if layers[1].units != metadata.classes.len() {
            return Err(SessionError::Export(format!(
                "クラス数 {} と出力ユニット数 {} が一致しません",
                metadata.classes.len(),
                layers[1].units
            )));
        }

        Ok(Self {
            artifacts,
            metadata,
            layers,
            entries,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].inputs
    }

    /// 1ベクトル分の確率分布
    pub fn predict(&self, feature: &[f32]) -> Result<Vec<f32>> {
        if feature.len() != self.input_dim() {
            return Err(SessionError::DimensionMismatch {
                expected: self.input_dim(),
                found: feature.len(),
            });
        }
        let hidden: Vec<f32> = self.layers[0]
            .apply(feature)
            .into_iter()
            .map(|x| x.max(0.0))
            .collect();
        Ok(softmax(&self.layers[1].apply(&hidden)))
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| SessionError::Export(format!("{}: {}", name, e)))?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

fn decode_weights(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(SessionError::Export(format!(
            "重みファイルの長さが不正です: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// マニフェスト順に kernel, bias, kernel, bias を切り出す
fn split_layers(artifacts: &ModelArtifacts, weights: &[f32]) -> Result<[DenseLayer; 2]> {
    let specs: Vec<_> = artifacts.weight_specs().collect();
    if specs.len() != 4 {
        return Err(SessionError::Export(format!(
            "重みテンソル数が不正です: {}",
            specs.len()
        )));
    }
    let expected: usize = specs.iter().map(|spec| spec.numel()).sum();
    if expected != weights.len() {
        return Err(SessionError::Export(format!(
            "重みの要素数が一致しません: manifest {} / file {}",
            expected,
            weights.len()
        )));
    }

    let mut offset = 0;
    let mut take = |n: usize| {
        let slice = weights[offset..offset + n].to_vec();
        offset += n;
        slice
    };

    let mut layers = Vec::with_capacity(2);
    for pair in specs.chunks(2) {
        let (kernel_spec, bias_spec) = (pair[0], pair[1]);
        let [inputs, units] = kernel_spec.shape[..] else {
            return Err(SessionError::Export(format!(
                "{} の形状が2次元ではありません",
                kernel_spec.name
            )));
        };
        let layer = DenseLayer {
            inputs,
            units,
            kernel: take(kernel_spec.numel()),
            bias: take(bias_spec.numel()),
        };
        if !layer.is_consistent() {
            return Err(SessionError::Export(format!(
                "{} のバイアス長が不正です",
                bias_spec.name
            )));
        }
        layers.push(layer);
    }

    let output = layers.pop();
    let hidden = layers.pop();
    match (hidden, output) {
        (Some(hidden), Some(output)) => Ok([hidden, output]),
        _ => Err(SessionError::Export("層の数が不正です".to_string())),
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|x| x / sum).collect()
}
