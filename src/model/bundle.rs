//! エクスポート用zipの生成

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::topology::{BundleMetadata, ModelArtifacts, WEIGHTS_FILE};
use super::DenseLayer;
use crate::error::{Result, SessionError};

const VIEWER_HTML: &str = include_str!("../../assets/viewer/index.html");
const VIEWER_SCRIPT: &str = include_str!("../../assets/viewer/script.js");
const VIEWER_README: &str = include_str!("../../assets/viewer/README.md");

/// zip内のエントリ名（格納順）
pub const BUNDLE_ENTRIES: [&str; 6] = [
    "model.json",
    WEIGHTS_FILE,
    "metadata.json",
    "index.html",
    "script.js",
    "README.md",
];

/// 学習済み分類器からエクスポート用zipを作る
#[cfg(feature = "ml")]
pub fn build_bundle<B: burn::tensor::backend::Backend>(
    classifier: &crate::ml::TrainedClassifier<B>,
    metadata: &BundleMetadata,
) -> Result<Vec<u8>> {
    let layers = classifier.dense_layers()?;
    bundle_from_layers(&layers, metadata)
}

/// ホスト上の重みからエクスポート用zipを作る
pub fn bundle_from_layers(layers: &[DenseLayer; 2], metadata: &BundleMetadata) -> Result<Vec<u8>> {
    if let Some(layer) = layers.iter().find(|layer| !layer.is_consistent()) {
        return Err(SessionError::Export(format!(
            "重みの形状が不正です: {}x{} (kernel {}, bias {})",
            layer.inputs,
            layer.units,
            layer.kernel.len(),
            layer.bias.len()
        )));
    }
    if layers[0].units != layers[1].inputs {
        return Err(SessionError::Export(format!(
            "層の接続が一致しません: {} -> {}",
            layers[0].units, layers[1].inputs
        )));
    }
    if metadata.classes.len() != layers[1].units {
        return Err(SessionError::Export(format!(
            "クラス数 {} と出力ユニット数 {} が一致しません",
            metadata.classes.len(),
            layers[1].units
        )));
    }

    let artifacts = ModelArtifacts::for_dense_layers(layers);
    let model_json = serde_json::to_vec_pretty(&artifacts)?;
    let metadata_json = serde_json::to_vec_pretty(metadata)?;
    let weights = encode_weights(layers);

    let contents: [&[u8]; 6] = [
        &model_json,
        &weights,
        &metadata_json,
        VIEWER_HTML.as_bytes(),
        VIEWER_SCRIPT.as_bytes(),
        VIEWER_README.as_bytes(),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in BUNDLE_ENTRIES.iter().zip(contents) {
        zip.start_file(*name, options)
            .map_err(|e| SessionError::Export(format!("{}: {}", name, e)))?;
        zip.write_all(data)
            .map_err(|e| SessionError::Export(format!("{}: {}", name, e)))?;
    }
    let cursor = zip
        .finish()
        .map_err(|e| SessionError::Export(format!("zipの書き込みエラー: {}", e)))?;

    Ok(cursor.into_inner())
}

/// kernel, bias の順にリトルエンディアンのf32で連結
fn encode_weights(layers: &[DenseLayer; 2]) -> Vec<u8> {
    let total: usize = layers.iter().map(|l| l.kernel.len() + l.bias.len()).sum();
    let mut bytes = Vec::with_capacity(total * 4);
    for layer in layers {
        for value in layer.kernel.iter().chain(&layer.bias) {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

/// zipをファイルへ書き出す（親ディレクトリは作成）
pub fn write_bundle(path: &Path, bytes: &[u8]) -> Result<()> {
    let export_error =
        |e: std::io::Error| SessionError::Export(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(export_error)?;
    }
    fs::write(path, bytes).map_err(export_error)?;

    info!(path = %path.display(), bytes = bytes.len(), "モデルをエクスポートしました");
    Ok(())
}

/// teachable-model-YYYYmmdd-HHMMSS.zip
pub fn default_bundle_name() -> String {
    format!(
        "teachable-model-{}.zip",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn layers() -> [DenseLayer; 2] {
        [
            DenseLayer {
                inputs: 2,
                units: 2,
                kernel: vec![1.0, 2.0, 3.0, 4.0],
                bias: vec![0.5, -0.5],
            },
            DenseLayer {
                inputs: 2,
                units: 2,
                kernel: vec![1.0, 0.0, 0.0, 1.0],
                bias: vec![0.0, 0.0],
            },
        ]
    }

    #[test]
    fn entries_are_written_in_order() {
        let metadata = BundleMetadata::new(vec!["a".into(), "b".into()], 32);
        let bytes = bundle_from_layers(&layers(), &metadata).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, BUNDLE_ENTRIES);

        let mut weights = Vec::new();
        archive
            .by_name(WEIGHTS_FILE)
            .unwrap()
            .read_to_end(&mut weights)
            .unwrap();
        assert_eq!(weights.len(), (4 + 2 + 4 + 2) * 4);
        assert_eq!(&weights[..4], &1.0f32.to_le_bytes());
        assert_eq!(&weights[16..20], &0.5f32.to_le_bytes());
    }

    #[test]
    fn class_count_must_match_output_units() {
        let metadata = BundleMetadata::new(vec!["only".into()], 32);
        assert!(matches!(
            bundle_from_layers(&layers(), &metadata),
            Err(SessionError::Export(_))
        ));
    }

    #[test]
    fn write_bundle_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/model.zip");
        write_bundle(&path, b"zip").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"zip");
    }

    #[test]
    fn default_name_has_timestamp() {
        let name = default_bundle_name();
        assert!(name.starts_with("teachable-model-"));
        assert!(name.ends_with(".zip"));
        assert_eq!(name.len(), "teachable-model-20240101-000000.zip".len());
    }
}
