//! 画像フォルダから分類器を学習してエクスポートするバイナリ
//!
//! ```text
//! headless_train <data_dir> [output] [config.json]
//! ```
//!
//! `data_dir` の直下のサブフォルダ名をクラス名として扱います。

use anyhow::{bail, Context, Result};
use burn::backend::Wgpu;
use burn_wgpu::WgpuDevice;
use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use image::RgbImage;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use teachable_lib::events::{Notice, SessionEvents};
use teachable_lib::extractor::load_extractor;
use teachable_lib::ml::EpochReport;
use teachable_lib::model::{AppConfig, DeviceType};
use teachable_lib::workbench::Workbench;

/// 検証用に取り分ける割合
const HOLDOUT_RATIO: f32 = 0.2;

/// 進捗をログへ出す受け口
struct ConsoleEvents;

impl SessionEvents for ConsoleEvents {
    fn training_progress(&self, report: &EpochReport) {
        info!(
            "エポック {}/{}: loss={:.4} accuracy={:.3}",
            report.epoch + 1,
            report.total_epochs,
            report.loss,
            report.accuracy
        );
    }

    fn notice(&self, notice: &Notice) {
        warn!("{}", notice.message);
    }
}

struct LabelledImage {
    class_id: usize,
    image: RgbImage,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// サブフォルダごとに画像を読み込む
fn load_classes(data_dir: &Path) -> Result<(Vec<String>, Vec<LabelledImage>)> {
    let mut class_dirs: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .with_context(|| format!("データフォルダを開けません: {}", data_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    class_dirs.sort();

    let mut names = Vec::new();
    let mut images = Vec::new();
    for dir in class_dirs {
        let class_id = names.len();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("Class {}", class_id + 1));

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();

        for path in &paths {
            let image = image::open(path)
                .with_context(|| format!("画像を読み込めません: {}", path.display()))?
                .to_rgb8();
            images.push(LabelledImage { class_id, image });
        }
        info!(class = %name, images = paths.len(), "クラスを読み込みました");
        names.push(name);
    }

    if names.len() < 2 {
        bail!("クラスフォルダが2つ以上必要です: {}", data_dir.display());
    }
    Ok((names, images))
}

/// 学習用と検証用に分ける（件数が少なければ全件を学習に使う）
fn split_holdout(mut images: Vec<LabelledImage>, seed: u64) -> (Vec<LabelledImage>, Vec<LabelledImage>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    images.shuffle(&mut rng);

    let holdout = (images.len() as f32 * HOLDOUT_RATIO) as usize;
    if images.len() < 10 || holdout == 0 {
        return (images, Vec::new());
    }
    let validation = images.split_off(images.len() - holdout);
    (images, validation)
}

async fn train_and_export<B: Backend>(
    device: B::Device,
    config: AppConfig,
    data_dir: &Path,
    output: &Path,
) -> Result<()> {
    let extractor = load_extractor::<B>(&config.extractor, &device)?;
    let hyperparameters = config.training.hyperparameters();
    let seed = config.training.seed;
    let events: Arc<dyn SessionEvents> = Arc::new(ConsoleEvents);
    let workbench = Workbench::<B>::new(device, extractor, events, config);

    let (names, images) = load_classes(data_dir)?;
    for name in &names {
        workbench.add_class(name);
    }

    let (train, validation) = split_holdout(images, seed);
    for item in &train {
        workbench.add_sample(item.class_id, &item.image)?;
    }
    info!(train = train.len(), validation = validation.len(), "サンプルを登録しました");

    let summary = workbench
        .train(hyperparameters)
        .await?
        .context("学習結果が得られませんでした")?;
    info!(
        "学習完了: loss={:.4} accuracy={:.3} ({} ms)",
        summary.final_loss, summary.final_accuracy, summary.elapsed_ms
    );

    if !validation.is_empty() {
        let mut correct = 0;
        for item in &validation {
            if workbench.predict_once(&item.image)?.winner == item.class_id {
                correct += 1;
            }
        }
        info!(
            "検証精度: {}/{} ({:.1}%)",
            correct,
            validation.len(),
            correct as f64 * 100.0 / validation.len() as f64
        );
    }

    let written = workbench.export_bundle(output)?;
    info!("エクスポート先: {}", written.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("使い方: {} <data_dir> [output] [config.json]", args[0]);
        std::process::exit(2);
    }

    let data_dir = PathBuf::from(&args[1]);
    let output = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config_path = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);

    let config = AppConfig::load_or_default(&config_path);
    teachable_lib::logging::init(&config.log_filter)?;
    info!(device = %config.device_type, "学習を開始します");

    match config.device_type {
        DeviceType::Wgpu => {
            train_and_export::<Wgpu>(WgpuDevice::default(), config, &data_dir, &output).await
        }
        DeviceType::Cpu => {
            train_and_export::<NdArray<f32>>(NdArrayDevice::default(), config, &data_dir, &output)
                .await
        }
    }
}
