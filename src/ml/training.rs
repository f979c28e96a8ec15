//! 分類ヘッドの学習ループ
//!
//! 収集済みの特徴ベクトルに対してミニバッチ学習を行います。エポックごとに
//! 進捗コールバックを呼び、呼び出し側はそこで描画ループへ制御を返します。

use burn::{
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use burn_dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::ml::classifier::{ClassifierConfig, ClassifierHead};
use crate::resources::{ResourceKind, ResourceLedger, Tracked};
use crate::session::SampleSnapshot;

/// 学習パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperparameters {
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 1e-3,
            batch_size: 16,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SessionError::InvalidHyperparameters(
                "エポック数は1以上を指定してください".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SessionError::InvalidHyperparameters(
                "バッチサイズは1以上を指定してください".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(SessionError::InvalidHyperparameters(format!(
                "学習率が不正です: {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// 1エポック終了時の進捗
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochReport {
    /// 0始まりのエポック番号
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// 学習完了時の集計
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub epochs: usize,
    pub samples: usize,
    pub num_classes: usize,
    pub final_loss: f64,
    pub final_accuracy: f64,
    pub elapsed_ms: u64,
}

/// データセットアイテム
#[derive(Clone, Debug)]
pub struct SampleItem {
    pub features: Vec<f32>,
    pub target: Vec<f32>,
}

/// one-hot化済みの学習データ
///
/// 学習1回分の一時バッファとして台帳に登録されます。
pub struct SampleDataset {
    items: Arc<Tracked<Vec<SampleItem>>>,
}

impl SampleDataset {
    /// スナップショットのラベルを現在のクラス数でone-hot化
    pub fn from_snapshot(snapshot: &SampleSnapshot, ledger: &ResourceLedger) -> Result<Self> {
        let mut items = Vec::with_capacity(snapshot.len());
        for (index, &label) in snapshot.labels.iter().enumerate() {
            if label >= snapshot.num_classes {
                return Err(SessionError::UnknownClass {
                    id: label,
                    len: snapshot.num_classes,
                });
            }
            let features = snapshot
                .row(index)
                .ok_or_else(|| SessionError::Training(format!("行 {} が欠落しています", index)))?
                .to_vec();
            let mut target = vec![0.0f32; snapshot.num_classes];
            target[label] = 1.0;
            items.push(SampleItem { features, target });
        }

        Ok(Self {
            items: Arc::new(ledger.track(ResourceKind::Scratch, items)),
        })
    }
}

impl Clone for SampleDataset {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl Dataset<SampleItem> for SampleDataset {
    fn get(&self, index: usize) -> Option<SampleItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SampleBatch<B: Backend> {
    /// [batch_size, D]
    pub features: Tensor<B, 2>,
    /// one-hot [batch_size, C]
    pub targets: Tensor<B, 2>,
}

/// バッチャー
#[derive(Clone)]
pub struct SampleBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SampleBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<B, SampleItem, SampleBatch<B>> for SampleBatcher<B> {
    fn batch(&self, items: Vec<SampleItem>, _device: &B::Device) -> SampleBatch<B> {
        let batch_size = items.len();
        let dim = items.first().map_or(0, |item| item.features.len());
        let classes = items.first().map_or(0, |item| item.target.len());

        let mut features = Vec::with_capacity(batch_size * dim);
        let mut targets = Vec::with_capacity(batch_size * classes);
        for item in items {
            features.extend_from_slice(&item.features);
            targets.extend_from_slice(&item.target);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let features = Tensor::<B, 1>::from_floats(features.as_slice(), &self.device)
            .reshape([batch_size, dim]);
        let targets = Tensor::<B, 1>::from_floats(targets.as_slice(), &self.device)
            .reshape([batch_size, classes]);

        SampleBatch { features, targets }
    }
}

/// 分類ヘッドを学習
///
/// `on_epoch` はエポックごとに呼ばれ、`false` を返すと学習を中断します。
/// 戻り値は推論用バックエンドへ移したモデルです。
pub fn fit_classifier<B, F>(
    snapshot: &SampleSnapshot,
    hyperparameters: Hyperparameters,
    seed: u64,
    device: &B::Device,
    ledger: &ResourceLedger,
    mut on_epoch: F,
) -> Result<(ClassifierHead<B::InnerBackend>, TrainingSummary)>
where
    B: AutodiffBackend,
    F: FnMut(&EpochReport) -> bool,
{
    hyperparameters.validate()?;
    if snapshot.is_empty() {
        return Err(SessionError::NoData);
    }

    let started = Instant::now();
    let samples = snapshot.len();
    let num_classes = snapshot.num_classes;

    let dataset = SampleDataset::from_snapshot(snapshot, ledger)?;
    let loader = DataLoaderBuilder::new(SampleBatcher::<B>::new(device.clone()))
        .batch_size(hyperparameters.batch_size)
        .shuffle(seed)
        .build(dataset);

    let mut model = ClassifierConfig::new(snapshot.dim, num_classes).init::<B>(device);
    let mut optim = AdamConfig::new().init();

    info!(
        samples,
        dim = snapshot.dim,
        num_classes,
        epochs = hyperparameters.epochs,
        batch_size = hyperparameters.batch_size,
        learning_rate = hyperparameters.learning_rate,
        "学習を開始します"
    );

    let mut last = EpochReport {
        epoch: 0,
        total_epochs: hyperparameters.epochs,
        loss: 0.0,
        accuracy: 0.0,
    };

    for epoch in 0..hyperparameters.epochs {
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for batch in loader.iter() {
            let batch_size = batch.targets.dims()[0];
            let expected = batch.targets.clone().argmax(1);
            let (loss, logits) = model.forward_classification(batch.features, batch.targets);

            let batch_loss = loss.clone().into_scalar().elem::<f64>();
            let batch_correct = logits
                .argmax(1)
                .equal(expected)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(hyperparameters.learning_rate, model, grads);

            loss_sum += batch_loss * batch_size as f64;
            correct += batch_correct.max(0) as usize;
            seen += batch_size;
        }

        if !loss_sum.is_finite() {
            return Err(SessionError::Training(format!(
                "エポック {} で損失が発散しました",
                epoch + 1
            )));
        }

        last = EpochReport {
            epoch,
            total_epochs: hyperparameters.epochs,
            loss: loss_sum / seen.max(1) as f64,
            accuracy: correct as f64 / seen.max(1) as f64,
        };
        debug!(
            epoch = epoch + 1,
            loss = last.loss,
            accuracy = last.accuracy,
            "エポック完了"
        );

        if !on_epoch(&last) {
            return Err(SessionError::Training("学習が中断されました".to_string()));
        }
    }

    let summary = TrainingSummary {
        epochs: hyperparameters.epochs,
        samples,
        num_classes,
        final_loss: last.loss,
        final_accuracy: last.accuracy,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        loss = summary.final_loss,
        accuracy = summary.final_accuracy,
        elapsed_ms = summary.elapsed_ms,
        "学習が完了しました"
    );

    Ok((model.valid(), summary))
}
