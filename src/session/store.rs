//! 特徴行列とラベルベクトルの保持
//!
//! サンプル追加のたびに新しい行列を組み立てて差し替え、古い行列は即座に
//! 解放します。1サンプルあたりO(N)のコピーになりますが、収集は約10件/秒に
//! 制限されているのでセッション中のNは数千程度に収まります。

use burn::tensor::{backend::Backend, Int, Tensor};
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::resources::{ResourceKind, ResourceLedger, Tracked};

/// 学習1回分のホスト側コピー
#[derive(Debug, Clone)]
pub struct SampleSnapshot {
    /// 行優先 [N, D]
    pub features: Vec<f32>,
    pub labels: Vec<usize>,
    pub dim: usize,
    pub num_classes: usize,
}

impl SampleSnapshot {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dim)?;
        self.features.get(start..start + self.dim)
    }
}

struct DatasetTensors<B: Backend> {
    features: Tracked<Tensor<B, 2>>,
    labels: Tracked<Tensor<B, 1, Int>>,
    rows: usize,
    dim: usize,
}

/// サンプルストア
pub struct SampleStore<B: Backend> {
    device: B::Device,
    ledger: ResourceLedger,
    dataset: Option<DatasetTensors<B>>,
}

impl<B: Backend> SampleStore<B> {
    pub fn new(device: B::Device, ledger: ResourceLedger) -> Self {
        Self {
            device,
            ledger,
            dataset: None,
        }
    }

    /// 行数 N
    pub fn len(&self) -> usize {
        self.dataset.as_ref().map_or(0, |d| d.rows)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_none()
    }

    /// 特徴次元 D（最初のサンプルで確定）
    pub fn dim(&self) -> Option<usize> {
        self.dataset.as_ref().map(|d| d.dim)
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// 1行追加
    ///
    /// クラスIDの妥当性は呼び出し側で検証済みであること。
    pub fn append(&mut self, class_id: usize, feature: &[f32]) -> Result<()> {
        let dim = feature.len();
        match self.dim() {
            Some(expected) if expected != dim => {
                return Err(SessionError::DimensionMismatch {
                    expected,
                    found: dim,
                });
            }
            None if dim == 0 => {
                return Err(SessionError::Capture("特徴ベクトルが空です".to_string()));
            }
            _ => {}
        }

        let row = Tensor::<B, 1>::from_floats(feature, &self.device).reshape([1, dim]);
        let label = Tensor::<B, 1, Int>::from_ints([class_id as i64], &self.device);

        // 新しい行列を組み立ててから差し替える。古い方はここでドロップされる
        let (features, labels, rows) = match self.dataset.take() {
            Some(old) => {
                let features = Tensor::cat(vec![(*old.features).clone(), row], 0);
                let labels = Tensor::cat(vec![(*old.labels).clone(), label], 0);
                (features, labels, old.rows + 1)
            }
            None => (row, label, 1),
        };

        self.dataset = Some(DatasetTensors {
            features: self.ledger.track(ResourceKind::FeatureMatrix, features),
            labels: self.ledger.track(ResourceKind::LabelVector, labels),
            rows,
            dim,
        });
        debug!(rows, dim, class_id, "サンプルを追加しました");
        Ok(())
    }

    /// 現在の特徴行列への参照
    pub fn features(&self) -> Option<&Tensor<B, 2>> {
        self.dataset.as_ref().map(|d| &*d.features)
    }

    /// 現在のラベルベクトルへの参照
    pub fn labels(&self) -> Option<&Tensor<B, 1, Int>> {
        self.dataset.as_ref().map(|d| &*d.labels)
    }

    /// 学習用にホストメモリへコピー
    pub fn snapshot(&self, num_classes: usize) -> Result<SampleSnapshot> {
        let dataset = self.dataset.as_ref().ok_or(SessionError::NoData)?;

        let features = (*dataset.features)
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SessionError::Training(format!("特徴行列の読み出しエラー: {:?}", e)))?;
        let labels = (*dataset.labels)
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| SessionError::Training(format!("ラベルの読み出しエラー: {:?}", e)))?
            .into_iter()
            .map(|label| label as usize)
            .collect();

        Ok(SampleSnapshot {
            features,
            labels,
            dim: dataset.dim,
            num_classes,
        })
    }

    /// すべてのサンプルを解放
    pub fn clear(&mut self) {
        self.dataset = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn store() -> (SampleStore<TestBackend>, ResourceLedger) {
        let ledger = ResourceLedger::new();
        (SampleStore::new(Default::default(), ledger.clone()), ledger)
    }

    #[test]
    fn append_grows_matrix_and_keeps_one_buffer_live() {
        let (mut store, ledger) = store();
        store.append(0, &[1.0, 2.0, 3.0]).unwrap();
        store.append(1, &[4.0, 5.0, 6.0]).unwrap();
        store.append(0, &[7.0, 8.0, 9.0]).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.dim(), Some(3));
        assert_eq!(store.features().unwrap().dims(), [3, 3]);
        assert_eq!(store.labels().unwrap().dims(), [3]);
        assert_eq!(ledger.live(ResourceKind::FeatureMatrix), 1);
        assert_eq!(ledger.live(ResourceKind::LabelVector), 1);
    }

    #[test]
    fn mismatched_dimension_is_rejected_without_mutation() {
        let (mut store, _ledger) = store();
        store.append(0, &[1.0, 2.0]).unwrap();
        let err = store.append(1, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_preserves_row_order() {
        let (mut store, _ledger) = store();
        store.append(1, &[0.5, 1.5]).unwrap();
        store.append(0, &[2.5, 3.5]).unwrap();

        let snapshot = store.snapshot(2).unwrap();
        assert_eq!(snapshot.labels, vec![1, 0]);
        assert_eq!(snapshot.row(1), Some(&[2.5, 3.5][..]));
        assert_eq!(snapshot.num_classes, 2);
    }

    #[test]
    fn clear_releases_buffers() {
        let (mut store, ledger) = store();
        store.append(0, &[1.0]).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(ledger.total_live(), 0);
        assert!(matches!(store.snapshot(1), Err(SessionError::NoData)));
    }
}
