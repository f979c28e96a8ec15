//! バッファ寿命の追跡
//!
//! 特徴行列・ラベルベクトル・分類器はGPU上にある可能性があるため、参照が
//! 外れただけでなく確実に解放されたことを数で確認できるようにします。
//! `Tracked<T>` をドロップすると対応するカウントが減ります。

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 追跡対象のバッファ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// 特徴行列 [N, D]
    FeatureMatrix,
    /// ラベルベクトル [N]
    LabelVector,
    /// 学習済み分類器
    Classifier,
    /// 学習1回分の一時バッファ（スナップショット、one-hotラベル）
    Scratch,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::FeatureMatrix,
        ResourceKind::LabelVector,
        ResourceKind::Classifier,
        ResourceKind::Scratch,
    ];

    fn slot(self) -> usize {
        match self {
            ResourceKind::FeatureMatrix => 0,
            ResourceKind::LabelVector => 1,
            ResourceKind::Classifier => 2,
            ResourceKind::Scratch => 3,
        }
    }
}

/// 種別ごとの生存バッファ数
///
/// クローンは同じカウンタを共有します。
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counts: Arc<[AtomicUsize; 4]>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 値を追跡対象として登録
    pub fn track<T>(&self, kind: ResourceKind, value: T) -> Tracked<T> {
        self.counts[kind.slot()].fetch_add(1, Ordering::SeqCst);
        Tracked {
            value,
            lease: Lease {
                ledger: self.clone(),
                kind,
            },
        }
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.counts[kind.slot()].load(Ordering::SeqCst)
    }

    pub fn total_live(&self) -> usize {
        ResourceKind::ALL.iter().map(|kind| self.live(*kind)).sum()
    }
}

struct Lease {
    ledger: ResourceLedger,
    kind: ResourceKind,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.ledger.counts[self.kind.slot()].fetch_sub(1, Ordering::SeqCst);
    }
}

/// 台帳に登録された値
pub struct Tracked<T> {
    value: T,
    lease: Lease,
}

impl<T> Tracked<T> {
    pub fn kind(&self) -> ResourceKind {
        self.lease.kind
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("kind", &self.lease.kind)
            .field("value", &self.value)
            .finish()
    }
}
