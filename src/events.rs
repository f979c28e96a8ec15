//! 表示層への通知
//!
//! コントローラは状態が変わるたびに `SessionEvents` を呼び出します。
//! デスクトップ版ではTauriのイベントへ、テストでは記録用の実装へ流れます。

use serde::Serialize;

use crate::ml::{EpochReport, TrainingSummary};
use crate::prediction::Prediction;
use crate::session::ClassLabel;

/// 通知の重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// 一時的な通知（トースト表示用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// セッションイベントの受け口
pub trait SessionEvents: Send + Sync {
    fn classes_changed(&self, _classes: &[ClassLabel], _ready: bool) {}

    fn sample_added(&self, _class_id: usize, _count: usize) {}

    fn collection_stopped(&self, _class_id: usize) {}

    fn training_progress(&self, _report: &EpochReport) {}

    fn training_finished(&self, _summary: &TrainingSummary) {}

    fn prediction(&self, _prediction: &Prediction) {}

    fn notice(&self, _notice: &Notice) {}
}

/// 何もしない受け口
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl SessionEvents for NoopEvents {}
