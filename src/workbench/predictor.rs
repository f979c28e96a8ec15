//! 連続推論ループ

use burn::tensor::backend::Backend;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::schedule::LoopToken;
use super::{capture_feature, LoopContext};
use crate::events::Notice;

struct ActiveInference {
    token: LoopToken,
    task: JoinHandle<()>,
}

/// 推論ループ（Stopped -> Running -> Stopped）
pub struct InferenceLoop {
    period: Duration,
    active: Mutex<Option<ActiveInference>>,
}

impl InferenceLoop {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveInference>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|active| !active.token.is_cancelled())
    }

    /// ループを開始する。既に動いていれば `false`
    pub fn start<B: Backend>(&self, context: LoopContext<B>, runtime: &Handle) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|active| !active.token.is_cancelled()) {
            return false;
        }

        let token = LoopToken::new();
        let task = runtime.spawn(run_inference(context, token.clone(), self.period));
        *slot = Some(ActiveInference { token, task });
        info!(period_ms = self.period.as_millis() as u64, "推論を開始しました");
        true
    }

    /// ループを止め、実行中の1サイクルが終わるまで待つ
    pub async fn stop(&self) -> bool {
        let Some(active) = self.slot().take() else {
            return false;
        };
        let was_running = !active.token.is_cancelled();
        active.token.cancel();
        if let Err(e) = active.task.await {
            warn!("推論タスクが異常終了しました: {}", e);
        }
        if was_running {
            info!("推論を停止しました");
        }
        was_running
    }
}

async fn run_inference<B: Backend>(context: LoopContext<B>, token: LoopToken, period: Duration) {
    while !token.is_cancelled() {
        let started = Instant::now();

        let prediction = capture_feature(&context)
            .await
            .and_then(|feature| context.state.lock().predict(&feature));

        match prediction {
            Ok(prediction) => context.events.prediction(&prediction),
            Err(e) => {
                warn!("推論を中断しました: {}", e);
                token.cancel();
                context.events.notice(&Notice::error(e.to_string()));
                return;
            }
        }

        if !token.pause(period.saturating_sub(started.elapsed())).await {
            break;
        }
    }
}
