//! 学習の実行管理
//!
//! 学習本体はブロッキングスレッドで走らせ、エポックごとの進捗だけを
//! チャネル経由で非同期側へ返します。

use burn::tensor::backend::Backend;
use burn_autodiff::Autodiff;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::schedule::LoopToken;
use crate::error::{Result, SessionError};
use crate::events::SessionEvents;
use crate::ml::{fit_classifier, Hyperparameters, TrainedClassifier, TrainingSummary};
use crate::resources::ResourceKind;
use crate::session::SessionState;

/// 学習オーケストレータ
///
/// 新しい分類器は学習が最後まで成功した時点で差し替えます。
/// 失敗した場合は以前の分類器がそのまま残ります。
pub struct TrainingOrchestrator {
    seed: u64,
    abort: Mutex<Option<LoopToken>>,
}

impl TrainingOrchestrator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            abort: Mutex::new(None),
        }
    }

    fn abort_slot(&self) -> MutexGuard<'_, Option<LoopToken>> {
        self.abort.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 実行中の学習に中断を要求する（次のエポック境界で止まる）
    pub fn abort(&self) {
        if let Some(token) = self.abort_slot().take() {
            token.cancel();
        }
    }

    /// 学習を実行
    ///
    /// 既に学習中の場合、または学習中にリセットされて結果を破棄した場合は
    /// `Ok(None)` を返します。
    pub async fn train<B: Backend>(
        &self,
        state: &Arc<SessionState<B>>,
        hyperparameters: Hyperparameters,
        events: &Arc<dyn SessionEvents>,
    ) -> Result<Option<TrainingSummary>> {
        let Some(_flag) = state.begin_training() else {
            info!("既に学習中のため要求を無視しました");
            return Ok(None);
        };

        let input = state.lock().training_input()?;
        hyperparameters.validate()?;
        let (device, ledger) = {
            let session = state.lock();
            (session.device().clone(), session.ledger().clone())
        };

        let token = LoopToken::new();
        *self.abort_slot() = Some(token.clone());

        let seed = self.seed;
        let snapshot = input.snapshot;
        let (dim, num_classes) = (snapshot.dim, snapshot.num_classes);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let task_device = device.clone();
        let task = tokio::task::spawn_blocking(move || {
            // スナップショットとone-hotバッファはこのスコープで解放される
            fit_classifier::<Autodiff<B>, _>(
                &snapshot,
                hyperparameters,
                seed,
                &task_device,
                &ledger,
                |report| {
                    // 受信側が先に落ちても学習は続ける
                    let _ = progress_tx.send(report.clone());
                    !token.is_cancelled()
                },
            )
            .map(|(model, summary)| (ledger.track(ResourceKind::Classifier, model), summary))
        });

        while let Some(report) = progress_rx.recv().await {
            events.training_progress(&report);
        }
        let outcome = task
            .await
            .map_err(|e| SessionError::Training(format!("学習タスクが異常終了しました: {}", e)));
        self.abort_slot().take();

        match outcome.and_then(|result| result) {
            Ok((model, summary)) => {
                let classifier = TrainedClassifier::new(model, device, dim, num_classes);
                let installed = state.lock().install_classifier(
                    classifier,
                    input.class_names,
                    input.generation,
                );
                if !installed {
                    info!("学習中にリセットされたため結果を破棄しました");
                    return Ok(None);
                }
                events.training_finished(&summary);
                Ok(Some(summary))
            }
            Err(_) if state.lock().generation() != input.generation => {
                info!("学習中にリセットされたため学習を中断しました");
                Ok(None)
            }
            Err(e) => {
                warn!("学習に失敗しました: {}", e);
                Err(e)
            }
        }
    }
}
