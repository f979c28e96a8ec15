//! 押している間だけサンプルを取り込む収集ループ

use burn::tensor::backend::Backend;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::schedule::LoopToken;
use super::{capture_feature, LoopContext};
use crate::events::Notice;

struct ActiveCollection {
    class_id: usize,
    token: LoopToken,
    task: JoinHandle<()>,
}

/// 収集コントローラ（Idle -> Collecting -> Idle）
///
/// システム全体で同時に動く収集は1つだけです。
pub struct CollectionController {
    interval: Duration,
    active: Mutex<Option<ActiveCollection>>,
}

impl CollectionController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveCollection>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 収集中のクラス（エラーで自然終了したものは含まない）
    pub fn active_class(&self) -> Option<usize> {
        self.slot()
            .as_ref()
            .filter(|active| !active.token.is_cancelled())
            .map(|active| active.class_id)
    }

    /// 収集ループを開始する。既に収集中なら何もせず `false`
    pub fn start<B: Backend>(
        &self,
        class_id: usize,
        context: LoopContext<B>,
        runtime: &Handle,
    ) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|active| !active.token.is_cancelled()) {
            debug!(class_id, "既に収集中のため開始要求を無視しました");
            return false;
        }

        let token = LoopToken::new();
        let task = runtime.spawn(run_collection(
            context,
            class_id,
            token.clone(),
            self.interval,
        ));
        *slot = Some(ActiveCollection {
            class_id,
            token,
            task,
        });
        info!(class_id, "サンプル収集を開始しました");
        true
    }

    /// 収集を止め、実行中の1反復が終わるまで待つ
    ///
    /// 収集中だった場合はそのクラスIDを返します。何度呼んでも安全です。
    pub async fn stop(&self) -> Option<usize> {
        let active = self.slot().take()?;
        let was_running = !active.token.is_cancelled();
        active.token.cancel();
        if let Err(e) = active.task.await {
            warn!("収集タスクが異常終了しました: {}", e);
        }

        if was_running {
            info!(class_id = active.class_id, "サンプル収集を停止しました");
            Some(active.class_id)
        } else {
            None
        }
    }
}

async fn run_collection<B: Backend>(
    context: LoopContext<B>,
    class_id: usize,
    token: LoopToken,
    interval: Duration,
) {
    while !token.is_cancelled() {
        let appended = capture_feature(&context).await.and_then(|feature| {
            let mut session = context.state.lock();
            // 学習中に取れたサンプルは捨てる
            if context.state.is_training() {
                Ok(None)
            } else {
                session.append_sample(class_id, &feature).map(Some)
            }
        });

        match appended {
            Ok(Some(count)) => context.events.sample_added(class_id, count),
            Ok(None) => debug!(class_id, "学習中のためサンプルを破棄しました"),
            Err(e) => {
                warn!(class_id, "サンプル収集を中断しました: {}", e);
                token.cancel();
                context.events.notice(&Notice::error(e.to_string()));
                context.events.collection_stopped(class_id);
                return;
            }
        }

        if !token.pause(interval).await {
            break;
        }
    }
}
