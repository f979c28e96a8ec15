//! 協調的なループ停止用のトークンと、ループを動かすランタイム

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tracing::info;

use crate::error::Result;

/// ループ用のワーカースレッド数
const LOOP_WORKERS: usize = 2;

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// ループ停止トークン
///
/// ループは各反復の前に `is_cancelled` を確認し、待機は `pause` で行います。
/// 実行中の反復を強制的に止めることはありません。
#[derive(Debug, Clone, Default)]
pub struct LoopToken {
    inner: Arc<TokenInner>,
}

impl LoopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `duration` だけ待つ。待機中に停止された場合は即座に `false` を返す
    pub async fn pause(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = &mut notified => false,
        }
    }
}

/// 収集・推論ループを載せるランタイム
///
/// 呼び出し元がTokioランタイム上にいればそれを使い、いなければ初回に専用の
/// ランタイムを起動して以降も使い回します。
#[derive(Debug, Default)]
pub struct LoopRuntime {
    owned: Mutex<Option<Runtime>>,
}

impl LoopRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Result<Handle> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(handle);
        }

        let mut owned = self.owned.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = owned.as_ref() {
            return Ok(runtime.handle().clone());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(LOOP_WORKERS)
            .thread_name("teachable-loop")
            .enable_all()
            .build()?;
        info!("ループ用のランタイムを起動しました");
        let handle = runtime.handle().clone();
        *owned = Some(runtime);
        Ok(handle)
    }

    /// 専用ランタイムを起動済みかどうか
    pub fn is_owned(&self) -> bool {
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for LoopRuntime {
    fn drop(&mut self) {
        // 非同期コンテキスト内でドロップされてもブロックしない
        let owned = self.owned.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = owned.take() {
            runtime.shutdown_background();
        }
    }
}
