//! ログ出力の初期化
//!
//! tracingのfmtサブスクライバを標準出力へ設定します。
//! 2回目以降の呼び出しは何もしません。

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// ログを初期化
///
/// `RUST_LOG` が設定されていればそちらを優先し、なければ `default_filter` を使います。
pub fn init(default_filter: &str) -> anyhow::Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(build_env_filter(default_filter))
        .with(fmt::layer().with_target(false));
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("ログの初期化に失敗しました: {}", e))?;
    let _ = INITIALIZED.set(());

    tracing::debug!(filter = default_filter, "ログを初期化しました");
    Ok(())
}

fn build_env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
