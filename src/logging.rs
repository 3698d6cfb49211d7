//! ログ基盤
//!
//! tracingによるJSON形式の構造化ログを設定する。

use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// ログサブスクライバーを初期化する
///
/// `RUST_LOG`環境変数でログレベルを制御する（デフォルト: info）。
/// 複数回呼び出しても最初の呼び出しのみ初期化を実行する。
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .flatten_event(true)
            .with_current_span(false);

        // テストハーネス等で既にグローバルサブスクライバーが設定されている場合は何もしない
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_idempotent() {
        init_logging();
        init_logging();
        tracing::info!("ログ初期化後の出力");
    }
}
