//! 書籍レコードのCRUDを提供するHTTP APIサーバー
//!
//! 本バイナリは以下の機能を提供する:
//! - 書籍の作成 (POST /api/create_books)
//! - 書籍の一覧 (GET /api/books)
//! - 書籍の取得 (GET /api/get_book/{id})
//! - 書籍の削除 (DELETE /api/delete_books/{id})
//! - ヘルスチェック (GET /health)

mod book;
mod config;
mod error;
mod handlers;
mod logging;
mod store;

use std::net::SocketAddr;

use thiserror::Error;
use tokio::signal;

use crate::config::{ConfigError, DbConfig};
use crate::handlers::create_router;
use crate::store::StoreError;

/// リッスンポート
const LISTEN_PORT: u16 = 8080;

/// 起動時エラー
///
/// いずれも致命的で、プロセスを終了する。
#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("アドレスのバインドに失敗しました: {0}")]
    Bind(std::io::Error),

    #[error("サーバーエラー: {0}")]
    Serve(std::io::Error),
}

/// シャットダウンシグナルを待機する
///
/// SIGTERMまたはCtrl+C (SIGINT) を待機し、いずれかを受信したらリターンする。
/// シグナルハンドラーの登録に失敗した場合は、そのシグナルでは停止しない。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C シグナルハンドラーの登録に失敗しました");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM シグナルハンドラーの登録に失敗しました");
                std::future::pending::<()>().await;
            }
        }
    };

    // Windows等の非Unix環境ではSIGTERMは利用不可
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C (SIGINT) を受信しました。graceful shutdownを開始します");
        }
        _ = terminate => {
            tracing::info!("SIGTERM を受信しました。graceful shutdownを開始します");
        }
    }
}

/// 設定の読み込みからサーバー停止までを実行する
async fn run() -> Result<(), StartupError> {
    let db_config = DbConfig::load(config::ENV_FILE)?;
    tracing::info!(config = ?db_config, "設定を読み込みました");

    let store = store::connect(&db_config).await?;
    tracing::info!("データベースに接続しました");

    store.migrate().await?;
    tracing::info!("スキーマを初期化しました");

    let app = create_router(store);

    let addr = SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(StartupError::Bind)?;
    tracing::info!("リッスン開始: {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)?;

    Ok(())
}

/// メイン関数
///
/// # 環境変数（`.env`から読み込み）
/// - `DB_DRIVER`: `postgres`（デフォルト）または`sqlite`
/// - `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASS`, `DB_NAME`, `DB_SSL`: 接続設定
/// - `RUST_LOG`: ログレベル（デフォルト: info）
#[tokio::main]
async fn main() {
    logging::init_logging();
    tracing::info!("書籍APIサーバーを起動します");

    if let Err(e) = run().await {
        tracing::error!(error = %e, "起動に失敗しました");
        std::process::exit(1);
    }

    tracing::info!("サーバーが正常に停止しました");
}
