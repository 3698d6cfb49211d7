//! 書籍ストア
//!
//! 書籍レコードの永続化を`BookStore`トレイトで抽象化する。
//! - PostgreSQL: `tokio-postgres`の単一クライアント（並行クエリはパイプライン化される）
//! - SQLite: 書き込み専用の単一接続 + deadpool-sqliteによる読み取りプール

mod postgres;
mod sqlite;

pub use postgres::PostgresBookStore;
pub use sqlite::SqliteBookStore;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::book::{Book, BookId, NewBook};
use crate::config::{DbConfig, DbDriver};

/// ストアエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// 接続確立エラー
    #[error("接続エラー: {0}")]
    Connection(String),

    /// スキーマ作成エラー
    #[error("マイグレーションエラー: {0}")]
    Migration(String),

    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(String),

    /// プール取得エラー
    #[error("プールエラー: {0}")]
    Pool(String),
}

/// 書籍の永続化を行うトレイト
///
/// 各操作はデータベースへの呼び出しを1回だけ行う。
#[async_trait]
pub trait BookStore: Send + Sync {
    /// booksテーブルが存在することを保証する（冪等）
    async fn migrate(&self) -> Result<(), StoreError>;

    /// 書籍を追加し、採番されたIDを含む書籍を返す
    async fn create_book(&self, book: &NewBook) -> Result<Book, StoreError>;

    /// 全書籍を取得（順序は保証しない）
    async fn list_books(&self) -> Result<Vec<Book>, StoreError>;

    /// IDで書籍を取得
    ///
    /// # Returns
    /// * `Ok(Some(Book))` - 見つかった
    /// * `Ok(None)` - 該当する行がない
    async fn get_book(&self, id: BookId) -> Result<Option<Book>, StoreError>;

    /// IDで書籍を削除し、削除された行数を返す
    ///
    /// 存在しないIDの削除はエラーではなく`Ok(0)`になる。
    async fn delete_book(&self, id: BookId) -> Result<u64, StoreError>;
}

/// 設定に従ってストアに接続する
///
/// 接続の再試行は行わない。
pub async fn connect(config: &DbConfig) -> Result<Arc<dyn BookStore>, StoreError> {
    match config.driver {
        DbDriver::Postgres => Ok(Arc::new(PostgresBookStore::connect(config).await?)),
        DbDriver::Sqlite => Ok(Arc::new(SqliteBookStore::open(&config.name).await?)),
    }
}

/// DBの整数IDを`BookId`に変換
fn book_id_from_db(id: i64) -> Result<BookId, StoreError> {
    BookId::try_from(id).map_err(|_| StoreError::Database(format!("不正なID: {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_book_id_from_db_rejects_negative() {
        assert_eq!(book_id_from_db(12).unwrap(), 12);
        assert!(matches!(book_id_from_db(-1), Err(StoreError::Database(_))));
    }

    /// sqliteドライバー設定でSqliteBookStoreに接続できることを確認
    #[tokio::test]
    async fn test_connect_sqlite_driver() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("connect.db");
        let config = DbConfig::sqlite(path.to_string_lossy().to_string());

        let store = connect(&config).await.unwrap();
        store.migrate().await.unwrap();

        assert!(store.list_books().await.unwrap().is_empty());
    }
}
