//! SQLite書籍ストア
//!
//! - 書き込み: 専用の単一接続（Arc<Mutex<Connection>>）
//! - 読み取り: deadpool-sqliteによるasync接続プール

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{Connection, OptionalExtension, Row};

use super::{BookStore, StoreError, book_id_from_db};
use crate::book::{Book, BookId, NewBook};

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<deadpool_sqlite::PoolError> for StoreError {
    fn from(err: deadpool_sqlite::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

impl From<deadpool_sqlite::InteractError> for StoreError {
    fn from(err: deadpool_sqlite::InteractError) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// 接続時に設定するPRAGMA
const PRAGMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
"#;

/// booksテーブルのスキーマ
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author TEXT NOT NULL,
    title TEXT,
    publisher TEXT
);
"#;

/// 既存テーブルに欠けていれば追加するNULL許容カラム
const OPTIONAL_COLUMNS: &[&str] = &["title", "publisher"];

const SELECT_COLUMNS: &str = "SELECT id, author, title, publisher FROM books";

/// booksテーブルの1行（id, author, title, publisher）
type BookRow = (i64, String, Option<String>, Option<String>);

/// SQLite書籍ストア
pub struct SqliteBookStore {
    /// 書き込み専用接続
    write_conn: Arc<Mutex<Connection>>,
    /// 読み取り用async接続プール
    read_pool: Pool,
}

impl SqliteBookStore {
    /// データベースファイルを開く
    ///
    /// WALモードを有効にし、書き込み用単一接続と読み取り用プールを構成する。
    /// スキーマの作成は`migrate`で行う。
    pub async fn open(db_path: &str) -> Result<Self, StoreError> {
        let write_conn =
            Connection::open(db_path).map_err(|e| StoreError::Connection(e.to_string()))?;
        write_conn
            .execute_batch(PRAGMA_SQL)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let read_pool = Config::new(db_path)
            .builder(Runtime::Tokio1)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .max_size(4)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::debug!(db_path, "SQLiteデータベースを開きました");

        Ok(Self {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
        })
    }

    /// 書き込み用接続でクロージャを実行する
    async fn with_write_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.write_conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| {
                StoreError::Database("書き込み接続のロックが破損しています".to_string())
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Database(format!("タスク実行エラー: {}", e)))?
    }

    fn apply_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(SCHEMA_SQL)?;

        let existing: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('books')")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for column in OPTIONAL_COLUMNS {
            if !existing.iter().any(|c| c == column) {
                tracing::info!(column, "booksテーブルにカラムを追加");
                conn.execute_batch(&format!("ALTER TABLE books ADD COLUMN {} TEXT", column))?;
            }
        }
        Ok(())
    }

    fn read_row(row: &Row<'_>) -> Result<BookRow, rusqlite::Error> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn into_book((id, author, title, publisher): BookRow) -> Result<Book, StoreError> {
        Ok(Book {
            id: book_id_from_db(id)?,
            author,
            title,
            publisher,
        })
    }
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.with_write_conn(|conn| {
            Self::apply_schema(conn).map_err(|e| StoreError::Migration(e.to_string()))
        })
        .await
    }

    async fn create_book(&self, book: &NewBook) -> Result<Book, StoreError> {
        let book = book.clone();

        self.with_write_conn(move |conn| {
            conn.execute(
                "INSERT INTO books (author, title, publisher) VALUES (?1, ?2, ?3)",
                rusqlite::params![&book.author, &book.title, &book.publisher],
            )?;
            let id = book_id_from_db(conn.last_insert_rowid())?;
            Ok(book.into_book(id))
        })
        .await
    }

    async fn list_books(&self) -> Result<Vec<Book>, StoreError> {
        let conn = self.read_pool.get().await?;

        conn.interact(|conn| -> Result<Vec<Book>, StoreError> {
            let rows = conn
                .prepare(SELECT_COLUMNS)?
                .query_map([], Self::read_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(Self::into_book).collect()
        })
        .await?
    }

    async fn get_book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        // i64に収まらないIDは行として存在し得ない
        let Ok(key) = i64::try_from(id) else {
            return Ok(None);
        };
        let conn = self.read_pool.get().await?;

        conn.interact(move |conn| -> Result<Option<Book>, StoreError> {
            let row = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    [key],
                    Self::read_row,
                )
                .optional()?;
            row.map(Self::into_book).transpose()
        })
        .await?
    }

    async fn delete_book(&self, id: BookId) -> Result<u64, StoreError> {
        let Ok(key) = i64::try_from(id) else {
            return Ok(0);
        };

        self.with_write_conn(move |conn| {
            let rows_affected = conn.execute("DELETE FROM books WHERE id = ?1", [key])?;
            Ok(rows_affected as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// テスト用の一時データベースパスを生成
    fn temp_db_path() -> (tempfile::TempDir, String) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("books.db");
        (dir, path.to_string_lossy().to_string())
    }

    async fn migrated_store() -> (SqliteBookStore, tempfile::TempDir) {
        let (dir, db_path) = temp_db_path();
        let store = SqliteBookStore::open(&db_path).await.unwrap();
        store.migrate().await.unwrap();
        (store, dir)
    }

    fn new_book(author: &str, title: &str) -> NewBook {
        NewBook {
            author: author.to_string(),
            title: Some(title.to_string()),
            publisher: None,
        }
    }

    // ========================================
    // マイグレーションのテスト
    // ========================================

    #[tokio::test]
    async fn test_migrate_creates_books_table() {
        let (dir, db_path) = temp_db_path();
        let store = SqliteBookStore::open(&db_path).await.unwrap();

        store.migrate().await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='books'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        drop(dir);
    }

    /// マイグレーションを繰り返してもエラーにならず、データも失われないことを確認
    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (store, _dir) = migrated_store().await;
        store.create_book(&new_book("Tolkien", "The Hobbit")).await.unwrap();

        store.migrate().await.unwrap();
        store.migrate().await.unwrap();

        let books = store.list_books().await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].author, "Tolkien");
    }

    /// 古いスキーマに欠けているカラムが追加されることを確認
    #[tokio::test]
    async fn test_migrate_adds_missing_columns() {
        let (dir, db_path) = temp_db_path();
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE books (id INTEGER PRIMARY KEY AUTOINCREMENT, author TEXT NOT NULL);
                 INSERT INTO books (author) VALUES ('Le Guin');",
            )
            .unwrap();
        }
        let store = SqliteBookStore::open(&db_path).await.unwrap();

        store.migrate().await.unwrap();

        let books = store.list_books().await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].author, "Le Guin");
        assert_eq!(books[0].title, None);
        drop(dir);
    }

    #[tokio::test]
    async fn test_open_invalid_path_returns_connection_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("books.db");

        let result = SqliteBookStore::open(&path.to_string_lossy()).await;

        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    // ========================================
    // CRUDのテスト
    // ========================================

    #[tokio::test]
    async fn test_create_book_assigns_incrementing_ids() {
        let (store, _dir) = migrated_store().await;

        let first = store.create_book(&new_book("A", "first")).await.unwrap();
        let second = store.create_book(&new_book("B", "second")).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.title.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_get_book_returns_created_book() {
        let (store, _dir) = migrated_store().await;
        let created = store
            .create_book(&NewBook {
                author: "Herbert".to_string(),
                title: Some("Dune".to_string()),
                publisher: Some("Chilton".to_string()),
            })
            .await
            .unwrap();

        let found = store.get_book(created.id).await.unwrap();

        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn test_get_book_missing_returns_none() {
        let (store, _dir) = migrated_store().await;

        assert_eq!(store.get_book(999).await.unwrap(), None);
        assert_eq!(store.get_book(u64::MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_books_empty() {
        let (store, _dir) = migrated_store().await;

        assert!(store.list_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_book_removes_row() {
        let (store, _dir) = migrated_store().await;
        let created = store.create_book(&new_book("A", "gone")).await.unwrap();

        let deleted = store.delete_book(created.id).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.get_book(created.id).await.unwrap(), None);
    }

    /// 存在しないIDの削除はエラーにならず0行を返すことを確認
    #[tokio::test]
    async fn test_delete_missing_book_affects_zero_rows() {
        let (store, _dir) = migrated_store().await;

        assert_eq!(store.delete_book(12345).await.unwrap(), 0);
    }

    /// マイグレーション前の操作はデータベースエラーになることを確認
    #[tokio::test]
    async fn test_operations_before_migrate_fail() {
        let (dir, db_path) = temp_db_path();
        let store = SqliteBookStore::open(&db_path).await.unwrap();

        let result = store.create_book(&new_book("A", "t")).await;

        assert!(matches!(result, Err(StoreError::Database(_))));
        drop(dir);
    }
}
