//! 書籍モデル
//!
//! HTTP APIのリクエスト/レスポンスとストアの間で受け渡す型を定義する。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 書籍ID（DBの自動採番による主キー）
pub type BookId = u64;

/// 保存済みの書籍
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Book {
    /// 書籍ID
    pub id: BookId,
    /// 著者（ストア上はNOT NULL）
    pub author: String,
    /// タイトル
    pub title: Option<String>,
    /// 出版社
    pub publisher: Option<String>,
}

/// 書籍作成リクエストのボディ
///
/// すべてのフィールドが省略可能な形で受け取り、必須チェックは
/// `NewBook`への変換時に行う。`id`など未知のフィールドは無視する。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookPayload {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
}

/// 検証済みの新規書籍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub author: String,
    pub title: Option<String>,
    pub publisher: Option<String>,
}

/// 入力検証エラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// 著者が指定されていない
    #[error("author is required")]
    MissingAuthor,
}

impl TryFrom<BookPayload> for NewBook {
    type Error = ValidationError;

    fn try_from(payload: BookPayload) -> Result<Self, Self::Error> {
        let author = payload.author.ok_or(ValidationError::MissingAuthor)?;
        Ok(Self {
            author,
            title: payload.title,
            publisher: payload.publisher,
        })
    }
}

impl NewBook {
    /// 採番されたIDと組み合わせて`Book`を作成
    pub fn into_book(self, id: BookId) -> Book {
        Book {
            id,
            author: self.author,
            title: self.title,
            publisher: self.publisher,
        }
    }
}
