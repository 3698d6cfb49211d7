//! 書籍APIのハンドラーとルーター
//!
//! 各ハンドラーはストアへの呼び出しを1回だけ行い、結果をHTTPステータスと
//! JSONボディに変換する。
//! - 書籍の作成 (POST /api/create_books)
//! - 書籍の一覧 (GET /api/books)
//! - 書籍の取得 (GET /api/get_book/{id})
//! - 書籍の削除 (DELETE /api/delete_books/{id})
//! - ヘルスチェック (GET /health)

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::book::{BookId, BookPayload, NewBook};
use crate::error::ApiError;
use crate::store::BookStore;

const ID_EMPTY_MESSAGE: &str = "id cannot be empty";
const INVALID_ID_MESSAGE: &str = "invalid book id";

/// アプリケーション状態
///
/// 起動時に構築したストアを全ハンドラーで共有する。
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookStore>,
}

/// メッセージのみのレスポンス
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// メッセージとデータを含むレスポンス
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataResponse<T> {
    pub message: String,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// パスパラメータを書籍IDに変換
///
/// 空のIDは500、数値でないIDは400として扱う。
/// 符号付きの表記（`+1`等）も数値でないIDとみなす。
fn parse_book_id(raw: &str) -> Result<BookId, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::internal_error(ID_EMPTY_MESSAGE));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::bad_request(INVALID_ID_MESSAGE));
    }
    raw.parse::<BookId>()
        .map_err(|_| ApiError::bad_request(INVALID_ID_MESSAGE))
}

/// ヘルスチェックエンドポイント
async fn health() -> &'static str {
    "OK"
}

/// 書籍作成エンドポイント (POST /api/create_books)
///
/// # Returns
/// - 201 Created: 書籍が保存された（採番されたIDを含む書籍を返す）
/// - 422 Unprocessable Entity: リクエストボディが解析できない
/// - 400 Bad Request: authorが未指定、または保存に失敗
async fn create_book(
    State(state): State<AppState>,
    payload: Result<Json<BookPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "リクエストボディの解析に失敗");
            return ApiError::unprocessable_entity("Request failed").into_response();
        }
    };

    let new_book = match NewBook::try_from(payload) {
        Ok(book) => book,
        Err(e) => {
            tracing::warn!(error = %e, "書籍の入力検証に失敗");
            return ApiError::bad_request(e.to_string()).into_response();
        }
    };

    match state.store.create_book(&new_book).await {
        Ok(book) => {
            tracing::info!(book_id = book.id, "書籍を作成");
            (
                StatusCode::CREATED,
                Json(DataResponse::new("book has been added", book)),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "書籍作成エラー");
            ApiError::bad_request("error creating db book").into_response()
        }
    }
}

/// 書籍一覧エンドポイント (GET /api/books)
///
/// # Returns
/// - 200 OK: 全書籍（順序は保証しない）
/// - 400 Bad Request: データベースエラー
async fn list_books(State(state): State<AppState>) -> Response {
    match state.store.list_books().await {
        Ok(books) => {
            tracing::info!(count = books.len(), "書籍一覧を返却");
            Json(DataResponse::new("Books found", books)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "書籍一覧取得エラー");
            ApiError::bad_request("couldn't get the books").into_response()
        }
    }
}

/// 書籍取得エンドポイント (GET /api/get_book/{id})
///
/// # Returns
/// - 200 OK: 書籍
/// - 400 Bad Request: IDが数値でない、またはデータベースエラー
/// - 404 Not Found: 該当する書籍がない
/// - 500 Internal Server Error: IDが空
async fn get_book(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_book_id(&raw_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(
                raw_id = %raw_id,
                status = %e.status(),
                reason = e.message(),
                "不正な書籍ID"
            );
            return e.into_response();
        }
    };

    match state.store.get_book(id).await {
        Ok(Some(book)) => Json(DataResponse::new("book found", book)).into_response(),
        Ok(None) => {
            tracing::info!(book_id = id, "書籍が見つからない");
            ApiError::not_found("book not found").into_response()
        }
        Err(e) => {
            tracing::error!(book_id = id, error = %e, "書籍取得エラー");
            ApiError::bad_request("couldn't get the book").into_response()
        }
    }
}

/// 書籍削除エンドポイント (DELETE /api/delete_books/{id})
///
/// 存在確認は行わず、該当行がなくても成功として扱う。
///
/// # Returns
/// - 200 OK: 削除した（または該当行がなかった）
/// - 400 Bad Request: IDが数値でない
/// - 500 Internal Server Error: IDが空、またはデータベースエラー
async fn delete_book(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_book_id(&raw_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(
                raw_id = %raw_id,
                status = %e.status(),
                reason = e.message(),
                "不正な書籍ID"
            );
            return e.into_response();
        }
    };

    match state.store.delete_book(id).await {
        Ok(rows_affected) => {
            if rows_affected == 0 {
                tracing::warn!(book_id = id, "削除対象の書籍が存在しない");
            } else {
                tracing::info!(book_id = id, "書籍を削除");
            }
            Json(MessageResponse::new("book deleted successfully")).into_response()
        }
        Err(e) => {
            tracing::error!(book_id = id, error = %e, "書籍削除エラー");
            ApiError::internal_error("could not delete book").into_response()
        }
    }
}

/// IDなしで呼ばれた取得・削除エンドポイント (`/api/get_book/`, `/api/delete_books/`)
async fn missing_book_id() -> ApiError {
    tracing::warn!("書籍IDが指定されていない");
    ApiError::internal_error(ID_EMPTY_MESSAGE)
}

/// ルーターを構築する
///
/// 書籍APIを`/api`以下に配置し、`/health`はその外に置く。
/// TraceLayerによりリクエスト/レスポンスの構造化ログを自動記録する。
pub fn create_router(store: Arc<dyn BookStore>) -> Router {
    let api = Router::new()
        .route("/create_books", post(create_book))
        .route("/books", get(list_books))
        .route("/get_book/", get(missing_book_id))
        .route("/get_book/{id}", get(get_book))
        .route("/delete_books/", delete(missing_book_id))
        .route("/delete_books/{id}", delete(delete_book));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        // リクエストトレーシングレイヤー（method, path, status, latencyを自動記録）
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}
