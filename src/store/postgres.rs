//! PostgreSQL書籍ストア
//!
//! `tokio-postgres`の単一クライアントを全リクエストで共有する。
//! クライアントは`&self`で並行にクエリを発行でき、内部でパイプライン化される。

use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_postgres::{Client, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;

use super::{BookStore, StoreError, book_id_from_db};
use crate::book::{Book, BookId, NewBook};
use crate::config::{DbConfig, SslMode};

/// booksテーブルのスキーマ
///
/// 既存テーブルに欠けているNULL許容カラムは追加する（削除は行わない）。
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id BIGSERIAL PRIMARY KEY,
    author TEXT NOT NULL,
    title TEXT,
    publisher TEXT
);
ALTER TABLE books ADD COLUMN IF NOT EXISTS title TEXT;
ALTER TABLE books ADD COLUMN IF NOT EXISTS publisher TEXT;
"#;

/// PostgreSQL書籍ストア
pub struct PostgresBookStore {
    client: Client,
}

impl PostgresBookStore {
    /// PostgreSQLに接続する
    ///
    /// `DB_SSL=disable`の場合は平文で、それ以外はrustlsで接続する。
    /// 接続駆動タスクはランタイム上にspawnされ、終了時のエラーはログに記録する。
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let pg_config = pg_config(config);

        tracing::info!(
            host = %config.host,
            port = config.port,
            dbname = %config.name,
            ssl_mode = ?config.ssl_mode,
            "PostgreSQLに接続します"
        );

        let client = match cert_verification(config.ssl_mode) {
            None => {
                let (client, connection) = pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!(error = %e, "PostgreSQL接続が切断されました");
                    }
                });
                client
            }
            Some(verification) => {
                let (client, connection) = pg_config
                    .connect(tls_connector(verification)?)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!(error = %e, "PostgreSQL接続が切断されました");
                    }
                });
                client
            }
        };

        Ok(Self { client })
    }

    fn row_to_book(row: &Row) -> Result<Book, StoreError> {
        let id: i64 = row.try_get("id")?;
        Ok(Book {
            id: book_id_from_db(id)?,
            author: row.try_get("author")?,
            title: row.try_get("title")?,
            publisher: row.try_get("publisher")?,
        })
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// `DbConfig`から`tokio_postgres::Config`を構築
///
/// tokio-postgresは`verify-*`を持たないため、証明書検証はTLSコネクター側で行う。
fn pg_config(config: &DbConfig) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .user(&config.user)
        .password(&config.password)
        .dbname(&config.name)
        .ssl_mode(match config.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                tokio_postgres::config::SslMode::Require
            }
        });
    pg
}

/// サーバー証明書の検証方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CertVerification {
    /// 暗号化のみ行い、証明書は検証しない（libpqのprefer/require相当）
    EncryptOnly,
    /// webpkiルート証明書で証明書チェーンとホスト名を検証する
    WebPki,
}

/// TLSモードに対応する証明書検証方針（平文接続の場合は`None`）
fn cert_verification(mode: SslMode) -> Option<CertVerification> {
    match mode {
        SslMode::Disable => None,
        SslMode::Prefer | SslMode::Require => Some(CertVerification::EncryptOnly),
        SslMode::VerifyCa | SslMode::VerifyFull => Some(CertVerification::WebPki),
    }
}

/// 任意のサーバー証明書を受け入れる検証器
///
/// ハンドシェイク署名の検証はプロバイダーのアルゴリズムで通常どおり行う。
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// 検証方針に応じたrustlsコネクターを作成
fn tls_connector(verification: CertVerification) -> Result<MakeRustlsConnect, StoreError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    let tls_config = match verification {
        CertVerification::EncryptOnly => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth(),
        CertVerification::WebPki => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
    };

    Ok(MakeRustlsConnect::new(tls_config))
}

#[async_trait]
impl BookStore for PostgresBookStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    async fn create_book(&self, book: &NewBook) -> Result<Book, StoreError> {
        let row = self
            .client
            .query_one(
                "INSERT INTO books (author, title, publisher) VALUES ($1, $2, $3) \
                 RETURNING id, author, title, publisher",
                &[&book.author, &book.title, &book.publisher],
            )
            .await?;
        Self::row_to_book(&row)
    }

    async fn list_books(&self) -> Result<Vec<Book>, StoreError> {
        let rows = self
            .client
            .query("SELECT id, author, title, publisher FROM books", &[])
            .await?;
        rows.iter().map(Self::row_to_book).collect()
    }

    async fn get_book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        // BIGSERIALに収まらないIDは行として存在し得ない
        let Ok(key) = i64::try_from(id) else {
            return Ok(None);
        };
        let row = self
            .client
            .query_opt(
                "SELECT id, author, title, publisher FROM books WHERE id = $1",
                &[&key],
            )
            .await?;
        row.as_ref().map(Self::row_to_book).transpose()
    }

    async fn delete_book(&self, id: BookId) -> Result<u64, StoreError> {
        let Ok(key) = i64::try_from(id) else {
            return Ok(0);
        };
        let rows_affected = self
            .client
            .execute("DELETE FROM books WHERE id = $1", &[&key])
            .await?;
        Ok(rows_affected)
    }
}
