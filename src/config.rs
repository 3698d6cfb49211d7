//! データベース接続設定
//!
//! 起動時に`.env`ファイルを読み込み、`DB_*`環境変数から接続設定を構築する。

use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

/// 読み込む環境ファイル
pub const ENV_FILE: &str = ".env";

/// PostgreSQLのデフォルトポート
pub const DEFAULT_PG_PORT: u16 = 5432;

/// 設定エラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 環境ファイルの読み込みに失敗
    #[error("環境ファイルを読み込めません: {0}")]
    EnvFile(#[from] dotenvy::Error),

    /// 必須の環境変数が設定されていない
    #[error("必須の環境変数が設定されていません: {0}")]
    MissingEnvVar(String),

    /// DB_PORTが不正
    #[error("DB_PORTが不正です: {0}")]
    InvalidPort(String),

    /// DB_SSLが不正
    #[error("DB_SSLが不正です: {0}")]
    InvalidSslMode(String),

    /// DB_DRIVERが不正
    #[error("DB_DRIVERが不正です: {0}")]
    InvalidDriver(String),
}

/// データベースドライバー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbDriver {
    #[default]
    Postgres,
    Sqlite,
}

impl FromStr for DbDriver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::InvalidDriver(other.to_string())),
        }
    }
}

/// TLSモード（libpqのsslmodeに対応）
///
/// `Prefer`/`Require`は暗号化のみで、サーバー証明書は検証しない。
/// 証明書を検証するのは`VerifyCa`/`VerifyFull`のみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(ConfigError::InvalidSslMode(other.to_string())),
        }
    }
}

/// データベース接続設定
///
/// # フィールド
/// - `driver`: 接続先のドライバー
/// - `host`/`port`/`user`/`password`: PostgreSQLの接続情報
/// - `name`: PostgreSQLのデータベース名、SQLiteの場合はファイルパス
/// - `ssl_mode`: PostgreSQL接続のTLSモード
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub driver: DbDriver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: SslMode,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl DbConfig {
    /// SQLiteファイルを使う設定を作成
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: DbDriver::Sqlite,
            host: String::new(),
            port: DEFAULT_PG_PORT,
            user: String::new(),
            password: String::new(),
            name: path.into(),
            ssl_mode: SslMode::Disable,
        }
    }

    /// 環境ファイルを読み込んでから環境変数で設定を構築
    ///
    /// 環境ファイルが存在しない場合はエラーを返す。
    /// 既にプロセス環境に設定されている変数はファイルの値で上書きしない。
    pub fn load(env_file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::from_path(env_file.as_ref())?;
        Self::from_env()
    }

    /// 環境変数から設定を読み込み
    ///
    /// # 環境変数
    /// - `DB_DRIVER`: `postgres`（デフォルト）または`sqlite`
    /// - `DB_HOST`: ホスト名（postgresでは必須）
    /// - `DB_PORT`: ポート番号（デフォルト: 5432）
    /// - `DB_USER`: ユーザー名（postgresでは必須）
    /// - `DB_PASS`: パスワード（デフォルト: 空）
    /// - `DB_NAME`: データベース名またはSQLiteファイルパス（必須）
    /// - `DB_SSL`: `disable`（デフォルト）/`prefer`/`require`/`verify-ca`/`verify-full`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のlookup関数から設定を構築
    ///
    /// 空文字の値は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let driver = match get("DB_DRIVER") {
            Some(v) => v.parse()?,
            None => DbDriver::default(),
        };

        if driver == DbDriver::Sqlite {
            return Ok(Self::sqlite(require("DB_NAME")?));
        }

        let port = match get("DB_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(v.clone()))?,
            None => DEFAULT_PG_PORT,
        };
        let ssl_mode = match get("DB_SSL") {
            Some(v) => v.parse()?,
            None => SslMode::default(),
        };

        Ok(Self {
            driver,
            host: require("DB_HOST")?,
            port,
            user: require("DB_USER")?,
            password: lookup("DB_PASS").unwrap_or_default(),
            name: require("DB_NAME")?,
            ssl_mode,
        })
    }
}
