//! 共有認証トークン
//!
//! 共有サービスの生存期間中ずっと有効な1つのトークンを発行・再利用する。
//! トークンファイルが存在する限り、その内容を変更せずに返す。

use crate::atomic::{remove_if_exists, write_atomic};
use crate::error::Result;
use crate::lock::CacheLock;
use rand::RngExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// トークンファイル名
pub const TOKEN_FILE: &str = ".hermit-token";

/// トークン用ロックファイル名
pub const TOKEN_LOCK_FILE: &str = ".hermit-token.lock";

/// トークンのプレフィックス
pub const TOKEN_PREFIX: &str = "sk-hermit-";

/// ランダム部分の長さ
const TOKEN_RANDOM_LEN: usize = 32;

/// トークンを生成（`sk-hermit-` + 32文字のランダム英数字）
pub fn generate_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();

    let random_part: String = (0..TOKEN_RANDOM_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();

    format!("{}{}", TOKEN_PREFIX, random_part)
}

/// トークンファイルの管理
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl TokenStore {
    /// キャッシュディレクトリ内のトークンストアを開く
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(TOKEN_FILE),
            lock_path: cache_dir.join(TOKEN_LOCK_FILE),
        }
    }

    /// トークンファイルのパス
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 既存のトークンを読む
    ///
    /// ファイルが存在しない、または空の場合は `None`。
    pub fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// トークンを取得する（なければ生成して保存）
    pub fn get_or_create(&self) -> Result<String> {
        let _lock = CacheLock::acquire(&self.lock_path)?;

        if let Some(token) = self.read()? {
            debug!("Reusing existing auth token");
            return Ok(token);
        }

        let token = generate_token();
        write_atomic(&self.path, token.as_bytes(), Some(0o600))?;
        info!(path = %self.path.display(), "Created new auth token");
        Ok(token)
    }

    /// トークンファイルを削除する
    ///
    /// # Returns
    ///
    /// 実際に削除した場合は `true`
    pub fn remove(&self) -> Result<bool> {
        let _lock = CacheLock::acquire(&self.lock_path)?;
        Ok(remove_if_exists(&self.path)?)
    }
}
