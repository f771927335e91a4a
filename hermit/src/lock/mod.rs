//! 共有状態ファイルの排他制御
//!
//! 複数のセッション（独立したOSプロセス）が同じキャッシュディレクトリ上の
//! 状態ファイルを読み書きするため、read-modify-write 全体をファイルロックで保護する。
//!
//! # 機能
//!
//! - クロスプラットフォームファイルロック（fs2）
//! - RAIIによるロック解除（Dropトレイト）
//! - 非同期コンテキスト向けの `acquire_async`（`spawn_blocking` 経由）
//!
//! ロックファイル自体は削除しない。待機中のプロセスが古いinodeを掴んだまま
//! 新しいファイルがロックされると、排他が成立しなくなるため。

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// ライフサイクル（起動・停止判断）用ロックファイル名
pub const LIFECYCLE_LOCK_FILE: &str = ".lifecycle.lock";

/// ロック操作に関するエラー型
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// ロック取得に失敗
    #[error("Failed to acquire lock {path}: {source}")]
    AcquireFailed {
        /// ロックファイルのパス
        path: PathBuf,
        /// 原因
        #[source]
        source: std::io::Error,
    },

    /// ロック解除に失敗
    #[error("Failed to release lock: {0}")]
    ReleaseFailed(#[source] std::io::Error),

    /// ロックディレクトリの作成に失敗
    #[error("Failed to create lock directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),

    /// ブロッキングタスクの実行に失敗
    #[error("Lock task failed: {0}")]
    TaskFailed(String),
}

/// キャッシュディレクトリ内のファイルロック
///
/// スコープを抜けるか、明示的に`release()`を呼び出すとロックが解除されます。
pub struct CacheLock {
    /// ロックを保持しているファイルハンドル
    lock_file: Option<File>,
    /// ロックファイルのパス
    lock_path: PathBuf,
}

impl std::fmt::Debug for CacheLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLock")
            .field("lock_path", &self.lock_path)
            .field("held", &self.lock_file.is_some())
            .finish()
    }
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(LockError::DirectoryCreationFailed)?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::AcquireFailed {
            path: path.to_path_buf(),
            source,
        })
}

impl CacheLock {
    /// ロックを取得する（取得できるまでブロック）
    ///
    /// # Arguments
    ///
    /// * `path` - ロックファイルのパス（親ディレクトリは必要に応じて作成）
    ///
    /// # Returns
    ///
    /// - `Ok(CacheLock)`: ロック取得に成功した場合
    /// - `Err(LockError::AcquireFailed)`: ロック取得に失敗した場合
    /// - `Err(LockError::DirectoryCreationFailed)`: ロックディレクトリの作成に失敗した場合
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        trace!("Waiting for lock {}", path.display());
        file.lock_exclusive()
            .map_err(|source| LockError::AcquireFailed {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Lock acquired: {}", path.display());

        Ok(Self {
            lock_file: Some(file),
            lock_path: path.to_path_buf(),
        })
    }

    /// ロックを取得する（非ブロッキング）
    ///
    /// 他プロセスが保持中の場合は `Ok(None)` を返す。
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, LockError> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Lock acquired: {}", path.display());
                Ok(Some(Self {
                    lock_file: Some(file),
                    lock_path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(LockError::AcquireFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// 非同期コンテキストからロックを取得する
    ///
    /// 待機中もランタイムのワーカーを塞がないよう、ブロッキングスレッドで待つ。
    pub async fn acquire_async(path: PathBuf) -> Result<Self, LockError> {
        tokio::task::spawn_blocking(move || Self::acquire(path))
            .await
            .map_err(|e| LockError::TaskFailed(e.to_string()))?
    }

    /// ロックファイルのパス
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// ロックを明示的に解除する
    ///
    /// Dropトレイトでも同様の処理が行われるため、通常は明示的に呼び出す必要はありません。
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_internal()
    }

    fn release_internal(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.lock_file.take() {
            file.unlock().map_err(LockError::ReleaseFailed)?;
            debug!("Lock released: {}", self.lock_path.display());
        }
        Ok(())
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_internal() {
            // panicしない - エラーはログのみ
            tracing::error!("Failed to release lock on drop: {}", e);
        }
    }
}
