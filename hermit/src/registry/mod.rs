//! インスタンスレジストリ
//!
//! 共有サービスを利用中のセッションを参照カウントするための、永続化された
//! インスタンスIDの集合。ファイルは改行区切りで重複を含まない。
//! 空のファイルと存在しないファイルは「インスタンスなし」と同じ意味を持つ。
//!
//! 複数のプロセスが同時に読み書きするため、read-modify-write 全体を
//! `.instances.lock` の排他ロックで保護し、書き込みはrenameで置き換える。

use crate::atomic::{remove_if_exists, write_atomic};
use crate::error::Result;
use crate::lock::CacheLock;
use std::path::{Path, PathBuf};
use tracing::debug;

/// レジストリファイル名
pub const INSTANCES_FILE: &str = ".instances";

/// レジストリ用ロックファイル名
pub const INSTANCES_LOCK_FILE: &str = ".instances.lock";

/// デタッチ起動が保持するインスタンスID（`hermit stop` まで残る）
pub const DETACHED_INSTANCE: &str = "detached";

/// セッションを識別するID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// 新しいIDを生成
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// デタッチ起動用の固定ID
    pub fn detached() -> Self {
        Self(DETACHED_INSTANCE.to_string())
    }

    /// 文字列表現
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ファイルに永続化されたインスタンスIDの集合
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl InstanceRegistry {
    /// キャッシュディレクトリ内のレジストリを開く
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(INSTANCES_FILE),
            lock_path: cache_dir.join(INSTANCES_LOCK_FILE),
        }
    }

    /// レジストリファイルのパス
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_ids(&self) -> Result<Vec<InstanceId>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids: Vec<InstanceId> = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let id = InstanceId::from(line);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn write_ids(&self, ids: &[InstanceId]) -> Result<()> {
        if ids.is_empty() {
            remove_if_exists(&self.path)?;
            return Ok(());
        }

        let content = ids
            .iter()
            .map(InstanceId::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        write_atomic(&self.path, content.as_bytes(), None)?;
        Ok(())
    }

    /// インスタンスを登録する
    ///
    /// 登録済みのIDに対しては何もしない。
    pub fn register(&self, id: &InstanceId) -> Result<()> {
        let _lock = CacheLock::acquire(&self.lock_path)?;

        let mut ids = self.read_ids()?;
        if ids.contains(id) {
            debug!(instance = %id, "Instance already registered");
            return Ok(());
        }
        ids.push(id.clone());
        self.write_ids(&ids)?;

        debug!(instance = %id, active = ids.len(), "Instance registered");
        Ok(())
    }

    /// インスタンスの登録を解除する
    ///
    /// # Returns
    ///
    /// 解除後にアクティブなインスタンスが残っていなければ `true`
    /// （呼び出し側は共有サービスを停止してよい）。
    /// レジストリが存在しない場合も `true`。
    pub fn unregister(&self, id: &InstanceId) -> Result<bool> {
        let _lock = CacheLock::acquire(&self.lock_path)?;

        let ids = self.read_ids()?;
        let remaining: Vec<InstanceId> = ids.into_iter().filter(|i| i != id).collect();
        self.write_ids(&remaining)?;

        debug!(instance = %id, remaining = remaining.len(), "Instance unregistered");
        Ok(remaining.is_empty())
    }

    /// アクティブなインスタンスの一覧
    pub fn list(&self) -> Result<Vec<InstanceId>> {
        self.read_ids()
    }

    /// レジストリを削除する（強制停止用）
    pub fn clear(&self) -> Result<()> {
        let _lock = CacheLock::acquire(&self.lock_path)?;
        remove_if_exists(&self.path)?;
        Ok(())
    }
}
