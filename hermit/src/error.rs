//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! 致命的なエラーは `main` まで伝播し、原因を表示して終了コード1で終了する。
//! モデル定義単位の不備は [`ValidationWarning`] として記録されるだけで、
//! エラーにはならない。

use crate::lock::LockError;
use crate::orchestrator::LifecycleState;
use std::path::PathBuf;
use thiserror::Error;

/// hermit のエラー型
#[derive(Debug, Error)]
pub enum HermitError {
    /// 有効なモデル定義が1件もない
    #[error("No usable models found in the model list (check the `models` section of your hermit config)")]
    EmptyModelList,

    /// モデル一覧ファイルの読み込み・解析に失敗
    #[error("Failed to load model list from {path}: {message}")]
    ConfigFile {
        /// ファイルパス
        path: PathBuf,
        /// 原因
        message: String,
    },

    /// 必須の依存サービスが時間内に起動しなかった
    #[error("{dependency} did not become ready within {seconds} seconds")]
    DependencyTimeout {
        /// 依存サービス名
        dependency: String,
        /// 待機秒数
        seconds: u64,
    },

    /// 共有サービスの制御コマンドが失敗
    #[error("Failed to {action} shared services: {message}")]
    ServiceControl {
        /// 実行しようとした操作（start / stop など）
        action: &'static str,
        /// 原因
        message: String,
    },

    /// クライアントプログラムの起動に失敗
    #[error("Failed to launch client `{program}`: {source}")]
    ClientLaunch {
        /// プログラム名
        program: String,
        /// 原因
        #[source]
        source: std::io::Error,
    },

    /// シグナルによって中断された
    #[error("Interrupted while waiting for {0}")]
    Interrupted(String),

    /// ライフサイクルの手順が順序どおりに呼ばれなかった
    #[error("Cannot {step} in state {state}")]
    InvalidState {
        /// 呼ばれた手順
        step: &'static str,
        /// 現在の状態
        state: LifecycleState,
    },

    /// 共有状態ファイルのロックに失敗
    #[error(transparent)]
    Lock(#[from] LockError),

    /// ルーティング設定のシリアライズに失敗
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// I/Oエラー
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HermitError {
    /// 共有サービス制御エラーを作成
    pub fn service_control(action: &'static str, message: impl Into<String>) -> Self {
        Self::ServiceControl {
            action,
            message: message.into(),
        }
    }
}

/// hermit の Result 型
pub type Result<T> = std::result::Result<T, HermitError>;

/// モデル定義を読み飛ばした理由
///
/// 該当エントリは破棄されるがバッチ全体は継続する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// 必須フィールドが欠けている
    MissingField {
        /// エントリの位置（0始まり）
        index: usize,
        /// 欠けていたフィールド名
        field: &'static str,
    },
    /// 未知のプロバイダを参照している
    UnknownProvider {
        /// モデル名
        name: String,
        /// プロバイダID
        provider: String,
    },
    /// スカラー以外のパラメータ値
    NonScalarParam {
        /// モデル名
        name: String,
        /// パラメータ名
        key: String,
    },
    /// モデル名が重複している
    DuplicateName {
        /// モデル名
        name: String,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { index, field } => {
                write!(f, "model #{} is missing `{}`, skipping", index + 1, field)
            }
            Self::UnknownProvider { name, provider } => write!(
                f,
                "unknown provider '{}' for model '{}', skipping",
                provider, name
            ),
            Self::NonScalarParam { name, key } => write!(
                f,
                "parameter '{}' of model '{}' is not a scalar, ignoring it",
                key, name
            ),
            Self::DuplicateName { name } => {
                write!(f, "model name '{}' is defined more than once, keeping the first", name)
            }
        }
    }
}
