//! hermit
//!
//! 複数のクライアントセッションで、ローカルで動かすLLMゲートウェイを共有する。
//! 最初のセッションが共有サービスを起動し、最後のセッションが停止する。

#![warn(missing_docs)]

/// 一時ファイル経由のアトミックな書き込み
pub mod atomic;

/// CLIインターフェース
pub mod cli;

/// 設定管理
pub mod config;

/// エラー型定義
pub mod error;

/// 依存サービスの起動待ち
pub mod health;

/// ファイルロック
pub mod lock;

/// ロギング初期化
pub mod logging;

/// モデル定義とルーティング設定の生成
pub mod models;

/// セッションのライフサイクル管理
pub mod orchestrator;

/// インスタンスレジストリ
pub mod registry;

/// 共有サービスの制御
pub mod services;

/// 終了要求の受け口
pub mod shutdown;

/// 共有認証トークン
pub mod token;

pub use error::{HermitError, Result};
