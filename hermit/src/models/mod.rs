//! モデル定義とルーティング設定
//!
//! - [`provider`]: プロバイダテンプレートレジストリ
//! - [`descriptor`]: モデル一覧ファイルの検証
//! - [`routing`]: ゲートウェイ用ルーティング設定の生成

pub mod descriptor;
pub mod provider;
pub mod routing;

pub use descriptor::{LoadReport, ModelDescriptor, ParamValue};
pub use provider::{BehaviorClass, ProviderTemplate};
pub use routing::{generate, RoutingConfig, RoutingEntry};
