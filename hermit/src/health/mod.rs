//! 依存サービスの起動確認
//!
//! - [`probe`]: 上限付きポーリングの汎用実装
//! - [`dependency`]: ローカルモデルサーバー / コンテナランタイム / ゲートウェイ

pub mod dependency;
pub mod probe;

pub use dependency::{ensure_dependency, Criticality, Dependency};
pub use probe::{ensure, ProbePolicy, Readiness};
