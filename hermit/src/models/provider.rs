//! プロバイダテンプレートレジストリ
//!
//! プロバイダIDから接続テンプレート（APIベースURL、認証情報の参照、
//! モデル名プレフィックス、振る舞いクラス）への静的な対応表。
//! プロバイダの追加は [`PROVIDERS`] に1エントリ足すだけで済む。

use thiserror::Error;

/// パラメータ結合ルールの種別
///
/// ルーティング設定生成時にパターンマッチで分岐する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorClass {
    /// デコーディングパラメータを存在する場合のみそのまま渡す（ローカルサーバー向け）
    DecodingPassthrough,
    /// 厳格な検証を行うホスト型ルーター向け
    ///
    /// max_tokens を上限付きで強制し、リトライを無効化する。
    StrictHosted {
        /// max_tokens 未指定時の値
        default_max_tokens: u64,
        /// max_tokens の上限
        max_tokens_cap: u64,
    },
    /// 追加パラメータなし
    Plain,
}

impl BehaviorClass {
    /// 表示用の名前
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodingPassthrough => "decoding-passthrough",
            Self::StrictHosted { .. } => "strict-hosted",
            Self::Plain => "plain",
        }
    }
}

impl std::fmt::Display for BehaviorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// プロバイダの能力フラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// 画像入力に対応
    pub vision: bool,
    /// function calling（ツール呼び出し）に対応
    pub function_calling: bool,
}

impl Capabilities {
    /// すべて対応
    pub const FULL: Self = Self {
        vision: true,
        function_calling: true,
    };
}

/// プロバイダ接続テンプレート
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTemplate {
    /// プロバイダID
    pub id: &'static str,
    /// APIベースURL（ゲートウェイコンテナから見たURL）
    pub api_base: Option<&'static str>,
    /// APIキー、または `os.environ/NAME` 形式の環境変数参照
    pub api_key_ref: &'static str,
    /// モデルIDに付与するプレフィックス
    pub model_prefix: &'static str,
    /// パラメータ結合ルール
    pub behavior: BehaviorClass,
    /// 能力フラグ
    pub capabilities: Capabilities,
    /// ホスト上のローカルモデルサーバーを必要とするか
    pub requires_local_server: bool,
}

/// 組み込みプロバイダ
pub static PROVIDERS: &[ProviderTemplate] = &[
    ProviderTemplate {
        id: "local",
        api_base: Some("http://host.docker.internal:1234/v1"),
        api_key_ref: "lm-studio",
        model_prefix: "openai/",
        behavior: BehaviorClass::DecodingPassthrough,
        capabilities: Capabilities::FULL,
        requires_local_server: true,
    },
    ProviderTemplate {
        id: "openrouter",
        api_base: Some("https://openrouter.ai/api/v1"),
        api_key_ref: "os.environ/OPENROUTER_API_KEY",
        model_prefix: "openrouter/",
        behavior: BehaviorClass::Plain,
        capabilities: Capabilities::FULL,
        requires_local_server: false,
    },
    ProviderTemplate {
        id: "huggingface",
        api_base: Some("https://router.huggingface.co/v1"),
        api_key_ref: "os.environ/HF_API_KEY",
        model_prefix: "huggingface/",
        behavior: BehaviorClass::StrictHosted {
            default_max_tokens: 4096,
            max_tokens_cap: 16384,
        },
        capabilities: Capabilities {
            vision: false,
            function_calling: false,
        },
        requires_local_server: false,
    },
    ProviderTemplate {
        id: "anthropic",
        api_base: None,
        api_key_ref: "os.environ/ANTHROPIC_API_KEY",
        model_prefix: "anthropic/",
        behavior: BehaviorClass::Plain,
        capabilities: Capabilities::FULL,
        requires_local_server: false,
    },
];

/// 別名 → 正式なプロバイダID
const ALIASES: &[(&str, &str)] = &[("lmstudio", "local")];

/// 未知のプロバイダID
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

/// プロバイダIDからテンプレートを解決する
///
/// # Returns
///
/// - `Ok(&ProviderTemplate)`: 登録済みのプロバイダ（別名を含む）
/// - `Err(UnknownProvider)`: 未登録のID
pub fn resolve(provider_id: &str) -> Result<&'static ProviderTemplate, UnknownProvider> {
    let id = ALIASES
        .iter()
        .find(|(alias, _)| *alias == provider_id)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(provider_id);

    PROVIDERS
        .iter()
        .find(|template| template.id == id)
        .ok_or_else(|| UnknownProvider(provider_id.to_string()))
}

/// 登録済みプロバイダIDの一覧
pub fn provider_ids() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|template| template.id)
}
