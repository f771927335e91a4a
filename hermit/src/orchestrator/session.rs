//! クライアントセッションの環境変数と引数

use crate::config::RoleAliases;
use crate::models::RoutingConfig;
use tracing::warn;

/// 認証トークン
pub const AUTH_TOKEN_VAR: &str = "ANTHROPIC_AUTH_TOKEN";
/// ゲートウェイURL
pub const BASE_URL_VAR: &str = "ANTHROPIC_BASE_URL";
/// デフォルトモデル
pub const MODEL_VAR: &str = "ANTHROPIC_MODEL";
/// 高速ティアのモデル
pub const FAST_MODEL_VAR: &str = "ANTHROPIC_DEFAULT_HAIKU_MODEL";
/// 標準ティアのモデル
pub const DEFAULT_MODEL_VAR: &str = "ANTHROPIC_DEFAULT_SONNET_MODEL";
/// 高性能ティアのモデル
pub const STRONG_MODEL_VAR: &str = "ANTHROPIC_DEFAULT_OPUS_MODEL";
/// サブエージェントのモデル
pub const SUBAGENT_MODEL_VAR: &str = "CLAUDE_CODE_SUBAGENT_MODEL";
/// 不要なバックグラウンド通信を止めるフラグ
pub const DISABLE_TRAFFIC_VAR: &str = "CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC";

/// クライアントに渡すセッション環境
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnv {
    /// 認証トークン
    pub token: String,
    /// ゲートウェイのベースURL
    pub base_url: String,
    /// デフォルトモデル
    pub default_model: String,
    /// 高速ティアのモデル
    pub fast_model: String,
    /// 高性能ティアのモデル
    pub strong_model: String,
}

impl SessionEnv {
    /// ルーティング設定からセッション環境を組み立てる
    ///
    /// デフォルトモデルは最初のエントリ。エイリアスが存在しないモデル名を
    /// 指している場合は警告してデフォルトモデルを使う。
    /// エントリが空の場合は `None`。
    pub fn new(
        token: impl Into<String>,
        base_url: impl Into<String>,
        routing: &RoutingConfig,
        aliases: &RoleAliases,
    ) -> Option<Self> {
        let default_model = routing.entries.first()?.display_name.clone();

        let pick = |role: &str, alias: Option<&String>| -> String {
            match alias {
                Some(name) if routing.entries.iter().any(|e| &e.display_name == name) => {
                    name.clone()
                }
                Some(name) => {
                    warn!(
                        role = role,
                        alias = %name,
                        "Alias refers to an unknown model, using {}",
                        default_model
                    );
                    default_model.clone()
                }
                None => default_model.clone(),
            }
        };

        Some(Self {
            fast_model: pick("fast", aliases.fast.as_ref()),
            strong_model: pick("strong", aliases.strong.as_ref()),
            token: token.into(),
            base_url: base_url.into(),
            default_model,
        })
    }

    /// 環境変数の一覧
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (AUTH_TOKEN_VAR, self.token.clone()),
            (BASE_URL_VAR, self.base_url.clone()),
            (MODEL_VAR, self.default_model.clone()),
            (FAST_MODEL_VAR, self.fast_model.clone()),
            (DEFAULT_MODEL_VAR, self.default_model.clone()),
            (STRONG_MODEL_VAR, self.strong_model.clone()),
            (SUBAGENT_MODEL_VAR, self.default_model.clone()),
            (DISABLE_TRAFFIC_VAR, "1".to_string()),
        ]
    }

    /// シェルで `source` できる export 行
    pub fn export_script(&self) -> String {
        let mut script = String::new();
        for (name, value) in self.vars() {
            script.push_str(&format!("export {}={}\n", name, shell_quote(&value)));
        }
        script
    }

    /// クライアントに渡す引数
    ///
    /// `--model` が指定されていなければデフォルトモデルを先頭に付ける。
    pub fn client_args(&self, args: &[String]) -> Vec<String> {
        let has_model = args
            .iter()
            .any(|arg| arg == "--model" || arg.starts_with("--model="));
        if has_model {
            return args.to_vec();
        }

        let mut out = Vec::with_capacity(args.len() + 2);
        out.push("--model".to_string());
        out.push(self.default_model.clone());
        out.extend(args.iter().cloned());
        out
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{generate, ModelDescriptor};

    fn routing(names: &[&str]) -> RoutingConfig {
        let descriptors: Vec<_> = names
            .iter()
            .map(|n| ModelDescriptor::new(*n, "local", "m"))
            .collect();
        generate(Some(descriptors.as_slice())).unwrap().config
    }

    fn env(aliases: RoleAliases) -> SessionEnv {
        SessionEnv::new(
            "sk-hermit-abc",
            "http://localhost:4000",
            &routing(&["qwen", "kimi", "glm"]),
            &aliases,
        )
        .unwrap()
    }

    #[test]
    fn test_default_model_is_first_entry() {
        let env = env(RoleAliases::default());
        assert_eq!(env.default_model, "qwen");
        assert_eq!(env.fast_model, "qwen");
        assert_eq!(env.strong_model, "qwen");
    }

    #[test]
    fn test_aliases_select_roles() {
        let env = env(RoleAliases {
            fast: Some("glm".to_string()),
            strong: Some("kimi".to_string()),
        });
        assert_eq!(env.fast_model, "glm");
        assert_eq!(env.strong_model, "kimi");
        assert_eq!(env.default_model, "qwen");
    }

    #[test]
    fn test_unknown_alias_falls_back_to_default() {
        let env = env(RoleAliases {
            fast: Some("missing".to_string()),
            strong: None,
        });
        assert_eq!(env.fast_model, "qwen");
    }

    #[test]
    fn test_empty_routing_has_no_session() {
        let empty = RoutingConfig {
            entries: Vec::new(),
            global_settings: Default::default(),
        };
        assert!(SessionEnv::new("t", "u", &empty, &RoleAliases::default()).is_none());
    }

    #[test]
    fn test_vars_cover_all_roles() {
        let env = env(RoleAliases {
            fast: Some("glm".to_string()),
            strong: Some("kimi".to_string()),
        });
        let vars: std::collections::HashMap<_, _> = env.vars().into_iter().collect();

        assert_eq!(vars[AUTH_TOKEN_VAR], "sk-hermit-abc");
        assert_eq!(vars[BASE_URL_VAR], "http://localhost:4000");
        assert_eq!(vars[MODEL_VAR], "qwen");
        assert_eq!(vars[FAST_MODEL_VAR], "glm");
        assert_eq!(vars[DEFAULT_MODEL_VAR], "qwen");
        assert_eq!(vars[STRONG_MODEL_VAR], "kimi");
        assert_eq!(vars[SUBAGENT_MODEL_VAR], "qwen");
        assert_eq!(vars[DISABLE_TRAFFIC_VAR], "1");
    }

    #[test]
    fn test_client_args_prepend_model() {
        let env = env(RoleAliases::default());
        let args = env.client_args(&["--resume".to_string()]);
        assert_eq!(args, vec!["--model", "qwen", "--resume"]);
    }

    #[test]
    fn test_client_args_keep_explicit_model() {
        let env = env(RoleAliases::default());
        let given = vec!["--model".to_string(), "kimi".to_string()];
        assert_eq!(env.client_args(&given), given);

        let given = vec!["--model=kimi".to_string()];
        assert_eq!(env.client_args(&given), given);
    }

    #[test]
    fn test_export_script_quotes_values() {
        let mut env = env(RoleAliases::default());
        env.default_model = "it's".to_string();
        let script = env.export_script();
        assert!(script.contains("export ANTHROPIC_AUTH_TOKEN='sk-hermit-abc'\n"));
        assert!(script.contains(r"export ANTHROPIC_MODEL='it'\''s'"));
    }
}
