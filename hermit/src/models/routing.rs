//! ルーティング設定の生成
//!
//! モデル定義とプロバイダテンプレートから、共有ゲートウェイが読み込む
//! ルーティング設定（LiteLLM互換のYAML）を生成する。
//! 設定は起動のたびに全体を再生成し、部分的な更新は行わない。

use super::descriptor::{ModelDescriptor, ParamValue};
use super::provider::{self, BehaviorClass, ProviderTemplate};
use crate::atomic::write_atomic;
use crate::error::{HermitError, Result, ValidationWarning};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// ローカルサーバー向けにそのまま渡すデコーディングパラメータ
pub const DECODING_PARAMS: &[&str] = &[
    "temperature",
    "top_p",
    "top_k",
    "repetition_penalty",
    "max_tokens",
];

/// ゲートウェイに渡す接続パラメータ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionParams {
    /// プレフィックス付きのモデル名
    #[serde(rename = "model")]
    pub resolved_model: String,
    /// APIキー、または環境変数参照
    #[serde(rename = "api_key")]
    pub api_key_ref: String,
    /// APIベースURL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// プロバイダ別ルールで結合したパラメータ
    #[serde(flatten)]
    pub merged_params: BTreeMap<String, ParamValue>,
}

/// 厳格なホスト型プロバイダ向けのメタデータ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    /// 最大トークン数
    pub max_tokens: u64,
    /// 最大出力トークン数
    pub max_output_tokens: u64,
    /// 画像入力対応
    pub supports_vision: bool,
    /// function calling対応
    pub supports_function_calling: bool,
}

/// ルーティング設定の1エントリ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingEntry {
    /// 表示名（クライアントが指定するモデル名）
    #[serde(rename = "model_name")]
    pub display_name: String,
    /// 接続パラメータ
    #[serde(rename = "litellm_params")]
    pub params: ConnectionParams,
    /// 追加メタデータ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

/// ゲートウェイ全体の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalSettings {
    /// 自動リトライを無効化するか
    pub retries_disabled: bool,
    /// 許容する失敗回数
    pub allowed_failures: u32,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        // リトライ制御は共有ゲートウェイ側に一本化する
        Self {
            retries_disabled: true,
            allowed_failures: 0,
        }
    }
}

impl Serialize for GlobalSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GlobalSettings", 2)?;
        let num_retries: u32 = if self.retries_disabled { 0 } else { 3 };
        state.serialize_field("num_retries", &num_retries)?;
        state.serialize_field("allowed_fails", &self.allowed_failures)?;
        state.end()
    }
}

/// 生成されたルーティング設定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingConfig {
    /// エントリ（モデル定義の順序を保持）
    #[serde(rename = "model_list")]
    pub entries: Vec<RoutingEntry>,
    /// 全体設定
    #[serde(rename = "router_settings")]
    pub global_settings: GlobalSettings,
}

/// 生成結果
#[derive(Debug, Clone)]
pub struct Generated {
    /// ルーティング設定
    pub config: RoutingConfig,
    /// 読み飛ばしたモデル定義
    pub skipped: Vec<ValidationWarning>,
}

fn merge_params(
    descriptor: &ModelDescriptor,
    template: &ProviderTemplate,
) -> (BTreeMap<String, ParamValue>, Option<ModelInfo>) {
    let mut merged = BTreeMap::new();

    match template.behavior {
        BehaviorClass::DecodingPassthrough => {
            for key in DECODING_PARAMS {
                if let Some(value) = descriptor.param(key) {
                    merged.insert((*key).to_string(), value.clone());
                }
            }
            (merged, None)
        }
        BehaviorClass::StrictHosted {
            default_max_tokens,
            max_tokens_cap,
        } => {
            let max_tokens = descriptor
                .param("max_tokens")
                .and_then(ParamValue::as_u64)
                // 0 は未指定扱い
                .filter(|&requested| requested > 0)
                .map(|requested| requested.min(max_tokens_cap))
                .unwrap_or(default_max_tokens);

            merged.insert(
                "max_tokens".to_string(),
                ParamValue::Int(i64::try_from(max_tokens).unwrap_or(i64::MAX)),
            );
            merged.insert("num_retries".to_string(), ParamValue::Int(0));
            merged.insert("drop_params".to_string(), ParamValue::Bool(true));

            let info = ModelInfo {
                max_tokens,
                max_output_tokens: max_tokens,
                supports_vision: template.capabilities.vision,
                supports_function_calling: template.capabilities.function_calling,
            };
            (merged, Some(info))
        }
        BehaviorClass::Plain => {
            if !descriptor.optional_params.is_empty() {
                debug!(
                    model = %descriptor.name,
                    provider = template.id,
                    "Provider takes no extra parameters, ignoring them"
                );
            }
            (merged, None)
        }
    }
}

/// モデル定義からエントリを1つ作る
pub fn build_entry(descriptor: &ModelDescriptor, template: &ProviderTemplate) -> RoutingEntry {
    let (merged_params, model_info) = merge_params(descriptor, template);

    RoutingEntry {
        display_name: descriptor.name.clone(),
        params: ConnectionParams {
            resolved_model: format!("{}{}", template.model_prefix, descriptor.model_id),
            api_key_ref: template.api_key_ref.to_string(),
            api_base: template.api_base.map(str::to_string),
            merged_params,
        },
        model_info,
    }
}

/// ルーティング設定を生成する
///
/// 入力が `None` または空の場合のみ [`HermitError::EmptyModelList`] を返す。
/// 未知のプロバイダを参照するモデル定義は警告を出して読み飛ばし、
/// バッチ全体は中断しない。
pub fn generate(descriptors: Option<&[ModelDescriptor]>) -> Result<Generated> {
    let descriptors = match descriptors {
        Some(d) if !d.is_empty() => d,
        _ => return Err(HermitError::EmptyModelList),
    };

    let mut entries = Vec::with_capacity(descriptors.len());
    let mut skipped = Vec::new();

    for descriptor in descriptors {
        match provider::resolve(&descriptor.provider) {
            Ok(template) => entries.push(build_entry(descriptor, template)),
            Err(_) => {
                let warning = ValidationWarning::UnknownProvider {
                    name: descriptor.name.clone(),
                    provider: descriptor.provider.clone(),
                };
                warn!("{}", warning);
                skipped.push(warning);
            }
        }
    }

    Ok(Generated {
        config: RoutingConfig {
            entries,
            global_settings: GlobalSettings::default(),
        },
        skipped,
    })
}

impl RoutingConfig {
    /// エントリが空か
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// YAML文字列に変換
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// 設定ファイルをアトミックに書き出す
    ///
    /// シリアライズに失敗した場合は何も書かない。
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;
        write_atomic(path, yaml.as_bytes(), None)?;
        info!(
            path = %path.display(),
            models = self.entries.len(),
            "Routing config written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_of(config: &RoutingConfig) -> serde_yaml::Value {
        serde_yaml::from_str(&config.to_yaml().unwrap()).unwrap()
    }

    #[test]
    fn test_generate_empty_or_absent_is_error() {
        assert!(matches!(generate(None), Err(HermitError::EmptyModelList)));
        assert!(matches!(generate(Some(&[][..])), Err(HermitError::EmptyModelList)));
    }

    #[test]
    fn test_generate_local_entry_without_params() {
        let descriptors = vec![ModelDescriptor::new("local", "local", "m")];
        let generated = generate(Some(descriptors.as_slice())).unwrap();

        assert!(generated.skipped.is_empty());
        assert_eq!(generated.config.entries.len(), 1);
        let entry = &generated.config.entries[0];
        assert_eq!(entry.display_name, "local");
        assert_eq!(entry.params.resolved_model, "openai/m");
        assert_eq!(entry.params.api_key_ref, "lm-studio");
        assert_eq!(
            entry.params.api_base.as_deref(),
            Some("http://host.docker.internal:1234/v1")
        );
        assert!(entry.params.merged_params.is_empty());
        assert!(entry.model_info.is_none());
    }

    #[test]
    fn test_decoding_passthrough_keeps_only_present_params() {
        let descriptors = vec![ModelDescriptor::new("local", "local", "m")
            .with_param("temperature", ParamValue::Float(0.7))
            .with_param("top_p", ParamValue::Float(0.8))
            .with_param("max_tokens", ParamValue::Int(65536))
            .with_param("unrelated", ParamValue::Bool(true))];
        let entry = &generate(Some(descriptors.as_slice())).unwrap().config.entries[0];

        let keys: Vec<_> = entry.params.merged_params.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["max_tokens", "temperature", "top_p"]);
        assert_eq!(
            entry.params.merged_params.get("max_tokens"),
            Some(&ParamValue::Int(65536))
        );
    }

    #[test]
    fn test_strict_hosted_defaults_max_tokens_and_disables_retries() {
        let descriptors = vec![ModelDescriptor::new("kimi", "huggingface", "moonshotai/Kimi-K2")];
        let entry = &generate(Some(descriptors.as_slice())).unwrap().config.entries[0];

        assert_eq!(entry.params.resolved_model, "huggingface/moonshotai/Kimi-K2");
        assert_eq!(
            entry.params.merged_params.get("max_tokens"),
            Some(&ParamValue::Int(4096))
        );
        assert_eq!(
            entry.params.merged_params.get("num_retries"),
            Some(&ParamValue::Int(0))
        );
        assert_eq!(
            entry.params.merged_params.get("drop_params"),
            Some(&ParamValue::Bool(true))
        );
        assert_eq!(
            entry.model_info,
            Some(ModelInfo {
                max_tokens: 4096,
                max_output_tokens: 4096,
                supports_vision: false,
                supports_function_calling: false,
            })
        );
    }

    #[test]
    fn test_strict_hosted_caps_requested_max_tokens() {
        let descriptors = vec![
            ModelDescriptor::new("big", "huggingface", "a").with_param("max_tokens", ParamValue::Int(100_000)),
            ModelDescriptor::new("small", "huggingface", "b").with_param("max_tokens", ParamValue::Int(1024)),
        ];
        let config = generate(Some(descriptors.as_slice())).unwrap().config;

        assert_eq!(config.entries[0].model_info.as_ref().unwrap().max_tokens, 16384);
        assert_eq!(config.entries[1].model_info.as_ref().unwrap().max_tokens, 1024);
    }

    #[test]
    fn test_strict_hosted_zero_max_tokens_uses_default() {
        let descriptors = vec![
            ModelDescriptor::new("zero", "huggingface", "a").with_param("max_tokens", ParamValue::Int(0)),
        ];
        let config = generate(Some(descriptors.as_slice())).unwrap().config;
        let entry = &config.entries[0];

        assert_eq!(entry.model_info.as_ref().unwrap().max_tokens, 4096);
        assert_eq!(
            entry.params.merged_params.get("max_tokens"),
            Some(&ParamValue::Int(4096))
        );
    }

    #[test]
    fn test_plain_provider_ignores_params() {
        let descriptors = vec![ModelDescriptor::new("claude", "anthropic", "*")
            .with_param("temperature", ParamValue::Float(0.2))];
        let entry = &generate(Some(descriptors.as_slice())).unwrap().config.entries[0];

        assert_eq!(entry.params.resolved_model, "anthropic/*");
        assert_eq!(entry.params.api_base, None);
        assert!(entry.params.merged_params.is_empty());
    }

    #[test]
    fn test_unknown_provider_is_skipped_not_fatal() {
        let descriptors = vec![
            ModelDescriptor::new("a", "local", "m"),
            ModelDescriptor::new("b", "bogus", "m"),
            ModelDescriptor::new("c", "openrouter", "x/y"),
        ];
        let generated = generate(Some(descriptors.as_slice())).unwrap();

        let names: Vec<_> = generated
            .config
            .entries
            .iter()
            .map(|e| e.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(
            generated.skipped,
            vec![ValidationWarning::UnknownProvider {
                name: "b".to_string(),
                provider: "bogus".to_string()
            }]
        );
    }

    #[test]
    fn test_only_unknown_providers_yields_empty_config() {
        let descriptors = vec![ModelDescriptor::new("local", "bogus", "m")];
        let generated = generate(Some(descriptors.as_slice())).unwrap();
        assert!(generated.config.is_empty());
        assert_eq!(generated.skipped.len(), 1);
    }

    #[test]
    fn test_global_settings_always_disable_retries() {
        let descriptors = vec![ModelDescriptor::new("local", "local", "m")];
        let config = generate(Some(descriptors.as_slice())).unwrap().config;
        assert!(config.global_settings.retries_disabled);
        assert_eq!(config.global_settings.allowed_failures, 0);
    }

    #[test]
    fn test_yaml_document_shape() {
        let descriptors = vec![
            ModelDescriptor::new("local", "local", "m").with_param("temperature", ParamValue::Float(0.7)),
            ModelDescriptor::new("hf", "huggingface", "org/model"),
        ];
        let doc = yaml_of(&generate(Some(descriptors.as_slice())).unwrap().config);

        let list = doc["model_list"].as_sequence().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["model_name"].as_str(), Some("local"));
        assert_eq!(list[0]["litellm_params"]["model"].as_str(), Some("openai/m"));
        assert_eq!(list[0]["litellm_params"]["temperature"].as_f64(), Some(0.7));
        assert!(list[0].get("model_info").is_none());
        assert_eq!(list[1]["model_info"]["supports_vision"].as_bool(), Some(false));
        assert!(list[1]["litellm_params"].get("api_base").is_some());

        assert_eq!(doc["router_settings"]["num_retries"].as_u64(), Some(0));
        assert_eq!(doc["router_settings"]["allowed_fails"].as_u64(), Some(0));
    }

    #[test]
    fn test_write_atomic_writes_complete_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cache").join("config.yaml");
        let descriptors = vec![ModelDescriptor::new("local", "local", "m")];
        let config = generate(Some(descriptors.as_slice())).unwrap().config;

        config.write_atomic(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, config.to_yaml().unwrap());
    }
}
