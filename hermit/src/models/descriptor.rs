//! モデル定義
//!
//! モデル一覧ファイルの生エントリを検証し、不備のあるエントリは警告付きで破棄する。

use crate::error::ValidationWarning;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// モデル一覧ファイルの1エントリ（未検証）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawModelEntry {
    /// 表示名
    #[serde(default)]
    pub name: Option<String>,
    /// プロバイダID
    #[serde(default)]
    pub provider: Option<String>,
    /// プロバイダ側のモデルID
    #[serde(default)]
    pub model: Option<String>,
    /// その他のパラメータ
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

/// スカラー値のパラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// 真偽値
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮動小数点数
    Float(f64),
    /// 文字列
    String(String),
}

impl ParamValue {
    fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_yaml::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// 非負整数として取得
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => u64::try_from(*i).ok(),
            Self::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// 検証済みのモデル定義
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// 表示名（設定内で一意）
    pub name: String,
    /// プロバイダID
    pub provider: String,
    /// プロバイダ側のモデルID
    pub model_id: String,
    /// 任意パラメータ
    pub optional_params: BTreeMap<String, ParamValue>,
}

impl ModelDescriptor {
    /// パラメータなしのモデル定義を作成
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            model_id: model_id.into(),
            optional_params: BTreeMap::new(),
        }
    }

    /// パラメータを追加
    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.optional_params.insert(key.into(), value);
        self
    }

    /// パラメータを取得
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.optional_params.get(key)
    }
}

/// 検証結果
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// 有効なモデル定義（ファイル内の順序を保持）
    pub descriptors: Vec<ModelDescriptor>,
    /// 破棄・無視したエントリの警告
    pub warnings: Vec<ValidationWarning>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// 生エントリを検証する
///
/// `name` / `provider` / `model` が欠けているエントリ、および既出の名前を持つ
/// エントリは破棄する。スカラー以外のパラメータは値だけを捨てる。
/// 警告はすべて `tracing::warn!` で出力したうえで返す。
pub fn validate(entries: Vec<RawModelEntry>) -> LoadReport {
    let mut report = LoadReport::default();
    let mut seen = HashSet::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let name = required(entry.name);
        let provider = required(entry.provider);
        let model = required(entry.model);

        let (name, provider, model_id) = match (name, provider, model) {
            (Some(n), Some(p), Some(m)) => (n, p, m),
            (n, p, _) => {
                let field = if n.is_none() {
                    "name"
                } else if p.is_none() {
                    "provider"
                } else {
                    "model"
                };
                report
                    .warnings
                    .push(ValidationWarning::MissingField { index, field });
                continue;
            }
        };

        if !seen.insert(name.clone()) {
            report
                .warnings
                .push(ValidationWarning::DuplicateName { name });
            continue;
        }

        let mut optional_params = BTreeMap::new();
        for (key, value) in entry.params {
            match ParamValue::from_yaml(&value) {
                Some(param) => {
                    optional_params.insert(key, param);
                }
                None if value.is_null() => {}
                None => report.warnings.push(ValidationWarning::NonScalarParam {
                    name: name.clone(),
                    key,
                }),
            }
        }

        report.descriptors.push(ModelDescriptor {
            name,
            provider,
            model_id,
            optional_params,
        });
    }

    for warning in &report.warnings {
        warn!("{}", warning);
    }

    report
}
