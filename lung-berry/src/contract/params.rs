//! 参数解析.
//!
//! 每个方法用一张 [`ParamSpec`] 表声明自己认识的选项: 名字, 类型, 缺省值.
//! [`ParamSpec::resolve`] 据此从参数 JSON 中取值, 补全缺省值, 并做宽松的类型转换.
//! 表中未声明的键会被忽略 (它们仍会原样回显在 `parameters_applied` 中).

use crate::contract::json::json_type_name;
use crate::error::ValidationError;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

/// 选项类型.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// 字符串. 其他任何类型都是错误.
    Text,

    /// 可选字符串. `null`, `""`, `"null"` 都视为未提供.
    OptionalText,

    /// 布尔值. 接受原生布尔值, 或字符串 (见 [`coerce_flag`]).
    Flag,

    /// 数值 (整数或浮点数).
    Number,

    /// 整数.
    Integer,
}

impl OptionKind {
    /// 用于错误提示的类型名.
    pub fn noun(&self) -> &'static str {
        match self {
            Self::Text | Self::OptionalText => "a string",
            Self::Flag => "a boolean",
            Self::Number => "a number",
            Self::Integer => "an integer",
        }
    }
}

/// 选项缺省值.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    /// 字符串缺省值.
    Text(&'static str),

    /// 布尔缺省值.
    Flag(bool),

    /// 整数缺省值.
    Int(i64),

    /// 没有缺省值.
    Absent,
}

impl Fallback {
    fn value(&self) -> ParamValue {
        match *self {
            Self::Text(s) => ParamValue::Text(s.to_owned()),
            Self::Flag(b) => ParamValue::Flag(b),
            Self::Int(i) => ParamValue::Number(Number::from(i)),
            Self::Absent => ParamValue::Absent,
        }
    }
}

/// 单个选项的声明.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// 参数 JSON 中的键名.
    pub name: &'static str,

    /// 类型.
    pub kind: OptionKind,

    /// 缺省值.
    pub default: Fallback,
}

/// 一个方法认识的全部选项.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec(pub &'static [OptionSpec]);

/// 解析后的单个选项值.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// 字符串.
    Text(String),

    /// 布尔值.
    Flag(bool),

    /// 数值. 保留原始 JSON 表示, 以便原样回显.
    Number(Number),

    /// 未提供且没有缺省值.
    Absent,
}

/// 宽松的布尔值转换: 忽略大小写后为 `"true"`, `"1"` 或 `"yes"` 时为真, 其余字符串为假.
#[inline]
pub fn coerce_flag(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

impl OptionSpec {
    fn coerce(&self, raw: &Value) -> Result<ParamValue, ValidationError> {
        let value = match (self.kind, raw) {
            (OptionKind::Text, Value::String(s)) => Some(ParamValue::Text(s.clone())),
            (OptionKind::OptionalText, Value::Null) => Some(ParamValue::Absent),
            (OptionKind::OptionalText, Value::String(s)) if s.is_empty() || s == "null" => {
                Some(ParamValue::Absent)
            }
            (OptionKind::OptionalText, Value::String(s)) => Some(ParamValue::Text(s.clone())),
            (OptionKind::Flag, Value::Bool(b)) => Some(ParamValue::Flag(*b)),
            (OptionKind::Flag, Value::String(s)) => Some(ParamValue::Flag(coerce_flag(s))),
            (OptionKind::Number, Value::Number(n)) => Some(ParamValue::Number(n.clone())),
            (OptionKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(ParamValue::Number(n.clone()))
            }
            _ => None,
        };
        value.ok_or_else(|| {
            ValidationError(format!(
                "Parameter '{}' must be {}, got {}",
                self.name,
                self.kind.noun(),
                json_type_name(raw)
            ))
        })
    }
}

impl ParamSpec {
    /// 按声明表解析 `params`. 任何类型不匹配都是致命错误, 错误信息会指明字段名和实际类型.
    pub fn resolve(&self, params: &Map<String, Value>) -> Result<ResolvedParams, ValidationError> {
        let mut values = IndexMap::with_capacity(self.0.len());
        for opt in self.0 {
            let v = match params.get(opt.name) {
                Some(raw) => opt.coerce(raw)?,
                None => opt.default.value(),
            };
            values.insert(opt.name, v);
        }
        Ok(ResolvedParams { values })
    }
}

/// 解析结果. 访问未声明的选项会得到 `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    values: IndexMap<&'static str, ParamValue>,
}

impl ResolvedParams {
    /// 获取原始解析值.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// 获取字符串选项. 未提供时为 `None`.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 获取布尔选项.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            ParamValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// 获取数值选项.
    pub fn number(&self, name: &str) -> Option<&Number> {
        match self.get(name)? {
            ParamValue::Number(n) => Some(n),
            _ => None,
        }
    }
}
