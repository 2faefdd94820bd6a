//! JSON 文件加载.

use crate::error::{Degradation, ValidationError};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// 加载 JSON 文件错误.
#[derive(Debug, Error)]
pub enum LoadJsonError {
    /// 文件内容不是合法 JSON. 附带解析器给出的诊断信息.
    #[error("Invalid JSON in {description}: {source}")]
    Syntax {
        /// 文件描述.
        description: String,
        /// 解析器诊断.
        source: serde_json::Error,
    },

    /// 其他底层 I/O 错误 (包括非 UTF-8 内容).
    #[error("Error reading {description}: {source}")]
    Io {
        /// 文件描述.
        description: String,
        /// 底层错误.
        source: io::Error,
    },
}

impl From<LoadJsonError> for ValidationError {
    fn from(e: LoadJsonError) -> Self {
        ValidationError(e.to_string())
    }
}

/// 读取并解析 `path` 处的 JSON 文件.
///
/// 该函数不会 panic. 调用者可以自行决定错误是否致命:
/// 参数文件加载失败是致命的, 元数据加载失败则不是 (见 [`load_metadata`]).
pub fn load_json<P: AsRef<Path>>(path: P, description: &str) -> Result<Value, LoadJsonError> {
    let text = fs::read_to_string(path.as_ref()).map_err(|source| LoadJsonError::Io {
        description: description.to_owned(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LoadJsonError::Syntax {
        description: description.to_owned(),
        source,
    })
}

/// 加载元数据文件. 失败时记录降级日志并返回空对象.
///
/// 元数据应为 JSON 对象; 其他合法 JSON 同样视为降级.
pub fn load_metadata<P: AsRef<Path>>(path: P) -> Map<String, Value> {
    match load_json(path, "metadata file") {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            Degradation::Metadata(format!(
                "metadata file must contain a JSON object, got {}",
                json_type_name(&other)
            ))
            .report();
            Map::new()
        }
        Err(e) => {
            Degradation::Metadata(e.to_string()).report();
            Map::new()
        }
    }
}

/// JSON 值的类型名, 用于错误提示.
pub fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
