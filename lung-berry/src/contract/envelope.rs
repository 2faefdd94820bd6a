//! 结果封装.
//!
//! 每次调用在标准输出上只打印一行 JSON. 成功与失败的顶层结构固定:
//!
//! ```text
//! {"status":"success","message":..,"data":{..},"metadata":{..},"parameters_applied":{..}}
//! {"status":"error","message":..,"error_type":..,"traceback":..}
//! ```

use crate::consts::INTERRUPTED;
use crate::error::MethodError;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// 本进程是否已经输出过结果.
static EMITTED: AtomicBool = AtomicBool::new(false);

/// 唯一的输出产物.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    /// 成功.
    Success(Success),

    /// 失败.
    Error(Failure),
}

/// 成功结果.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Success {
    /// 人类可读的结果说明.
    pub message: String,

    /// 方法相关的结果数据.
    pub data: Value,

    /// 方法名及处理元信息, 其中 `original_metadata` 原样回显元数据文件.
    pub metadata: Value,

    /// 参数文件原样回显.
    pub parameters_applied: Value,
}

impl Success {
    /// 由可序列化的 `data` 与 `metadata` 构建成功结果.
    pub fn new<D: Serialize, M: Serialize>(
        message: impl Into<String>,
        data: &D,
        metadata: &M,
        parameters_applied: Value,
    ) -> Result<Self, MethodError> {
        let to_value = |v: serde_json::Result<Value>| {
            v.map_err(|e| MethodError::Processing(format!("Error serializing result: {e}")))
        };
        Ok(Self {
            message: message.into(),
            data: to_value(serde_json::to_value(data))?,
            metadata: to_value(serde_json::to_value(metadata))?,
            parameters_applied,
        })
    }
}

/// 失败结果.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    /// 错误信息.
    pub message: String,

    /// 错误类型名. 仅未预期错误携带.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// 诊断回溯. 仅未预期错误携带.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl Failure {
    /// 仅包含错误信息的失败结果.
    #[inline]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            traceback: None,
        }
    }
}

impl From<MethodError> for Failure {
    fn from(e: MethodError) -> Self {
        match e {
            MethodError::Unexpected {
                ref error_type,
                ref traceback,
                ..
            } => Self {
                message: e.to_string(),
                error_type: Some(error_type.clone()),
                traceback: Some(traceback.clone()),
            },
            other => Self::message(other.to_string()),
        }
    }
}

impl From<MethodError> for Envelope {
    #[inline]
    fn from(e: MethodError) -> Self {
        Self::Error(e.into())
    }
}

impl Envelope {
    /// 进程被中断时的结果.
    #[inline]
    pub fn interrupted() -> Self {
        Self::Error(Failure::message(INTERRUPTED))
    }

    /// 是否成功.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// 序列化为单行 JSON. 序列化失败时退化为一个只含错误信息的对象, 保证输出始终合法.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            let fallback = Self::Error(Failure::message(format!(
                "Unexpected error: could not serialize result: {e}"
            )));
            serde_json::to_string(&fallback).unwrap_or_else(|_| {
                r#"{"status":"error","message":"Unexpected error: could not serialize result"}"#
                    .to_owned()
            })
        })
    }

    /// 将结果写入 `w`, 以换行结尾并立即 flush.
    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        let line = self.to_line();
        writeln!(w, "{line}")?;
        w.flush()
    }

    /// 将结果作为本进程唯一的一行输出写入标准输出.
    ///
    /// 同一进程内只有第一次调用会真正写出, 之后的调用返回 `Ok(false)`.
    /// 这保证了主流程与中断处理不会同时输出.
    pub fn emit(&self) -> io::Result<bool> {
        if EMITTED.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.write_to(io::stdout().lock())?;
        Ok(true)
    }
}
