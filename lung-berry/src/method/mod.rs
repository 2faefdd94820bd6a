//! 方法流水线.
//!
//! 每个方法的处理流程严格线性:
//!
//! 校验参数 -> 加载 JSON -> 读取影像 -> 解析参数 -> 调用外部协作者 -> 计算统计 -> 封装结果.

use crate::contract::json::json_type_name;
use crate::contract::{load_json, InvocationArgs, Success};
use crate::error::{MethodError, ValidationError};
use crate::scratch::Scratch;
use serde_json::{Map, Value};
use std::path::Path;

mod extraction;
mod segmentation;

pub use extraction::{Extraction, EXTRACTION_OPTIONS};
pub use segmentation::{segment, Segmentation, SEGMENTATION_OPTIONS};

/// 一个可被命令行调用的方法.
pub trait Method {
    /// 方法名, 用于用法提示.
    const NAME: &'static str;

    /// 执行一次调用. 所有临时文件都应放在 `scratch` 下.
    fn run(&self, args: &InvocationArgs, scratch: &Scratch) -> Result<Success, MethodError>;
}

/// 加载参数文件. 返回原始 JSON (用于回显) 及其对象形式.
///
/// 参数文件无法解析, 或者不是 JSON 对象, 都是致命错误.
pub(crate) fn load_params(path: &Path) -> Result<(Value, Map<String, Value>), ValidationError> {
    let params = load_json(path, "parameters file")?;
    match params.as_object() {
        Some(map) => {
            let map = map.clone();
            Ok((params, map))
        }
        None => Err(ValidationError(format!(
            "Parameters file must contain a JSON object, got {}",
            json_type_name(&params)
        ))),
    }
}
