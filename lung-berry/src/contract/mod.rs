//! 统一调用约定: 命令行参数, 路径校验, JSON 加载, 参数解析, 结果封装.

use crate::error::MethodError;
use std::ffi::OsString;
use std::path::PathBuf;

pub mod envelope;
pub mod json;
pub mod params;
pub mod validate;

pub use envelope::{Envelope, Failure, Success};
pub use json::{load_json, load_metadata, LoadJsonError};
pub use params::{Fallback, OptionKind, OptionSpec, ParamSpec, ParamValue, ResolvedParams};
pub use validate::validate_path;

/// 单次调用的三个必需路径. 在启动时构建一次, 之后只读.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationArgs {
    /// 输入影像路径.
    pub input_path: PathBuf,

    /// 元数据 JSON 路径.
    pub metadata_path: PathBuf,

    /// 参数 JSON 路径.
    pub params_path: PathBuf,
}

impl InvocationArgs {
    /// 从命令行参数 (不含程序名) 构建. `program` 仅用于错误提示.
    ///
    /// 参数少于 3 个时返回 [`MethodError::Usage`]. 多余的参数会被忽略.
    pub fn from_args<I>(program: &str, args: I) -> Result<Self, MethodError>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut it = args.into_iter().map(|a| PathBuf::from(a.into()));
        match (it.next(), it.next(), it.next()) {
            (Some(input_path), Some(metadata_path), Some(params_path)) => Ok(Self {
                input_path,
                metadata_path,
                params_path,
            }),
            _ => Err(MethodError::Usage(format!(
                "Usage: {program} <input_file> <metadata_file> <params_file>"
            ))),
        }
    }

    /// 依次校验三个路径. 遇到第一个不合法的路径即返回错误.
    pub fn validate(&self) -> Result<(), MethodError> {
        validate_path(&self.input_path, "Input file")?;
        validate_path(&self.metadata_path, "Metadata file")?;
        validate_path(&self.params_path, "Parameters file")?;
        Ok(())
    }
}
