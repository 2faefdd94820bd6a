//! 错误分类.
//!
//! 致命错误统一由 [`MethodError`] 表示, 沿调用链以 `Result` 传递,
//! 最终在进程入口处转换为 JSON 错误结果. 非致命的降级情况由 [`Degradation`]
//! 表示, 只写入日志 (标准错误), 处理流程继续.

use thiserror::Error;

/// 输入校验失败: 文件缺失或不可读, JSON 格式错误, 参数类型错误,
/// 维度或尺寸不匹配等. 错误信息会指明出错的字段或文件.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    /// 由任意可展示的信息构建.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// 单次调用中的致命错误. 任何一种都会使进程以退出码 1 结束.
#[derive(Debug, Error)]
pub enum MethodError {
    /// 命令行参数个数不足.
    #[error("{0}")]
    Usage(String),

    /// 输入校验失败.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 外部库在推理或特征提取时失败.
    #[error("{0}")]
    Processing(String),

    /// 未预期的错误 (例如 panic). 会附带错误类型与完整的诊断信息.
    #[error("Unexpected error: {message}")]
    Unexpected {
        /// 原始错误信息.
        message: String,
        /// 错误类型名.
        error_type: String,
        /// 诊断回溯.
        traceback: String,
    },
}

impl MethodError {
    /// 错误类别名, 仅用于日志.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usage(_) => "UsageError",
            Self::Validation(_) => "ValidationError",
            Self::Processing(_) => "ProcessingError",
            Self::Unexpected { .. } => "UnexpectedError",
        }
    }

    /// 构建 [`MethodError::Validation`].
    #[inline]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(msg))
    }
}

/// 非致命的降级情况. 处理流程会以空值或省略字段继续.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Degradation {
    /// 掩膜统计信息计算失败, 结果中以空对象代替.
    #[error("Error calculating mask statistics: {0}")]
    Statistics(String),

    /// 元数据文件无法解析, 以空对象代替.
    #[error("Could not load metadata, continuing with empty metadata: {0}")]
    Metadata(String),

    /// 掩膜编码后超过内联上限, 结果中省略该字段. 参数为原始字节数.
    #[error("Mask too large for base64 encoding ({:.2} MB)", mebibytes(.0))]
    MaskTooLarge(u64),

    /// 掩膜无法写出或编码.
    #[error("Could not encode mask as base64: {0}")]
    MaskEncoding(String),

    /// 掩膜无法持久化到配置目录.
    #[error("Could not persist mask file: {0}")]
    MaskPersist(String),
}

#[inline]
fn mebibytes(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

impl Degradation {
    /// 将降级情况写入日志 (标准错误).
    pub fn report(&self) {
        log::warn!("{self}");
    }
}
