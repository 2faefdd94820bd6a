//! 外部协作者: 肺分割模型与影像组学特征提取器.
//!
//! 推理, 特征计算以及 nifti 以外格式的影像读取都不在本 crate 中实现. 这里只定义调用接口
//! ([`ImageReader`], [`Segmenter`], [`FeatureExtractor`]) 及其失败分类,
//! 默认实现见 [`PythonBridge`].

use crate::data::{ImageVolume, MaskVolume};
use crate::error::{MethodError, ValidationError};
use crate::features::ExtractionSettings;
use crate::scratch::Scratch;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

mod bridge;

pub use bridge::PythonBridge;

/// 预训练肺分割模型.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LungModel {
    /// 默认模型, 左右肺二分类.
    R231,

    /// 肺叶分割.
    LTRCLobes,

    /// 针对 COVID-19 病例微调的 R231.
    R231CovidWeb,
}

impl LungModel {
    /// 全部可用模型.
    pub const ALL: [Self; 3] = [Self::R231, Self::LTRCLobes, Self::R231CovidWeb];

    /// 模型名, 与外部库中的名字一致.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::R231 => "R231",
            Self::LTRCLobes => "LTRCLobes",
            Self::R231CovidWeb => "R231CovidWeb",
        }
    }
}

impl fmt::Display for LungModel {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LungModel {
    type Err = ValidationError;

    /// 模型名区分大小写.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|m| m.name() == s).ok_or_else(|| {
            ValidationError(format!(
                "Invalid model name '{s}'. Valid options: {}",
                Self::ALL.iter().map(LungModel::name).join(", ")
            ))
        })
    }
}

/// 推理设备.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// 由外部库自行选择, 有 GPU 时使用 GPU.
    #[default]
    Auto,

    /// 强制使用 CPU.
    Cpu,
}

impl Device {
    /// 由 `force_cpu` 参数得到设备.
    #[inline]
    pub const fn from_force_cpu(force_cpu: bool) -> Self {
        if force_cpu {
            Self::Cpu
        } else {
            Self::Auto
        }
    }
}

/// 分割模型返回的原始掩膜.
#[derive(Debug, Clone)]
pub enum RawMask {
    /// 裸数组, 按 `(z, H, W)` 组织, 不带任何空间信息.
    Array(Array3<u8>),

    /// 已带空间信息的体数据.
    Volume(MaskVolume),
}

/// 特征提取器返回的原始特征表, 保持提取器给出的顺序.
pub type RawFeatures = IndexMap<String, Value>;

/// 外部影像库读出的影像几何信息. 各数组的长度等于影像维数 (`direction` 为其平方),
/// 坐标系为 LPS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageInfo {
    /// 各维体素个数.
    pub size: Vec<usize>,

    /// 各维体素间距, 以毫米为单位.
    pub spacing: Vec<f64>,

    /// 原点, 以毫米为单位.
    pub origin: Vec<f64>,

    /// 方向余弦矩阵的行优先展开.
    pub direction: Vec<f64>,
}

impl ImageInfo {
    /// 影像维数.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.size.len()
    }
}

/// 外部协作者调用失败.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorFailure {
    /// 推理或计算过程中的运行时错误.
    #[error("{0}")]
    Runtime(String),

    /// 调用成功但没有产生结果.
    #[error("no output was produced")]
    NoOutput,

    /// 其他错误, 包括无法启动外部进程.
    #[error("{0}")]
    Other(String),
}

impl CollaboratorFailure {
    /// 运行时错误是否与 GPU 有关?
    pub fn is_gpu_related(&self) -> bool {
        match self {
            Self::Runtime(msg) => msg.contains("CUDA") || msg.contains("GPU"),
            _ => false,
        }
    }

    /// 转换为分割阶段的致命错误. GPU 相关的运行时错误会附带改用 CPU 的提示.
    pub fn into_segmentation_error(self) -> MethodError {
        if self.is_gpu_related() {
            return MethodError::Processing(format!(
                "GPU error: {self}. Try setting force_cpu=true parameter."
            ));
        }
        let msg = match self {
            Self::Runtime(msg) => format!("Runtime error during lungmask application: {msg}"),
            Self::NoOutput => "Lungmask returned None (no mask generated)".to_owned(),
            Self::Other(msg) => format!("Error applying lungmask: {msg}"),
        };
        MethodError::Processing(msg)
    }

    /// 转换为特征提取阶段的致命错误.
    #[inline]
    pub fn into_extraction_error(self) -> MethodError {
        MethodError::Processing(format!("Error extracting radiomic features: {self}"))
    }
}

/// 通用影像读取器. 只读取几何信息, 不读取体素数据.
pub trait ImageReader {
    /// 读取 `path` 处影像的几何信息. 中间文件应放在 `scratch` 下.
    fn read_info(&self, path: &Path, scratch: &Scratch) -> Result<ImageInfo, CollaboratorFailure>;
}

/// 肺分割模型.
pub trait Segmenter {
    /// 在 `device` 上用 `model` 分割 `image`. 中间文件应放在 `scratch` 下.
    fn segment(
        &self,
        image: &ImageVolume,
        model: LungModel,
        device: Device,
        scratch: &Scratch,
    ) -> Result<RawMask, CollaboratorFailure>;
}

/// 影像组学特征提取器.
pub trait FeatureExtractor {
    /// 按 `settings` 提取 `image` 在 `mask` 区域内的特征.
    fn extract(
        &self,
        image: &Path,
        mask: &Path,
        settings: &ExtractionSettings,
        scratch: &Scratch,
    ) -> Result<RawFeatures, CollaboratorFailure>;
}

impl<T: ImageReader + ?Sized> ImageReader for &T {
    #[inline]
    fn read_info(&self, path: &Path, scratch: &Scratch) -> Result<ImageInfo, CollaboratorFailure> {
        (**self).read_info(path, scratch)
    }
}

impl<T: Segmenter + ?Sized> Segmenter for &T {
    #[inline]
    fn segment(
        &self,
        image: &ImageVolume,
        model: LungModel,
        device: Device,
        scratch: &Scratch,
    ) -> Result<RawMask, CollaboratorFailure> {
        (**self).segment(image, model, device, scratch)
    }
}

impl<T: FeatureExtractor + ?Sized> FeatureExtractor for &T {
    #[inline]
    fn extract(
        &self,
        image: &Path,
        mask: &Path,
        settings: &ExtractionSettings,
        scratch: &Scratch,
    ) -> Result<RawFeatures, CollaboratorFailure> {
        (**self).extract(image, mask, settings, scratch)
    }
}
