#![warn(missing_docs)]

//! 核心库. 为肺部 CT 分割 (lungmask) 与影像组学特征提取 (pyradiomics)
//! 两类方法提供统一的调用约定.
//!
//! 每个方法都是一个独立进程, 接受三个文件路径 (输入影像, 元数据 JSON, 参数 JSON),
//! 并在标准输出上打印 **唯一一行** JSON 结果. 分割与特征计算本身完全交给外部库完成,
//! 本 crate 只负责:
//!
//! 1. 输入校验 (`contract::validate`);
//! 2. JSON 加载 (`contract::json`);
//! 3. 3D 影像读取与空间信息解析 (`data`);
//! 4. 参数解析与宽松布尔值转换 (`contract::params`);
//! 5. 外部协作者调用 (`external`);
//! 6. 结果封装 (`contract::envelope`).
//!
//! # 注意
//!
//! 1. nifti 影像 (`.nii`, `.nii.gz`, `.hdr/.img`) 由本 crate 直接读取 header;
//!   其他格式的几何信息经由外部影像库读取. 分割掩膜总是写为 `.nii.gz`.
//! 2. 所有临时文件都放在单次调用独占的 [`Scratch`] 目录下, 进程退出
//!   (包括被中断) 前会被清理.
//! 3. 除测试代码外, 程序不会 panic; 若真的发生了, 进程入口会将其转换为
//!   `UnexpectedError` 结果.

/// 三维索引 `(z, h, w)`, 与 `ndarray` 数据布局一致.
pub type Idx3d = (usize, usize, usize);

/// nifti 影像与掩膜数据结构.
pub mod data;

pub mod config;
pub mod consts;
pub mod contract;
pub mod error;
pub mod external;
pub mod features;
pub mod mask;
pub mod method;
pub mod prelude;
pub mod scratch;

pub use config::Config;
pub use contract::{Envelope, Failure, InvocationArgs, Success};
pub use data::{ImageVolume, MaskStatistics, MaskVolume, Spatial, VolumeAttr};
pub use error::{Degradation, MethodError, ValidationError};
pub use scratch::Scratch;

#[cfg(test)]
pub(crate) mod testing;
