//! 通用常量.

/// 掩膜标签值.
pub mod label {
    /// 掩膜中背景的体素值. 其余任何值都视为肺组织.
    pub const BACKGROUND: u8 = 0;

    /// 体素是否是前景 (肺组织)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        p != BACKGROUND
    }
}

/// 内联 base64 掩膜的默认上限 (编码后字节数), 50 MiB.
pub const DEFAULT_INLINE_LIMIT: usize = 50 * 1024 * 1024;

/// 分割结果掩膜的文件格式.
pub const MASK_FORMAT: &str = "nii.gz";

/// 影像读取器支持的格式, 用于错误提示.
pub const SUPPORTED_FORMATS: &str =
    "NIfTI (.nii, .nii.gz, .hdr/.img), NRRD (.nrrd, .nhdr), MetaImage (.mha, .mhd), DICOM (.dcm)";

/// 默认的影像组学特征类别, 逗号分隔.
pub const DEFAULT_FEATURE_CLASSES: &str = "firstorder,shape,glcm,glrlm,glszm,gldm,ngtdm";

/// 未提供掩膜时的错误信息.
pub const MASK_NOT_PROVIDED: &str =
    "Mask not provided. Provide either 'mask_base64' parameter or 'mask' file input.";

/// 中断时的错误信息.
pub const INTERRUPTED: &str = "Process interrupted by user";
