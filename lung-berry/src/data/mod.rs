use std::fmt::Display;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use ndarray::{Array3, ArrayView, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use thiserror::Error;

use crate::consts::label::is_foreground;
use crate::consts::SUPPORTED_FORMATS;
use crate::contract::validate_path;
use crate::error::ValidationError;
use crate::external::ImageReader;
use crate::scratch::Scratch;
use crate::Idx3d;

pub mod spatial;
pub mod stats;

pub use spatial::Spatial;
pub use stats::MaskStatistics;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 `[x, y, z]` 尺寸转换成 `(z, H, W)`. 以后均按照该模式访问体素数据.
#[inline]
fn shape_of(size: &[usize; 3]) -> Idx3d {
    let [w, h, z] = *size;
    (z, h, w)
}

/// 以 `(a, b, ..)` 形式展示尺寸.
fn dims_tuple(dims: &[usize]) -> String {
    format!("({})", dims.iter().join(", "))
}

/// 3D nifti 体数据的共用属性.
pub trait VolumeAttr {
    /// 获取空间信息.
    fn spatial(&self) -> &Spatial;

    /// 获取 `[x, y, z]` 体素个数.
    #[inline]
    fn size(&self) -> [usize; 3] {
        self.spatial().size
    }

    /// 获取数据形状大小 `(z, H, W)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        shape_of(&self.spatial().size)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn voxel_count(&self) -> usize {
        self.size().iter().product()
    }

    /// 获取 `[x, y, z]` 体素分辨率, 以毫米为单位.
    #[inline]
    fn spacing(&self) -> [f64; 3] {
        self.spatial().spacing
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.spatial().voxel_volume()
    }

    /// 两个体数据的尺寸是否一致?
    #[inline]
    fn same_size<V: VolumeAttr>(&self, other: &V) -> bool {
        self.size() == other.size()
    }
}

/// nifti crate 可以直接读取的文件名后缀. 其他格式交给 [`ImageReader`].
const NIFTI_SUFFIXES: [&str; 3] = [".nii", ".nii.gz", ".hdr"];

fn is_nifti_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    NIFTI_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn unreadable(path: &Path, cause: impl Display) -> ValidationError {
    ValidationError(format!(
        "Failed to read image file '{}': {cause}. Supported formats: {SUPPORTED_FORMATS}",
        path.display()
    ))
}

/// 由 header 中的 `dim` 得到 3D 尺寸.
fn size_from_header(header: &NiftiHeader) -> Result<[usize; 3], ValidationError> {
    let ndim = (header.dim[0] as usize).min(7);
    let dims: Vec<usize> = header.dim[1..=ndim].iter().map(|d| *d as usize).collect();
    size_from_dims(&dims)
}

/// 由各维长度得到 3D 尺寸.
///
/// 超过三维的部分若全为 1 也视为 3D.
fn size_from_dims(dims: &[usize]) -> Result<[usize; 3], ValidationError> {
    if dims.first() == Some(&0) || dims.get(1) == Some(&0) {
        return Err(ValidationError(format!(
            "Image appears to be empty (size: {})",
            dims_tuple(dims)
        )));
    }

    let effective = dims.len() - dims.iter().skip(3).rev().take_while(|d| **d == 1).count();
    match dims {
        [x, y, z, ..] if effective == 3 => Ok([*x, *y, *z]),
        _ => Err(ValidationError(format!(
            "Expected 3D image, but got {effective}D image. Size: {}",
            dims_tuple(dims)
        ))),
    }
}

/// 一个已校验的 3D 输入影像. 只读取几何信息, 体素数据由外部协作者按路径读取.
///
/// nifti 影像的 header 由本 crate 直接解析; 其他格式的几何信息由 [`ImageReader`]
/// 读出, 再换算为一份等价的 nifti header, 供写出同一网格上的掩膜使用.
#[derive(Debug, Clone)]
pub struct ImageVolume {
    source: PathBuf,
    header: BoxedHeader,
    spatial: Spatial,
}

impl VolumeAttr for ImageVolume {
    #[inline]
    fn spatial(&self) -> &Spatial {
        &self.spatial
    }
}

impl ImageVolume {
    /// 打开任意支持格式的 3D 影像. `description` 用于错误提示, 例如 `"Input image"`.
    ///
    /// `.nii`, `.nii.gz` 与 `.hdr` 直接解析 header, 不经过 `reader`;
    /// 其余格式 (NRRD, MetaImage, DICOM 等) 由 `reader` 读取几何信息.
    pub fn read<P, R>(
        path: P,
        description: &str,
        reader: &R,
        scratch: &Scratch,
    ) -> Result<Self, ValidationError>
    where
        P: AsRef<Path>,
        R: ImageReader + ?Sized,
    {
        let path = path.as_ref();
        if is_nifti_path(path) {
            return Self::open(path, description);
        }
        validate_path(path, description)?;

        log::debug!("reading geometry of {} through the image reader", path.display());
        let info = reader
            .read_info(path, scratch)
            .map_err(|e| unreadable(path, e))?;
        let size = size_from_dims(&info.size)?;
        let spatial = Spatial::from_info(&info, size)?;
        Ok(Self {
            source: path.to_path_buf(),
            header: Box::new(spatial.to_header()),
            spatial,
        })
    }

    /// 打开 nifti 格式的 3D 影像. `description` 用于错误提示, 例如 `"Input image"`.
    ///
    /// 依次检查: 路径合法, 文件可被解析, 体数据非空, 体数据为 3D.
    pub fn open<P: AsRef<Path>>(path: P, description: &str) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        validate_path(path, description)?;

        let header = NiftiHeader::from_file(path).map_err(|e| unreadable(path, e))?;
        let size = size_from_header(&header)?;
        let spatial = Spatial::from_header(&header, size);

        Ok(Self {
            source: path.to_path_buf(),
            header: Box::new(header),
            spatial,
        })
    }

    /// 影像所在路径.
    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// 获取 header 部分.
    #[inline]
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

/// 打开掩膜文件错误.
#[derive(Debug, Error)]
pub enum OpenMaskError {
    /// nifti 文件无法解析.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 体数据不是 3D.
    #[error(transparent)]
    Dimension(#[from] ValidationError),

    /// 体数据形状与 header 不一致.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// 分割掩膜. 体素值以 `u8` 保存, 按 `(z, H, W)` 组织; 0 为背景, 其余为肺组织标签.
#[derive(Debug, Clone)]
pub struct MaskVolume {
    header: BoxedHeader,
    spatial: Spatial,
    data: Array3<u8>,
}

impl VolumeAttr for MaskVolume {
    #[inline]
    fn spatial(&self) -> &Spatial {
        &self.spatial
    }
}

impl MaskVolume {
    /// 根据裸标签数据直接创建掩膜. `data` 按 `(z, H, W)` 组织.
    ///
    /// 新掩膜没有任何空间信息 (体素间距为 1, 原点为 0), 通常需要随后调用
    /// [`MaskVolume::adopt_geometry`].
    pub fn from_array(data: Array3<u8>) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        let (z, h, w) = data.dim();
        Self {
            header: Box::default(),
            spatial: Spatial::bare([w, h, z]),
            data,
        }
    }

    /// 打开 nifti 格式的 3D 掩膜. 非整数体素值会被截断为 `u8`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenMaskError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());
        let [w, h, z] = size_from_header(&header)?;

        // 去掉末尾长度为 1 的维度.
        let mut data = obj.into_volume().into_ndarray::<u8>()?;
        while data.ndim() > 3 {
            let last = Axis(data.ndim() - 1);
            data = data.index_axis_move(last, 0);
        }

        // [W, H, z] -> [z, H, W].
        let data = data
            .into_dimensionality::<Ix3>()?
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .to_owned();
        debug_assert_eq!(data.dim(), (z, h, w));

        let spatial = Spatial::from_header(&header, [w, h, z]);
        Ok(Self {
            header,
            spatial,
            data,
        })
    }

    /// 采用 `image` 的体素间距, 原点和方向. 掩膜自身的尺寸保持不变.
    pub fn adopt_geometry(&mut self, image: &ImageVolume) {
        self.header = image.header.clone();
        self.spatial = Spatial {
            size: self.spatial.size,
            ..image.spatial.clone()
        };
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取 3D 掩膜中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取前景 (肺组织) 体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 以 `u8` nifti 格式写出掩膜. 路径以 `.gz` 结尾时自动压缩.
    ///
    /// 写出的 header 继承自当前空间信息的来源 (通常是输入影像).
    pub fn write_nifti<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        let mut header = self.header.as_ref().clone();
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        let [sx, sy, sz] = self.spatial.spacing;
        header.pixdim[1..4].copy_from_slice(&[sx as f32, sy as f32, sz as f32]);

        // [z, H, W] -> [W, H, z].
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&data)
    }

    /// 计算掩膜的基本统计信息. 见 [`MaskStatistics`].
    #[inline]
    pub fn statistics(&self) -> Result<MaskStatistics, crate::Degradation> {
        MaskStatistics::of(self)
    }
}
