//! 测试用工具: nifti 样例文件与假的外部协作者.

use crate::contract::InvocationArgs;
use crate::data::ImageVolume;
use crate::external::{
    CollaboratorFailure, Device, FeatureExtractor, ImageInfo, ImageReader, LungModel, RawFeatures,
    RawMask, Segmenter,
};
use crate::features::ExtractionSettings;
use crate::scratch::Scratch;
use crate::Idx3d;
use ndarray::Array3;
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

/// 在 `dir` 下写出全零的 `u8` 3D 影像. `size` 与 `spacing` 均按 `[x, y, z]` 给出.
pub fn write_image(dir: &Path, name: &str, size: [usize; 3], spacing: [f32; 3]) -> PathBuf {
    write_image_with(dir, name, size, spacing, |_| {})
}

/// 同 [`write_image`], 写出前可以修改 header.
pub fn write_image_with<F: FnOnce(&mut NiftiHeader)>(
    dir: &Path,
    name: &str,
    size: [usize; 3],
    spacing: [f32; 3],
    edit: F,
) -> PathBuf {
    let path = dir.join(name);
    let mut header = NiftiHeader::default();
    header.pixdim[1..4].copy_from_slice(&spacing);
    edit(&mut header);

    let [x, y, z] = size;
    let data = Array3::<u8>::zeros((x, y, z));
    WriterOptions::new(&path)
        .reference_header(&header)
        .write_nifti(&data)
        .unwrap();
    path
}

/// 在 `dir` 下写出元数据与参数文件, 并构建调用参数.
pub fn invocation(dir: &Path, image: &Path, metadata: Value, params: Value) -> InvocationArgs {
    let metadata_path = dir.join("metadata.json");
    let params_path = dir.join("params.json");
    fs::write(&metadata_path, metadata.to_string()).unwrap();
    fs::write(&params_path, params.to_string()).unwrap();
    InvocationArgs {
        input_path: image.to_path_buf(),
        metadata_path,
        params_path,
    }
}

/// 左肺标签 1, 右肺标签 2 的两个长方体.
pub fn two_lungs((z, h, w): Idx3d, (zs, hs, ws): Idx3d) -> u8 {
    let inside = |p: usize, n: usize, lo: usize, hi: usize| p * 8 >= n * lo && p * 8 < n * hi;
    if !inside(z, zs, 1, 7) || !inside(h, hs, 2, 6) {
        return 0;
    }
    if inside(w, ws, 1, 3) {
        1
    } else if inside(w, ws, 5, 7) {
        2
    } else {
        0
    }
}

type Fill = fn(Idx3d, Idx3d) -> u8;

/// 非 nifti 影像的几何信息. 未设置时视为无法识别的格式.
fn read_fixed(info: &Option<ImageInfo>) -> Result<ImageInfo, CollaboratorFailure> {
    info.clone()
        .ok_or_else(|| CollaboratorFailure::Other("unsupported image format".into()))
}

/// 按 `[x, y, z]` 给出的 LPS 单位方向网格.
pub fn plain_info(size: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> ImageInfo {
    ImageInfo {
        size: size.to_vec(),
        spacing: spacing.to_vec(),
        origin: origin.to_vec(),
        direction: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    }
}

/// 假的分割模型. 记录调用次数以及最近一次调用的模型与设备.
pub struct FakeSegmenter {
    outcome: Result<Option<Array3<u8>>, CollaboratorFailure>,
    fill: Fill,
    calls: Cell<usize>,
    seen: Cell<Option<(LungModel, Device)>>,
    info: Option<ImageInfo>,
}

impl FakeSegmenter {
    /// 按输入影像的形状用 `fill` 生成掩膜.
    pub fn new(fill: Fill) -> Self {
        Self {
            outcome: Ok(None),
            fill,
            calls: Cell::new(0),
            seen: Cell::new(None),
            info: None,
        }
    }

    /// 读取非 nifti 影像时返回 `info`.
    pub fn with_info(self, info: ImageInfo) -> Self {
        Self {
            info: Some(info),
            ..self
        }
    }

    /// 总是返回 `data`.
    pub fn returning(data: Array3<u8>) -> Self {
        Self {
            outcome: Ok(Some(data)),
            ..Self::new(two_lungs)
        }
    }

    /// 总是失败.
    pub fn failing(failure: CollaboratorFailure) -> Self {
        Self {
            outcome: Err(failure),
            ..Self::new(two_lungs)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn seen(&self) -> Option<(LungModel, Device)> {
        self.seen.get()
    }
}

impl Segmenter for FakeSegmenter {
    fn segment(
        &self,
        image: &ImageVolume,
        model: LungModel,
        device: Device,
        _scratch: &Scratch,
    ) -> Result<RawMask, CollaboratorFailure> {
        use crate::data::VolumeAttr;

        self.calls.set(self.calls.get() + 1);
        self.seen.set(Some((model, device)));
        match &self.outcome {
            Ok(Some(data)) => Ok(RawMask::Array(data.clone())),
            Ok(None) => {
                let shape = image.shape();
                let fill = self.fill;
                Ok(RawMask::Array(Array3::from_shape_fn(shape, |p| {
                    fill(p, shape)
                })))
            }
            Err(e) => Err(e.clone()),
        }
    }
}

impl ImageReader for FakeSegmenter {
    fn read_info(&self, _path: &Path, _scratch: &Scratch) -> Result<ImageInfo, CollaboratorFailure> {
        read_fixed(&self.info)
    }
}

/// 假的特征提取器. 记录调用次数以及最近一次调用的设置.
pub struct FakeExtractor {
    outcome: Result<RawFeatures, CollaboratorFailure>,
    calls: Cell<usize>,
    seen: RefCell<Option<ExtractionSettings>>,
    info: Option<ImageInfo>,
}

impl FakeExtractor {
    /// 总是返回 `features` (一个 JSON 对象).
    pub fn new(features: Value) -> Self {
        Self {
            outcome: Ok(serde_json::from_value(features).unwrap()),
            calls: Cell::new(0),
            seen: RefCell::new(None),
            info: None,
        }
    }

    /// 总是失败.
    pub fn failing(failure: CollaboratorFailure) -> Self {
        Self {
            outcome: Err(failure),
            calls: Cell::new(0),
            seen: RefCell::new(None),
            info: None,
        }
    }

    /// 读取非 nifti 影像 (影像或掩膜) 时返回 `info`.
    pub fn with_info(self, info: ImageInfo) -> Self {
        Self {
            info: Some(info),
            ..self
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn seen(&self) -> Option<ExtractionSettings> {
        self.seen.borrow().clone()
    }
}

impl FeatureExtractor for FakeExtractor {
    fn extract(
        &self,
        image: &Path,
        mask: &Path,
        settings: &ExtractionSettings,
        _scratch: &Scratch,
    ) -> Result<RawFeatures, CollaboratorFailure> {
        assert!(image.exists());
        assert!(mask.exists());
        self.calls.set(self.calls.get() + 1);
        *self.seen.borrow_mut() = Some(settings.clone());
        self.outcome.clone()
    }
}

impl ImageReader for FakeExtractor {
    fn read_info(&self, _path: &Path, _scratch: &Scratch) -> Result<ImageInfo, CollaboratorFailure> {
        read_fixed(&self.info)
    }
}
