//! 肺分割方法.

use super::{load_params, Method};
use crate::config::Config;
use crate::consts::MASK_FORMAT;
use crate::contract::{
    load_metadata, Fallback, InvocationArgs, OptionKind, OptionSpec, ParamSpec, Success,
};
use crate::data::{ImageVolume, MaskStatistics, MaskVolume, Spatial, VolumeAttr};
use crate::error::{Degradation, MethodError};
use crate::external::{CollaboratorFailure, Device, ImageReader, LungModel, RawMask, Segmenter};
use crate::mask::{encode, encoded_len};
use crate::scratch::Scratch;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::Builder;

/// 分割方法认识的参数.
pub const SEGMENTATION_OPTIONS: ParamSpec = ParamSpec(&[
    OptionSpec {
        name: "model",
        kind: OptionKind::Text,
        default: Fallback::Text("R231"),
    },
    OptionSpec {
        name: "force_cpu",
        kind: OptionKind::Flag,
        default: Fallback::Flag(false),
    },
]);

/// 用 `segmenter` 分割 `image`.
///
/// 模型名在调用外部协作者之前校验. 返回的掩膜带有 `image` 的空间信息,
/// 且尺寸与 `image` 一致.
pub fn segment<S: Segmenter + ?Sized>(
    segmenter: &S,
    image: &ImageVolume,
    model: &str,
    force_cpu: bool,
    scratch: &Scratch,
) -> Result<MaskVolume, MethodError> {
    let model: LungModel = model.parse()?;
    let device = Device::from_force_cpu(force_cpu);
    log::info!("segmenting {} with {model} on {device:?}", image.source().display());

    let mut mask = match segmenter
        .segment(image, model, device, scratch)
        .map_err(CollaboratorFailure::into_segmentation_error)?
    {
        RawMask::Array(data) => MaskVolume::from_array(data),
        RawMask::Volume(volume) => volume,
    };

    if !mask.same_size(image) {
        return Err(MethodError::validation(format!(
            "Mask size {} does not match image size {}",
            mask.spatial().size_tuple(),
            image.spatial().size_tuple()
        )));
    }
    mask.adopt_geometry(image);
    Ok(mask)
}

/// 分割结果掩膜文件.
#[derive(Debug, Default)]
struct MaskPayload {
    base64: Option<String>,
    file: Option<PathBuf>,
    size_bytes: u64,
}

#[derive(Serialize)]
struct SegmentationData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_file: Option<PathBuf>,
    mask_size_bytes: u64,
    mask_format: &'static str,
    #[serde(serialize_with = "stats_or_empty")]
    statistics: Option<MaskStatistics>,
    mask_metadata: &'a Spatial,
}

/// 统计失败时序列化为空对象.
fn stats_or_empty<S: Serializer>(
    stats: &Option<MaskStatistics>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match stats {
        Some(s) => s.serialize(serializer),
        None => Map::new().serialize(serializer),
    }
}

#[derive(Serialize)]
struct SegmentationMetadata<'a> {
    method: &'static str,
    model: &'a str,
    force_cpu: bool,
    input_file: &'a Path,
    input_image_size: [usize; 3],
    input_image_spacing: [f64; 3],
    input_image_origin: [f64; 3],
    input_image_direction: [f64; 9],
    original_metadata: &'a Map<String, Value>,
}

/// 肺分割方法.
#[derive(Debug, Clone)]
pub struct Segmentation<S> {
    segmenter: S,
    config: Config,
}

impl<S: Segmenter> Segmentation<S> {
    /// 使用 `segmenter` 和 `config` 创建方法.
    pub fn new(segmenter: S, config: Config) -> Self {
        Self { segmenter, config }
    }

    /// 将掩膜写为 nifti, 按大小决定是否内联, 并按配置持久化.
    ///
    /// 此处的任何失败都不是致命的.
    fn package(&self, mask: &MaskVolume, scratch: &Scratch) -> MaskPayload {
        let path = scratch.join(format!("mask.{MASK_FORMAT}"));
        let written = mask
            .write_nifti(&path)
            .map_err(|e| e.to_string())
            .and_then(|_| fs::read(&path).map_err(|e| e.to_string()));
        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                Degradation::MaskEncoding(e).report();
                return MaskPayload::default();
            }
        };

        let size_bytes = bytes.len() as u64;
        let base64 = match encoded_len(bytes.len()) {
            Some(n) if n <= self.config.inline_limit => Some(encode(&bytes)),
            _ => {
                Degradation::MaskTooLarge(size_bytes).report();
                None
            }
        };
        let file = self
            .config
            .mask_dir
            .as_deref()
            .and_then(|dir| match persist(&path, dir) {
                Ok(p) => Some(p),
                Err(e) => {
                    Degradation::MaskPersist(e).report();
                    None
                }
            });

        MaskPayload {
            base64,
            file,
            size_bytes,
        }
    }
}

/// 把 `src` 复制到 `dir` 下一个不重名的文件中.
fn persist(src: &Path, dir: &Path) -> Result<PathBuf, String> {
    fs::create_dir_all(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
    let (_, target) = Builder::new()
        .prefix("lung-mask-")
        .suffix(&format!(".{MASK_FORMAT}"))
        .tempfile_in(dir)
        .and_then(|f| f.keep().map_err(|e| e.error))
        .map_err(|e| format!("{}: {e}", dir.display()))?;
    fs::copy(src, &target).map_err(|e| format!("{}: {e}", target.display()))?;
    Ok(target)
}

impl<S: Segmenter + ImageReader> Method for Segmentation<S> {
    const NAME: &'static str = "lungmask";

    fn run(&self, args: &InvocationArgs, scratch: &Scratch) -> Result<Success, MethodError> {
        args.validate()?;
        let (params, params_map) = load_params(&args.params_path)?;
        let metadata = load_metadata(&args.metadata_path);
        let image = ImageVolume::read(&args.input_path, "Input image", &self.segmenter, scratch)?;

        let resolved = SEGMENTATION_OPTIONS.resolve(&params_map)?;
        let model = resolved.text("model").unwrap_or("R231");
        let force_cpu = resolved.flag("force_cpu").unwrap_or(false);

        let mask = segment(&self.segmenter, &image, model, force_cpu, scratch)?;
        let statistics = match mask.statistics() {
            Ok(s) => Some(s),
            Err(d) => {
                d.report();
                None
            }
        };
        let payload = self.package(&mask, scratch);

        let data = SegmentationData {
            mask_base64: payload.base64,
            mask_file: payload.file,
            mask_size_bytes: payload.size_bytes,
            mask_format: MASK_FORMAT,
            statistics,
            mask_metadata: mask.spatial(),
        };
        let spatial = image.spatial();
        let meta = SegmentationMetadata {
            method: Self::NAME,
            model,
            force_cpu,
            input_file: &args.input_path,
            input_image_size: spatial.size,
            input_image_spacing: spatial.spacing,
            input_image_origin: spatial.origin,
            input_image_direction: spatial.direction,
            original_metadata: &metadata,
        };
        Success::new(
            format!("Successfully generated lung mask using model '{model}'"),
            &data,
            &meta,
            params,
        )
    }
}
