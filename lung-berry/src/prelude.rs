//! 🫁欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::config::Config;
pub use crate::contract::{load_json, validate_path, Envelope, InvocationArgs, Success};
pub use crate::data::{ImageVolume, MaskStatistics, MaskVolume, Spatial, VolumeAttr};
pub use crate::error::{Degradation, MethodError, ValidationError};
pub use crate::external::{
    Device, FeatureExtractor, ImageInfo, ImageReader, LungModel, PythonBridge, Segmenter,
};
pub use crate::method::{Extraction, Method, Segmentation};
pub use crate::scratch::Scratch;

pub use crate::consts::label::{BACKGROUND, is_foreground};
