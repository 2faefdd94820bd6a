//! 影像组学特征提取方法.

use super::{load_params, Method};
use crate::consts::DEFAULT_FEATURE_CLASSES;
use crate::contract::{
    load_metadata, validate_path, Fallback, InvocationArgs, OptionKind, OptionSpec, ParamSpec,
    ResolvedParams, Success,
};
use crate::data::{ImageVolume, VolumeAttr};
use crate::error::{MethodError, ValidationError};
use crate::external::{CollaboratorFailure, FeatureExtractor, ImageReader};
use crate::features::{ExtractionSettings, FeatureSelection, FeatureSet};
use crate::mask::{MaskEncoding, MaskSource};
use crate::scratch::Scratch;
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// 特征提取方法认识的参数.
pub const EXTRACTION_OPTIONS: ParamSpec = ParamSpec(&[
    OptionSpec {
        name: "mask_base64",
        kind: OptionKind::OptionalText,
        default: Fallback::Absent,
    },
    OptionSpec {
        name: "feature_classes",
        kind: OptionKind::Text,
        default: Fallback::Text(DEFAULT_FEATURE_CLASSES),
    },
    OptionSpec {
        name: "bin_width",
        kind: OptionKind::Number,
        default: Fallback::Int(25),
    },
    OptionSpec {
        name: "normalize",
        kind: OptionKind::Flag,
        default: Fallback::Flag(false),
    },
    OptionSpec {
        name: "normalize_scale",
        kind: OptionKind::Number,
        default: Fallback::Int(100),
    },
    OptionSpec {
        name: "label",
        kind: OptionKind::Integer,
        default: Fallback::Int(1),
    },
    OptionSpec {
        name: "mask_encoding",
        kind: OptionKind::Text,
        default: Fallback::Text("auto"),
    },
]);

impl ExtractionSettings {
    /// 由解析后的参数构建提取设置.
    pub fn from_params(params: &ResolvedParams) -> Result<Self, ValidationError> {
        let classes = params.text("feature_classes").unwrap_or(DEFAULT_FEATURE_CLASSES);
        let selection = FeatureSelection::parse(classes)?;
        let normalize = params.flag("normalize").unwrap_or(false);
        let number = |name: &str, fallback: u64| {
            params
                .number(name)
                .cloned()
                .unwrap_or_else(|| Number::from(fallback))
        };
        let label = match params.number("label") {
            Some(n) => n.as_i64().ok_or_else(|| {
                ValidationError(format!("Parameter 'label' is out of range: {n}"))
            })?,
            None => 1,
        };

        Ok(Self {
            bin_width: number("bin_width", 25),
            normalize,
            normalize_scale: normalize.then(|| number("normalize_scale", 100)),
            label,
            selection,
        })
    }
}

#[derive(Serialize)]
struct ExtractionMetadata<'a> {
    method: &'static str,
    image_size: [usize; 3],
    image_spacing: [f64; 3],
    mask_size: [usize; 3],
    mask_spacing: [f64; 3],
    settings: Value,
    original_metadata: &'a Map<String, Value>,
}

/// 影像组学特征提取方法.
#[derive(Debug, Clone)]
pub struct Extraction<E> {
    extractor: E,
}

impl<E: FeatureExtractor> Extraction<E> {
    /// 使用 `extractor` 创建方法.
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }
}

impl<E: FeatureExtractor + ImageReader> Method for Extraction<E> {
    const NAME: &'static str = "pyradiomics";

    fn run(&self, args: &InvocationArgs, scratch: &Scratch) -> Result<Success, MethodError> {
        args.validate()?;
        let (params, params_map) = load_params(&args.params_path)?;
        let metadata = load_metadata(&args.metadata_path);
        let image = ImageVolume::read(&args.input_path, "Image file", &self.extractor, scratch)?;

        let resolved = EXTRACTION_OPTIONS.resolve(&params_map)?;
        let settings = ExtractionSettings::from_params(&resolved)?;
        let encoding: MaskEncoding = resolved.text("mask_encoding").unwrap_or("auto").parse()?;

        let source = MaskSource::locate(resolved.text("mask_base64"), &metadata)?;
        let staged = source.materialize(encoding, scratch)?;
        validate_path(staged.path(), "Mask file")?;
        let mask = ImageVolume::read(staged.path(), "Mask file", &self.extractor, scratch)?;

        if !image.same_size(&mask) {
            return Err(MethodError::validation(format!(
                "Image size {} does not match mask size {}",
                image.spatial().size_tuple(),
                mask.spatial().size_tuple()
            )));
        }

        log::info!(
            "extracting {:?} features from {}",
            settings.selection.enabled,
            image.source().display()
        );
        let raw = self
            .extractor
            .extract(image.source(), staged.path(), &settings, scratch)
            .map_err(CollaboratorFailure::into_extraction_error)?;
        let features = FeatureSet::from_raw(&raw);

        let meta = ExtractionMetadata {
            method: Self::NAME,
            image_size: image.size(),
            image_spacing: image.spacing(),
            mask_size: mask.size(),
            mask_spacing: mask.spacing(),
            settings: settings.echo(),
            original_metadata: &metadata,
        };
        Success::new(
            format!(
                "Successfully extracted {} radiomic features",
                features.feature_count
            ),
            &features,
            &meta,
            params,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::encode;
    use crate::testing::{invocation, plain_info, write_image, FakeExtractor};
    use serde_json::json;

    fn sample_features() -> Value {
        json!({
            "diagnostics_Image-original_Mean": 12.0,
            "original_shape_Sphericity": 0.61,
            "original_firstorder_Mean": -512.25,
            "original_glcm_Idm": 0.5
        })
    }

    #[test]
    fn test_missing_mask() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii", [8, 8, 4], [1.0, 1.0, 1.0]);
        let args = invocation(dir.path(), &image, json!({"study": "x"}), json!({}));
        let fake = FakeExtractor::new(sample_features());
        let e = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap_err();
        assert_eq!(
            e.to_string(),
            "Mask not provided. Provide either 'mask_base64' parameter or 'mask' file input."
        );
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn test_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii", [256, 256, 100], [1.0, 1.0, 1.0]);
        let mask = write_image(dir.path(), "mask.nii", [256, 256, 99], [1.0, 1.0, 1.0]);
        let args = invocation(
            dir.path(),
            &image,
            json!({"files": {"mask": mask}}),
            json!({}),
        );
        let fake = FakeExtractor::new(sample_features());
        let e = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap_err();
        assert_eq!(
            e.to_string(),
            "Image size (256, 256, 100) does not match mask size (256, 256, 99)"
        );
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn test_inline_mask() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii", [8, 8, 4], [0.5, 0.5, 2.0]);
        let mask = write_image(dir.path(), "mask.nii.gz", [8, 8, 4], [0.5, 0.5, 2.0]);
        let inline = encode(&std::fs::read(&mask).unwrap());
        let args = invocation(
            dir.path(),
            &image,
            json!({"files": {}}),
            json!({
                "mask_base64": inline,
                "feature_classes": "firstorder,shape,glcm",
                "normalize": "true",
                "bin_width": 10
            }),
        );
        let fake = FakeExtractor::new(sample_features());
        let s = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap();

        assert_eq!(s.message, "Successfully extracted 3 radiomic features");
        assert_eq!(s.data["feature_count"], 3);
        assert_eq!(s.data["feature_classes"], json!(["shape", "firstorder", "glcm"]));
        assert_eq!(s.data["features"]["glcm"]["original_glcm_Idm"], 0.5);
        assert!(s.data["all_features"]
            .as_object()
            .unwrap()
            .keys()
            .all(|k| !k.starts_with("diagnostics")));

        assert_eq!(s.metadata["method"], "pyradiomics");
        assert_eq!(s.metadata["image_size"], json!([8, 8, 4]));
        assert_eq!(s.metadata["mask_spacing"], json!([0.5, 0.5, 2.0]));
        assert_eq!(
            s.metadata["settings"],
            json!({
                "bin_width": 10,
                "normalize": true,
                "normalize_scale": 100,
                "feature_classes": ["firstorder", "shape", "glcm"]
            })
        );
        assert_eq!(s.metadata["original_metadata"], json!({"files": {}}));

        let seen = fake.seen().unwrap();
        assert_eq!(seen.label, 1);
        assert!(!seen.selection.wavelet);
    }

    #[test]
    fn test_mask_from_metadata_list() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii.gz", [8, 8, 4], [1.0, 1.0, 1.0]);
        let mask = write_image(dir.path(), "mask.nii.gz", [8, 8, 4], [1.0, 1.0, 1.0]);
        let args = invocation(
            dir.path(),
            &image,
            json!({"files": {"mask": [mask]}}),
            json!({"feature_classes": "glcm, wavelet-HHH"}),
        );
        let fake = FakeExtractor::new(sample_features());
        let s = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap();
        assert_eq!(s.metadata["settings"]["normalize_scale"], Value::Null);
        assert!(fake.seen().unwrap().selection.wavelet);
    }

    #[test]
    fn test_base64_text_mask_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii", [8, 8, 4], [1.0, 1.0, 1.0]);
        let mask = write_image(dir.path(), "mask.nii.gz", [8, 8, 4], [1.0, 1.0, 1.0]);
        let text = dir.path().join("mask-ref.txt");
        std::fs::write(&text, encode(&std::fs::read(&mask).unwrap())).unwrap();
        let args = invocation(
            dir.path(),
            &image,
            json!({"files": {"mask": text}}),
            json!({}),
        );
        let fake = FakeExtractor::new(sample_features());
        let s = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap();
        assert_eq!(s.metadata["mask_size"], json!([8, 8, 4]));
    }

    /// NRRD 掩膜的尺寸经由读取器获得.
    #[test]
    fn test_nrrd_mask() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii.gz", [8, 8, 4], [1.0, 1.0, 1.0]);
        let mask = dir.path().join("mask.nrrd");
        std::fs::write(&mask, b"NRRD0004\ntype: uchar\ndimension: 3\n").unwrap();
        let args = invocation(
            dir.path(),
            &image,
            json!({"files": {"mask": mask}}),
            json!({}),
        );

        let fake = FakeExtractor::new(sample_features())
            .with_info(plain_info([8, 8, 4], [1.0, 1.0, 1.0], [0.0; 3]));
        let s = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap();
        assert_eq!(s.metadata["mask_size"], json!([8, 8, 4]));
        assert_eq!(fake.calls(), 1);

        let fake = FakeExtractor::new(sample_features())
            .with_info(plain_info([8, 8, 3], [1.0, 1.0, 1.0], [0.0; 3]));
        let e = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap_err();
        assert_eq!(
            e.to_string(),
            "Image size (8, 8, 4) does not match mask size (8, 8, 3)"
        );
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn test_extractor_failure() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii", [8, 8, 4], [1.0, 1.0, 1.0]);
        let mask = write_image(dir.path(), "mask.nii", [8, 8, 4], [1.0, 1.0, 1.0]);
        let args = invocation(
            dir.path(),
            &image,
            json!({"files": {"mask": mask}}),
            json!({}),
        );
        let fake = FakeExtractor::failing(CollaboratorFailure::Runtime(
            "Label (1) not present in mask".into(),
        ));
        let e = Extraction::new(&fake)
            .run(&args, &Scratch::new().unwrap())
            .unwrap_err();
        assert_eq!(
            e.to_string(),
            "Error extracting radiomic features: Label (1) not present in mask"
        );
    }

    #[test]
    fn test_parameter_errors() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "ct.nii", [8, 8, 4], [1.0, 1.0, 1.0]);
        let fake = FakeExtractor::new(sample_features());
        let method = Extraction::new(&fake);

        for (params, expected) in [
            (
                json!({"bin_width": "25"}),
                "Parameter 'bin_width' must be a number, got string",
            ),
            (
                json!({"normalize": 0}),
                "Parameter 'normalize' must be a boolean, got number",
            ),
            (
                json!({"mask_encoding": "hex"}),
                "Parameter 'mask_encoding' must be one of auto, binary, base64, got 'hex'",
            ),
        ] {
            let args = invocation(dir.path(), &image, json!({}), params);
            let e = method.run(&args, &Scratch::new().unwrap()).unwrap_err();
            assert_eq!(e.to_string(), expected);
        }
    }
}
