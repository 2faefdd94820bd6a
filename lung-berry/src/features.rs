//! 影像组学特征类别, 提取设置与结果整理.
//!
//! 特征名形如 `{影像类型}_{特征类别}_{特征}`, 例如 `original_firstorder_Mean`,
//! `wavelet-LHH_glcm_Contrast`. 结果按 [`FeatureClass`] 登记表分组,
//! `diagnostics` 开头的诊断信息不计入任何结果.

use crate::error::ValidationError;
use crate::external::RawFeatures;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use serde_json::{json, Number, Value};

/// 特征类别.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeatureClass {
    /// 一阶统计量.
    #[serde(rename = "firstorder")]
    FirstOrder,

    /// 三维形状.
    #[serde(rename = "shape")]
    Shape,

    /// 二维形状.
    #[serde(rename = "shape2D")]
    Shape2D,

    /// 灰度共生矩阵.
    #[serde(rename = "glcm")]
    Glcm,

    /// 灰度游程矩阵.
    #[serde(rename = "glrlm")]
    Glrlm,

    /// 灰度区域大小矩阵.
    #[serde(rename = "glszm")]
    Glszm,

    /// 灰度依赖矩阵.
    #[serde(rename = "gldm")]
    Gldm,

    /// 邻域灰度差矩阵.
    #[serde(rename = "ngtdm")]
    Ngtdm,
}

impl FeatureClass {
    /// 登记表: 提取器可能产生的全部类别.
    pub const REGISTRY: [Self; 8] = [
        Self::FirstOrder,
        Self::Shape,
        Self::Shape2D,
        Self::Glcm,
        Self::Glrlm,
        Self::Glszm,
        Self::Gldm,
        Self::Ngtdm,
    ];

    /// 可通过参数选择的类别.
    pub const SELECTABLE: [Self; 7] = [
        Self::FirstOrder,
        Self::Shape,
        Self::Glcm,
        Self::Glrlm,
        Self::Glszm,
        Self::Gldm,
        Self::Ngtdm,
    ];

    /// 类别名, 与特征名中的写法一致.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FirstOrder => "firstorder",
            Self::Shape => "shape",
            Self::Shape2D => "shape2D",
            Self::Glcm => "glcm",
            Self::Glrlm => "glrlm",
            Self::Glszm => "glszm",
            Self::Gldm => "gldm",
            Self::Ngtdm => "ngtdm",
        }
    }

    /// 按特征名中的写法查找登记表.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::REGISTRY.into_iter().find(|c| c.name() == name)
    }

    /// 按参数中的写法 (忽略大小写) 查找可选类别.
    pub fn select(name: &str) -> Option<Self> {
        Self::SELECTABLE
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

/// 参数 `feature_classes` 解析后的选择.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureSelection {
    /// 逗号分隔后的原始条目.
    pub requested: Vec<String>,

    /// 启用的特征类别, 去重后保持出现顺序.
    pub enabled: Vec<FeatureClass>,

    /// 是否启用小波域特征.
    pub wavelet: bool,
}

impl FeatureSelection {
    /// 解析逗号分隔的类别列表. 条目不区分大小写, 未知条目被忽略.
    ///
    /// 以 `wavelet` 开头的条目只打开小波域图像类型, 本身不选中任何特征类别.
    /// 因此一个特征类别都没有选中时 (包括只给出 `wavelet` 的情况) 返回错误,
    /// 而不是交给提取器去计算一个空集合.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let requested: Vec<String> = text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        let enabled: Vec<FeatureClass> = requested
            .iter()
            .filter_map(|s| FeatureClass::select(s))
            .unique()
            .collect();
        let wavelet = requested
            .iter()
            .any(|s| s.to_ascii_lowercase().starts_with("wavelet"));

        if enabled.is_empty() {
            return Err(ValidationError(format!(
                "Parameter 'feature_classes' selects no known feature class, got '{text}'. \
                 Valid options: {}, wavelet",
                FeatureClass::SELECTABLE.iter().map(FeatureClass::name).join(", ")
            )));
        }
        Ok(Self {
            requested,
            enabled,
            wavelet,
        })
    }
}

/// 特征提取设置.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    /// 灰度离散化的箱宽.
    pub bin_width: Number,

    /// 是否归一化影像.
    pub normalize: bool,

    /// 归一化尺度. 仅在 `normalize` 为真时有值.
    pub normalize_scale: Option<Number>,

    /// 掩膜中感兴趣区域的标签值.
    pub label: i64,

    /// 特征类别选择.
    pub selection: FeatureSelection,
}

impl ExtractionSettings {
    /// 回显在结果 `metadata.settings` 中的设置.
    pub fn echo(&self) -> Value {
        json!({
            "bin_width": self.bin_width,
            "normalize": self.normalize,
            "normalize_scale": self.normalize_scale,
            "feature_classes": self.selection.requested,
        })
    }

    /// 交给桥接脚本的请求.
    pub fn bridge_request(&self) -> Value {
        let mut settings = json!({
            "binWidth": self.bin_width,
            "normalize": self.normalize,
            "label": self.label,
        });
        if let Some(scale) = &self.normalize_scale {
            settings["normalizeScale"] = json!(scale);
        }
        json!({
            "settings": settings,
            "classes": self.selection.enabled,
            "wavelet": self.selection.wavelet,
        })
    }
}

/// 单个特征值. 数值统一为 `f64`, 其余转换为字符串.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// 数值.
    Number(f64),

    /// 非数值.
    Text(String),
}

impl From<&Value> for FeatureValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Number(n) => n
                .as_f64()
                .map_or_else(|| Self::Text(n.to_string()), Self::Number),
            Value::Bool(b) => Self::Number(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => Self::Text(s.clone()),
            Value::Null => Self::Text("None".to_owned()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// 特征名所属的分组名.
///
/// 1. `original` 影像类型按特征类别分组, 例如 `firstorder`;
/// 2. 小波影像类型分组为 `wavelet_{类别}`;
/// 3. 其他影像类型按影像类型本身分组, 例如 `log-sigma-1-0-mm-3D`;
/// 4. 无法识别的特征类别, 或者不含 `_` 的名字, 分组为 `other`.
pub fn group_of(name: &str) -> String {
    let Some((image_type, rest)) = name.split_once('_') else {
        return "other".to_owned();
    };
    let class = rest.split('_').next().and_then(FeatureClass::lookup);
    match class {
        None => "other".to_owned(),
        Some(c) if image_type == "original" => c.name().to_owned(),
        Some(c) if image_type.contains("wavelet") => format!("wavelet_{}", c.name()),
        Some(_) => image_type.to_owned(),
    }
}

/// 整理后的特征.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSet {
    /// 按分组整理的特征.
    pub features: IndexMap<String, IndexMap<String, FeatureValue>>,

    /// 出现过的分组名, 按首次出现顺序.
    pub feature_classes: Vec<String>,

    /// 特征总数 (不含诊断信息).
    pub feature_count: usize,

    /// 全部特征 (不含诊断信息).
    pub all_features: IndexMap<String, FeatureValue>,
}

impl FeatureSet {
    /// 整理提取器返回的原始特征.
    pub fn from_raw(raw: &RawFeatures) -> Self {
        let mut features: IndexMap<String, IndexMap<String, FeatureValue>> = IndexMap::new();
        let mut all_features = IndexMap::new();

        for (name, value) in raw.iter().filter(|(k, _)| !k.starts_with("diagnostics")) {
            let value = FeatureValue::from(value);
            features
                .entry(group_of(name))
                .or_default()
                .insert(name.clone(), value.clone());
            all_features.insert(name.clone(), value);
        }

        Self {
            feature_classes: features.keys().cloned().collect(),
            feature_count: all_features.len(),
            features,
            all_features,
        }
    }
}
