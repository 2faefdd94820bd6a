//! 掩膜统计信息.

use serde::Serialize;

use super::{MaskVolume, VolumeAttr};
use crate::consts::label::is_foreground;
use crate::error::Degradation;

/// 分割掩膜的基本统计信息. 只依赖掩膜本身, 重复计算结果相同.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskStatistics {
    /// 体素总数.
    #[serde(rename = "total_voxels")]
    pub total: usize,

    /// 非零 (肺组织) 体素个数.
    #[serde(rename = "lung_voxels")]
    pub lung: usize,

    /// 背景体素个数.
    #[serde(rename = "background_voxels")]
    pub background: usize,

    /// 肺组织体积, 以立方毫米为单位.
    #[serde(rename = "lung_volume_mm3")]
    pub volume_mm3: f64,

    /// 肺组织体积, 以立方厘米为单位.
    #[serde(rename = "lung_volume_cm3")]
    pub volume_cm3: f64,

    /// 掩膜中出现过的标签, 升序.
    pub unique_labels: Vec<u8>,

    /// 掩膜 `[x, y, z]` 尺寸.
    pub mask_size: [usize; 3],

    /// 掩膜 `[x, y, z]` 体素间距, 以毫米为单位.
    pub spacing_mm: [f64; 3],
}

impl MaskStatistics {
    /// 计算 `mask` 的统计信息. 体素间距不是有限值时返回降级.
    pub fn of(mask: &MaskVolume) -> Result<Self, Degradation> {
        let spacing = mask.spacing();
        if let Some(bad) = spacing.iter().find(|s| !s.is_finite()) {
            return Err(Degradation::Statistics(format!(
                "voxel spacing is not finite: {bad}"
            )));
        }

        let mut present = [false; 256];
        let mut lung = 0usize;
        for p in mask.data().iter() {
            present[*p as usize] = true;
            if is_foreground(*p) {
                lung += 1;
            }
        }
        let unique_labels = (0..=u8::MAX).filter(|l| present[*l as usize]).collect();

        let total = mask.voxel_count();
        let volume_mm3 = lung as f64 * mask.voxel();
        Ok(Self {
            total,
            lung,
            background: total - lung,
            volume_mm3,
            volume_cm3: volume_mm3 / 1000.0,
            unique_labels,
            mask_size: mask.size(),
            spacing_mm: spacing,
        })
    }
}
