//! 体素网格的空间信息.
//!
//! nifti header 以 RAS 坐标系记录 qform/sform 变换, 而下游 (影像组学工具链) 使用
//! LPS 坐标系. 这里把 header 中的变换换算为 LPS 下的原点与方向余弦矩阵,
//! 与常见医学影像工具包读取 nifti 时给出的值保持一致.

use crate::error::ValidationError;
use crate::external::ImageInfo;
use nifti::NiftiHeader;
use serde::Serialize;

/// 体素网格的尺寸, 体素间距, 原点与方向.
///
/// 所有数组都按 `[x, y, z]` 即 `[W, H, z]` 组织; `direction` 为 3x3 方向余弦矩阵的行优先展开.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spatial {
    /// 体素个数.
    pub size: [usize; 3],

    /// 体素间距, 以毫米为单位.
    #[serde(rename = "spacing_mm")]
    pub spacing: [f64; 3],

    /// 原点, 以毫米为单位.
    #[serde(rename = "origin_mm")]
    pub origin: [f64; 3],

    /// 方向余弦矩阵 (9 个元素).
    pub direction: [f64; 9],
}

/// 单位方向矩阵.
pub const IDENTITY: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// 将 header 中的 `f32` 转换为 `f64`, 保留其十进制写法 (例如 `0.7f32` 转换为 `0.7`,
/// 而不是 `0.699999988079071`).
#[inline]
pub(crate) fn widen(f: f32) -> f64 {
    f.to_string().parse().unwrap_or(f as f64)
}

/// 消除 `-0.0`.
#[inline]
fn tidy(f: f64) -> f64 {
    f + 0.0
}

impl Spatial {
    /// 只有尺寸信息的网格: 体素间距为 1, 原点为 0, 方向为单位矩阵.
    pub fn bare(size: [usize; 3]) -> Self {
        Self {
            size,
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: IDENTITY,
        }
    }

    /// 从 nifti header 解析空间信息. `size` 由调用者根据 `dim` 给出.
    ///
    /// 方向与原点的来源依次为: qform (`qform_code > 0`), sform (`sform_code > 0`),
    /// 缺省 (单位矩阵, 原点为 0).
    pub fn from_header(header: &NiftiHeader, size: [usize; 3]) -> Self {
        let [_, sx, sy, sz, ..] = header.pixdim;
        let spacing = [widen(sx).abs(), widen(sy).abs(), widen(sz).abs()];

        let (mut rot, mut origin) = if header.qform_code > 0 {
            quaternion_to_matrix(header)
        } else if header.sform_code > 0 {
            sform_to_matrix(header, &spacing)
        } else {
            (IDENTITY, [0.0; 3])
        };

        // RAS -> LPS: 前两行取反.
        for v in rot.iter_mut().take(6) {
            *v = -*v;
        }
        origin[0] = -origin[0];
        origin[1] = -origin[1];

        Self {
            size,
            spacing,
            origin: origin.map(tidy),
            direction: rot.map(tidy),
        }
    }

    /// 由外部影像库读出的几何信息构建. `size` 由调用者根据 `info.size` 给出.
    ///
    /// 维数超过 3 时, 只取方向矩阵左上角的 3x3 部分.
    pub fn from_info(info: &ImageInfo, size: [usize; 3]) -> Result<Self, ValidationError> {
        let n = info.dimension();
        if n < 3 || info.spacing.len() < 3 || info.origin.len() < 3 || info.direction.len() != n * n
        {
            return Err(ValidationError(format!(
                "Incomplete geometry for {n}D image: {} spacing, {} origin and {} direction values",
                info.spacing.len(),
                info.origin.len(),
                info.direction.len()
            )));
        }

        let mut direction = [0.0; 9];
        for (k, v) in direction.iter_mut().enumerate() {
            *v = info.direction[(k / 3) * n + k % 3];
        }
        Ok(Self {
            size,
            spacing: [info.spacing[0], info.spacing[1], info.spacing[2]],
            origin: [info.origin[0], info.origin[1], info.origin[2]].map(tidy),
            direction: direction.map(tidy),
        })
    }

    /// 以 sform 记录本网格的 nifti header. qform 不设置, `dim` 由写出的数据决定.
    ///
    /// 与 [`Spatial::from_header`] 互逆 (在 `f32` 精度内).
    pub fn to_header(&self) -> NiftiHeader {
        let mut header = NiftiHeader {
            qform_code: 0,
            sform_code: 1,
            ..NiftiHeader::default()
        };
        header.pixdim[0] = 1.0;
        for (k, s) in self.spacing.iter().enumerate() {
            header.pixdim[k + 1] = *s as f32;
        }

        // LPS -> RAS: 前两行取反. 每一列乘以对应体素间距.
        let mut rows = [[0.0_f32; 4]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            let sign = if i < 2 { -1.0 } else { 1.0 };
            for (j, s) in self.spacing.iter().enumerate() {
                row[j] = (sign * self.direction[i * 3 + j] * s) as f32;
            }
            row[3] = (sign * self.origin[i]) as f32;
        }
        header.srow_x = rows[0];
        header.srow_y = rows[1];
        header.srow_z = rows[2];
        header
    }

    /// 单个体素的实际体积, 以立方毫米为单位.
    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 以 `(a, b, c)` 形式展示尺寸, 用于错误提示.
    pub fn size_tuple(&self) -> String {
        let [x, y, z] = self.size;
        format!("({x}, {y}, {z})")
    }
}

/// qform 四元数 -> (旋转矩阵, 偏移), RAS 坐标系.
fn quaternion_to_matrix(h: &NiftiHeader) -> ([f64; 9], [f64; 3]) {
    let (b, c, d) = (widen(h.quatern_b), widen(h.quatern_c), widen(h.quatern_d));
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };

    let mut r = [
        a * a + b * b - c * c - d * d,
        2.0 * (b * c - a * d),
        2.0 * (b * d + a * c),
        2.0 * (b * c + a * d),
        a * a + c * c - b * b - d * d,
        2.0 * (c * d - a * b),
        2.0 * (b * d - a * c),
        2.0 * (c * d + a * b),
        a * a + d * d - c * c - b * b,
    ];
    // 第三列乘以 qfac.
    for row in 0..3 {
        r[row * 3 + 2] *= qfac;
    }

    let offset = [
        widen(h.quatern_x),
        widen(h.quatern_y),
        widen(h.quatern_z),
    ];
    (r, offset)
}

/// sform 仿射矩阵 -> (方向矩阵, 偏移), RAS 坐标系. 每一列除以对应体素间距.
fn sform_to_matrix(h: &NiftiHeader, spacing: &[f64; 3]) -> ([f64; 9], [f64; 3]) {
    let rows = [h.srow_x, h.srow_y, h.srow_z];
    let mut r = [0.0; 9];
    for (i, row) in rows.iter().enumerate() {
        for (j, s) in spacing.iter().enumerate() {
            let v = widen(row[j]);
            r[i * 3 + j] = if *s != 0.0 { v / s } else { v };
        }
    }
    let offset = [widen(rows[0][3]), widen(rows[1][3]), widen(rows[2][3])];
    (r, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn assert_all_eq(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!(f64_eq(*x, *y), "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_widen_keeps_decimal() {
        assert_eq!(widen(0.7), 0.7);
        assert_eq!(widen(1.0), 1.0);
        assert_eq!(widen(-2.5), -2.5);
    }

    #[test]
    fn test_no_transform() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 0.7, 0.7, 1.0, 0.0, 0.0, 0.0, 0.0];
        h.qform_code = 0;
        h.sform_code = 0;
        let s = Spatial::from_header(&h, [512, 512, 120]);
        assert_eq!(s.spacing, [0.7, 0.7, 1.0]);
        assert_eq!(s.origin, [0.0; 3]);
        // LPS 下的 "单位" 方向.
        assert_eq!(s.direction, [-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]);
    }

    /// 常见的 qform: 绕 z 轴旋转 180 度 (quatern_d = 1), 在 LPS 下即为单位矩阵.
    #[test]
    fn test_qform_identity_in_lps() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 0.8, 0.8, 2.5, 0.0, 0.0, 0.0, 0.0];
        h.qform_code = 1;
        h.quatern_b = 0.0;
        h.quatern_c = 0.0;
        h.quatern_d = 1.0;
        h.quatern_x = 200.0;
        h.quatern_y = 180.5;
        h.quatern_z = -400.0;
        let s = Spatial::from_header(&h, [4, 4, 4]);
        assert_all_eq(&s.direction, &IDENTITY);
        assert_all_eq(&s.origin, &[-200.0, -180.5, -400.0]);
    }

    #[test]
    fn test_sform_scaled_columns() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 2.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0];
        h.qform_code = 0;
        h.sform_code = 2;
        h.srow_x = [-2.0, 0.0, 0.0, 10.0];
        h.srow_y = [0.0, -2.0, 0.0, 20.0];
        h.srow_z = [0.0, 0.0, 3.0, -30.0];
        let s = Spatial::from_header(&h, [2, 2, 2]);
        assert_all_eq(&s.direction, &IDENTITY);
        assert_all_eq(&s.origin, &[-10.0, -20.0, -30.0]);
        assert!(f64_eq(s.voxel_volume(), 12.0));
    }

    /// qform 与 sform 同时存在时以 qform 为准.
    #[test]
    fn test_qform_wins_over_sform() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 2.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0];
        h.qform_code = 1;
        h.quatern_b = 0.0;
        h.quatern_c = 0.0;
        h.quatern_d = 1.0;
        h.quatern_x = 5.0;
        h.quatern_y = 6.0;
        h.quatern_z = 7.0;
        h.sform_code = 1;
        h.srow_x = [2.0, 0.0, 0.0, 10.0];
        h.srow_y = [0.0, 2.0, 0.0, 20.0];
        h.srow_z = [0.0, 0.0, 3.0, 30.0];
        let s = Spatial::from_header(&h, [2, 2, 2]);
        assert_all_eq(&s.direction, &IDENTITY);
        assert_all_eq(&s.origin, &[-5.0, -6.0, 7.0]);

        h.qform_code = 0;
        let s = Spatial::from_header(&h, [2, 2, 2]);
        assert_all_eq(&s.direction, &[-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_all_eq(&s.origin, &[-10.0, -20.0, 30.0]);
    }

    fn oblique() -> ImageInfo {
        ImageInfo {
            size: vec![6, 5, 4],
            spacing: vec![0.5, 0.75, 2.0],
            origin: vec![12.5, -30.0, 7.25],
            direction: vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0],
        }
    }

    #[test]
    fn test_from_info() {
        let s = Spatial::from_info(&oblique(), [6, 5, 4]).unwrap();
        assert_eq!(s.spacing, [0.5, 0.75, 2.0]);
        assert_eq!(s.origin, [12.5, -30.0, 7.25]);
        assert_eq!(s.direction, [0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0]);

        // 4D 影像末尾长度为 1 的维度: 取左上角.
        let mut info = oblique();
        info.size.push(1);
        info.spacing.push(1.0);
        info.origin.push(0.0);
        info.direction = vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let s = Spatial::from_info(&info, [6, 5, 4]).unwrap();
        assert_eq!(s.direction, [1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]);

        let mut info = oblique();
        info.direction.pop();
        let e = Spatial::from_info(&info, [6, 5, 4]).unwrap_err();
        assert_eq!(
            e.0,
            "Incomplete geometry for 3D image: 3 spacing, 3 origin and 8 direction values"
        );
    }

    /// 换算为 header 后再解析, 得到同一网格.
    #[test]
    fn test_header_round_trip() {
        let s = Spatial::from_info(&oblique(), [6, 5, 4]).unwrap();
        let h = s.to_header();
        assert_eq!(h.qform_code, 0);
        assert_eq!(h.sform_code, 1);
        let back = Spatial::from_header(&h, [6, 5, 4]);
        assert_eq!(back.size, s.size);
        assert_all_eq(&back.spacing, &s.spacing);
        assert_all_eq(&back.origin, &s.origin);
        assert_all_eq(&back.direction, &s.direction);
    }

    #[test]
    fn test_size_tuple() {
        assert_eq!(Spatial::bare([256, 256, 99]).size_tuple(), "(256, 256, 99)");
    }
}
