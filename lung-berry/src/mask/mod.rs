//! 特征提取所用掩膜的定位与落盘.
//!
//! 掩膜有两种来源:
//!
//! 1. 参数 `mask_base64`: base64 编码的掩膜文件内容;
//! 2. 元数据中的 `files.mask`: 掩膜文件路径 (字符串, 或列表中的第一个元素).
//!
//! 上游有时会把二进制掩膜以 base64 文本的形式写进文件. [`MaskEncoding`]
//! 指明文件内容的编码方式; 默认的 [`MaskEncoding::Auto`] 会根据文件头部字节推断.

use crate::consts::MASK_NOT_PROVIDED;
use crate::error::{MethodError, ValidationError};
use crate::scratch::Scratch;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

/// 判定为 base64 文本所需的最少字符数.
const MIN_BASE64_LEN: usize = 100;

/// 用于推断编码方式所读取的头部字节数.
const SNIFF_LEN: usize = 100;

/// 已知的二进制体数据文件头.
const SIGNATURES: &[&[u8]] = &[
    // gzip
    &[0x1f, 0x8b],
    // NIfTI-1, 小端 / 大端 `sizeof_hdr = 348`
    &[0x5c, 0x01, 0x00, 0x00],
    &[0x00, 0x00, 0x01, 0x5c],
    // NIfTI-2, 小端 / 大端 `sizeof_hdr = 540`
    &[0x1c, 0x02, 0x00, 0x00],
    &[0x00, 0x00, 0x02, 0x1c],
    b"NRRD",
    // MetaImage
    b"ObjectType",
];

/// 掩膜文件内容的编码方式.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskEncoding {
    /// 根据文件头推断. 推断为 base64 但解码失败时按二进制处理.
    #[default]
    Auto,

    /// 二进制体数据文件.
    Binary,

    /// base64 文本. 解码失败是致命错误.
    Base64,
}

impl FromStr for MaskEncoding {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "binary" => Ok(Self::Binary),
            "base64" => Ok(Self::Base64),
            _ => Err(ValidationError(format!(
                "Parameter 'mask_encoding' must be one of auto, binary, base64, got '{s}'"
            ))),
        }
    }
}

/// 内容是否以 gzip 文件头开始?
#[inline]
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1f, 0x8b])
}

/// 头部字节是否像二进制体数据文件?
///
/// 已知文件头, 或首字节不是可打印 ASCII 字符, 都视为二进制.
pub fn looks_binary(head: &[u8]) -> bool {
    match head.first() {
        None => false,
        Some(b) if !(b.is_ascii_graphic() || b.is_ascii_whitespace()) => true,
        Some(_) => SIGNATURES.iter().any(|sig| head.starts_with(sig)),
    }
}

/// 去除所有空白后, 若文本像 base64 (只含字母, 数字, `+`, `/`, `=`, 且长度超过 100),
/// 则返回紧凑后的文本.
pub fn base64_candidate(text: &str) -> Option<String> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let alphabet = |c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=');
    (compact.len() > MIN_BASE64_LEN && compact.chars().all(alphabet)).then_some(compact)
}

/// base64 编码.
#[inline]
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// `n` 字节内容经 base64 编码后的长度.
#[inline]
pub fn encoded_len(n: usize) -> Option<usize> {
    base64::encoded_len(n, true)
}

fn decode(text: &str) -> Result<Vec<u8>, ValidationError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| ValidationError(format!("Failed to decode mask from base64: {e}")))
}

/// 按内容给出落盘文件的扩展名, 使影像读取器能识别其格式.
fn staged_suffix(bytes: &[u8]) -> &'static str {
    if is_gzip(bytes) {
        ".nii.gz"
    } else if bytes.starts_with(b"NRRD") {
        ".nrrd"
    } else if bytes.starts_with(b"ObjectType") {
        ".mha"
    } else {
        ".nii"
    }
}

fn is_gz_path(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

fn read_head(path: &Path) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

fn staging_error(e: io::Error) -> MethodError {
    MethodError::Processing(format!("Error staging mask file: {e}"))
}

/// 掩膜来源.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskSource {
    /// 参数中内联的 base64 文本.
    Inline(String),

    /// 元数据中给出的文件路径.
    File(PathBuf),
}

impl MaskSource {
    /// 定位掩膜. 内联文本优先; 否则使用元数据中的 `files.mask`.
    ///
    /// 两者都没有, 或者元数据中的路径不存在时, 返回 "Mask not provided" 错误.
    pub fn locate(
        inline: Option<&str>,
        metadata: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        if let Some(text) = inline.filter(|t| !t.is_empty()) {
            return Ok(Self::Inline(text.to_owned()));
        }

        let path = match metadata.get("files").and_then(|f| f.get("mask")) {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Array(items)) => items.first().and_then(Value::as_str),
            _ => None,
        };
        match path {
            Some(p) if !p.is_empty() && Path::new(p).exists() => Ok(Self::File(PathBuf::from(p))),
            _ => Err(ValidationError::new(MASK_NOT_PROVIDED)),
        }
    }

    /// 将掩膜落盘为可被影像读取器直接读取的文件.
    ///
    /// 内联文本总是按 base64 解码. 文件按 `encoding` 处理; 二进制文件若扩展名与
    /// 是否 gzip 压缩不符, 会复制为扩展名正确的临时文件.
    pub fn materialize(
        &self,
        encoding: MaskEncoding,
        scratch: &Scratch,
    ) -> Result<StagedMask, MethodError> {
        match self {
            Self::Inline(text) => {
                let bytes = decode(text)?;
                StagedMask::write(&bytes, scratch)
            }
            Self::File(path) => match encoding {
                MaskEncoding::Binary => StagedMask::binary(path, scratch),
                MaskEncoding::Base64 => {
                    let text = fs::read_to_string(path).map_err(staging_error)?;
                    let bytes = decode(&text)?;
                    StagedMask::write(&bytes, scratch)
                }
                MaskEncoding::Auto => {
                    let head = read_head(path).map_err(staging_error)?;
                    if looks_binary(&head) {
                        return StagedMask::binary(path, scratch);
                    }
                    let decoded = fs::read_to_string(path)
                        .ok()
                        .and_then(|text| base64_candidate(&text))
                        .and_then(|text| BASE64.decode(text).ok());
                    match decoded {
                        Some(bytes) => {
                            log::info!("mask file {} holds base64 text, decoded", path.display());
                            StagedMask::write(&bytes, scratch)
                        }
                        None => StagedMask::binary(path, scratch),
                    }
                }
            },
        }
    }
}

/// 已落盘的掩膜文件. 若为临时文件, 则随本结构析构而删除.
#[derive(Debug)]
pub struct StagedMask {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

impl StagedMask {
    /// 掩膜文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 是否是临时文件?
    #[inline]
    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }

    fn write(bytes: &[u8], scratch: &Scratch) -> Result<Self, MethodError> {
        let temp = scratch
            .temp_file(staged_suffix(bytes))
            .map_err(staging_error)?;
        fs::write(temp.path(), bytes).map_err(staging_error)?;
        Ok(Self {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    fn binary(path: &Path, scratch: &Scratch) -> Result<Self, MethodError> {
        let head = read_head(path).map_err(staging_error)?;
        if is_gzip(&head) == is_gz_path(path) {
            return Ok(Self {
                path: path.to_path_buf(),
                _temp: None,
            });
        }
        let bytes = fs::read(path).map_err(staging_error)?;
        Self::write(&bytes, scratch)
    }
}
