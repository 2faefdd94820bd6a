//! 运行时配置. 全部来自环境变量, 缺省时使用合理默认值.
//!
//! | 环境变量 | 含义 | 默认值 |
//! |---|---|---|
//! | `LUNG_BERRY_PYTHON` | 外部协作者桥接所用的 Python 解释器 | `python3` |
//! | `LUNG_BERRY_LOG` | 日志级别 (`off`, `error`, `warn`, `info`, `debug`, `trace`) | `warn` |
//! | `LUNG_BERRY_INLINE_LIMIT` | 内联 base64 掩膜的字节上限 | 50 MiB |
//! | `LUNG_BERRY_MASK_DIR` | 若设置, 分割掩膜会额外持久化到该目录 | 无 |

use crate::consts::DEFAULT_INLINE_LIMIT;
use log::LevelFilter;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

/// 单次调用的运行时配置. 创建后只读.
#[derive(Debug, Clone)]
pub struct Config {
    /// Python 解释器路径或命令名.
    pub python: OsString,

    /// 日志级别. 日志只会写入标准错误.
    pub log_level: LevelFilter,

    /// 内联 base64 掩膜的字节上限 (编码后).
    pub inline_limit: usize,

    /// 分割掩膜的持久化目录.
    pub mask_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: OsString::from("python3"),
            log_level: LevelFilter::Warn,
            inline_limit: DEFAULT_INLINE_LIMIT,
            mask_dir: None,
        }
    }
}

impl Config {
    /// 从环境变量加载配置.
    ///
    /// 1. 若环境变量非空且可解析, 则使用其值;
    /// 2. 否则, 使用 [`Config::default`] 中的值.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var_os(key))
    }

    /// 从任意键值来源加载配置. `lookup` 对不存在的键返回 `None`.
    pub fn from_lookup<F: Fn(&str) -> Option<OsString>>(lookup: F) -> Self {
        let fallback = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let parsed = |key: &str| non_empty(key).and_then(|v| v.into_string().ok());

        Self {
            python: non_empty("LUNG_BERRY_PYTHON").unwrap_or(fallback.python),
            log_level: parsed("LUNG_BERRY_LOG")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(fallback.log_level),
            inline_limit: parsed("LUNG_BERRY_INLINE_LIMIT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(fallback.inline_limit),
            mask_dir: non_empty("LUNG_BERRY_MASK_DIR").map(PathBuf::from),
        }
    }
}
