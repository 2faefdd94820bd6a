//! 路径校验.

use crate::error::ValidationError;
use std::fs::File;
use std::path::Path;

/// 确认 `path` 非空, 存在, 是普通文件, 且当前进程可读.
///
/// `description` 用于拼接错误信息, 例如 `"Input file"`. 该函数没有副作用.
pub fn validate_path<P: AsRef<Path>>(path: P, description: &str) -> Result<(), ValidationError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(ValidationError(format!("{description} path is empty")));
    }
    if !path.exists() {
        return Err(ValidationError(format!(
            "{description} does not exist: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(ValidationError(format!(
            "{description} is not a file: {}",
            path.display()
        )));
    }
    // 以实际打开的结果为准.
    if File::open(path).is_err() {
        return Err(ValidationError(format!(
            "{description} is not readable: {}",
            path.display()
        )));
    }
    Ok(())
}
