//! 单次调用独占的临时目录.
//!
//! 所有中间文件 (解码后的掩膜, 待编码的分割结果, 桥接进程的报告) 都放在同一个
//! [`Scratch`] 目录下. 正常返回或出错时由 `Drop` 清理; 进程被中断时,
//! 中断处理函数通过 [`Scratch::purge_active`] 清理.

use once_cell::sync::Lazy;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{Builder, NamedTempFile, TempDir};

/// 当前存活的临时目录.
static ACTIVE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

const PREFIX: &str = "lung-berry-";

/// 临时目录. 析构时连同其中所有文件一起删除.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    /// 在系统临时目录下创建新的临时目录, 并将其登记为当前存活的临时目录.
    pub fn new() -> io::Result<Self> {
        let dir = Builder::new().prefix(PREFIX).tempdir()?;
        if let Ok(mut active) = ACTIVE.lock() {
            *active = Some(dir.path().to_path_buf());
        }
        Ok(Self { dir })
    }

    /// 临时目录路径.
    #[inline]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 在临时目录下创建以 `suffix` 结尾的临时文件. 文件随返回值析构而删除.
    pub fn temp_file(&self, suffix: &str) -> io::Result<NamedTempFile> {
        Builder::new().suffix(suffix).tempfile_in(self.path())
    }

    /// 临时目录下名为 `name` 的路径. 不会创建文件.
    #[inline]
    pub fn join<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.path().join(name)
    }

    /// 删除当前存活的临时目录. 仅供中断处理使用, 之后进程应立即退出.
    ///
    /// 返回是否确实删除了目录.
    pub fn purge_active() -> bool {
        let taken = match ACTIVE.try_lock() {
            Ok(mut active) => active.take(),
            Err(_) => None,
        };
        match taken {
            Some(dir) => fs::remove_dir_all(dir).is_ok(),
            None => false,
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Ok(mut active) = ACTIVE.lock() {
            if active.as_deref() == Some(self.dir.path()) {
                active.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Scratch;

    #[test]
    fn test_scratch_lifecycle() {
        let scratch = Scratch::new().unwrap();
        let root = scratch.path().to_path_buf();
        assert!(root
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("lung-berry-"));

        let f = scratch.temp_file(".nii.gz").unwrap();
        assert!(f.path().starts_with(&root));
        assert!(f.path().to_string_lossy().ends_with(".nii.gz"));
        std::fs::write(scratch.join("report.json"), b"{}").unwrap();

        drop(f);
        drop(scratch);
        assert!(!root.exists());
    }
}
