//! 通过子进程调用 Python 外部库.
//!
//! 桥接脚本随 crate 一起编译进二进制, 以 `python -c` 的形式运行. 子进程的标准输出
//! 被重定向到本进程的标准错误, 因此外部库打印的任何内容都不会混入 JSON 结果.
//! 调用结果写入临时目录下的报告文件.
//!
//! 运行中的子进程登记在进程级的槽位中, 中断处理可以通过 [`PythonBridge::stop_active`]
//! 结束它.

use super::{
    CollaboratorFailure, Device, FeatureExtractor, ImageInfo, ImageReader, LungModel, RawFeatures,
    RawMask, Segmenter,
};
use crate::config::Config;
use crate::data::ImageVolume;
use crate::features::ExtractionSettings;
use crate::scratch::Scratch;
use ndarray::Array3;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// 桥接脚本.
const BRIDGE_SCRIPT: &str = include_str!("../../python/bridge.py");

/// 检查子进程是否结束的间隔.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 当前运行中的桥接子进程.
static ACTIVE_CHILD: Lazy<Mutex<Option<Child>>> = Lazy::new(|| Mutex::new(None));

fn active_child() -> MutexGuard<'static, Option<Child>> {
    ACTIVE_CHILD.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 登记 `child` 并等待其结束. 若子进程在此期间被 [`PythonBridge::stop_active`]
/// 取走, 返回错误.
fn wait_registered(child: Child) -> Result<ExitStatus, CollaboratorFailure> {
    *active_child() = Some(child);
    loop {
        {
            let mut slot = active_child();
            let Some(child) = slot.as_mut() else {
                return Err(CollaboratorFailure::Other(
                    "bridge process was stopped".into(),
                ));
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    slot.take();
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    slot.take();
                    return Err(CollaboratorFailure::Other(format!(
                        "could not wait for bridge process: {e}"
                    )));
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// 桥接脚本成功时给出的内容. 不同动作只填写其中一项.
#[derive(Debug, Deserialize)]
struct Output {
    #[serde(default)]
    features: Option<RawFeatures>,
    #[serde(default)]
    info: Option<ImageInfo>,
}

/// 桥接脚本写出的报告.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Report {
    Ok(Output),
    Runtime {
        message: String,
    },
    NoOutput,
    Error {
        message: String,
    },
}

/// 基于 Python 子进程的 [`Segmenter`], [`FeatureExtractor`] 与 [`ImageReader`] 实现.
#[derive(Debug, Clone)]
pub struct PythonBridge {
    python: OsString,
}

impl PythonBridge {
    /// 使用解释器 `python`.
    pub fn new<S: Into<OsString>>(python: S) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// 使用配置中的解释器.
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.python.clone())
    }

    /// 结束当前运行中的桥接子进程. 没有子进程或无法结束时返回 `false`.
    pub fn stop_active() -> bool {
        match active_child().take() {
            Some(mut child) => {
                log::warn!("stopping bridge process {}", child.id());
                child.kill().and_then(|()| child.wait()).is_ok()
            }
            None => false,
        }
    }

    /// 构建一次调用的命令. 设备选择只作用于子进程的环境变量.
    fn command(&self, verb: &str, device: Device) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-c")
            .arg(BRIDGE_SCRIPT)
            .arg(verb)
            .stdin(Stdio::null())
            .stdout(Stdio::from(io::stderr()))
            .stderr(Stdio::inherit());
        if device == Device::Cpu {
            cmd.env("CUDA_VISIBLE_DEVICES", "");
        }
        cmd
    }

    /// 运行命令并读取报告.
    fn run(&self, mut cmd: Command, report: &Path) -> Result<Report, CollaboratorFailure> {
        log::debug!("running collaborator bridge: {cmd:?}");
        let child = cmd.spawn().map_err(|e| {
            CollaboratorFailure::Other(format!(
                "could not start Python interpreter '{}': {e}",
                self.python.to_string_lossy()
            ))
        })?;
        let status = wait_registered(child)?;

        let text = fs::read_to_string(report).map_err(|_| {
            CollaboratorFailure::Other(format!(
                "bridge process exited ({status}) without a report"
            ))
        })?;
        let report: Report = serde_json::from_str(&text).map_err(|e| {
            CollaboratorFailure::Other(format!("bridge report is malformed: {e}"))
        })?;
        if !status.success() {
            log::warn!("bridge process exited with {status}");
        }
        Ok(report)
    }
}

impl Report {
    fn into_result(self) -> Result<Output, CollaboratorFailure> {
        match self {
            Self::Ok(output) => Ok(output),
            Self::Runtime { message } => Err(CollaboratorFailure::Runtime(message)),
            Self::NoOutput => Err(CollaboratorFailure::NoOutput),
            Self::Error { message } => Err(CollaboratorFailure::Other(message)),
        }
    }
}

impl Segmenter for PythonBridge {
    fn segment(
        &self,
        image: &ImageVolume,
        model: LungModel,
        device: Device,
        scratch: &Scratch,
    ) -> Result<RawMask, CollaboratorFailure> {
        let out = scratch.join("mask.npy");
        let report = scratch.join("segment-report.json");

        let mut cmd = self.command("segment", device);
        cmd.arg(image.source())
            .arg(model.name())
            .arg(if device == Device::Cpu { "1" } else { "0" })
            .arg(&out)
            .arg(&report);
        self.run(cmd, &report)?.into_result()?;

        let data: Array3<u8> = ndarray_npy::read_npy(&out)
            .map_err(|e| CollaboratorFailure::Other(format!("could not read mask array: {e}")))?;
        Ok(RawMask::Array(data))
    }
}

impl FeatureExtractor for PythonBridge {
    fn extract(
        &self,
        image: &Path,
        mask: &Path,
        settings: &ExtractionSettings,
        scratch: &Scratch,
    ) -> Result<RawFeatures, CollaboratorFailure> {
        let request = scratch.join("extract-settings.json");
        let report = scratch.join("extract-report.json");
        let payload = serde_json::to_vec(&settings.bridge_request())
            .map_err(|e| CollaboratorFailure::Other(e.to_string()))?;
        fs::write(&request, payload).map_err(|e| CollaboratorFailure::Other(e.to_string()))?;

        let mut cmd = self.command("extract", Device::Auto);
        cmd.arg(image).arg(mask).arg(&request).arg(&report);
        self.run(cmd, &report)?
            .into_result()?
            .features
            .ok_or(CollaboratorFailure::NoOutput)
    }
}

impl ImageReader for PythonBridge {
    fn read_info(&self, path: &Path, scratch: &Scratch) -> Result<ImageInfo, CollaboratorFailure> {
        let report = scratch.join("info-report.json");
        let mut cmd = self.command("info", Device::Auto);
        cmd.arg(path).arg(&report);
        self.run(cmd, &report)?
            .into_result()?
            .info
            .ok_or(CollaboratorFailure::NoOutput)
    }
}
