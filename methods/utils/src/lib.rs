//! 方法入口依赖的通用组件.
//!
//! [`run`] 负责一次命令行调用的全部外围工作: 读取配置, 初始化日志,
//! 安装 panic 钩子与中断处理, 创建临时目录, 输出唯一的一行 JSON 结果并给出退出码.

use log::LevelFilter;
use lung_berry::external::PythonBridge;
use lung_berry::method::Method;
use lung_berry::{Config, Envelope, InvocationArgs, MethodError, Scratch, Success};
use once_cell::sync::Lazy;
use simple_logger::SimpleLogger;
use std::any::Any;
use std::backtrace::Backtrace;
use std::env;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process::{self, ExitCode};
use std::sync::Mutex;

/// 最近一次 panic 的信息与回溯.
static LAST_PANIC: Lazy<Mutex<Option<(String, String)>>> = Lazy::new(|| Mutex::new(None));

/// 运行一次方法调用.
///
/// `build` 由配置构建方法实例. 命令行参数从进程参数中读取 (不含程序名).
/// 成功返回 [`ExitCode::SUCCESS`], 其余任何情况返回 [`ExitCode::FAILURE`].
pub fn run<M, F>(build: F) -> ExitCode
where
    M: Method,
    F: FnOnce(&Config) -> M,
{
    let config = Config::from_env();
    init_logger(config.log_level);
    install_panic_hook();
    install_interrupt_handler();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| invoke(build, &config)))
        .unwrap_or_else(|_| Err(take_panic()));
    let envelope = match outcome {
        Ok(success) => Envelope::Success(success),
        Err(e) => {
            log::error!("{}: {e}", e.kind());
            Envelope::from(e)
        }
    };

    let succeeded = envelope.is_success();
    match envelope.emit() {
        Ok(_) if succeeded => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("Could not write result: {e}");
            ExitCode::FAILURE
        }
    }
}

/// 解析参数, 创建临时目录并执行方法. 临时目录在返回 (或 unwind) 时删除.
fn invoke<M, F>(build: F, config: &Config) -> Result<Success, MethodError>
where
    M: Method,
    F: FnOnce(&Config) -> M,
{
    let args = InvocationArgs::from_args(M::NAME, env::args_os().skip(1))?;
    let scratch = Scratch::new().map_err(|e| {
        MethodError::Processing(format!("Could not create temporary directory: {e}"))
    })?;
    log::debug!("scratch directory: {}", scratch.path().display());
    build(config).run(&args, &scratch)
}

/// 日志只写入标准错误.
fn init_logger(level: LevelFilter) {
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Could not initialize logger: {e}");
    }
}

fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let message = panic_message(info.payload());
        let location = info
            .location()
            .map_or_else(|| "<unknown>".to_owned(), ToString::to_string);
        let traceback = format!(
            "panicked at {location}: {message}\n{}",
            Backtrace::force_capture()
        );
        log::error!("{traceback}");
        if let Ok(mut slot) = LAST_PANIC.lock() {
            *slot = Some((message, traceback));
        }
    }));
}

/// 中断时输出中断结果, 结束桥接子进程, 删除临时目录并以退出码 1 结束.
///
/// 若结果已经由主流程输出, 则什么也不做, 退出码由主流程决定.
fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        let emitted = Envelope::interrupted().emit();
        if let Err(e) = &emitted {
            log::error!("Could not write result: {e}");
        }
        if let Some(code) = interrupt_exit_code(&emitted) {
            PythonBridge::stop_active();
            Scratch::purge_active();
            process::exit(code);
        }
    });
    if let Err(e) = installed {
        log::warn!("Could not install interrupt handler: {e}");
    }
}

/// 中断处理的退出码. 结果已由主流程输出 (`Ok(false)`) 时返回 `None`.
fn interrupt_exit_code(emitted: &io::Result<bool>) -> Option<i32> {
    match emitted {
        Ok(false) => None,
        Ok(true) | Err(_) => Some(1),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// 取出最近一次 panic, 转换为未预期错误.
fn take_panic() -> MethodError {
    let record = LAST_PANIC.lock().ok().and_then(|mut slot| slot.take());
    let (message, traceback) =
        record.unwrap_or_else(|| ("unknown panic".to_owned(), String::new()));
    MethodError::Unexpected {
        message,
        error_type: "panic".to_owned(),
        traceback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(payload.as_ref()), "index out of bounds");
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_interrupt_exit_code() {
        assert_eq!(interrupt_exit_code(&Ok(true)), Some(1));
        assert_eq!(interrupt_exit_code(&Ok(false)), None);
        let broken = Err(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(interrupt_exit_code(&broken), Some(1));
    }

    #[test]
    fn test_take_panic() {
        *LAST_PANIC.lock().unwrap() = Some(("boom".into(), "panicked at x.rs:1:1".into()));
        match take_panic() {
            MethodError::Unexpected {
                message,
                error_type,
                traceback,
            } => {
                assert_eq!(message, "boom");
                assert_eq!(error_type, "panic");
                assert_eq!(traceback, "panicked at x.rs:1:1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(LAST_PANIC.lock().unwrap().is_none());
    }
}
