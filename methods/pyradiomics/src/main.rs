//! 影像组学特征提取方法.
//!
//! ```text
//! pyradiomics <input_file> <metadata_file> <params_file>
//! ```

use lung_berry::prelude::*;
use std::process::ExitCode;

fn main() -> ExitCode {
    utils::run(|config| Extraction::new(PythonBridge::from_config(config)))
}
