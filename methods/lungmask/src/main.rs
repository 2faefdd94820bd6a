//! 肺分割方法.
//!
//! ```text
//! lungmask <input_file> <metadata_file> <params_file>
//! ```

use lung_berry::prelude::*;
use std::process::ExitCode;

fn main() -> ExitCode {
    utils::run(|config| Segmentation::new(PythonBridge::from_config(config), config.clone()))
}
