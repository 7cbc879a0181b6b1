//! # check 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/check.rs`

use clap::Args;
use std::path::PathBuf;

/// check 子命令参数
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// FORCE_CONSTANTS (phonopy text) or fcN.npy file
    pub file: PathBuf,

    /// Largest acceptable row sum (eV/Å^n)
    #[arg(short, long, default_value_t = 1e-4)]
    pub tolerance: f64,

    /// Write a symmetrized copy to this path
    #[arg(long)]
    pub symmetrize: Option<PathBuf>,

    /// Iteration cap for symmetrization
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,
}
