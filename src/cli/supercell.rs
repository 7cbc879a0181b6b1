//! # supercell 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/supercell.rs`

use clap::Args;
use std::path::PathBuf;

/// supercell 子命令参数
#[derive(Args, Debug)]
pub struct SupercellArgs {
    /// Primitive structure (POSCAR or extended XYZ)
    pub structure: PathBuf,

    /// Supercell matrix as 9 integers, row-major
    #[arg(short, long, num_args = 9, allow_negative_numbers = true, required = true)]
    pub supercell: Vec<i32>,

    /// Output POSCAR path
    #[arg(short, long, default_value = "SPOSCAR")]
    pub output: PathBuf,
}
