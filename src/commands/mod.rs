//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `config.rs` 以及各计算模块
//! - 子模块: fit, supercell, check

pub mod check;
pub mod fit;
pub mod supercell;

use crate::cli::Commands;
use crate::error::Result;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Fit(args) => fit::execute(args),
        Commands::Supercell(args) => supercell::execute(args),
        Commands::Check(args) => check::execute(args),
    }
}
