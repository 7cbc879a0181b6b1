//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `fit`: 完整的力常数拟合流程
//! - `supercell`: 写出超胞 POSCAR
//! - `check`: 检查已有力常数文件的求和规则，可选对称化
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: fit, supercell, check

pub mod check;
pub mod fit;
pub mod supercell;

use clap::{Parser, Subcommand};

/// forcefit - 由随机扰动超胞拟合谐振与非谐力常数
#[derive(Parser)]
#[command(name = "forcefit")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Fit harmonic and anharmonic force constants from rattled supercells", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Run the fitting pipeline: supercell, training set, cluster space, fit, outputs
    Fit(fit::FitArgs),

    /// Build a supercell and write it as POSCAR
    Supercell(supercell::SupercellArgs),

    /// Check the acoustic sum rule of a force-constant file
    Check(check::CheckArgs),
}
