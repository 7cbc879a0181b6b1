//! # forcefit - 力常数拟合工具
//!
//! 由随机扰动的超胞及其受力拟合谐振与非谐力常数，写出 phonopy / ShengBTE 可读的文件。
//!
//! ## 子命令
//! - `fit` - 完整流程：超胞、训练集、团簇空间、回归、力常数输出
//! - `supercell` - 写出超胞 POSCAR
//! - `check` - 检查力常数文件的声学求和规则，可选对称化
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/         (命令行参数定义)
//!   ├── config.rs    (配置文件与默认值)
//!   ├── commands/    (命令执行逻辑)
//!   │     ├── parsers/    (POSCAR / extxyz 读写)
//!   │     ├── models/     (晶体、超胞、训练结构)
//!   │     ├── potentials/ (势函数)
//!   │     ├── training/   (随机扰动训练集)
//!   │     ├── batch/      (并行标注)
//!   │     ├── cluster/    (团簇空间与对称性)
//!   │     ├── fitting/    (设计矩阵与回归)
//!   │     └── fc/         (力常数提取、对称化、导出)
//!   ├── utils/       (工具函数)
//!   └── error.rs     (错误处理)
//! ```

mod batch;
mod cli;
mod cluster;
mod commands;
mod config;
mod error;
mod fc;
mod fitting;
mod models;
mod parsers;
mod potentials;
mod training;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        // 阶段包装已内嵌在消息中，只追加底层 I/O 等原因
        let mut source = std::error::Error::source(e.root());
        while let Some(cause) = source {
            utils::output::print_error(&format!("  caused by: {}", cause));
            source = cause.source();
        }
        std::process::exit(1);
    }
}
