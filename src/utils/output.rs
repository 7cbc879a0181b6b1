//! # 美化输出工具
//!
//! 统一的终端输出样式：每行以带颜色的状态标记开头。
//! 警告次数被计数，命令结束时可汇总。
//!
//! ## 依赖关系
//! - 被所有 `commands/` 模块使用
//! - 使用 `colored` crate

use colored::{ColoredString, Colorize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

static WARNINGS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Success,
    Warning,
    Error,
    Done,
}

impl Level {
    fn tag(self) -> ColoredString {
        match self {
            Level::Info => "[*]".blue().bold(),
            Level::Success => "[OK]".green().bold(),
            Level::Warning => "[WARN]".yellow().bold(),
            Level::Error => "[ERR]".red().bold(),
            Level::Done => "[DONE]".green().bold(),
        }
    }
}

fn emit(level: Level, msg: &str) {
    match level {
        Level::Error => eprintln!("{} {}", level.tag(), msg),
        Level::Warning => {
            WARNINGS.fetch_add(1, Ordering::Relaxed);
            println!("{} {}", level.tag(), msg);
        }
        _ => println!("{} {}", level.tag(), msg),
    }
}

/// 打印成功消息
pub fn print_success(msg: &str) {
    emit(Level::Success, msg);
}

/// 打印错误消息（stderr）
pub fn print_error(msg: &str) {
    emit(Level::Error, msg);
}

/// 打印警告消息
pub fn print_warning(msg: &str) {
    emit(Level::Warning, msg);
}

/// 打印信息消息
pub fn print_info(msg: &str) {
    emit(Level::Info, msg);
}

/// 打印完成消息，附带本次运行的警告数
pub fn print_done(msg: &str) {
    match WARNINGS.load(Ordering::Relaxed) {
        0 => emit(Level::Done, msg),
        n => emit(
            Level::Done,
            &format!("{} ({} warning{})", msg, n, if n == 1 { "" } else { "s" }),
        ),
    }
}

/// 打印已写出的文件
pub fn print_written(path: &Path) {
    println!("{} {} {}", Level::Success.tag(), "->".cyan(), path.display());
}

/// 打印流程阶段标题，如 `[3/6] Training set`
pub fn print_stage(index: usize, total: usize, title: &str) {
    println!(
        "\n{} {}",
        format!("[{}/{}]", index, total).cyan().bold(),
        title.bold()
    );
}

/// 打印标题栏
pub fn print_header(title: &str) {
    let line = "─".repeat(60);
    println!("\n{}", line.dimmed());
    println!("  {}", title.bold());
    println!("{}\n", line.dimmed());
}

/// 打印分隔线
pub fn print_separator() {
    println!("{}", "─".repeat(60).dimmed());
}
