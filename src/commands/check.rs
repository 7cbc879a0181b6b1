//! # check 命令实现
//!
//! 读取已有的力常数文件（phonopy `FORCE_CONSTANTS` 或 `fcN.npy`），
//! 报告平移求和规则的残差；可选地对称化后写出新文件。
//!
//! ## 依赖关系
//! - 使用 `cli/check.rs` 定义的参数
//! - 使用 `fc/`
//! - 使用 `utils/output.rs`

use crate::cli::check::CheckArgs;
use crate::error::{ForceFitError, Result};
use crate::fc::{export, symmetrize, ForceConstantsTensor};
use crate::utils::output;

use std::path::Path;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Tabled)]
struct CheckRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Order")]
    order: usize,
    #[tabled(rename = "Atoms")]
    atoms: usize,
    #[tabled(rename = "Blocks")]
    blocks: usize,
    #[tabled(rename = "Max |Φ|")]
    max_abs: String,
    #[tabled(rename = "Max row sum")]
    residual: String,
}

fn is_npy(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("npy"))
        .unwrap_or(false)
}

/// 按扩展名读取力常数文件
pub fn read_tensor(path: &Path) -> Result<ForceConstantsTensor> {
    if !path.exists() {
        return Err(ForceFitError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    if is_npy(path) {
        export::read_npy_tensor(path)
    } else {
        export::read_force_constants(path)
    }
}

/// 按阶数写出：二阶与非 `.npy` 路径用 phonopy 文本格式
fn write_tensor(fc: &ForceConstantsTensor, path: &Path) -> Result<()> {
    if fc.order == 2 && !is_npy(path) {
        export::write_force_constants(fc, path)
    } else {
        export::write_npy(fc, path)
    }
}

/// 执行 check 命令
pub fn execute(args: CheckArgs) -> Result<()> {
    output::print_header("Sum rule check");

    let fc = read_tensor(&args.file)?;
    let residual = fc.sum_rule_residual();
    let row = CheckRow {
        file: args.file.display().to_string(),
        order: fc.order,
        atoms: fc.n_atoms,
        blocks: fc.n_blocks(),
        max_abs: format!("{:.4e}", fc.max_abs()),
        residual: format!("{:.3e}", residual),
    };
    println!("{}", Table::new([row]));

    if residual <= args.tolerance {
        output::print_success(&format!(
            "Acoustic sum rule satisfied (tolerance {:.1e})",
            args.tolerance
        ));
    } else {
        output::print_warning(&format!(
            "Acoustic sum rule violated: {:.3e} > {:.1e}",
            residual, args.tolerance
        ));
    }

    if let Some(target) = &args.symmetrize {
        let (sym, report) = symmetrize(&fc, args.tolerance, args.max_iterations);
        let msg = format!(
            "Symmetrized in {} iteration(s): residual {:.3e} -> {:.3e}",
            report.iterations, report.initial_residual, report.residual
        );
        if report.converged {
            output::print_info(&msg);
        } else {
            output::print_warning(&format!(
                "{} (not converged after {} iterations)",
                msg, args.max_iterations
            ));
        }
        write_tensor(&sym, target)?;
        output::print_written(target);
    }

    output::print_done("Check finished");
    Ok(())
}
