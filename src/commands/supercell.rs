//! # supercell 命令实现
//!
//! 由原胞与整数超胞矩阵构造超胞并写出 POSCAR，便于在拟合前检查超胞。
//!
//! ## 依赖关系
//! - 使用 `cli/supercell.rs` 定义的参数
//! - 使用 `parsers/`, `models/structure.rs`, `fc/export.rs` (原子写入)

use crate::cli::supercell::SupercellArgs;
use crate::error::{ForceFitError, Result, Stage};
use crate::fc::export::write_atomic;
use crate::models::build_supercell;
use crate::models::structure::supercell_matrix_from_slice;
use crate::parsers;
use crate::parsers::poscar::to_poscar_string;
use crate::utils::output;

use std::io::Write;

/// 执行 supercell 命令
pub fn execute(args: SupercellArgs) -> Result<()> {
    output::print_header("Building supercell");

    let primitive = parsers::load(&args.structure).map_err(|e| e.at_stage(Stage::LoadStructure))?;
    let matrix = supercell_matrix_from_slice(&args.supercell)?;
    let (supercell, _) =
        build_supercell(&primitive, matrix).map_err(|e| e.at_stage(Stage::Supercell))?;

    output::print_info(&format!(
        "{}: {} atoms -> {} atoms ({} primitive cells)",
        primitive.formula(),
        primitive.len(),
        supercell.len(),
        supercell.len() / primitive.len().max(1)
    ));
    output::print_info(&format!(
        "Shortest lattice vector {:.3} Å, largest usable cutoff {:.3} Å",
        supercell.lattice.shortest_vector(),
        supercell.lattice.shortest_vector() / 2.0
    ));

    let content = to_poscar_string(&supercell);
    write_atomic(&args.output, |w| w.write_all(content.as_bytes()))
        .map_err(|e: ForceFitError| e.at_stage(Stage::Output))?;
    output::print_written(&args.output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_writes_supercell_poscar() {
        let dir = tempdir().unwrap();
        let poscar = dir.path().join("POSCAR");
        fs::write(
            &poscar,
            "CsCl\n1.0\n5.0 0.0 0.0\n0.0 5.0 0.0\n0.0 0.0 5.0\nCs Cl\n1 1\nDirect\n0.0 0.0 0.0\n0.5 0.5 0.5\n",
        )
        .unwrap();
        let output = dir.path().join("SPOSCAR");

        execute(SupercellArgs {
            structure: poscar,
            supercell: vec![2, 0, 0, 0, 2, 0, 0, 0, 1],
            output: output.clone(),
        })
        .unwrap();

        let supercell = parsers::load(&output).unwrap();
        assert_eq!(supercell.len(), 8);
        assert!((supercell.lattice.shortest_vector() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let dir = tempdir().unwrap();
        let poscar = dir.path().join("POSCAR");
        fs::write(
            &poscar,
            "Po\n1.0\n3.0 0.0 0.0\n0.0 3.0 0.0\n0.0 0.0 3.0\nPo\n1\nDirect\n0.0 0.0 0.0\n",
        )
        .unwrap();
        let output = dir.path().join("SPOSCAR");

        let result = execute(SupercellArgs {
            structure: poscar,
            supercell: vec![1, 0, 0, 1, 0, 0, 0, 0, 1],
            output: output.clone(),
        });
        assert!(result.is_err());
        assert!(!output.exists());
    }
}
