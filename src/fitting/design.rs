//! # 设计矩阵
//!
//! 能量展开（Φ 为全对称力常数，u 为位移）:
//! E = E0 + Σ_n 1/n! Σ Φ_{i1…in}^{α1…αn} u_{i1α1}…u_{inαn}
//!   = E0 + Σ_clusters 1/Πm! Σ_α T_c[α] Π_k u_{c_k α_k}
//!
//! 每个参数 p 对应一列：受力行为 −∂E/∂u，能量行为 E − E_ideal。
//!
//! ## 依赖关系
//! - 被 `fitting/mod.rs` 使用
//! - 使用 `cluster/`，`models/training.rs`

use crate::cluster::{tensor, ClusterSpace};
use crate::error::{ForceFitError, Result};
use crate::models::TrainingStructure;

use nalgebra::{DMatrix, DVector};

/// 未约化的线性系统
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// 行: 受力分量（及能量），列: 全参数
    pub matrix: DMatrix<f64>,
    pub target: DVector<f64>,
    /// 受力行的数量（排在前面）
    pub n_force_rows: usize,
    pub n_samples: usize,
}

/// 组装设计矩阵
///
/// `reference_energy` 为理想超胞能量，给出时每个构型追加一行能量。
pub fn assemble(
    space: &ClusterSpace,
    training: &[TrainingStructure],
    reference_energy: Option<f64>,
) -> Result<DesignMatrix> {
    let n_atoms = space.n_atoms;
    let n_force_rows = training.len() * 3 * n_atoms;
    let n_rows = n_force_rows + reference_energy.map_or(0, |_| training.len());
    let mut matrix = DMatrix::<f64>::zeros(n_rows, space.n_parameters());
    let mut target = DVector::<f64>::zeros(n_rows);

    for (s, structure) in training.iter().enumerate() {
        let evaluation = structure.evaluation.as_ref().ok_or_else(|| {
            ForceFitError::validation(
                "training set",
                format!("structure {} has no energy/forces", structure.index),
            )
        })?;
        if structure.displacements.len() != n_atoms || evaluation.forces.len() != n_atoms {
            return Err(ForceFitError::validation(
                "training set",
                format!(
                    "structure {} has {} atoms, the cluster space expects {}",
                    structure.index,
                    structure.displacements.len(),
                    n_atoms
                ),
            ));
        }

        let base = s * 3 * n_atoms;
        for (i, f) in evaluation.forces.iter().enumerate() {
            for beta in 0..3 {
                target[base + 3 * i + beta] = f[beta];
            }
        }
        let energy_row = reference_energy.map(|e0| {
            let row = n_force_rows + s;
            target[row] = evaluation.energy - e0;
            row
        });

        for orbit in &space.orbits {
            for member in &orbit.members {
                let u: Vec<&[f64; 3]> = member
                    .cluster
                    .iter()
                    .map(|&a| &structure.displacements[a])
                    .collect();

                for (p, e) in member.eigentensors.iter().enumerate() {
                    let column = orbit.param_offset + p;
                    for (k, &atom) in member.cluster.iter().enumerate() {
                        let g = tensor::contract_except(e, &u, k);
                        for beta in 0..3 {
                            matrix[(base + 3 * atom + beta, column)] -= member.weight * g[beta];
                        }
                    }
                    if let Some(row) = energy_row {
                        matrix[(row, column)] += member.weight * tensor::contract_all(e, &u);
                    }
                }
            }
        }
    }

    Ok(DesignMatrix {
        matrix,
        target,
        n_force_rows,
        n_samples: training.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterSpaceOptions;
    use crate::models::{build_supercell, Atom, Crystal, Evaluation, Lattice};

    fn space_and_ideal() -> (ClusterSpace, Crystal) {
        let prim = Crystal::new(
            "CsCl",
            Lattice::cubic(5.0),
            vec![
                Atom::new("Cs", [0.0, 0.0, 0.0]),
                Atom::new("Cl", [0.5, 0.5, 0.5]),
            ],
        )
        .unwrap();
        let (sc, _) = build_supercell(&prim, [[2, 0, 0], [0, 2, 0], [0, 0, 2]]).unwrap();
        let space = ClusterSpace::build(
            &sc,
            &[4.5],
            ClusterSpaceOptions {
                acoustic_sum_rules: false,
            },
        )
        .unwrap();
        (space, sc)
    }

    fn labeled(ideal: &Crystal, u: Vec<[f64; 3]>) -> TrainingStructure {
        let n = u.len();
        let structure = ideal.displaced(&u).unwrap();
        TrainingStructure::new(0, structure, u).labeled(Evaluation {
            energy: 0.0,
            forces: vec![[0.0; 3]; n],
        })
    }

    #[test]
    fn test_force_columns_are_minus_energy_gradient() {
        let (space, ideal) = space_and_ideal();
        let n = ideal.len();
        let u: Vec<[f64; 3]> = (0..n)
            .map(|i| {
                let t = i as f64;
                [0.01 * (t * 0.7).sin(), 0.01 * (t * 1.3).cos(), 0.005 * t.sin()]
            })
            .collect();

        let design = assemble(&space, &[labeled(&ideal, u.clone())], Some(0.0)).unwrap();
        let energy_row = design.n_force_rows;
        let h = 1e-6;

        for p in 0..space.n_parameters() {
            for (atom, beta) in [(0, 0), (3, 1), (9, 2)] {
                let mut plus = u.clone();
                plus[atom][beta] += h;
                let mut minus = u.clone();
                minus[atom][beta] -= h;
                let ep = assemble(&space, &[labeled(&ideal, plus)], Some(0.0)).unwrap();
                let em = assemble(&space, &[labeled(&ideal, minus)], Some(0.0)).unwrap();
                let grad = (ep.matrix[(energy_row, p)] - em.matrix[(energy_row, p)]) / (2.0 * h);
                let force = design.matrix[(3 * atom + beta, p)];
                assert!((force + grad).abs() < 1e-8, "p={} atom={} beta={}", p, atom, beta);
            }
        }
    }

    #[test]
    fn test_unlabeled_structure_rejected() {
        let (space, ideal) = space_and_ideal();
        let s = TrainingStructure::new(0, ideal.clone(), vec![[0.0; 3]; ideal.len()]);
        assert!(matches!(
            assemble(&space, &[s], None),
            Err(ForceFitError::ValidationError { .. })
        ));
    }
}
