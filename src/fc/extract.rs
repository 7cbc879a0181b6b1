//! # 力常数提取
//!
//! 按团簇空间的参数布局把拟合系数还原成各阶力常数：
//! 团簇 c 的分块 Φ_c = Σ_p x_p · E_{c,p}（E 为本征张量）。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 使用
//! - 使用 `cluster/`, `fitting/model.rs`, `fc/tensor.rs`

use super::tensor::ForceConstantsTensor;
use crate::cluster::ClusterSpace;
use crate::error::{ForceFitError, Result};
use crate::fitting::FittedModel;

use std::collections::BTreeMap;

/// 某一阶的求和规则检查结果
#[derive(Debug, Clone, Copy)]
pub struct SumRuleCheck {
    pub order: usize,
    pub residual: f64,
    pub tolerance: f64,
}

impl SumRuleCheck {
    pub fn passed(&self) -> bool {
        self.residual <= self.tolerance
    }
}

/// 提取各阶力常数
pub fn extract(
    space: &ClusterSpace,
    model: &FittedModel,
) -> Result<BTreeMap<usize, ForceConstantsTensor>> {
    if !model.matches(space) {
        return Err(ForceFitError::validation(
            "model",
            format!(
                "model has {} parameters for {} atoms, the cluster space has {} for {}",
                model.parameters.len(),
                model.n_atoms,
                space.n_parameters(),
                space.n_atoms
            ),
        ));
    }

    let mut tensors: BTreeMap<usize, ForceConstantsTensor> = space
        .orders()
        .into_iter()
        .map(|order| (order, ForceConstantsTensor::new(order, space.n_atoms)))
        .collect();

    for orbit in &space.orbits {
        let coefficients = &model.parameters[orbit.param_offset..orbit.param_offset + orbit.n_parameters()];
        if coefficients.iter().all(|&x| x == 0.0) {
            continue;
        }
        let Some(fc) = tensors.get_mut(&orbit.order) else {
            continue;
        };
        for member in &orbit.members {
            let mut block = vec![0.0; fc.block_size()];
            for (x, e) in coefficients.iter().zip(&member.eigentensors) {
                for (b, v) in block.iter_mut().zip(e) {
                    *b += x * v;
                }
            }
            fc.add_cluster(&member.cluster, &block);
        }
    }

    Ok(tensors)
}

/// 检查求和规则：二阶总是检查，更高阶在 `include_higher` 时检查
pub fn check_sum_rules(
    tensors: &BTreeMap<usize, ForceConstantsTensor>,
    tolerance: f64,
    include_higher: bool,
) -> Vec<SumRuleCheck> {
    tensors
        .iter()
        .filter(|(&order, _)| order == 2 || include_higher)
        .map(|(&order, fc)| SumRuleCheck {
            order,
            residual: fc.sum_rule_residual(),
            tolerance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterSpaceOptions;
    use crate::fitting::{FitDiagnostics, FitMethod};
    use crate::models::{build_supercell, Atom, Crystal, Lattice};
    use nalgebra::DVector;

    fn space(acoustic_sum_rules: bool, cutoffs: &[f64]) -> ClusterSpace {
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
        ClusterSpace::build(&sc, cutoffs, ClusterSpaceOptions { acoustic_sum_rules }).unwrap()
    }

    fn model(space: &ClusterSpace, parameters: Vec<f64>) -> FittedModel {
        FittedModel {
            method: FitMethod::LeastSquares,
            alpha: 0.0,
            n_atoms: space.n_atoms,
            cutoffs: space.cutoffs.clone(),
            free_parameters: parameters.clone(),
            parameters,
            diagnostics: FitDiagnostics {
                rmse_forces: 0.0,
                rmse_energy: None,
                r_squared: 1.0,
                condition_number: 1.0,
                n_rows: 0,
                n_samples: 0,
                n_active: 0,
            },
            orbits: FittedModel::orbit_records(space),
        }
    }

    #[test]
    fn test_constrained_parameters_satisfy_sum_rule() {
        let space = space(true, &[4.5]);
        let free = DVector::from_fn(space.n_free_parameters(), |i, _| 0.7 - 0.4 * i as f64);
        let params = space.expand(&free).iter().copied().collect();
        let tensors = extract(&space, &model(&space, params)).unwrap();

        let fc2 = &tensors[&2];
        assert_eq!(fc2.shape(), vec![16, 16, 3, 3]);
        assert!(fc2.max_abs() > 0.1);
        let checks = check_sum_rules(&tensors, 1e-8, false);
        assert_eq!(checks.len(), 1);
        assert!(checks[0].passed(), "residual {}", checks[0].residual);
    }

    #[test]
    fn test_force_constants_are_symmetric() {
        let space = space(false, &[4.5]);
        let params: Vec<f64> = (0..space.n_parameters()).map(|p| 1.0 + p as f64).collect();
        let tensors = extract(&space, &model(&space, params)).unwrap();
        let fc2 = &tensors[&2];
        for i in 0..16 {
            for j in 0..16 {
                let ij = fc2.block_or_zero(&[i, j]);
                let ji = fc2.block_or_zero(&[j, i]);
                for a in 0..3 {
                    for b in 0..3 {
                        assert!((ij[a * 3 + b] - ji[b * 3 + a]).abs() < 1e-10);
                    }
                }
            }
        }
    }

    #[test]
    fn test_wrong_parameter_count_rejected() {
        let space = space(false, &[4.5]);
        let bad = model(&space, vec![1.0; space.n_parameters() + 1]);
        assert!(matches!(
            extract(&space, &bad),
            Err(ForceFitError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_third_order_tensor_present() {
        let space = space(false, &[4.5, 4.5]);
        let params = vec![0.1; space.n_parameters()];
        let tensors = extract(&space, &model(&space, params)).unwrap();
        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors[&3].shape(), vec![16, 16, 16, 3, 3, 3]);
    }
}
