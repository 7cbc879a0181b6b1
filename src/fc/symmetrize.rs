//! # 力常数对称化
//!
//! 交替投影：
//! 1. 平移不变性：每行 s 的残差 Σ_k Φ_{s,k} 平均扣除到该行已存储的分块上
//! 2. 置换对称：同一团簇所有排列的分块取平均
//!
//! 两步都是正交投影，交替迭代直到残差低于容差或达到迭代上限。
//! 结果以置换投影结束，因此置换对称总是精确成立。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs`, `commands/check.rs` 使用
//! - 使用 `fc/tensor.rs`

use super::tensor::{distinct_orderings, inverse, permutations, row_sums, ForceConstantsTensor};
use crate::cluster::orbit::position_map;
use crate::cluster::tensor;

use std::collections::BTreeSet;

pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// 对称化结果
#[derive(Debug, Clone, Copy)]
pub struct SymmetrizeReport {
    pub iterations: usize,
    pub initial_residual: f64,
    pub residual: f64,
    pub converged: bool,
}

/// 对称化力常数，返回新张量
pub fn symmetrize(
    fc: &ForceConstantsTensor,
    tolerance: f64,
    max_iterations: usize,
) -> (ForceConstantsTensor, SymmetrizeReport) {
    let mut current = project_permutations(fc);
    let initial_residual = fc.sum_rule_residual();
    let mut residual = current.sum_rule_residual();
    let mut iterations = 0;

    while residual > tolerance && iterations < max_iterations {
        project_translations(&mut current);
        current = project_permutations(&current);
        residual = current.sum_rule_residual();
        iterations += 1;
    }

    let report = SymmetrizeReport {
        iterations,
        initial_residual,
        residual,
        converged: residual <= tolerance,
    };
    (current, report)
}

fn project_translations(fc: &mut ForceConstantsTensor) {
    let sums = row_sums(fc);
    let mut counts: std::collections::BTreeMap<Vec<usize>, usize> = Default::default();
    for (atoms, _) in fc.blocks() {
        *counts.entry(atoms[..atoms.len() - 1].to_vec()).or_insert(0) += 1;
    }

    let updates: Vec<(Vec<usize>, Vec<f64>)> = fc
        .blocks()
        .map(|(atoms, block)| {
            let row = &atoms[..atoms.len() - 1];
            let m = counts[row] as f64;
            let sum = &sums[row];
            let corrected = block.iter().zip(sum).map(|(b, s)| b - s / m).collect();
            (atoms.clone(), corrected)
        })
        .collect();
    for (atoms, block) in updates {
        fc.set(atoms, block);
    }
}

fn project_permutations(fc: &ForceConstantsTensor) -> ForceConstantsTensor {
    let order = fc.order;
    let clusters: BTreeSet<Vec<usize>> = fc
        .blocks()
        .map(|(atoms, _)| {
            let mut sorted = atoms.clone();
            sorted.sort_unstable();
            sorted
        })
        .collect();
    let perms = permutations(order);

    let mut out = ForceConstantsTensor::new(order, fc.n_atoms);
    for cluster in clusters {
        // 各排列的分块变换回升序轴后取平均
        let mut mean = vec![0.0; fc.block_size()];
        for p in &perms {
            let ordering: Vec<usize> = p.iter().map(|&k| cluster[k]).collect();
            if let Some(block) = fc.get(&ordering) {
                let back = tensor::permute_axes(block, p, order);
                for (m, v) in mean.iter_mut().zip(&back) {
                    *m += v;
                }
            }
        }
        let scale = 1.0 / perms.len() as f64;
        mean.iter_mut().for_each(|m| *m *= scale);

        for ordering in distinct_orderings(&cluster) {
            if let Some(sigma) = position_map(&ordering, &cluster) {
                out.set(
                    ordering,
                    tensor::permute_axes(&mean, &inverse(&sigma), order),
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(values: [f64; 9]) -> Vec<f64> {
        values.to_vec()
    }

    #[test]
    fn test_symmetrize_restores_sum_rule_and_symmetry() {
        let mut fc = ForceConstantsTensor::new(2, 2);
        fc.set(vec![0, 0], block([1.1, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]));
        fc.set(vec![0, 1], block([-1.0, 0.2, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -0.9]));
        fc.set(vec![1, 0], block([-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0]));
        fc.set(vec![1, 1], block([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]));
        assert!(fc.sum_rule_residual() > 0.05);

        let (sym, report) = symmetrize(&fc, 1e-10, DEFAULT_MAX_ITERATIONS);
        assert!(report.converged);
        assert!(sym.sum_rule_residual() <= 1e-10);

        let ab = sym.get(&[0, 1]).unwrap();
        let ba = sym.get(&[1, 0]).unwrap();
        for a in 0..3 {
            for b in 0..3 {
                assert!((ab[a * 3 + b] - ba[b * 3 + a]).abs() < 1e-12);
            }
        }
        let aa = sym.get(&[0, 0]).unwrap();
        assert!((aa[1] - aa[3]).abs() < 1e-12);
    }

    #[test]
    fn test_already_symmetric_is_unchanged() {
        let mut fc = ForceConstantsTensor::new(2, 2);
        let k = block([2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0]);
        let minus: Vec<f64> = k.iter().map(|v| -v).collect();
        fc.add_cluster(&[0, 0], &k);
        fc.add_cluster(&[1, 1], &k);
        fc.add_cluster(&[0, 1], &minus);

        let (sym, report) = symmetrize(&fc, 1e-12, 10);
        assert_eq!(report.iterations, 0);
        assert_eq!(sym, fc);
    }
}
