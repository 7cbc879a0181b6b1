//! # 团簇空间
//!
//! 由理想超胞与各阶截断半径构造力常数的参数化：
//! 1. 校验截断半径（> 0 且不超过超胞最短晶格矢量的一半）
//! 2. 搜索空间群
//! 3. 逐阶枚举团簇（两两最小像距离小于截断半径）
//! 4. 划分轨道并计算本征张量
//! 5. 可选：声学求和规则约束，参数向量限制在约束零空间内（p = Z·q）
//!
//! `cutoffs[k]` 对应 k + 2 阶。
//!
//! ## 依赖关系
//! - 被 `fitting/`, `fc/extract.rs`, `commands/fit.rs` 使用
//! - 使用 `cluster/symmetry.rs`, `cluster/orbit.rs`
//! - 使用 `nalgebra` 表示约束基

use super::orbit::{self, Orbit, OrbitMember};
use super::symmetry;
use super::tensor;
use crate::error::{ForceFitError, Result};
use crate::models::Crystal;

use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// 团簇收录判据的距离容差 (Å)：距离恰好等于截断半径的团簇不收录
pub const CUTOFF_TOLERANCE: f64 = 1e-5;

/// 构造选项
#[derive(Debug, Clone, Copy)]
pub struct ClusterSpaceOptions {
    /// 施加平移不变性（声学求和规则）约束
    pub acoustic_sum_rules: bool,
}

impl Default for ClusterSpaceOptions {
    fn default() -> Self {
        ClusterSpaceOptions {
            acoustic_sum_rules: true,
        }
    }
}

/// 单阶统计
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub order: usize,
    pub cutoff: f64,
    /// 对称化前的团簇数
    pub n_clusters: usize,
    pub n_orbits: usize,
    pub n_parameters: usize,
    /// 求和规则约束后的自由参数数
    pub n_free_parameters: usize,
}

/// 团簇空间
#[derive(Debug, Clone)]
pub struct ClusterSpace {
    pub n_atoms: usize,
    pub cutoffs: Vec<f64>,
    pub n_operations: usize,
    pub orbits: Vec<Orbit>,
    naive_counts: Vec<usize>,
    n_parameters: usize,
    /// 约束基 Z（n_parameters × n_free），None 表示无约束
    constraint: Option<DMatrix<f64>>,
}

/// 截断半径校验
pub fn validate_cutoffs(supercell: &Crystal, cutoffs: &[f64]) -> Result<()> {
    if cutoffs.is_empty() {
        return Err(ForceFitError::validation(
            "cutoffs",
            "at least one cutoff (for second order) is required",
        ));
    }

    let limit = 0.5 * supercell.lattice.shortest_vector();
    for (k, &cutoff) in cutoffs.iter().enumerate() {
        let order = k + 2;
        if !cutoff.is_finite() || cutoff <= 0.0 {
            return Err(ForceFitError::validation(
                "cutoffs",
                format!("order-{} cutoff must be positive (got {})", order, cutoff),
            ));
        }
        if cutoff > limit + 1e-9 {
            return Err(ForceFitError::validation(
                "cutoffs",
                format!(
                    "order-{} cutoff {:.3} Å exceeds half the shortest supercell lattice vector ({:.3} Å); \
                     use a larger supercell or a smaller cutoff",
                    order, cutoff, limit
                ),
            ));
        }
    }
    Ok(())
}

/// 枚举某一阶的全部团簇（升序，允许重复原子）
fn enumerate_clusters(distances: &[Vec<f64>], order: usize, cutoff: f64) -> Vec<Vec<usize>> {
    let n = distances.len();
    let within = |a: usize, b: usize| a == b || distances[a][b] < cutoff - CUTOFF_TOLERANCE;

    let mut clusters = Vec::new();
    let mut stack: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    stack.reverse();

    while let Some(partial) = stack.pop() {
        if partial.len() == order {
            clusters.push(partial);
            continue;
        }
        let last = partial[partial.len() - 1];
        for j in (last..n).rev() {
            if partial.iter().all(|&m| within(m, j)) {
                let mut next = partial.clone();
                next.push(j);
                stack.push(next);
            }
        }
    }
    clusters
}

impl ClusterSpace {
    /// 构造团簇空间
    pub fn build(
        supercell: &Crystal,
        cutoffs: &[f64],
        options: ClusterSpaceOptions,
    ) -> Result<Self> {
        validate_cutoffs(supercell, cutoffs)?;

        let operations = symmetry::find_space_group(supercell)?;
        let distances = supercell.distance_table();
        let radius = |cluster: &[usize]| {
            let mut r: f64 = 0.0;
            for (k, &a) in cluster.iter().enumerate() {
                for &b in &cluster[k + 1..] {
                    r = r.max(distances[a][b]);
                }
            }
            r
        };

        let mut orbits = Vec::new();
        let mut naive_counts = Vec::new();
        let mut offset = 0;
        for (k, &cutoff) in cutoffs.iter().enumerate() {
            let clusters = enumerate_clusters(&distances, k + 2, cutoff);
            naive_counts.push(clusters.len());

            let order_orbits = orbit::build_orbits(&clusters, &operations, radius, offset);
            offset += order_orbits.iter().map(|o| o.n_parameters()).sum::<usize>();
            orbits.extend(order_orbits);
        }

        let mut space = ClusterSpace {
            n_atoms: supercell.len(),
            cutoffs: cutoffs.to_vec(),
            n_operations: operations.len(),
            orbits,
            naive_counts,
            n_parameters: offset,
            constraint: None,
        };

        if options.acoustic_sum_rules {
            space.constraint = Some(space.sum_rule_basis());
        }

        Ok(space)
    }

    pub fn max_order(&self) -> usize {
        self.cutoffs.len() + 1
    }

    pub fn orders(&self) -> Vec<usize> {
        (2..=self.max_order()).collect()
    }

    /// 全参数数
    pub fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    /// 约束后的自由参数数
    pub fn n_free_parameters(&self) -> usize {
        self.constraint
            .as_ref()
            .map_or(self.n_parameters, |z| z.ncols())
    }

    pub fn has_sum_rules(&self) -> bool {
        self.constraint.is_some()
    }

    pub fn orbits_of_order(&self, order: usize) -> impl Iterator<Item = &Orbit> {
        self.orbits.iter().filter(move |o| o.order == order)
    }

    /// 设计矩阵列从全参数变换到自由参数: A · Z
    pub fn reduce_columns(&self, matrix: DMatrix<f64>) -> DMatrix<f64> {
        match &self.constraint {
            Some(z) => matrix * z,
            None => matrix,
        }
    }

    /// 自由参数还原为全参数: Z · q
    pub fn expand(&self, free: &DVector<f64>) -> DVector<f64> {
        match &self.constraint {
            Some(z) => z * free,
            None => free.clone(),
        }
    }

    /// 每阶统计
    pub fn summary(&self) -> Vec<OrderSummary> {
        let free_by_order = self.free_parameters_by_order();
        self.orders()
            .into_iter()
            .map(|order| {
                let orbits: Vec<&Orbit> = self.orbits_of_order(order).collect();
                let n_parameters = orbits.iter().map(|o| o.n_parameters()).sum();
                OrderSummary {
                    order,
                    cutoff: self.cutoffs[order - 2],
                    n_clusters: self.naive_counts[order - 2],
                    n_orbits: orbits.len(),
                    n_parameters,
                    n_free_parameters: free_by_order
                        .get(&order)
                        .copied()
                        .unwrap_or(n_parameters),
                }
            })
            .collect()
    }

    fn free_parameters_by_order(&self) -> HashMap<usize, usize> {
        let mut counts = HashMap::new();
        if let Some(z) = &self.constraint {
            for c in 0..z.ncols() {
                // 约束按阶分块，每列只在一阶上非零
                if let Some(order) = self.order_of_column(z, c) {
                    *counts.entry(order).or_insert(0) += 1;
                }
            }
            for order in self.orders() {
                counts.entry(order).or_insert(0);
            }
        }
        counts
    }

    fn order_of_column(&self, z: &DMatrix<f64>, column: usize) -> Option<usize> {
        self.orbits.iter().find_map(|o| {
            let range = o.param_offset..o.param_offset + o.n_parameters();
            range
                .clone()
                .any(|p| z[(p, column)].abs() > 1e-12)
                .then_some(o.order)
        })
    }

    /// 按阶构造平移不变性约束的零空间，拼成分块对角的 Z
    ///
    /// 对每个有序 (n-1) 元组 s 与笛卡尔分量 α：Σ_k Φ_{s,k}^α = 0。
    fn sum_rule_basis(&self) -> DMatrix<f64> {
        let mut blocks: Vec<(usize, DMatrix<f64>)> = Vec::new();
        for order in self.orders() {
            let orbits: Vec<&Orbit> = self.orbits_of_order(order).collect();
            let Some(first) = orbits.first() else {
                continue;
            };
            let start = first.param_offset;
            let size: usize = orbits.iter().map(|o| o.n_parameters()).sum();

            let mut rows: HashMap<(Vec<usize>, usize), Vec<(usize, f64)>> = HashMap::new();
            for orbit in &orbits {
                for member in &orbit.members {
                    sum_rule_rows(orbit, member, start, &mut rows);
                }
            }

            let mut gram = DMatrix::<f64>::zeros(size, size);
            for entries in rows.values() {
                let mut dense: HashMap<usize, f64> = HashMap::new();
                for &(p, v) in entries {
                    *dense.entry(p).or_insert(0.0) += v;
                }
                let dense: Vec<(usize, f64)> =
                    dense.into_iter().filter(|(_, v)| v.abs() > 1e-14).collect();
                for &(p, vp) in &dense {
                    for &(q, vq) in &dense {
                        gram[(p, q)] += vp * vq;
                    }
                }
            }

            blocks.push((start, orbit::nullspace(gram, 1e-8)));
        }

        let n_free: usize = blocks.iter().map(|(_, b)| b.ncols()).sum();
        let mut z = DMatrix::<f64>::zeros(self.n_parameters, n_free);
        let mut col = 0;
        for (start, block) in blocks {
            z.view_mut((start, col), (block.nrows(), block.ncols()))
                .copy_from(&block);
            col += block.ncols();
        }
        z
    }
}

/// 一个团簇对求和规则各行的贡献
fn sum_rule_rows(
    orbit: &Orbit,
    member: &OrbitMember,
    start: usize,
    rows: &mut HashMap<(Vec<usize>, usize), Vec<(usize, f64)>>,
) {
    let order = member.cluster.len();
    let mut distinct = member.cluster.clone();
    distinct.dedup();

    for &k in &distinct {
        // s = 去掉一个 k 后的团簇，有序元组为 (s, k)
        let mut rest = member.cluster.clone();
        if let Some(pos) = rest.iter().position(|&a| a == k) {
            rest.remove(pos);
        }
        let mut ordered = rest.clone();
        ordered.push(k);

        let Some(sigma) = orbit::position_map(&ordered, &member.cluster) else {
            continue;
        };
        let mut inverse = vec![0; order];
        for (q, &s) in sigma.iter().enumerate() {
            inverse[s] = q;
        }

        for (p, e) in member.eigentensors.iter().enumerate() {
            let reordered = tensor::permute_axes(e, &inverse, order);
            for (alpha, &value) in reordered.iter().enumerate() {
                if value != 0.0 {
                    rows.entry((rest.clone(), alpha))
                        .or_default()
                        .push((orbit.param_offset + p - start, value));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{build_supercell, Atom, Lattice};

    fn cscl_supercell() -> Crystal {
        let prim = Crystal::new(
            "CsCl",
            Lattice::cubic(5.0),
            vec![
                Atom::new("Cs", [0.0, 0.0, 0.0]),
                Atom::new("Cl", [0.5, 0.5, 0.5]),
            ],
        )
        .unwrap();
        build_supercell(&prim, [[2, 0, 0], [0, 2, 0], [0, 0, 2]])
            .unwrap()
            .0
    }

    fn no_sum_rules() -> ClusterSpaceOptions {
        ClusterSpaceOptions {
            acoustic_sum_rules: false,
        }
    }

    #[test]
    fn test_cutoff_too_large() {
        let sc = cscl_supercell();
        let result = ClusterSpace::build(&sc, &[5.5], ClusterSpaceOptions::default());
        assert!(matches!(result, Err(ForceFitError::ValidationError { .. })));
        assert!(validate_cutoffs(&sc, &[5.0]).is_ok());
        assert!(validate_cutoffs(&sc, &[4.0, -1.0]).is_err());
        assert!(validate_cutoffs(&sc, &[]).is_err());
    }

    #[test]
    fn test_second_order_clusters() {
        let sc = cscl_supercell();
        let distances = sc.distance_table();
        // 16 个自作用项 + 16 × 8 / 2 个最近邻对
        let clusters = enumerate_clusters(&distances, 2, 4.5);
        assert_eq!(clusters.len(), 16 + 64);
        assert!(clusters.iter().all(|c| c[0] <= c[1]));
    }

    #[test]
    fn test_symmetry_reduces_parameters() {
        let sc = cscl_supercell();
        let space = ClusterSpace::build(&sc, &[4.5], no_sum_rules()).unwrap();
        let summary = &space.summary()[0];
        assert_eq!(summary.n_clusters, 80);
        // Cs 自作用、Cl 自作用、Cs-Cl 最近邻
        assert_eq!(summary.n_orbits, 3);
        // 立方位置对称下自作用各 1 个参数；<111> 方向的键 2 个参数
        assert_eq!(space.n_parameters(), 4);
        assert!(space.n_parameters() < 80 * 9);
    }

    #[test]
    fn test_sum_rules_remove_self_terms() {
        let sc = cscl_supercell();
        let space = ClusterSpace::build(&sc, &[4.5], ClusterSpaceOptions::default()).unwrap();
        // 自作用项由成键项决定
        assert_eq!(space.n_free_parameters(), 2);
        assert_eq!(space.summary()[0].n_free_parameters, 2);
    }

    #[test]
    fn test_member_tensors_related_by_symmetry() {
        let sc = cscl_supercell();
        let space = ClusterSpace::build(&sc, &[4.5], no_sum_rules()).unwrap();
        for orbit in &space.orbits {
            for member in &orbit.members {
                assert_eq!(member.eigentensors.len(), orbit.n_parameters());
                for e in &member.eigentensors {
                    let norm: f64 = e.iter().map(|x| x * x).sum::<f64>().sqrt();
                    assert!((norm - 1.0).abs() < 1e-8);
                }
            }
        }
        let total: usize = space.orbits.iter().map(|o| o.members.len()).sum();
        assert_eq!(total, 80);
    }

    #[test]
    fn test_third_order_space() {
        let sc = cscl_supercell();
        let space = ClusterSpace::build(&sc, &[4.5, 4.5], ClusterSpaceOptions::default()).unwrap();
        assert_eq!(space.max_order(), 3);
        let summary = space.summary();
        assert_eq!(summary.len(), 2);
        assert!(summary[1].n_orbits > 0);
        assert!(summary[1].n_free_parameters <= summary[1].n_parameters);
    }
}
