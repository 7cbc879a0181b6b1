//! # 力常数张量
//!
//! n 阶力常数 Φ_{i1…in}^{α1…αn} 以稀疏形式存储：键为有序原子元组，
//! 值为 3^n 笛卡尔分块（行主序）。一个团簇的所有不同排列都单独存储，
//! 因此从文件读入的非对称张量也能原样保存。
//!
//! 稠密布局为 `(N,)*n + (3,)*n` 行主序，即原子元组在前、笛卡尔分量在后。
//!
//! ## 依赖关系
//! - 被 `fc/extract.rs`, `fc/symmetrize.rs`, `fc/export.rs`, `commands/` 使用
//! - 使用 `cluster/tensor.rs` 的轴重排

use crate::cluster::orbit::position_map;
use crate::cluster::tensor;
use crate::error::{ForceFitError, Result};

use std::collections::{BTreeMap, BTreeSet};

/// 稀疏力常数张量
#[derive(Debug, Clone, PartialEq)]
pub struct ForceConstantsTensor {
    pub order: usize,
    pub n_atoms: usize,
    blocks: BTreeMap<Vec<usize>, Vec<f64>>,
}

impl ForceConstantsTensor {
    pub fn new(order: usize, n_atoms: usize) -> Self {
        ForceConstantsTensor {
            order,
            n_atoms,
            blocks: BTreeMap::new(),
        }
    }

    /// 稠密数组形状 `(N,)*n + (3,)*n`
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.n_atoms; self.order];
        shape.extend(std::iter::repeat(3).take(self.order));
        shape
    }

    pub fn block_size(&self) -> usize {
        tensor::n_components(self.order)
    }

    /// 存储的分块数
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&Vec<usize>, &Vec<f64>)> {
        self.blocks.iter()
    }

    /// 有序元组的分块
    pub fn get(&self, atoms: &[usize]) -> Option<&[f64]> {
        self.blocks.get(atoms).map(|b| b.as_slice())
    }

    /// 有序元组的分块，未存储时为零
    #[cfg(test)]
    pub fn block_or_zero(&self, atoms: &[usize]) -> Vec<f64> {
        self.get(atoms)
            .map(|b| b.to_vec())
            .unwrap_or_else(|| vec![0.0; self.block_size()])
    }

    /// 设置有序元组的分块（覆盖）
    pub fn set(&mut self, atoms: Vec<usize>, block: Vec<f64>) {
        debug_assert_eq!(atoms.len(), self.order);
        debug_assert_eq!(block.len(), self.block_size());
        self.blocks.insert(atoms, block);
    }

    /// 把升序团簇上的分块累加到该团簇的所有不同排列
    ///
    /// `block` 的轴按团簇升序位置排列；排列 t 的分块按 t 的顺序重排轴。
    pub fn add_cluster(&mut self, cluster: &[usize], block: &[f64]) {
        let size = self.block_size();
        for ordering in distinct_orderings(cluster) {
            let Some(sigma) = position_map(&ordering, cluster) else {
                continue;
            };
            let reordered = tensor::permute_axes(block, &inverse(&sigma), self.order);
            let entry = self
                .blocks
                .entry(ordering)
                .or_insert_with(|| vec![0.0; size]);
            for (e, v) in entry.iter_mut().zip(&reordered) {
                *e += v;
            }
        }
    }

    /// 由稠密数组构造（全零分块不存储）
    pub fn from_dense(order: usize, n_atoms: usize, data: &[f64]) -> Result<Self> {
        let mut fc = ForceConstantsTensor::new(order, n_atoms);
        let size = fc.block_size();
        let n_tuples = n_atoms.pow(order as u32);
        if data.len() != n_tuples * size {
            return Err(ForceFitError::validation(
                "force constants",
                format!(
                    "dense array has {} values, shape {:?} needs {}",
                    data.len(),
                    fc.shape(),
                    n_tuples * size
                ),
            ));
        }
        for (t, chunk) in data.chunks_exact(size).enumerate() {
            if chunk.iter().any(|&v| v != 0.0) {
                fc.set(atom_tuple(t, n_atoms, order), chunk.to_vec());
            }
        }
        Ok(fc)
    }

    /// 按行主序遍历全部原子元组（含零分块），遇到错误即停止
    pub fn try_for_each_dense_block<E>(
        &self,
        mut f: impl FnMut(&[usize], &[f64]) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let zero = vec![0.0; self.block_size()];
        let n_tuples = self.n_atoms.pow(self.order as u32);
        for t in 0..n_tuples {
            let atoms = atom_tuple(t, self.n_atoms, self.order);
            let block = self.get(&atoms).unwrap_or(&zero);
            f(&atoms, block)?;
        }
        Ok(())
    }

    /// 平移不变性残差：max_{s,α} |Σ_k Φ_{s,k}^α|，s 为前 n-1 个原子
    pub fn sum_rule_residual(&self) -> f64 {
        row_sums(self)
            .values()
            .flat_map(|sum| sum.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// 最大分量绝对值
    pub fn max_abs(&self) -> f64 {
        self.blocks
            .values()
            .flat_map(|b| b.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

/// 每行 s 的分块之和 Σ_k Φ_{s,k}
pub(crate) fn row_sums(fc: &ForceConstantsTensor) -> BTreeMap<Vec<usize>, Vec<f64>> {
    let mut sums: BTreeMap<Vec<usize>, Vec<f64>> = BTreeMap::new();
    let size = fc.block_size();
    for (atoms, block) in &fc.blocks {
        let row = atoms[..atoms.len() - 1].to_vec();
        let sum = sums.entry(row).or_insert_with(|| vec![0.0; size]);
        for (s, v) in sum.iter_mut().zip(block) {
            *s += v;
        }
    }
    sums
}

/// 行主序下第 t 个原子元组
fn atom_tuple(mut t: usize, n_atoms: usize, order: usize) -> Vec<usize> {
    let mut atoms = vec![0; order];
    for k in (0..order).rev() {
        atoms[k] = t % n_atoms;
        t /= n_atoms;
    }
    atoms
}

pub(crate) fn inverse(sigma: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; sigma.len()];
    for (k, &s) in sigma.iter().enumerate() {
        inv[s] = k;
    }
    inv
}

/// {0, …, n-1} 的全部排列
pub(crate) fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current: Vec<usize> = Vec::with_capacity(n);
    let mut used = vec![false; n];
    fn recurse(n: usize, current: &mut Vec<usize>, used: &mut [bool], out: &mut Vec<Vec<usize>>) {
        if current.len() == n {
            out.push(current.clone());
            return;
        }
        for k in 0..n {
            if !used[k] {
                used[k] = true;
                current.push(k);
                recurse(n, current, used, out);
                current.pop();
                used[k] = false;
            }
        }
    }
    recurse(n, &mut current, &mut used, &mut out);
    out
}

/// 团簇（多重集）的全部不同排列
pub(crate) fn distinct_orderings(cluster: &[usize]) -> Vec<Vec<usize>> {
    let set: BTreeSet<Vec<usize>> = permutations(cluster.len())
        .into_iter()
        .map(|p| p.iter().map(|&k| cluster[k]).collect())
        .collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 两原子弹簧：Φ_00 = Φ_11 = kI, Φ_01 = Φ_10 = -kI
    fn spring(k: f64) -> ForceConstantsTensor {
        let mut fc = ForceConstantsTensor::new(2, 2);
        let identity = |s: f64| {
            let mut b = vec![0.0; 9];
            b[0] = s;
            b[4] = s;
            b[8] = s;
            b
        };
        fc.add_cluster(&[0, 0], &identity(k));
        fc.add_cluster(&[1, 1], &identity(k));
        fc.add_cluster(&[0, 1], &identity(-k));
        fc
    }

    #[test]
    fn test_add_cluster_fills_all_orderings() {
        let fc = spring(2.0);
        assert_eq!(fc.n_blocks(), 4);
        assert_eq!(fc.get(&[1, 0]).unwrap()[4], -2.0);
        assert_eq!(fc.shape(), vec![2, 2, 3, 3]);
        assert!(fc.sum_rule_residual() < 1e-15);
    }

    #[test]
    fn test_transposed_block_for_reversed_pair() {
        let mut fc = ForceConstantsTensor::new(2, 3);
        let mut block = vec![0.0; 9];
        block[1] = 5.0; // (x, y)
        fc.add_cluster(&[0, 2], &block);
        assert_eq!(fc.get(&[0, 2]).unwrap()[1], 5.0);
        // Φ_20^{yx} = Φ_02^{xy}
        assert_eq!(fc.get(&[2, 0]).unwrap()[3], 5.0);
        assert_eq!(fc.get(&[2, 0]).unwrap()[1], 0.0);
    }

    #[test]
    fn test_dense_round_trip() {
        let fc = spring(1.5);
        let mut dense = Vec::new();
        fc.try_for_each_dense_block(|_, b| {
            dense.extend_from_slice(b);
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(dense.len(), 2 * 2 * 9);
        let back = ForceConstantsTensor::from_dense(2, 2, &dense).unwrap();
        assert_eq!(back, fc);
        assert!(ForceConstantsTensor::from_dense(2, 3, &dense).is_err());
    }

    #[test]
    fn test_residual_detects_broken_sum_rule() {
        let mut fc = spring(1.0);
        let mut block = fc.block_or_zero(&[0, 0]);
        block[0] += 0.25;
        fc.set(vec![0, 0], block);
        assert!((fc.sum_rule_residual() - 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_distinct_orderings() {
        assert_eq!(distinct_orderings(&[1, 1, 2]).len(), 3);
        assert_eq!(distinct_orderings(&[1, 2, 3]).len(), 6);
        assert_eq!(distinct_orderings(&[4, 4]), vec![vec![4, 4]]);
    }
}
