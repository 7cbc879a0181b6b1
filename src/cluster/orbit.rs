//! # 团簇轨道与本征张量
//!
//! 团簇 = 升序排列的原子序号 n 元组（允许重复，重复项对应自作用项）。
//! 空间群把团簇映射为等价团簇，构成轨道。轨道代表团簇的本征张量张成
//! 在其位置对称性与重复位置交换下不变的 3^n 张量子空间；
//! 轨道中其他团簇的本征张量由对应的对称操作旋转得到。
//!
//! ## 依赖关系
//! - 被 `cluster/space.rs` 使用
//! - 使用 `cluster/symmetry.rs`, `cluster/tensor.rs`
//! - 使用 `nalgebra` 求零空间

use super::symmetry::SymmetryOperation;
use super::tensor;

use nalgebra::{DMatrix, SymmetricEigen};
use std::collections::HashMap;

/// 轨道中的一个团簇
#[derive(Debug, Clone)]
pub struct OrbitMember {
    /// 升序原子序号
    pub cluster: Vec<usize>,
    /// 能量展开中的权重 1 / Π m_a!（m_a 为原子 a 的重复次数）
    pub weight: f64,
    /// 每个参数对应的 3^n 张量（按团簇升序位置排列轴）
    pub eigentensors: Vec<Vec<f64>>,
}

/// 对称等价团簇的集合
#[derive(Debug, Clone)]
pub struct Orbit {
    pub order: usize,
    pub representative: Vec<usize>,
    /// 代表团簇中最大的原子间距 (Å)
    pub radius: f64,
    pub members: Vec<OrbitMember>,
    /// 本轨道第一个参数在全局参数向量中的位置
    pub param_offset: usize,
}

impl Orbit {
    pub fn n_parameters(&self) -> usize {
        self.members
            .first()
            .map_or(0, |m| m.eigentensors.len())
    }
}

/// 1 / Π m_a!
pub fn multiplicity_weight(cluster: &[usize]) -> f64 {
    let mut weight = 1.0;
    let mut run = 1;
    for k in 1..=cluster.len() {
        if k < cluster.len() && cluster[k] == cluster[k - 1] {
            run += 1;
        } else {
            for m in 2..=run {
                weight /= m as f64;
            }
            run = 1;
        }
    }
    weight
}

/// 求位置映射 σ，使 target[σ[k]] == atoms[k]（重复原子按出现顺序配对）
pub fn position_map(atoms: &[usize], target: &[usize]) -> Option<Vec<usize>> {
    let mut used = vec![false; target.len()];
    atoms
        .iter()
        .map(|&a| {
            let q = (0..target.len()).find(|&q| !used[q] && target[q] == a)?;
            used[q] = true;
            Some(q)
        })
        .collect()
}

/// 对称操作作用于团簇后的（未排序）原子序号
fn apply(op: &SymmetryOperation, cluster: &[usize]) -> Vec<usize> {
    cluster.iter().map(|&a| op.permutation[a]).collect()
}

fn sorted(mut atoms: Vec<usize>) -> Vec<usize> {
    atoms.sort_unstable();
    atoms
}

/// 把代表团簇上的张量经操作 `op` 变换到像团簇（升序位置）上
fn transform(
    op: &SymmetryOperation,
    representative: &[usize],
    image: &[usize],
    values: &[f64],
) -> Option<Vec<f64>> {
    let order = representative.len();
    let sigma = position_map(&apply(op, representative), image)?;
    let rotated = tensor::rotate(values, &op.rotation, order);
    Some(tensor::permute_axes(&rotated, &sigma, order))
}

/// 对称 Gram 矩阵的零空间（列为正交归一基）
pub(crate) fn nullspace(gram: DMatrix<f64>, rel_tol: f64) -> DMatrix<f64> {
    let n = gram.nrows();
    if n == 0 {
        return DMatrix::zeros(0, 0);
    }
    let eigen = SymmetricEigen::new(gram);
    let max_ev = eigen
        .eigenvalues
        .iter()
        .fold(0.0_f64, |acc, &x| acc.max(x.abs()))
        .max(1.0);

    let mut columns: Vec<usize> = (0..n)
        .filter(|&k| eigen.eigenvalues[k].abs() < rel_tol * max_ev)
        .collect();
    columns.sort_unstable();

    let mut basis = DMatrix::zeros(n, columns.len());
    for (c, &k) in columns.iter().enumerate() {
        let mut v = eigen.eigenvectors.column(k).clone_owned();
        // 最大分量取正号，结果与特征求解器的符号约定无关
        let pivot = v.iter().fold(0.0_f64, |acc, &x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.neg_mut();
        }
        basis.set_column(c, &v);
    }
    basis
}

/// 代表团簇的本征张量
fn eigentensors(
    representative: &[usize],
    site_ops: &[&SymmetryOperation],
) -> Vec<Vec<f64>> {
    let order = representative.len();
    let dim = tensor::n_components(order);
    let mut gram = DMatrix::<f64>::zeros(dim, dim);

    let mut add_constraint = |map: &dyn Fn(&[f64]) -> Vec<f64>| {
        let mut a = DMatrix::<f64>::zeros(dim, dim);
        for j in 0..dim {
            let mut e = vec![0.0; dim];
            e[j] = 1.0;
            let image = map(&e);
            for i in 0..dim {
                a[(i, j)] = image[i] - e[i];
            }
        }
        gram += a.transpose() * a;
    };

    for op in site_ops {
        if op.is_identity() {
            continue;
        }
        add_constraint(&|values: &[f64]| {
            transform(op, representative, representative, values)
                .unwrap_or_else(|| values.to_vec())
        });
    }

    // 重复位置交换对称
    for k in 1..order {
        if representative[k] == representative[k - 1] {
            let mut swap: Vec<usize> = (0..order).collect();
            swap.swap(k - 1, k);
            add_constraint(&|values: &[f64]| tensor::permute_axes(values, &swap, order));
        }
    }

    let basis = nullspace(gram, 1e-8);
    (0..basis.ncols())
        .map(|c| {
            basis
                .column(c)
                .iter()
                .map(|&x| if x.abs() < 1e-12 { 0.0 } else { x })
                .collect()
        })
        .collect()
}

/// 将团簇划分为轨道并计算本征张量
///
/// `clusters` 须为同一阶、升序且去重的列表；`radius` 给出团簇的最大原子间距。
/// 无自由参数的轨道被丢弃。
pub fn build_orbits(
    clusters: &[Vec<usize>],
    operations: &[SymmetryOperation],
    radius: impl Fn(&[usize]) -> f64,
    param_offset: usize,
) -> Vec<Orbit> {
    let index: HashMap<&[usize], usize> = clusters
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_slice(), i))
        .collect();
    let mut assigned = vec![false; clusters.len()];
    let mut orbits = Vec::new();
    let mut offset = param_offset;

    for (i, representative) in clusters.iter().enumerate() {
        if assigned[i] {
            continue;
        }

        // 轨道成员及把代表映射过去的第一个操作
        let mut members: Vec<(usize, &SymmetryOperation)> = Vec::new();
        let mut site_ops = Vec::new();
        for op in operations {
            let image = sorted(apply(op, representative));
            if image == *representative {
                site_ops.push(op);
            }
            if let Some(&j) = index.get(image.as_slice()) {
                if !assigned[j] {
                    assigned[j] = true;
                    members.push((j, op));
                }
            }
        }
        assigned[i] = true;

        let basis = eigentensors(representative, &site_ops);
        if basis.is_empty() {
            continue;
        }

        let mut orbit_members: Vec<OrbitMember> = members
            .into_iter()
            .map(|(j, op)| {
                let cluster = clusters[j].clone();
                let eigentensors = basis
                    .iter()
                    .map(|e| {
                        transform(op, representative, &cluster, e).unwrap_or_else(|| e.clone())
                    })
                    .collect();
                OrbitMember {
                    weight: multiplicity_weight(&cluster),
                    cluster,
                    eigentensors,
                }
            })
            .collect();
        orbit_members.sort_by(|a, b| a.cluster.cmp(&b.cluster));

        let n_params = basis.len();
        orbits.push(Orbit {
            order: representative.len(),
            representative: representative.clone(),
            radius: radius(representative),
            members: orbit_members,
            param_offset: offset,
        });
        offset += n_params;
    }

    orbits
}
