//! # 空间群搜索
//!
//! 在（超胞）结构上暴力搜索全部对称操作：
//! 1. 先把晶格基矢约化（逐对尺寸约化 + {-1, 0, 1} 组合缩短），
//!    在约化基下枚举元素取自 {-1, 0, 1}、行列式 ±1、保持度规的整数矩阵，
//!    再变换回原始基矢。约化基下所有点群操作的元素都在 {-1, 0, 1} 内，
//!    因此非约化晶胞（如 a₂ = 2a₁ + b）的对称性不会漏掉
//! 2. 对每个 W，以同种原子之间的差作为候选平移 t
//! 3. 检查 x → W·x + t 是否把每个原子映射到同种原子上（模晶格平移）；
//!    原子按分数坐标分格索引，单次映射检查为 O(N)
//!
//! 超胞的纯平移也在其中，因此轨道覆盖超胞内所有等价团簇。
//! 总代价约为 |点群| × 锚点候选数 × N，数百原子的超胞可在秒级完成。
//!
//! ## 依赖关系
//! - 被 `cluster/space.rs` 使用
//! - 使用 `models/structure.rs`, `utils/vec3.rs`

use crate::error::{ForceFitError, Result};
use crate::models::{Crystal, Lattice};
use crate::utils::vec3::{self, Mat3, Vec3};

use std::collections::HashMap;

/// 判断位置重合的距离容差 (Å)
pub const SYMPREC: f64 = 1e-3;

/// 每个分数坐标方向的分格数
const BINS: i64 = 100;

type IMat3 = [[i32; 3]; 3];

const IDENTITY: IMat3 = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];

/// 一个空间群操作
#[derive(Debug, Clone)]
pub struct SymmetryOperation {
    /// 分数坐标下的整数旋转（作用于列向量）
    pub rotation_frac: IMat3,
    /// 分数平移
    pub translation: Vec3,
    /// 笛卡尔旋转 R = Lᵀ W L⁻ᵀ
    pub rotation: Mat3,
    /// 原子 i 被映射到 permutation[i]
    pub permutation: Vec<usize>,
}

impl SymmetryOperation {
    pub fn is_identity(&self) -> bool {
        self.permutation.iter().enumerate().all(|(i, &p)| i == p) && self.rotation_frac == IDENTITY
    }
}

/// 约化晶格基矢，返回幺模矩阵 T 与约化基 T·L（行为基矢）
fn reduce_basis(matrix: &Mat3) -> (IMat3, Mat3) {
    let mut t = IDENTITY;
    let mut b = *matrix;
    let len2 = |v: &Vec3| vec3::dot(v, v);

    // 每一步都严格缩短某个基矢，格点离散，循环必然结束
    loop {
        let mut changed = false;

        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let c = (vec3::dot(&b[i], &b[j]) / len2(&b[j])).round();
                if c == 0.0 {
                    continue;
                }
                let shorter = vec3::sub(&b[i], &vec3::scale(&b[j], c));
                if len2(&shorter) < len2(&b[i]) * (1.0 - 1e-12) {
                    b[i] = shorter;
                    for k in 0..3 {
                        t[i][k] -= c as i32 * t[j][k];
                    }
                    changed = true;
                }
            }
        }

        for i in 0..3 {
            let (j, k) = ((i + 1) % 3, (i + 2) % 3);
            let mut best = (len2(&b[i]), 0, 0);
            for cj in -1..=1 {
                for ck in -1..=1 {
                    let v = vec3::add(
                        &b[i],
                        &vec3::add(&vec3::scale(&b[j], cj as f64), &vec3::scale(&b[k], ck as f64)),
                    );
                    if len2(&v) < best.0 * (1.0 - 1e-12) {
                        best = (len2(&v), cj, ck);
                    }
                }
            }
            let (_, cj, ck) = best;
            if cj != 0 || ck != 0 {
                b[i] = vec3::add(
                    &b[i],
                    &vec3::add(&vec3::scale(&b[j], cj as f64), &vec3::scale(&b[k], ck as f64)),
                );
                for m in 0..3 {
                    t[i][m] += cj * t[j][m] + ck * t[k][m];
                }
                changed = true;
            }
        }

        if !changed {
            return (t, b);
        }
    }
}

fn mul_i(a: &[[i64; 3]; 3], b: &[[i64; 3]; 3]) -> [[i64; 3]; 3] {
    let mut out = [[0i64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn widen(m: &IMat3) -> [[i64; 3]; 3] {
    m.map(|row| row.map(|x| x as i64))
}

fn transpose_i(m: &[[i64; 3]; 3]) -> [[i64; 3]; 3] {
    let mut out = [[0i64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[j][i];
        }
    }
    out
}

/// 保持度规的整数点群操作（原始基矢下的分数坐标）
fn lattice_point_group(structure: &Crystal) -> Vec<IMat3> {
    let (t, reduced) = reduce_basis(&structure.lattice.matrix);
    let g = Lattice::from_vectors(reduced).metric();
    let scale = g[0][0].max(g[1][1]).max(g[2][2]);
    let tol = 1e-6 * scale;

    // 约化基下的 W' 对应原始基下的 W = Tᵀ W' T⁻ᵀ，T⁻ᵀ = det(T)·adj(T)ᵀ
    let t_wide = widen(&t);
    let det_t = vec3::det_i(&t);
    let t_inv_t = transpose_i(&vec3::adjugate_i(&t)).map(|row| row.map(|x| x * det_t));

    let mut ops = Vec::new();
    for code in 0..3i32.pow(9) {
        let mut w = [[0i32; 3]; 3];
        let mut c = code;
        for row in w.iter_mut() {
            for x in row.iter_mut() {
                *x = c % 3 - 1;
                c /= 3;
            }
        }
        if vec3::det_i(&w).abs() != 1 {
            continue;
        }

        // Wᵀ G W == G
        let wf = to_f64(&w);
        let transformed = vec3::mat_mul(&vec3::transpose(&wf), &vec3::mat_mul(&g, &wf));
        let preserved = (0..3).all(|i| (0..3).all(|j| (transformed[i][j] - g[i][j]).abs() < tol));
        if preserved {
            let original = mul_i(&transpose_i(&t_wide), &mul_i(&widen(&w), &t_inv_t));
            ops.push(original.map(|row| row.map(|x| x as i32)));
        }
    }
    ops
}

fn to_f64(w: &IMat3) -> Mat3 {
    w.map(|row| row.map(|x| x as f64))
}

/// 分数坐标差（已折回 [-0.5, 0.5)）对应的笛卡尔距离
fn wrapped_distance(structure: &Crystal, diff: &Vec3) -> f64 {
    let wrapped = [
        diff[0] - diff[0].round(),
        diff[1] - diff[1].round(),
        diff[2] - diff[2].round(),
    ];
    vec3::norm(&structure.lattice.to_cartesian(&wrapped))
}

fn bin_of(frac: &Vec3) -> [i64; 3] {
    frac.map(|x| ((vec3::wrap_frac(x) * BINS as f64).floor() as i64).rem_euclid(BINS))
}

/// 按分数坐标分格的原子索引
///
/// 格宽 1/100；只要 SYMPREC 对应的分数坐标容差小于格宽（晶面间距大于 0.1 Å），
/// 查找相邻 27 格即可找到所有候选原子。
struct SiteIndex<'a> {
    structure: &'a Crystal,
    bins: HashMap<[i64; 3], Vec<usize>>,
}

impl<'a> SiteIndex<'a> {
    fn new(structure: &'a Crystal) -> Self {
        let mut bins: HashMap<[i64; 3], Vec<usize>> = HashMap::new();
        for (i, atom) in structure.atoms.iter().enumerate() {
            bins.entry(bin_of(&atom.position)).or_default().push(i);
        }
        SiteIndex { structure, bins }
    }

    /// 与 `image` 重合、元素相同且尚未占用的原子
    fn find(&self, element: &str, image: &Vec3, taken: &[bool]) -> Option<usize> {
        let [a, b, c] = bin_of(image);
        for da in -1..=1 {
            for db in -1..=1 {
                for dc in -1..=1 {
                    let key = [
                        (a + da).rem_euclid(BINS),
                        (b + db).rem_euclid(BINS),
                        (c + dc).rem_euclid(BINS),
                    ];
                    let Some(candidates) = self.bins.get(&key) else {
                        continue;
                    };
                    for &j in candidates {
                        let other = &self.structure.atoms[j];
                        if !taken[j]
                            && other.element == element
                            && wrapped_distance(self.structure, &vec3::sub(&other.position, image))
                                < SYMPREC
                        {
                            return Some(j);
                        }
                    }
                }
            }
        }
        None
    }
}

/// 在给定 W 与 t 下求原子置换；不构成对称操作时返回 None
fn match_atoms(index: &SiteIndex, w: &Mat3, t: &Vec3) -> Option<Vec<usize>> {
    let structure = index.structure;
    let n = structure.len();
    let mut permutation = vec![usize::MAX; n];
    let mut taken = vec![false; n];

    for (i, atom) in structure.atoms.iter().enumerate() {
        let image = vec3::add(&vec3::mat_vec(w, &atom.position), t);
        let target = index.find(&atom.element, &image, &taken)?;
        taken[target] = true;
        permutation[i] = target;
    }
    Some(permutation)
}

/// 搜索结构的全部空间群操作（恒等操作排在第一位）
pub fn find_space_group(structure: &Crystal) -> Result<Vec<SymmetryOperation>> {
    if structure.is_empty() {
        return Err(ForceFitError::validation("structure", "no atoms"));
    }

    let lattice_t = vec3::transpose(&structure.lattice.matrix);
    let lattice_t_inv = vec3::inverse(&lattice_t)
        .ok_or_else(|| ForceFitError::validation("lattice", "singular lattice matrix"))?;

    // 以原子数最少的元素的第一个原子为锚点
    let anchor = {
        let mut best = 0;
        let mut best_count = usize::MAX;
        for (i, atom) in structure.atoms.iter().enumerate() {
            let count = structure
                .atoms
                .iter()
                .filter(|a| a.element == atom.element)
                .count();
            if count < best_count {
                best = i;
                best_count = count;
            }
        }
        best
    };
    let anchor_atom = &structure.atoms[anchor];

    let index = SiteIndex::new(structure);
    let mut operations = Vec::new();
    for w in lattice_point_group(structure) {
        let wf = to_f64(&w);
        let rotated_anchor = vec3::mat_vec(&wf, &anchor_atom.position);

        for candidate in structure
            .atoms
            .iter()
            .filter(|a| a.element == anchor_atom.element)
        {
            let raw = vec3::sub(&candidate.position, &rotated_anchor);
            let t = [
                vec3::wrap_frac(raw[0]),
                vec3::wrap_frac(raw[1]),
                vec3::wrap_frac(raw[2]),
            ];
            if let Some(permutation) = match_atoms(&index, &wf, &t) {
                let rotation = vec3::mat_mul(&lattice_t, &vec3::mat_mul(&wf, &lattice_t_inv));
                operations.push(SymmetryOperation {
                    rotation_frac: w,
                    translation: t,
                    rotation,
                    permutation,
                });
            }
        }
    }

    operations.sort_by_key(|op| !op.is_identity());
    if operations.first().map_or(true, |op| !op.is_identity()) {
        return Err(ForceFitError::validation(
            "structure",
            "symmetry search did not recover the identity operation",
        ));
    }
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{build_supercell, Atom};

    fn cscl() -> Crystal {
        Crystal::new(
            "CsCl",
            Lattice::cubic(5.0),
            vec![
                Atom::new("Cs", [0.0, 0.0, 0.0]),
                Atom::new("Cl", [0.5, 0.5, 0.5]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_cubic_point_group_order() {
        assert_eq!(lattice_point_group(&cscl()).len(), 48);
    }

    #[test]
    fn test_cscl_space_group() {
        let ops = find_space_group(&cscl()).unwrap();
        assert_eq!(ops.len(), 48);
        assert!(ops[0].is_identity());
    }

    #[test]
    fn test_supercell_includes_translations() {
        let (sc, _) = build_supercell(&cscl(), [[2, 0, 0], [0, 2, 0], [0, 0, 2]]).unwrap();
        let ops = find_space_group(&sc).unwrap();
        assert_eq!(ops.len(), 48 * 8);

        for op in &ops {
            // 置换保持元素且为双射
            let mut seen = vec![false; sc.len()];
            for (i, &j) in op.permutation.iter().enumerate() {
                assert_eq!(sc.atoms[i].element, sc.atoms[j].element);
                assert!(!seen[j]);
                seen[j] = true;
            }
            // 笛卡尔旋转为正交矩阵
            let rrt = vec3::mat_mul(&op.rotation, &vec3::transpose(&op.rotation));
            for a in 0..3 {
                for b in 0..3 {
                    let expect = if a == b { 1.0 } else { 0.0 };
                    assert!((rrt[a][b] - expect).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn test_distances_preserved() {
        let (sc, _) = build_supercell(&cscl(), [[2, 0, 0], [0, 2, 0], [0, 0, 2]]).unwrap();
        let ops = find_space_group(&sc).unwrap();
        for op in ops.iter().step_by(17) {
            for i in 0..sc.len() {
                for j in 0..sc.len() {
                    let d = sc.distance(i, j);
                    let d2 = sc.distance(op.permutation[i], op.permutation[j]);
                    assert!((d - d2).abs() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn test_reduce_basis() {
        let skewed = [[5.0, 0.0, 0.0], [10.0, 5.0, 0.0], [5.0, -5.0, 5.0]];
        let (t, reduced) = reduce_basis(&skewed);
        assert_eq!(vec3::det_i(&t).abs(), 1);
        for (k, row) in reduced.iter().enumerate() {
            assert!((vec3::norm(row) - 5.0).abs() < 1e-9);
            // T·L 与约化基一致
            let expected: Vec3 = (0..3)
                .map(|m| (0..3).map(|i| t[k][i] as f64 * skewed[i][m]).sum())
                .collect::<Vec<f64>>()
                .try_into()
                .unwrap();
            for m in 0..3 {
                assert!((expected[m] - row[m]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_non_reduced_cell_keeps_full_symmetry() {
        // 与 cscl() 相同的晶体，但 a₂ = 2a₁ + b
        let crystal = Crystal::new(
            "CsCl",
            Lattice::from_vectors([[5.0, 0.0, 0.0], [10.0, 5.0, 0.0], [0.0, 0.0, 5.0]]),
            vec![
                Atom::new("Cs", [0.0, 0.0, 0.0]),
                Atom::new("Cl", [0.5, 0.5, 0.5]),
            ],
        )
        .unwrap();
        let groups = lattice_point_group(&crystal);
        assert_eq!(groups.len(), 48);
        assert!(groups.iter().flatten().flatten().any(|x| x.abs() > 1));

        let ops = find_space_group(&crystal).unwrap();
        assert_eq!(ops.len(), 48);
        for op in &ops {
            for i in 0..crystal.len() {
                for j in 0..crystal.len() {
                    let d = crystal.distance(i, j);
                    let d2 = crystal.distance(op.permutation[i], op.permutation[j]);
                    assert!((d - d2).abs() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn test_low_symmetry_structure() {
        let crystal = Crystal::new(
            "skew",
            Lattice::from_vectors([[4.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 6.0]]),
            vec![
                Atom::new("A", [0.0, 0.0, 0.0]),
                Atom::new("B", [0.1, 0.2, 0.3]),
            ],
        )
        .unwrap();
        let ops = find_space_group(&crystal).unwrap();
        // 只剩恒等操作
        assert_eq!(ops.len(), 1);
    }
}
