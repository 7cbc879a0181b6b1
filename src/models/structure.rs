//! # 晶体结构数据模型
//!
//! 定义周期性晶体结构（晶格 + 元素 + 分数坐标）以及超胞扩展。
//! 结构一旦构造即不可变，超胞扩展与位移都返回新的实例。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `training/`, `cluster/`, `potentials/` 使用
//! - 使用 `utils/vec3.rs`

use crate::error::{ForceFitError, Result};
use crate::utils::vec3::{self, Mat3, Vec3};

use serde::{Deserialize, Serialize};

/// 晶格参数表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// 晶格向量矩阵 (3x3)，行向量表示 a, b, c
    /// [[a1, a2, a3], [b1, b2, b3], [c1, c2, c3]]
    pub matrix: Mat3,
}

impl Lattice {
    /// 从晶格向量矩阵创建
    pub fn from_vectors(matrix: Mat3) -> Self {
        Lattice { matrix }
    }

    /// 立方晶格
    #[cfg(test)]
    pub fn cubic(a: f64) -> Self {
        Lattice::from_vectors([[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]])
    }

    /// 三个晶格矢量的长度
    pub fn lengths(&self) -> Vec3 {
        [
            vec3::norm(&self.matrix[0]),
            vec3::norm(&self.matrix[1]),
            vec3::norm(&self.matrix[2]),
        ]
    }

    /// 最短晶格矢量长度
    pub fn shortest_vector(&self) -> f64 {
        let l = self.lengths();
        l[0].min(l[1]).min(l[2])
    }

    /// 计算晶格体积（带符号的行列式）
    pub fn volume(&self) -> f64 {
        vec3::det(&self.matrix)
    }

    /// 度规张量 G = L · L^T
    pub fn metric(&self) -> Mat3 {
        vec3::mat_mul(&self.matrix, &vec3::transpose(&self.matrix))
    }

    /// 分数坐标转笛卡尔坐标
    pub fn to_cartesian(&self, frac: &Vec3) -> Vec3 {
        vec3::vec_mat(frac, &self.matrix)
    }

    /// 笛卡尔坐标转分数坐标
    pub fn to_fractional(&self, cart: &Vec3) -> Vec3 {
        match vec3::inverse(&self.matrix) {
            Some(inv) => vec3::vec_mat(cart, &inv),
            None => *cart,
        }
    }

    /// 两个分数坐标之间的最小像矢量（笛卡尔）
    pub fn min_image_vector(&self, frac_from: &Vec3, frac_to: &Vec3) -> Vec3 {
        let mut diff = vec3::sub(frac_to, frac_from);
        for x in diff.iter_mut() {
            *x -= x.round();
        }

        let mut best = self.to_cartesian(&diff);
        let mut best_norm = vec3::norm(&best);
        for a in -1..=1 {
            for b in -1..=1 {
                for c in -1..=1 {
                    if a == 0 && b == 0 && c == 0 {
                        continue;
                    }
                    let shifted = [diff[0] + a as f64, diff[1] + b as f64, diff[2] + c as f64];
                    let cart = self.to_cartesian(&shifted);
                    let n = vec3::norm(&cart);
                    if n < best_norm - 1e-12 {
                        best = cart;
                        best_norm = n;
                    }
                }
            }
        }
        best
    }
}

/// 原子信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// 元素符号
    pub element: String,

    /// 分数坐标 [x, y, z]
    pub position: Vec3,
}

impl Atom {
    pub fn new(element: impl Into<String>, position: Vec3) -> Self {
        Atom {
            element: element.into(),
            position,
        }
    }
}

/// 晶体结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crystal {
    /// 结构名称
    pub name: String,

    /// 晶格
    pub lattice: Lattice,

    /// 原子列表
    pub atoms: Vec<Atom>,

    /// 来源文件格式
    pub source_format: Option<String>,
}

impl Crystal {
    /// 创建结构并检查晶格非退化
    pub fn new(name: impl Into<String>, lattice: Lattice, atoms: Vec<Atom>) -> Result<Self> {
        let volume = lattice.volume();
        if volume.abs() < 1e-8 {
            return Err(ForceFitError::validation(
                "lattice",
                format!("degenerate lattice (volume = {:.3e})", volume),
            ));
        }

        Ok(Crystal {
            name: name.into(),
            lattice,
            atoms,
            source_format: None,
        })
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// 计算化学式
    pub fn formula(&self) -> String {
        use std::collections::BTreeMap;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

        for atom in &self.atoms {
            *counts.entry(atom.element.as_str()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .map(|(el, count)| {
                if count == 1 {
                    el.to_string()
                } else {
                    format!("{}{}", el, count)
                }
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// 所有原子的笛卡尔坐标
    pub fn cartesian_positions(&self) -> Vec<Vec3> {
        self.atoms
            .iter()
            .map(|a| self.lattice.to_cartesian(&a.position))
            .collect()
    }

    /// 原子 i 指向原子 j 的最小像矢量
    pub fn min_image_vector(&self, i: usize, j: usize) -> Vec3 {
        self.lattice
            .min_image_vector(&self.atoms[i].position, &self.atoms[j].position)
    }

    /// 原子 i 与 j 的最小像距离
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        vec3::norm(&self.min_image_vector(i, j))
    }

    /// 结构中最短的原子间距离（考虑周期性），单原子时为 +inf
    pub fn min_distance(&self) -> f64 {
        let mut best = f64::INFINITY;
        for i in 0..self.atoms.len() {
            for j in (i + 1)..self.atoms.len() {
                best = best.min(self.distance(i, j));
            }
        }
        best
    }

    /// 所有原子距离矩阵（最小像）
    pub fn distance_table(&self) -> Vec<Vec<f64>> {
        let n = self.atoms.len();
        let mut table = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = self.distance(i, j);
                table[i][j] = d;
                table[j][i] = d;
            }
        }
        table
    }

    /// 按笛卡尔位移生成新结构（坐标折回晶胞内）
    pub fn displaced(&self, displacements: &[Vec3]) -> Result<Crystal> {
        if displacements.len() != self.atoms.len() {
            return Err(ForceFitError::validation(
                "displacements",
                format!(
                    "expected {} vectors, got {}",
                    self.atoms.len(),
                    displacements.len()
                ),
            ));
        }

        let atoms = self
            .atoms
            .iter()
            .zip(displacements)
            .map(|(atom, u)| {
                let cart = vec3::add(&self.lattice.to_cartesian(&atom.position), u);
                let frac = self.lattice.to_fractional(&cart);
                Atom::new(
                    atom.element.clone(),
                    [
                        vec3::wrap_frac(frac[0]),
                        vec3::wrap_frac(frac[1]),
                        vec3::wrap_frac(frac[2]),
                    ],
                )
            })
            .collect();

        Ok(Crystal {
            name: self.name.clone(),
            lattice: self.lattice.clone(),
            atoms,
            source_format: self.source_format.clone(),
        })
    }

    /// 相对于参考结构（同一超胞、同一原子顺序）的笛卡尔位移
    pub fn displacements_from(&self, reference: &Crystal) -> Result<Vec<Vec3>> {
        if self.atoms.len() != reference.atoms.len() {
            return Err(ForceFitError::validation(
                "configuration",
                format!(
                    "atom count {} differs from reference {}",
                    self.atoms.len(),
                    reference.atoms.len()
                ),
            ));
        }

        self.atoms
            .iter()
            .zip(&reference.atoms)
            .enumerate()
            .map(|(i, (atom, ideal))| {
                if atom.element != ideal.element {
                    return Err(ForceFitError::validation(
                        "configuration",
                        format!(
                            "atom {} is {} but the reference has {}",
                            i, atom.element, ideal.element
                        ),
                    ));
                }
                Ok(reference
                    .lattice
                    .min_image_vector(&ideal.position, &atom.position))
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
// 超胞
// ─────────────────────────────────────────────────────────────

/// 超胞原子与原胞原子的对应关系
#[derive(Debug, Clone)]
pub struct SupercellMap {
    /// 超胞变换矩阵（行主序，L_sc = M · L_prim）
    pub matrix: [[i32; 3]; 3],
    /// 原胞结构
    pub primitive: Crystal,
    /// 每个超胞原子对应的原胞原子序号
    pub prim_index: Vec<usize>,
    /// 每个超胞原子所在原胞的整数平移（原胞晶格坐标）
    pub cell: Vec<[i32; 3]>,
}

/// 由 9 个整数（行主序）组成超胞矩阵
pub fn supercell_matrix_from_slice(values: &[i32]) -> Result<[[i32; 3]; 3]> {
    if values.len() != 9 {
        return Err(ForceFitError::validation(
            "supercell",
            format!("expected 9 integers, got {}", values.len()),
        ));
    }
    Ok([
        [values[0], values[1], values[2]],
        [values[3], values[4], values[5]],
        [values[6], values[7], values[8]],
    ])
}

/// 由原胞与整数矩阵构造超胞
///
/// 原子按原胞原子顺序排列，每个原胞原子下依次列出所有平移像。
pub fn build_supercell(primitive: &Crystal, matrix: [[i32; 3]; 3]) -> Result<(Crystal, SupercellMap)> {
    let det = vec3::det_i(&matrix);
    if det <= 0 {
        return Err(ForceFitError::validation(
            "supercell",
            format!(
                "transformation matrix must have a positive determinant (got {})",
                det
            ),
        ));
    }

    // n · M^{-1} = n · adj(M) / det 落在 [0, 1)^3 的整数点即为超胞内的原胞平移
    let adj = vec3::adjugate_i(&matrix);
    let mut lo = [0i64; 3];
    let mut hi = [0i64; 3];
    for corner in 0..8 {
        let mut v = [0i64; 3];
        for (row, m_row) in matrix.iter().enumerate() {
            if corner & (1 << row) != 0 {
                for k in 0..3 {
                    v[k] += m_row[k] as i64;
                }
            }
        }
        for k in 0..3 {
            lo[k] = lo[k].min(v[k]);
            hi[k] = hi[k].max(v[k]);
        }
    }

    let mut translations: Vec<[i32; 3]> = Vec::with_capacity(det as usize);
    for a in lo[0]..=hi[0] {
        for b in lo[1]..=hi[1] {
            for c in lo[2]..=hi[2] {
                let n = [a, b, c];
                let inside = (0..3).all(|k| {
                    let num: i64 = (0..3).map(|r| n[r] * adj[r][k]).sum();
                    num >= 0 && num < det
                });
                if inside {
                    translations.push([a as i32, b as i32, c as i32]);
                }
            }
        }
    }

    if translations.len() as i64 != det {
        return Err(ForceFitError::validation(
            "supercell",
            format!(
                "found {} lattice points inside the supercell, expected {}",
                translations.len(),
                det
            ),
        ));
    }

    let m_f: Mat3 = [
        [matrix[0][0] as f64, matrix[0][1] as f64, matrix[0][2] as f64],
        [matrix[1][0] as f64, matrix[1][1] as f64, matrix[1][2] as f64],
        [matrix[2][0] as f64, matrix[2][1] as f64, matrix[2][2] as f64],
    ];
    let m_inv = vec3::inverse(&m_f).ok_or_else(|| {
        ForceFitError::validation("supercell", "transformation matrix is singular")
    })?;
    let lattice = Lattice::from_vectors(vec3::mat_mul(&m_f, &primitive.lattice.matrix));

    let n_total = primitive.atoms.len() * translations.len();
    let mut atoms = Vec::with_capacity(n_total);
    let mut prim_index = Vec::with_capacity(n_total);
    let mut cell = Vec::with_capacity(n_total);

    for (p, atom) in primitive.atoms.iter().enumerate() {
        for t in &translations {
            let shifted = [
                atom.position[0] + t[0] as f64,
                atom.position[1] + t[1] as f64,
                atom.position[2] + t[2] as f64,
            ];
            let frac = vec3::vec_mat(&shifted, &m_inv);
            atoms.push(Atom::new(
                atom.element.clone(),
                [
                    vec3::wrap_frac(frac[0]),
                    vec3::wrap_frac(frac[1]),
                    vec3::wrap_frac(frac[2]),
                ],
            ));
            prim_index.push(p);
            cell.push(*t);
        }
    }

    let mut supercell = Crystal::new(format!("{}-supercell", primitive.name), lattice, atoms)?;
    supercell.source_format = primitive.source_format.clone();

    let map = SupercellMap {
        matrix,
        primitive: primitive.clone(),
        prim_index,
        cell,
    };

    Ok((supercell, map))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_degenerate_lattice_rejected() {
        let lattice = Lattice::from_vectors([[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let result = Crystal::new("bad", lattice, vec![Atom::new("Si", [0.0; 3])]);
        assert!(matches!(result, Err(ForceFitError::ValidationError { .. })));
    }

    #[test]
    fn test_min_image_distance() {
        let crystal = Crystal::new(
            "pair",
            Lattice::cubic(10.0),
            vec![
                Atom::new("Ar", [0.05, 0.0, 0.0]),
                Atom::new("Ar", [0.95, 0.0, 0.0]),
            ],
        )
        .unwrap();
        assert!((crystal.distance(0, 1) - 1.0).abs() < 1e-10);
        let v = crystal.min_image_vector(0, 1);
        assert!((v[0] + 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_supercell_atom_count_diagonal() {
        let (sc, map) = build_supercell(&cscl(), [[2, 0, 0], [0, 2, 0], [0, 0, 2]]).unwrap();
        assert_eq!(sc.len(), 16);
        assert_eq!(map.prim_index.len(), 16);
        assert!((sc.lattice.volume() - 1000.0).abs() < 1e-8);
        assert!((sc.min_distance() - 5.0 * 3f64.sqrt() / 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_supercell_atom_count_general_matrices() {
        let matrices = [
            [[1, 1, 0], [-1, 1, 0], [0, 0, 1]],
            [[2, 1, 0], [0, 1, 0], [0, 0, 3]],
            [[0, 1, 1], [1, 0, 1], [1, 1, 0]],
            [[-1, 1, 1], [1, -1, 1], [1, 1, -1]],
        ];
        for m in matrices {
            let d = vec3::det_i(&m);
            let (sc, _) = build_supercell(&cscl(), m).unwrap();
            assert_eq!(sc.len() as i64, d * 2, "matrix {:?}", m);
            // 所有原子互不重叠
            assert!(sc.min_distance() > 1.0);
        }
    }

    #[test]
    fn test_supercell_rejects_non_positive_determinant() {
        let singular = build_supercell(&cscl(), [[1, 0, 0], [1, 0, 0], [0, 0, 1]]);
        assert!(matches!(singular, Err(ForceFitError::ValidationError { .. })));

        let flipped = build_supercell(&cscl(), [[-1, 0, 0], [0, 1, 0], [0, 0, 1]]);
        assert!(matches!(flipped, Err(ForceFitError::ValidationError { .. })));
    }

    #[test]
    fn test_displacement_round_trip() {
        let (sc, _) = build_supercell(&cscl(), [[2, 0, 0], [0, 2, 0], [0, 0, 2]]).unwrap();
        let disp: Vec<Vec3> = (0..sc.len())
            .map(|i| [0.01 * i as f64, -0.02, 0.005])
            .collect();
        let moved = sc.displaced(&disp).unwrap();
        let back = moved.displacements_from(&sc).unwrap();
        for (a, b) in disp.iter().zip(&back) {
            for k in 0..3 {
                assert!((a[k] - b[k]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_crystal_formula() {
        assert_eq!(cscl().formula(), "ClCs");
    }
}
