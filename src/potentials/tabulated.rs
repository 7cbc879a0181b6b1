//! # 表格化对势
//!
//! 从 CSV 读取 V(r)（可选第三列受力 -dV/dr），三次 Hermite 插值，
//! 缺少受力列时用有限差分估计导数。所有元素对共用同一张表。
//!
//! ## 文件格式
//! ```text
//! r,energy,force
//! 2.0,1.25,3.1
//! ...
//! ```
//!
//! ## 依赖关系
//! - 被 `potentials/mod.rs` 使用
//! - 使用 `csv` 读取表格

use super::pair::{PairFunction, PairPotential};
use crate::error::{ForceFitError, Result};

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TableRow {
    r: f64,
    energy: f64,
    #[serde(default)]
    force: Option<f64>,
}

/// 表格化径向函数
#[derive(Debug, Clone)]
pub struct TabulatedPair {
    r: Vec<f64>,
    energy: Vec<f64>,
    /// dV/dr
    slope: Vec<f64>,
}

impl TabulatedPair {
    /// 由采样点构造；`slope` 为 None 时按有限差分估计
    pub fn new(r: Vec<f64>, energy: Vec<f64>, slope: Option<Vec<f64>>) -> Result<Self> {
        if r.len() < 2 || r.len() != energy.len() {
            return Err(ForceFitError::ConfigError(
                "tabulated potential needs at least two (r, energy) rows".to_string(),
            ));
        }
        if r.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ForceFitError::ConfigError(
                "tabulated potential: r must be strictly increasing".to_string(),
            ));
        }

        let slope = match slope {
            Some(s) if s.len() == r.len() => s,
            Some(_) => {
                return Err(ForceFitError::ConfigError(
                    "tabulated potential: force column has the wrong length".to_string(),
                ))
            }
            None => {
                let n = r.len();
                (0..n)
                    .map(|i| {
                        let (lo, hi) = match i {
                            0 => (0, 1),
                            _ if i == n - 1 => (n - 2, n - 1),
                            _ => (i - 1, i + 1),
                        };
                        (energy[hi] - energy[lo]) / (r[hi] - r[lo])
                    })
                    .collect()
            }
        };

        Ok(TabulatedPair { r, energy, slope })
    }

    pub fn r_min(&self) -> f64 {
        self.r[0]
    }

    pub fn r_max(&self) -> f64 {
        self.r[self.r.len() - 1]
    }

    /// 返回 r 所在区间的序号与归一化位置 t ∈ [0, 1]
    fn locate(&self, r: f64) -> (usize, f64) {
        let n = self.r.len();
        let idx = match self.r.partition_point(|&x| x <= r) {
            0 => 0,
            p if p >= n => n - 2,
            p => p - 1,
        };
        let h = self.r[idx + 1] - self.r[idx];
        let t = ((r - self.r[idx]) / h).clamp(0.0, 1.0);
        (idx, t)
    }
}

impl PairFunction for TabulatedPair {
    fn energy(&self, r: f64) -> f64 {
        let (i, t) = self.locate(r);
        let h = self.r[i + 1] - self.r[i];
        let (t2, t3) = (t * t, t * t * t);
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * self.energy[i]
            + h10 * h * self.slope[i]
            + h01 * self.energy[i + 1]
            + h11 * h * self.slope[i + 1]
    }

    fn derivative(&self, r: f64) -> f64 {
        let (i, t) = self.locate(r);
        let h = self.r[i + 1] - self.r[i];
        let t2 = t * t;
        let d00 = 6.0 * t2 - 6.0 * t;
        let d10 = 3.0 * t2 - 4.0 * t + 1.0;
        let d01 = -6.0 * t2 + 6.0 * t;
        let d11 = 3.0 * t2 - 2.0 * t;
        (d00 * self.energy[i] + d01 * self.energy[i + 1]) / h
            + d10 * self.slope[i]
            + d11 * self.slope[i + 1]
    }
}

impl PairPotential<TabulatedPair> {
    /// 从 CSV 表格构造；截断半径取表格最后一个 r，最小距离取第一个 r
    pub fn from_table(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)?;

        let mut r = Vec::new();
        let mut energy = Vec::new();
        let mut forces = Vec::new();
        for row in reader.deserialize() {
            let row: TableRow = row.map_err(|e| {
                ForceFitError::ConfigError(format!(
                    "cannot read potential table '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            r.push(row.r);
            energy.push(row.energy);
            forces.push(row.force);
        }

        let slope = if !forces.is_empty() && forces.iter().all(|f| f.is_some()) {
            Some(forces.into_iter().map(|f| -f.unwrap_or(0.0)).collect())
        } else {
            None
        };

        let table = TabulatedPair::new(r, energy, slope)?;
        let cutoff = table.r_max();
        let min_distance = table.r_min();
        Ok(
            PairPotential::uniform(format!("table ({})", path.display()), table, cutoff)?
                .with_min_distance(min_distance),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Crystal, Lattice};
    use crate::potentials::{Morse, PotentialEvaluator};
    use std::fs;

    /// 大盒子中沿 x 相距 r 的二聚体
    fn dimer(r: f64) -> Crystal {
        Crystal::new(
            "dimer",
            Lattice::cubic(20.0),
            vec![
                Atom::new("Ar", [0.0, 0.0, 0.0]),
                Atom::new("Ar", [r / 20.0, 0.0, 0.0]),
            ],
        )
        .unwrap()
    }

    /// 受力与插值能量的中心差分一致
    fn assert_forces_are_gradient(pot: &PairPotential<TabulatedPair>, r: f64) {
        let h = 1e-5;
        let eval = pot.evaluate(&dimer(r)).unwrap();
        let e_plus = pot.evaluate(&dimer(r + h)).unwrap().energy;
        let e_minus = pot.evaluate(&dimer(r - h)).unwrap().energy;
        let fd = -(e_plus - e_minus) / (2.0 * h);
        assert!((eval.forces[1][0] - fd).abs() < 1e-6);
        assert!((eval.forces[0][0] + eval.forces[1][0]).abs() < 1e-12);
    }

    fn sampled_morse(with_force: bool) -> (Morse, String) {
        let m = Morse {
            d0: 0.5,
            alpha: 1.3,
            r0: 4.33,
        };
        let mut text = if with_force {
            "r,energy,force\n".to_string()
        } else {
            "r,energy\n".to_string()
        };
        let mut r = 3.0;
        while r <= 6.0 + 1e-9 {
            if with_force {
                text.push_str(&format!("{},{},{}\n", r, m.energy(r), -m.derivative(r)));
            } else {
                text.push_str(&format!("{},{}\n", r, m.energy(r)));
            }
            r += 0.01;
        }
        (m, text)
    }

    #[test]
    fn test_interpolation_reproduces_samples() {
        let table = TabulatedPair::new(vec![1.0, 2.0, 3.0], vec![3.0, 1.0, 0.0], None).unwrap();
        assert!((table.energy(2.0) - 1.0).abs() < 1e-12);
        assert!((table.energy(1.0) - 3.0).abs() < 1e-12);
        assert!((table.energy(3.0) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_table_from_csv_with_forces() {
        let (m, text) = sampled_morse(true);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.csv");
        fs::write(&path, text).unwrap();

        let pot = PairPotential::<TabulatedPair>::from_table(&path).unwrap();
        assert!((pot.cutoff() - 6.0).abs() < 1e-6);
        for r in [3.6, 4.2, 4.33, 5.05] {
            assert_forces_are_gradient(&pot, r);
            let force = pot.evaluate(&dimer(r)).unwrap().forces[1][0];
            assert!((force + m.derivative(r)).abs() < 1e-4);
        }

        let table = TabulatedPair::new(
            vec![4.0, 4.5],
            vec![m.energy(4.0), m.energy(4.5)],
            Some(vec![m.derivative(4.0), m.derivative(4.5)]),
        )
        .unwrap();
        assert!((table.derivative(4.0) - m.derivative(4.0)).abs() < 1e-12);
    }

    #[test]
    fn test_dense_table_tracks_analytic_derivative() {
        let (m, text) = sampled_morse(false);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.csv");
        fs::write(&path, text).unwrap();
        let pot = PairPotential::<TabulatedPair>::from_table(&path).unwrap();
        for r in [3.55, 4.1, 4.8] {
            assert_forces_are_gradient(&pot, r);
        }

        let mut r = Vec::new();
        let mut e = Vec::new();
        for k in 0..=300 {
            let x = 3.0 + 0.01 * k as f64;
            r.push(x);
            e.push(m.energy(x));
        }
        let table = TabulatedPair::new(r, e, None).unwrap();
        for x in [3.5, 4.2, 4.33, 5.1] {
            assert!((table.energy(x) - m.energy(x)).abs() < 1e-5);
            assert!((table.derivative(x) - m.derivative(x)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_unsorted_table_rejected() {
        let result = TabulatedPair::new(vec![2.0, 1.0], vec![0.0, 1.0], None);
        assert!(matches!(result, Err(ForceFitError::ConfigError(_))));
    }
}
