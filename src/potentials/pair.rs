//! # 经典对势
//!
//! 截断平移对势 E = ½ Σ_{i≠j} [V(r_ij) - V(r_c)]，对周期像求和。
//! 参数按元素对给出，`"*"` 表示缺省参数。
//!
//! ## 参数文件 (JSON)
//! ```json
//! {
//!   "cutoff": 4.8,
//!   "min_distance": 1.0,
//!   "pairs": { "Cl-Cs": { "d0": 0.5, "alpha": 1.2, "r0": 4.33 } }
//! }
//! ```
//!
//! ## 依赖关系
//! - 被 `potentials/mod.rs` 使用
//! - `potentials/tabulated.rs` 实现 [`PairFunction`]

use super::PotentialEvaluator;
use crate::error::{ForceFitError, Result};
use crate::models::{Crystal, Evaluation};
use crate::utils::vec3;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// 径向对势函数
pub trait PairFunction: Clone + Send + Sync + 'static {
    /// 势能 V(r)
    fn energy(&self, r: f64) -> f64;
    /// 导数 dV/dr
    fn derivative(&self, r: f64) -> f64;
    /// 参数合法性检查
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Lennard-Jones: V = 4ε[(σ/r)^12 - (σ/r)^6]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LennardJones {
    pub epsilon: f64,
    pub sigma: f64,
}

impl PairFunction for LennardJones {
    fn energy(&self, r: f64) -> f64 {
        let s6 = (self.sigma / r).powi(6);
        4.0 * self.epsilon * (s6 * s6 - s6)
    }

    fn derivative(&self, r: f64) -> f64 {
        let s6 = (self.sigma / r).powi(6);
        4.0 * self.epsilon * (-12.0 * s6 * s6 + 6.0 * s6) / r
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.epsilon <= 0.0 || self.sigma <= 0.0 {
            return Err("epsilon and sigma must be positive".to_string());
        }
        Ok(())
    }
}

/// Morse: V = D[(1 - e^{-a(r-r0)})^2 - 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Morse {
    pub d0: f64,
    pub alpha: f64,
    pub r0: f64,
}

impl PairFunction for Morse {
    fn energy(&self, r: f64) -> f64 {
        let x = 1.0 - (-self.alpha * (r - self.r0)).exp();
        self.d0 * (x * x - 1.0)
    }

    fn derivative(&self, r: f64) -> f64 {
        let e = (-self.alpha * (r - self.r0)).exp();
        2.0 * self.d0 * self.alpha * e * (1.0 - e)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.d0 <= 0.0 || self.alpha <= 0.0 || self.r0 <= 0.0 {
            return Err("d0, alpha and r0 must be positive".to_string());
        }
        Ok(())
    }
}

/// 对势参数文件
#[derive(Debug, Deserialize)]
struct PairParameterFile<F> {
    cutoff: f64,
    #[serde(default)]
    min_distance: Option<f64>,
    pairs: HashMap<String, F>,
}

/// 按元素对组织的截断平移对势
#[derive(Debug, Clone)]
pub struct PairPotential<F: PairFunction> {
    label: String,
    pairs: BTreeMap<(String, String), F>,
    default: Option<F>,
    cutoff: f64,
    min_distance: f64,
}

/// 元素对的规范键（字典序）
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl<F: PairFunction> PairPotential<F> {
    /// 所有元素对使用同一组参数
    pub fn uniform(label: impl Into<String>, function: F, cutoff: f64) -> Result<Self> {
        let potential = PairPotential {
            label: label.into(),
            pairs: BTreeMap::new(),
            default: Some(function),
            cutoff,
            min_distance: 0.0,
        };
        potential.validated()
    }

    /// 设置允许的最小原子间距
    pub fn with_min_distance(mut self, min_distance: f64) -> Self {
        self.min_distance = min_distance;
        self
    }

    /// 为特定元素对设置参数
    #[cfg(test)]
    pub fn with_pair(mut self, a: &str, b: &str, function: F) -> Self {
        self.pairs.insert(pair_key(a, b), function);
        self
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn from_parts(label: String, file: PairParameterFile<F>) -> Result<Self> {
        let mut pairs = BTreeMap::new();
        let mut default = None;
        for (key, function) in file.pairs {
            if key == "*" {
                default = Some(function);
                continue;
            }
            let parts: Vec<&str> = key.split('-').map(|s| s.trim()).collect();
            if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
                return Err(ForceFitError::ConfigError(format!(
                    "invalid pair key '{}' (expected 'A-B' or '*')",
                    key
                )));
            }
            pairs.insert(pair_key(parts[0], parts[1]), function);
        }

        PairPotential {
            label,
            pairs,
            default,
            cutoff: file.cutoff,
            min_distance: file.min_distance.unwrap_or(0.0),
        }
        .validated()
    }

    fn validated(self) -> Result<Self> {
        if !(self.cutoff > 0.0) {
            return Err(ForceFitError::ConfigError(format!(
                "{}: cutoff must be positive",
                self.label
            )));
        }
        if self.pairs.is_empty() && self.default.is_none() {
            return Err(ForceFitError::ConfigError(format!(
                "{}: no pair parameters given",
                self.label
            )));
        }
        for function in self.pairs.values().chain(self.default.iter()) {
            function
                .validate()
                .map_err(|e| ForceFitError::ConfigError(format!("{}: {}", self.label, e)))?;
        }
        Ok(self)
    }

    /// 查找元素对的参数
    fn function_for(&self, a: &str, b: &str) -> Option<&F> {
        self.pairs.get(&pair_key(a, b)).or(self.default.as_ref())
    }
}

impl<F: PairFunction + DeserializeOwned> PairPotential<F> {
    /// 从 JSON 参数文件构造
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ForceFitError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: PairParameterFile<F> = serde_json::from_str(&content).map_err(|e| {
            ForceFitError::ConfigError(format!(
                "cannot read pair parameters from '{}': {}",
                path.display(),
                e
            ))
        })?;
        let label = format!(
            "{} ({})",
            std::any::type_name::<F>().rsplit("::").next().unwrap_or("pair"),
            path.display()
        );
        Self::from_parts(label, file)
    }
}

impl<F: PairFunction> PotentialEvaluator for PairPotential<F> {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn evaluate(&self, structure: &Crystal) -> Result<Evaluation> {
        let n = structure.atoms.len();
        let carts = structure.cartesian_positions();
        let m = structure.lattice.matrix;

        // 预先解析元素对参数
        let mut table: Vec<Vec<Option<&F>>> = vec![vec![None; n]; n];
        for i in 0..n {
            for j in i..n {
                let f = self.function_for(&structure.atoms[i].element, &structure.atoms[j].element);
                if f.is_none() {
                    return Err(ForceFitError::evaluation(format!(
                        "no pair parameters for {}-{}",
                        structure.atoms[i].element, structure.atoms[j].element
                    )));
                }
                table[i][j] = f;
                table[j][i] = f;
            }
        }

        // 每个方向需要的周期像数目：截断半径 / 晶面间距
        let volume = structure.lattice.volume().abs();
        let mut reach = [0i32; 3];
        for k in 0..3 {
            let area = vec3::norm(&vec3::cross(&m[(k + 1) % 3], &m[(k + 2) % 3]));
            let spacing = volume / area;
            reach[k] = (self.cutoff / spacing).ceil() as i32;
        }

        let mut energy = 0.0;
        let mut forces = vec![[0.0; 3]; n];

        for i in 0..n {
            for j in 0..n {
                let function = match table[i][j] {
                    Some(f) => f,
                    None => continue,
                };
                let shift = function.energy(self.cutoff);
                for a in -reach[0]..=reach[0] {
                    for b in -reach[1]..=reach[1] {
                        for c in -reach[2]..=reach[2] {
                            if i == j && a == 0 && b == 0 && c == 0 {
                                continue;
                            }
                            let image = vec3::add(
                                &carts[j],
                                &vec3::vec_mat(&[a as f64, b as f64, c as f64], &m),
                            );
                            let d = vec3::sub(&image, &carts[i]);
                            let r = vec3::norm(&d);
                            if r >= self.cutoff {
                                continue;
                            }
                            if r < self.min_distance {
                                return Err(ForceFitError::evaluation(format!(
                                    "atoms {} and {} are {:.3} Å apart, below the supported minimum {:.3} Å",
                                    i, j, r, self.min_distance
                                )));
                            }
                            energy += 0.5 * (function.energy(r) - shift);
                            let g = function.derivative(r) / r;
                            for k in 0..3 {
                                forces[i][k] += g * d[k];
                            }
                        }
                    }
                }
            }
        }

        if !energy.is_finite() {
            return Err(ForceFitError::evaluation("non-finite energy"));
        }

        Ok(Evaluation { energy, forces })
    }

    fn fork(&self) -> Box<dyn PotentialEvaluator> {
        Box::new(self.clone())
    }
}
