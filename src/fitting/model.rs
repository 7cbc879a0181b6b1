//! # 拟合模型
//!
//! 系数向量 + 拟合方法与诊断信息，可序列化为 `model.json`。
//!
//! ## 依赖关系
//! - 被 `fitting/mod.rs`, `fc/extract.rs`, `commands/fit.rs` 使用
//! - 使用 `serde` / `serde_json`

use super::solvers::FitMethod;
use crate::cluster::ClusterSpace;

use serde::{Deserialize, Serialize};

/// 拟合诊断
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// 受力分量均方根误差 (eV/Å)
    pub rmse_forces: f64,
    /// 能量均方根误差 (eV)，未拟合能量时为 None
    pub rmse_energy: Option<f64>,
    pub r_squared: f64,
    /// 列归一化后设计矩阵的条件数
    pub condition_number: f64,
    pub n_rows: usize,
    pub n_samples: usize,
    /// 非零自由参数数
    pub n_active: usize,
}

/// 轨道摘要（写入 model.json）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitRecord {
    pub order: usize,
    pub representative: Vec<usize>,
    pub radius: f64,
    pub n_members: usize,
    pub param_offset: usize,
    pub n_parameters: usize,
}

/// 拟合得到的模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub method: FitMethod,
    pub alpha: f64,
    pub n_atoms: usize,
    pub cutoffs: Vec<f64>,
    /// 全参数向量（长度等于团簇空间参数数）
    pub parameters: Vec<f64>,
    /// 约束后的自由参数
    pub free_parameters: Vec<f64>,
    pub diagnostics: FitDiagnostics,
    pub orbits: Vec<OrbitRecord>,
}

impl FittedModel {
    pub(crate) fn orbit_records(space: &ClusterSpace) -> Vec<OrbitRecord> {
        space
            .orbits
            .iter()
            .map(|o| OrbitRecord {
                order: o.order,
                representative: o.representative.clone(),
                radius: o.radius,
                n_members: o.members.len(),
                param_offset: o.param_offset,
                n_parameters: o.n_parameters(),
            })
            .collect()
    }

    /// 模型是否属于给定团簇空间
    pub fn matches(&self, space: &ClusterSpace) -> bool {
        self.parameters.len() == space.n_parameters() && self.n_atoms == space.n_atoms
    }

    /// 某一阶的参数切片
    pub fn parameters_of_order(&self, order: usize) -> Vec<f64> {
        self.orbits
            .iter()
            .filter(|o| o.order == order)
            .flat_map(|o| {
                self.parameters[o.param_offset..o.param_offset + o.n_parameters]
                    .iter()
                    .copied()
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
