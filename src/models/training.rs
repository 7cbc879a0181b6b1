//! # 训练构型数据模型
//!
//! 训练构型 = 超胞 + 相对理想超胞的位移场 + （标注后）能量与受力。
//! 由 `training/generator.rs` 创建，经势函数标注一次后只读。
//!
//! ## 依赖关系
//! - 被 `training/`, `batch/`, `fitting/` 使用
//! - 使用 `models/structure.rs`

use crate::models::Crystal;
use crate::utils::vec3::Vec3;

use serde::{Deserialize, Serialize};

/// 势函数计算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// 总能量 (eV)
    pub energy: f64,
    /// 每个原子的受力 (eV/Å)
    pub forces: Vec<Vec3>,
}

impl Evaluation {
    /// 最大受力分量的绝对值
    pub fn max_force(&self) -> f64 {
        self.forces
            .iter()
            .flat_map(|f| f.iter())
            .fold(0.0_f64, |acc, x| acc.max(x.abs()))
    }
}

/// 单个训练构型
#[derive(Debug, Clone)]
pub struct TrainingStructure {
    /// 生成顺序中的序号
    pub index: usize,
    /// 扰动后的超胞
    pub structure: Crystal,
    /// 相对理想超胞的笛卡尔位移 (Å)
    pub displacements: Vec<Vec3>,
    /// 标注结果（未标注时为 None）
    pub evaluation: Option<Evaluation>,
}

impl TrainingStructure {
    pub fn new(index: usize, structure: Crystal, displacements: Vec<Vec3>) -> Self {
        TrainingStructure {
            index,
            structure,
            displacements,
            evaluation: None,
        }
    }

    /// 附加标注结果，返回只读的已标注构型
    pub fn labeled(mut self, evaluation: Evaluation) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    /// 位移幅度的均方根 (Å)
    pub fn rms_displacement(&self) -> f64 {
        if self.displacements.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .displacements
            .iter()
            .map(|u| u[0] * u[0] + u[1] * u[1] + u[2] * u[2])
            .sum();
        (sum / self.displacements.len() as f64).sqrt()
    }
}
