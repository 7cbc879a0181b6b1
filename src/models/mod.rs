//! # 数据模型模块
//!
//! 定义晶体结构、超胞映射与训练构型数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`training/`、`cluster/` 和 `commands/` 使用
//! - 子模块: structure, training

pub mod structure;
pub mod training;

pub use structure::{build_supercell, Atom, Crystal, Lattice, SupercellMap};
pub use training::{Evaluation, TrainingStructure};
