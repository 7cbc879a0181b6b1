//! # 训练集模块
//!
//! 生成扰动超胞构型，供势函数标注后用于拟合。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 使用
//! - 子模块: generator

pub mod generator;

pub use generator::{from_configurations, generate, RattleSettings};
