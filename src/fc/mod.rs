//! # 力常数模块
//!
//! 从拟合模型提取各阶力常数、检查与对称化求和规则，并写出
//! phonopy / NumPy / ShengBTE 格式文件。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs`, `commands/check.rs` 使用
//! - 子模块: tensor, extract, symmetrize, export

pub mod export;
pub mod extract;
pub mod symmetrize;
pub mod tensor;

pub use extract::{check_sum_rules, extract, SumRuleCheck};
pub use symmetrize::{symmetrize, SymmetrizeReport};
pub use tensor::ForceConstantsTensor;
