//! # 批量标注模块
//!
//! 提供训练构型的并行标注能力。
//!
//! ## 功能
//! - 有界线程池并行计算
//! - 保持生成顺序
//! - 失败策略与统计
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod runner;

pub use runner::{require_samples, BatchRunner, EvalOutcome, EvaluationReport, OnEvalError};
