//! # 工具函数模块
//!
//! 提供美化输出、进度条与 3 维向量运算。
//!
//! ## 依赖关系
//! - 被 `commands/`, `batch/`, `models/`, `cluster/` 使用
//! - 子模块: output, progress, vec3

pub mod output;
pub mod progress;
pub mod vec3;
