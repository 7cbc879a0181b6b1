//! # 团簇空间模块
//!
//! 力常数展开的对称化参数化。
//!
//! ## 依赖关系
//! - 被 `fitting/`, `fc/`, `commands/fit.rs` 使用
//! - 子模块: symmetry, orbit, space, tensor

pub mod orbit;
pub mod space;
pub mod symmetry;
pub mod tensor;

pub use orbit::{Orbit, OrbitMember};
pub use space::{validate_cutoffs, ClusterSpace, ClusterSpaceOptions, OrderSummary};
pub use symmetry::{find_space_group, SymmetryOperation};
