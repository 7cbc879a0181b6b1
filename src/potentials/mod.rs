//! # 势函数模块
//!
//! 定义统一的势函数接口 [`PotentialEvaluator`]：给定结构，返回总能量与每个原子的受力。
//! 每种势函数一个实现，构造时即校验参数与模型文件（缺失即 `ConfigError`），
//! 流水线只通过该接口调用，不对具体类型做特殊处理。
//!
//! ## 支持的类型
//! - `lennard-jones`: Lennard-Jones 对势（JSON 参数文件）
//! - `morse`: Morse 对势（JSON 参数文件）
//! - `table`: 表格化对势（CSV: r, energy[, force]）
//! - `external`: 外部命令（机器学习势等），extxyz 经 stdin 传入
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs` 和 `commands/fit.rs` 使用
//! - 子模块: pair, tabulated, external

pub mod external;
pub mod pair;
pub mod tabulated;

pub use external::ExternalPotential;
pub use pair::{LennardJones, Morse, PairPotential};
pub use tabulated::TabulatedPair;

use crate::error::{ForceFitError, Result};
use crate::models::{Crystal, Evaluation};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 势函数接口
///
/// 对固定结构和固定配置必须给出确定的结果。失败（如原子间距小于支持的最小距离）
/// 返回 `EvaluationError`，构型序号由 `batch/runner.rs` 补上。
pub trait PotentialEvaluator: Send + Sync {
    /// 用于日志的名称
    fn name(&self) -> String;

    /// 计算能量 (eV) 与受力 (eV/Å)
    fn evaluate(&self, structure: &Crystal) -> Result<Evaluation>;

    /// 是否可被多个工作线程同时共享（持有内部可变状态的实现返回 false）
    fn is_shareable(&self) -> bool {
        true
    }

    /// 为单个工作线程创建独立实例
    fn fork(&self) -> Box<dyn PotentialEvaluator>;
}

/// 势函数类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(try_from = "String", into = "String")]
pub enum PotentialType {
    /// Lennard-Jones pair potential
    LennardJones,
    /// Morse pair potential
    Morse,
    /// Tabulated pair potential (CSV)
    Table,
    /// External command (machine-learned potentials)
    External,
}

impl fmt::Display for PotentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PotentialType::LennardJones => write!(f, "lennard-jones"),
            PotentialType::Morse => write!(f, "morse"),
            PotentialType::Table => write!(f, "table"),
            PotentialType::External => write!(f, "external"),
        }
    }
}

impl FromStr for PotentialType {
    type Err = ForceFitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "lennard-jones" | "lj" => Ok(PotentialType::LennardJones),
            "morse" => Ok(PotentialType::Morse),
            "table" | "tabulated" => Ok(PotentialType::Table),
            "external" => Ok(PotentialType::External),
            other => Err(ForceFitError::ConfigError(format!(
                "unknown potential_type '{}' (expected lennard-jones, morse, table or external)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for PotentialType {
    type Error = ForceFitError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PotentialType> for String {
    fn from(t: PotentialType) -> String {
        t.to_string()
    }
}

/// 构造势函数所需的全部配置
#[derive(Debug, Clone)]
pub struct PotentialSpec {
    pub kind: PotentialType,
    pub file: Option<PathBuf>,
    pub command: Option<String>,
}

/// 根据配置构造势函数（构造时校验，失败即 `ConfigError`）
pub fn build_evaluator(spec: &PotentialSpec) -> Result<Box<dyn PotentialEvaluator>> {
    let file = spec.file.as_ref().ok_or_else(|| {
        ForceFitError::ConfigError(format!(
            "potential_type '{}' requires potential_file",
            spec.kind
        ))
    })?;
    if !file.is_file() {
        return Err(ForceFitError::ConfigError(format!(
            "potential_file '{}' does not exist",
            file.display()
        )));
    }

    match spec.kind {
        PotentialType::LennardJones => {
            Ok(Box::new(PairPotential::<LennardJones>::from_file(file)?))
        }
        PotentialType::Morse => Ok(Box::new(PairPotential::<Morse>::from_file(file)?)),
        PotentialType::Table => Ok(Box::new(PairPotential::<TabulatedPair>::from_table(file)?)),
        PotentialType::External => {
            let command = spec.command.as_deref().ok_or_else(|| {
                ForceFitError::ConfigError(
                    "potential_type 'external' requires potential_command".to_string(),
                )
            })?;
            Ok(Box::new(ExternalPotential::new(command, file.clone())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_potential_type_parsing() {
        assert_eq!(
            "lennard_jones".parse::<PotentialType>().unwrap(),
            PotentialType::LennardJones
        );
        assert_eq!("Morse".parse::<PotentialType>().unwrap(), PotentialType::Morse);
        assert!(matches!(
            "emt".parse::<PotentialType>(),
            Err(ForceFitError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_model_file_fails_fast() {
        let spec = PotentialSpec {
            kind: PotentialType::Morse,
            file: Some(PathBuf::from("/nonexistent/morse.json")),
            command: None,
        };
        assert!(matches!(
            build_evaluator(&spec),
            Err(ForceFitError::ConfigError(_))
        ));

        let spec = PotentialSpec {
            kind: PotentialType::LennardJones,
            file: None,
            command: None,
        };
        assert!(matches!(
            build_evaluator(&spec),
            Err(ForceFitError::ConfigError(_))
        ));
    }
}
