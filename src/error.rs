//! # 统一错误处理模块
//!
//! 定义 forcefit 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分类
//! - `FormatError`: 结构文件 / 配置文件格式错误
//! - `ValidationError`: 参数语义错误（奇异超胞矩阵、截断半径过大等）
//! - `GenerationError`: 无法生成满足条件的扰动构型
//! - `EvaluationError`: 势函数对单个构型计算失败（可恢复）
//! - `FittingError`: 设计矩阵秩亏或病态（致命）
//! - `IOError`: 输出目标不可写
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use std::fmt;
use thiserror::Error;

/// 流水线阶段，用于在错误信息中标明失败位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    LoadStructure,
    Supercell,
    ClusterSpace,
    Potential,
    Generation,
    Evaluation,
    Fitting,
    Extraction,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "configuration",
            Stage::LoadStructure => "structure loading",
            Stage::Supercell => "supercell construction",
            Stage::ClusterSpace => "cluster space",
            Stage::Potential => "potential setup",
            Stage::Generation => "training set generation",
            Stage::Evaluation => "force evaluation",
            Stage::Fitting => "fitting",
            Stage::Extraction => "force constant extraction",
            Stage::Output => "output",
        };
        write!(f, "{}", name)
    }
}

/// forcefit 统一错误类型
#[derive(Error, Debug)]
pub enum ForceFitError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 输入格式错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    FormatError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    // ─────────────────────────────────────────────────────────────
    // 语义错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid {parameter}: {reason}")]
    ValidationError { parameter: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 训练集错误
    // ─────────────────────────────────────────────────────────────
    #[error("Could not generate training structure {sample}: {reason}")]
    GenerationError { sample: usize, reason: String },

    #[error("Evaluation of structure {sample} failed: {reason}")]
    EvaluationError {
        sample: usize,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // ─────────────────────────────────────────────────────────────
    // 拟合错误
    // ─────────────────────────────────────────────────────────────
    #[error(
        "Fit is ill-conditioned: {reason}\n\
         condition number = {condition_number:.3e}, parameters = {n_parameters}, \
         training structures = {n_samples}, design rows = {n_rows}\n\
         Add more training structures or reduce the cutoffs."
    )]
    FittingError {
        reason: String,
        condition_number: f64,
        n_parameters: usize,
        n_samples: usize,
        n_rows: usize,
    },

    // ─────────────────────────────────────────────────────────────
    // 阶段包装
    // ─────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ForceFitError>,
    },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl ForceFitError {
    /// 构造 ValidationError 的快捷方式
    pub fn validation(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        ForceFitError::ValidationError {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// 构造 FormatError 的快捷方式
    pub fn format(format: &str, path: impl Into<String>, reason: impl Into<String>) -> Self {
        ForceFitError::FormatError {
            format: format.to_string(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 势函数计算失败；样本序号由批量执行器通过 [`for_sample`](Self::for_sample) 补上
    pub fn evaluation(reason: impl Into<String>) -> Self {
        ForceFitError::EvaluationError {
            sample: 0,
            reason: reason.into(),
            source: None,
        }
    }

    /// 为计算错误标注构型序号（其他错误原样返回）
    pub fn for_sample(self, sample: usize) -> Self {
        match self {
            ForceFitError::EvaluationError { reason, source, .. } => {
                ForceFitError::EvaluationError {
                    sample,
                    reason,
                    source,
                }
            }
            other => other,
        }
    }

    /// 标记错误发生的阶段（已标记的错误保持不变）
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            ForceFitError::Stage { .. } => self,
            other => ForceFitError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// 去掉阶段包装后的内部错误
    pub fn root(&self) -> &ForceFitError {
        match self {
            ForceFitError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ForceFitError>;
