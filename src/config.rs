//! # 拟合流程配置
//!
//! `fit` 命令的全部选项。优先级：命令行显式给出 > JSON 配置文件 > 内置默认值。
//! 配置文件中的未知键、未知 `potential_type` / `fit_method` 均为 `ConfigError`。
//!
//! ## 依赖关系
//! - 被 `cli/fit.rs`, `commands/fit.rs` 使用
//! - 使用 `serde` / `serde_json`

use crate::batch::OnEvalError;
use crate::error::{ForceFitError, Result};
use crate::fc::export::write_atomic;
use crate::fitting::FitMethod;
use crate::potentials::{PotentialSpec, PotentialType};

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 拟合流程配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitConfig {
    /// 势函数参数 / 模型文件
    pub potential_file: Option<PathBuf>,
    pub potential_type: PotentialType,
    /// `external` 势函数的命令行
    pub potential_command: Option<String>,

    /// 超胞矩阵（9 个整数，行主序）
    pub supercell: Vec<i32>,
    /// 直接给出的超胞结构（跳过超胞扩展）
    pub supercell_file: Option<PathBuf>,
    /// 预先扰动好的构型（extxyz 轨迹，跳过随机生成）
    pub perturb_file: Option<PathBuf>,

    pub n_structures: usize,
    /// 位移标准差 (Å)
    pub rattle_std: f64,
    /// 最小原子间距 (Å)
    pub min_distance: f64,
    pub max_attempts: usize,
    pub seed: u64,

    /// 各阶截断半径 (Å)，`cutoffs[k]` 对应 k + 2 阶
    pub cutoffs: Vec<f64>,
    pub fit_method: FitMethod,
    /// 正则化强度，None 时取方法的默认值
    pub alpha: Option<f64>,
    pub fit_energy: bool,
    pub max_condition_number: f64,

    pub acoustic_sum_rules: bool,
    pub sum_rule_tolerance: f64,
    pub symmetrize: bool,

    pub on_eval_error: OnEvalError,
    pub min_samples: usize,
    /// 并行数，0 为 CPU 核数
    pub jobs: usize,

    pub save_higher_order: bool,
    pub output_dir: PathBuf,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            potential_file: None,
            potential_type: PotentialType::Morse,
            potential_command: None,
            supercell: vec![3, 0, 0, 0, 3, 0, 0, 0, 3],
            supercell_file: None,
            perturb_file: None,
            n_structures: 50,
            rattle_std: 0.01,
            min_distance: 1.5,
            max_attempts: 100,
            seed: 42,
            cutoffs: vec![5.0, 4.0, 3.5],
            fit_method: FitMethod::Ridge,
            alpha: None,
            fit_energy: false,
            max_condition_number: 1e10,
            acoustic_sum_rules: true,
            sum_rule_tolerance: 1e-4,
            symmetrize: false,
            on_eval_error: OnEvalError::Skip,
            min_samples: 1,
            jobs: 0,
            save_higher_order: true,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl FitConfig {
    /// 读取 JSON 配置文件（缺省键取默认值）
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ForceFitError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&text)
            .map_err(|e| ForceFitError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// 写出包含全部选项及默认值的模板
    pub fn write_template(path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&FitConfig::default())?;
        write_atomic(path, |w| writeln!(w, "{}", text))
    }

    /// 实际使用的正则化强度
    pub fn effective_alpha(&self) -> f64 {
        self.alpha
            .unwrap_or_else(|| self.fit_method.default_alpha())
    }

    /// 最高阶数
    pub fn max_order(&self) -> usize {
        self.cutoffs.len() + 1
    }

    pub fn potential_spec(&self) -> PotentialSpec {
        PotentialSpec {
            kind: self.potential_type,
            file: self.potential_file.clone(),
            command: self.potential_command.clone(),
        }
    }

    /// 语义校验（不涉及结构，截断半径上限在团簇空间阶段检查）
    pub fn validate(&self) -> Result<()> {
        if self.supercell_file.is_none() && self.supercell.len() != 9 {
            return Err(ForceFitError::validation(
                "supercell",
                format!("expected 9 integers, got {}", self.supercell.len()),
            ));
        }
        if self.perturb_file.is_none() && self.n_structures == 0 {
            return Err(ForceFitError::validation("n_structures", "must be positive"));
        }
        if !(self.rattle_std > 0.0) || !self.rattle_std.is_finite() {
            return Err(ForceFitError::validation(
                "rattle_std",
                format!("must be a positive number (got {})", self.rattle_std),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ForceFitError::validation("max_attempts", "must be at least 1"));
        }
        if self.cutoffs.is_empty() {
            return Err(ForceFitError::validation(
                "cutoffs",
                "at least one cutoff (for second order) is required",
            ));
        }
        if let Some(alpha) = self.alpha {
            if !(alpha >= 0.0) || !alpha.is_finite() {
                return Err(ForceFitError::validation(
                    "alpha",
                    format!("must be a non-negative number (got {})", alpha),
                ));
            }
        }
        if !(self.max_condition_number > 0.0) {
            return Err(ForceFitError::validation(
                "max_condition_number",
                "must be positive",
            ));
        }
        if !(self.sum_rule_tolerance > 0.0) {
            return Err(ForceFitError::validation(
                "sum_rule_tolerance",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = FitConfig::default();
        assert_eq!(config.supercell, vec![3, 0, 0, 0, 3, 0, 0, 0, 3]);
        assert_eq!(config.n_structures, 50);
        assert_eq!(config.cutoffs, vec![5.0, 4.0, 3.5]);
        assert_eq!(config.fit_method, FitMethod::Ridge);
        assert_eq!(config.max_order(), 4);
        assert!(config.save_higher_order);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = FitConfig::from_json(
            r#"{"n_structures": 30, "fit_method": "least_squares", "cutoffs": [5.0]}"#,
        )
        .unwrap();
        assert_eq!(config.n_structures, 30);
        assert_eq!(config.fit_method, FitMethod::LeastSquares);
        assert_eq!(config.effective_alpha(), 0.0);
        assert_eq!(config.rattle_std, 0.01);
        assert_eq!(config.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_unknown_values_are_config_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        for text in [
            r#"{"fit_method": "svm"}"#,
            r#"{"potential_type": "emt"}"#,
            r#"{"n_structure": 3}"#,
        ] {
            fs::write(&path, text).unwrap();
            assert!(matches!(
                FitConfig::from_file(&path),
                Err(ForceFitError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn test_template_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forcefit.json");
        FitConfig::write_template(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        for key in ["potential_file", "perturb_file", "save_higher_order", "on_eval_error"] {
            assert!(text.contains(key), "template lacks {}", key);
        }
        assert_eq!(FitConfig::from_file(&path).unwrap(), FitConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FitConfig::default();
        config.supercell = vec![2, 0, 0];
        assert!(config.validate().is_err());

        let mut config = FitConfig::default();
        config.rattle_std = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ForceFitError::ValidationError { .. })
        ));
    }
}
