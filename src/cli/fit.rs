//! # fit 子命令 CLI 定义
//!
//! 选项与配置文件的键一一对应；只有显式给出的选项才覆盖配置文件。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/fit.rs`
//! - 覆盖 `config.rs` 中的 `FitConfig`

use crate::batch::OnEvalError;
use crate::config::FitConfig;
use crate::fitting::FitMethod;
use crate::potentials::PotentialType;

use clap::Args;
use std::path::PathBuf;

/// fit 子命令参数
#[derive(Args, Debug, Default)]
pub struct FitArgs {
    /// Primitive structure (POSCAR or extended XYZ)
    #[arg(required_unless_present = "create_config")]
    pub structure: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write a configuration template with every option and its default, then exit
    #[arg(long, num_args = 0..=1, default_missing_value = "forcefit.json", value_name = "PATH")]
    pub create_config: Option<PathBuf>,

    // ─── 势函数 ───
    /// Potential parameter / model file
    #[arg(long)]
    pub potential_file: Option<PathBuf>,

    /// Potential kind
    #[arg(long, value_enum)]
    pub potential_type: Option<PotentialType>,

    /// Command line of an external potential
    #[arg(long)]
    pub potential_command: Option<String>,

    // ─── 超胞与训练集 ───
    /// Supercell matrix as 9 integers, row-major
    #[arg(short, long, num_args = 9, allow_negative_numbers = true)]
    pub supercell: Option<Vec<i32>>,

    /// Use this structure as the supercell directly
    #[arg(long)]
    pub supercell_file: Option<PathBuf>,

    /// Pre-perturbed configurations (extended XYZ trajectory)
    #[arg(long)]
    pub perturb_file: Option<PathBuf>,

    /// Number of rattled training structures
    #[arg(short, long)]
    pub n_structures: Option<usize>,

    /// Standard deviation of the displacements (Å)
    #[arg(short, long)]
    pub rattle_std: Option<f64>,

    /// Smallest interatomic distance accepted in a training structure (Å)
    #[arg(long)]
    pub min_distance: Option<f64>,

    /// Draws per training structure before giving up
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    // ─── 团簇空间与拟合 ───
    /// Cutoff per order (Å), starting at second order
    #[arg(long, num_args = 1..)]
    pub cutoffs: Option<Vec<f64>>,

    /// Regression method
    #[arg(short = 'm', long, value_enum)]
    pub fit_method: Option<FitMethod>,

    /// Regularization strength (ARD: pruning threshold)
    #[arg(short, long)]
    pub alpha: Option<f64>,

    /// Also fit the energy of each training structure
    #[arg(long)]
    pub fit_energy: bool,

    /// Largest accepted condition number of the design matrix
    #[arg(long)]
    pub max_condition_number: Option<f64>,

    /// Impose the acoustic sum rules on the parameters
    #[arg(long, overrides_with = "no_sum_rules")]
    pub sum_rules: bool,

    /// Do not impose the acoustic sum rules
    #[arg(long)]
    pub no_sum_rules: bool,

    /// Tolerance of the sum-rule check
    #[arg(long)]
    pub sum_rule_tolerance: Option<f64>,

    /// Symmetrize the extracted force constants
    #[arg(long)]
    pub symmetrize: bool,

    // ─── 执行与输出 ───
    /// What to do when a training structure cannot be evaluated
    #[arg(long, value_enum)]
    pub on_eval_error: Option<OnEvalError>,

    /// Smallest number of labeled structures needed to fit
    #[arg(long)]
    pub min_samples: Option<usize>,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Write third- and higher-order force constants
    #[arg(long, overrides_with = "no_save_higher_order")]
    pub save_higher_order: bool,

    /// Only write the second-order force constants
    #[arg(long)]
    pub no_save_higher_order: bool,

    /// Output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// 成对开关：都未给出时为 None
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

impl FitArgs {
    /// 把显式给出的选项写入配置
    pub fn apply_to(&self, config: &mut FitConfig) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &self.$field {
                    config.$field = value.clone();
                })*
            };
        }
        set!(
            potential_type,
            supercell,
            n_structures,
            rattle_std,
            min_distance,
            max_attempts,
            seed,
            cutoffs,
            fit_method,
            max_condition_number,
            sum_rule_tolerance,
            on_eval_error,
            min_samples,
            jobs,
            output_dir,
        );

        if self.potential_file.is_some() {
            config.potential_file = self.potential_file.clone();
        }
        if self.potential_command.is_some() {
            config.potential_command = self.potential_command.clone();
        }
        if self.supercell_file.is_some() {
            config.supercell_file = self.supercell_file.clone();
        }
        if self.perturb_file.is_some() {
            config.perturb_file = self.perturb_file.clone();
        }
        if self.alpha.is_some() {
            config.alpha = self.alpha;
        }
        if self.fit_energy {
            config.fit_energy = true;
        }
        if self.symmetrize {
            config.symmetrize = true;
        }
        if let Some(on) = switch(self.sum_rules, self.no_sum_rules) {
            config.acoustic_sum_rules = on;
        }
        if let Some(on) = switch(self.save_higher_order, self.no_save_higher_order) {
            config.save_higher_order = on;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> FitArgs {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Fit(a) => a,
            _ => panic!("expected fit"),
        }
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let mut config = FitConfig::from_json(r#"{"n_structures": 80, "rattle_std": 0.02}"#).unwrap();
        let args = parse(&[
            "forcefit", "fit", "POSCAR", "-n", "30", "--supercell", "2", "0", "0", "0", "2", "0",
            "0", "0", "2", "--cutoffs", "5.0", "--fit-method", "least-squares",
            "--no-save-higher-order",
        ]);
        args.apply_to(&mut config);

        assert_eq!(config.n_structures, 30);
        // 未在命令行给出，保留配置文件的值
        assert_eq!(config.rattle_std, 0.02);
        assert_eq!(config.supercell, vec![2, 0, 0, 0, 2, 0, 0, 0, 2]);
        assert_eq!(config.cutoffs, vec![5.0]);
        assert_eq!(config.fit_method, FitMethod::LeastSquares);
        assert!(!config.save_higher_order);
        assert!(config.acoustic_sum_rules);
    }

    #[test]
    fn test_switch_last_wins() {
        let mut config = FitConfig::default();
        parse(&["forcefit", "fit", "POSCAR", "--no-sum-rules", "--sum-rules"]).apply_to(&mut config);
        assert!(config.acoustic_sum_rules);
        parse(&["forcefit", "fit", "POSCAR", "--no-sum-rules"]).apply_to(&mut config);
        assert!(!config.acoustic_sum_rules);
    }

    #[test]
    fn test_create_config_without_structure() {
        let args = parse(&["forcefit", "fit", "--create-config"]);
        assert_eq!(args.create_config, Some(PathBuf::from("forcefit.json")));
        assert!(args.structure.is_none());
        assert!(Cli::try_parse_from(["forcefit", "fit"]).is_err());
    }

    #[test]
    fn test_unknown_fit_method_rejected() {
        assert!(Cli::try_parse_from(["forcefit", "fit", "POSCAR", "-m", "svm"]).is_err());
    }
}
