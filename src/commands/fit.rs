//! # fit 命令实现
//!
//! 串联整个拟合流程，各阶段顺序执行：
//! 1. 读取配置与结构，构造超胞
//! 2. 构造团簇空间（截断半径在任何势函数调用之前校验）
//! 3. 构造势函数，计算理想超胞
//! 4. 生成训练构型并并行标注
//! 5. 拟合、提取力常数、检查求和规则（可选对称化）
//! 6. 原子写出所有输出文件
//!
//! 失败的阶段通过 `Stage` 包装标明；`RunContext` 在任何失败路径上删除已写出的文件。
//!
//! ## 依赖关系
//! - 使用 `cli/fit.rs` 定义的参数与 `config.rs`
//! - 使用 `parsers/`, `models/`, `cluster/`, `potentials/`, `training/`, `batch/`, `fitting/`, `fc/`
//! - 使用 `utils/output.rs`, `utils/progress.rs`

use crate::batch::{require_samples, BatchRunner, OnEvalError};
use crate::cli::fit::FitArgs;
use crate::cluster::{ClusterSpace, ClusterSpaceOptions, OrderSummary};
use crate::config::FitConfig;
use crate::error::{ForceFitError, Result, Stage};
use crate::fc::{self, export, symmetrize::DEFAULT_MAX_ITERATIONS, ForceConstantsTensor, SumRuleCheck};
use crate::fitting::{self, FitSettings, FittedModel};
use crate::models::structure::supercell_matrix_from_slice;
use crate::models::{build_supercell, Crystal, SupercellMap};
use crate::parsers;
use crate::potentials::{build_evaluator, PotentialEvaluator};
use crate::training::{self, RattleSettings};
use crate::utils::{output, progress};

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tempfile::TempDir;

/// 团簇空间统计行
#[derive(Debug, Clone, Tabled)]
struct OrderRow {
    #[tabled(rename = "Order")]
    order: usize,
    #[tabled(rename = "Cutoff (Å)")]
    cutoff: String,
    #[tabled(rename = "Clusters")]
    clusters: usize,
    #[tabled(rename = "Orbits")]
    orbits: usize,
    #[tabled(rename = "Parameters")]
    parameters: usize,
    #[tabled(rename = "Free")]
    free: usize,
}

impl From<&OrderSummary> for OrderRow {
    fn from(s: &OrderSummary) -> Self {
        OrderRow {
            order: s.order,
            cutoff: format!("{:.3}", s.cutoff),
            clusters: s.n_clusters,
            orbits: s.n_orbits,
            parameters: s.n_parameters,
            free: s.n_free_parameters,
        }
    }
}

/// 求和规则检查行
#[derive(Debug, Clone, Tabled)]
struct SumRuleRow {
    #[tabled(rename = "Order")]
    order: usize,
    #[tabled(rename = "Max row sum")]
    residual: String,
    #[tabled(rename = "Tolerance")]
    tolerance: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&SumRuleCheck> for SumRuleRow {
    fn from(c: &SumRuleCheck) -> Self {
        SumRuleRow {
            order: c.order,
            residual: format!("{:.3e}", c.residual),
            tolerance: format!("{:.1e}", c.tolerance),
            status: if c.passed() { "ok" } else { "VIOLATED" }.to_string(),
        }
    }
}

/// 执行 fit 命令
pub fn execute(args: FitArgs) -> Result<()> {
    if let Some(path) = &args.create_config {
        FitConfig::write_template(path)?;
        output::print_success(&format!("Configuration template written to {}", path.display()));
        return Ok(());
    }

    let structure = args.structure.clone().ok_or_else(|| {
        ForceFitError::ConfigError("a structure file is required".to_string())
    })?;
    let mut config = match &args.config {
        Some(path) => {
            let config = FitConfig::from_file(path).map_err(|e| e.at_stage(Stage::Config))?;
            output::print_info(&format!("Loaded configuration from {}", path.display()));
            config
        }
        None => FitConfig::default(),
    };
    args.apply_to(&mut config);

    output::print_header("Force Constant Fitting");
    let outcome = Pipeline::new(config).run(&structure)?;

    output::print_separator();
    for (order, fc) in &outcome.tensors {
        let passed = outcome
            .sum_rules
            .iter()
            .find(|c| c.order == *order)
            .map_or(true, |c| c.passed());
        output::print_info(&format!(
            "Order {}: {} blocks, max |Φ| {:.4e}{}",
            order,
            fc.n_blocks(),
            fc.max_abs(),
            if passed { "" } else { ", sum rule violated" }
        ));
    }
    for path in &outcome.written {
        output::print_written(path);
    }
    output::print_done(&format!(
        "Fitted {} parameters from {} training structures",
        outcome.model.parameters.len(),
        outcome.model.diagnostics.n_samples
    ));
    Ok(())
}

// ─────────────────────────────────────────────────────────────
// 运行上下文
// ─────────────────────────────────────────────────────────────

/// 单次运行的输出范围
///
/// 所有文件先写入输出目录中的暂存目录，提交时才重命名到最终位置；
/// 未提交时只删除暂存目录（以及本次新建的输出目录），上一次运行的结果保持不变。
struct RunContext {
    output_dir: PathBuf,
    created_dir: bool,
    staging: Option<TempDir>,
    staged: Vec<String>,
}

impl RunContext {
    fn create(output_dir: &Path) -> Result<Self> {
        let write_error = |e| ForceFitError::FileWriteError {
            path: output_dir.display().to_string(),
            source: e,
        };
        let created_dir = !output_dir.exists();
        fs::create_dir_all(output_dir).map_err(write_error)?;
        let staging = tempfile::Builder::new()
            .prefix(".forcefit-")
            .tempdir_in(output_dir)
            .map_err(write_error)?;
        Ok(RunContext {
            output_dir: output_dir.to_path_buf(),
            created_dir,
            staging: Some(staging),
            staged: Vec::new(),
        })
    }

    /// 暂存目录（写出函数的目标目录）
    fn staging_dir(&self) -> &Path {
        self.staging
            .as_ref()
            .map_or(self.output_dir.as_path(), |d| d.path())
    }

    /// 暂存文件路径
    fn path(&self, name: &str) -> PathBuf {
        self.staging_dir().join(name)
    }

    fn record(&mut self, name: &str) {
        self.staged.push(name.to_string());
    }

    /// 把暂存文件移动到输出目录，返回最终路径
    fn commit(mut self) -> Result<Vec<PathBuf>> {
        let targets: Vec<PathBuf> = self.staged.iter().map(|n| self.output_dir.join(n)).collect();
        // 在移动任何文件之前检查目标，避免只替换了一部分旧结果
        if let Some(target) = targets.iter().find(|t| t.is_dir()) {
            return Err(ForceFitError::FileWriteError {
                path: target.display().to_string(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "a directory is in the way"),
            });
        }
        for (name, target) in self.staged.iter().zip(&targets) {
            fs::rename(self.path(name), target).map_err(|e| ForceFitError::FileWriteError {
                path: target.display().to_string(),
                source: e,
            })?;
        }
        self.staged.clear();
        self.created_dir = false;
        Ok(targets)
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            let path = staging.path().to_path_buf();
            if let Err(e) = staging.close() {
                output::print_warning(&format!(
                    "Could not remove staging directory {}: {}",
                    path.display(),
                    e
                ));
            }
        }
        if self.created_dir {
            if let Err(e) = fs::remove_dir(&self.output_dir) {
                output::print_warning(&format!(
                    "Could not remove output directory {}: {}",
                    self.output_dir.display(),
                    e
                ));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 流程
// ─────────────────────────────────────────────────────────────

/// 一次成功运行的结果
#[derive(Debug)]
pub struct FitOutcome {
    pub model: FittedModel,
    pub tensors: BTreeMap<usize, ForceConstantsTensor>,
    pub sum_rules: Vec<SumRuleCheck>,
    pub written: Vec<PathBuf>,
}

/// 拟合流程
pub struct Pipeline {
    config: FitConfig,
    show_progress: bool,
}

const STAGES: usize = 6;

fn at<T>(stage: Stage, result: Result<T>) -> Result<T> {
    result.map_err(|e| e.at_stage(stage))
}

impl Pipeline {
    pub fn new(config: FitConfig) -> Self {
        Pipeline {
            config,
            show_progress: true,
        }
    }

    /// 不显示进度条
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn run(&self, structure_path: &Path) -> Result<FitOutcome> {
        let config = &self.config;
        at(Stage::Config, config.validate())?;

        output::print_stage(1, STAGES, "Structure");
        let primitive = at(Stage::LoadStructure, parsers::load(structure_path))?;
        output::print_info(&format!(
            "Loaded {} ({} atoms) from {}",
            primitive.formula(),
            primitive.len(),
            structure_path.display()
        ));
        let (supercell, map) = at(Stage::Supercell, self.supercell(&primitive))?;
        output::print_info(&format!(
            "Supercell: {} atoms, shortest lattice vector {:.3} Å",
            supercell.len(),
            supercell.lattice.shortest_vector()
        ));

        output::print_stage(2, STAGES, "Cluster space");
        let space = at(Stage::ClusterSpace, self.cluster_space(&supercell))?;

        output::print_stage(3, STAGES, "Training set");
        let evaluator = at(Stage::Potential, build_evaluator(&config.potential_spec()))?;
        output::print_info(&format!("Potential: {}", evaluator.name()));
        let reference_energy = at(Stage::Potential, reference_energy(evaluator.as_ref(), &supercell))?;

        let training = at(Stage::Generation, self.training_set(&supercell))?;
        let runner = if self.show_progress {
            BatchRunner::new(config.jobs)
        } else {
            BatchRunner::new(config.jobs).quiet()
        };
        output::print_info(&format!(
            "Evaluating {} training structures on {} worker(s)",
            training.len(),
            runner.jobs()
        ));
        let report = at(
            Stage::Evaluation,
            runner.run(evaluator.as_ref(), training, config.on_eval_error),
        )?;
        for failure in &report.failures {
            output::print_warning(&format!("Skipped: {}", failure));
        }
        if config.on_eval_error == OnEvalError::Skip && !report.failures.is_empty() {
            output::print_warning(&format!(
                "{} of {} structures could not be evaluated",
                report.failures.len(),
                report.total()
            ));
        }
        at(Stage::Evaluation, require_samples(&report, config.min_samples))?;

        output::print_stage(4, STAGES, "Regression");
        let settings = FitSettings {
            method: config.fit_method,
            alpha: config.effective_alpha(),
            max_condition_number: config.max_condition_number,
            reference_energy: config.fit_energy.then_some(reference_energy),
        };
        let model = at(Stage::Fitting, fitting::fit(&space, &report.labeled, &settings))?;
        print_fit_summary(&model);

        output::print_stage(5, STAGES, "Force constants");
        let mut tensors = at(Stage::Extraction, fc::extract(&space, &model))?;
        let sum_rules = fc::check_sum_rules(&tensors, config.sum_rule_tolerance, true);
        print_sum_rules(&sum_rules);
        if config.symmetrize {
            tensors = self.symmetrized(tensors);
        }

        output::print_stage(6, STAGES, "Output");
        let written = at(
            Stage::Output,
            self.write_outputs(&tensors, &model, &supercell, map.as_ref()),
        )?;

        Ok(FitOutcome {
            model,
            tensors,
            sum_rules,
            written,
        })
    }

    fn supercell(&self, primitive: &Crystal) -> Result<(Crystal, Option<SupercellMap>)> {
        match &self.config.supercell_file {
            Some(path) => {
                output::print_info(&format!("Using supercell from {}", path.display()));
                Ok((parsers::load(path)?, None))
            }
            None => {
                let matrix = supercell_matrix_from_slice(&self.config.supercell)?;
                let (supercell, map) = build_supercell(primitive, matrix)?;
                Ok((supercell, Some(map)))
            }
        }
    }

    fn cluster_space(&self, supercell: &Crystal) -> Result<ClusterSpace> {
        let spinner = progress::create_spinner("Building cluster space", self.show_progress);
        let space = ClusterSpace::build(
            supercell,
            &self.config.cutoffs,
            ClusterSpaceOptions {
                acoustic_sum_rules: self.config.acoustic_sum_rules,
            },
        );
        spinner.finish_and_clear();
        let space = space?;

        output::print_info(&format!(
            "Space group of the supercell: {} operations",
            space.n_operations
        ));
        let rows: Vec<OrderRow> = space.summary().iter().map(OrderRow::from).collect();
        println!("{}", Table::new(&rows));
        output::print_info(&format!(
            "{} parameters, {} free{}",
            space.n_parameters(),
            space.n_free_parameters(),
            if space.has_sum_rules() {
                " after acoustic sum rules"
            } else {
                ""
            }
        ));
        Ok(space)
    }

    fn training_set(&self, supercell: &Crystal) -> Result<Vec<crate::models::TrainingStructure>> {
        let config = &self.config;
        match &config.perturb_file {
            Some(path) => {
                let frames = parsers::load_frames(path)?;
                output::print_info(&format!(
                    "Read {} perturbed configurations from {}",
                    frames.len(),
                    path.display()
                ));
                training::from_configurations(supercell, frames, config.min_distance)
            }
            None => {
                let settings = RattleSettings {
                    count: config.n_structures,
                    std: config.rattle_std,
                    min_distance: config.min_distance,
                    max_attempts: config.max_attempts,
                };
                let mut rng = StdRng::seed_from_u64(config.seed);
                let structures = training::generate(supercell, &settings, &mut rng)?;
                let rms = structures.iter().map(|s| s.rms_displacement()).sum::<f64>()
                    / structures.len().max(1) as f64;
                output::print_info(&format!(
                    "Generated {} rattled structures (std {} Å, seed {}, mean rms displacement {:.4} Å)",
                    structures.len(),
                    config.rattle_std,
                    config.seed,
                    rms
                ));
                Ok(structures)
            }
        }
    }

    fn symmetrized(
        &self,
        tensors: BTreeMap<usize, ForceConstantsTensor>,
    ) -> BTreeMap<usize, ForceConstantsTensor> {
        tensors
            .into_iter()
            .map(|(order, tensor)| {
                let (sym, report) =
                    fc::symmetrize(&tensor, self.config.sum_rule_tolerance, DEFAULT_MAX_ITERATIONS);
                let msg = format!(
                    "Order {}: symmetrized in {} iteration(s), residual {:.3e} -> {:.3e}",
                    order, report.iterations, report.initial_residual, report.residual
                );
                if report.converged {
                    output::print_info(&msg);
                } else {
                    output::print_warning(&format!("{} (not converged)", msg));
                }
                (order, sym)
            })
            .collect()
    }

    fn write_outputs(
        &self,
        tensors: &BTreeMap<usize, ForceConstantsTensor>,
        model: &FittedModel,
        supercell: &Crystal,
        map: Option<&SupercellMap>,
    ) -> Result<Vec<PathBuf>> {
        let mut ctx = RunContext::create(&self.config.output_dir)?;

        for (&order, fc) in tensors {
            if order > 2 && !self.config.save_higher_order {
                continue;
            }
            export::write(fc, ctx.staging_dir())?;
            ctx.record(&export::file_name(order));

            if order == 3 {
                match map {
                    Some(map) => {
                        let path = ctx.path(export::FORCE_CONSTANTS_3RD);
                        export::write_shengbte_third(fc, supercell, map, &path)?;
                        ctx.record(export::FORCE_CONSTANTS_3RD);
                    }
                    None => output::print_warning(
                        "Supercell given directly; FORCE_CONSTANTS_3RD needs the primitive cell and is skipped",
                    ),
                }
            }
        }

        export::write_model(model, &ctx.path(export::MODEL_JSON))?;
        ctx.record(export::MODEL_JSON);

        ctx.commit()
    }
}

/// 理想超胞能量（同时确认势函数可用）
fn reference_energy(evaluator: &dyn PotentialEvaluator, supercell: &Crystal) -> Result<f64> {
    let evaluation = evaluator.evaluate(supercell).map_err(|e| {
        let reason = match e {
            ForceFitError::EvaluationError { reason, .. } => reason,
            other => other.to_string(),
        };
        ForceFitError::ConfigError(format!(
            "potential cannot evaluate the ideal supercell: {}",
            reason
        ))
    })?;
    let max_force = evaluation.max_force();
    if max_force > 1e-3 {
        output::print_warning(&format!(
            "Largest force on the ideal supercell is {:.3e} eV/Å; the structure may not be relaxed",
            max_force
        ));
    }
    Ok(evaluation.energy)
}

fn print_fit_summary(model: &FittedModel) {
    let d = &model.diagnostics;
    output::print_info(&format!(
        "Fit: {} (alpha = {:.1e}), {} rows, condition number {:.3e}",
        model.method, model.alpha, d.n_rows, d.condition_number
    ));
    output::print_info(&format!(
        "RMSE forces {:.4e} eV/Å, R² {:.6}, {} of {} free parameters active",
        d.rmse_forces,
        d.r_squared,
        d.n_active,
        model.free_parameters.len()
    ));
    if let Some(rmse) = d.rmse_energy {
        output::print_info(&format!("RMSE energy {:.4e} eV", rmse));
    }
    let orders: BTreeSet<usize> = model.orbits.iter().map(|o| o.order).collect();
    for order in orders {
        let params = model.parameters_of_order(order);
        let norm = params.iter().map(|x| x * x).sum::<f64>().sqrt();
        output::print_info(&format!(
            "Order {}: {} parameters, |x| = {:.4e}",
            order,
            params.len(),
            norm
        ));
    }
}

fn print_sum_rules(checks: &[SumRuleCheck]) {
    let rows: Vec<SumRuleRow> = checks.iter().map(SumRuleRow::from).collect();
    println!("{}", Table::new(&rows));
    for check in checks.iter().filter(|c| !c.passed()) {
        output::print_warning(&format!(
            "Order-{} acoustic sum rule violated: max row sum {:.3e} > {:.1e}",
            check.order, check.residual, check.tolerance
        ));
    }
}
