//! # 批量标注执行器
//!
//! 在有界 rayon 线程池中用势函数标注训练构型。
//!
//! ## 功能
//! - 结果按生成顺序重新组装
//! - 可共享的势函数被所有工作线程借用，不可共享的按工作线程 fork
//! - 单个构型失败按 `OnEvalError` 策略跳过或中止
//! - 进度条显示
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::{ForceFitError, Result};
use crate::models::TrainingStructure;
use crate::potentials::PotentialEvaluator;
use crate::utils::progress;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// 单个构型计算失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OnEvalError {
    /// Drop the structure and warn
    Skip,
    /// Stop the run
    Abort,
}

impl fmt::Display for OnEvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnEvalError::Skip => write!(f, "skip"),
            OnEvalError::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for OnEvalError {
    type Err = ForceFitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(OnEvalError::Skip),
            "abort" => Ok(OnEvalError::Abort),
            other => Err(ForceFitError::ConfigError(format!(
                "unknown on_eval_error '{}' (expected skip or abort)",
                other
            ))),
        }
    }
}

/// 单个构型的标注结果
#[derive(Debug)]
pub enum EvalOutcome {
    /// 标注成功
    Labeled(TrainingStructure),
    /// 中止后未计算
    Cancelled,
    /// 计算失败（`EvaluationError`，已带构型序号）
    Failed(ForceFitError),
}

/// 批量标注结果
#[derive(Debug, Default)]
pub struct EvaluationReport {
    /// 已标注构型（按生成顺序）
    pub labeled: Vec<TrainingStructure>,
    /// 失败详情（按构型序号排列）
    pub failures: Vec<ForceFitError>,
    /// 因中止而未计算的数量
    pub cancelled: usize,
}

impl EvaluationReport {
    /// 合并处理结果
    pub fn merge(&mut self, outcome: EvalOutcome) {
        match outcome {
            EvalOutcome::Labeled(s) => self.labeled.push(s),
            EvalOutcome::Cancelled => self.cancelled += 1,
            EvalOutcome::Failed(err) => self.failures.push(err),
        }
    }

    /// 总处理数量
    pub fn total(&self) -> usize {
        self.labeled.len() + self.failures.len() + self.cancelled
    }
}

/// 批量执行器
pub struct BatchRunner {
    /// 并行作业数
    jobs: usize,
    /// 是否显示进度条
    show_progress: bool,
}

impl BatchRunner {
    /// 创建新的批量执行器（`jobs == 0` 时使用全部 CPU）
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self {
            jobs,
            show_progress: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 并行标注所有构型
    ///
    /// `Abort` 策略下第一个失败之后的构型不再计算，返回序号最小的失败；
    /// `Skip` 策略下失败构型被丢弃并记录在报告中。
    pub fn run(
        &self,
        evaluator: &dyn PotentialEvaluator,
        structures: Vec<TrainingStructure>,
        policy: OnEvalError,
    ) -> Result<EvaluationReport> {
        let mut report = self.label_all(evaluator, structures, policy)?;
        if policy == OnEvalError::Abort && !report.failures.is_empty() {
            return Err(report.failures.swap_remove(0));
        }
        Ok(report)
    }

    /// 标注并汇总全部结果（不按策略转换为错误）
    fn label_all(
        &self,
        evaluator: &dyn PotentialEvaluator,
        structures: Vec<TrainingStructure>,
        policy: OnEvalError,
    ) -> Result<EvaluationReport> {
        let total = structures.len();
        let pb = progress::create_progress_bar(total as u64, "Evaluating", self.show_progress);

        let stop = AtomicBool::new(false);

        let label = |ev: &dyn PotentialEvaluator, s: TrainingStructure| -> EvalOutcome {
            if stop.load(Ordering::Relaxed) {
                return EvalOutcome::Cancelled;
            }
            let result = ev.evaluate(&s.structure).and_then(|eval| {
                if eval.forces.len() == s.structure.len() {
                    Ok(eval)
                } else {
                    Err(ForceFitError::evaluation(format!(
                        "potential returned {} forces for {} atoms",
                        eval.forces.len(),
                        s.structure.len()
                    )))
                }
            });
            pb.inc(1);
            match result {
                Ok(eval) => EvalOutcome::Labeled(s.labeled(eval)),
                Err(err) => {
                    if policy == OnEvalError::Abort {
                        stop.store(true, Ordering::Relaxed);
                    }
                    EvalOutcome::Failed(err.for_sample(s.index))
                }
            }
        };

        // 配置 rayon 线程池
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| {
                ForceFitError::ConfigError(format!(
                    "cannot start {} worker threads: {}",
                    self.jobs, e
                ))
            })?;

        let outcomes: Vec<EvalOutcome> = pool.install(|| {
            if evaluator.is_shareable() {
                structures
                    .into_par_iter()
                    .map(|s| label(evaluator, s))
                    .collect()
            } else {
                structures
                    .into_par_iter()
                    .map_init(|| evaluator.fork(), |ev, s| label(ev.as_ref(), s))
                    .collect()
            }
        });

        pb.finish_and_clear();

        let mut report = EvaluationReport::default();
        for outcome in outcomes {
            report.merge(outcome);
        }
        Ok(report)
    }
}

/// 检查剩余的已标注构型数量
pub fn require_samples(report: &EvaluationReport, min_samples: usize) -> Result<()> {
    if report.labeled.len() < min_samples.max(1) {
        return Err(ForceFitError::GenerationError {
            sample: report.total(),
            reason: format!(
                "only {} of {} training structures were labeled, at least {} required",
                report.labeled.len(),
                report.total(),
                min_samples.max(1)
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Crystal, Evaluation, Lattice};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// 首个原子 x 坐标落在 (0, 0.5) 时失败的测试势
    struct Picky {
        forks: Arc<AtomicUsize>,
        shareable: bool,
    }

    impl PotentialEvaluator for Picky {
        fn name(&self) -> String {
            "picky".to_string()
        }

        fn evaluate(&self, structure: &Crystal) -> Result<Evaluation> {
            let x = structure.atoms[0].position[0];
            if x > 0.0 && x < 0.5 {
                return Err(ForceFitError::evaluation(format!("refusing x = {}", x)));
            }
            Ok(Evaluation {
                energy: x,
                forces: vec![[0.0; 3]; structure.len()],
            })
        }

        fn is_shareable(&self) -> bool {
            self.shareable
        }

        fn fork(&self) -> Box<dyn PotentialEvaluator> {
            self.forks.fetch_add(1, Ordering::Relaxed);
            Box::new(Picky {
                forks: self.forks.clone(),
                shareable: self.shareable,
            })
        }
    }

    /// 少返回一个原子受力的势
    struct ShortForces;

    impl PotentialEvaluator for ShortForces {
        fn name(&self) -> String {
            "short".to_string()
        }

        fn evaluate(&self, structure: &Crystal) -> Result<Evaluation> {
            Ok(Evaluation {
                energy: 0.0,
                forces: vec![[0.0; 3]; structure.len() - 1],
            })
        }

        fn fork(&self) -> Box<dyn PotentialEvaluator> {
            Box::new(ShortForces)
        }
    }

    fn structures(xs: &[f64]) -> Vec<TrainingStructure> {
        xs.iter()
            .enumerate()
            .map(|(i, &x)| {
                let c = Crystal::new("x", Lattice::cubic(4.0), vec![Atom::new("Ar", [x, 0.0, 0.0])])
                    .unwrap();
                TrainingStructure::new(i, c, vec![[0.0; 3]])
            })
            .collect()
    }

    #[test]
    fn test_order_preserved() {
        let xs: Vec<f64> = (0..40).map(|k| 0.5 + k as f64 * 0.01).collect();
        let pot = Picky {
            forks: Arc::new(AtomicUsize::new(0)),
            shareable: true,
        };
        let report = BatchRunner::new(4)
            .quiet()
            .run(&pot, structures(&xs), OnEvalError::Skip)
            .unwrap();
        assert_eq!(report.labeled.len(), 40);
        for (k, s) in report.labeled.iter().enumerate() {
            assert_eq!(s.index, k);
            assert!((s.evaluation.as_ref().unwrap().energy - xs[k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_skip_policy_drops_failures() {
        let pot = Picky {
            forks: Arc::new(AtomicUsize::new(0)),
            shareable: true,
        };
        let report = BatchRunner::new(2)
            .quiet()
            .run(&pot, structures(&[0.6, 0.1, 0.7, 0.2]), OnEvalError::Skip)
            .unwrap();
        assert_eq!(report.labeled.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.labeled[1].index, 2);
        assert!(require_samples(&report, 2).is_ok());
        assert!(matches!(
            require_samples(&report, 3),
            Err(ForceFitError::GenerationError { .. })
        ));
    }

    #[test]
    fn test_abort_policy() {
        let pot = Picky {
            forks: Arc::new(AtomicUsize::new(0)),
            shareable: true,
        };
        let result = BatchRunner::new(1)
            .quiet()
            .run(&pot, structures(&[0.6, 0.1, 0.7]), OnEvalError::Abort);
        assert!(matches!(
            result,
            Err(ForceFitError::EvaluationError { sample: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_force_count_stops_abort_run() {
        let result = BatchRunner::new(1)
            .quiet()
            .run(&ShortForces, structures(&[0.6, 0.7, 0.8, 0.9]), OnEvalError::Abort);
        match result {
            Err(ForceFitError::EvaluationError { sample, reason, .. }) => {
                assert_eq!(sample, 0);
                assert!(reason.contains("0 forces for 1 atoms"));
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.total())),
        }

        // 单线程下第一个失败之后的构型都被取消
        let report = BatchRunner::new(1)
            .quiet()
            .label_all(&ShortForces, structures(&[0.6, 0.7, 0.8, 0.9]), OnEvalError::Abort)
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.cancelled, 3);

        let report = BatchRunner::new(1)
            .quiet()
            .label_all(&ShortForces, structures(&[0.6, 0.7, 0.8, 0.9]), OnEvalError::Skip)
            .unwrap();
        assert_eq!(report.failures.len(), 4);
        assert_eq!(report.cancelled, 0);
    }

    #[test]
    fn test_non_shareable_is_forked() {
        let forks = Arc::new(AtomicUsize::new(0));
        let pot = Picky {
            forks: forks.clone(),
            shareable: false,
        };
        let report = BatchRunner::new(2)
            .quiet()
            .run(&pot, structures(&[0.6, 0.7, 0.8]), OnEvalError::Skip)
            .unwrap();
        assert_eq!(report.labeled.len(), 3);
        assert!(forks.load(Ordering::Relaxed) >= 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_potential_runs_on_forked_workers() {
        use crate::potentials::ExternalPotential;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("model.sh");
        fs::write(&script, "cat > /dev/null\necho -0.5\necho 0.1 0.2 0.3\n").unwrap();
        let model = dir.path().join("model.bin");
        fs::write(&model, "weights").unwrap();
        let pot = ExternalPotential::new(&format!("sh {}", script.display()), model).unwrap();
        assert!(!pot.is_shareable());

        let report = BatchRunner::new(3)
            .quiet()
            .run(&pot, structures(&[0.6, 0.7, 0.8, 0.9, 0.55]), OnEvalError::Abort)
            .unwrap();
        assert_eq!(report.labeled.len(), 5);
        for (k, s) in report.labeled.iter().enumerate() {
            assert_eq!(s.index, k);
            let eval = s.evaluation.as_ref().unwrap();
            assert!((eval.energy + 0.5).abs() < 1e-12);
            assert!((eval.forces[0][2] - 0.3).abs() < 1e-12);
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Abort".parse::<OnEvalError>().unwrap(), OnEvalError::Abort);
        assert!("retry".parse::<OnEvalError>().is_err());
    }
}
