//! # 拟合模块
//!
//! 由已标注训练集求解团簇空间的展开系数：
//! 组装设计矩阵 → 约化到求和规则零空间 → 列归一化 → 条件数检查 → 求解 → 还原。
//! 输入（团簇空间、训练集）只读。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 使用
//! - 子模块: design, solvers, model

pub mod design;
pub mod model;
pub mod solvers;

pub use model::{FitDiagnostics, FittedModel};
pub use solvers::FitMethod;

use crate::cluster::ClusterSpace;
use crate::error::{ForceFitError, Result};
use crate::models::TrainingStructure;

use nalgebra::{DMatrix, DVector};

/// 拟合设置
#[derive(Debug, Clone, Copy)]
pub struct FitSettings {
    pub method: FitMethod,
    /// 正则化强度（最小二乘忽略）
    pub alpha: f64,
    pub max_condition_number: f64,
    /// 理想超胞能量；给出时同时拟合能量
    pub reference_energy: Option<f64>,
}

/// 拟合展开系数
pub fn fit(
    space: &ClusterSpace,
    training: &[TrainingStructure],
    settings: &FitSettings,
) -> Result<FittedModel> {
    let system = design::assemble(space, training, settings.reference_energy)?;
    let reduced = space.reduce_columns(system.matrix);
    let (n_rows, n_free) = reduced.shape();

    let fitting_error = |reason: String, condition_number: f64| ForceFitError::FittingError {
        reason,
        condition_number,
        n_parameters: n_free,
        n_samples: system.n_samples,
        n_rows,
    };

    if n_free == 0 {
        return Err(fitting_error(
            "the cluster space has no free parameters".to_string(),
            f64::NAN,
        ));
    }

    // 列归一化
    let mut scales = DVector::<f64>::zeros(n_free);
    let mut normalized = reduced.clone();
    let mut unsampled = Vec::new();
    for j in 0..n_free {
        let norm = reduced.column(j).norm();
        if norm > 0.0 {
            scales[j] = norm;
            normalized.column_mut(j).scale_mut(1.0 / norm);
        } else {
            scales[j] = 1.0;
            unsampled.push(j);
        }
    }

    if n_rows < n_free {
        return Err(fitting_error(
            format!("{} design rows for {} free parameters", n_rows, n_free),
            f64::INFINITY,
        ));
    }
    if !unsampled.is_empty() {
        return Err(fitting_error(
            format!(
                "{} parameter(s) are not sampled by any training structure",
                unsampled.len()
            ),
            f64::INFINITY,
        ));
    }
    let condition_number = condition_number(&normalized);
    if !(condition_number <= settings.max_condition_number) {
        return Err(fitting_error(
            format!(
                "condition number exceeds max_condition_number ({:.1e})",
                settings.max_condition_number
            ),
            condition_number,
        ));
    }

    let solution = solvers::solve(settings.method, &normalized, &system.target, settings.alpha)
        .map_err(|e| match e {
            ForceFitError::FittingError { reason, .. } => fitting_error(reason, condition_number),
            other => other,
        })?;

    let free = solution.component_div(&scales);
    let parameters = space.expand(&free);
    let diagnostics = diagnostics(
        &reduced,
        &system.target,
        &free,
        system.n_force_rows,
        system.n_samples,
        condition_number,
    );

    Ok(FittedModel {
        method: settings.method,
        alpha: if settings.method == FitMethod::LeastSquares {
            0.0
        } else {
            settings.alpha
        },
        n_atoms: space.n_atoms,
        cutoffs: space.cutoffs.clone(),
        parameters: parameters.iter().copied().collect(),
        free_parameters: free.iter().copied().collect(),
        diagnostics,
        orbits: FittedModel::orbit_records(space),
    })
}

/// σ_max / σ_min
pub fn condition_number(matrix: &DMatrix<f64>) -> f64 {
    if matrix.is_empty() {
        return f64::INFINITY;
    }
    let singular = matrix.clone().svd(false, false).singular_values;
    let max = singular.iter().cloned().fold(0.0_f64, f64::max);
    let min = singular.iter().cloned().fold(f64::INFINITY, f64::min);
    if singular.len() < matrix.ncols() || min <= 0.0 {
        f64::INFINITY
    } else {
        max / min
    }
}

fn diagnostics(
    matrix: &DMatrix<f64>,
    target: &DVector<f64>,
    free: &DVector<f64>,
    n_force_rows: usize,
    n_samples: usize,
    condition_number: f64,
) -> FitDiagnostics {
    let predicted = matrix * free;
    let residual = target - &predicted;
    let n_rows = target.len();

    let rmse = |range: std::ops::Range<usize>| {
        let len = range.len().max(1) as f64;
        (range.map(|r| residual[r] * residual[r]).sum::<f64>() / len).sqrt()
    };
    let rmse_forces = rmse(0..n_force_rows);
    let rmse_energy = (n_rows > n_force_rows).then(|| rmse(n_force_rows..n_rows));

    let mean = target.mean();
    let ss_tot: f64 = target.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res = residual.norm_squared();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    FitDiagnostics {
        rmse_forces,
        rmse_energy,
        r_squared,
        condition_number,
        n_rows,
        n_samples,
        n_active: free.iter().filter(|x| x.abs() > 0.0).count(),
    }
}
