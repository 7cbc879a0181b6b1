//! # 线性回归求解器
//!
//! 在列归一化后的设计矩阵上求解 A·x ≈ b：
//! - `least_squares`: SVD 伪逆
//! - `ridge`: (AᵀA + αI)·x = Aᵀb，Cholesky 分解
//! - `lasso`: ½‖Ax − b‖² + α‖x‖₁，坐标下降
//! - `ard`: 自动相关性判定（证据迭代），精度超过 α 的参数被剪除
//!
//! ## 依赖关系
//! - 被 `fitting/mod.rs` 使用
//! - 使用 `nalgebra` 的 SVD / Cholesky

use crate::error::{ForceFitError, Result};

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 拟合方法（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(try_from = "String", into = "String")]
pub enum FitMethod {
    /// Ordinary least squares (SVD)
    #[value(name = "least-squares", alias = "least_squares")]
    LeastSquares,
    /// L2-regularized least squares
    Ridge,
    /// L1-regularized least squares
    Lasso,
    /// Automatic relevance determination
    Ard,
}

impl FitMethod {
    /// 各方法的默认正则化强度
    pub fn default_alpha(&self) -> f64 {
        match self {
            FitMethod::LeastSquares => 0.0,
            FitMethod::Ridge => 1e-6,
            FitMethod::Lasso => 1e-6,
            FitMethod::Ard => 1e6,
        }
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMethod::LeastSquares => write!(f, "least-squares"),
            FitMethod::Ridge => write!(f, "ridge"),
            FitMethod::Lasso => write!(f, "lasso"),
            FitMethod::Ard => write!(f, "ard"),
        }
    }
}

impl FromStr for FitMethod {
    type Err = ForceFitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "least-squares" | "ols" => Ok(FitMethod::LeastSquares),
            "ridge" => Ok(FitMethod::Ridge),
            "lasso" => Ok(FitMethod::Lasso),
            "ard" | "ardr" => Ok(FitMethod::Ard),
            other => Err(ForceFitError::ConfigError(format!(
                "unknown fit_method '{}' (expected least-squares, ridge, lasso or ard)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for FitMethod {
    type Error = ForceFitError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FitMethod> for String {
    fn from(m: FitMethod) -> String {
        m.to_string()
    }
}

fn solver_error(reason: impl Into<String>, a: &DMatrix<f64>) -> ForceFitError {
    ForceFitError::FittingError {
        reason: reason.into(),
        condition_number: f64::INFINITY,
        n_parameters: a.ncols(),
        n_samples: 0,
        n_rows: a.nrows(),
    }
}

/// 按方法分派
pub fn solve(method: FitMethod, a: &DMatrix<f64>, b: &DVector<f64>, alpha: f64) -> Result<DVector<f64>> {
    match method {
        FitMethod::LeastSquares => least_squares(a, b),
        FitMethod::Ridge => ridge(a, b, alpha),
        FitMethod::Lasso => Ok(lasso(a, b, alpha)),
        FitMethod::Ard => ard(a, b, alpha),
    }
}

/// 最小二乘（SVD）
pub fn least_squares(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let svd = a.clone().svd(true, true);
    svd.solve(b, 1e-14)
        .map_err(|e| solver_error(format!("SVD solve failed: {}", e), a))
}

/// 岭回归
pub fn ridge(a: &DMatrix<f64>, b: &DVector<f64>, alpha: f64) -> Result<DVector<f64>> {
    let n = a.ncols();
    let normal = a.transpose() * a + DMatrix::<f64>::identity(n, n) * alpha;
    let rhs = a.transpose() * b;
    let chol = Cholesky::new(normal)
        .ok_or_else(|| solver_error("regularized normal matrix is not positive definite", a))?;
    Ok(chol.solve(&rhs))
}

/// LASSO（坐标下降，列已归一化）
pub fn lasso(a: &DMatrix<f64>, b: &DVector<f64>, alpha: f64) -> DVector<f64> {
    const MAX_SWEEPS: usize = 10_000;
    const TOL: f64 = 1e-10;

    let n = a.ncols();
    let gram = a.transpose() * a;
    let atb = a.transpose() * b;
    let mut x = DVector::<f64>::zeros(n);
    // g = AᵀA·x，随 x 增量更新
    let mut g = DVector::<f64>::zeros(n);

    for _ in 0..MAX_SWEEPS {
        let mut max_step: f64 = 0.0;
        let mut max_x: f64 = 0.0;
        for j in 0..n {
            let diag = gram[(j, j)];
            if diag <= 0.0 {
                continue;
            }
            let rho = atb[j] - (g[j] - diag * x[j]);
            let new = soft_threshold(rho, alpha) / diag;
            let delta = new - x[j];
            if delta != 0.0 {
                for k in 0..n {
                    g[k] += gram[(k, j)] * delta;
                }
                x[j] = new;
            }
            max_step = max_step.max(delta.abs());
            max_x = max_x.max(new.abs());
        }
        if max_step <= TOL * max_x.max(1e-300) {
            break;
        }
    }
    x
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// ARD 回归
///
/// 噪声精度 β 与每个参数的先验精度 λ_i 交替更新；λ_i > `threshold` 的参数置零剪除。
pub fn ard(a: &DMatrix<f64>, b: &DVector<f64>, threshold: f64) -> Result<DVector<f64>> {
    const MAX_ITER: usize = 300;
    const TOL: f64 = 1e-8;
    // Gamma 超先验
    const HYPER: f64 = 1e-6;

    let (m, n) = a.shape();
    let mean = b.mean();
    let var = b.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / m.max(1) as f64;
    let mut beta = 1.0 / var.max(1e-12);
    let mut lambda = DVector::<f64>::from_element(n, 1.0);
    let mut keep: Vec<bool> = vec![true; n];
    let mut coef = DVector::<f64>::zeros(n);

    for _ in 0..MAX_ITER {
        let active: Vec<usize> = (0..n).filter(|&j| keep[j]).collect();
        if active.is_empty() {
            break;
        }
        let sub = a.select_columns(&active);
        let mut precision = sub.transpose() * &sub * beta;
        for (k, &j) in active.iter().enumerate() {
            precision[(k, k)] += lambda[j];
        }
        let chol = Cholesky::new(precision)
            .ok_or_else(|| solver_error("ARD posterior precision is not positive definite", a))?;
        let sigma = chol.inverse();
        let mu = &sigma * (sub.transpose() * b) * beta;

        let mut new_coef = DVector::<f64>::zeros(n);
        let mut gamma_sum = 0.0;
        for (k, &j) in active.iter().enumerate() {
            new_coef[j] = mu[k];
            let gamma = 1.0 - lambda[j] * sigma[(k, k)];
            gamma_sum += gamma;
            lambda[j] = (gamma + 2.0 * HYPER) / (mu[k] * mu[k] + 2.0 * HYPER);
        }
        let residual = b - &sub * &mu;
        let rss = residual.norm_squared();
        beta = (m as f64 - gamma_sum + 2.0 * HYPER) / (rss + 2.0 * HYPER);

        for &j in &active {
            if lambda[j] > threshold {
                keep[j] = false;
                new_coef[j] = 0.0;
            }
        }

        let change = (&new_coef - &coef).abs().sum();
        coef = new_coef;
        if change < TOL {
            break;
        }
    }

    Ok(coef)
}
