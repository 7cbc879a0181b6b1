//! # 扰动构型生成
//!
//! 两种来源：
//! - `generate`: 每个原子每个笛卡尔分量独立加 N(0, σ²) 位移，
//!   违反最小原子间距的整个样本重新抽取，超过尝试次数即失败
//! - `from_configurations`: 读入用户给定的位移构型（extxyz / POSCAR），
//!   相对理想超胞计算位移
//!
//! 随机数只从调用方传入的生成器抽取，同一种子得到同一训练集。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 使用
//! - 使用 `rand` / `rand_distr` 抽样

use crate::error::{ForceFitError, Result};
use crate::models::{Crystal, TrainingStructure};
use crate::utils::vec3::Vec3;

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// 随机扰动参数
#[derive(Debug, Clone, Copy)]
pub struct RattleSettings {
    /// 构型数量
    pub count: usize,
    /// 位移标准差 (Å)
    pub std: f64,
    /// 允许的最小原子间距 (Å)，≤ 0 表示不检查
    pub min_distance: f64,
    /// 每个样本的最大抽取次数
    pub max_attempts: usize,
}

/// 生成 `count` 个随机扰动构型
pub fn generate<R: Rng>(
    ideal: &Crystal,
    settings: &RattleSettings,
    rng: &mut R,
) -> Result<Vec<TrainingStructure>> {
    if !(settings.std > 0.0) || !settings.std.is_finite() {
        return Err(ForceFitError::validation(
            "rattle_std",
            format!("must be a positive number (got {})", settings.std),
        ));
    }
    if settings.max_attempts == 0 {
        return Err(ForceFitError::validation("max_attempts", "must be at least 1"));
    }

    let normal = Normal::new(0.0, settings.std)
        .map_err(|e| ForceFitError::validation("rattle_std", e.to_string()))?;

    let mut structures = Vec::with_capacity(settings.count);
    for sample in 0..settings.count {
        let mut accepted = None;
        let mut closest = f64::INFINITY;

        for _ in 0..settings.max_attempts {
            let displacements: Vec<Vec3> = (0..ideal.len())
                .map(|_| {
                    [
                        normal.sample(rng),
                        normal.sample(rng),
                        normal.sample(rng),
                    ]
                })
                .collect();
            let structure = ideal.displaced(&displacements)?;

            if settings.min_distance <= 0.0 {
                accepted = Some((structure, displacements));
                break;
            }
            let d = structure.min_distance();
            if d >= settings.min_distance {
                accepted = Some((structure, displacements));
                break;
            }
            closest = closest.min(d);
        }

        let (mut structure, displacements) = accepted.ok_or_else(|| {
            ForceFitError::GenerationError {
                sample,
                reason: format!(
                    "no draw out of {} kept all atoms at least {:.3} Å apart (closest pair {:.3} Å)",
                    settings.max_attempts, settings.min_distance, closest
                ),
            }
        })?;
        structure.name = format!("{}-rattled-{}", ideal.name, sample);
        structures.push(TrainingStructure::new(sample, structure, displacements));
    }

    Ok(structures)
}

/// 由用户给定的位移构型生成训练集
pub fn from_configurations(
    ideal: &Crystal,
    frames: Vec<Crystal>,
    min_distance: f64,
) -> Result<Vec<TrainingStructure>> {
    frames
        .into_iter()
        .enumerate()
        .map(|(sample, frame)| {
            let displacements = frame.displacements_from(ideal)?;
            if min_distance > 0.0 {
                let d = frame.min_distance();
                if d < min_distance {
                    return Err(ForceFitError::GenerationError {
                        sample,
                        reason: format!(
                            "closest pair {:.3} Å is below min_distance {:.3} Å",
                            d, min_distance
                        ),
                    });
                }
            }
            // 统一使用理想超胞的晶格，保证位移与坐标一致
            let structure = ideal.displaced(&displacements)?;
            Ok(TrainingStructure::new(sample, structure, displacements))
        })
        .collect()
}
