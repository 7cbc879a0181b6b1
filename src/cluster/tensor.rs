//! # 笛卡尔张量工具
//!
//! n 阶笛卡尔张量以长度 3^n 的行主序数组存储：
//! 分量 (α1, …, αn) 位于 Σ α_k · 3^(n-1-k)。
//!
//! ## 依赖关系
//! - 被 `cluster/orbit.rs`, `cluster/space.rs`, `fitting/design.rs`, `fc/` 使用

use crate::utils::vec3::Mat3;

/// 3^n
pub fn n_components(order: usize) -> usize {
    3usize.pow(order as u32)
}

/// 扁平序号 → 各轴分量
pub fn unflatten(mut index: usize, order: usize) -> Vec<usize> {
    let mut axes = vec![0; order];
    for k in (0..order).rev() {
        axes[k] = index % 3;
        index /= 3;
    }
    axes
}

/// 各轴分量 → 扁平序号
pub fn flatten(axes: &[usize]) -> usize {
    axes.iter().fold(0, |acc, &a| acc * 3 + a)
}

/// 对每个轴施加旋转: T'[β] = Σ_α Π_k R[β_k][α_k] T[α]
pub fn rotate(tensor: &[f64], rotation: &Mat3, order: usize) -> Vec<f64> {
    let mut current = tensor.to_vec();
    let stride_of = |k: usize| n_components(order - 1 - k);

    for k in 0..order {
        let stride = stride_of(k);
        let mut next = vec![0.0; current.len()];
        for (idx, out) in next.iter_mut().enumerate() {
            let beta = (idx / stride) % 3;
            let base = idx - beta * stride;
            *out = (0..3)
                .map(|a| rotation[beta][a] * current[base + a * stride])
                .sum();
        }
        current = next;
    }
    current
}

/// 轴重排: 结果中第 `target[k]` 轴取自输入的第 k 轴
///
/// 即 out[β'] = T[β]，其中 β'_{target[k]} = β_k。
pub fn permute_axes(tensor: &[f64], target: &[usize], order: usize) -> Vec<f64> {
    let mut out = vec![0.0; tensor.len()];
    let mut moved = vec![0; order];
    for (idx, &value) in tensor.iter().enumerate() {
        let axes = unflatten(idx, order);
        for k in 0..order {
            moved[target[k]] = axes[k];
        }
        out[flatten(&moved)] = value;
    }
    out
}

/// 张量与位移的完全缩并 Σ_α T[α] Π_k u_k[α_k]
pub fn contract_all(tensor: &[f64], vectors: &[&[f64; 3]]) -> f64 {
    let order = vectors.len();
    tensor
        .iter()
        .enumerate()
        .map(|(idx, &t)| {
            if t == 0.0 {
                return 0.0;
            }
            let axes = unflatten(idx, order);
            axes.iter()
                .zip(vectors)
                .fold(t, |acc, (&a, u)| acc * u[a])
        })
        .sum()
}

/// 除第 `skip` 轴外全部缩并，返回第 `skip` 轴上的 3 个分量
pub fn contract_except(tensor: &[f64], vectors: &[&[f64; 3]], skip: usize) -> [f64; 3] {
    let order = vectors.len();
    let mut out = [0.0; 3];
    for (idx, &t) in tensor.iter().enumerate() {
        if t == 0.0 {
            continue;
        }
        let axes = unflatten(idx, order);
        let mut value = t;
        for (k, (&a, u)) in axes.iter().zip(vectors).enumerate() {
            if k != skip {
                value *= u[a];
            }
        }
        out[axes[skip]] += value;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_round_trip() {
        for idx in 0..81 {
            assert_eq!(flatten(&unflatten(idx, 4)), idx);
        }
        assert_eq!(flatten(&[1, 2]), 5);
    }

    #[test]
    fn test_rotate_matrix_matches_r_t_rt() {
        // 绕 z 轴 90°
        let r = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let t: Vec<f64> = (0..9).map(|x| x as f64).collect();
        let rotated = rotate(&t, &r, 2);
        for b1 in 0..3 {
            for b2 in 0..3 {
                let mut expect = 0.0;
                for a1 in 0..3 {
                    for a2 in 0..3 {
                        expect += r[b1][a1] * r[b2][a2] * t[a1 * 3 + a2];
                    }
                }
                assert!((rotated[b1 * 3 + b2] - expect).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_permute_axes_is_transpose_for_order_two() {
        let t: Vec<f64> = (0..9).map(|x| x as f64).collect();
        let p = permute_axes(&t, &[1, 0], 2);
        assert_eq!(p[1], t[3]);
        assert_eq!(p[5], t[7]);
    }

    #[test]
    fn test_contractions() {
        let t: Vec<f64> = (0..9).map(|x| x as f64).collect();
        let u = [1.0, 0.0, 2.0];
        let v = [0.0, 1.0, 1.0];
        // u^T T v
        let expect = 1.0 * (1.0 + 2.0) + 2.0 * (7.0 + 8.0);
        assert!((contract_all(&t, &[&u, &v]) - expect).abs() < 1e-12);
        // T v
        let tv = contract_except(&t, &[&u, &v], 0);
        assert!((tv[0] - 3.0).abs() < 1e-12);
        assert!((tv[1] - 9.0).abs() < 1e-12);
        assert!((tv[2] - 15.0).abs() < 1e-12);
    }
}
