//! # 三维向量与 3x3 矩阵小工具
//!
//! 结构模型、对称性搜索与势函数共用的定长数组运算。
//! 行向量约定：笛卡尔坐标 = 分数坐标 · 晶格矩阵（行为晶格矢量）。
//!
//! ## 依赖关系
//! - 被 `models/`, `cluster/`, `potentials/` 使用
//! - 无外部模块依赖

pub type Vec3 = [f64; 3];
pub type Mat3 = [[f64; 3]; 3];

pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: &Vec3) -> f64 {
    dot(a, a).sqrt()
}

pub fn add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: &Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// 行向量左乘矩阵：v · M
pub fn vec_mat(v: &Vec3, m: &Mat3) -> Vec3 {
    [
        v[0] * m[0][0] + v[1] * m[1][0] + v[2] * m[2][0],
        v[0] * m[0][1] + v[1] * m[1][1] + v[2] * m[2][1],
        v[0] * m[0][2] + v[1] * m[1][2] + v[2] * m[2][2],
    ]
}

/// 矩阵右乘列向量：M · v
pub fn mat_vec(m: &Mat3, v: &Vec3) -> Vec3 {
    [dot(&m[0], v), dot(&m[1], v), dot(&m[2], v)]
}

pub fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

pub fn transpose(m: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[j][i];
        }
    }
    out
}

pub fn det(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// 3x3 矩阵求逆，奇异时返回 None
pub fn inverse(m: &Mat3) -> Option<Mat3> {
    let d = det(m);
    if d.abs() < 1e-12 {
        return None;
    }

    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / d,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / d,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / d,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / d,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / d,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / d,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / d,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / d,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / d,
        ],
    ])
}

/// 整数矩阵行列式
pub fn det_i(m: &[[i32; 3]; 3]) -> i64 {
    let m: [[i64; 3]; 3] = [
        [m[0][0] as i64, m[0][1] as i64, m[0][2] as i64],
        [m[1][0] as i64, m[1][1] as i64, m[1][2] as i64],
        [m[2][0] as i64, m[2][1] as i64, m[2][2] as i64],
    ];
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// 整数矩阵的伴随矩阵，满足 M · adj(M) = det(M) · I
pub fn adjugate_i(m: &[[i32; 3]; 3]) -> [[i64; 3]; 3] {
    let m: [[i64; 3]; 3] = [
        [m[0][0] as i64, m[0][1] as i64, m[0][2] as i64],
        [m[1][0] as i64, m[1][1] as i64, m[1][2] as i64],
        [m[2][0] as i64, m[2][1] as i64, m[2][2] as i64],
    ];
    [
        [
            m[1][1] * m[2][2] - m[1][2] * m[2][1],
            m[0][2] * m[2][1] - m[0][1] * m[2][2],
            m[0][1] * m[1][2] - m[0][2] * m[1][1],
        ],
        [
            m[1][2] * m[2][0] - m[1][0] * m[2][2],
            m[0][0] * m[2][2] - m[0][2] * m[2][0],
            m[0][2] * m[1][0] - m[0][0] * m[1][2],
        ],
        [
            m[1][0] * m[2][1] - m[1][1] * m[2][0],
            m[0][1] * m[2][0] - m[0][0] * m[2][1],
            m[0][0] * m[1][1] - m[0][1] * m[1][0],
        ],
    ]
}

/// 将分数坐标分量折回 [0, 1)
pub fn wrap_frac(x: f64) -> f64 {
    let w = x - x.floor();
    if w >= 1.0 - 1e-12 {
        0.0
    } else {
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_round_trip() {
        let m = [[2.0, 1.0, 0.0], [0.0, 3.0, 1.0], [1.0, 0.0, 4.0]];
        let inv = inverse(&m).unwrap();
        let id = mat_mul(&m, &inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((id[i][j] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_adjugate_identity() {
        let m = [[2, 1, 0], [0, 3, 1], [1, 0, 4]];
        let adj = adjugate_i(&m);
        let d = det_i(&m);
        for i in 0..3 {
            for j in 0..3 {
                let v: i64 = (0..3).map(|k| m[i][k] as i64 * adj[k][j]).sum();
                assert_eq!(v, if i == j { d } else { 0 });
            }
        }
    }

    #[test]
    fn test_wrap_frac() {
        assert_eq!(wrap_frac(1.25), 0.25);
        assert_eq!(wrap_frac(-0.25), 0.75);
        assert_eq!(wrap_frac(0.9999999999999999), 0.0);
    }
}
