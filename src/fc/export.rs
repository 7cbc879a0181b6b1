//! # 力常数输出
//!
//! - 二阶: phonopy `FORCE_CONSTANTS` 文本（首行 `N N`，每对原子一行 `i j` 加 3×3 分块）
//! - 高阶: NumPy `.npy` v1.0（小端 float64，形状 `(N,)*n + (3,)*n`）
//! - 三阶: ShengBTE `FORCE_CONSTANTS_3RD`（需要超胞映射）
//! - 模型: `model.json`
//!
//! 所有写入先落到目标目录中的临时文件，成功后原子重命名。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs`, `commands/check.rs` 使用
//! - 使用 `tempfile` 实现原子写入，`regex` 解析 npy 头

use super::tensor::ForceConstantsTensor;
use crate::error::{ForceFitError, Result};
use crate::fitting::FittedModel;
use crate::models::{Crystal, SupercellMap};
use crate::utils::vec3;

use regex::Regex;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::NamedTempFile;

pub const FORCE_CONSTANTS: &str = "FORCE_CONSTANTS";
pub const FORCE_CONSTANTS_3RD: &str = "FORCE_CONSTANTS_3RD";
pub const MODEL_JSON: &str = "model.json";

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

static NPY_DESCR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'descr':\s*'([^']*)'").unwrap());
static NPY_FORTRAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'fortran_order':\s*(True|False)").unwrap());
static NPY_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'shape':\s*\(([^)]*)\)").unwrap());

/// 阶数对应的默认文件名
pub fn file_name(order: usize) -> String {
    if order == 2 {
        FORCE_CONSTANTS.to_string()
    } else {
        format!("fc{}.npy", order)
    }
}

/// 原子写入：写临时文件后重命名到 `path`
pub fn write_atomic(path: &Path, write: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> Result<()> {
    let write_error = |source: io::Error| ForceFitError::FileWriteError {
        path: path.display().to_string(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir).map_err(write_error)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer).map_err(write_error)?;
        writer.flush().map_err(write_error)?;
    }
    temp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

/// 按阶数写入 `output_dir`，返回文件路径
pub fn write(fc: &ForceConstantsTensor, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(file_name(fc.order));
    if fc.order == 2 {
        write_force_constants(fc, &path)?;
    } else {
        write_npy(fc, &path)?;
    }
    Ok(path)
}

// ─────────────────────────────────────────────────────────────
// phonopy FORCE_CONSTANTS
// ─────────────────────────────────────────────────────────────

pub fn write_force_constants(fc: &ForceConstantsTensor, path: &Path) -> Result<()> {
    if fc.order != 2 {
        return Err(ForceFitError::validation(
            "force constants",
            format!("FORCE_CONSTANTS holds order 2, got order {}", fc.order),
        ));
    }

    write_atomic(path, |w| {
        writeln!(w, "{:4} {:4}", fc.n_atoms, fc.n_atoms)?;
        fc.try_for_each_dense_block(|atoms, block| -> io::Result<()> {
            writeln!(w, "{} {}", atoms[0] + 1, atoms[1] + 1)?;
            for row in block.chunks_exact(3) {
                writeln!(w, "{:22.15}{:22.15}{:22.15}", row[0], row[1], row[2])?;
            }
            Ok(())
        })
    })
}

pub fn read_force_constants(path: &Path) -> Result<ForceConstantsTensor> {
    let content = fs::read_to_string(path).map_err(|e| ForceFitError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_force_constants(&content, &path.display().to_string())
}

fn parse_force_constants(content: &str, path: &str) -> Result<ForceConstantsTensor> {
    let err = |line: usize, reason: String| {
        ForceFitError::format("FORCE_CONSTANTS", path, format!("line {}: {}", line, reason))
    };

    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (no, header) = lines
        .next()
        .ok_or_else(|| ForceFitError::format("FORCE_CONSTANTS", path, "file is empty"))?;
    let dims: Vec<usize> = header
        .split_whitespace()
        .map(|t| t.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| err(no, format!("invalid header '{}': {}", header, e)))?;
    let n = match dims.as_slice() {
        [n] => *n,
        [a, b] if a == b => *a,
        [a, b] => {
            return Err(err(
                no,
                format!("compact format ({} x {}) is not supported", a, b),
            ))
        }
        _ => return Err(err(no, format!("invalid header '{}'", header))),
    };

    let mut data = vec![0.0; n * n * 9];
    for _ in 0..n * n {
        let (no, pair) = lines
            .next()
            .ok_or_else(|| err(no, "unexpected end of file".to_string()))?;
        let indices: Vec<usize> = pair
            .split_whitespace()
            .map(|t| t.parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| err(no, format!("invalid atom pair '{}': {}", pair, e)))?;
        let (i, j) = match indices.as_slice() {
            [i, j] if (1..=n).contains(i) && (1..=n).contains(j) => (i - 1, j - 1),
            _ => return Err(err(no, format!("invalid atom pair '{}'", pair))),
        };

        let base = (i * n + j) * 9;
        for row in 0..3 {
            let (no, line) = lines
                .next()
                .ok_or_else(|| err(no, "unexpected end of file".to_string()))?;
            let values: Vec<f64> = line
                .split_whitespace()
                .map(|t| t.parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| err(no, format!("invalid number: {}", e)))?;
            if values.len() != 3 {
                return Err(err(no, format!("expected 3 values, got {}", values.len())));
            }
            data[base + row * 3..base + row * 3 + 3].copy_from_slice(&values);
        }
    }

    ForceConstantsTensor::from_dense(2, n, &data)
}

// ─────────────────────────────────────────────────────────────
// NumPy .npy
// ─────────────────────────────────────────────────────────────

fn npy_header(shape: &[usize]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_text = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
        shape_text
    );
    // magic(6) + version(2) + len(2) + dict + '\n' 对齐到 64 字节
    let unpadded = 10 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    dict.push_str(&" ".repeat(padding));
    dict.push('\n');

    let mut header = Vec::with_capacity(10 + dict.len());
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

pub fn write_npy(fc: &ForceConstantsTensor, path: &Path) -> Result<()> {
    let header = npy_header(&fc.shape());
    write_atomic(path, |w| {
        w.write_all(&header)?;
        fc.try_for_each_dense_block(|_, block| -> io::Result<()> {
            block.iter().try_for_each(|v| w.write_all(&v.to_le_bytes()))
        })
    })
}

/// 读取 float64 C 序 npy，返回 (形状, 数据)
pub fn read_npy(path: &Path) -> Result<(Vec<usize>, Vec<f64>)> {
    let bytes = fs::read(path).map_err(|e| ForceFitError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    let p = path.display().to_string();
    let err = |reason: &str| ForceFitError::format("npy", p.as_str(), reason);

    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(err("missing NUMPY magic"));
    }
    let (header_len, start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        v => return Err(err(&format!("unsupported npy version {}", v))),
    };
    let header = bytes
        .get(start..start + header_len)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| err("truncated header"))?;

    match NPY_DESCR.captures(header).map(|c| c[1].to_string()) {
        Some(d) if d == "<f8" || d == "f8" => {}
        Some(d) => return Err(err(&format!("unsupported dtype '{}', expected '<f8'", d))),
        None => return Err(err("header has no descr")),
    }
    if NPY_FORTRAN.captures(header).map(|c| c[1].to_string()).as_deref() != Some("False") {
        return Err(err("only C-ordered arrays are supported"));
    }
    let shape: Vec<usize> = NPY_SHAPE
        .captures(header)
        .ok_or_else(|| err("header has no shape"))?[1]
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| err("invalid shape"))?;

    let expected: usize = shape.iter().product();
    let body = &bytes[start + header_len..];
    if body.len() != expected * 8 {
        return Err(err(&format!(
            "data holds {} bytes, shape {:?} needs {}",
            body.len(),
            shape,
            expected * 8
        )));
    }
    let data = body
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Ok((shape, data))
}

/// 读取 `fcN.npy` 为力常数张量
pub fn read_npy_tensor(path: &Path) -> Result<ForceConstantsTensor> {
    let (shape, data) = read_npy(path)?;
    let order = shape.len() / 2;
    let valid = shape.len() >= 4
        && shape.len() % 2 == 0
        && shape[..order].iter().all(|&d| d == shape[0])
        && shape[order..].iter().all(|&d| d == 3);
    if !valid {
        return Err(ForceFitError::format(
            "npy",
            path.display().to_string(),
            format!("shape {:?} is not (N,)*n + (3,)*n", shape),
        ));
    }
    ForceConstantsTensor::from_dense(order, shape[0], &data)
}

// ─────────────────────────────────────────────────────────────
// ShengBTE FORCE_CONSTANTS_3RD
// ─────────────────────────────────────────────────────────────

/// 写出 ShengBTE 三阶力常数
///
/// 每个分块的第一个原子位于原点原胞；第二、三个原子取最小像，
/// 以其所在原胞的笛卡尔平移 (Å) 记录。
pub fn write_shengbte_third(
    fc: &ForceConstantsTensor,
    supercell: &Crystal,
    map: &SupercellMap,
    path: &Path,
) -> Result<()> {
    if fc.order != 3 {
        return Err(ForceFitError::validation(
            "force constants",
            format!("FORCE_CONSTANTS_3RD holds order 3, got order {}", fc.order),
        ));
    }
    if map.prim_index.len() != fc.n_atoms || supercell.len() != fc.n_atoms {
        return Err(ForceFitError::validation(
            "supercell map",
            format!(
                "map covers {} atoms, the tensor has {}",
                map.prim_index.len(),
                fc.n_atoms
            ),
        ));
    }

    let prim = &map.primitive;
    let prim_cart = prim.cartesian_positions();
    let cart = supercell.cartesian_positions();
    // 原子 j 相对原子 i 的最小像所在原胞平移
    let translation = |i: usize, j: usize| -> [f64; 3] {
        let unwrapped = vec3::add(&cart[i], &supercell.min_image_vector(i, j));
        let shift = vec3::sub(&unwrapped, &prim_cart[map.prim_index[j]]);
        let frac = prim.lattice.to_fractional(&shift);
        prim.lattice
            .to_cartesian(&[frac[0].round(), frac[1].round(), frac[2].round()])
    };

    let blocks: Vec<(&Vec<usize>, &Vec<f64>)> = fc
        .blocks()
        .filter(|(atoms, block)| map.cell[atoms[0]] == [0, 0, 0] && block.iter().any(|&v| v != 0.0))
        .collect();

    write_atomic(path, |w| {
        writeln!(w, "{}", blocks.len())?;
        for (n, (atoms, block)) in blocks.iter().enumerate() {
            let (i, j, k) = (atoms[0], atoms[1], atoms[2]);
            let r2 = translation(i, j);
            let r3 = translation(i, k);
            writeln!(w)?;
            writeln!(w, "{}", n + 1)?;
            writeln!(w, "{:14.8} {:14.8} {:14.8}", r2[0], r2[1], r2[2])?;
            writeln!(w, "{:14.8} {:14.8} {:14.8}", r3[0], r3[1], r3[2])?;
            writeln!(
                w,
                "{:5} {:5} {:5}",
                map.prim_index[i] + 1,
                map.prim_index[j] + 1,
                map.prim_index[k] + 1
            )?;
            for (idx, value) in block.iter().enumerate() {
                let (a, b, c) = (idx / 9, (idx / 3) % 3, idx % 3);
                writeln!(w, "{} {} {} {:20.10e}", a + 1, b + 1, c + 1, value)?;
            }
        }
        Ok(())
    })
}

// ─────────────────────────────────────────────────────────────
// model.json
// ─────────────────────────────────────────────────────────────

pub fn write_model(model: &FittedModel, path: &Path) -> Result<()> {
    let text = model.to_json()?;
    write_atomic(path, |w| w.write_all(text.as_bytes()))
}

#[cfg(test)]
pub fn read_model(path: &Path) -> Result<FittedModel> {
    let text = fs::read_to_string(path).map_err(|e| ForceFitError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(FittedModel::from_json(&text)?)
}
