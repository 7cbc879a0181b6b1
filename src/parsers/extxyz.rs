//! # 扩展 XYZ (extxyz) 格式解析器
//!
//! 读取多帧扩展 XYZ 轨迹（周期性结构必须带 `Lattice`），
//! 并能将结构写成单帧 extxyz（外部势函数的输入）。
//!
//! ## 格式说明
//! ```text
//! 2
//! Lattice="5 0 0 0 5 0 0 0 5" Properties=species:S:1:pos:R:3 pbc="T T T"
//! Cs 0.0 0.0 0.0
//! Cl 2.5 2.5 2.5
//! ```
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 和 `potentials/external.rs` 使用
//! - 使用 `regex` 解析注释行中的 key=value 对

use crate::error::{ForceFitError, Result};
use crate::models::{Atom, Crystal, Lattice};

use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_\-]*)\s*=\s*(?:"([^"]*)"|(\S+))"#).unwrap()
});

/// 解析 extxyz 文件中的所有帧
pub fn parse_extxyz_file(path: &Path) -> Result<Vec<Crystal>> {
    let content = fs::read_to_string(path).map_err(|e| ForceFitError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_extxyz_content(
        &content,
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown"),
    )
}

/// 从字符串内容解析所有帧
pub fn parse_extxyz_content(content: &str, default_name: &str) -> Result<Vec<Crystal>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut frames = Vec::new();
    let mut cursor = 0;

    while cursor < lines.len() {
        if lines[cursor].trim().is_empty() {
            cursor += 1;
            continue;
        }

        let frame_name = format!("{}_{}", default_name, frames.len());
        let err = |reason: String| ForceFitError::format("extxyz", frame_name.as_str(), reason);

        let n_atoms: usize = lines[cursor]
            .trim()
            .parse()
            .map_err(|_| err(format!("Invalid atom count '{}'", lines[cursor].trim())))?;

        let comment = lines
            .get(cursor + 1)
            .ok_or_else(|| err("Missing comment line".to_string()))?;
        let info = parse_key_values(comment);

        let lattice_text = info
            .get("lattice")
            .ok_or_else(|| err("Missing Lattice=\"...\" (periodic structure required)".to_string()))?;
        let lattice_values: Vec<f64> = lattice_text
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| err(format!("Invalid Lattice '{}'", lattice_text)))?;
        if lattice_values.len() != 9 {
            return Err(err(format!(
                "Lattice needs 9 numbers, got {}",
                lattice_values.len()
            )));
        }
        let lattice = Lattice::from_vectors([
            [lattice_values[0], lattice_values[1], lattice_values[2]],
            [lattice_values[3], lattice_values[4], lattice_values[5]],
            [lattice_values[6], lattice_values[7], lattice_values[8]],
        ]);

        let (species_col, pos_col) = match info.get("properties") {
            Some(props) => property_columns(props).map_err(err)?,
            None => (0, 1),
        };

        let mut atoms = Vec::with_capacity(n_atoms);
        for k in 0..n_atoms {
            let line = lines.get(cursor + 2 + k).ok_or_else(|| {
                err(format!("expected {} atoms, found {}", n_atoms, k))
            })?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < pos_col + 3 || parts.len() <= species_col {
                return Err(err(format!("Malformed atom line {}", k + 1)));
            }
            let mut cart = [0.0; 3];
            for (d, value) in cart.iter_mut().enumerate() {
                *value = parts[pos_col + d]
                    .parse()
                    .map_err(|_| err(format!("Invalid coordinate on atom line {}", k + 1)))?;
            }
            atoms.push(Atom::new(parts[species_col], lattice.to_fractional(&cart)));
        }

        let mut crystal = Crystal::new(frame_name.clone(), lattice, atoms)
            .map_err(|e| err(e.to_string()))?;
        crystal.source_format = Some("extxyz".to_string());
        frames.push(crystal);

        cursor += 2 + n_atoms;
    }

    if frames.is_empty() {
        return Err(ForceFitError::format(
            "extxyz",
            default_name,
            "File contains no frames",
        ));
    }

    Ok(frames)
}

/// 解析注释行中的 key=value / key="quoted value" 对（键统一小写）
fn parse_key_values(comment: &str) -> HashMap<String, String> {
    KEY_VALUE
        .captures_iter(comment)
        .map(|cap| {
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (cap[1].to_lowercase(), value)
        })
        .collect()
}

/// 从 Properties 描述中找到 species 与 pos 所在的列
fn property_columns(props: &str) -> std::result::Result<(usize, usize), String> {
    let fields: Vec<&str> = props.split(':').collect();
    if fields.len() % 3 != 0 {
        return Err(format!("Malformed Properties '{}'", props));
    }

    let mut column = 0;
    let mut species = None;
    let mut pos = None;
    for chunk in fields.chunks(3) {
        let width: usize = chunk[2]
            .parse()
            .map_err(|_| format!("Malformed Properties '{}'", props))?;
        match chunk[0].to_lowercase().as_str() {
            "species" => species = Some(column),
            "pos" => pos = Some(column),
            _ => {}
        }
        column += width;
    }

    match (species, pos) {
        (Some(s), Some(p)) => Ok((s, p)),
        _ => Err(format!("Properties '{}' lacks species or pos", props)),
    }
}

/// 将结构写成单帧 extxyz 字符串（笛卡尔坐标）
pub fn to_extxyz_string(crystal: &Crystal) -> String {
    let m = crystal.lattice.matrix;
    let mut out = String::new();
    out.push_str(&format!("{}\n", crystal.atoms.len()));
    out.push_str(&format!(
        "Lattice=\"{:.10} {:.10} {:.10} {:.10} {:.10} {:.10} {:.10} {:.10} {:.10}\" \
         Properties=species:S:1:pos:R:3 pbc=\"T T T\"\n",
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2]
    ));
    for (atom, cart) in crystal.atoms.iter().zip(crystal.cartesian_positions()) {
        out.push_str(&format!(
            "{:<3} {:16.10} {:16.10} {:16.10}\n",
            atom.element, cart[0], cart[1], cart[2]
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FRAMES: &str = r#"2
Lattice="5.0 0.0 0.0 0.0 5.0 0.0 0.0 0.0 5.0" Properties=species:S:1:pos:R:3:forces:R:3 energy=-1.5 pbc="T T T"
Cs 0.0 0.0 0.0 0.1 0.0 0.0
Cl 2.5 2.5 2.5 -0.1 0.0 0.0
2
Lattice="5.0 0.0 0.0 0.0 5.0 0.0 0.0 0.0 5.0" Properties=species:S:1:pos:R:3 pbc="T T T"
Cs 0.05 0.0 0.0
Cl 2.5 2.45 2.5
"#;

    #[test]
    fn test_parse_two_frames() {
        let frames = parse_extxyz_content(TWO_FRAMES, "traj").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].atoms[1].element, "Cl");
        assert!((frames[0].atoms[1].position[0] - 0.5).abs() < 1e-12);
        assert!((frames[1].atoms[0].position[0] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_missing_lattice_is_format_error() {
        let content = "1\ncomment only\nAr 0 0 0\n";
        let result = parse_extxyz_content(content, "bad");
        assert!(matches!(result, Err(ForceFitError::FormatError { .. })));
    }

    #[test]
    fn test_truncated_frame_is_format_error() {
        let content = "3\nLattice=\"5 0 0 0 5 0 0 0 5\"\nAr 0 0 0\nAr 1 1 1\n";
        let result = parse_extxyz_content(content, "short");
        assert!(matches!(result, Err(ForceFitError::FormatError { .. })));
    }

    #[test]
    fn test_write_then_parse() {
        let frames = parse_extxyz_content(TWO_FRAMES, "traj").unwrap();
        let text = to_extxyz_string(&frames[1]);
        let back = parse_extxyz_content(&text, "again").unwrap();
        assert_eq!(back.len(), 1);
        for (a, b) in back[0].atoms.iter().zip(&frames[1].atoms) {
            assert_eq!(a.element, b.element);
            for k in 0..3 {
                assert!((a.position[k] - b.position[k]).abs() < 1e-9);
            }
        }
    }
}
