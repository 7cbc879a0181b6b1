//! # VASP POSCAR 格式读写
//!
//! ## 格式说明
//! ```text
//! Comment line (structure name)
//! 1.0                    # scaling factor (负值表示目标体积)
//! a1 a2 a3               # lattice vector a
//! b1 b2 b3               # lattice vector b
//! c1 c2 c3               # lattice vector c
//! Element1 Element2 ...  # element symbols (VASP 5+，可省略)
//! n1 n2 ...              # number of atoms per element
//! Selective dynamics     # optional
//! Direct/Cartesian       # coordinate type
//! x1 y1 z1               # atom positions
//! ```
//!
//! 写出时按连续的同种原子分段（允许元素符号重复出现），
//! 原子顺序与 `Crystal` 完全一致；超胞的原子编号依赖这一点。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 和 `commands/supercell.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{ForceFitError, Result};
use crate::models::{Atom, Crystal, Lattice};
use crate::utils::vec3::{self, Mat3, Vec3};

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// 解析 POSCAR/CONTCAR 文件
pub fn parse_poscar_file(path: &Path) -> Result<Crystal> {
    let content = fs::read_to_string(path).map_err(|e| ForceFitError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("POSCAR");
    parse_poscar_content(&content, stem)
        .map_err(|e| relabel(e, &path.display().to_string()))
}

/// 把内容解析错误中的名字替换为文件路径
fn relabel(err: ForceFitError, path: &str) -> ForceFitError {
    match err {
        ForceFitError::FormatError { reason, .. } => ForceFitError::format("POSCAR", path, reason),
        other => other,
    }
}

/// 逐行读取，记录行号用于报错
struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    label: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(content: &'a str, label: &'a str) -> Self {
        Cursor {
            lines: content.lines().collect(),
            pos: 0,
            label,
        }
    }

    fn error(&self, reason: impl Into<String>) -> ForceFitError {
        ForceFitError::format("POSCAR", self.label, format!("line {}: {}", self.pos, reason.into()))
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).map(|l| l.trim())
    }

    fn next_line(&mut self, what: &str) -> Result<&'a str> {
        let line = self
            .peek()
            .ok_or_else(|| self.error(format!("unexpected end of file, expected {}", what)))?;
        self.pos += 1;
        Ok(line)
    }

    fn next_floats(&mut self, n: usize, what: &str) -> Result<Vec<f64>> {
        let line = self.next_line(what)?;
        let values: Vec<f64> = line
            .split_whitespace()
            .take(n)
            .map_while(|s| s.parse().ok())
            .collect();
        if values.len() < n {
            return Err(self.error(format!("expected {} numbers for {}, got '{}'", n, what, line)));
        }
        Ok(values)
    }

    fn next_vec3(&mut self, what: &str) -> Result<Vec3> {
        let v = self.next_floats(3, what)?;
        Ok([v[0], v[1], v[2]])
    }
}

/// 从字符串内容解析 POSCAR 格式
pub fn parse_poscar_content(content: &str, default_name: &str) -> Result<Crystal> {
    let mut cur = Cursor::new(content, default_name);

    let comment = cur.next_line("comment")?;
    let name = if comment.is_empty() {
        default_name.to_string()
    } else {
        comment.to_string()
    };

    let scale = cur.next_floats(1, "scaling factor")?[0];
    let mut matrix: Mat3 = [
        cur.next_vec3("lattice vector a")?,
        cur.next_vec3("lattice vector b")?,
        cur.next_vec3("lattice vector c")?,
    ];
    let factor = if scale < 0.0 {
        let raw_volume = vec3::det(&matrix).abs();
        if raw_volume < 1e-12 {
            return Err(cur.error("degenerate lattice with a volume scaling factor"));
        }
        (-scale / raw_volume).cbrt()
    } else if scale > 0.0 {
        scale
    } else {
        return Err(cur.error("scaling factor must be non-zero"));
    };
    for row in matrix.iter_mut() {
        *row = vec3::scale(row, factor);
    }
    let lattice = Lattice::from_vectors(matrix);

    // VASP 4 没有元素行，计数行直接跟在晶格之后
    let species_line = cur.next_line("element symbols or atom counts")?;
    let first_is_count = species_line
        .split_whitespace()
        .next()
        .map_or(false, |s| s.parse::<usize>().is_ok());
    let (symbols, count_line) = if first_is_count {
        (None, species_line)
    } else {
        let symbols: Vec<String> = species_line.split_whitespace().map(String::from).collect();
        (Some(symbols), cur.next_line("atom counts")?)
    };
    let counts: Vec<usize> = count_line
        .split_whitespace()
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| cur.error(format!("invalid atom count '{}'", s)))
        })
        .collect::<Result<_>>()?;
    let symbols = symbols
        .unwrap_or_else(|| (1..=counts.len()).map(|i| format!("X{}", i)).collect());
    if symbols.len() != counts.len() {
        return Err(cur.error(format!(
            "{} element symbols but {} atom counts",
            symbols.len(),
            counts.len()
        )));
    }

    if cur.peek().map_or(false, |l| l.to_ascii_lowercase().starts_with('s')) {
        cur.pos += 1;
    }
    let mode = cur.next_line("coordinate mode")?.to_ascii_lowercase();
    let cartesian = mode.starts_with('c') || mode.starts_with('k');

    let total: usize = counts.iter().sum();
    let mut atoms = Vec::with_capacity(total);
    for (symbol, &count) in symbols.iter().zip(&counts) {
        for _ in 0..count {
            let raw = cur.next_vec3("atomic position").map_err(|_| {
                cur.error(format!("expected {} atomic positions, found {}", total, atoms.len()))
            })?;
            let position = if cartesian {
                lattice.to_fractional(&vec3::scale(&raw, factor))
            } else {
                raw
            };
            atoms.push(Atom::new(symbol.clone(), position));
        }
    }

    let mut crystal =
        Crystal::new(name, lattice, atoms).map_err(|e| cur.error(e.to_string()))?;
    crystal.source_format = Some("poscar".to_string());
    Ok(crystal)
}

/// 连续同种原子分段: (元素, 个数)
fn species_runs(crystal: &Crystal) -> Vec<(&str, usize)> {
    let mut runs: Vec<(&str, usize)> = Vec::new();
    for atom in &crystal.atoms {
        match runs.last_mut() {
            Some((element, n)) if *element == atom.element => *n += 1,
            _ => runs.push((atom.element.as_str(), 1)),
        }
    }
    runs
}

/// 将 Crystal 转换为 POSCAR 字符串（Direct 坐标，缩放因子 1）
pub fn to_poscar_string(crystal: &Crystal) -> String {
    let runs = species_runs(crystal);
    let mut out = String::new();

    let _ = writeln!(out, "{}", crystal.name);
    let _ = writeln!(out, "1.0");
    for row in &crystal.lattice.matrix {
        let _ = writeln!(out, "  {:20.14}  {:20.14}  {:20.14}", row[0], row[1], row[2]);
    }
    let symbols: Vec<&str> = runs.iter().map(|(e, _)| *e).collect();
    let counts: Vec<String> = runs.iter().map(|(_, n)| n.to_string()).collect();
    let _ = writeln!(out, "   {}", symbols.join("   "));
    let _ = writeln!(out, "   {}", counts.join("   "));
    let _ = writeln!(out, "Direct");
    for atom in &crystal.atoms {
        let p = atom.position;
        let _ = writeln!(out, "  {:20.16}  {:20.16}  {:20.16}", p[0], p[1], p[2]);
    }
    out
}
