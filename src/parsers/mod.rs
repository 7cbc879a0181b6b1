//! # 解析器模块
//!
//! 提供流水线所需的结构文件解析器。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: poscar, extxyz

pub mod extxyz;
pub mod poscar;

use crate::error::{ForceFitError, Result};
use crate::models::Crystal;
use std::path::Path;

/// 结构文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFormat {
    Poscar,
    ExtXyz,
}

/// 从文件名推断格式
pub fn detect_format(path: &Path) -> Option<StructureFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "vasp" | "poscar" => return Some(StructureFormat::Poscar),
        "xyz" | "extxyz" => return Some(StructureFormat::ExtXyz),
        _ => {}
    }

    // 可能是 POSCAR/CONTCAR (无扩展名)
    let name = path.file_name().and_then(|n| n.to_str())?.to_uppercase();
    if name.starts_with("POSCAR") || name.starts_with("CONTCAR") || name.starts_with("SPOSCAR") {
        Some(StructureFormat::Poscar)
    } else {
        None
    }
}

/// 读取单个结构（extxyz 取第一帧）
pub fn load(path: &Path) -> Result<Crystal> {
    if !path.is_file() {
        return Err(ForceFitError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    match detect_format(path) {
        Some(StructureFormat::Poscar) => poscar::parse_poscar_file(path),
        Some(StructureFormat::ExtXyz) => {
            let mut frames = extxyz::parse_extxyz_file(path)?;
            Ok(frames.swap_remove(0))
        }
        None => Err(ForceFitError::format(
            "structure",
            path.display().to_string(),
            "Cannot determine format (expected POSCAR*, CONTCAR*, *.vasp or *.xyz)",
        )),
    }
}

/// 读取轨迹中的所有结构（POSCAR 视为单帧）
pub fn load_frames(path: &Path) -> Result<Vec<Crystal>> {
    if !path.is_file() {
        return Err(ForceFitError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    match detect_format(path) {
        Some(StructureFormat::ExtXyz) => extxyz::parse_extxyz_file(path),
        _ => load(path).map(|c| vec![c]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(&PathBuf::from("run/POSCAR")),
            Some(StructureFormat::Poscar)
        );
        assert_eq!(
            detect_format(&PathBuf::from("CONTCAR_relaxed")),
            Some(StructureFormat::Poscar)
        );
        assert_eq!(
            detect_format(&PathBuf::from("rattled.xyz")),
            Some(StructureFormat::ExtXyz)
        );
        assert_eq!(detect_format(&PathBuf::from("model.cif")), None);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load(&PathBuf::from("/nonexistent/POSCAR"));
        assert!(matches!(result, Err(ForceFitError::FileNotFound { .. })));
    }
}
