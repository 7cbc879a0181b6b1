//! # 外部命令势函数
//!
//! 用于机器学习势等无法在进程内计算的模型：每次计算启动一次外部命令，
//! 结构以单帧 extxyz 写入 stdin，模型文件路径作为最后一个参数传入。
//!
//! ## stdout 约定
//! ```text
//! -123.456          # 总能量 (eV)
//! fx fy fz          # 原子 1 受力 (eV/Å)
//! ...               # 共 N 行，顺序与输入一致
//! ```
//! 非零退出码或输出不完整都视为该构型计算失败。
//! 输入由单独线程写入，避免子进程先写满 stdout 管道时双方互相等待。
//! 该势函数不被工作线程共享：每个工作线程 fork 出自己的实例。
//!
//! ## 依赖关系
//! - 被 `potentials/mod.rs` 使用
//! - 使用 `parsers/extxyz.rs` 生成输入

use super::PotentialEvaluator;
use crate::error::{ForceFitError, Result};
use crate::models::{Crystal, Evaluation};
use crate::parsers::extxyz::to_extxyz_string;

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// 外部命令势函数
#[derive(Debug, Clone)]
pub struct ExternalPotential {
    program: String,
    args: Vec<String>,
    model: PathBuf,
}

impl ExternalPotential {
    /// `command` 按空白切分为程序名与参数
    pub fn new(command: &str, model: PathBuf) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            ForceFitError::ConfigError("potential_command is empty".to_string())
        })?;
        Ok(ExternalPotential {
            program,
            args: parts.collect(),
            model,
        })
    }

    fn io_error(&self, what: &str, source: std::io::Error) -> ForceFitError {
        ForceFitError::EvaluationError {
            sample: 0,
            reason: format!("{} '{}'", what, self.program),
            source: Some(source),
        }
    }

    fn run(&self, input: String) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.io_error("cannot start", e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ForceFitError::evaluation("stdin of the potential command is not piped"))?;
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .map_err(|e| self.io_error("did not finish", e))?;
        let written = writer
            .join()
            .map_err(|_| ForceFitError::evaluation("stdin writer thread panicked"))?;

        if !output.status.success() {
            return Err(ForceFitError::evaluation(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written.map_err(|e| self.io_error("cannot write the structure to", e))?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// 解析外部命令的输出
fn parse_output(stdout: &str, n_atoms: usize) -> Result<Evaluation> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());

    let energy: f64 = lines
        .next()
        .ok_or_else(|| ForceFitError::evaluation("empty output"))?
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ForceFitError::evaluation("first output line is not an energy"))?;

    let mut forces = Vec::with_capacity(n_atoms);
    for (k, line) in lines.take(n_atoms).enumerate() {
        let values: Vec<f64> = line
            .split_whitespace()
            .take(3)
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| ForceFitError::evaluation(format!("invalid force line {}", k + 1)))?;
        if values.len() != 3 {
            return Err(ForceFitError::evaluation(format!("invalid force line {}", k + 1)));
        }
        forces.push([values[0], values[1], values[2]]);
    }

    if forces.len() != n_atoms {
        return Err(ForceFitError::evaluation(format!(
            "expected {} force lines, got {}",
            n_atoms,
            forces.len()
        )));
    }
    if !energy.is_finite() || forces.iter().flatten().any(|f| !f.is_finite()) {
        return Err(ForceFitError::evaluation("non-finite energy or force"));
    }

    Ok(Evaluation { energy, forces })
}

impl PotentialEvaluator for ExternalPotential {
    fn name(&self) -> String {
        format!("external ({} {})", self.program, self.model.display())
    }

    fn evaluate(&self, structure: &Crystal) -> Result<Evaluation> {
        let stdout = self.run(to_extxyz_string(structure))?;
        parse_output(&stdout, structure.len())
    }

    fn is_shareable(&self) -> bool {
        false
    }

    fn fork(&self) -> Box<dyn PotentialEvaluator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Lattice};
    use std::fs;

    fn dimer() -> Crystal {
        Crystal::new(
            "dimer",
            Lattice::cubic(10.0),
            vec![
                Atom::new("Ar", [0.0, 0.0, 0.0]),
                Atom::new("Ar", [0.3, 0.0, 0.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_output() {
        let eval = parse_output("-1.5\n0.1 0.0 0.0\n-0.1 0.0 0.0\n", 2).unwrap();
        assert!((eval.energy + 1.5).abs() < 1e-12);
        assert!((eval.forces[1][0] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_parse_output_truncated() {
        assert!(parse_output("-1.5\n0.1 0.0 0.0\n", 2).is_err());
        assert!(parse_output("", 2).is_err());
        assert!(parse_output("abc\n", 0).is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        let result = ExternalPotential::new("   ", PathBuf::from("model.bin"));
        assert!(matches!(result, Err(ForceFitError::ConfigError(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_model.sh");
        fs::write(
            &script,
            "cat > /dev/null\necho -2.25\necho 0.5 0 0\necho -0.5 0 0\n",
        )
        .unwrap();
        let model = dir.path().join("model.bin");
        fs::write(&model, "weights").unwrap();

        let pot = ExternalPotential::new(&format!("sh {}", script.display()), model).unwrap();
        assert!(!pot.is_shareable());
        let eval = pot.evaluate(&dimer()).unwrap();
        assert!((eval.energy + 2.25).abs() < 1e-12);
        assert_eq!(eval.forces.len(), 2);
        assert!((eval.forces[0][0] - 0.5).abs() < 1e-12);
    }

    /// 子进程先写满 stdout 再读 stdin，双方都超过管道缓冲区
    #[cfg(unix)]
    #[test]
    fn test_large_structure_does_not_block() {
        let side = 16;
        let mut atoms = Vec::new();
        for i in 0..side {
            for j in 0..side {
                for k in 0..side {
                    let f = |x: usize| x as f64 / side as f64;
                    atoms.push(Atom::new("Ar", [f(i), f(j), f(k)]));
                }
            }
        }
        let n = atoms.len();
        let crystal = Crystal::new("grid", Lattice::cubic(64.0), atoms).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("chatty_model.sh");
        fs::write(
            &script,
            format!(
                "echo -1.0\ni=0\nwhile [ $i -lt {} ]; do\n  echo 0.000000000000 0.000000000000 0.000000000000\n  i=$((i+1))\ndone\ncat > /dev/null\n",
                n
            ),
        )
        .unwrap();
        let model = dir.path().join("model.bin");
        fs::write(&model, "weights").unwrap();

        let pot = ExternalPotential::new(&format!("sh {}", script.display()), model).unwrap();
        let eval = pot.evaluate(&crystal).unwrap();
        assert_eq!(eval.forces.len(), n);
    }

    #[test]
    fn test_missing_program_is_evaluation_failure() {
        let pot = ExternalPotential::new(
            "forcefit-definitely-missing-binary",
            PathBuf::from("model.bin"),
        )
        .unwrap();
        match pot.evaluate(&dimer()) {
            Err(err @ ForceFitError::EvaluationError { .. }) => {
                assert!(std::error::Error::source(&err).is_some());
            }
            other => panic!("unexpected result {:?}", other.map(|e| e.energy)),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken_model.sh");
        fs::write(&script, "cat > /dev/null\necho 'weights corrupt' >&2\nexit 3\n").unwrap();
        let pot = ExternalPotential::new(&format!("sh {}", script.display()), dir.path().join("m"))
            .unwrap();
        match pot.evaluate(&dimer()) {
            Err(ForceFitError::EvaluationError { reason, .. }) => {
                assert!(reason.contains("weights corrupt"))
            }
            other => panic!("unexpected result {:?}", other.map(|e| e.energy)),
        }
    }
}
