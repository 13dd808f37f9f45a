/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the NEAR WASM Optimizer.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! External text/binary tools.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;

/// Features the runtime is built with; every assembler and optimizer run
/// must accept them.
pub const FEATURE_FLAGS: &[&str] = &["--enable-nontrapping-float-to-int", "--enable-sign-ext"];

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} not found at {path}")]
    NotFound { tool: String, path: PathBuf },
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed with {status}")]
    Failed { tool: String, status: ExitStatus },
    #[error("{0}")]
    Other(String),
}

/// Binary <-> text conversion and size optimization.
pub trait Toolchain {
    fn disassemble(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
    fn assemble(&self, input: &Path, output: &Path, debug_info: bool) -> Result<(), ToolError>;
    fn optimize(&self, input: &Path, output: &Path, debug_info: bool) -> Result<(), ToolError>;
}

/// Binaryen's `wasm-dis`, `wasm-as` and `wasm-opt`, taken from `bin_dir`
/// or from `PATH` when no directory is configured.
#[derive(Debug, Clone, Default)]
pub struct Binaryen {
    bin_dir: Option<PathBuf>,
}

impl Binaryen {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Binaryen { bin_dir }
    }

    fn program(&self, tool: &str) -> Result<PathBuf, ToolError> {
        let file = format!("{}{}", tool, std::env::consts::EXE_SUFFIX);
        match &self.bin_dir {
            None => Ok(PathBuf::from(file)),
            Some(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(ToolError::NotFound {
                        tool: tool.to_string(),
                        path,
                    })
                }
            }
        }
    }

    fn run(&self, tool: &str, args: Vec<OsString>) -> Result<(), ToolError> {
        let program = self.program(tool)?;
        log::info!(
            "{} {}",
            tool,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let status = Command::new(&program)
            .args(&args)
            .status()
            .map_err(|source| ToolError::Launch {
                tool: tool.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(ToolError::Failed {
                tool: tool.to_string(),
                status,
            });
        }
        Ok(())
    }
}

fn io_args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![input.into(), "-o".into(), output.into()]
}

fn disassemble_args(input: &Path, output: &Path) -> Vec<OsString> {
    io_args(input, output)
}

fn assemble_args(input: &Path, output: &Path, debug_info: bool) -> Vec<OsString> {
    let mut args = Vec::new();
    if debug_info {
        args.push("-g".into());
    }
    args.extend(io_args(input, output));
    args.extend(FEATURE_FLAGS.iter().map(OsString::from));
    args
}

fn optimize_args(input: &Path, output: &Path, debug_info: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-Oz".into()];
    args.extend(io_args(input, output));
    args.extend(FEATURE_FLAGS.iter().map(OsString::from));
    if debug_info {
        args.push("-g".into());
    }
    args
}

impl Toolchain for Binaryen {
    fn disassemble(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.run("wasm-dis", disassemble_args(input, output))
    }

    fn assemble(&self, input: &Path, output: &Path, debug_info: bool) -> Result<(), ToolError> {
        self.run("wasm-as", assemble_args(input, output, debug_info))
    }

    fn optimize(&self, input: &Path, output: &Path, debug_info: bool) -> Result<(), ToolError> {
        self.run("wasm-opt", optimize_args(input, output, debug_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_lines() {
        let (i, o) = (Path::new("in.wat"), Path::new("out.wasm"));
        assert_eq!(strings(disassemble_args(i, o)), ["in.wat", "-o", "out.wasm"]);
        assert_eq!(
            strings(assemble_args(i, o, true)),
            [
                "-g",
                "in.wat",
                "-o",
                "out.wasm",
                "--enable-nontrapping-float-to-int",
                "--enable-sign-ext"
            ]
        );
        assert_eq!(
            strings(optimize_args(i, o, false)),
            [
                "-Oz",
                "in.wat",
                "-o",
                "out.wasm",
                "--enable-nontrapping-float-to-int",
                "--enable-sign-ext"
            ]
        );
        assert_eq!(strings(optimize_args(i, o, true)).last().unwrap(), "-g");
    }

    #[test]
    fn test_missing_tool_in_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Binaryen::new(Some(dir.path().to_path_buf()));
        let err = tools
            .disassemble(Path::new("a.wasm"), Path::new("a.wat"))
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { ref tool, .. } if tool == "wasm-dis"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("wasm-opt");
        std::fs::write(&script, "#!/bin/sh\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tools = Binaryen::new(Some(dir.path().to_path_buf()));
        let err = tools
            .optimize(Path::new("a.wasm"), Path::new("b.wasm"), false)
            .unwrap_err();
        match err {
            ToolError::Failed { status, .. } => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected error: {}", other),
        }
    }
}
