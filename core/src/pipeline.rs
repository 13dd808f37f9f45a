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
 *
 * End-to-end optimization of a runtime binary.
 *
 * Stages run strictly in order. Every intermediate artifact lands in the
 * build directory so a failed run can be inspected where it stopped.
 */

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::compile::{compile_to_bytecode, CompileError};
use crate::compress::{compress_data_segments, CompressError, CompressionReport};
use crate::config::Options;
use crate::entry_points::{add_entry_point_shims, module_name_for, EntryPointScanner, EntryPoints};
use crate::instrument::instrument;
use crate::packer::{collect_modules, EmbeddedModules, PackError};
use crate::sandbox::{Sandbox, SandboxError, TraceLog};
use crate::sexpr::{self, Node, ParseError};
use crate::strip::{strip_functions, write_manifests, StripPolicy};
use crate::tools::{ToolError, Toolchain};
use crate::tracer;

pub const DISASSEMBLED_WAT: &str = "python.wat";
pub const INSTRUMENTED_WAT: &str = "python-instrumented.wat";
pub const INSTRUMENTED_WASM: &str = "python-instrumented.wasm";
pub const MODIFIED_WAT: &str = "python-modified.wat";
pub const OPTIMIZED_WASM: &str = "python-optimized.wasm";
pub const OPTIMIZED_WAT: &str = "python-optimized.wat";
pub const COMPRESSED_WAT: &str = "python-compressed.wat";
pub const COMPRESSED_WASM: &str = "python-compressed.wasm";

// =============================================================================
// Stages & Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Disassembled,
    Instrumented,
    Traced,
    Stripped,
    Reoptimized,
    Compressed,
    Verified,
    Published,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Disassembled => "disassemble",
            Stage::Instrumented => "instrument",
            Stage::Traced => "trace",
            Stage::Stripped => "strip",
            Stage::Reoptimized => "reoptimize",
            Stage::Compressed => "compress",
            Stage::Verified => "verify",
            Stage::Published => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Tool(#[from] ToolError),
    #[error("{0}")]
    Sandbox(#[from] SandboxError),
    #[error("{0}")]
    Pack(#[from] PackError),
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Compress(#[from] CompressError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StageError + '_ {
    move |source| StageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub error: StageError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<StageError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError {
            stage,
            error: e.into(),
        })
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub entry_points: EntryPoints,
    pub trace: TraceLog,
    pub removed: BTreeSet<String>,
    pub retained: BTreeSet<String>,
    pub packed_modules: Vec<String>,
    pub compression: Option<CompressionReport>,
    pub output: PathBuf,
}

// =============================================================================
// Pipeline
// =============================================================================

struct Pipeline<'a> {
    options: &'a Options,
    tools: &'a dyn Toolchain,
    scanner: Option<&'a dyn EntryPointScanner>,
}

/// Runs every stage and copies the final binary to `options.output`.
pub fn optimize(
    options: &Options,
    tools: &dyn Toolchain,
    scanner: Option<&dyn EntryPointScanner>,
) -> Result<PipelineReport, PipelineError> {
    Pipeline {
        options,
        tools,
        scanner,
    }
    .run()
}

impl Pipeline<'_> {
    fn path(&self, file: &str) -> PathBuf {
        self.options.build_path(file)
    }

    fn run(&self) -> Result<PipelineReport, PipelineError> {
        let (module, wasm) = self.disassemble().at(Stage::Disassembled)?;
        let entry_points = self.compile_contracts(&wasm).at(Stage::Instrumented)?;
        log::info!(
            "entry points: {}",
            entry_points.names().collect::<Vec<_>>().join(", ")
        );
        self.build_instrumented(&module, &entry_points)
            .at(Stage::Instrumented)?;

        let trace = self.trace(&entry_points).at(Stage::Traced)?;
        log::info!(
            "loaded frozen modules: {:?}, builtin modules: {:?}",
            trace.loaded_frozen_modules,
            trace.loaded_builtin_modules
        );

        let stripped = self
            .strip(&module, &entry_points, &trace)
            .at(Stage::Stripped)?;

        let optimized = self.reoptimize().at(Stage::Reoptimized)?;

        let (final_wasm, compression) = if self.options.compression {
            let (path, report) = self.compress(&optimized).at(Stage::Compressed)?;
            (path, Some(report))
        } else {
            (self.path(OPTIMIZED_WASM), None)
        };

        if self.options.verify {
            self.verify(&final_wasm, &entry_points).at(Stage::Verified)?;
        }

        let output = &self.options.output;
        log::info!("copying {} to {}", final_wasm.display(), output.display());
        fs::copy(&final_wasm, output)
            .map_err(io_error(output))
            .at(Stage::Published)?;

        Ok(PipelineReport {
            entry_points,
            trace,
            removed: stripped.removed,
            retained: stripped.retained,
            packed_modules: stripped.packed_modules,
            compression,
            output: output.clone(),
        })
    }

    fn disassemble(&self) -> Result<(Node, Vec<u8>), StageError> {
        let build_dir = &self.options.build_dir;
        fs::create_dir_all(build_dir).map_err(io_error(build_dir))?;

        let wat_path = self.path(DISASSEMBLED_WAT);
        self.tools.disassemble(&self.options.input, &wat_path)?;
        log::info!("reading {}", wat_path.display());
        let module = sexpr::read_file(&wat_path)?;
        let wasm = fs::read(&self.options.input).map_err(io_error(&self.options.input))?;
        Ok((module, wasm))
    }

    /// Compiles each contract source beside itself as `.pyc` and gathers the
    /// entry points, either from the override list or the scanner.
    fn compile_contracts(&self, wasm: &[u8]) -> Result<EntryPoints, StageError> {
        let mut entry_points: EntryPoints = self
            .options
            .contract_exports
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(path) = &self.options.entry_points_file {
            let text = fs::read_to_string(path).map_err(io_error(path))?;
            let listed = EntryPoints::from_json(&text).map_err(|source| StageError::Json {
                path: path.display().to_string(),
                source,
            })?;
            entry_points.extend(listed);
        }
        let scan = entry_points.is_empty();

        let user_lib = &self.options.user_lib_dir;
        let sources = contract_sources(user_lib)?;
        if sources.is_empty() {
            return Ok(entry_points);
        }

        let mut modules = EmbeddedModules::new();
        collect_modules(
            &mut modules,
            None,
            self.options.stdlib_zip.as_deref(),
            user_lib,
        )?;
        let mut compiler = Sandbox::new(wasm)?;

        for (path, relative) in sources {
            let source = fs::read_to_string(&path).map_err(io_error(&path))?;
            if scan {
                match self.scanner {
                    Some(scanner) => {
                        let found = scanner.scan(&source);
                        entry_points.extend(found.qualified(&module_name_for(&relative)));
                    }
                    None => log::warn!("no entry point scanner, {} exports nothing", relative),
                }
            }

            let pyc_path = path.with_extension("pyc");
            log::info!("compiling {} to {}", path.display(), pyc_path.display());
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative.clone());
            let bytecode = compile_to_bytecode(&mut compiler, &modules, &source, &filename)?;
            fs::write(&pyc_path, bytecode).map_err(io_error(&pyc_path))?;
            compiler.reset()?;
        }
        Ok(entry_points)
    }

    fn build_instrumented(&self, module: &Node, entry_points: &EntryPoints) -> Result<(), StageError> {
        let mut modules = EmbeddedModules::new();
        collect_modules(
            &mut modules,
            None,
            self.options.stdlib_zip.as_deref(),
            &self.options.user_lib_dir,
        )?;
        let shimmed = add_entry_point_shims(module, entry_points, &mut modules);
        let instrumented = modules.add_to_module(&instrument(&shimmed))?;

        let wat_path = self.path(INSTRUMENTED_WAT);
        log::info!("writing {}", wat_path.display());
        sexpr::write_file(&instrumented, &wat_path).map_err(io_error(&wat_path))?;
        self.tools
            .assemble(&wat_path, &self.path(INSTRUMENTED_WASM), true)?;
        Ok(())
    }

    fn trace(&self, entry_points: &EntryPoints) -> Result<TraceLog, StageError> {
        let wasm_path = self.path(INSTRUMENTED_WASM);
        log::info!("tracing {}", wasm_path.display());
        let wasm = fs::read(&wasm_path).map_err(io_error(&wasm_path))?;
        let mut sandbox = Sandbox::new(&wasm)?;
        Ok(tracer::trace(&mut sandbox, entry_points)?)
    }

    fn strip(
        &self,
        module: &Node,
        entry_points: &EntryPoints,
        trace: &TraceLog,
    ) -> Result<Stripped, StageError> {
        let policy = StripPolicy::new(
            self.options.function_opt,
            &trace.called_functions,
            &self.options.pinned_functions,
            &trace.loaded_builtin_modules,
        );
        let mut modules = EmbeddedModules::new();
        let result = strip_functions(module, &policy, &mut modules);
        let build_dir = &self.options.build_dir;
        write_manifests(build_dir, &result).map_err(io_error(build_dir))?;

        let filter = self.options.module_opt.then_some(&trace.loaded_frozen_modules);
        collect_modules(
            &mut modules,
            filter,
            self.options.stdlib_zip.as_deref(),
            &self.options.user_lib_dir,
        )?;
        let shimmed = add_entry_point_shims(&result.module, entry_points, &mut modules);
        let modified = modules.add_to_module(&shimmed)?;
        let packed_modules = modules.modules().iter().map(|(p, _)| p.clone()).collect();

        let wat_path = self.path(MODIFIED_WAT);
        log::info!("writing {}", wat_path.display());
        sexpr::write_file(&modified, &wat_path).map_err(io_error(&wat_path))?;
        Ok(Stripped {
            removed: result.removed,
            retained: result.retained,
            packed_modules,
        })
    }

    fn reoptimize(&self) -> Result<Node, StageError> {
        let debug_info = self.options.debug_info;
        let wasm_path = self.path(OPTIMIZED_WASM);
        let wat_path = self.path(OPTIMIZED_WAT);
        self.tools
            .optimize(&self.path(MODIFIED_WAT), &wasm_path, debug_info)?;
        self.tools.disassemble(&wasm_path, &wat_path)?;
        log::info!("reading {}", wat_path.display());
        Ok(sexpr::read_file(&wat_path)?)
    }

    fn compress(&self, optimized: &Node) -> Result<(PathBuf, CompressionReport), StageError> {
        let (compressed, report) = compress_data_segments(optimized)?;
        let wat_path = self.path(COMPRESSED_WAT);
        let wasm_path = self.path(COMPRESSED_WASM);
        log::info!("writing {}", wat_path.display());
        sexpr::write_file(&compressed, &wat_path).map_err(io_error(&wat_path))?;
        self.tools
            .assemble(&wat_path, &wasm_path, self.options.debug_info)?;
        Ok((wasm_path, report))
    }

    /// Replays the entry points against the final binary. Traps are logged
    /// by the tracer; a module that fails to load or reload is fatal.
    fn verify(&self, wasm_path: &Path, entry_points: &EntryPoints) -> Result<(), StageError> {
        let wasm = fs::read(wasm_path).map_err(io_error(wasm_path))?;
        log::info!("verifying {} ({} bytes)", wasm_path.display(), wasm.len());
        let mut sandbox = Sandbox::new(&wasm)?;
        tracer::trace(&mut sandbox, entry_points)?;
        Ok(())
    }
}

struct Stripped {
    removed: BTreeSet<String>,
    retained: BTreeSet<String>,
    packed_modules: Vec<String>,
}

/// `.py` files under `dir` with their `/`-separated relative paths, sorted.
fn contract_sources(dir: &Path) -> Result<Vec<(PathBuf, String)>, StageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StageError::Io {
            path: dir.display().to_string(),
            source: e.into(),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "py") {
            continue;
        }
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        sources.push((path.to_path_buf(), relative));
    }
    Ok(sources)
}

// =============================================================================
// Tests
// =============================================================================
