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

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use near_wasm_opt::config::Options;
use near_wasm_opt::pipeline;
use near_wasm_opt::strip::RemovalMode;
use near_wasm_opt::tools::Binaryen;

#[derive(Parser)]
#[command(name = "near-wasm-opt")]
#[command(about = "Trace-driven size optimizer for the CPython NEAR runtime.", long_about = None)]
struct Cli {
    /// JSON file with base options; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// off, safe or aggressive.
    #[arg(long)]
    function_opt: Option<RemovalMode>,

    /// Pack every frozen module, not only the ones traced loading.
    #[arg(long)]
    no_module_opt: bool,

    #[arg(long)]
    no_compression: bool,

    #[arg(long)]
    no_debug_info: bool,

    #[arg(long)]
    no_verify: bool,

    /// Function to keep regardless of the trace (repeatable).
    #[arg(long = "pin", value_name = "NAME")]
    pinned_functions: Vec<String>,

    #[arg(long)]
    user_lib_dir: Option<PathBuf>,

    #[arg(long)]
    stdlib_zip: Option<PathBuf>,

    /// Qualified entry point, e.g. `contract.ping` (repeatable).
    #[arg(long = "export", value_name = "MODULE.FUNC")]
    contract_exports: Vec<String>,

    /// JSON object mapping entry points to sample payloads.
    #[arg(long)]
    entry_points: Option<PathBuf>,

    /// Directory containing wasm-dis, wasm-as and wasm-opt.
    #[arg(long)]
    tools_dir: Option<PathBuf>,
}

impl Cli {
    fn into_options(self) -> Result<Options, String> {
        let mut options = match &self.config {
            Some(path) => Options::load(path).map_err(|e| e.to_string())?,
            None => Options::default(),
        };
        if let Some(input) = self.input {
            options.input = input;
        }
        if let Some(output) = self.output {
            options.output = output;
        }
        if let Some(build_dir) = self.build_dir {
            options.build_dir = build_dir;
        }
        if let Some(mode) = self.function_opt {
            options.function_opt = mode;
        }
        options.module_opt &= !self.no_module_opt;
        options.compression &= !self.no_compression;
        options.debug_info &= !self.no_debug_info;
        options.verify &= !self.no_verify;
        options.pinned_functions.extend(self.pinned_functions);
        if let Some(dir) = self.user_lib_dir {
            options.user_lib_dir = dir;
        }
        if self.stdlib_zip.is_some() {
            options.stdlib_zip = self.stdlib_zip;
        }
        options.contract_exports.extend(self.contract_exports);
        if self.entry_points.is_some() {
            options.entry_points_file = self.entry_points;
        }
        if self.tools_dir.is_some() {
            options.tools_dir = self.tools_dir;
        }
        Ok(options)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Tree passes recurse once per nesting level of the disassembly.
    let handle = std::thread::Builder::new()
        .name("near-wasm-opt".to_string())
        .stack_size(64 * 1024 * 1024)
        .spawn(run);
    match handle {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            log::error!("optimizer thread panicked");
            ExitCode::from(2)
        }),
        Err(err) => {
            log::error!("failed to spawn optimizer thread: {}", err);
            ExitCode::from(2)
        }
    }
}

fn run() -> ExitCode {
    let options = match Cli::parse().into_options() {
        Ok(options) => options,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };
    let tools = Binaryen::new(options.tools_dir.clone());

    // Without a source scanner the entry points come from --export or
    // --entry-points.
    match pipeline::optimize(&options, &tools, None) {
        Ok(report) => {
            log::info!(
                "removed {} functions, kept {}, packed {} modules into {}",
                report.removed.len(),
                report.retained.len(),
                report.packed_modules.len(),
                report.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
