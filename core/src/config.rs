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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strip::RemovalMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings for one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory receiving every intermediate artifact.
    pub build_dir: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Pack only the frozen modules observed loading.
    pub module_opt: bool,
    pub function_opt: RemovalMode,
    pub compression: bool,
    /// Keep the names section through assembly and optimization.
    pub debug_info: bool,
    pub pinned_functions: Vec<String>,
    /// Root of the contract sources and their compiled `.pyc` files.
    pub user_lib_dir: PathBuf,
    pub stdlib_zip: Option<PathBuf>,
    /// Qualified entry points used instead of scanning the sources.
    pub contract_exports: Vec<String>,
    /// JSON object of qualified entry points to sample payloads. Like
    /// `contract_exports`, it replaces scanning.
    pub entry_points_file: Option<PathBuf>,
    /// Re-run every entry point against the final module.
    pub verify: bool,
    /// Directory holding the Binaryen executables. `PATH` when unset.
    pub tools_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            build_dir: PathBuf::from("build"),
            input: PathBuf::from("python.wasm"),
            output: PathBuf::from("python-optimized.wasm"),
            module_opt: true,
            function_opt: RemovalMode::Aggressive,
            compression: true,
            debug_info: true,
            pinned_functions: Vec::new(),
            user_lib_dir: PathBuf::from("lib"),
            stdlib_zip: None,
            contract_exports: Vec::new(),
            entry_points_file: None,
            verify: true,
            tools_dir: None,
        }
    }
}

impl Options {
    pub fn from_json(text: &str, origin: &str) -> Result<Options, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Options, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text, &path.display().to_string())
    }

    pub fn build_path(&self, file: &str) -> PathBuf {
        self.build_dir.join(file)
    }
}
