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

// Text model
pub mod escape;
pub mod sexpr;
pub mod wat;

// Execution
pub mod host_imports;
pub mod sandbox;

// Passes
pub mod compress;
pub mod entry_points;
pub mod instrument;
pub mod strip;
pub mod tables;
pub mod tracer;

// Frozen modules
pub mod compile;
pub mod packer;

// Orchestration
pub mod config;
pub mod pipeline;
pub mod tools;

pub use pipeline::{optimize, PipelineError, PipelineReport, Stage};
