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

//! Contract source compilation inside the runtime itself.

use thiserror::Error;

use crate::packer::{EmbeddedModules, PackError};
use crate::sandbox::{Sandbox, SandboxError};

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("{0}")]
    Sandbox(#[from] SandboxError),
    #[error("{0}")]
    Pack(#[from] PackError),
    #[error("compiling {0} produced no bytecode")]
    NoBytecode(String),
}

/// Copies `value` plus a NUL terminator into a guest buffer.
fn alloc_c_string(sandbox: &mut Sandbox, value: &str) -> Result<i32, SandboxError> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    let ptr = sandbox.call_i32("_alloc_buffer", &[bytes.len() as i32])?;
    sandbox.write_memory(ptr as u32, &bytes)?;
    Ok(ptr)
}

/// Compiles `source` with the runtime's own compiler and returns the
/// marshalled code object. The packed image is installed first so imports
/// resolved at compile time see the same modules as at run time.
pub fn compile_to_bytecode(
    sandbox: &mut Sandbox,
    modules: &EmbeddedModules,
    source: &str,
    filename: &str,
) -> Result<Vec<u8>, CompileError> {
    modules.write_to_sandbox(sandbox)?;

    let len_ptr = sandbox.call_i32("_alloc_buffer", &[4])?;
    let source_ptr = alloc_c_string(sandbox, source)?;
    let filename_ptr = alloc_c_string(sandbox, filename)?;
    let bytecode_ptr =
        sandbox.call_i32("_compile_contract_source", &[source_ptr, filename_ptr, len_ptr])?;
    if bytecode_ptr == 0 {
        return Err(CompileError::NoBytecode(filename.to_string()));
    }

    let len_bytes = sandbox.read_memory(len_ptr as u32, 4)?;
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
    let bytecode = sandbox.read_memory(bytecode_ptr as u32, len)?;
    log::debug!("compiled {} to {} bytes", filename, bytecode.len());
    Ok(bytecode)
}
