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
 * Emulated NEAR host calls.
 *
 * Every import lives in the `env` namespace. Identity and economics calls
 * answer with fixed placeholder values; crypto, promise and validator calls
 * are inert. Storage is a real map so read-after-write behaves.
 *
 * Guest pointers are not trusted to be in range: an out-of-bounds access
 * traps the guest instead of panicking the host.
 */

use std::ops::Range;
use wasmtime::{Caller, Extern, Linker, Memory};

use crate::sandbox::HostState;

pub const HOST_MODULE: &str = "env";

pub const CURRENT_ACCOUNT_ID: &[u8] = b"wasm.optimizer";
pub const SIGNER_ACCOUNT_PK: &[u8] = b"wasm.optimizer_pk==";
pub const SIGNER_ACCOUNT_ID: &[u8] = b"wasm.optimizer_signer";
pub const PREDECESSOR_ACCOUNT_ID: &[u8] = b"wasm.optimizer_predecessor";
pub const BLOCK_INDEX: i64 = 200_000_000;
pub const BLOCK_TIMESTAMP: i64 = 1_700_000_000_000_000_000;
pub const EPOCH_HEIGHT: i64 = 200_000_000;
pub const STORAGE_USAGE: i64 = 100_000;
pub const ACCOUNT_BALANCE: u128 = 99_800_000_000_000_000_000_000_000;
pub const ACCOUNT_LOCKED_BALANCE: u128 = 100_000_000_000_000;
pub const ATTACHED_DEPOSIT: u128 = 100_000_000_000_000;
pub const PREPAID_GAS: i64 = 300_000_000_000_000;
pub const USED_GAS: i64 = 10_000_000_000_000;
pub const RANDOM_SEED: u128 = 100_000_000_000_000_000_000_000_000;

/// Longest C string read from guest memory.
const MAX_C_STR_LEN: usize = 4096;

/// Every `env` import this module defines.
pub const EMULATED_IMPORTS: &[&str] = &[
    "trace_function_call",
    "trace_frozen_module_load",
    "trace_builtin_module_load",
    "read_register",
    "register_len",
    "write_register",
    "current_account_id",
    "signer_account_pk",
    "signer_account_id",
    "predecessor_account_id",
    "input",
    "block_index",
    "block_timestamp",
    "epoch_height",
    "storage_usage",
    "account_balance",
    "account_locked_balance",
    "attached_deposit",
    "prepaid_gas",
    "used_gas",
    "random_seed",
    "sha256",
    "keccak256",
    "keccak512",
    "ripemd160",
    "ecrecover",
    "ed25519_verify",
    "value_return",
    "panic",
    "panic_utf8",
    "log_utf8",
    "log_utf16",
    "abort",
    "promise_create",
    "promise_then",
    "promise_and",
    "promise_batch_create",
    "promise_batch_then",
    "promise_batch_action_create_account",
    "promise_batch_action_deploy_contract",
    "promise_batch_action_function_call",
    "promise_batch_action_function_call_weight",
    "promise_batch_action_transfer",
    "promise_batch_action_stake",
    "promise_batch_action_add_key_with_full_access",
    "promise_batch_action_add_key_with_function_call",
    "promise_batch_action_delete_key",
    "promise_batch_action_delete_account",
    "promise_yield_create",
    "promise_yield_resume",
    "promise_results_count",
    "promise_result",
    "promise_return",
    "storage_write",
    "storage_read",
    "storage_remove",
    "storage_has_key",
    "validator_stake",
    "validator_total_stake",
    "alt_bn128_g1_multiexp",
    "alt_bn128_g1_sum",
    "alt_bn128_pairing_check",
];

pub fn is_emulated(module: &str, name: &str) -> bool {
    module == HOST_MODULE && EMULATED_IMPORTS.contains(&name)
}

/// Links a host call that ignores its arguments.
macro_rules! inert {
    ($linker:ident, $name:literal, ($($arg:ty),*) -> $ret:ty) => {
        $linker.func_wrap(HOST_MODULE, $name, |$(_: $arg),*| -> $ret { 0 })?
    };
    ($linker:ident, $name:literal, ($($arg:ty),*)) => {
        $linker.func_wrap(HOST_MODULE, $name, |$(_: $arg),*| {})?
    };
}

pub fn link_near_host_imports(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    link_trace_hooks(linker)?;
    link_registers(linker)?;
    link_context(linker)?;
    link_economics(linker)?;
    link_math(linker)?;
    link_misc(linker)?;
    link_promises(linker)?;
    link_storage(linker)?;
    link_validator(linker)?;
    Ok(())
}

// =============================================================================
// Guest memory helpers
// =============================================================================

fn guest_memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(mem)) => Ok(mem),
        _ => Err(wasmtime::Error::msg("guest does not export `memory`")),
    }
}

fn guest_range(size: usize, ptr: u64, len: u64) -> wasmtime::Result<Range<usize>> {
    let start = ptr as usize;
    match start.checked_add(len as usize) {
        Some(end) if end <= size && start as u64 == ptr => Ok(start..end),
        _ => Err(wasmtime::Error::msg(format!(
            "guest access {}+{} is outside memory of {} bytes",
            ptr, len, size
        ))),
    }
}

fn read_guest(caller: &mut Caller<'_, HostState>, ptr: u64, len: u64) -> wasmtime::Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let range = guest_range(data.len(), ptr, len)?;
    Ok(data[range].to_vec())
}

fn write_guest(caller: &mut Caller<'_, HostState>, ptr: u64, bytes: &[u8]) -> wasmtime::Result<()> {
    let memory = guest_memory(caller)?;
    let data = memory.data_mut(&mut *caller);
    let range = guest_range(data.len(), ptr, bytes.len() as u64)?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

/// Reads a NUL-terminated string of at most 4 KiB.
fn read_c_str(caller: &mut Caller<'_, HostState>, ptr: u32) -> wasmtime::Result<String> {
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let start = ptr as usize;
    let tail = data.get(start..).ok_or_else(|| {
        wasmtime::Error::msg(format!("C string at {} is outside guest memory", ptr))
    })?;
    let window = &tail[..tail.len().min(MAX_C_STR_LEN)];
    let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
    Ok(String::from_utf8_lossy(&window[..end]).into_owned())
}

fn read_utf8(caller: &mut Caller<'_, HostState>, len: i64, ptr: i64) -> wasmtime::Result<String> {
    let bytes = read_guest(caller, ptr as u64, len as u64)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn set_register(caller: &mut Caller<'_, HostState>, register_id: i64, bytes: Vec<u8>) {
    caller.data_mut().registers.insert(register_id as u64, bytes);
}

// =============================================================================
// Trace hooks (inserted by the instrumentation pass)
// =============================================================================

fn link_trace_hooks(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "trace_function_call",
        |mut caller: Caller<'_, HostState>, fingerprint: i32| {
            caller
                .data_mut()
                .trace
                .called_functions
                .insert(fingerprint as u32);
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "trace_frozen_module_load",
        |mut caller: Caller<'_, HostState>, path_ptr: i32| -> wasmtime::Result<()> {
            let path = read_c_str(&mut caller, path_ptr as u32)?;
            caller.data_mut().trace.loaded_frozen_modules.insert(path);
            Ok(())
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "trace_builtin_module_load",
        |mut caller: Caller<'_, HostState>, name_ptr: i32| -> wasmtime::Result<()> {
            let name = read_c_str(&mut caller, name_ptr as u32)?;
            caller.data_mut().trace.loaded_builtin_modules.insert(name);
            Ok(())
        },
    )?;
    Ok(())
}

// =============================================================================
// Registers
// =============================================================================

fn link_registers(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "read_register",
        |mut caller: Caller<'_, HostState>, register_id: i64, ptr: i64| -> wasmtime::Result<()> {
            let bytes = caller
                .data()
                .registers
                .get(&(register_id as u64))
                .cloned()
                .unwrap_or_default();
            write_guest(&mut caller, ptr as u64, &bytes)
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "register_len",
        |caller: Caller<'_, HostState>, register_id: i64| -> i64 {
            caller
                .data()
                .registers
                .get(&(register_id as u64))
                .map_or(0, |r| r.len() as i64)
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "write_register",
        |mut caller: Caller<'_, HostState>,
         register_id: i64,
         len: i64,
         ptr: i64|
         -> wasmtime::Result<()> {
            let bytes = read_guest(&mut caller, ptr as u64, len as u64)?;
            set_register(&mut caller, register_id, bytes);
            Ok(())
        },
    )?;
    Ok(())
}

// =============================================================================
// Context API
// =============================================================================

fn link_context(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "current_account_id",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(&mut caller, register_id, CURRENT_ACCOUNT_ID.to_vec());
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "signer_account_pk",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(&mut caller, register_id, SIGNER_ACCOUNT_PK.to_vec());
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "signer_account_id",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(&mut caller, register_id, SIGNER_ACCOUNT_ID.to_vec());
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "predecessor_account_id",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(&mut caller, register_id, PREDECESSOR_ACCOUNT_ID.to_vec());
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "input",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            let input = caller.data().input.clone();
            set_register(&mut caller, register_id, input);
        },
    )?;
    linker.func_wrap(HOST_MODULE, "block_index", || BLOCK_INDEX)?;
    linker.func_wrap(HOST_MODULE, "block_timestamp", || BLOCK_TIMESTAMP)?;
    linker.func_wrap(HOST_MODULE, "epoch_height", || EPOCH_HEIGHT)?;
    linker.func_wrap(HOST_MODULE, "storage_usage", || STORAGE_USAGE)?;
    Ok(())
}

// =============================================================================
// Economics API
// =============================================================================

fn link_economics(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "account_balance",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(&mut caller, register_id, ACCOUNT_BALANCE.to_le_bytes().to_vec());
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "account_locked_balance",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(
                &mut caller,
                register_id,
                ACCOUNT_LOCKED_BALANCE.to_le_bytes().to_vec(),
            );
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "attached_deposit",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            set_register(&mut caller, register_id, ATTACHED_DEPOSIT.to_le_bytes().to_vec());
        },
    )?;
    linker.func_wrap(HOST_MODULE, "prepaid_gas", || PREPAID_GAS)?;
    linker.func_wrap(HOST_MODULE, "used_gas", || USED_GAS)?;
    Ok(())
}

// =============================================================================
// Math API (inert apart from the random seed)
// =============================================================================

fn link_math(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "random_seed",
        |mut caller: Caller<'_, HostState>, register_id: i64| {
            let mut seed = vec![0u8; 32];
            seed[..16].copy_from_slice(&RANDOM_SEED.to_le_bytes());
            set_register(&mut caller, register_id, seed);
        },
    )?;
    inert!(linker, "sha256", (i64, i64, i64));
    inert!(linker, "keccak256", (i64, i64, i64));
    inert!(linker, "keccak512", (i64, i64, i64));
    inert!(linker, "ripemd160", (i64, i64, i64));
    inert!(linker, "ecrecover", (i64, i64, i64, i64, i64, i64, i64) -> i64);
    inert!(linker, "ed25519_verify", (i64, i64, i64, i64, i64, i64) -> i64);
    inert!(linker, "alt_bn128_g1_multiexp", (i64, i64, i64));
    inert!(linker, "alt_bn128_g1_sum", (i64, i64, i64));
    inert!(linker, "alt_bn128_pairing_check", (i64, i64) -> i64);
    Ok(())
}

// =============================================================================
// Miscellaneous API
// =============================================================================

fn link_misc(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "value_return",
        |mut caller: Caller<'_, HostState>, len: i64, ptr: i64| -> wasmtime::Result<()> {
            let value = read_guest(&mut caller, ptr as u64, len as u64)?;
            log::info!(
                "value_return: {} bytes: {}",
                value.len(),
                String::from_utf8_lossy(&value)
            );
            Ok(())
        },
    )?;
    linker.func_wrap(HOST_MODULE, "panic", || {
        log::warn!(">>panic");
    })?;
    linker.func_wrap(
        HOST_MODULE,
        "panic_utf8",
        |mut caller: Caller<'_, HostState>, len: i64, ptr: i64| -> wasmtime::Result<()> {
            let msg = read_utf8(&mut caller, len, ptr)?;
            log::warn!(">>panic: {}", msg);
            Ok(())
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "log_utf8",
        |mut caller: Caller<'_, HostState>, len: i64, ptr: i64| -> wasmtime::Result<()> {
            let msg = read_utf8(&mut caller, len, ptr)?;
            log::info!(">>{}", msg.replace('\n', "\n>>"));
            Ok(())
        },
    )?;
    linker.func_wrap(HOST_MODULE, "log_utf16", |_len: i64, _ptr: i64| {
        log::info!("log_utf16: not implemented");
    })?;
    linker.func_wrap(
        HOST_MODULE,
        "abort",
        |mut caller: Caller<'_, HostState>,
         msg_ptr: i32,
         filename_ptr: i32,
         line: i32,
         col: i32|
         -> wasmtime::Result<()> {
            let msg = read_c_str(&mut caller, msg_ptr as u32)?;
            let filename = read_c_str(&mut caller, filename_ptr as u32)?;
            log::warn!("abort: {} at {}@{}:{}", msg, filename, line, col);
            Ok(())
        },
    )?;
    Ok(())
}

// =============================================================================
// Promises API (inert)
// =============================================================================

fn link_promises(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    inert!(linker, "promise_create", (i64, i64, i64, i64, i64, i64, i64, i64) -> i64);
    inert!(linker, "promise_then", (i64, i64, i64, i64, i64, i64, i64, i64, i64) -> i64);
    inert!(linker, "promise_and", (i64, i64) -> i64);
    inert!(linker, "promise_batch_create", (i64, i64) -> i64);
    inert!(linker, "promise_batch_then", (i64, i64, i64) -> i64);

    inert!(linker, "promise_batch_action_create_account", (i64));
    inert!(linker, "promise_batch_action_deploy_contract", (i64, i64, i64));
    inert!(
        linker,
        "promise_batch_action_function_call",
        (i64, i64, i64, i64, i64, i64, i64)
    );
    inert!(
        linker,
        "promise_batch_action_function_call_weight",
        (i64, i64, i64, i64, i64, i64, i64, i64)
    );
    inert!(linker, "promise_batch_action_transfer", (i64, i64));
    inert!(linker, "promise_batch_action_stake", (i64, i64, i64, i64));
    inert!(
        linker,
        "promise_batch_action_add_key_with_full_access",
        (i64, i64, i64, i64)
    );
    inert!(
        linker,
        "promise_batch_action_add_key_with_function_call",
        (i64, i64, i64, i64, i64, i64, i64, i64, i64)
    );
    inert!(linker, "promise_batch_action_delete_key", (i64, i64, i64));
    inert!(linker, "promise_batch_action_delete_account", (i64, i64, i64));

    inert!(linker, "promise_yield_create", (i64, i64, i64, i64, i64, i64, i64) -> i64);
    inert!(linker, "promise_yield_resume", (i64, i64, i64, i64) -> i32);

    inert!(linker, "promise_results_count", () -> i64);
    inert!(linker, "promise_result", (i64, i64) -> i64);
    inert!(linker, "promise_return", (i64));
    Ok(())
}

// =============================================================================
// Storage API
// =============================================================================

fn link_storage(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "storage_write",
        |mut caller: Caller<'_, HostState>,
         key_len: i64,
         key_ptr: i64,
         value_len: i64,
         value_ptr: i64,
         _register_id: i64|
         -> wasmtime::Result<i64> {
            let key = read_guest(&mut caller, key_ptr as u64, key_len as u64)?;
            let value = read_guest(&mut caller, value_ptr as u64, value_len as u64)?;
            caller.data_mut().storage.insert(key, value);
            Ok(1)
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "storage_read",
        |mut caller: Caller<'_, HostState>,
         key_len: i64,
         key_ptr: i64,
         register_id: i64|
         -> wasmtime::Result<i64> {
            let key = read_guest(&mut caller, key_ptr as u64, key_len as u64)?;
            match caller.data().storage.get(&key).cloned() {
                Some(value) => {
                    set_register(&mut caller, register_id, value);
                    Ok(1)
                }
                None => Ok(0),
            }
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "storage_remove",
        |mut caller: Caller<'_, HostState>,
         key_len: i64,
         key_ptr: i64,
         _register_id: i64|
         -> wasmtime::Result<i64> {
            let key = read_guest(&mut caller, key_ptr as u64, key_len as u64)?;
            caller.data_mut().storage.remove(&key);
            Ok(1)
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "storage_has_key",
        |mut caller: Caller<'_, HostState>, key_len: i64, key_ptr: i64| -> wasmtime::Result<i64> {
            let key = read_guest(&mut caller, key_ptr as u64, key_len as u64)?;
            Ok(caller.data().storage.contains_key(&key) as i64)
        },
    )?;
    Ok(())
}

// =============================================================================
// Validator API (inert)
// =============================================================================

fn link_validator(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    inert!(linker, "validator_stake", (i64, i64, i64));
    inert!(linker, "validator_total_stake", (i64));
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Outcome, Sandbox};
    use wasmtime::{Engine, Store};

    #[test]
    fn test_every_listed_import_is_linked() {
        let engine = Engine::default();
        let mut linker = Linker::<HostState>::new(&engine);
        link_near_host_imports(&mut linker).unwrap();
        let mut store = Store::new(&engine, HostState::default());
        for name in EMULATED_IMPORTS {
            assert!(
                linker.get(&mut store, HOST_MODULE, name).is_some(),
                "{} is not linked",
                name
            );
        }
        assert!(is_emulated("env", "storage_read"));
        assert!(!is_emulated("wasi_snapshot_preview1", "fd_write"));
    }

    const GUEST: &str = r#"
(module
 (import "env" "storage_write" (func $storage_write (param i64 i64 i64 i64 i64) (result i64)))
 (import "env" "storage_read" (func $storage_read (param i64 i64 i64) (result i64)))
 (import "env" "storage_remove" (func $storage_remove (param i64 i64 i64) (result i64)))
 (import "env" "storage_has_key" (func $storage_has_key (param i64 i64) (result i64)))
 (import "env" "account_balance" (func $account_balance (param i64)))
 (import "env" "random_seed" (func $random_seed (param i64)))
 (import "env" "current_account_id" (func $current_account_id (param i64)))
 (import "env" "block_timestamp" (func $block_timestamp (result i64)))
 (import "env" "sha256" (func $sha256 (param i64 i64 i64)))
 (import "env" "trace_frozen_module_load" (func $trace_frozen_module_load (param i32)))
 (import "env" "trace_builtin_module_load" (func $trace_builtin_module_load (param i32)))
 (import "env" "log_utf8" (func $log_utf8 (param i64 i64)))
 (memory $0 1)
 (export "memory" (memory $0))
 (data (i32.const 0) "k1")
 (data (i32.const 8) "v1")
 (data (i32.const 32) "encodings/utf_8.pyc\00")
 (data (i32.const 64) "_json\00")
 (func $write (drop (call $storage_write (i64.const 2) (i64.const 0) (i64.const 2) (i64.const 8) (i64.const 0))))
 (func $read (result i64) (call $storage_read (i64.const 2) (i64.const 0) (i64.const 5)))
 (func $has (result i64) (call $storage_has_key (i64.const 2) (i64.const 0)))
 (func $remove (drop (call $storage_remove (i64.const 2) (i64.const 0) (i64.const 0))))
 (func $context
  (call $account_balance (i64.const 1))
  (call $random_seed (i64.const 2))
  (call $current_account_id (i64.const 3))
  (call $sha256 (i64.const 2) (i64.const 0) (i64.const 4))
  (call $log_utf8 (i64.const 2) (i64.const 8)))
 (func $now (result i64) (call $block_timestamp))
 (func $loads
  (call $trace_frozen_module_load (i32.const 32))
  (call $trace_builtin_module_load (i32.const 64)))
 (func $bad_pointer (drop (call $storage_has_key (i64.const 8) (i64.const 65533))))
 (export "write" (func $write))
 (export "read" (func $read))
 (export "has" (func $has))
 (export "remove" (func $remove))
 (export "context" (func $context))
 (export "now" (func $now))
 (export "loads" (func $loads))
 (export "bad_pointer" (func $bad_pointer))
)
"#;

    fn sandbox() -> Sandbox {
        Sandbox::new(&wat::parse_str(GUEST).unwrap()).unwrap()
    }

    fn run_ok(sb: &mut Sandbox, name: &str) {
        assert_eq!(sb.run(b"", name), Outcome::Completed);
    }

    #[test]
    fn test_storage_read_after_write() {
        let mut sb = sandbox();
        run_ok(&mut sb, "read");
        assert!(sb.state().registers.get(&5).is_none());

        run_ok(&mut sb, "write");
        assert_eq!(sb.state().storage.get(b"k1".as_slice()).unwrap(), b"v1");

        run_ok(&mut sb, "read");
        assert_eq!(sb.state().registers.get(&5).unwrap(), b"v1");

        run_ok(&mut sb, "remove");
        assert!(sb.state().storage.is_empty());
    }

    #[test]
    fn test_fixed_context_values() {
        let mut sb = sandbox();
        run_ok(&mut sb, "context");
        let regs = &sb.state().registers;
        assert_eq!(regs[&1], ACCOUNT_BALANCE.to_le_bytes().to_vec());
        assert_eq!(regs[&2].len(), 32);
        assert_eq!(&regs[&2][..16], &RANDOM_SEED.to_le_bytes());
        assert_eq!(regs[&3], b"wasm.optimizer");
        // sha256 is inert: no result register.
        assert!(!regs.contains_key(&4));
    }

    #[test]
    fn test_load_hooks_read_c_strings() {
        let mut sb = sandbox();
        run_ok(&mut sb, "loads");
        let trace = sb.trace();
        assert!(trace.loaded_frozen_modules.contains("encodings/utf_8.pyc"));
        assert!(trace.loaded_builtin_modules.contains("_json"));
    }

    #[test]
    fn test_out_of_bounds_pointer_traps() {
        let mut sb = sandbox();
        assert!(sb.run(b"", "bad_pointer").is_trap());
    }

    #[test]
    fn test_guest_range() {
        assert_eq!(guest_range(10, 2, 3).unwrap(), 2..5);
        assert_eq!(guest_range(10, 10, 0).unwrap(), 10..10);
        assert!(guest_range(10, 8, 3).is_err());
        assert!(guest_range(10, u64::MAX, 2).is_err());
    }
}
