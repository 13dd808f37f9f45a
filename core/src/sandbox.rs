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
 * Wasmtime sandbox for tracing NEAR contract runtimes.
 *
 * A session owns one compiled module, one linker and the host-side state
 * (registers, storage, trace log). `reset` swaps in a fresh instance while
 * the host state carries over, mirroring how the NEAR runtime keeps
 * storage between calls.
 */

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, Val};

use crate::host_imports::link_near_host_imports;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone)]
pub struct SandboxError {
    pub message: String,
    pub context: String,
}

impl SandboxError {
    fn new(context: &str, message: impl Into<String>) -> Self {
        SandboxError {
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.message)
    }
}

impl std::error::Error for SandboxError {}

// =============================================================================
// Host State
// =============================================================================

/// Evidence collected by the trace hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceLog {
    /// FNV-1a fingerprints reported by `trace_function_call`.
    pub called_functions: HashSet<u32>,
    /// Paths reported by `trace_frozen_module_load`.
    pub loaded_frozen_modules: BTreeSet<String>,
    /// Names reported by `trace_builtin_module_load`.
    pub loaded_builtin_modules: BTreeSet<String>,
}

/// State shared by every host call of one session.
#[derive(Debug, Default)]
pub struct HostState {
    pub registers: HashMap<u64, Vec<u8>>,
    pub storage: HashMap<Vec<u8>, Vec<u8>>,
    /// Bytes returned by the `input` host call.
    pub input: Vec<u8>,
    pub trace: TraceLog,
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Trapped(String),
}

impl Outcome {
    pub fn is_trap(&self) -> bool {
        matches!(self, Outcome::Trapped(_))
    }
}

// =============================================================================
// Sandbox
// =============================================================================

pub struct Sandbox {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    store: Store<HostState>,
    instance: Instance,
}

impl Sandbox {
    /// Compiles `bytes` and instantiates it against the emulated host.
    pub fn new(bytes: &[u8]) -> Result<Self, SandboxError> {
        let engine = Engine::default();
        let module = Module::from_binary(&engine, bytes)
            .map_err(|e| SandboxError::new("sandbox::load", format!("{:#}", e)))?;

        let mut linker = Linker::<HostState>::new(&engine);
        link_near_host_imports(&mut linker)
            .map_err(|e| SandboxError::new("sandbox::link", format!("{:#}", e)))?;
        for import in module.imports() {
            if !crate::host_imports::is_emulated(import.module(), import.name()) {
                log::warn!(
                    "import {}.{} is not emulated, calls will trap",
                    import.module(),
                    import.name()
                );
            }
        }
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| SandboxError::new("sandbox::link", format!("{:#}", e)))?;

        let mut store = Store::new(&engine, HostState::default());
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| SandboxError::new("sandbox::instantiate", format!("{:#}", e)))?;

        Ok(Sandbox {
            engine,
            module,
            linker,
            store,
            instance,
        })
    }

    /// Replaces the instance (memory, globals, stack) while keeping
    /// registers, storage and the trace log.
    pub fn reset(&mut self) -> Result<(), SandboxError> {
        let state = std::mem::take(self.store.data_mut());
        let mut store = Store::new(&self.engine, state);
        match self.linker.instantiate(&mut store, &self.module) {
            Ok(instance) => {
                self.store = store;
                self.instance = instance;
                Ok(())
            }
            Err(e) => {
                *self.store.data_mut() = std::mem::take(store.data_mut());
                Err(SandboxError::new("sandbox::reset", format!("{:#}", e)))
            }
        }
    }

    pub fn set_input(&mut self, input: &[u8]) {
        self.store.data_mut().input = input.to_vec();
    }

    /// Calls the export `entry_point` with no arguments. Traps are reported,
    /// never propagated.
    pub fn run(&mut self, input: &[u8], entry_point: &str) -> Outcome {
        self.set_input(input);
        let Some(func) = self.instance.get_func(&mut self.store, entry_point) else {
            return Outcome::Trapped(format!("export `{}` not found", entry_point));
        };
        let result_count = func.ty(&self.store).results().len();
        let mut results = vec![Val::I32(0); result_count];
        match func.call(&mut self.store, &[], &mut results) {
            Ok(()) => Outcome::Completed,
            Err(e) => Outcome::Trapped(format!("{:#}", e)),
        }
    }

    /// Calls an export taking and returning `i32` values, e.g. the compiler
    /// entry points of the runtime.
    pub fn call_i32(&mut self, name: &str, args: &[i32]) -> Result<i32, SandboxError> {
        let context = "sandbox::call_i32";
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| SandboxError::new(context, format!("Export '{}' not found", name)))?;
        let params: Vec<Val> = args.iter().map(|&v| Val::I32(v)).collect();
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| SandboxError::new(context, format!("Call to '{}' trapped: {:#}", name, e)))?;
        match results.first() {
            Some(Val::I32(v)) => Ok(*v),
            other => Err(SandboxError::new(
                context,
                format!("'{}' returned {:?}, expected one i32", name, other),
            )),
        }
    }

    fn memory(&mut self) -> Result<Memory, SandboxError> {
        self.instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| SandboxError::new("sandbox::memory", "module does not export `memory`"))
    }

    pub fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<(), SandboxError> {
        let memory = self.memory()?;
        let data = memory.data_mut(&mut self.store);
        let start = addr as usize;
        let end = start + bytes.len();
        let target = data.get_mut(start..end).ok_or_else(|| {
            SandboxError::new(
                "sandbox::write_memory",
                format!("{}..{} is outside guest memory", start, end),
            )
        })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_memory(&mut self, addr: u32, len: u32) -> Result<Vec<u8>, SandboxError> {
        let memory = self.memory()?;
        let data = memory.data(&self.store);
        let start = addr as usize;
        let end = start + len as usize;
        data.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
            SandboxError::new(
                "sandbox::read_memory",
                format!("{}..{} is outside guest memory", start, end),
            )
        })
    }

    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    pub fn trace(&self) -> &TraceLog {
        &self.store.data().trace
    }

    pub fn take_trace(&mut self) -> TraceLog {
        std::mem::take(&mut self.store.data_mut().trace)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const GUEST: &str = r#"
(module
 (import "env" "input" (func $input (param i64)))
 (import "env" "register_len" (func $register_len (param i64) (result i64)))
 (import "env" "read_register" (func $read_register (param i64 i64)))
 (import "env" "value_return" (func $value_return (param i64 i64)))
 (import "env" "storage_write" (func $storage_write (param i64 i64 i64 i64 i64) (result i64)))
 (import "env" "trace_function_call" (func $trace_function_call (param i32)))
 (memory $0 1)
 (export "memory" (memory $0))
 (global $counter (mut i32) (i32.const 0))
 (data (i32.const 16) "key")
 (func $echo
  (call $input (i64.const 0))
  (call $read_register (i64.const 0) (i64.const 256))
  (call $value_return (call $register_len (i64.const 0)) (i64.const 256)))
 (func $bump (result i32)
  (call $trace_function_call (i32.const 42))
  (global.set $counter (i32.add (global.get $counter) (i32.const 1)))
  (global.get $counter))
 (func $store
  (drop (call $storage_write (i64.const 3) (i64.const 16) (i64.const 3) (i64.const 16) (i64.const 0))))
 (func $boom unreachable)
 (func $add (param $0 i32) (param $1 i32) (result i32)
  (i32.add (local.get $0) (local.get $1)))
 (export "echo" (func $echo))
 (export "bump" (func $bump))
 (export "store" (func $store))
 (export "boom" (func $boom))
 (export "add" (func $add))
)
"#;

    fn sandbox() -> Sandbox {
        Sandbox::new(&wat::parse_str(GUEST).unwrap()).unwrap()
    }

    #[test]
    fn test_input_round_trips_through_register() {
        let mut sb = sandbox();
        assert_eq!(sb.run(b"{\"a\":1}", "echo"), Outcome::Completed);
        assert_eq!(sb.read_memory(256, 7).unwrap(), b"{\"a\":1}");
        assert_eq!(sb.state().registers.get(&0).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_trap_is_reported_not_propagated() {
        let mut sb = sandbox();
        assert!(sb.run(b"{}", "boom").is_trap());
        assert!(sb.run(b"{}", "missing").is_trap());
        assert_eq!(sb.run(b"{}", "bump"), Outcome::Completed);
    }

    #[test]
    fn test_reset_discards_instance_but_keeps_host_state() {
        let mut sb = sandbox();
        assert_eq!(sb.call_i32("bump", &[]).unwrap(), 1);
        assert_eq!(sb.call_i32("bump", &[]).unwrap(), 2);
        sb.run(b"", "store");
        sb.write_memory(512, b"scratch").unwrap();

        sb.reset().unwrap();
        assert_eq!(sb.call_i32("bump", &[]).unwrap(), 1);
        assert_eq!(sb.read_memory(512, 7).unwrap(), vec![0; 7]);
        assert_eq!(sb.state().storage.get(b"key".as_slice()).unwrap(), b"key");
        assert!(sb.trace().called_functions.contains(&42));
    }

    #[test]
    fn test_call_i32_with_arguments() {
        let mut sb = sandbox();
        assert_eq!(sb.call_i32("add", &[40, 2]).unwrap(), 42);
        assert!(sb.call_i32("store", &[]).is_err());
        assert!(sb.call_i32("nope", &[]).is_err());
    }

    #[test]
    fn test_memory_bounds_are_checked() {
        let mut sb = sandbox();
        assert!(sb.write_memory(65_535, b"xy").is_err());
        assert!(sb.read_memory(65_536, 1).is_err());
    }

    #[test]
    fn test_unknown_imports_trap_instead_of_failing_instantiation() {
        let wasm = wat::parse_str(
            r#"(module
                (import "env" "not_a_near_call" (func $x))
                (memory $0 1)
                (export "memory" (memory $0))
                (func $call_it (call $x))
                (export "call_it" (func $call_it)))"#,
        )
        .unwrap();
        let mut sb = Sandbox::new(&wasm).unwrap();
        assert!(sb.run(b"", "call_it").is_trap());
    }

    #[test]
    fn test_invalid_wasm() {
        assert!(Sandbox::new(&[0, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_take_trace_clears_log() {
        let mut sb = sandbox();
        sb.run(b"", "bump");
        let log = sb.take_trace();
        assert!(log.called_functions.contains(&42));
        assert!(sb.trace().called_functions.is_empty());
    }
}
