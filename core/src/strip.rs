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
 * Trace-driven dead function elimination.
 *
 * A function is a removal candidate when its fingerprint was never reported
 * by the trace hook and it is not pinned. The removal mode then decides which
 * candidates actually go. Removed bodies collapse to `unreachable`, and each
 * call site reports the callee's name through the panic handler before
 * trapping, so a mis-traced path fails loudly instead of silently.
 */

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::packer::EmbeddedModules;
use crate::sexpr::Node;
use crate::tables::{
    unloaded_builtin_prefixes, DEFAULT_PINNED_FINGERPRINTS, SAFELY_REMOVABLE_PREFIXES,
    SAFELY_REMOVABLE_SUFFIXES,
};
use crate::wat::{self, fnv1a_32};

pub const PANIC_HANDLER: &str = "optimized_out_function_panic_handler";
pub const REMOVED_MANIFEST: &str = "removed_functions.txt";
pub const RETAINED_MANIFEST: &str = "retained_functions.txt";

// =============================================================================
// Removal Mode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalMode {
    /// Keep everything.
    Off,
    /// Drop candidates known to be unnecessary for contract execution.
    Safe,
    /// Drop every candidate.
    #[default]
    Aggressive,
}

impl FromStr for RemovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(RemovalMode::Off),
            "safe" => Ok(RemovalMode::Safe),
            "aggressive" => Ok(RemovalMode::Aggressive),
            other => Err(format!(
                "unknown removal mode '{}' (expected off, safe or aggressive)",
                other
            )),
        }
    }
}

impl fmt::Display for RemovalMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RemovalMode::Off => "off",
            RemovalMode::Safe => "safe",
            RemovalMode::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Policy
// =============================================================================

pub struct StripPolicy<'a> {
    mode: RemovalMode,
    called: &'a HashSet<u32>,
    pinned: HashSet<u32>,
    safe_prefixes: Vec<&'static str>,
}

impl<'a> StripPolicy<'a> {
    /// `extra_pinned` adds to the built-in pinned list.
    /// `loaded_builtin_modules` is what the trace saw loading.
    pub fn new(
        mode: RemovalMode,
        called: &'a HashSet<u32>,
        extra_pinned: &[String],
        loaded_builtin_modules: &BTreeSet<String>,
    ) -> Self {
        let mut pinned = DEFAULT_PINNED_FINGERPRINTS.clone();
        pinned.extend(
            extra_pinned
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(fnv1a_32),
        );
        let mut safe_prefixes = SAFELY_REMOVABLE_PREFIXES.to_vec();
        safe_prefixes.extend(unloaded_builtin_prefixes(|m| {
            loaded_builtin_modules.contains(m)
        }));
        StripPolicy {
            mode,
            called,
            pinned,
            safe_prefixes,
        }
    }

    pub fn is_candidate(&self, name: &str) -> bool {
        let fingerprint = fnv1a_32(name);
        !self.called.contains(&fingerprint) && !self.pinned.contains(&fingerprint)
    }

    fn mode_allows(&self, name: &str) -> bool {
        match self.mode {
            RemovalMode::Off => false,
            RemovalMode::Aggressive => true,
            RemovalMode::Safe => {
                self.safe_prefixes.iter().any(|p| name.starts_with(p))
                    || SAFELY_REMOVABLE_SUFFIXES.iter().any(|s| name.ends_with(s))
            }
        }
    }

    pub fn removes(&self, name: &str) -> bool {
        self.is_candidate(name) && self.mode_allows(name)
    }
}

// =============================================================================
// Rewrite
// =============================================================================

#[derive(Debug, Clone)]
pub struct StripResult {
    pub module: Node,
    pub removed: BTreeSet<String>,
    pub retained: BTreeSet<String>,
}

pub fn strip_functions(
    module: &Node,
    policy: &StripPolicy,
    strings: &mut EmbeddedModules,
) -> StripResult {
    let (removed, retained): (BTreeSet<String>, BTreeSet<String>) = wat::function_names(module)
        .into_iter()
        .partition(|name| policy.removes(name));
    log::info!(
        "{} mode: removing {} functions, keeping {}",
        policy.mode,
        removed.len(),
        retained.len()
    );

    let mut rewriter = CallRewriter {
        removed: &removed,
        strings,
    };
    let fields = wat::fields(module)
        .iter()
        .map(|field| {
            if !field.is_form("func") {
                return field.clone();
            }
            match wat::function_name(field) {
                Some(name) if removed.contains(name) => stub_body(field),
                _ => rewriter.rewrite(field),
            }
        })
        .collect();

    StripResult {
        module: wat::with_fields(module, fields),
        removed,
        retained,
    }
}

/// Keeps the declaration prefix and replaces the body with `unreachable`.
fn stub_body(func: &Node) -> Node {
    let items = func.as_list().unwrap_or(&[]);
    let mut out = items[..wat::body_start(items)].to_vec();
    out.push(Node::list(vec![Node::atom("unreachable")]));
    Node::List(out)
}

struct CallRewriter<'a> {
    removed: &'a BTreeSet<String>,
    strings: &'a mut EmbeddedModules,
}

impl CallRewriter<'_> {
    fn removed_target<'n>(&self, target: Option<&'n Node>) -> Option<&'n str> {
        let name = target?.as_atom()?.strip_prefix('$')?;
        self.removed.contains(name).then_some(name)
    }

    fn report(&mut self, name: &str) -> Node {
        wat::call(PANIC_HANDLER, vec![wat::i32_const(self.strings.allocate_string(name))])
    }

    fn rewrite(&mut self, node: &Node) -> Node {
        let Node::List(items) = node else {
            return node.clone();
        };
        if node.is_form("call") {
            if let Some(name) = self.removed_target(items.get(1)) {
                let report = self.report(name);
                return Node::list(vec![
                    Node::atom("block"),
                    report,
                    Node::list(vec![Node::atom("unreachable")]),
                ]);
            }
        }

        let mut out = Vec::with_capacity(items.len());
        let mut i = 0;
        while i < items.len() {
            // Unfolded `call $f` inside an instruction sequence.
            if items[i].as_atom() == Some("call") && i > 0 {
                if let Some(name) = self.removed_target(items.get(i + 1)) {
                    out.extend([
                        Node::atom("i32.const"),
                        Node::atom(self.strings.allocate_string(name).to_string()),
                        Node::atom("call"),
                        Node::atom(format!("${}", PANIC_HANDLER)),
                        Node::atom("unreachable"),
                    ]);
                    i += 2;
                    continue;
                }
            }
            out.push(self.rewrite(&items[i]));
            i += 1;
        }
        Node::List(out)
    }
}

// =============================================================================
// Manifests
// =============================================================================

pub fn write_manifest(path: &Path, names: &BTreeSet<String>) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for name in names {
        writeln!(file, "{}", name)?;
    }
    file.flush()
}

/// Writes `removed_functions.txt` and `retained_functions.txt` into `dir`.
pub fn write_manifests(dir: &Path, result: &StripResult) -> std::io::Result<()> {
    write_manifest(&dir.join(REMOVED_MANIFEST), &result.removed)?;
    write_manifest(&dir.join(RETAINED_MANIFEST), &result.retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::{BASE_ADDR, STRINGS_OFFSET};
    use crate::sexpr::parse;

    const MODULE: &str = "(module \
        (func $optimized_out_function_panic_handler (param $0 i32) nop) \
        (func $main (call $helper) (call $complex_add) (call $_Py_Dealloc)) \
        (func $helper (param $0 i32) (result i32) (local $1 i32) (local.get $0)) \
        (func $complex_add nop) \
        (func $parse_expr_rule nop) \
        (func $_Py_Dealloc nop) \
        (func $Struct_pack nop))";

    fn called(names: &[&str]) -> HashSet<u32> {
        names.iter().map(|n| fnv1a_32(n)).collect()
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    fn strip(mode: RemovalMode, called: &HashSet<u32>, loaded: &[&str]) -> (StripResult, EmbeddedModules) {
        let module = parse(MODULE).unwrap();
        let loaded: BTreeSet<String> = loaded.iter().map(|s| s.to_string()).collect();
        let policy = StripPolicy::new(mode, called, &[], &loaded);
        let mut strings = EmbeddedModules::new();
        let result = strip_functions(&module, &policy, &mut strings);
        (result, strings)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("safe".parse::<RemovalMode>().unwrap(), RemovalMode::Safe);
        assert!("maybe".parse::<RemovalMode>().is_err());
        assert_eq!(RemovalMode::Aggressive.to_string(), "aggressive");
        assert_eq!(
            serde_json::from_str::<RemovalMode>("\"off\"").unwrap(),
            RemovalMode::Off
        );
    }

    #[test]
    fn test_aggressive_removes_every_candidate() {
        let trace = called(&["main"]);
        let (result, mut strings) = strip(RemovalMode::Aggressive, &trace, &[]);
        assert_eq!(
            names(&result.removed),
            vec!["Struct_pack", "complex_add", "helper", "parse_expr_rule"]
        );
        assert_eq!(
            names(&result.retained),
            vec!["_Py_Dealloc", "main", "optimized_out_function_panic_handler"]
        );

        let text = result.module.to_text();
        assert!(!text.contains("(call $helper"));
        assert!(!text.contains("(call $complex_add"));
        assert!(text.contains("(call $_Py_Dealloc)"));

        let helper_addr = BASE_ADDR + STRINGS_OFFSET as u32;
        assert_eq!(strings.allocate_string("helper"), helper_addr);
        assert!(text.contains(&format!(
            "(func $main (block (call $optimized_out_function_panic_handler (i32.const {})) (unreachable))",
            helper_addr
        )));
        assert!(text.contains(
            "(func $helper (param $0 i32) (result i32) (local $1 i32) (unreachable))"
        ));
    }

    #[test]
    fn test_safe_mode_limits_removal() {
        let trace = called(&["main"]);
        let (result, _) = strip(RemovalMode::Safe, &trace, &["_struct"]);
        assert_eq!(names(&result.removed), vec!["complex_add", "parse_expr_rule"]);

        let (result, _) = strip(RemovalMode::Safe, &trace, &[]);
        assert_eq!(
            names(&result.removed),
            vec!["Struct_pack", "complex_add", "parse_expr_rule"]
        );
    }

    #[test]
    fn test_off_mode_keeps_module() {
        let (result, _) = strip(RemovalMode::Off, &HashSet::new(), &[]);
        assert!(result.removed.is_empty());
        assert_eq!(result.module, parse(MODULE).unwrap());
    }

    #[test]
    fn test_pinned_functions_survive() {
        let module = parse(MODULE).unwrap();
        let none = HashSet::new();
        let policy = StripPolicy::new(
            RemovalMode::Aggressive,
            &none,
            &[" helper ".to_string(), String::new()],
            &BTreeSet::new(),
        );
        let result = strip_functions(&module, &policy, &mut EmbeddedModules::new());
        assert!(result.retained.contains("helper"));
        assert!(result.retained.contains("_Py_Dealloc"));
        assert!(result.retained.contains(PANIC_HANDLER));
        assert!(result.removed.contains("main"));
    }

    #[test]
    fn test_pinned_functions_survive_safe_prefixes() {
        let module = parse(
            "(module (func $PyEval_SaveThread nop) (func $PyEval_GetFrame nop) \
             (func $PyEval_EvalFrame nop))",
        )
        .unwrap();
        let none = HashSet::new();
        let policy = StripPolicy::new(
            RemovalMode::Safe,
            &none,
            &["PyEval_GetFrame".to_string()],
            &BTreeSet::new(),
        );
        let result = strip_functions(&module, &policy, &mut EmbeddedModules::new());
        assert_eq!(names(&result.retained), ["PyEval_GetFrame", "PyEval_SaveThread"]);
        assert_eq!(names(&result.removed), ["PyEval_EvalFrame"]);
    }

    #[test]
    fn test_nested_and_unfolded_calls() {
        let module = parse(
            "(module (func $dead (param i32) (result i32) (local.get 0)) \
             (func $live (drop (i32.add (i32.const 1) (call $dead (i32.const 2)))) \
              i32.const 3 call $dead drop))",
        )
        .unwrap();
        let trace = called(&["live"]);
        let policy = StripPolicy::new(RemovalMode::Aggressive, &trace, &[], &BTreeSet::new());
        let mut strings = EmbeddedModules::new();
        let result = strip_functions(&module, &policy, &mut strings);
        let addr = strings.allocate_string("dead");
        insta::assert_snapshot!(
            result.module.to_text().replace(&addr.to_string(), "ADDR"),
            @"(module (func $dead (param i32) (result i32) (unreachable)) (func $live (drop (i32.add (i32.const 1) (block (call $optimized_out_function_panic_handler (i32.const ADDR)) (unreachable)))) i32.const 3 i32.const ADDR call $optimized_out_function_panic_handler unreachable drop))"
        );
    }

    #[test]
    fn test_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let (result, _) = strip(RemovalMode::Aggressive, &called(&["main", "helper"]), &[]);
        write_manifests(dir.path(), &result).unwrap();
        let removed = std::fs::read_to_string(dir.path().join(REMOVED_MANIFEST)).unwrap();
        assert_eq!(removed, "Struct_pack\ncomplex_add\nparse_expr_rule\n");
        let retained = std::fs::read_to_string(dir.path().join(RETAINED_MANIFEST)).unwrap();
        assert_eq!(retained.lines().count(), 4);
    }
}
