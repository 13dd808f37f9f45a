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

//! Contract entry points and the exported shims that reach them.

use crate::packer::EmbeddedModules;
use crate::sexpr::Node;
use crate::wat;

/// Input used when an entry point has no sample payloads.
pub const DEFAULT_PAYLOAD: &[u8] = b"{}";

/// Module assumed for entry point names without a dot.
pub const DEFAULT_CONTRACT_MODULE: &str = "contract";

/// Runtime function every shim dispatches through.
pub const CONTRACT_ENTRY_POINT: &str = "contract_entry_point";

/// Ordered `module.func -> payloads` mapping. Inserting an existing name
/// replaces its payloads in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPoints {
    entries: Vec<(String, Vec<Vec<u8>>)>,
}

impl EntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, payloads: Vec<Vec<u8>>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = payloads,
            None => self.entries.push((name, payloads)),
        }
    }

    pub fn extend(&mut self, other: EntryPoints) {
        for (name, payloads) in other.entries {
            self.insert(name, payloads);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prefixes every name with `module.`.
    pub fn qualified(self, module: &str) -> EntryPoints {
        EntryPoints {
            entries: self
                .entries
                .into_iter()
                .map(|(name, payloads)| (format!("{}.{}", module, name), payloads))
                .collect(),
        }
    }

    /// Parses `{"module.func": ["payload", ...], ...}`. Entry points run in
    /// the order their keys are written.
    pub fn from_json(text: &str) -> Result<EntryPoints, serde_json::Error> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut out = EntryPoints::new();
        for (name, payloads) in raw {
            let payloads: Vec<String> = serde_json::from_value(payloads)?;
            out.insert(name, payloads.into_iter().map(String::into_bytes).collect());
        }
        Ok(out)
    }
}

impl<S: Into<String>> FromIterator<S> for EntryPoints {
    /// Names with no sample payloads.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut out = EntryPoints::new();
        for name in iter {
            out.insert(name, Vec::new());
        }
        out
    }
}

/// Finds the exported methods of a contract source file.
pub trait EntryPointScanner {
    /// Returns unqualified method names mapped to sample payloads.
    fn scan(&self, source: &str) -> EntryPoints;
}

/// Splits `pkg.module.func` into `("pkg.module", "func")`.
pub fn split_entry_point(name: &str) -> (&str, &str) {
    name.rsplit_once('.')
        .unwrap_or((DEFAULT_CONTRACT_MODULE, name))
}

/// Module path for a source file relative to the user library, e.g.
/// `app/contract.py` -> `app.contract`.
pub fn module_name_for(relative: &str) -> String {
    relative
        .trim_end_matches(".py")
        .replace(['/', '\\'], ".")
}

/// Appends an exported shim per entry point that forwards the interned
/// module and function names to the runtime dispatcher.
pub fn add_entry_point_shims(
    module: &Node,
    entry_points: &EntryPoints,
    strings: &mut EmbeddedModules,
) -> Node {
    let mut fields = wat::fields(module).to_vec();
    for name in entry_points.names() {
        let (module_name, func_name) = split_entry_point(name);
        let shim = format!("{}_{}", module_name, func_name);
        let module_addr = strings.allocate_string(module_name);
        let func_addr = strings.allocate_string(func_name);
        log::debug!("exporting {} as {}", name, func_name);

        fields.push(Node::list(vec![
            Node::atom("export"),
            Node::atom(format!("\"{}\"", func_name)),
            Node::list(vec![Node::atom("func"), Node::atom(format!("${}", shim))]),
        ]));
        fields.push(Node::list(vec![
            Node::atom("func"),
            Node::atom(format!("${}", shim)),
            wat::call(
                CONTRACT_ENTRY_POINT,
                vec![wat::i32_const(module_addr), wat::i32_const(func_addr)],
            ),
        ]));
    }
    wat::with_fields(module, fields)
}
