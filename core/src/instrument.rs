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

//! Trace hook insertion.

use crate::host_imports::HOST_MODULE;
use crate::sexpr::Node;
use crate::wat::{self, fnv1a_32};

pub const TRACE_FUNCTION_CALL: &str = "trace_function_call";
pub const TRACE_FROZEN_MODULE_LOAD: &str = "trace_frozen_module_load";
pub const TRACE_BUILTIN_MODULE_LOAD: &str = "trace_builtin_module_load";

/// Runtime functions whose first argument is the name of a module being
/// loaded, paired with the hook that reports it.
const LOAD_HOOKS: &[(&str, &str)] = &[
    ("load_frozen_module", TRACE_FROZEN_MODULE_LOAD),
    ("notify_builtin_module_load", TRACE_BUILTIN_MODULE_LOAD),
];

/// Returns a copy of `module` where every named function reports its
/// fingerprint on entry.
pub fn instrument(module: &Node) -> Node {
    let fields = wat::fields(module);
    let mut hooks_placed = fields.iter().any(is_trace_hook_import);
    let insert_after = fields.iter().position(|f| f.is_form("import"));

    let mut out = Vec::with_capacity(fields.len() + LOAD_HOOKS.len() + 1);
    if insert_after.is_none() && !hooks_placed {
        out.extend(hook_imports());
        hooks_placed = true;
    }
    for (index, field) in fields.iter().enumerate() {
        out.push(instrument_field(field));
        if !hooks_placed && Some(index) == insert_after {
            out.extend(hook_imports());
            hooks_placed = true;
        }
    }
    wat::with_fields(module, out)
}

fn is_trace_hook_import(field: &Node) -> bool {
    field.is_form("import")
        && field.as_list().map_or(false, |items| {
            items.iter().any(|item| {
                item.is_form("func")
                    && wat::function_name(item) == Some(TRACE_FUNCTION_CALL)
            })
        })
}

fn hook_imports() -> Vec<Node> {
    [TRACE_FUNCTION_CALL, TRACE_FROZEN_MODULE_LOAD, TRACE_BUILTIN_MODULE_LOAD]
        .iter()
        .map(|name| {
            Node::list(vec![
                Node::atom("import"),
                Node::atom(format!("\"{}\"", HOST_MODULE)),
                Node::atom(format!("\"{}\"", name)),
                Node::list(vec![
                    Node::atom("func"),
                    Node::atom(format!("${}", name)),
                    Node::list(vec![Node::atom("param"), Node::atom("i32")]),
                ]),
            ])
        })
        .collect()
}

fn instrument_field(field: &Node) -> Node {
    let Some(name) = wat::function_name(field) else {
        return field.clone();
    };
    let items = field.as_list().unwrap_or(&[]);
    // Inline imports have no body.
    if items.iter().any(|item| item.is_form("import")) {
        return field.clone();
    }

    let start = wat::body_start(items);
    let mut out = Vec::with_capacity(items.len() + 2);
    out.extend_from_slice(&items[..start]);
    if let Some((_, hook)) = LOAD_HOOKS.iter().find(|(func, _)| *func == name) {
        out.push(wat::call(
            hook,
            vec![Node::list(vec![Node::atom("local.get"), Node::atom("$0")])],
        ));
    }
    out.push(wat::call(TRACE_FUNCTION_CALL, vec![wat::i32_const(fnv1a_32(name))]));
    out.extend_from_slice(&items[start..]);
    Node::List(out)
}
