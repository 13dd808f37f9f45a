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

//! Module-level views over a parsed `(module ...)` tree.

use crate::escape::{self, EscapeError};
use crate::sexpr::Node;
use std::collections::BTreeSet;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over the bytes of `name`. This is the only function identity the
/// trace hook carries across the host boundary.
pub fn fnv1a_32(name: &str) -> u32 {
    name.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    })
}

/// Forms that may precede a function's first instruction.
const DECLARATION_FORMS: &[&str] = &["type", "export", "import", "param", "result", "local"];

/// Top-level fields of the module, skipping the leading `module` keyword
/// (and module name, if any).
pub fn fields(module: &Node) -> &[Node] {
    let children = module.as_list().unwrap_or(&[]);
    let start = children
        .iter()
        .position(|c| c.as_list().is_some())
        .unwrap_or(children.len());
    &children[start..]
}

/// Rebuilds `module` keeping its keyword/name and replacing its fields.
pub fn with_fields(module: &Node, fields_out: Vec<Node>) -> Node {
    let children = module.as_list().unwrap_or(&[]);
    let mut items: Vec<Node> = children
        .iter()
        .take_while(|c| c.as_list().is_none())
        .cloned()
        .collect();
    if items.is_empty() {
        items.push(Node::atom("module"));
    }
    items.extend(fields_out);
    Node::List(items)
}

/// Returns the name of a `(func $name ...)` form without the `$`.
pub fn function_name(func: &Node) -> Option<&str> {
    if !func.is_form("func") {
        return None;
    }
    func.as_list()?.get(1)?.as_atom()?.strip_prefix('$')
}

/// Index of the first body instruction of a `func` form.
pub fn body_start(func: &[Node]) -> usize {
    let mut pos = 2;
    while let Some(item) = func.get(pos) {
        match item.head() {
            Some(head) if DECLARATION_FORMS.contains(&head) => pos += 1,
            _ => break,
        }
    }
    pos.min(func.len())
}

pub fn function_names(module: &Node) -> BTreeSet<String> {
    fields(module)
        .iter()
        .filter_map(function_name)
        .map(str::to_string)
        .collect()
}

/// An active data segment with a constant offset.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// Decodes `(data [$name] [(memory ..)] (i32.const N) "..."*)`.
///
/// Passive segments and segments with a non-constant offset yield `None`.
pub fn data_segment(field: &Node) -> Result<Option<DataSegment>, EscapeError> {
    if !field.is_form("data") {
        return Ok(None);
    }
    let children = field.as_list().unwrap_or(&[]);
    let Some(offset) = children.iter().skip(1).find_map(const_offset) else {
        return Ok(None);
    };
    let mut bytes = Vec::new();
    for literal in children
        .iter()
        .filter_map(Node::as_atom)
        .filter(|a| a.starts_with('"'))
    {
        bytes.extend(escape::unescape(literal)?);
    }
    Ok(Some(DataSegment { offset, bytes }))
}

fn const_offset(node: &Node) -> Option<u32> {
    let list = node.as_list()?;
    match node.head()? {
        "i32.const" => parse_u32(list.get(1)?.as_atom()?),
        "offset" => list.iter().skip(1).find_map(const_offset),
        _ => None,
    }
}

fn parse_u32(text: &str) -> Option<u32> {
    let text = text.replace('_', "");
    if let Some(hex) = text.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).ok();
    }
    match text.parse::<i64>().ok()? {
        v @ 0..=0xffff_ffff => Some(v as u32),
        v @ -0x8000_0000..=-1 => Some(v as i32 as u32),
        _ => None,
    }
}

/// Builds `(data $name (i32.const offset) "...")`.
pub fn data_field(name: &str, offset: u32, bytes: &[u8]) -> Node {
    Node::list(vec![
        Node::atom("data"),
        Node::atom(name),
        i32_const(offset),
        Node::atom(escape::escape(bytes)),
    ])
}

pub fn i32_const(value: u32) -> Node {
    Node::list(vec![Node::atom("i32.const"), Node::atom(value.to_string())])
}

pub fn call(target: &str, args: Vec<Node>) -> Node {
    let mut items = vec![Node::atom("call"), Node::atom(format!("${}", target))];
    items.extend(args);
    Node::list(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexpr::parse;

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_32(""), 0x811c9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_function_names_and_body_start() {
        let module = parse(
            "(module (import \"env\" \"x\" (func $x)) \
             (func $f (type $0) (param $0 i32) (result i32) (local $1 i32) (local.get $0)) \
             (func $g nop))",
        )
        .unwrap();
        let names: Vec<_> = function_names(&module).into_iter().collect();
        assert_eq!(names, vec!["f", "g"]);

        let f = fields(&module)[1].as_list().unwrap();
        assert_eq!(body_start(f), 6);
        let g = fields(&module)[2].as_list().unwrap();
        assert_eq!(body_start(g), 2);
    }

    #[test]
    fn test_fields_skip_module_name() {
        let module = parse("(module $m (memory 1))").unwrap();
        assert_eq!(fields(&module).len(), 1);
        assert!(fields(&module)[0].is_form("memory"));
        let rebuilt = with_fields(&module, vec![parse("(memory 2)").unwrap()]);
        assert_eq!(rebuilt.to_text(), "(module $m (memory 2))");
    }

    #[test]
    fn test_data_segment_forms() {
        let module = parse(
            "(module \
             (data $a (i32.const 1024) \"ab\" \"\\00\") \
             (data (memory $0) (offset (i32.const 0x10)) \"c\") \
             (data (i32.const -1) \"d\") \
             (data $passive \"e\"))",
        )
        .unwrap();
        let segs: Vec<_> = fields(&module)
            .iter()
            .map(|f| data_segment(f).unwrap())
            .collect();
        assert_eq!(
            segs[0],
            Some(DataSegment { offset: 1024, bytes: vec![b'a', b'b', 0] })
        );
        assert_eq!(segs[1], Some(DataSegment { offset: 16, bytes: b"c".to_vec() }));
        assert_eq!(segs[2].as_ref().unwrap().offset, u32::MAX);
        assert_eq!(segs[3], None);
    }

    #[test]
    fn test_data_field_round_trips() {
        let field = data_field("$.d", 8, b"\x01\"x");
        assert_eq!(field.to_text(), "(data $.d (i32.const 8) \"\\01\\\"x\")");
        assert_eq!(
            data_segment(&field).unwrap(),
            Some(DataSegment { offset: 8, bytes: b"\x01\"x".to_vec() })
        );
    }
}
