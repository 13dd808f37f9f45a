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

//! Byte codec for quoted data strings.
//!
//! `escape` never emits `\t`, `\n` or `\r`; those bytes go out as hex even
//! though `unescape` understands the short forms.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EscapeError {
    #[error("String must be doubly-quoted: {0}")]
    NotQuoted(String),
}

/// Decodes a quoted string atom (delimiters included) into raw bytes.
pub fn unescape(literal: &str) -> Result<Vec<u8>, EscapeError> {
    let content = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| literal.len() >= 2)
        .ok_or_else(|| EscapeError::NotQuoted(preview(literal)))?;

    let bytes = content.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let short = match bytes[i + 1] {
            b't' => Some(b'\t'),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b'"' => Some(b'"'),
            b'\'' => Some(b'\''),
            b'\\' => Some(b'\\'),
            _ => None,
        };
        if let Some(byte) = short {
            out.push(byte);
            i += 2;
        } else if let Some(byte) = hex_pair(bytes.get(i + 1..i + 3)) {
            out.push(byte);
            i += 3;
        } else {
            out.push(b'\\');
            i += 1;
        }
    }
    Ok(out)
}

fn hex_pair(pair: Option<&[u8]>) -> Option<u8> {
    let pair = std::str::from_utf8(pair?).ok()?;
    if !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(pair, 16).ok()
}

/// Encodes raw bytes as a quoted string atom.
pub fn escape(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 2);
    out.push('"');
    for &b in data {
        match b {
            b'"' => out.push_str("\\\""),
            b'\'' => out.push_str("\\'"),
            b'\\' => out.push_str("\\\\"),
            32..=126 => out.push(b as char),
            _ => out.push_str(&format!("\\{:02x}", b)),
        }
    }
    out.push('"');
    out
}

fn preview(s: &str) -> String {
    s.chars().take(32).collect()
}
