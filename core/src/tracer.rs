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

//! Drives entry points through an instrumented sandbox.

use crate::entry_points::{split_entry_point, EntryPoints, DEFAULT_PAYLOAD};
use crate::sandbox::{Outcome, Sandbox, SandboxError, TraceLog};

/// Runs every entry point once per payload, in order, resetting the
/// instance after each call. Storage written by one call is visible to the
/// next. Returns the trace accumulated over the whole session. A failed
/// reset ends the session with an error.
pub fn trace(sandbox: &mut Sandbox, entry_points: &EntryPoints) -> Result<TraceLog, SandboxError> {
    let default_payloads = [DEFAULT_PAYLOAD.to_vec()];
    for (name, payloads) in entry_points.iter() {
        let (_, export) = split_entry_point(name);
        let payloads = if payloads.is_empty() {
            &default_payloads[..]
        } else {
            payloads
        };
        for input in payloads {
            log::info!("running {}({})", name, String::from_utf8_lossy(input));
            if let Outcome::Trapped(message) = sandbox.run(input, export) {
                log::warn!("{} trapped: {}", name, message);
            }
            sandbox.reset()?;
        }
    }
    Ok(sandbox.trace().clone())
}
