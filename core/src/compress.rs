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

//! Replaces the module's data segments with two LZ4 frames that the
//! runtime's `decompress_data_initializer` expands on startup.
//!
//! Range 0 covers the frozen image (`[1 MiB, 8 MiB)`), range 1 the static
//! data from 8 MiB on. The header at [`HEADER_ADDR`] holds one
//! `(tag, blob addr, blob len, target addr)` record of u32 LE per range.

use std::io::Write;

use lz4::{BlockSize, EncoderBuilder};
use thiserror::Error;

use crate::escape::EscapeError;
use crate::packer::{BASE_ADDR, MAX_ADDR};
use crate::sexpr::Node;
use crate::wat;

pub const COMPRESSION_TYPE_LZ4: u32 = 0x0034_7a6c;
pub const HEADER_ADDR: u32 = 1024;
pub const FIRST_BLOB_ADDR: u32 = 2048;
const BLOB_ALIGN: u32 = 1024;

/// Highest LZ4 HC level; liblz4 clamps anything above its own maximum.
const LZ4_LEVEL: u32 = 16;

/// Upper bound on the flattened data image.
pub const MAX_IMAGE_LEN: u64 = 20 * 1024 * 1024;

pub const HEADER_DATA_NAME: &str = "$.compressed_data.header";
pub const FIRST_BLOB_DATA_NAME: &str = "$.compressed_data.0";
pub const SECOND_BLOB_DATA_NAME: &str = "$.compressed_data.1";

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("{0}")]
    Escape(#[from] EscapeError),
    #[error("non-zero data at {addr:#x} lies below the frozen image at {:#x}", BASE_ADDR)]
    DataBelowImage { addr: usize },
    #[error("compressed blobs end at {end:#x}, past the frozen image at {:#x}", BASE_ADDR)]
    Overflow { end: u64 },
    #[error("data segment ending at {end:#x} exceeds the {} byte image limit", MAX_IMAGE_LEN)]
    ImageTooLarge { end: u64 },
    #[error("writing lz4 frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Sizes of the two ranges before and after compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionReport {
    pub frozen_len: usize,
    pub frozen_compressed: usize,
    pub static_len: usize,
    pub static_compressed: usize,
}

/// Overlays every active data segment into one image (later segments win)
/// with trailing zeros trimmed.
pub fn flatten_data(module: &Node) -> Result<Vec<u8>, CompressError> {
    let mut image: Vec<u8> = Vec::new();
    for field in wat::fields(module) {
        let Some(segment) = wat::data_segment(field)? else {
            continue;
        };
        let end = segment.offset as u64 + segment.bytes.len() as u64;
        if end > MAX_IMAGE_LEN {
            return Err(CompressError::ImageTooLarge { end });
        }
        let (start, end) = (segment.offset as usize, end as usize);
        if image.len() < end {
            image.resize(end, 0);
        }
        image[start..end].copy_from_slice(&segment.bytes);
    }
    let used = image.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    image.truncate(used);
    Ok(image)
}

fn lz4_frame(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut encoder = EncoderBuilder::new()
        .level(LZ4_LEVEL)
        .block_size(BlockSize::Max4MB)
        .build(Vec::new())?;
    encoder.write_all(data)?;
    let (frame, result) = encoder.finish();
    result?;
    Ok(frame)
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

pub fn compress_data_segments(module: &Node) -> Result<(Node, CompressionReport), CompressError> {
    let image = flatten_data(module)?;
    let base = BASE_ADDR as usize;
    let max = MAX_ADDR as usize;

    if let Some(addr) = image.iter().take(base).position(|&b| b != 0) {
        return Err(CompressError::DataBelowImage { addr });
    }
    let frozen = image.get(base..max.min(image.len())).unwrap_or(&[]);
    let frozen_used = frozen.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let frozen = &frozen[..frozen_used];
    let statics = image.get(max..).unwrap_or(&[]);

    let blob0 = lz4_frame(frozen)?;
    let blob1 = lz4_frame(statics)?;

    let addr0 = FIRST_BLOB_ADDR;
    let addr1 = align_up(addr0 + blob0.len() as u32, BLOB_ALIGN);
    let end = addr1 as u64 + blob1.len() as u64;
    if end > BASE_ADDR as u64 {
        return Err(CompressError::Overflow { end });
    }

    let header: Vec<u8> = [
        COMPRESSION_TYPE_LZ4,
        addr0,
        blob0.len() as u32,
        BASE_ADDR,
        COMPRESSION_TYPE_LZ4,
        addr1,
        blob1.len() as u32,
        MAX_ADDR,
    ]
    .iter()
    .flat_map(|v| v.to_le_bytes())
    .collect();

    let report = CompressionReport {
        frozen_len: frozen.len(),
        frozen_compressed: blob0.len(),
        static_len: statics.len(),
        static_compressed: blob1.len(),
    };
    log::info!(
        "data compressed: frozen {} -> {} bytes, static {} -> {} bytes",
        report.frozen_len,
        report.frozen_compressed,
        report.static_len,
        report.static_compressed
    );

    let mut fields: Vec<Node> = wat::fields(module)
        .iter()
        .filter(|field| !is_active_data(field))
        .cloned()
        .collect();
    fields.push(wat::data_field(HEADER_DATA_NAME, HEADER_ADDR, &header));
    fields.push(wat::data_field(FIRST_BLOB_DATA_NAME, addr0, &blob0));
    fields.push(wat::data_field(SECOND_BLOB_DATA_NAME, addr1, &blob1));
    Ok((wat::with_fields(module, fields), report))
}

fn is_active_data(field: &Node) -> bool {
    matches!(wat::data_segment(field), Ok(Some(_)))
}
