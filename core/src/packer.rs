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

//! Frozen module image.
//!
//! The runtime's module loader walks a table of 64-byte records at
//! [`BASE_ADDR`] until it meets an all-zero record:
//!
//! ```text
//! +0   u32 LE  bytecode address
//! +4   u32 LE  bytecode length
//! +8   [u8;56] module path, NUL padded
//! ```
//!
//! A pool of NUL-terminated strings follows the table at
//! `BASE_ADDR + STRINGS_OFFSET`, then the bytecode blobs back to back.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use walkdir::WalkDir;

use crate::sandbox::{Sandbox, SandboxError};
use crate::sexpr::Node;
use crate::wat;

pub const BASE_ADDR: u32 = 1_048_576;
pub const MAX_ADDR: u32 = 8_388_608;
pub const HEADER_LEN: usize = 64;
pub const MAX_PATH_LEN: usize = 56;
pub const MAX_MODULES: usize = 512;
pub const STRINGS_OFFSET: usize = HEADER_LEN * MAX_MODULES;

/// Name given to the data segment carrying the image.
pub const FROZEN_DATA_NAME: &str = "$.data.frozen";

#[derive(Error, Debug)]
pub enum PackError {
    #[error("module path `{path}` is {len} bytes, must be shorter than {}", MAX_PATH_LEN)]
    PathTooLong { path: String, len: usize },
    #[error("{count} modules leave no room for the table terminator (limit {})", MAX_MODULES - 1)]
    TooManyModules { count: usize },
    #[error("frozen image needs {needed} bytes but the window holds {available}")]
    WindowExceeded { needed: usize, available: usize },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read archive {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },
    #[error("{0}")]
    Sandbox(#[from] SandboxError),
}

/// Modules and strings destined for the frozen image.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedModules {
    modules: Vec<(String, Vec<u8>)>,
    strings: Vec<u8>,
    string_addrs: HashMap<String, u32>,
}

impl EmbeddedModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, path: impl Into<String>, bytecode: Vec<u8>) {
        self.modules.push((path.into(), bytecode));
    }

    pub fn modules(&self) -> &[(String, Vec<u8>)] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Interns `value` and returns its absolute guest address. Equal strings
    /// share one address.
    pub fn allocate_string(&mut self, value: &str) -> u32 {
        if let Some(&addr) = self.string_addrs.get(value) {
            return addr;
        }
        let addr = BASE_ADDR + (STRINGS_OFFSET + self.strings.len()) as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        self.string_addrs.insert(value.to_string(), addr);
        addr
    }

    /// Serializes the table, string pool and blobs, starting at offset 0 for
    /// guest address [`BASE_ADDR`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackError> {
        if self.modules.len() >= MAX_MODULES {
            return Err(PackError::TooManyModules {
                count: self.modules.len(),
            });
        }
        let available = (MAX_ADDR - BASE_ADDR) as usize;
        let needed = STRINGS_OFFSET
            + self.strings.len()
            + self.modules.iter().map(|(_, b)| b.len()).sum::<usize>();
        if needed > available {
            return Err(PackError::WindowExceeded { needed, available });
        }

        let mut data = vec![0u8; STRINGS_OFFSET];
        data.extend_from_slice(&self.strings);
        for (index, (path, bytecode)) in self.modules.iter().enumerate() {
            let path_bytes = path.as_bytes();
            if path_bytes.len() >= MAX_PATH_LEN {
                return Err(PackError::PathTooLong {
                    path: path.clone(),
                    len: path_bytes.len(),
                });
            }
            let addr = BASE_ADDR + data.len() as u32;
            let record = &mut data[index * HEADER_LEN..(index + 1) * HEADER_LEN];
            record[0..4].copy_from_slice(&addr.to_le_bytes());
            record[4..8].copy_from_slice(&(bytecode.len() as u32).to_le_bytes());
            record[8..8 + path_bytes.len()].copy_from_slice(path_bytes);
            data.extend_from_slice(bytecode);
        }
        Ok(data)
    }

    /// Places the image into the guest's linear memory at [`BASE_ADDR`].
    pub fn write_to_sandbox(&self, sandbox: &mut Sandbox) -> Result<(), PackError> {
        let data = self.to_bytes()?;
        sandbox.write_memory(BASE_ADDR, &data)?;
        Ok(())
    }

    /// Appends the image to `module` as an active data segment.
    pub fn add_to_module(&self, module: &Node) -> Result<Node, PackError> {
        let data = self.to_bytes()?;
        let mut fields = wat::fields(module).to_vec();
        fields.push(wat::data_field(FROZEN_DATA_NAME, BASE_ADDR, &data));
        Ok(wat::with_fields(module, fields))
    }
}

/// Adds every `.pyc` from the standard-library archive and the user tree,
/// keeping only paths in `filter` when one is given.
pub fn collect_modules(
    store: &mut EmbeddedModules,
    filter: Option<&BTreeSet<String>>,
    stdlib_zip: Option<&Path>,
    user_lib_dir: &Path,
) -> Result<(), PackError> {
    let wanted = |path: &str| filter.map_or(true, |f| f.contains(path));

    if let Some(zip_path) = stdlib_zip {
        let before = store.len();
        add_archive_modules(store, zip_path, &wanted)?;
        log::info!(
            "packed {} modules from {}",
            store.len() - before,
            zip_path.display()
        );
    }

    if !user_lib_dir.is_dir() {
        log::debug!("no user library at {}", user_lib_dir.display());
        return Ok(());
    }
    for entry in WalkDir::new(user_lib_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| PackError::Walk {
            path: user_lib_dir.display().to_string(),
            source,
        })?;
        if !entry.file_type().is_file() || entry.path().extension().map_or(true, |e| e != "pyc") {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(user_lib_dir) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !wanted(&path) {
            continue;
        }
        let bytecode = std::fs::read(entry.path()).map_err(|source| PackError::Io {
            path: entry.path().display().to_string(),
            source,
        })?;
        log::debug!("packing {} ({} bytes)", path, bytecode.len());
        store.add_module(path, bytecode);
    }
    Ok(())
}

fn add_archive_modules(
    store: &mut EmbeddedModules,
    zip_path: &Path,
    wanted: &dyn Fn(&str) -> bool,
) -> Result<(), PackError> {
    let display = zip_path.display().to_string();
    let file = File::open(zip_path).map_err(|source| PackError::Io {
        path: display.clone(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| PackError::Archive {
        path: display.clone(),
        source,
    })?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|source| PackError::Archive {
            path: display.clone(),
            source,
        })?;
        if entry.is_dir() {
            continue;
        }
        let path = entry.name().trim_start_matches('/').to_string();
        if !path.ends_with(".pyc") || !wanted(&path) {
            continue;
        }
        let mut bytecode = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytecode)
            .map_err(|source| PackError::Io {
                path: format!("{}:{}", display, path),
                source,
            })?;
        store.add_module(path, bytecode);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(data: &[u8], index: usize) -> (u32, u32, String) {
        let r = &data[index * HEADER_LEN..(index + 1) * HEADER_LEN];
        let addr = u32::from_le_bytes(r[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(r[4..8].try_into().unwrap());
        let path: Vec<u8> = r[8..].iter().copied().take_while(|&b| b != 0).collect();
        (addr, len, String::from_utf8(path).unwrap())
    }

    #[test]
    fn test_layout_records_and_blobs() {
        let mut store = EmbeddedModules::new();
        store.add_module("a.pyc", vec![1, 2, 3]);
        store.add_module("pkg/b.pyc", vec![4, 5]);
        let name = store.allocate_string("contract");
        assert_eq!(name, BASE_ADDR + STRINGS_OFFSET as u32);

        let data = store.to_bytes().unwrap();
        let (a_addr, a_len, a_path) = record(&data, 0);
        let (b_addr, b_len, b_path) = record(&data, 1);
        assert_eq!((a_len, a_path.as_str()), (3, "a.pyc"));
        assert_eq!((b_len, b_path.as_str()), (2, "pkg/b.pyc"));
        assert_eq!(a_addr, BASE_ADDR + STRINGS_OFFSET as u32 + 9);
        assert!(a_addr + a_len <= b_addr);
        assert_eq!(record(&data, 2), (0, 0, String::new()));

        let at = |addr: u32, len: u32| {
            let start = (addr - BASE_ADDR) as usize;
            data[start..start + len as usize].to_vec()
        };
        assert_eq!(at(a_addr, a_len), vec![1, 2, 3]);
        assert_eq!(at(b_addr, b_len), vec![4, 5]);
        assert_eq!(at(name, 9), b"contract\0");
        assert_eq!(data.len(), (b_addr + b_len - BASE_ADDR) as usize);
    }

    #[test]
    fn test_strings_are_deduplicated() {
        let mut store = EmbeddedModules::new();
        let first = store.allocate_string("ping");
        let other = store.allocate_string("pong");
        assert_eq!(store.allocate_string("ping"), first);
        assert_eq!(other, first + 5);
    }

    #[test]
    fn test_path_length_limit() {
        let mut store = EmbeddedModules::new();
        store.add_module("x".repeat(MAX_PATH_LEN - 1), vec![]);
        assert!(store.to_bytes().is_ok());
        store.add_module("y".repeat(MAX_PATH_LEN), vec![]);
        assert!(matches!(
            store.to_bytes(),
            Err(PackError::PathTooLong { len: MAX_PATH_LEN, .. })
        ));
    }

    #[test]
    fn test_module_count_limit() {
        let mut store = EmbeddedModules::new();
        for i in 0..MAX_MODULES - 1 {
            store.add_module(format!("m{}.pyc", i), vec![0]);
        }
        assert!(store.to_bytes().is_ok());
        store.add_module("last.pyc", vec![0]);
        assert!(matches!(
            store.to_bytes(),
            Err(PackError::TooManyModules { count: MAX_MODULES })
        ));
    }

    #[test]
    fn test_window_limit() {
        let mut store = EmbeddedModules::new();
        let room = (MAX_ADDR - BASE_ADDR) as usize - STRINGS_OFFSET;
        store.add_module("big.pyc", vec![7; room]);
        assert_eq!(store.to_bytes().unwrap().len(), room + STRINGS_OFFSET);
        store.add_module("one_more.pyc", vec![7]);
        assert!(matches!(
            store.to_bytes(),
            Err(PackError::WindowExceeded { .. })
        ));
    }

    #[test]
    fn test_add_to_module_appends_segment() {
        let mut store = EmbeddedModules::new();
        store.add_module("a.pyc", vec![0xff]);
        let module = crate::sexpr::parse("(module (memory 256))").unwrap();
        let out = store.add_to_module(&module).unwrap();
        let fields = wat::fields(&out);
        assert_eq!(fields.len(), 2);
        let seg = wat::data_segment(&fields[1]).unwrap().unwrap();
        assert_eq!(seg.offset, BASE_ADDR);
        assert_eq!(seg.bytes, store.to_bytes().unwrap());
    }

    #[test]
    fn test_collect_modules_from_archive_and_tree() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("stdlib.zip");
        {
            let file = File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let opts = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.add_directory("json/", opts).unwrap();
            writer.start_file("json/__init__.pyc", opts).unwrap();
            writer.write_all(b"json").unwrap();
            writer.start_file("/os.pyc", opts).unwrap();
            writer.write_all(b"os").unwrap();
            writer.start_file("README.txt", opts).unwrap();
            writer.write_all(b"skip").unwrap();
            writer.finish().unwrap();
        }
        let lib = dir.path().join("lib");
        std::fs::create_dir_all(lib.join("app")).unwrap();
        std::fs::write(lib.join("contract.pyc"), b"c").unwrap();
        std::fs::write(lib.join("contract.py"), b"source").unwrap();
        std::fs::write(lib.join("app").join("util.pyc"), b"u").unwrap();

        let mut all = EmbeddedModules::new();
        collect_modules(&mut all, None, Some(&zip_path), &lib).unwrap();
        let paths: Vec<_> = all.modules().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec!["json/__init__.pyc", "os.pyc", "app/util.pyc", "contract.pyc"]
        );

        let filter: BTreeSet<String> = ["os.pyc", "contract.pyc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut some = EmbeddedModules::new();
        collect_modules(&mut some, Some(&filter), Some(&zip_path), &lib).unwrap();
        let paths: Vec<_> = some.modules().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["os.pyc", "contract.pyc"]);
        assert_eq!(some.modules()[0].1, b"os");
    }

    #[test]
    fn test_missing_user_lib_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EmbeddedModules::new();
        collect_modules(&mut store, None, None, &dir.path().join("absent")).unwrap();
        assert!(store.is_empty());
    }
}
