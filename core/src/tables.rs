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

//! Fixed knowledge about the CPython runtime's function names.

use crate::wat::fnv1a_32;
use std::collections::HashSet;

/// Functions kept regardless of traced reachability: deallocation,
/// exception/traceback printing, GIL teardown and process exit paths. Sample
/// calls rarely reach them but the runtime aborts without them.
pub const DEFAULT_PINNED_FUNCTIONS: &[&str] = &[
    "_Py_Dealloc",
    "PyObject_ClearWeakRefs",
    "PyObject_ClearManagedDict",
    "clear_inline_values",
    "is_basic_ref_or_proxy",
    "_PyWeakref_GetWeakrefCount",
    "set_len",
    "_weakref__remove_dead_weakref",
    "is_dead_weakref",
    "clear_slots",
    "PyObject_DelItem",
    "lock_dealloc",
    "_PySuper_Lookup",
    "wrapperdescr_call",
    "_PyObject_RealIsSubclass",
    "recursive_issubclass",
    "Py_Exit",
    "exit",
    "close_file",
    "_Exit",
    "__wasi_proc_exit",
    "setvbuf",
    "_PyErr_NoMemory",
    "optimized_out_function_panic_handler",
    "snprintf",
    "log_utf8_c",
    "strlen",
    "log_utf8",
    "abort",
    "decompress_data_initializer",
    "pymain_init",
    "_Py_GetErrorHandler",
    "siprintf",
    "vfiprintf",
    "iprintf",
    // exception/traceback printing (~8 KiB of code)
    "PyErr_SetString",
    "_PyErr_SetString",
    "BaseException_vectorcall",
    "PyErr_PrintEx",
    "_PyErr_PrintEx",
    "handle_system_exit",
    "_PySys_GetOptionalAttr",
    "_PySys_Audit",
    "cfunction_vectorcall_FASTCALL",
    "sys_excepthook",
    "PyErr_Display",
    "_PyErr_Display",
    "PyImport_ImportModuleAttrString",
    "PyImport_ImportModuleAttr",
    "_PyErr_Format",
    "meth_repr",
    "puts",
    "fputs",
    "fwrite",
    "__overflow",
    "BaseException_dealloc",
    "PySet_New",
    "PySet_Add",
    "print_exception_recursive",
    "_Py_EnterRecursiveCall",
    "PyException_GetCause",
    "PyException_GetContext",
    "PyObject_GetOptionalAttr",
    "_Py_type_getattro",
    "_Py_type_getattro_impl",
    "PyDescr_IsData",
    "getset_get",
    "type_get_module",
    "PyType_GetQualName",
    "PyFile_WriteObject",
    "PyObject_GenericGetAttr",
    "method_get",
    "stdprinter_write",
    "_Py_write",
    "_Py_write_impl",
    "_PySys_SetAttr",
    "PyEval_SaveThread",
    "_PyThreadState_Detach",
    "detach_thread",
    "_PyEval_ReleaseLock",
    "drop_gil",
    "drop_gil_impl",
    "write",
    "PyEval_RestoreThread",
    "BaseException_str",
    "PyUnicode_GetLength",
    "PyFile_WriteString",
    "set_dealloc",
    "_PyFile_Flush",
    "PyObject_CallMethodNoArgs",
    "PyObject_VectorcallMethod",
    "method_vectorcall_NOARGS",
];

/// Builtin (C) module → name prefixes of the functions implementing it.
/// Consulted only for modules that were never observed loading.
pub const BUILTIN_MODULE_FUNCTION_PREFIXES: &[(&str, &[&str])] = &[
    ("array", &["array"]),
    ("_bisect", &["_bisect"]),
    ("_contextvars", &["_contextvars"]),
    ("_heapq", &["_heapq"]),
    ("_json", &["_json"]),
    ("_queue", &["_queue"]),
    ("_random", &["_random"]),
    ("_struct", &["Struct_", "unpackiter_"]),
    ("math", &["math"]),
    ("cmath", &["cmath"]),
    ("_statistics", &["_statistics"]),
    ("_decimal", &["_decimal"]),
    ("binascii", &["binascii"]),
    (
        "_md5",
        &["md5_", "MD5_", "MD5Type_", "Hacl_Hash_MD5", "python_hashlib_Hacl_Hash_MD5"],
    ),
    (
        "_sha1",
        &["_sha1", "SHA1", "Hacl_Hash_SHA1", "python_hashlib_Hacl_Hash_SHA1"],
    ),
    (
        "_sha2",
        &[
            "_sha2",
            "SHA2",
            "SHA256",
            "SHA512",
            "Hacl_Hash_SHA2",
            "python_hashlib_Hacl_Hash_SHA2",
        ],
    ),
    (
        "_sha3",
        &["_sha3", "SHA3", "py_sha3", "Hacl_Hash_SHA3", "python_hashlib_Hacl_Hash_SHA3"],
    ),
    ("termios", &["termios"]),
    ("atexit", &["atexit"]),
    ("faulthandler", &["faulthandler"]),
    ("posix", &["posix"]),
    ("_signal", &["_signal_", "signal_", "signaldict"]),
    ("_codecs", &["_codecs"]),
    ("_collections", &["_collections"]),
    ("errno", &["errno"]),
    ("_io", &["_io"]),
    ("itertools", &["itertools"]),
    ("_sre", &["_sre_", "sre_"]),
    ("_sysconfig", &["_sysconfig"]),
    ("_thread", &["_thread"]),
    ("time", &["time", "pytime"]),
    ("_typing", &["_typing"]),
    ("_weakref", &["_weakref"]),
    ("_abc", &["_abc"]),
    ("_functools", &["_functools"]),
    ("_operator", &["_operator"]),
    ("marshal", &["marshal_", "PyMarshal_"]),
    (
        "_ast",
        &["_PyAST", "PyAST", "obj2ast", "ast2obj", "_ast", "ast_", "astfold_", "astmodule_"],
    ),
    ("_asyncio", &["_asyncio", "task_", "Task", "FutureIter"]),
    ("_tokenize", &["_tokenize", "tokenize"]),
    ("_warnings", &["_PyWarnings"]),
    ("_string", &["_string", "_PyUnicode", "PyUnicode", "unicode"]),
];

/// Prefixes of functions that are safe to drop when untraced: complex
/// numbers, coroutines/generators, the compiler and parser, debug and
/// monitoring hooks, pickle and XML support.
pub const SAFELY_REMOVABLE_PREFIXES: &[&str] = &[
    "_complex",
    "complex_",
    "PyComplex",
    "ucs4lib",
    "ucs2lib",
    "anextawaitable_",
    "coro_",
    "async_",
    "gen_",
    "ag_",
    "SyntaxError",
    "compiler",
    "_PyPegen",
    "_Pypegen",
    "_PyTokenizer",
    "_PyLexer",
    "builtin_compile",
    "_parser",
    "_PyParser",
    "InstructionSequence",
    "_PyInstructionSequence",
    "code_",
    "_PyCode",
    "_PyCompile",
    "PyCompile",
    "Py_Compile",
    "assemble_",
    "PyEval",
    "_PyEval",
    "builtin_eval",
    "validate_",
    "_PyMem_Debug",
    "_Py_Dump",
    "PySys",
    "PyOS",
    "OSError_",
    "oserror_",
    "symtable_",
    "PySymtable_",
    "_PySymtable",
    "sys_trace",
    "_PyMonitoring",
    "monitoring",
    "force_instrument",
    "_Py_call_instr",
    "_Py_Instr",
    "_start",
    "PyPickle",
    "pickle",
    "xml",
];

pub const SAFELY_REMOVABLE_SUFFIXES: &[&str] = &["_rule"];

lazy_static::lazy_static! {
    /// Fingerprints of [`DEFAULT_PINNED_FUNCTIONS`].
    pub static ref DEFAULT_PINNED_FINGERPRINTS: HashSet<u32> =
        DEFAULT_PINNED_FUNCTIONS.iter().map(|name| fnv1a_32(name)).collect();
}

/// Prefixes owned by builtin modules absent from `loaded`.
pub fn unloaded_builtin_prefixes<'a>(
    loaded: impl Fn(&str) -> bool + 'a,
) -> impl Iterator<Item = &'static str> + 'a {
    BUILTIN_MODULE_FUNCTION_PREFIXES
        .iter()
        .filter(move |(module, _)| !loaded(module))
        .flat_map(|(_, prefixes)| prefixes.iter().copied())
}
