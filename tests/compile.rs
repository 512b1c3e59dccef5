//! Black-box compile-to-assembly scenarios (spec §8): each checks the
//! emitted NASM text carries the dispatch/label structure the scenario
//! implies, rather than actually assembling/linking/running it (this crate
//! never invokes an assembler in its own test suite).

use std::io::Write;

use ome::compile::compile_to_assembly;

fn write_source(dir: &tempfile_dir::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

/// Minimal self-contained stand-in for a temp-dir crate: creates a uniquely
/// named directory under the system temp root and removes it on drop.
mod tempfile_dir {
    use std::path::{Path, PathBuf};

    pub struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        pub fn new(label: &str) -> Self {
            let mut path = std::env::temp_dir();
            let unique = format!("ome-test-{}-{:x}", label, std::process::id());
            path.push(unique);
            std::fs::create_dir_all(&path).unwrap();
            TempDir { path }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// E1: a `print`-only hello-world program emits the interned string data and
/// the `print`/`print:` dispatch chain.
#[test]
fn hello_world_emits_print_dispatch_and_interned_string() {
    let dir = tempfile_dir::TempDir::new("e1");
    let path = write_source(&dir, "hello.ome", "| main |\n\t'hello, world' print\n");
    let asm = compile_to_assembly(&path).unwrap();
    assert!(asm.contains("OME_message_print:"));
    assert!(asm.contains("OME_message_main:"));
    assert!(asm.contains("section .data"));
    assert!(asm.contains("104,101,108,108,111")); // "hello" bytes
}

/// E2: arithmetic on small integers resolves through the `plus:`/`times:`
/// built-in dispatchers.
#[test]
fn arithmetic_emits_small_integer_dispatchers() {
    let dir = tempfile_dir::TempDir::new("e2");
    let path = write_source(&dir, "arith.ome", "| main |\n\t(2 plus: 3) times: 4\n");
    let asm = compile_to_assembly(&path).unwrap();
    assert!(asm.contains("OME_message_plus_:"));
    assert!(asm.contains("OME_message_times_:"));
}

/// E3: a block literal with a recursive self-send compiles both the static
/// direct call (`self fib: n`) and, once the block is routed through a
/// local variable, a dynamic dispatch for the same symbol.
#[test]
fn recursive_self_send_and_dynamic_dispatch_both_compile() {
    let dir = tempfile_dir::TempDir::new("e3");
    let path = write_source(
        &dir,
        "fib.ome",
        "| main |\n\tfibBlock = { | fib: n | self fib: n }\n\tfibBlock fib: 10\n",
    );
    let asm = compile_to_assembly(&path).unwrap();
    assert!(asm.contains("OME_message_fib_:"));
    assert!(asm.contains("jmp OME_method_"));
}

/// E4: reachable arithmetic always carries its runtime type-error fallback,
/// the structural stand-in for "wrong-typed receiver surfaces a Type-Error".
#[test]
fn arithmetic_dispatch_carries_type_error_fallback() {
    let dir = tempfile_dir::TempDir::new("e4");
    let path = write_source(&dir, "typeerr.ome", "| main |\n\t2 plus: 3\n");
    let asm = compile_to_assembly(&path).unwrap();
    assert!(asm.contains("OME_Error_Constant(OME_Constant_Type_Error)"));
}

/// E5: an unbound name fails at resolve time rather than reaching codegen.
#[test]
fn unbound_name_fails_to_compile() {
    let dir = tempfile_dir::TempDir::new("e5");
    let path = write_source(&dir, "unbound.ome", "| main |\n\tundefinedName\n");
    let err = compile_to_assembly(&path).unwrap_err();
    assert_eq!(err.category(), "UnboundName");
}

/// E6: redeclaring a slot name in the same block is rejected during parsing.
#[test]
fn duplicate_slot_name_fails_to_compile() {
    let dir = tempfile_dir::TempDir::new("e6");
    let path = write_source(&dir, "dup.ome", "x = 1\nx = 2\n| main |\n\tx\n");
    let err = compile_to_assembly(&path).unwrap_err();
    assert_eq!(err.category(), "NameConflict");
}

/// A program missing `main` altogether is rejected before codegen runs.
#[test]
fn missing_main_method_fails_to_compile() {
    let dir = tempfile_dir::TempDir::new("nomain");
    let path = write_source(&dir, "nomain.ome", "| helper |\n\t1\n");
    let err = compile_to_assembly(&path).unwrap_err();
    assert_eq!(err.category(), "NoMainMethod");
}
