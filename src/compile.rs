//! Top-level driver: source file to executable (spec §6/§10).
//!
//! Grounded in `examples/original_source/ome/compiler.py`'s
//! `compile_file_to_code`/`compile_file` orchestration and the teacher's
//! `compiler/mod.rs: compile_nasm`/`link_program` for the NASM/`cc`
//! subprocess plumbing (`std::process::Command`, platform-conditional
//! assembler flags).

use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;

use crate::ast::TopLevelMethod;
use crate::error::OmeError;
use crate::parser::Parser;
use crate::program::IrDump;
use crate::resolver::{resolve_block_refs, Resolver};

/// Parse `path`'s contents into the unresolved AST (`--dump-ast`, spec §10).
pub fn parse_to_ast(path: &Path) -> Result<TopLevelMethod, OmeError> {
    Parser::from_file(path)?.parse_toplevel()
}

/// Parse and run both resolver passes, without lowering to IR
/// (`--dump-resolved-ast`, spec §10).
pub fn resolve_to_ast(path: &Path) -> Result<TopLevelMethod, OmeError> {
    let mut toplevel = parse_to_ast(path)?;
    let builtin_names = builtin_method_symbols();
    Resolver::new().resolve(&mut toplevel, &builtin_names)?;
    resolve_block_refs(&mut toplevel)?;
    Ok(toplevel)
}

/// Parse, resolve, and compile `path`'s contents down to a complete NASM
/// listing, without touching the filesystem beyond reading the source.
pub fn compile_to_assembly(path: &Path) -> Result<String, OmeError> {
    let stream_name = path.to_string_lossy().to_string();
    let mut toplevel = resolve_to_ast(path)?;
    crate::program::compile(&mut toplevel, &stream_name)
}

/// Parse, resolve, and lower `path`'s contents down to IR, keeping the
/// lowered methods instead of discarding them into assembly text
/// (`--dump-ir`, spec §10).
pub fn compile_to_ir(path: &Path) -> Result<IrDump, OmeError> {
    let stream_name = path.to_string_lossy().to_string();
    let mut toplevel = resolve_to_ast(path)?;
    let (_, ir) = crate::program::compile_with_ir(&mut toplevel, &stream_name)?;
    Ok(ir)
}

/// The outermost scope's visible names (spec §3 `BuiltInBlock`): every
/// symbol a built-in method supplies, seeding pass A's scope stack so a
/// bare reference to one resolves as a self-slot rather than failing
/// unbound.
fn builtin_method_symbols() -> Vec<String> {
    let mut names: Vec<String> = crate::target::x86_64::builtin_methods().iter().map(|m| m.symbol.to_string()).collect();
    names.sort();
    names.dedup();
    names
}

/// The assembler/linker calling convention for one target triple (spec §10
/// `--target`). Only the two platforms the reference toolchain actually
/// assembles for are recognised; anything else is a hard error before
/// compilation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    X86_64Linux,
    X86_64Macos,
}

impl TargetPlatform {
    /// Parse a `--target` string such as `x86_64-linux`.
    pub fn parse(name: &str) -> Result<Self, OmeError> {
        match name {
            "x86_64-linux" => Ok(TargetPlatform::X86_64Linux),
            "x86_64-macos" | "x86_64-darwin" => Ok(TargetPlatform::X86_64Macos),
            other => Err(OmeError::UnsupportedTarget { platform: other.to_string() }),
        }
    }

    /// The platform this binary was itself built for, used when `--target`
    /// is omitted.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            TargetPlatform::X86_64Macos
        } else {
            TargetPlatform::X86_64Linux
        }
    }

    fn assembler_args(self, obj_path: &Path) -> Vec<String> {
        let format = match self {
            TargetPlatform::X86_64Linux => "elf64",
            TargetPlatform::X86_64Macos => "macho64",
        };
        vec!["-f".to_string(), format.to_string(), "-o".to_string(), obj_path.to_string_lossy().to_string(), "-".to_string()]
    }

    fn linker_args(self, obj_path: &Path, exe_path: &Path) -> Vec<String> {
        // The emitted object defines its own `_start` and never touches libc
        // (spec §6: the runtime is a handful of raw syscalls), so linking in
        // a C runtime would only collide with it. `-nostdlib` keeps `cc`
        // down to a plain linker invocation over our one object.
        match self {
            TargetPlatform::X86_64Linux => vec![
                "-nostdlib".to_string(),
                "-static".to_string(),
                "-o".to_string(),
                exe_path.to_string_lossy().to_string(),
                obj_path.to_string_lossy().to_string(),
            ],
            TargetPlatform::X86_64Macos => vec![
                "-arch".to_string(),
                "x86_64".to_string(),
                "-nostdlib".to_string(),
                "-static".to_string(),
                "-Wl,-e,_start".to_string(),
                "-o".to_string(),
                exe_path.to_string_lossy().to_string(),
                obj_path.to_string_lossy().to_string(),
            ],
        }
    }
}

/// Compile `path` all the way to a native executable at `output` (default:
/// `path` with its extension stripped) for the host platform, invoking the
/// system assembler and linker as subprocesses (spec §10 ambient stack).
pub fn compile_file(path: &Path, output: Option<&Path>) -> Result<(), OmeError> {
    compile_file_for(path, output, TargetPlatform::host())
}

/// As [`compile_file`], targeting a specific platform rather than the host
/// the compiler itself runs on (spec §10 `--target`).
pub fn compile_file_for(path: &Path, output: Option<&Path>, target: TargetPlatform) -> Result<(), OmeError> {
    let asm = compile_to_assembly(path)?;
    let exe_path = match output {
        Some(p) => p.to_path_buf(),
        None => path.with_extension(""),
    };
    let obj_path = exe_path.with_extension("o");
    run_assembler(&asm, &obj_path, target)?;
    run_linker(&obj_path, &exe_path, target)?;
    Ok(())
}

/// Pipe `asm` into `nasm` reading from stdin, writing the object file
/// straight to `obj_path`.
fn run_assembler(asm: &str, obj_path: &Path, target: TargetPlatform) -> Result<(), OmeError> {
    use std::io::Write;

    info!("assembling {}", obj_path.to_string_lossy());
    let mut child = Command::new("nasm")
        .args(target.assembler_args(obj_path))
        .stdin(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| OmeError::Io { message: format!("failed to start nasm: {}", e) })?;
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(asm.as_bytes())
        .map_err(|e| OmeError::Io { message: format!("failed to write to nasm: {}", e) })?;
    let status = child.wait().map_err(|e| OmeError::Io { message: format!("failed to wait on nasm: {}", e) })?;
    if !status.success() {
        return Err(OmeError::Backend { program: "nasm".to_string(), code: status.code().unwrap_or(-1) });
    }
    Ok(())
}

fn run_linker(obj_path: &Path, exe_path: &Path, target: TargetPlatform) -> Result<(), OmeError> {
    info!("linking {}", exe_path.to_string_lossy());
    let status = Command::new("cc")
        .args(target.linker_args(obj_path, exe_path))
        .status()
        .map_err(|e| OmeError::Io { message: format!("failed to start cc: {}", e) })?;
    if !status.success() {
        return Err(OmeError::Backend { program: "cc".to_string(), code: status.code().unwrap_or(-1) });
    }
    Ok(())
}

/// Resolve `output`'s default relative to the input path the way the
/// reference `compile_file` does: same stem, extension stripped.
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognised_target_triples_parse() {
        assert_eq!(TargetPlatform::parse("x86_64-linux").unwrap(), TargetPlatform::X86_64Linux);
        assert_eq!(TargetPlatform::parse("x86_64-macos").unwrap(), TargetPlatform::X86_64Macos);
        assert_eq!(TargetPlatform::parse("x86_64-darwin").unwrap(), TargetPlatform::X86_64Macos);
    }

    #[test]
    fn unknown_target_triple_is_rejected() {
        let err = TargetPlatform::parse("arm64-linux").unwrap_err();
        assert_eq!(err.category(), "UnsupportedTarget");
    }
}
