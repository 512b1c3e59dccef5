//! The `ome` compiler driver binary.

mod cli;

use cli::*;

use std::fs;

use log::{error, info};
use ome::compile::TargetPlatform;
use ome::OmeError;

fn report_and_exit(err: &OmeError) -> ! {
    error!("{}", err);
    std::process::exit(1)
}

fn canonicalize_or_exit(path: &std::path::Path) -> std::path::PathBuf {
    match fs::canonicalize(path) {
        Ok(f) => f,
        Err(e) => {
            error!("{}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn write_or_print(output: Option<&std::path::Path>, text: &str) {
    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, text) {
                error!("{}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
        None => print!("{}", text),
    }
}

fn to_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).expect("dumped value is always representable as JSON")
}

/// Handle any of `--dump-ast`/`--dump-resolved-ast`/`--dump-ir`/
/// `--dump-target-code` on `build_args`, returning `true` if one fired (in
/// which case the caller should not also compile/assemble).
fn handle_dump_flags(file: &std::path::Path, build_args: &BuildArgs) -> bool {
    if build_args.dump_ast {
        match ome::compile::parse_to_ast(file) {
            Ok(ast) => write_or_print(build_args.output.as_deref(), &to_json(&ast)),
            Err(e) => report_and_exit(&e),
        }
        return true;
    }
    if build_args.dump_resolved_ast {
        match ome::compile::resolve_to_ast(file) {
            Ok(ast) => write_or_print(build_args.output.as_deref(), &to_json(&ast)),
            Err(e) => report_and_exit(&e),
        }
        return true;
    }
    if build_args.dump_ir {
        match ome::compile::compile_to_ir(file) {
            Ok(ir) => write_or_print(build_args.output.as_deref(), &to_json(&ir)),
            Err(e) => report_and_exit(&e),
        }
        return true;
    }
    if build_args.dump_target_code {
        match ome::compile::compile_to_assembly(file) {
            Ok(asm) => write_or_print(build_args.output.as_deref(), &asm),
            Err(e) => report_and_exit(&e),
        }
        return true;
    }
    false
}

fn resolve_target_or_exit(target: Option<&str>) -> TargetPlatform {
    match target {
        Some(name) => TargetPlatform::parse(name).unwrap_or_else(|e| report_and_exit(&e)),
        None => TargetPlatform::host(),
    }
}

fn main() {
    let args = Cli::init();
    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    match args.command {
        Commands::Build(build_args) => {
            let file = canonicalize_or_exit(&build_args.file);
            if handle_dump_flags(&file, &build_args) {
                return;
            }
            let target = resolve_target_or_exit(build_args.target.as_deref());
            info!("compiling {}", file.display());
            if let Err(e) = ome::compile::compile_file_for(&file, build_args.output.as_deref(), target) {
                report_and_exit(&e);
            }
        }
        Commands::Asm(build_args) => {
            let file = canonicalize_or_exit(&build_args.file);
            if handle_dump_flags(&file, &build_args) {
                return;
            }
            let asm = match ome::compile::compile_to_assembly(&file) {
                Ok(asm) => asm,
                Err(e) => report_and_exit(&e),
            };
            write_or_print(build_args.output.as_deref(), &asm);
        }
    }
}
