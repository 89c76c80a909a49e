//! kyrac CLI: compile Kyra sources to .kbc modules or build .kar archives.

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use colored::Colorize;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Compile a single source file to a .kbc module
    CompileModule { file: String },
    /// Build a .kar archive from a project folder
    BuildArchive { folder: String },
}

fn print_usage() {
    eprintln!("kyrac {} - Kyra compiler", VERSION);
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  kyrac -m <file.kyra>          Compile a single file to <file.kbc>");
    eprintln!("  kyrac -kar <project-folder>   Build <project-folder>.kar");
}

fn parse_args() -> Option<Command> {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.as_slice() {
        [flag, value] if flag == "-m" => Some(Command::CompileModule {
            file: value.clone(),
        }),
        [flag, value] if flag == "-kar" => Some(Command::BuildArchive {
            folder: value.clone(),
        }),
        _ => None,
    }
}

fn main() {
    match parse_args() {
        Some(Command::CompileModule { file }) => compile_module(&file),
        Some(Command::BuildArchive { folder }) => build_archive(&folder),
        None => print_usage(),
    }
}

fn compile_module(file: &str) {
    let path = Path::new(file);
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => fail(&format!("Cannot read '{}': {}", file, err)),
    };

    let bytes = match kyra::compile_to_bytes(&source) {
        Ok(bytes) => bytes,
        Err(err) => fail(&err.to_string()),
    };

    let output = path.with_extension("kbc");
    if let Err(err) = fs::write(&output, bytes) {
        fail(&format!("Cannot write '{}': {}", output.display(), err));
    }

    println!("Compiled: {}", output.display());
}

fn build_archive(folder: &str) {
    match kyra::archive::build(Path::new(folder)) {
        Ok(output) => println!("Built: {}", output.display()),
        Err(err) => fail(&err.to_string()),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", "error:".red().bold(), message);
    process::exit(65);
}
