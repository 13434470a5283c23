use std::env;
use std::process::ExitCode;

use ouro_backend::{BackendError, CompileError, Compiler, CompilerConfig, ConfigError};
use ouro_core::{ExprId, FnType, Primitive, RawAddress, Type};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_DEPTH: usize = 3;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    if env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run() -> Result<(), CliError> {
    let mut args = env::args().skip(1).peekable();
    let mut config = CompilerConfig::default();
    if args.peek().map(String::as_str) == Some("--config") {
        args.next();
        let Some(path) = args.next() else {
            return Err(CliError::Usage("--config expects a file".to_owned()));
        };
        config = CompilerConfig::load(&path)?;
        tracing::debug!(path = %path, ?config, "loaded compiler config");
    }

    let command = args.next();
    let rest: Vec<String> = args.collect();
    match command.as_deref() {
        None | Some("demo") => cmd_quote(config, DEFAULT_DEPTH),
        Some("quote") => {
            let Some(depth) = rest.first() else {
                return Err(CliError::Usage("quote expects a depth".to_owned()));
            };
            let depth = depth
                .parse()
                .map_err(|_| CliError::Usage(format!("invalid depth `{depth}`")))?;
            cmd_quote(config, depth)
        }
        Some("-h" | "--help") => {
            print_help();
            Ok(())
        }
        Some("-V" | "--version") => {
            println!("ouro {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(other) => Err(CliError::Usage(format!("unknown command `{other}`"))),
    }
}

/// Quote `Parameter 0 + 100` `depth` times, run the quotes back down to a
/// plain expression, then compile that as `int(int)` and apply it.
fn cmd_quote(config: CompilerConfig, depth: usize) -> Result<(), CliError> {
    let compiler = Compiler::new(config)?;
    let param = compiler.parameter(0);
    let hundred = compiler.integer(100);
    let mut expr = compiler.add_integer(param, hundred);
    for _ in 0..depth {
        expr = compiler.to_constructor(expr);
    }
    for level in (1..=depth).rev() {
        print!("[{level}] ");
        show(&compiler, expr)?;
        expr = compiler.reconstruct(expr)?;
    }
    print!("[0] ");
    show(&compiler, expr)?;

    let address = compiler.compile(expr, &FnType::new(Type::Integer, [Type::Integer]))?;
    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(address.as_ptr()) };
    for x in 10..20 {
        println!("f({x}) = {}", f(x));
    }
    Ok(())
}

/// Print `expr` from generated code through the `ouro_debug_print`
/// primitive.
fn show(compiler: &Compiler, expr: ExprId) -> Result<(), CliError> {
    let handle = compiler.pointer(RawAddress::new(expr.to_handle()));
    let call = compiler.call_runtime(Primitive::DebugPrint, [handle]);
    let address = compiler.compile(call, &FnType::new(Type::Size, Vec::new()))?;
    let print: extern "C" fn() -> usize = unsafe { std::mem::transmute(address.as_ptr()) };
    print();
    Ok(())
}

fn print_help() {
    println!(
        "ouro\n\n\
         USAGE:\n  ouro [--config <file>] [demo | quote <depth>]\n\n\
         COMMANDS:\n  \
         demo           quote an expression {DEFAULT_DEPTH} times and evaluate it back\n  \
         quote <depth>  same, with an explicit depth\n\n\
         Set RUST_LOG (for example RUST_LOG=ouro_backend=debug) to trace compilation."
    );
}
