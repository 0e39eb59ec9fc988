//! Forge interpreter command-line.
//!
//! When called without argument it drops into an interactive
//! read-evaluate-print loop.
//!
//! When called with arguments, it interprets the corresponding files in a
//! single interpreter session (so code and data sharing is possible).
//! Syntax errors exit with code 65, runtime errors with code 70.

use std::cell::RefCell;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{self, Context};

use rforge::diag::RuntimeError;
use rforge::eval::Signal;
use rforge::interpreter::Interpreter;
use rforge::parser::ImportResolver;
use rforge::value::Value;

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let args = env::args().skip(1).collect::<Vec<_>>();
    if !args.is_empty() {
        run_all_files(args)?;
    } else {
        run_prompt()?;
    }
    Ok(())
}

/// Reads imported units from disk, relative to the driver's root directory.
/// A unit is spliced at most once per session, which also rules out cycles.
struct FileImports {
    root: PathBuf,
    loaded: RefCell<Vec<String>>,
}

impl FileImports {
    fn new(root: PathBuf) -> FileImports {
        FileImports {
            root,
            loaded: RefCell::new(Vec::new()),
        }
    }
}

impl ImportResolver for FileImports {
    fn source(&self, unit: &str) -> Result<String, String> {
        if self.loaded.borrow().iter().any(|u| u == unit) {
            return Err(format!("unit '{}' is already imported", unit));
        }
        self.loaded.borrow_mut().push(unit.to_string());
        let path = self.root.join(unit);
        fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
    }
}

fn native_print(out: &mut dyn Write, args: &[Value]) -> Result<Value, RuntimeError> {
    writeln!(out, "{}", args[0])?;
    Ok(Value::Void)
}

fn native_clock(_out: &mut dyn Write, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Double(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("error when getting current time")
            .as_secs_f64(),
    ))
}

fn native_sqrt(_out: &mut dyn Write, args: &[Value]) -> Result<Value, RuntimeError> {
    match args[0] {
        Value::Int(n) => Ok(Value::Double((n as f64).sqrt())),
        Value::Double(n) => Ok(Value::Double(n.sqrt())),
        ref other => Err(RuntimeError::UnaryOperand {
            op: "sqrt".to_string(),
            expected: "number",
            got: other.type_kind().to_string(),
        }),
    }
}

fn install_natives<W: Write>(interp: &mut Interpreter<'_, W>) -> Result<(), RuntimeError> {
    interp.register_native("print", 1, native_print)?;
    interp.register_native("clock", 0, native_clock)?;
    interp.register_native("sqrt", 1, native_sqrt)?;
    Ok(())
}

fn run_all_files(paths: Vec<String>) -> Result<(), anyhow::Error> {
    let mut interp_stdout = io::stdout();
    let mut interp = Interpreter::new(&mut interp_stdout);
    install_natives(&mut interp)?;
    interp.set_import_resolver(Rc::new(FileImports::new(env::current_dir()?)));

    for p in &paths {
        let source = fs::read_to_string(p).with_context(|| format!("failed to open {}", p))?;
        match interp.eval(&source) {
            Ok(Signal::Exit) => break,
            Ok(_) => (),
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        }
    }

    if interp.had_error() {
        process::exit(65);
    }
    if interp.had_runtime_error() {
        process::exit(70);
    }
    Ok(())
}

fn run_prompt() -> Result<(), anyhow::Error> {
    let stdin = io::stdin();
    let mut repl_stdout = io::stdout();
    let mut interp_stdout = io::stdout();

    let mut interp = Interpreter::new(&mut interp_stdout);
    install_natives(&mut interp)?;
    interp.set_import_resolver(Rc::new(FileImports::new(env::current_dir()?)));

    let mut input = String::new();
    loop {
        repl_stdout.write_all("\n> ".as_bytes())?;
        repl_stdout.flush()?;

        input.clear();
        let nbytes = stdin.read_line(&mut input)?;
        if nbytes == 0 {
            break;
        }

        match interp.eval(&input) {
            Ok(Signal::Exit) => break,
            Ok(_) => (),
            Err(e) => {
                println!("{}", e);
                interp.clear_errors();
            }
        }
    }

    Ok(())
}
