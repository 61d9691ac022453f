//! The `cpp-linter-cli` binary's entry point: parses process arguments and
//! environment, then hands off to [`cpp_linter::run::main`].

use std::env;
use std::process::exit;

// project specific modules/crates
use cpp_linter::run::main as run_main;

/// This takes the CLI arguments and passes them to [`cpp_linter::run::main`],
/// then exits the process with the returned code.
pub fn main() {
    let code = run_main(env::args().collect::<Vec<String>>());
    exit(code);
}
