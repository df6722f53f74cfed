#![deny(unsafe_op_in_unsafe_fn)]
use clap::Parser;
use netfree_core::cancel::is_cancelled;
use netfree_core::{app, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = app::run(cli) {
        emit_error(&err);
        std::process::exit(1);
    }
}

fn emit_error(err: &anyhow::Error) {
    if is_cancelled(err) {
        eprintln!("Error: interrupted");
        return;
    }
    eprintln!("Error: {}", err);
    for cause in err.chain().skip(1) {
        eprintln!("  -> {}", cause);
    }
}
