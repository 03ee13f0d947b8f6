//! Touch server - host side of a device test run
//!
//! Launches the command that starts tests on a device, listens for the
//! device to connect back, and relays the streamed results to stdout.

use clap::Parser;
use touch_server::{cli, commands::ServerArgs, common::logging};

#[tokio::main]
async fn main() {
    let args = match ServerArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize logging; the guard flushes the log file on drop
    let guard = match logging::init(args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let code = match cli::dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("Error: {e}");
            1
        }
    };

    drop(guard);
    std::process::exit(code);
}
