//! CLI command handling
//!
//! Resolves configuration, runs the orchestrator and reports the result.

use crate::commands::ServerArgs;
use crate::common::{config::Config, Result};
use crate::orchestrator::Orchestrator;
use crate::output::OutputSink;

/// Run the touch server and return the process exit code
pub async fn dispatch(args: ServerArgs) -> Result<i32> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Touch server starting");

    let config = Config::load(args.config.as_deref())?;
    let run = args.resolve(&config)?;
    tracing::debug!(?run, "Resolved run configuration");

    let orchestrator = Orchestrator::new(run, OutputSink::stdout());

    let interrupt = orchestrator.interrupt_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C");
            interrupt.cancel();
        }
    });

    let summary = orchestrator.run().await?;
    summary.log();

    if let Some(path) = &args.summary {
        summary.write_json(path)?;
        tracing::info!(path = %path.display(), "Wrote run summary");
    }

    Ok(summary.exit_code)
}
