use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let parsed = cli::Cli::parse();

    // Dispatch to CLI handler and handle special exit codes
    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // The desktop stack's lifetime is the proxy's; mirror its exit code
            if let Some(proxy_exit) = err.downcast_ref::<commands::desktop::ProxyExitCode>() {
                std::process::exit(proxy_exit.0);
            }

            // For all other errors, return them normally
            Err(err)
        }
    }
}
