//! Action kernel entry point

use action_kernel_api::cli::{analyze, check_schema, read_json, Cli, Commands};
use action_kernel_api::{logging, Collaborators, Kernel};
use clap::Parser;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.kernel_config()?;

    match cli.command {
        Commands::Serve => {
            logging::init(config.logging.format)?;
            let addr = config.bind_addr()?;
            let kernel = Kernel::build(&config, Collaborators::in_memory())?;

            tracing::info!(
                addr = %addr,
                version = env!("CARGO_PKG_VERSION"),
                dev_diagnostics = config.dev_diagnostics,
                "Starting action kernel"
            );

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, kernel.router())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            kernel.shutdown().await;
        }

        Commands::Analyze { entity, old, new } => {
            let plan = analyze(&config, &entity, &old, &new)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }

        Commands::CheckSchema { file } => {
            let report = check_schema(&read_json(&file)?);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
