//! Expo Updates Server - Main entry point
//!
//! `serve` runs the protocol server, `inspect` reports what it would serve.

use anyhow::Context;
use clap::Parser;
use expo_updates_server::engine::{
    api::{create_router, ApiState},
    cli::{
        formatter::{format_size, CliFormatter},
        Cli, Commands, OutputFormat,
    },
    config::ServerConfig,
    updates::{CodeSigner, FsBundleResolver, Platform, ProtocolNegotiator},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = cli.load_config().context("loading configuration")?;
    let json_output = cli.format == OutputFormat::Json;

    match &cli.command {
        Commands::Serve { .. } => {
            cli.command.apply_serve_overrides(&mut config);
            cmd_serve(config).await?;
        }
        Commands::Inspect {
            runtime_version,
            platform,
        } => {
            let platform: Platform = platform.parse()?;
            cmd_inspect(&config, runtime_version, platform, json_output).await?;
        }
    }

    Ok(())
}

async fn cmd_serve(config: ServerConfig) -> anyhow::Result<()> {
    let signer = match &config.private_key_path {
        Some(path) => Some(Arc::new(
            CodeSigner::from_pem_file(path)
                .await
                .with_context(|| format!("loading private key {}", path.display()))?,
        )),
        None => {
            CliFormatter::warning("No private key configured; code signing requests will be refused");
            None
        }
    };

    let resolver = Arc::new(FsBundleResolver::new(&config.updates_dir));
    let negotiator = ProtocolNegotiator::new(resolver, &config, signer);
    let app = create_router(ApiState {
        negotiator: Arc::new(negotiator),
    });

    let addr = format!("{}:{}", config.listen.host, config.listen.port);
    println!("🚀 Expo Updates Server");
    println!("   Updates: {}", config.updates_dir.display());
    println!("   Public URL: {}", config.public_url.origin());
    println!("   Listening: http://{}", addr);
    println!("   Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn cmd_inspect(
    config: &ServerConfig,
    runtime_version: &str,
    platform: Platform,
    json: bool,
) -> anyhow::Result<()> {
    let resolver = Arc::new(FsBundleResolver::new(&config.updates_dir));
    let negotiator = ProtocolNegotiator::new(resolver, config, None);
    let report = negotiator.inspect(runtime_version, platform).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    CliFormatter::header(&format!("Runtime version {runtime_version} ({platform})"));
    CliFormatter::kv("Bundle", &report.bundle.display().to_string());
    match &report.update {
        None => CliFormatter::kv("Type", "rollback to embedded"),
        Some(update) => {
            CliFormatter::kv("Type", "update");
            CliFormatter::kv("Update ID", &update.id);
            CliFormatter::kv("Created", &update.created_at);
            CliFormatter::kv(
                "Assets",
                &format!("{} ({})", update.asset_count, format_size(update.total_bytes)),
            );
        }
    }
    CliFormatter::success("Bundle is servable");

    Ok(())
}
