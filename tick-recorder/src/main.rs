mod args;

use anyhow::{bail, Context};
use args::RecorderArgs;
use broker_client::{global, BrokerClient, ClientConfig, TickRecorder};
use clap::Parser;
use gateway_paper::{PaperConfig, PaperGateway};
use log::{info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = RecorderArgs::parse();
    info!("=== Tick Recorder Starting ===");

    let config = ClientConfig::load(args.config().map(|p| p.as_path()))
        .context("failed to load broker client configuration")?;
    let gateway = Arc::new(PaperGateway::new(PaperConfig {
        seed: args.seed(),
        ..PaperConfig::default()
    }));

    let client = global::client_or_init(|| BrokerClient::connect(gateway, config))?;
    if !client.wait_until_ready(args.ready_timeout()) {
        global::shutdown();
        bail!("gateway session not ready ({:?})", client.state());
    }

    let mut recorders = Vec::new();
    for symbol in args.symbols() {
        match TickRecorder::start(Arc::clone(&client), symbol, args.output_dir()) {
            Ok(recorder) => recorders.push(recorder),
            Err(e) => warn!("Skipping {}: {}", symbol, e),
        }
    }
    if recorders.is_empty() {
        global::shutdown();
        bail!("no symbol could be recorded");
    }

    match args.duration() {
        Some(duration) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                _ = tokio::time::sleep(duration) => info!("Recording window elapsed"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    // Drain every mailbox before the files are flushed.
    global::shutdown();
    for mut recorder in recorders {
        recorder.stop()?;
        info!("Wrote {}", recorder.path().display());
    }
    Ok(())
}
