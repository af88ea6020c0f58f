//! Example vcluster plugin
//!
//! Registers with the vcluster container, syncs labelled ConfigMaps to the
//! physical cluster and publishes a plugin info ConfigMap in the virtual one.

use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcluster_plugin::{PluginManager, PluginOptions, DEFAULT_LISTEN_ADDRESS};

mod configmaps;
mod info;

use configmaps::ConfigMapSyncer;
use info::PluginInfoSyncer;

/// Example plugin for vcluster
#[derive(Parser, Debug)]
#[command(name = "vcluster-plugin-demo", version, about, long_about = None)]
struct Cli {
    /// Address of the vcluster plugin server
    #[arg(long, env = "VCLUSTER_PLUGIN_ADDRESS", default_value = DEFAULT_LISTEN_ADDRESS)]
    listen_address: String,

    /// Name the plugin registers with
    #[arg(long, env = "VCLUSTER_PLUGIN_NAME", default_value = "demo-plugin")]
    plugin_name: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // TLS to both API servers needs a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    init_tracing(cli.log_json);

    let plugin = Arc::new(PluginManager::new());
    spawn_signal_handler(plugin.clone())?;

    let options = PluginOptions::default().with_listen_address(&cli.listen_address);
    let ctx = plugin.init_with_options(&cli.plugin_name, options).await?;
    tracing::info!(
        plugin = %cli.plugin_name,
        vcluster = %ctx.translator.suffix(),
        target_namespace = %ctx.target_namespace,
        "Plugin initialized"
    );

    plugin.register(Arc::new(PluginInfoSyncer::new(&cli.plugin_name)))?;
    plugin.register(Arc::new(ConfigMapSyncer))?;

    plugin.start().await?;
    tracing::info!("Plugin stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Shut the plugin down on SIGINT or SIGTERM
fn spawn_signal_handler(plugin: Arc<PluginManager>) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
            _ = terminate.recv() => tracing::info!("Received SIGTERM"),
        }
        plugin.shutdown();
    });
    Ok(())
}
