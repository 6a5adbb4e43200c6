// SPDX-License-Identifier: MIT OR Apache-2.0
//! Spectra - headless render graph host
//!
//! Loads render pipelines into a graph manager and renders a fixed number of
//! frames per graph, writing marked outputs as PNG files.
//!
//! ## Usage
//!
//! ```text
//! spectra --settings host.ron --frames 64 --graph ReSTIRPLTPT
//! ```
//!
//! Without a settings file the built-in pipelines run with default settings.

mod capture;
mod host;
mod settings;

use anyhow::Context;
use clap::Parser;
use host::Host;
use settings::HostSettings;
use spectra_graph::{passes, pipelines};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Render frames through Spectra render graphs
#[derive(Parser, Debug)]
#[command(name = "spectra", version, about)]
struct Args {
    /// Host settings file (RON)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Frames to render per graph
    #[arg(short, long)]
    frames: Option<u64>,

    /// Only run this graph
    #[arg(short, long)]
    graph: Option<String>,

    /// Directory for captured outputs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// List stage types and built-in pipelines, then exit
    #[arg(long)]
    list: bool,
}

impl Args {
    fn load_settings(&self) -> anyhow::Result<HostSettings> {
        let mut settings = match &self.settings {
            Some(path) => HostSettings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => HostSettings::default(),
        };
        if let Some(frames) = self.frames {
            settings.frames = frames;
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir.clone_from(dir);
        }
        Ok(settings)
    }
}

fn init_logging(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn list() -> anyhow::Result<()> {
    let registry = passes::standard_registry()?;
    println!("Stage types:");
    for name in registry.type_names() {
        let description = registry
            .get(name)
            .map(|t| t.description.as_str())
            .unwrap_or_default();
        println!("  {name:<24} {description}");
    }
    println!("Built-in pipelines:");
    for name in pipelines::builtin_names() {
        println!("  {name}");
    }
    Ok(())
}

fn run(args: &Args, settings: HostSettings) -> anyhow::Result<()> {
    if args.list {
        return list();
    }

    let mut host = Host::new(settings)?;
    tracing::info!(graphs = host.manager().len(), "Pipelines ready");
    let summary = host.run(args.graph.as_deref())?;
    for path in &summary.captured {
        println!("{}", path.display());
    }
    if summary.failed > 0 {
        anyhow::bail!("{} of {} frames failed", summary.failed, summary.failed + summary.rendered);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    let settings = match args.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("spectra: {e:#}");
            std::process::exit(2);
        }
    };

    init_logging(&settings.log_filter);
    tracing::info!("Starting Spectra v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, settings) {
        tracing::error!("Spectra failed: {e:#}");
        std::process::exit(1);
    }
}
