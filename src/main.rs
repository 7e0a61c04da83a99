//! CLI entry point for sitewright

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitewright::server::ServeOptions;
use sitewright::Sitewright;

#[derive(Parser)]
#[command(name = "sitewright")]
#[command(version)]
#[command(about = "A small static site generator with mustache layouts and live reload", long_about = None)]
struct Cli {
    /// Set the site directory (defaults to current directory)
    #[arg(short, long, global = true)]
    cwd: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the site, rendering pages on request
    #[command(alias = "s")]
    Serve {
        /// Port to listen on (overrides PORT and _config.yml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Port of the live reload channel
        #[arg(long)]
        reload_port: Option<u16>,

        /// IP address to bind to
        #[arg(short, long, default_value = "localhost")]
        ip: String,

        /// Disable file watching and live reload
        #[arg(long)]
        no_watch: bool,
    },

    /// Render every page into a directory of static files
    #[command(alias = "b")]
    Build {
        /// Output directory (defaults to the public directory)
        output: Option<PathBuf>,
    },

    /// Remove the public directory
    Clean,

    /// Display version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        "sitewright=debug,info"
    } else {
        "sitewright=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let base_dir = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    match cli.command {
        Commands::Serve {
            port,
            reload_port,
            ip,
            no_watch,
        } => {
            let mut app = Sitewright::new(&base_dir)?;
            app.config.apply_env();
            if let Some(port) = port {
                app.config.port = port;
            }
            if let Some(reload_port) = reload_port {
                app.config.reload_port = Some(reload_port);
            }

            let options = ServeOptions {
                ip,
                port: app.config.port,
                reload_port: app.config.reload_port(),
                watch: !no_watch,
            };
            tracing::info!("Serving {:?} at http://{}:{}", app.base_dir, options.ip, options.port);
            sitewright::server::start(&app, &options).await?;
        }

        Commands::Build { output } => {
            let app = Sitewright::new(&base_dir)?;
            let output = output.map(|dir| if dir.is_absolute() { dir } else { base_dir.join(dir) });
            app.build(output.as_deref())?;
            println!("Built successfully!");
        }

        Commands::Clean => {
            let app = Sitewright::new(&base_dir)?;
            tracing::info!("Cleaning public folder...");
            app.clean()?;
            println!("Cleaned successfully!");
        }

        Commands::Version => {
            println!("sitewright version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
