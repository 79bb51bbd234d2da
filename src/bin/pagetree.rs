//! pagetree server.
//!
//! ```bash
//! PAGETREE_JWT_SECRET=... DATABASE_URL=pagetree.db pagetree --port 8080
//! ```
//!
//! Run `pagetree --help` for the flags. Environment variables and the
//! config file fill in whatever the flags leave unset. `RUST_LOG` controls
//! log verbosity.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pagetree::config::Overrides;
use pagetree::{Loader, Module, Router};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pagetree")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "PAGETREE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// libsql database file
    #[arg(long)]
    database_url: Option<String>,

    /// HS256 signing secret, at least 32 bytes
    #[arg(long)]
    jwt_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pagetree=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Loader::new("PAGETREE").load(
        args.config.as_deref(),
        &Overrides {
            host: args.host.as_deref(),
            port: args.port,
            database_url: args.database_url.as_deref(),
            jwt_secret: args.jwt_secret.as_deref(),
        },
    )?;

    let db = pagetree::db::connect(&config.database.url).await?;

    let mut router = Router::new();
    let pages = pagetree::api::Pages;
    pages.routes(&mut router);
    info!(module = pages.name(), "routes registered");

    let server = pagetree::server::start(Arc::new(config), Some(db), router.into_handle()).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown().await?;
    Ok(())
}
