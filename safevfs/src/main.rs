use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use safevfs::cadapter::memory::MemoryBackend;
use safevfs::config::SafeVfsConfig;
use safevfs::fuse::mount::mount_safevfs;
use safevfs::SafeVfs;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "safevfs")]
#[command(about = "Mount a SAFE-style network drive over FUSE", long_about = None)]
struct Args {
    /// Directory to mount on; must exist and be empty
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,
    /// Config file to use instead of ~/.config/safevfs/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
    /// Mount directly instead of through fusermount3
    #[arg(long)]
    privileged: bool,
    /// Register a long name owned by the mounting user (repeatable)
    #[arg(long = "long-name", value_name = "NAME")]
    long_names: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SafeVfsConfig::load_path(path)?,
        None => SafeVfsConfig::load()?,
    };
    if args.privileged {
        config.unprivileged = false;
    }

    let mount_point = std::fs::canonicalize(&args.mountpoint)
        .with_context(|| format!("mount point {} is not accessible", args.mountpoint.display()))?;

    // no network client is bundled; the in-memory drive stands in for it
    let backend = Arc::new(MemoryBackend::new());
    for name in &args.long_names {
        backend.register_long_name(name);
    }
    let vfs = SafeVfs::new(backend, mount_point.to_string_lossy());

    let mut mount_handle = mount_safevfs(vfs, &mount_point, &config)
        .await
        .with_context(|| format!("failed to mount on {}", mount_point.display()))?;
    info!(mount_point = %mount_point.display(), "safevfs mounted");

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.context("FUSE session ended with an error")?,
        _ = signal::ctrl_c() => {
            info!("interrupted, unmounting");
            mount_handle.unmount().await.context("unmount failed")?;
        }
    }
    Ok(())
}
