use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use portalfs::config::{MountConfig, PortalConfig};
use portalfs::credentials::{self, Credentials};
use portalfs::parser::IliasParser;
use portalfs::{ContentCache, FuseAdapter, HttpTransport, PortalFileSystem, RemoteTree, Session};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mount a course portal as a read-only filesystem", long_about = None)]
struct Args {
    /// Where to mount the filesystem
    mountpoint: PathBuf,

    /// Do not fork away to the background
    #[arg(long)]
    foreground: bool,

    /// Logging verbosity (RUST_LOG overrides it)
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// File cache size in MB
    #[arg(long, default_value_t = portalfs::config::DEFAULT_CACHE_MB)]
    cache: u64,

    /// Cache timeout in minutes, for file contents and directory listings
    #[arg(long, default_value_t = portalfs::config::DEFAULT_CACHE_TIMEOUT_MINUTES)]
    cache_timeout: f64,

    /// Network request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// JSON file describing another portal installation
    #[arg(long)]
    portal: Option<PathBuf>,

    /// Neither read nor save credentials in the system keyring
    #[arg(long)]
    no_keyring: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_level);

    if let Err(e) = run(args) {
        error!("{:#}", e);
        eprintln!("portalfs: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if !args.mountpoint.is_dir() {
        bail!("mount point {:?} is not a directory", args.mountpoint);
    }

    let config = MountConfig::new()
        .with_cache_megabytes(args.cache)
        .with_cache_timeout_minutes(args.cache_timeout)
        .with_request_timeout(Duration::from_secs(args.timeout))
        .with_foreground(args.foreground);
    let portal = match &args.portal {
        Some(path) => PortalConfig::from_file(path)?,
        None => PortalConfig::default(),
    };
    info!(
        "Mounting {} at {:?}, cache={} bytes, ttl={:?}",
        portal.base_url, args.mountpoint, config.cache_capacity, config.cache_ttl
    );

    let credentials = credentials::get_credentials(!args.no_keyring, true)
        .context("could not obtain credentials")?;

    let parser = Arc::new(IliasParser::new()?);
    let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
    let mut session = Session::new(
        transport.clone(),
        parser.clone(),
        portal,
        credentials,
        config.cache_ttl,
    );
    if !args.no_keyring {
        session = session
            .with_login_callback(Box::new(|c: &Credentials| credentials::save_credentials(c)));
    }

    // Log in while the terminal is still attached, passcode prompts need it.
    {
        let bootstrap = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        bootstrap.block_on(session.login()).context("login failed")?;
    }

    if !config.foreground {
        nix::unistd::daemon(true, false).context("could not daemonize")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    transport.rebuild()?;

    let tree = Arc::new(RemoteTree::new(Arc::new(session), parser)?);
    let fs = Arc::new(PortalFileSystem::new(
        tree,
        ContentCache::new(config.cache_capacity, config.cache_ttl),
    ));
    let adapter = FuseAdapter::new(fs, runtime.handle().clone());
    let mounted = adapter
        .spawn_mount(&args.mountpoint)
        .with_context(|| format!("could not mount at {:?}", args.mountpoint))?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    info!("Mounted, waiting for a termination signal");
    let _ = stop_rx.recv();
    info!("Unmounting {:?}", args.mountpoint);
    drop(mounted);
    Ok(())
}
