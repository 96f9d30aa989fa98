//! # page-node
//!
//! Serve a directory of pages and a directory of files to the network.
//!
//! Usage:
//!   page-node [NODE_CONFIG] [OPTIONS] [COMMAND]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pagenode_config::logging::init_logging;
use pagenode_config::{
    log_node_error, log_node_info, log_node_warn, Config, ConfigError, ConfigOverrides, LogLevel,
};
use pagenode_runtime::registry::Binding;
use pagenode_runtime::{NodeRuntime, NodeSettings, Registry, APP_NAME, ASPECT};
use pagenode_transport::{Identity, LoopbackDestination, Request, RequestData, Response};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Page node: serve pages and files to peers on an overlay network
#[derive(Parser)]
#[command(name = "page-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Node configuration file (TOML)
    #[arg(value_name = "NODE_CONFIG")]
    node_config: Option<PathBuf>,

    /// Transport configuration, passed through to the transport
    #[arg(short = 'c', long = "config", value_name = "TRANSPORT_CONFIG", global = true)]
    transport_config: Option<PathBuf>,

    /// Pages directory
    #[arg(short, long, value_name = "DIR", global = true)]
    pages_dir: Option<PathBuf>,

    /// Files directory
    #[arg(short, long, value_name = "DIR", global = true)]
    files_dir: Option<PathBuf>,

    /// Display name announced with the node
    #[arg(short = 'n', long, global = true)]
    node_name: Option<String>,

    /// Minutes between announces (0 = once at startup)
    #[arg(short, long, value_name = "MINUTES", global = true)]
    announce_interval: Option<u64>,

    /// Directory holding the node identity
    #[arg(short, long, value_name = "DIR", global = true)]
    identity_dir: Option<PathBuf>,

    /// Seconds between page rescans (0 = never)
    #[arg(long, value_name = "SECONDS", global = true)]
    page_refresh_interval: Option<u64>,

    /// Seconds between file rescans (0 = never)
    #[arg(long, value_name = "SECONDS", global = true)]
    file_refresh_interval: Option<u64>,

    /// Log level: error, warn, info, debug, trace
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and serve until interrupted (default)
    Run,

    /// Print every served path with its virtual request path
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Dispatch one request in-process and write the response to stdout
    Fetch {
        /// Virtual path, e.g. /page/index.mu
        #[arg(value_name = "VIRTUAL_PATH")]
        path: String,

        /// Request field, repeatable
        #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Print the default configuration as TOML
    DefaultConfig,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            pages_dir: self.pages_dir.clone(),
            files_dir: self.files_dir.clone(),
            node_name: self.node_name.clone(),
            announce_interval: self.announce_interval,
            identity_dir: self.identity_dir.clone(),
            page_refresh_interval: self.page_refresh_interval,
            file_refresh_interval: self.file_refresh_interval,
            log_level: self.log_level,
            transport_config: self.transport_config.clone(),
        }
    }
}

fn parse_field(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::DefaultConfig) = cli.command {
        print!("{}", Config::default_toml()?);
        return Ok(());
    }

    // Logging needs the configured level, so report config problems after init
    let (mut config, problems) = Config::load_or_default(cli.node_config.as_deref());
    config.apply_overrides(cli.overrides());
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    config.resolve_relative_to(&cwd);

    init_logging(config.logging.level);
    for problem in problems {
        match problem {
            ConfigError::InvalidValue { .. } => {
                log_node_warn!("Ignoring environment override", error = problem)
            }
            _ => log_node_error!("Failed to load config, using defaults", error = problem),
        }
    }

    match cli.command {
        None | Some(Commands::Run) => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(run(config))
        }
        Some(Commands::List { json }) => list(&config, json),
        Some(Commands::Fetch { path, fields }) => fetch(&config, &path, fields),
        Some(Commands::DefaultConfig) => Ok(()),
    }
}

async fn run(config: Config) -> Result<()> {
    for dir in [
        &config.content.pages_dir,
        &config.content.files_dir,
        &config.node.identity_dir,
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let identity = Identity::load_or_create(&config.node.identity_dir)
        .context("Failed to load node identity")?;
    if let Some(transport) = &config.transport.config {
        log_node_info!("Transport config", path = transport.display());
    }

    let settings = NodeSettings::from_config(&config, identity);
    let destination = Arc::new(LoopbackDestination::new(&settings.identity, APP_NAME, &[ASPECT]));
    let node = Arc::new(NodeRuntime::start(settings, destination)?);

    log_node_info!(
        "Page node running",
        address = node.destination_hash(),
        pages = node.settings().pages_root.display(),
        files = node.settings().files_root.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log_node_info!("Interrupt received");

    // Shutdown joins threads, keep it off the async workers
    let stopping = node.clone();
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;
    Ok(())
}

/// Register both roots against an in-process destination
fn local_registry(config: &Config) -> Result<(Arc<LoopbackDestination>, Registry)> {
    let settings = NodeSettings::from_config(config, Identity::generate());
    let destination = Arc::new(LoopbackDestination::new(&settings.identity, APP_NAME, &[ASPECT]));
    let registry = Registry::new(destination.clone(), &settings.pages_root, &settings.files_root);
    registry.register_pages()?;
    registry.register_files()?;
    Ok((destination, registry))
}

#[derive(Serialize)]
struct ListEntry {
    virtual_path: String,
    kind: &'static str,
    path: Option<PathBuf>,
}

fn list(config: &Config, json: bool) -> Result<()> {
    let (_destination, registry) = local_registry(config)?;
    let pages = registry.served_pages();
    let files = registry.served_files();

    let entries: Vec<ListEntry> = pages
        .bindings
        .iter()
        .chain(files.bindings.iter())
        .map(|(virtual_path, binding)| ListEntry {
            virtual_path: virtual_path.clone(),
            kind: match binding {
                Binding::DefaultIndex => "default",
                Binding::Page(_) => "page",
                Binding::File(_) => "file",
            },
            path: binding.path().map(|p| p.to_path_buf()),
        })
        .collect();

    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &entries)?;
        writeln!(out)?;
    } else {
        for entry in &entries {
            let path = entry
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in)".to_string());
            writeln!(out, "{:<40} {}", entry.virtual_path, path)?;
        }
        writeln!(out, "\n{} pages, {} files", pages.served.len(), files.served.len())?;
    }
    Ok(())
}

fn fetch(config: &Config, path: &str, fields: Vec<(String, String)>) -> Result<()> {
    let (destination, _registry) = local_registry(config)?;

    let mut request = Request::new(path);
    if !fields.is_empty() {
        request = request.with_data(fields.into_iter().collect::<RequestData>());
    }

    let Some(response) = destination.dispatch(&request) else {
        bail!("Nothing is bound at {path}");
    };

    let mut out = io::stdout().lock();
    match response {
        Response::Bytes(bytes) => out.write_all(&bytes)?,
        Response::File { mut file, metadata } => {
            log_node_info!("Streaming file", name = metadata.name);
            io::copy(&mut file, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}
