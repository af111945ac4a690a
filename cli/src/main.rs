// shallot: command-line front end
//
// Runs any role of the overlay (directory, relay, proxy, chat server) and
// drives a running proxy from the shell.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use shallot_core::relay::protocol::{Request, Response};
use shallot_core::relay::transport;
use shallot_core::{ChatRoom, DirectoryKeyPair, DirectoryService, OnionProxy, ProxyControl, RelayServer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shallot")]
#[command(about = "Shallot: onion-routed relay overlay", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/shallot/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write a daily log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the development directory service
    Directory {
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Run a relay
    Relay {
        #[arg(short, long)]
        listen: Option<String>,
        /// Address published to the directory
        #[arg(short, long)]
        advertise: Option<String>,
        #[arg(short, long)]
        directory: Option<String>,
    },
    /// Run the onion proxy and its control surface
    Proxy {
        #[arg(short, long)]
        listen: Option<String>,
        #[arg(short, long)]
        directory: Option<String>,
        #[arg(short, long)]
        chat: Option<String>,
        /// Hex Ed25519 public key of the directory
        #[arg(short, long)]
        trusted_key: Option<String>,
    },
    /// Run the development chat server
    Chat {
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Drive a running proxy
    Client {
        /// Proxy control address
        #[arg(short, long)]
        proxy: Option<String>,
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Generate a directory signing key
    Keygen,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Build a circuit and register a username
    Connect { username: String },
    /// Publish a message through the circuit
    Send { text: String },
    /// Fetch messages newer than an id
    Poll {
        #[arg(short, long, default_value = "0")]
        since: u64,
    },
    /// Replace the current circuit
    NewCircuit,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;
    let config = config::Config::load(cli.config)?;

    match cli.command {
        Commands::Directory { listen } => cmd_directory(config, listen).await,
        Commands::Relay {
            listen,
            advertise,
            directory,
        } => cmd_relay(config, listen, advertise, directory).await,
        Commands::Proxy {
            listen,
            directory,
            chat,
            trusted_key,
        } => cmd_proxy(config, listen, directory, chat, trusted_key).await,
        Commands::Chat { listen } => cmd_chat(config, listen).await,
        Commands::Client { proxy, action } => cmd_client(config, proxy, action).await,
        Commands::Keygen => cmd_keygen(),
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn init_logging(log_dir: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "shallot.log"));
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
            Ok(None)
        }
    }
}

/// Shutdown channel fired by Ctrl-C
fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (shutdown, _) = broadcast::channel(1);
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = signal.send(());
        }
    });
    shutdown
}

async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to listen on {}", address))
}

async fn cmd_directory(config: config::Config, listen: Option<String>) -> Result<()> {
    let mut settings = config.settings.directory.clone();
    if let Some(listen) = listen {
        settings.listen_addr = listen;
    }

    let service = Arc::new(DirectoryService::from_config(&settings).context("Invalid directory configuration")?);
    let listener = bind(&settings.listen_addr).await?;

    println!("{}", "Directory running".bold());
    println!("  Listening:  {}", settings.listen_addr.bright_cyan());
    println!("  Public key: {}", service.public_key_hex().bright_yellow());
    if settings.signing_key.is_none() {
        println!(
            "  {} signing key is ephemeral; set directory.signing_key to keep it",
            "!".yellow()
        );
    }

    let shutdown = shutdown_on_ctrl_c();
    transport::serve(listener, service, config.settings.network.max_frame_len, shutdown.subscribe()).await;
    Ok(())
}

async fn cmd_relay(
    config: config::Config,
    listen: Option<String>,
    advertise: Option<String>,
    directory: Option<String>,
) -> Result<()> {
    let mut settings = config.settings.relay.clone();
    if let Some(listen) = listen {
        settings.listen_addr = listen;
    }
    if advertise.is_some() {
        settings.advertised_addr = advertise;
    }
    if let Some(directory) = directory {
        settings.directory_addr = directory;
    }

    let server = RelayServer::bind(&settings, &config.settings.network)
        .await
        .context("Relay startup failed")?;
    server.register().await.context("Relay registration failed")?;

    println!("{}", "Relay running".bold());
    println!("  Address:    {}", server.advertised_addr().bright_cyan());
    println!("  Public key: {}", server.engine().identity().public_key_hex().bright_yellow());
    println!("  Directory:  {}", settings.directory_addr);

    server.serve(shutdown_on_ctrl_c()).await;
    Ok(())
}

async fn cmd_proxy(
    config: config::Config,
    listen: Option<String>,
    directory: Option<String>,
    chat: Option<String>,
    trusted_key: Option<String>,
) -> Result<()> {
    let mut settings = config.settings.proxy.clone();
    if let Some(listen) = listen {
        settings.listen_addr = listen;
    }
    if let Some(directory) = directory {
        settings.directory_addr = directory;
    }
    if let Some(chat) = chat {
        settings.chat_server_addr = chat;
    }
    if trusted_key.is_some() {
        settings.trusted_directory_key = trusted_key;
    }

    let proxy = Arc::new(
        OnionProxy::from_config(&settings, &config.settings.network)
            .await
            .context("Proxy startup failed")?,
    );
    let listener = bind(&settings.listen_addr).await?;

    println!("{}", "Proxy running".bold());
    println!("  Control:   {}", settings.listen_addr.bright_cyan());
    println!("  Directory: {}", settings.directory_addr);
    println!("  Chat:      {}", settings.chat_server_addr);
    println!();
    println!(
        "  Connect with: {}",
        format!("shallot client --proxy {} connect <username>", settings.listen_addr).bright_green()
    );

    let shutdown = shutdown_on_ctrl_c();
    let control = Arc::new(ProxyControl::new(Arc::clone(&proxy)));
    transport::serve(listener, control, config.settings.network.max_frame_len, shutdown.subscribe()).await;
    proxy.shutdown();
    Ok(())
}

async fn cmd_chat(config: config::Config, listen: Option<String>) -> Result<()> {
    let mut settings = config.settings.chat.clone();
    if let Some(listen) = listen {
        settings.listen_addr = listen;
    }
    settings.validate()?;

    let listener = bind(&settings.listen_addr).await?;
    println!("{}", "Chat server running".bold());
    println!("  Listening: {}", settings.listen_addr.bright_cyan());

    let shutdown = shutdown_on_ctrl_c();
    transport::serve(
        listener,
        Arc::new(ChatRoom::new()),
        config.settings.network.max_frame_len,
        shutdown.subscribe(),
    )
    .await;
    Ok(())
}

async fn cmd_client(config: config::Config, proxy: Option<String>, action: ClientAction) -> Result<()> {
    let proxy = proxy.unwrap_or_else(|| config.settings.proxy.listen_addr.clone());
    let options = config.settings.network.call_options();

    let (request, since) = match action {
        ClientAction::Connect { username } => (Request::Connect { username }, None),
        ClientAction::Send { text } => (Request::SendMessage { text }, None),
        ClientAction::Poll { since } => (Request::PollMessages { last_message_id: since }, Some(since)),
        ClientAction::NewCircuit => (Request::NewCircuit, None),
    };

    let response = transport::call(&proxy, &request, &options)
        .await
        .with_context(|| format!("Proxy at {} unreachable", proxy))?;

    match (response, since) {
        (Response::Ack, _) => println!("  {} {}", "✓".green(), request.message_type()),
        (Response::Messages(messages), Some(since)) => {
            if messages.is_empty() {
                println!("{}", "No new messages".dimmed());
            }
            for (offset, message) in messages.iter().enumerate() {
                println!("  {} {}", format!("#{}", since + offset as u64 + 1).bright_black(), message);
            }
        }
        (Response::Error { kind, message }, _) => {
            bail!("{:?}: {}", kind, message)
        }
        (other, _) => bail!("Unexpected response: {}", other.message_type()),
    }
    Ok(())
}

fn cmd_keygen() -> Result<()> {
    let keypair = DirectoryKeyPair::generate();

    println!("{}", "Directory signing key".bold());
    println!();
    println!("{}", "Keep the secret key private!".bright_red().bold());
    println!("  Secret key: {}", keypair.secret_hex().as_str());
    println!("  Public key: {}", keypair.public_key_hex().bright_yellow());
    println!();
    println!("  Set {} on the directory", "directory.signing_key".bright_green());
    println!("  and {} on every proxy", "proxy.trusted_directory_key".bright_green());
    Ok(())
}

fn cmd_config(config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", config.path().display()),
        ConfigAction::Show => {
            println!("{} {}", "Configuration".bold(), config.path().display().to_string().dimmed());
            for (key, value) in config.list()? {
                println!("  {:<36} {}", key.bright_cyan(), value);
            }
        }
    }
    Ok(())
}
