use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anywhere_core::{ProfileStore, SessionCoordinator, SystemClock};
use anywhere_store::{FileStore, KeyValueStore};

mod config;
mod consent;
mod hub;
mod wg_quick;

use config::AppConfig;
use consent::TerminalConsent;
use wg_quick::{IpLinkServiceControl, WgQuickBackend};

/// Anywhere - WireGuard tunnels and hub peer management
#[derive(Parser, Debug)]
#[command(name = "anywhere")]
#[command(about = "Connect WireGuard tunnels and manage Anywhere hub peers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/anywhere/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Grant VPN permission without prompting
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring a tunnel up
    ///
    /// Without --file or --profile, the profile named <NAME> is used, then
    /// the config from the last successful connect.
    Connect {
        name: String,

        /// WireGuard config file
        #[arg(long, conflicts_with = "profile")]
        file: Option<PathBuf>,

        /// Saved profile to connect with
        #[arg(long)]
        profile: Option<String>,
    },

    /// Bring a tunnel down
    Disconnect { name: String },

    /// Show traffic counters and connection time
    Stats { name: String },

    /// Follow live transfer rates until Ctrl-C or the tunnel goes down
    Watch { name: String },

    /// Manage saved tunnel profiles
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Manage peers on an Anywhere hub
    #[command(subcommand)]
    Hub(hub::HubCommand),

    /// Show or create the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    /// Save a config file as a profile
    Add { name: String, file: PathBuf },

    List,

    /// Print a profile's config
    Show { name: String },

    Remove { name: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        #[arg(long)]
        force: bool,
    },
}

/// Composition root shared by the commands
struct App {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    assume_yes: bool,
}

impl App {
    fn coordinator(&self) -> SessionCoordinator {
        let backend = Arc::new(WgQuickBackend::new(
            self.config.interface_dir(),
            self.config.wg_quick.clone(),
            self.config.wg.clone(),
        ));
        let consent = Arc::new(TerminalConsent::new(self.store.clone(), self.assume_yes));

        SessionCoordinator::builder(backend, consent, self.store.clone())
            .service_control(Arc::new(IpLinkServiceControl::new(self.config.ip.clone())))
            .config(self.config.coordinator_config())
            .build()
    }

    fn profiles(&self) -> ProfileStore {
        ProfileStore::new(self.store.clone(), Arc::new(SystemClock))
    }
}

/// How long exit waits for blocking work such as an abandoned consent prompt
const BLOCKING_GRACE: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    run_detached(run())
}

/// Drive `future` on a fresh runtime without waiting on blocking tasks it
/// left behind (a timed-out prompt still reading stdin, say)
fn run_detached<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let result = runtime.block_on(future);
    runtime.shutdown_timeout(BLOCKING_GRACE);
    result
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("anywhere={}", level).parse()?)
                .add_directive(format!("anywhere_core={}", level).parse()?)
                .add_directive(format!("anywhere_hub={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Commands::Config(command) = &cli.command {
        return run_config(command, &config, cli.config.as_deref());
    }

    let store_path = config.store_path();
    let store = FileStore::open(&store_path)
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;

    let app = App {
        config,
        store: Arc::new(store),
        assume_yes: cli.yes,
    };

    match cli.command {
        Commands::Connect {
            name,
            file,
            profile,
        } => run_connect(&app, &name, file, profile).await,
        Commands::Disconnect { name } => run_disconnect(&app, &name).await,
        Commands::Stats { name } => run_stats(&app, &name).await,
        Commands::Watch { name } => run_watch(&app, &name).await,
        Commands::Profile(command) => run_profile(&app, command),
        Commands::Hub(command) => hub::run(command, app.store.clone()).await,
        Commands::Config(_) => Ok(()),
    }
}

async fn run_connect(
    app: &App,
    name: &str,
    file: Option<PathBuf>,
    profile: Option<String>,
) -> Result<()> {
    let coordinator = app.coordinator();

    let result = match (file, profile) {
        (Some(path), _) => {
            let text = read_config_file(&path)?;
            coordinator.connect(name, &text).await
        }
        (None, Some(profile)) => {
            let profile = app
                .profiles()
                .get(&profile)?
                .with_context(|| format!("No profile named '{}'", profile))?;
            coordinator.connect(name, &profile.config_text).await
        }
        (None, None) => match app.profiles().get(name)? {
            Some(profile) => coordinator.connect(name, &profile.config_text).await,
            None => coordinator.reconnect(name).await,
        },
    };

    let connected = result.with_context(|| format!("Failed to connect {}", name))?;
    coordinator.shutdown();

    if connected.prompted {
        tracing::info!("VPN permission remembered for future connects");
    }
    println!("Connected {}", connected.name);
    Ok(())
}

async fn run_disconnect(app: &App, name: &str) -> Result<()> {
    let coordinator = app.coordinator();
    let duration = coordinator.elapsed_display(name);

    coordinator
        .disconnect(name)
        .await
        .with_context(|| format!("Failed to disconnect {}", name))?;

    match duration {
        Some(duration) => println!("Disconnected {} after {}", name, duration),
        None => println!("Disconnected {}", name),
    }
    Ok(())
}

async fn run_stats(app: &App, name: &str) -> Result<()> {
    let coordinator = app.coordinator();
    let counters = coordinator
        .statistics(name)
        .await
        .with_context(|| format!("Failed to read statistics for {}", name))?;

    println!("{}", name);
    println!("  received: {} bytes", counters.total_rx);
    println!("  sent:     {} bytes", counters.total_tx);
    if let Some(elapsed) = coordinator.elapsed_display(name) {
        println!("  connected for {}", elapsed);
    }
    Ok(())
}

async fn run_watch(app: &App, name: &str) -> Result<()> {
    let coordinator = app.coordinator();
    if !coordinator.adopt_running(name).await? {
        bail!("Tunnel {} is not connected", name);
    }

    let rates = coordinator.subscribe_rates(name);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        // Another process disconnecting clears the start marker
        let Some(elapsed) = coordinator.elapsed_display(name) else {
            println!("{} disconnected", name);
            break;
        };

        let reading = *rates.borrow();
        match reading {
            Some(reading) => println!(
                "{}  down {:>12}  up {:>12}",
                elapsed,
                reading.rx().to_string(),
                reading.tx().to_string()
            ),
            None => println!("{}  measuring...", elapsed),
        }
    }

    coordinator.shutdown();
    Ok(())
}

fn run_profile(app: &App, command: ProfileCommand) -> Result<()> {
    let profiles = app.profiles();

    match command {
        ProfileCommand::Add { name, file } => {
            let text = read_config_file(&file)?;
            profiles.save(&name, &text)?;
            println!("Saved profile {}", name);
        }
        ProfileCommand::List => {
            let all = profiles.list()?;
            if all.is_empty() {
                println!("No profiles");
            }
            for profile in all {
                let created = chrono::DateTime::from_timestamp_millis(profile.created_at_ms as i64)
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{:<16} {}", profile.name, created);
            }
        }
        ProfileCommand::Show { name } => {
            let profile = profiles
                .get(&name)?
                .with_context(|| format!("No profile named '{}'", name))?;
            print!("{}", profile.config_text);
        }
        ProfileCommand::Remove { name } => {
            if !profiles.remove(&name)? {
                bail!("No profile named '{}'", name);
            }
            println!("Removed profile {}", name);
        }
    }

    Ok(())
}

fn run_config(command: &ConfigCommand, config: &AppConfig, path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommand::Init { force } => {
            let path = path.map(Path::to_path_buf).unwrap_or_else(AppConfig::default_path);
            if path.exists() && !force {
                bail!("{} already exists. Use --force to overwrite", path.display());
            }
            AppConfig::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<String> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    std::fs::read_to_string(&expanded).with_context(|| format!("Failed to read {}", expanded))
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
