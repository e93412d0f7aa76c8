//! `edigated`: runs the EDI gateway.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use edigate::config::{load_config, FileSettingsProvider, GatewayConfig, SettingsProvider};
use edigate::db::{activity_repo, queue_repo, Database};
use edigate::secrets::expand_home;
use edigate::{
    ErpClient, EdigateError, Escalator, Gateway, ProviderClient, Services, SettingsEncryptor,
    TelegramEscalator,
};

const DEFAULT_CONFIG_PATH: &str = "~/.edigate/edigate.yaml";
const STATUS_ACTIVITY_LIMIT: u32 = 20;

#[derive(Parser)]
#[command(name = "edigated", version, about = "EDI provider to ERP gateway")]
struct Cli {
    /// Gateway configuration file
    #[arg(long, short, global = true, env = "EDIGATE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the poller and the delivery scheduler until interrupted
    Run,
    /// Run one poll cycle and one delivery tick, then exit
    Once,
    /// Test provider authentication and ERP reachability
    Check,
    /// Print queue counts and recent activity
    Status,
    /// Encrypt a password read from stdin for use as `passwordEncrypted`
    EncryptPassword,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_ok() {
        // `log` records from the database layer.
        let _ = tracing_log::LogTracer::init();
    }
}

fn load_gateway_config(path: Option<&Path>) -> Result<GatewayConfig, EdigateError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => {
            let default = PathBuf::from(expand_home(DEFAULT_CONFIG_PATH));
            if default.exists() {
                Ok(load_config(&default)?)
            } else {
                tracing::info!("No configuration file found, using defaults");
                Ok(GatewayConfig::default())
            }
        }
    }
}

struct Runtime {
    config: GatewayConfig,
    db: Database,
    settings: Arc<dyn SettingsProvider>,
}

impl Runtime {
    fn open(config_path: Option<&Path>) -> Result<Self, EdigateError> {
        let config = load_gateway_config(config_path)?;
        let db = Database::open(&config.database.resolved_path())?;
        let settings: Arc<dyn SettingsProvider> =
            Arc::new(FileSettingsProvider::new(config.settings_path()));
        Ok(Self {
            config,
            db,
            settings,
        })
    }

    fn services(&self) -> Result<Services, EdigateError> {
        let escalator: Arc<dyn Escalator> = Arc::new(
            TelegramEscalator::new(self.settings.clone())
                .map_err(|e| EdigateError::Task(format!("escalation: {}", e)))?,
        );
        Ok(Services::new(
            self.db.clone(),
            self.settings.clone(),
            escalator,
            &self.config,
        ))
    }
}

async fn run(config_path: Option<&Path>) -> Result<(), EdigateError> {
    let runtime = Runtime::open(config_path)?;
    // Fail early on a broken settings document; the loops re-read it anyway.
    runtime.settings.current()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| EdigateError::Task(format!("Failed to install signal handler: {}", e)))?;

    let gateway = Gateway::start(runtime.services()?);
    rx.recv().await;
    tracing::info!("Interrupt received");
    gateway.shutdown().await
}

async fn once(config_path: Option<&Path>) -> Result<(), EdigateError> {
    let runtime = Runtime::open(config_path)?;
    let report = runtime.services()?.run_once(Utc::now()).await?;

    match report.poll {
        Some(poll) => println!(
            "poll:     {} fetched, {} new, {} duplicate, {} malformed",
            poll.fetched, poll.created, poll.duplicates, poll.malformed
        ),
        None => println!("poll:     failed (see activity log)"),
    }
    let tick = report.delivery;
    println!(
        "delivery: {} due, {} delivered, {} retrying, {} abandoned, {} recovered",
        tick.due, tick.delivered, tick.retrying, tick.abandoned, tick.recovered
    );
    Ok(())
}

async fn check(config_path: Option<&Path>) -> Result<bool, EdigateError> {
    let runtime = Runtime::open(config_path)?;
    let settings = runtime.settings.current()?;
    let mut ok = true;

    match ProviderClient::new(runtime.settings.clone())
        .check_connection()
        .await
    {
        Ok(()) => println!("provider: ok ({})", settings.provider.base_url),
        Err(e) => {
            ok = false;
            println!("provider: FAILED: {}", e);
        }
    }

    match ErpClient::new().check_reachable(&settings.erp).await {
        Ok(status) => println!("erp:      reachable ({}, HTTP {})", settings.erp.url, status),
        Err(e) => {
            ok = false;
            println!("erp:      FAILED: {}", e);
        }
    }

    Ok(ok)
}

fn status(config_path: Option<&Path>) -> Result<(), EdigateError> {
    let config = load_gateway_config(config_path)?;
    let db = Database::open(&config.database.resolved_path())?;

    println!("Queue:");
    for (state, count) in queue_repo::count_by_state(&db)? {
        println!("  {:<15} {}", state, count);
    }

    println!("\nRecent activity:");
    for entry in activity_repo::recent(&db, STATUS_ACTIVITY_LIMIT)? {
        println!(
            "  {} {:<8} {:<10} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.severity,
            entry.component,
            entry.message
        );
    }
    Ok(())
}

fn encrypt_password() -> Result<(), EdigateError> {
    let encryptor = SettingsEncryptor::from_env()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| EdigateError::Task(format!("Failed to read stdin: {}", e)))?;
    let password = line.trim_end_matches(['\r', '\n']);
    println!("{}", encryptor.encrypt(password)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = cli.config.as_deref();
    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Check => match check(config).await {
            Ok(true) => Ok(()),
            Ok(false) => return ExitCode::FAILURE,
            Err(e) => Err(e),
        },
        Command::Status => status(config),
        Command::EncryptPassword => encrypt_password(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
