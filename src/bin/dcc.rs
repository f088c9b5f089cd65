//! DCC client CLI binary.
//!
//! Diameter Credit-Control client for one peer.
//!
//! # Commands
//!
//! - `handshake` - Run the capabilities exchange and print the CEA
//! - `watch` - Handshake, then log watchdog liveness ticks
//! - `balance` - Send a balance-check CCR and print the CCA
//! - `config` - Print the effective configuration as TOML

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dcc::{
    codec::{avp_code, Avp, Message, Value, CREDIT_CONTROL_APP_ID},
    config::{Config, WriteFailurePolicy},
    protocol::{Session, SessionEvent},
    VERSION,
};
use serde::Serialize;

/// CC-Request-Type EVENT_REQUEST
const CC_REQUEST_TYPE_EVENT: i32 = 4;

/// Subscription-Id-Type END_USER_E164
const SUBSCRIPTION_ID_TYPE_E164: i32 = 0;

#[derive(Parser)]
#[command(name = "dcc")]
#[command(version = VERSION)]
#[command(about = "Diameter Credit-Control client", long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/dcc/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Peer address (host:port)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Origin-Host
    #[arg(long, global = true)]
    origin_host: Option<String>,

    /// Origin-Realm
    #[arg(long, global = true)]
    origin_realm: Option<String>,

    /// Destination-Host
    #[arg(long, global = true)]
    destination_host: Option<String>,

    /// Destination-Realm
    #[arg(long, global = true)]
    destination_realm: Option<String>,

    /// Watchdog interval in milliseconds
    #[arg(long, global = true)]
    watchdog_interval_ms: Option<u64>,

    /// Per-answer timeout in milliseconds (applies to CEA, DWA and CCA)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Fail requests immediately when they cannot be written
    #[arg(long, global = true)]
    fail_fast: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capabilities exchange only
    Handshake,

    /// Handshake, then log watchdog ticks
    Watch {
        /// Stop after this many ticks (0 = run until the peer goes away)
        #[arg(short, long, default_value = "0")]
        ticks: u64,
    },

    /// Send a balance-check CCR
    Balance {
        /// Subscriber MSISDN (Subscription-Id-Data)
        #[arg(short, long)]
        msisdn: String,

        /// Service-Context-Id
        #[arg(long, default_value = "32251@3gpp.org")]
        service_context: String,

        /// Requested-Action (2 = CHECK_BALANCE)
        #[arg(long, default_value = "2")]
        requested_action: i32,

        /// Service-Identifier
        #[arg(long, default_value = "0")]
        service_identifier: u32,
    },

    /// Print the effective configuration
    Config,
}

/// JSON view of an answer
#[derive(Serialize)]
struct AnswerSummary {
    command: String,
    hop_by_hop: u32,
    end_to_end: u32,
    result_code: Option<u32>,
    session_id: Option<String>,
    origin_host: Option<String>,
    avps: usize,
}

impl From<&Message> for AnswerSummary {
    fn from(message: &Message) -> Self {
        Self {
            command: message
                .command()
                .map(|c| c.answer_name().to_string())
                .unwrap_or_else(|| message.header.command_code.to_string()),
            hop_by_hop: message.hop_by_hop(),
            end_to_end: message.header.end_to_end,
            result_code: message.result_code(),
            session_id: message.session_id(),
            origin_host: message.origin_host(),
            avps: message.avps.len(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config, cli.verbose, cli.json_logs);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Handshake => cmd_handshake(config).await,
            Commands::Watch { ticks } => cmd_watch(config, ticks).await,
            Commands::Balance {
                msisdn,
                service_context,
                requested_action,
                service_identifier,
            } => {
                let avps = balance_avps(&msisdn, &service_context, requested_action, service_identifier);
                cmd_balance(config, avps).await
            },
            Commands::Config => Ok(()),
        }
    })
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = cli
        .config
        .clone()
        .or_else(|| Config::default_path().filter(|p| p.exists()));
    let config = match path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let mut config = config.with_env_overrides();

    let session = &mut config.session;
    if let Some(url) = &cli.url {
        session.url = url.clone();
    }
    if let Some(host) = &cli.origin_host {
        session.origin_host = host.clone();
    }
    if let Some(realm) = &cli.origin_realm {
        session.origin_realm = realm.clone();
    }
    if let Some(host) = &cli.destination_host {
        session.destination_host = Some(host.clone());
    }
    if let Some(realm) = &cli.destination_realm {
        session.destination_realm = Some(realm.clone());
    }
    if let Some(ms) = cli.watchdog_interval_ms {
        session.watchdog_interval_ms = ms;
    }
    if let Some(ms) = cli.timeout_ms {
        session.handshake_timeout_ms = Some(ms);
        session.watchdog_timeout_ms = Some(ms);
        session.answer_timeout_ms = Some(ms);
    }
    if cli.fail_fast {
        session.write_failure_policy = WriteFailurePolicy::FailFast;
    }

    session.validate()?;
    Ok(config)
}

fn init_logging(config: &Config, verbose: bool, json: bool) {
    let default_filter = if verbose { "debug" } else { config.logging.filter.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect(config: Config) -> anyhow::Result<Session> {
    let url = config.session.url.clone();
    let session = Session::new(config.session)?;
    session
        .start()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(session)
}

fn print_answer(message: &Message) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&AnswerSummary::from(message))?);
    Ok(())
}

async fn cmd_handshake(config: Config) -> anyhow::Result<()> {
    let session = connect(config).await?;
    session.send_capability_request().await?;
    let answer = session.await_capability_answer().await;
    session.close().await;

    print_answer(&answer.context("capabilities exchange failed")?)
}

async fn cmd_watch(config: Config, ticks: u64) -> anyhow::Result<()> {
    let session = connect(config).await?;
    let mut events = session.events();
    session.init().await.context("capabilities exchange failed")?;

    loop {
        match events.recv().await {
            Ok(SessionEvent::Alive { tick, .. }) => {
                tracing::info!(tick, "peer alive");
                if ticks > 0 && tick >= ticks {
                    break;
                }
            },
            Ok(SessionEvent::Error(err)) => tracing::warn!("{}", err),
            Ok(_) => {},
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
            },
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    session.close().await;
    Ok(())
}

async fn cmd_balance(config: Config, avps: Vec<Avp>) -> anyhow::Result<()> {
    let session = connect(config).await?;
    session.init().await.context("capabilities exchange failed")?;

    let started = Instant::now();
    let answer = session.call(avps).await;
    session.close().await;

    let answer = answer.context("credit-control request failed")?;
    tracing::info!(elapsed = ?started.elapsed(), "CCA received");
    print_answer(&answer)
}

fn balance_avps(msisdn: &str, service_context: &str, requested_action: i32, service_identifier: u32) -> Vec<Avp> {
    vec![
        Avp::mandatory(
            avp_code::SUBSCRIPTION_ID,
            Value::Grouped(vec![
                Avp::mandatory(
                    avp_code::SUBSCRIPTION_ID_TYPE,
                    Value::Enumerated(SUBSCRIPTION_ID_TYPE_E164),
                ),
                Avp::mandatory(avp_code::SUBSCRIPTION_ID_DATA, Value::Utf8String(msisdn.to_string())),
            ]),
        ),
        Avp::mandatory(
            avp_code::AUTH_APPLICATION_ID,
            Value::Unsigned32(CREDIT_CONTROL_APP_ID),
        ),
        Avp::mandatory(avp_code::CC_REQUEST_TYPE, Value::Enumerated(CC_REQUEST_TYPE_EVENT)),
        Avp::mandatory(
            avp_code::SERVICE_CONTEXT_ID,
            Value::Utf8String(service_context.to_string()),
        ),
        Avp::mandatory(avp_code::REQUESTED_ACTION, Value::Enumerated(requested_action)),
        Avp::mandatory(avp_code::EVENT_TIMESTAMP, Value::Time(Utc::now())),
        Avp::mandatory(
            avp_code::SERVICE_IDENTIFIER,
            Value::Unsigned32(service_identifier),
        ),
        Avp::mandatory(avp_code::CC_REQUEST_NUMBER, Value::Unsigned32(0)),
    ]
}
