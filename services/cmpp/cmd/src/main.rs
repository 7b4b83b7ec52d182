//! CMPP probe binary.
//!
//! Logs in to an ISMG, optionally checks the link with one active-test round
//! trip, then terminates the session cleanly. Exits non-zero if any step
//! fails.

use anyhow::{bail, Context, Result};
use clap::Parser;
use cmpp_session::Client;
use cmpp_wire::{CommandId, Packet, Version, WireError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;

use config::ProbeConfig;
use logging::CmppLogFormatter;

/// CMPP login and link probe
#[derive(Parser, Debug)]
#[command(name = "cmpp-probe", version, about = "Log in to a CMPP gateway and check the link")]
struct Args {
    /// ISMG address, e.g. 10.0.0.8:7890
    #[arg(long)]
    addr: Option<String>,

    /// Source address (SP account) to log in as
    #[arg(long)]
    user: Option<String>,

    /// Shared secret
    #[arg(long)]
    secret: Option<String>,

    /// Protocol version: 2.0, 2.1 or 3.0
    #[arg(long)]
    version: Option<Version>,

    /// Dial timeout, e.g. 5s
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    /// How long to wait for each response after login
    #[arg(long, default_value = "5s")]
    response_timeout: humantime::Duration,

    /// Send one ACTIVE_TEST and wait for its response
    #[arg(long)]
    active_test: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

impl Args {
    fn apply(&self, config: &mut ProbeConfig) {
        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(secret) = &self.secret {
            config.secret = secret.clone();
        }
        if let Some(version) = self.version {
            config.version = version;
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = **timeout;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("cmpp_probe={}", args.log_level).parse()?)
        .add_directive(format!("cmpp_session={}", args.log_level).parse()?)
        .add_directive(format!("cmpp_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(CmppLogFormatter::new("cmpp"))
        .init();

    info!("Starting CMPP probe v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ProbeConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    if config.user.is_empty() {
        bail!("no user configured; pass --user or set CMPP_USER");
    }

    let result = probe(&config, &args).await;
    if let Err(e) = &result {
        component_error!("probe", "Probe against {} failed: {:#}", config.addr, e);
    }
    result
}

async fn probe(config: &ProbeConfig, args: &Args) -> Result<()> {
    let response_timeout: Duration = *args.response_timeout;
    let mut client = Client::new(config.version);

    client
        .connect(config.addr.as_str(), &config.user, &config.secret, config.timeout)
        .await
        .with_context(|| format!("login to {} as {}", config.addr, config.user))?;
    component_info!("login", "Logged in to {} as {} ({})", config.addr, config.user, config.version);

    if args.active_test {
        let started = std::time::Instant::now();
        let seq = client
            .send_request_with_id(&Packet::ActiveTestReq)
            .await
            .context("send ACTIVE_TEST")?;
        await_response(&client, CommandId::ACTIVE_TEST_RESP, seq, response_timeout)
            .await
            .context("wait for ACTIVE_TEST_RESP")?;
        component_info!("link", "Active test round trip took {:?}", started.elapsed());
    }

    let seq = client
        .send_request_with_id(&Packet::TerminateReq)
        .await
        .context("send TERMINATE")?;
    if let Err(e) = await_response(&client, CommandId::TERMINATE_RESP, seq, response_timeout).await {
        component_warn!("login", "No TERMINATE_RESP from gateway: {:#}", e);
    }

    client.disconnect().await.context("disconnect")?;
    info!("Probe complete");
    Ok(())
}

/// Read until a `expected` packet arrives carrying `seq`.
///
/// Link checks from the gateway are answered on the way; commands the
/// probe has no decoder for are skipped.
async fn await_response(client: &Client, expected: CommandId, seq: u32, timeout: Duration) -> Result<()> {
    loop {
        let incoming = match client.receive(timeout).await {
            Ok(incoming) => incoming,
            Err(cmpp_session::Error::Wire(WireError::Unsupported(command))) => {
                component_debug!("link", "Skipping unsupported command {:#010x}", command);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if incoming.packet == Packet::ActiveTestReq {
            component_debug!("link", "Answering gateway ACTIVE_TEST seq {}", incoming.sequence_id);
            client
                .send_response(&Packet::ActiveTestRsp { reserved: 0 }, incoming.sequence_id)
                .await?;
            continue;
        }

        if incoming.packet.command_id() == expected && incoming.sequence_id == seq {
            return Ok(());
        }

        component_debug!(
            "link",
            "Skipping command {} seq {} while waiting for {}",
            incoming.packet.command_id(),
            incoming.sequence_id,
            expected
        );
    }
}
