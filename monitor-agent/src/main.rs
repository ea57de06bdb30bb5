#![forbid(unsafe_code)]

use anyhow::Context;
use argh::FromArgs;
use log::{error, info};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AgentConfig, ReportMode},
    identity::AgentIdentity,
    locate::Locator,
    probe::HostQuerent,
    report::Reporter,
    sink::{PushSink, RedisConnector, Sink, StoreSink},
};

mod config;
mod counters;
mod http_util;
mod identity;
mod locate;
mod probe;
mod procfs;
mod report;
mod sink;
mod snapshot;

const DOTENV_FILE: &str = ".env";

#[derive(FromArgs, Debug)]
#[argh(description = "A host telemetry agent reporting to a Redis store or an HTTP collector.")]
struct Args {
    #[argh(
        option,
        short = 'c',
        default = "\"agent.toml\".to_string()",
        description = "configuration file, skipped when missing"
    )]
    pub config: String,
    #[argh(switch, description = "report a single snapshot and exit")]
    pub once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let cfg = AgentConfig::load(&args.config, DOTENV_FILE)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;

    SimpleLogger::new().with_level(cfg.log_level()).env().init()?;
    log::debug!("Agent config: {cfg:#?}");

    let id = AgentIdentity::load_or_create(&cfg.uuid_file)
        .with_context(|| format!("failed to persist agent id to {}", cfg.uuid_file))?;
    info!("agent id: {id}");

    let sink = build_sink(&cfg, &id)?;

    let location = Locator {
        ipv4_api: &cfg.ipv4_api,
        ipv6_api: &cfg.ipv6_api,
        geo_api: &cfg.geo_api,
        timeout: cfg.socket_timeout(),
    }
    .resolve()
    .await;

    let querent = HostQuerent::new(&cfg.exclude_fs);
    let facts = querent.query_static();
    info!("{} on {}", facts.cpu_model, facts.system_version);

    let shutdown_token = CancellationToken::new();
    tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => shutdown_token.cancel(),
                Err(e) => error!("failed to listen for ctrl-c: {e}"),
            }
        }
    });

    let mut reporter = Reporter::new(querent, sink, facts, location);
    reporter
        .run(
            cfg.report_interval(),
            cfg.report_once || args.once,
            shutdown_token,
        )
        .await;

    Ok(())
}

fn build_sink(cfg: &AgentConfig, id: &AgentIdentity) -> anyhow::Result<Sink> {
    match cfg.report_mode {
        ReportMode::Http => {
            if cfg.server_token.is_empty() {
                anyhow::bail!(
                    "Please generate server token using `php think token add --uuid {id}` on your server, then set SERVER_TOKEN"
                );
            }
            let sink = PushSink::new(
                &cfg.server_url,
                cfg.server_token.clone(),
                id,
                cfg.socket_timeout(),
            );
            info!("reporting to collector {}", sink.endpoints().collection);
            Ok(Sink::Push(sink))
        }
        ReportMode::Redis => {
            let connector = RedisConnector::new(
                &cfg.host,
                cfg.port,
                cfg.ssl,
                cfg.password.as_deref().filter(|p| !p.is_empty()),
                cfg.socket_timeout(),
            )?;
            let sink = StoreSink::new(
                connector,
                id.clone(),
                &cfg.key_prefix,
                cfg.retention,
                cfg.alive_check,
            );
            info!(
                "reporting to store {}:{} under {}",
                cfg.host,
                cfg.port,
                sink.keys().collection
            );
            Ok(Sink::Store(sink))
        }
    }
}
