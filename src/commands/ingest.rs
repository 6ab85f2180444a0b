use anyhow::{Context, Result, anyhow};
use aprs_gateway::gateway::Discard;
use aprs_gateway::tnc2::{canonicalize_line, is_server_comment};
use aprs_gateway::{Gateway, GatewayConfig, Packet};
use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often held packets are checked for release.
const DELAYED_RELEASE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    AprsIs,
    Rf,
}

/// Options for the ingest loop
pub struct IngestOptions {
    pub kind: InputKind,
    /// Read from this file, or stdin
    pub input: Option<PathBuf>,
    pub config_path: PathBuf,
    pub metrics_port: Option<u16>,
    pub dump_history: bool,
}

/// One RF input line: `PORT[:SUBIF] HEXFRAME`.
pub fn parse_rf_line(line: &[u8]) -> Result<(String, u8, Vec<u8>)> {
    let line = std::str::from_utf8(line).context("RF input line is not text")?;
    let (port, frame) = line
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow!("Expected 'PORT HEXFRAME', got {:?}", line))?;
    let (port, subif) = match port.split_once(':') {
        Some((port, subif)) => (
            port,
            subif
                .parse::<u8>()
                .with_context(|| format!("Invalid sub-interface in {:?}", line))?,
        ),
        None => (port, 0),
    };
    let frame = hex::decode(frame.trim()).with_context(|| format!("Invalid hex frame in {:?}", line))?;
    Ok((port.to_string(), subif, frame))
}

pub fn format_accept(packet: &Packet) -> String {
    let position = match packet.position() {
        Some(p) => p.to_string(),
        None => "-".to_string(),
    };
    format!(
        "ACCEPT {} {} {}",
        packet.packet_type.short_names(),
        position,
        packet.tnc2_str()
    )
}

pub fn format_drop(discard: &Discard, line: &[u8]) -> String {
    format!(
        "DROP {} {}",
        discard.reason.label(),
        String::from_utf8_lossy(line)
    )
}

fn open_input(input: Option<&PathBuf>) -> Result<Box<dyn AsyncBufRead + Unpin>> {
    match input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open input {:?}", path))?;
            Ok(Box::new(BufReader::new(tokio::fs::File::from_std(file))))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

fn handle_line(
    gateway: &mut Gateway,
    kind: InputKind,
    line: &[u8],
    out: &mut impl Write,
) -> Result<()> {
    let line = canonicalize_line(line);
    if line.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let result = match kind {
        InputKind::AprsIs => {
            if is_server_comment(line) {
                debug!("Server comment: {}", String::from_utf8_lossy(line));
                return Ok(());
            }
            gateway.ingest_aprsis(line, now)
        }
        InputKind::Rf => match parse_rf_line(line) {
            Ok((port, subif, frame)) => gateway.ingest_rf(&port, subif, &frame, now),
            Err(e) => {
                warn!("Skipping input line: {:#}", e);
                return Ok(());
            }
        },
    };
    let text = match result {
        Ok(packet) => format_accept(&packet),
        Err(discard) => format_drop(&discard, line),
    };
    writeln!(out, "{}", text).context("Failed to write output")
}

pub async fn handle_ingest(options: IngestOptions) -> Result<()> {
    let config = GatewayConfig::load_or_default(&options.config_path)
        .with_context(|| format!("Failed to load config {:?}", options.config_path))?;
    info!("Using configuration {:?}", options.config_path);

    if let Some(port) = options.metrics_port {
        aprs_gateway::metrics::start_metrics_server(port)?;
    }
    // after the recorder exists, so the zeros are exported
    aprs_gateway::metrics::initialize_gateway_metrics();

    let mut gateway = Gateway::new(&config)?;
    let mut segments = open_input(options.input.as_ref())?.split(b'\n');
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    let mut dupe_sweep = tokio::time::interval(Duration::from_secs(
        config.dupecheck.sweep_interval_seconds.max(1),
    ));
    dupe_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut history_sweep = tokio::time::interval(Duration::from_secs(
        config.history.sweep_interval_seconds.max(1),
    ));
    history_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut delayed_release = tokio::time::interval(DELAYED_RELEASE_INTERVAL);
    delayed_release.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Reading {:?} input", options.kind);
    let mut lines = 0u64;
    loop {
        tokio::select! {
            segment = segments.next_segment() => {
                let Some(line) = segment.context("Failed to read input")? else {
                    break;
                };
                lines += 1;
                handle_line(&mut gateway, options.kind, &line, &mut out)?;
            }
            _ = dupe_sweep.tick() => {
                gateway.sweep_dupes(Utc::now());
            }
            _ = history_sweep.tick() => {
                gateway.sweep_history(Utc::now());
            }
            _ = delayed_release.tick() => {
                for packet in gateway.release_delayed(Utc::now()) {
                    writeln!(out, "{}", format_accept(&packet)).context("Failed to write output")?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), stopping...");
                break;
            }
        }
    }

    out.flush().context("Failed to flush output")?;
    info!(
        "Processed {} lines; {} dupe records, {} history cells",
        lines,
        gateway.dupes().len(),
        gateway.history().len()
    );

    if options.dump_history {
        gateway
            .history()
            .dump(&mut out, Utc::now())
            .context("Failed to dump history")?;
        out.flush().context("Failed to flush output")?;
    }
    Ok(())
}
