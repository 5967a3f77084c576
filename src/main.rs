//! Cortex BCI CLI
//!
//! Streams EEG from a device bridge, classifies it in real time and records
//! labeled blocks for training.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cortex_bci::{
    transport::simulated::SIMULATED_ENDPOINT, Classifier, Config, Credentials, CsvSink,
    FeatureMode, IngestStatus, ProtocolClient, Recorder, RecordingSink, SetupOptions,
    SignalProcessor, SimulatedBridge, SimulatedBridgeConfig, StopReason, StreamIngester,
    WsOptions, VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Client id used against the simulated bridge when none is given.
const SIMULATED_CLIENT_ID: &str = "cortex-bci-sim";

#[derive(Parser)]
#[command(name = "cortex-bci")]
#[command(version = VERSION)]
#[command(about = "Real-time EEG command classification", long_about = None)]
struct Cli {
    /// Device bridge endpoint (overrides the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Headset id to bind; the first discovered headset otherwise
    #[arg(long, global = true)]
    headset: Option<String>,

    /// Application client id
    #[arg(long, global = true, env = "CORTEX_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    /// Application client secret
    #[arg(long, global = true, env = "CORTEX_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Use a built-in simulated bridge instead of a real one
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream EEG and print predicted commands
    Stream {
        /// Control loop rate in Hz
        #[arg(long, default_value = "60")]
        rate: f64,
    },

    /// Record one labeled block to CSV
    Record {
        /// Label attached to every recorded frame
        #[arg(long)]
        label: i64,

        /// Block length in seconds
        #[arg(long, default_value = "10")]
        duration: f64,
    },

    /// List headsets known to the bridge
    Headsets,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Stream { rate } => cmd_stream(&cli, *rate),
        Commands::Record { label, duration } => cmd_record(&cli, *label, *duration),
        Commands::Headsets => cmd_headsets(&cli),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_stream(cli: &Cli, rate: f64) -> Result<()> {
    if !(rate.is_finite() && rate > 0.0) {
        bail!("--rate must be a positive number, got {rate}");
    }

    let config = load_config(cli);
    println!("Cortex BCI v{VERSION}");
    println!();

    let classifier = Classifier::load(&config.model_path);
    match classifier.model() {
        Some(model) => println!("Model: {:?} (v{})", config.model_path, model.version),
        None => println!("No model loaded from {:?}; predictions will be empty.", config.model_path),
    }
    // The model decides what it can consume
    let feature_mode = classifier.feature_mode().unwrap_or(config.feature_mode);
    if feature_mode != config.feature_mode {
        println!(
            "Model expects {feature_mode} features; overriding configured {}",
            config.feature_mode
        );
    }
    let mut processor = SignalProcessor::new(config.filter, feature_mode)
        .context("invalid filter configuration")?;

    let bridge = Bridge::open(cli, &config)?;
    let session = ProtocolClient::establish(
        bridge.transport.clone(),
        bridge.credentials.clone(),
        &SetupOptions::from_config(&config),
    )
    .context("session setup failed")?;

    println!("Session: {}", session.session_id());
    println!("Headset: {}", session.headset_id());
    for (stream, code, message) in session.subscriptions().failed() {
        println!("  {stream}: not available ({code}: {message})");
    }
    println!("Feature mode: {feature_mode}");
    println!("Control loop: {rate} Hz");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let ingester = StreamIngester::with_window(&config.data_stream, &config.filter);
    ingester.start(session)?;

    let period = Duration::from_secs_f64(1.0 / rate);
    let slot = ingester.slot();
    let mut last_seq = 0;
    let mut last_command = None;
    let mut stalled = false;

    while running.load(Ordering::SeqCst) {
        let tick = Instant::now();

        if let IngestStatus::Stopped(reason) = ingester.status() {
            if let StopReason::ReceiveFailure(cause) = reason {
                ingester.stop();
                bail!("stream ended: {cause}");
            }
            break;
        }

        if ingester.is_stalled(config.stall_timeout) {
            if !stalled {
                warn!(timeout_ms = config.stall_timeout.as_millis() as u64, "Stream stalled");
                stalled = true;
            }
        } else {
            stalled = false;
        }

        // Temporal windows are filled from every frame on the ingestion thread
        let update = match feature_mode {
            FeatureMode::Temporal => ingester
                .latest_window()
                .filter(|window| window.seq > last_seq)
                .map(|window| {
                    (window.seq, window.timestamp, processor.window_features(&window))
                }),
            FeatureMode::AcrossChannels => slot
                .entry()
                .filter(|entry| entry.seq > last_seq)
                .map(|entry| (entry.seq, entry.frame.timestamp, processor.features(&entry.frame))),
        };

        if let Some((seq, timestamp, feature)) = update {
            last_seq = seq;
            if let Some(feature) = feature {
                let command = classifier.predict(&feature);
                if command != last_command {
                    match command {
                        Some(command) => println!("[{timestamp:.3}] {command}"),
                        None => println!("[{timestamp:.3}] (none)"),
                    }
                    last_command = command;
                }
            }
        }

        if let Some(rest) = period.checked_sub(tick.elapsed()) {
            thread::sleep(rest);
        }
    }

    println!();
    println!("Stopping...");
    ingester.stop();
    println!("{}", ingester.stats().summary());
    Ok(())
}

fn cmd_record(cli: &Cli, label: i64, duration: f64) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        bail!("--duration must be a positive number of seconds, got {duration}");
    }

    let config = load_config(cli);
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let bridge = Bridge::open(cli, &config)?;
    let session = ProtocolClient::establish(
        bridge.transport.clone(),
        bridge.credentials.clone(),
        &SetupOptions::from_config(&config),
    )
    .context("session setup failed")?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let ingester = StreamIngester::new(&config.data_stream);
    ingester.start(session)?;

    println!("Recording label {label} for {duration}s (Ctrl+C to cut short)...");
    let recorder = Recorder::new(ingester.slot(), config.poll_interval);
    let recording = recorder.record(Duration::from_secs_f64(duration), label, &running);
    ingester.stop();

    if let IngestStatus::Stopped(StopReason::ReceiveFailure(cause)) = ingester.status() {
        eprintln!("Warning: stream ended early: {cause}");
    }

    let mut sink = CsvSink::new(&config.recording_path);
    sink.write(&recording).context("could not save recording")?;

    println!("Frames recorded: {}", recording.frames.len());
    if recording.missed_frames > 0 {
        println!("Frames missed:   {}", recording.missed_frames);
    }
    println!("Saved to: {:?}", sink.path_for(&recording));
    Ok(())
}

fn cmd_headsets(cli: &Cli) -> Result<()> {
    let config = load_config(cli);
    let bridge = Bridge::open(cli, &config)?;

    let mut client = ProtocolClient::new(bridge.transport.clone(), bridge.credentials.clone());
    if config.request_access {
        client.request_access()?;
    }
    client.authorize(None)?;
    let headsets = client.query_headsets()?;
    client.disconnect();

    if headsets.is_empty() {
        println!("No headsets found.");
        return Ok(());
    }

    println!("Headsets");
    println!("========");
    for headset in headsets {
        match headset.connected_by.as_deref() {
            Some(link) => println!("  {}  {} via {}", headset.id, headset.status, link),
            None => println!("  {}  {}", headset.id, headset.status),
        }
    }
    Ok(())
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Config file values with command-line overrides applied.
fn load_config(cli: &Cli) -> Config {
    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config, using defaults: {e}");
            Config::default()
        }
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if cli.headset.is_some() {
        config.headset = cli.headset.clone();
    }
    config
}

/// An open connection to a real or simulated bridge.
struct Bridge {
    transport: Arc<dyn cortex_bci::Transport>,
    credentials: Credentials,
    // Keeps the simulated bridge thread alive for the connection's lifetime
    _simulated: Option<SimulatedBridge>,
}

impl Bridge {
    fn open(cli: &Cli, config: &Config) -> Result<Self> {
        if cli.simulate {
            let (simulated, client_end) = SimulatedBridge::spawn(SimulatedBridgeConfig {
                sample_rate_hz: config.filter.sample_rate_hz,
                ..SimulatedBridgeConfig::default()
            })?;
            println!("Bridge: {SIMULATED_ENDPOINT}");
            let credentials = Credentials::new(
                cli.client_id.as_deref().unwrap_or(SIMULATED_CLIENT_ID),
                cli.client_secret.as_deref().unwrap_or_default(),
            );
            return Ok(Self {
                transport: Arc::new(client_end),
                credentials,
                _simulated: Some(simulated),
            });
        }

        let (Some(client_id), Some(client_secret)) = (&cli.client_id, &cli.client_secret) else {
            bail!(
                "client credentials required: pass --client-id/--client-secret or set \
                 CORTEX_CLIENT_ID/CORTEX_CLIENT_SECRET"
            );
        };

        println!("Bridge: {}", config.endpoint);
        let transport = cortex_bci::WsTransport::connect(
            &config.endpoint,
            &WsOptions::from_config(config),
        )
        .with_context(|| format!("could not reach the device bridge at {}", config.endpoint))?;

        Ok(Self {
            transport: Arc::new(transport),
            credentials: Credentials::new(client_id.as_str(), client_secret.as_str()),
            _simulated: None,
        })
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
