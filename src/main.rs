use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};

use cropsentinel::config::PipelineConfig;
use cropsentinel::notify::{LogNotifier, Notifier, NullNotifier};
use cropsentinel::simulate::{Simulator, SimulatorConfig};
use cropsentinel::storage::{RecordSink, SqliteStore};

const DEFAULT_DB: &str = "data/cropsentinel.db";

#[derive(Parser)]
#[command(
    name = "cropsentinel",
    about = "Sensor anomaly detection and crop advisories for monitored field plots",
    version,
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay JSON-lines readings through the detection pipeline
    Replay {
        /// Input file, or - for stdin
        #[arg(long, default_value = "-")]
        input: String,

        /// Pipeline configuration file
        #[arg(long, env = "CROPSENTINEL_CONFIG")]
        config: Option<PathBuf>,

        /// Store events and recommendations in this SQLite database
        #[arg(long)]
        db: Option<String>,

        /// Do not log recommendations as they are produced
        #[arg(long)]
        quiet: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Generate labelled synthetic readings as JSON lines
    Simulate {
        /// Comma-separated plot ids
        #[arg(long, value_delimiter = ',', default_value = "1")]
        plots: Vec<u64>,

        /// Number of steps
        #[arg(long, default_value = "30")]
        steps: usize,

        /// Seconds between steps
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Share of plot-steps carrying an injected anomaly (0.0-1.0)
        #[arg(long, default_value = "0.3")]
        anomaly_ratio: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Score detection quality on a simulated run
    Evaluate {
        #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
        plots: Vec<u64>,

        #[arg(long, default_value = "500")]
        steps: usize,

        #[arg(long, default_value = "600")]
        interval: u64,

        #[arg(long, default_value = "0.2")]
        anomaly_ratio: f64,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Pipeline configuration file
        #[arg(long, env = "CROPSENTINEL_CONFIG")]
        config: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration and print the effective settings
    CheckConfig {
        /// Pipeline configuration file
        #[arg(long, env = "CROPSENTINEL_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List stored anomaly events and recommendations
    Incidents {
        #[arg(long, default_value = DEFAULT_DB)]
        db: String,

        /// Only events and recommendations for this plot
        #[arg(long)]
        plot: Option<u64>,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::load(p),
        None => PipelineConfig::load_or_default(),
    };
    config.context("invalid pipeline configuration")
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Replay {
            input,
            config,
            db,
            quiet,
            json,
        } => {
            let config = Arc::new(load_config(config.as_deref())?);
            let sink: Option<Arc<dyn RecordSink>> = match db.as_deref() {
                Some(path) => {
                    tracing::info!(db = %path, "Storing records");
                    Some(Arc::new(SqliteStore::open(path)?))
                }
                None => None,
            };
            let notifier: Arc<dyn Notifier> = if quiet {
                Arc::new(NullNotifier)
            } else {
                Arc::new(LogNotifier)
            };

            let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
                Box::new(BufReader::new(tokio::io::stdin()))
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("failed to open {}", input))?;
                Box::new(BufReader::new(file))
            };

            tracing::info!(%input, "Replaying readings");
            let summary = cropsentinel::replay(reader, config, sink, notifier).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\nCropSentinel Replay Summary");
                println!("Lines: {} ({} malformed)", summary.lines, summary.malformed);
                println!(
                    "{:<8} | {:>9} | {:>8} | {:>9} | {:>15}",
                    "Plot", "Processed", "Rejected", "Anomalies", "Recommendations"
                );
                println!("{:-<8}-|-{:-<9}-|-{:-<8}-|-{:-<9}-|-{:-<15}", "", "", "", "", "");
                for (plot, s) in &summary.dispatch.plots {
                    println!(
                        "{:<8} | {:>9} | {:>8} | {:>9} | {:>15}",
                        plot, s.processed, s.rejected, s.anomalies, s.recommendations
                    );
                }
                let t = &summary.dispatch.totals;
                println!(
                    "{:<8} | {:>9} | {:>8} | {:>9} | {:>15}",
                    "total", t.processed, t.rejected, t.anomalies, t.recommendations
                );
                if t.sink_failures > 0 {
                    println!("WARNING: {} records could not be stored", t.sink_failures);
                }
            }
        }
        Commands::Simulate {
            plots,
            steps,
            interval,
            anomaly_ratio,
            seed,
            output,
        } => {
            let sim_config = SimulatorConfig {
                interval_seconds: interval,
                steps,
                anomaly_ratio: anomaly_ratio.clamp(0.0, 1.0),
            };
            tracing::info!(?plots, steps, interval, anomaly_ratio, seed, "Generating readings");
            let readings = Simulator::new(seed, plots, sim_config).generate();

            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(std::io::BufWriter::new(
                    std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
                )),
                None => Box::new(std::io::stdout().lock()),
            };
            for lr in &readings {
                serde_json::to_writer(&mut out, lr)?;
                writeln!(out)?;
            }
            out.flush()?;
            tracing::info!(count = readings.len(), "Simulation finished");
        }
        Commands::Evaluate {
            plots,
            steps,
            interval,
            anomaly_ratio,
            seed,
            config,
            json,
        } => {
            let config = Arc::new(load_config(config.as_deref())?);
            let sim_config = SimulatorConfig {
                interval_seconds: interval,
                steps,
                anomaly_ratio: anomaly_ratio.clamp(0.0, 1.0),
            };
            let readings = Simulator::new(seed, plots, sim_config).generate();
            let metrics = cropsentinel::evaluate::evaluate_labelled(config, &readings, chrono::Utc::now());

            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                println!("\nCropSentinel Detection Evaluation");
                println!("{}", metrics);
            }
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config).context("failed to render configuration")?);
            tracing::info!("Configuration is valid");
        }
        Commands::Incidents { db, plot, limit, json } => {
            let store = SqliteStore::open(&db)?;
            let events = store.list_recent_events(plot, limit)?;
            let recs = store.list_recommendations(plot, limit)?;

            if json {
                let body = serde_json::json!({ "events": events, "recommendations": recs });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else if events.is_empty() && recs.is_empty() {
                println!("No anomalies recorded.");
            } else {
                println!("{:<20} | {:<6} | {:<11} | {:<12} | {:<8} | Value", "Observed", "Plot", "Sensor", "Kind", "Severity");
                println!("{:-<20}-|-{:-<6}-|-{:-<11}-|-{:-<12}-|-{:-<8}-|-{:-<8}", "", "", "", "", "", "");
                for e in &events {
                    println!(
                        "{:<20} | {:<6} | {:<11} | {:<12} | {:<8} | {:.2}{}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.plot_id,
                        e.sensor_type,
                        e.kind,
                        e.severity,
                        e.triggering_value,
                        e.sensor_type.unit()
                    );
                }
                println!("\nRecommendations:");
                for r in &recs {
                    println!(" - [plot {}] {} ({:.2}): {}", r.plot_id, r.rule, r.confidence, r.action);
                    println!("   {}", r.explanation);
                }
            }
        }
    }

    Ok(())
}
