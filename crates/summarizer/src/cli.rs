//! CLI wiring for the condense summarizer.

use crate::error::SummarizeError;
use crate::host::{HostConfig, ModelHost};
use crate::normalize::{decode_upload, normalize};
use crate::pipeline::SummaryOutcome;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use condense_engine::DevicePreference;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "condense", about = "Abstractive text summarization")]
pub struct Cli {
    /// Compute device; overrides the config file.
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,

    /// JSON host configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DeviceArg {
    Auto,
    Cpu,
    Accelerated,
}

impl From<DeviceArg> for DevicePreference {
    fn from(value: DeviceArg) -> DevicePreference {
        match value {
            DeviceArg::Auto => DevicePreference::Auto,
            DeviceArg::Cpu => DevicePreference::Cpu,
            DeviceArg::Accelerated => DevicePreference::Accelerated,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize text from --text, --file or stdin.
    Summarize {
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, allow_negative_numbers = true)]
        min_length: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        max_length: Option<i64>,
        #[arg(long)]
        weights: Option<PathBuf>,
        #[arg(long, conflicts_with = "vocab")]
        tokenizer: Option<PathBuf>,
        #[arg(long)]
        vocab: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the resolved host configuration as JSON.
    ShowConfig,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        device,
        config,
        command,
    } = cli;

    let mut host_config = match &config {
        Some(path) => {
            info!(path = %path.display(), "loading host config");
            HostConfig::load_from_file(path)?
        }
        None => HostConfig::default(),
    };
    if let Some(device) = device {
        host_config.device = device.into();
    }

    match command {
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&host_config)?);
        }
        Command::Summarize {
            text,
            file,
            min_length,
            max_length,
            weights,
            tokenizer,
            vocab,
            seed,
            format,
        } => {
            if weights.is_some() {
                host_config.weights = weights;
            }
            if tokenizer.is_some() {
                host_config.tokenizer = tokenizer;
                host_config.vocab = None;
            }
            if vocab.is_some() {
                host_config.vocab = vocab;
                host_config.tokenizer = None;
            }
            if let Some(seed) = seed {
                host_config.seed = seed;
            }

            let input = read_input(text, file)?;
            if let Err(err @ SummarizeError::EmptyInput) = normalize(&input) {
                eprintln!("{}", err.notice());
                return Ok(());
            }

            let policy = host_config.generation;
            let min_length = min_length.unwrap_or(policy.min_length as i64);
            let max_length = max_length.unwrap_or(policy.max_length as i64);
            if let Ok(requested) = policy.with_lengths(min_length, max_length) {
                for message in requested.unusual_lengths() {
                    warn!("{message}");
                }
            }

            let host = ModelHost::new(host_config);
            let summarizer = host.summarizer().map_err(with_notice)?;
            let outcome = summarizer
                .summarize(&input, min_length, max_length)
                .map_err(with_notice)?;
            print_outcome(&outcome, format)?;
        }
    }
    Ok(())
}

fn read_input(text: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let bytes = match file {
        Some(path) => {
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?
        }
        None => {
            let mut bytes = Vec::new();
            io::stdin()
                .read_to_end(&mut bytes)
                .context("failed to read stdin")?;
            bytes
        }
    };
    decode_upload(bytes).map_err(with_notice)
}

fn with_notice(err: SummarizeError) -> anyhow::Error {
    let notice = err.notice();
    anyhow::Error::new(err).context(notice)
}

fn print_outcome(outcome: &SummaryOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        OutputFormat::Text => {
            println!("Summary:");
            println!("{}", outcome.summary.text);
            println!();
            println!("{}", outcome.stats);
        }
    }
    Ok(())
}
