//! kubeai - Kubernetes assistant on the command line

mod executor;

use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kubeai_core::tools::{default_tools, CommandRunner};
use kubeai_core::{AiClient, LlmConfig, ProviderError, ProviderFactory};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::executor::TerminalExecutor;

#[derive(Parser)]
#[command(name = "kubeai")]
#[command(about = "Ask an LLM about your cluster and let it run kubectl for you", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/kubeai/config.toml)
    #[arg(short, long, global = true, env = "KUBEAI_CONFIG")]
    config: Option<PathBuf>,

    /// Provider name, overrides the config file
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Model id, overrides the config file
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Endpoint URL, overrides the config file
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// API key, overrides the config file and environment
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question without tools
    Ask {
        /// Wait for the full answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Let the model run kubectl/bash to answer
    Agent {
        /// Approve every tool call without asking
        #[arg(short, long)]
        yes: bool,
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// List models offered by the provider
    Models,
    /// Test the connection and print the result as JSON
    Status,
    /// List registered provider names
    Providers,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn load_config(cli: &Cli) -> Result<LlmConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = LlmConfig::load_from_path(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => LlmConfig::load().context("Failed to load configuration")?,
    };

    if let Some(provider) = &cli.provider {
        config.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(api_key) = &cli.api_key {
        config.api_key = Some(api_key.clone());
    }
    Ok(config)
}

/// Cancel the token on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl-C received, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn print_chunk(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Providers = cli.command {
        println!("{}", ProviderFactory::new().list_providers());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let client = AiClient::new(config).context("Failed to create AI provider")?;
    let cancel = cancel_on_ctrl_c();

    let outcome = match cli.command {
        Commands::Ask { no_stream, prompt } => {
            let prompt = prompt.join(" ");
            if no_stream {
                client
                    .ask_non_streaming(&prompt, &cancel)
                    .await
                    .map(|answer| println!("{}", answer))
            } else {
                let result = client.ask(&prompt, &mut print_chunk, &cancel).await;
                println!();
                result
            }
        }
        Commands::Agent { yes, prompt } => {
            let prompt = prompt.join(" ");
            if !client.supports_tools() {
                eprintln!(
                    "{} does not support tool calling, answering without tools",
                    client.provider_name()
                );
            }
            let executor = TerminalExecutor::new(CommandRunner::default(), yes);
            let result = client
                .ask_with_tools(&prompt, &default_tools(), &mut print_chunk, &executor, &cancel)
                .await;
            println!();
            result
        }
        Commands::Models => client.list_models(&cancel).await.map(|models| {
            for model in models {
                println!("{}", model);
            }
        }),
        Commands::Status => {
            let status = client.test_connection(&cancel).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.connected {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Providers => Ok(()),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(ProviderError::Cancelled) => {
            eprintln!("cancelled");
            std::process::exit(130);
        }
        Err(e) if e.is_max_iterations() => {
            eprintln!("The agent kept calling tools without reaching an answer: {}", e);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
