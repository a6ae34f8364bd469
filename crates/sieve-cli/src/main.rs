//! Wallet Sieve CLI
//!
//! Drives the analysis backend from the terminal: manages the API key and
//! model list, uploads wallet workbooks, selects positive examples, and
//! streams a generated filter snippet to stdout as it arrives.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sieve_core::{Config, ControlPanel, GenerationEvent, ToggleOutcome, WalletRecord};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Wallet Sieve - learn wallet filters from positive examples
///
/// Uploads wallet workbooks to the analysis backend, marks a subset of wallets
/// as positive examples, and asks the backend to generate a filter snippet
/// that selects wallets like them.
#[derive(Parser, Debug)]
#[command(name = "sieve")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: sieve.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Backend base URL, overriding the config file
    #[arg(long, value_name = "URL", global = true)]
    backend_url: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available prompt templates
    Prompts,

    /// List models known to the backend
    Models {
        /// Fetch a fresh list with the stored API key and save it
        #[arg(long)]
        refresh: bool,
    },

    /// Validate an API key and store it in the backend config
    ValidateKey {
        /// The key to validate
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Make MODEL the backend's selected model
    SelectModel {
        /// Model identifier
        #[arg(value_name = "MODEL")]
        model: String,
    },

    /// Generate a filter from positive-example wallets
    Learn(LearnArgs),
}

#[derive(clap::Args, Debug)]
struct LearnArgs {
    /// Wallet workbooks to upload
    #[arg(short, long = "wallets", value_name = "FILE", num_args = 1.., required = true)]
    wallets: Vec<PathBuf>,

    /// Positive-example addresses, separated by whitespace, ',', ';' or '|'
    #[arg(short, long, value_name = "TEXT")]
    addresses: Option<String>,

    /// Read positive-example addresses from a file
    #[arg(long, value_name = "FILE")]
    addresses_file: Option<PathBuf>,

    /// Select wallets by index (after any address selection)
    #[arg(short, long = "index", value_name = "N")]
    indices: Vec<usize>,

    /// Model to generate with (default: config, then backend selection)
    #[arg(short, long)]
    model: Option<String>,

    /// Prompt template file name (default: promptTemplate from config)
    #[arg(short, long)]
    prompt: Option<String>,

    /// Save the generated snippet
    #[arg(long)]
    save: bool,

    /// Directory for the saved snippet (default: snippetDir from config)
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    /// Run the generated snippet against the uploaded wallets
    #[arg(long)]
    execute: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref url) = args.backend_url {
        config.backend_url.clone_from(url);
    }

    // Re-validate after overrides
    config.validate()?;
    tracing::debug!(backend = %config.backend_url, "Using backend");

    let panel = ControlPanel::new(config)?;

    match args.command {
        Command::Prompts => list_prompts(&panel).await,
        Command::Models { refresh } => list_models(&panel, refresh).await,
        Command::ValidateKey { key } => {
            panel.initialize().await?;
            panel.validate_and_store_key(&key).await?;
            println!("API key is valid and has been saved.");
            Ok(())
        }
        Command::SelectModel { model } => {
            panel.initialize().await?;
            if panel.select_model(&model).await? {
                println!("Selected model: {model}");
            } else {
                println!("Model unchanged: {model}");
            }
            Ok(())
        }
        Command::Learn(learn) => learn_filter(&panel, learn).await,
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

async fn list_prompts(panel: &ControlPanel) -> anyhow::Result<()> {
    let prompts = panel.client().list_prompts().await?;
    if prompts.is_empty() {
        println!("No prompt templates found on the backend.");
    }
    for prompt in prompts {
        println!("{prompt}");
    }
    Ok(())
}

async fn list_models(panel: &ControlPanel, refresh: bool) -> anyhow::Result<()> {
    let backend = panel.initialize().await?;
    let models = if refresh {
        let models = panel.refresh_models().await?;
        println!("Model list refreshed and saved ({} models).", models.len());
        models
    } else {
        backend.all_models.clone()
    };

    for model in &models {
        let starred = if backend.starred_models.contains(model) { '*' } else { ' ' };
        let selected = if backend.selected_model == *model { " (selected)" } else { "" };
        println!("{starred} {model}{selected}");
    }
    Ok(())
}

async fn learn_filter(panel: &ControlPanel, args: LearnArgs) -> anyhow::Result<()> {
    panel.initialize().await?;

    // Upload
    let loaded = panel.load_wallets(&args.wallets).await?;
    println!("{loaded} total wallets parsed successfully.");

    // Select
    let mut address_text = args.addresses.unwrap_or_default();
    if let Some(path) = &args.addresses_file {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read addresses file '{}': {e}", path.display())
        })?;
        address_text.push('\n');
        address_text.push_str(&contents);
    }
    if !address_text.trim().is_empty() {
        let report = panel.apply_bulk_input(&address_text).await;
        for token in &report.unmatched {
            eprintln!("No loaded wallet has address {token}");
        }
    }
    for index in args.indices {
        match panel.toggle_wallet(index, true).await {
            ToggleOutcome::OutOfRange { index, len } => {
                eprintln!("Ignoring index {index}: only {len} wallets loaded");
            }
            ToggleOutcome::Unaddressable { index } => {
                eprintln!("Ignoring index {index}: wallet has no address");
            }
            ToggleOutcome::Applied | ToggleOutcome::Unchanged => {}
        }
    }

    print_selection(panel).await;

    // Generate
    let prompt = args
        .prompt
        .or_else(|| panel.config().prompt_template.clone())
        .unwrap_or_default();

    let (done_tx, done_rx) = oneshot::channel();
    let printer = tokio::spawn(print_tokens(panel.subscribe(), done_rx));

    println!();
    let result = panel.learn_filter(args.model.as_deref(), &prompt).await;
    if done_tx.send(()).is_err() {
        tracing::debug!("Token printer already stopped");
    }
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Token printer task failed");
    }
    println!();

    // A failed generation still leaves partial code and the error trailer.
    if args.save {
        save_snippet(panel, args.save_dir.as_deref()).await?;
    }
    result?;

    if args.execute {
        let results = panel.execute_code().await?;
        print_results(&results);
    }

    Ok(())
}

/// Writes tokens to stdout as they arrive until told the generation is over.
async fn print_tokens(
    mut events: broadcast::Receiver<GenerationEvent>,
    mut done: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = print_event(&event) {
                        tracing::warn!(error = %e, "Failed to write token to stdout");
                        return;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Token printer fell behind");
                }
                Err(RecvError::Closed) => return,
            },
            _ = &mut done => {
                while let Ok(event) = events.try_recv() {
                    if let Err(e) = print_event(&event) {
                        tracing::warn!(error = %e, "Failed to write token to stdout");
                        return;
                    }
                }
                return;
            }
        }
    }
}

fn print_event(event: &GenerationEvent) -> std::io::Result<()> {
    if let GenerationEvent::Token(payload) = event {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(payload.text.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

async fn print_selection(panel: &ControlPanel) {
    let session = panel.session();
    let session = session.lock().await;
    println!("Positive examples ({}):", session.selected_count());
    for wallet in session.selected_wallets() {
        println!("  {}", wallet.label());
    }
}

async fn save_snippet(panel: &ControlPanel, dir: Option<&Path>) -> anyhow::Result<()> {
    match panel.save_snippet(dir).await? {
        Some(path) => println!("Snippet saved to {}", path.display()),
        None => println!("Nothing to save: the code buffer is empty."),
    }
    Ok(())
}

fn print_results(results: &[WalletRecord]) {
    println!();
    if results.is_empty() {
        println!("No wallets matched the filter.");
        return;
    }
    println!("Execution successful. {} wallets matched the filter.", results.len());
    for wallet in results {
        println!("  {}", wallet.address().unwrap_or("N/A"));
    }
}
