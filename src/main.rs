//! promptplay CLI - run prompt templates against a completion backend

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::BufReader;

use promptplay::config::DEFAULT_CONFIG_FILE;
use promptplay::variables::{LineCollector, StaticCollector};
use promptplay::{
    provider, template, Event, EventKind, EventLog, FixSuggestion, PlayConfig, PlayError,
    RunOutcome, RunSession, TemplateConfig,
};

#[derive(Parser)]
#[command(name = "promptplay")]
#[command(about = "promptplay - run prompt templates against LLM backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt template
    Run {
        /// Path to the template file (e.g. skprompt.txt)
        template: PathBuf,

        /// Backend configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Pre-set a variable (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Number of generations (overrides config; zero or negative runs none)
        #[arg(short = 'n', long, allow_negative_numbers = true)]
        count: Option<i64>,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print every run event as JSON on stderr
        #[arg(long)]
        events: bool,
    },

    /// List the variables a template references
    Vars {
        /// Path to the template file
        template: PathBuf,
    },

    /// Validate backend selection for a config file
    Check {
        /// Backend configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

struct RunArgs {
    template: PathBuf,
    config: PathBuf,
    vars: Vec<String>,
    count: Option<i64>,
    timeout: Option<u64>,
    events: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            template,
            config,
            vars,
            count,
            timeout,
            events,
        } => {
            run_template(RunArgs {
                template,
                config,
                vars,
                count,
                timeout,
                events,
            })
            .await
        }
        Commands::Vars { template } => list_vars(&template).await,
        Commands::Check { config } => check_config(&config),
    };

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            1
        }
    };
    // A stdin read abandoned mid-line still holds a blocking thread
    std::process::exit(code);
}

fn load_config(path: &Path) -> Result<PlayConfig, PlayError> {
    Ok(PlayConfig::load_or_default(path)?.with_env())
}

async fn run_template(args: RunArgs) -> Result<(), PlayError> {
    let text = tokio::fs::read_to_string(&args.template).await?;
    let mut config = load_config(&args.config)?;
    if let Some(count) = args.count {
        config.max_count = count.clamp(0, i64::from(u32::MAX)) as u32;
    }
    if let Some(template_config) = TemplateConfig::load_beside(&args.template)? {
        template_config.apply_to(&mut config.generation);
    }

    let preset = StaticCollector::from_assignments(&args.vars)?;

    let (log, feed) = EventLog::with_feed();
    let session = RunSession::new().with_events(log);
    let handle = session.cancel_handle();

    let collector = LineCollector::new(BufReader::new(tokio::io::stdin()))
        .with_preset(preset)
        .abandon_on(handle.clone())
        .with_prompt(prompt_var);

    if let Some(secs) = args.timeout {
        handle.cancel_after(Duration::from_secs(secs));
    }
    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Cancelling...", "⚠".yellow());
                handle.cancel();
            }
        })
    };
    let printer = tokio::spawn(print_feed(feed, config.max_count, args.events));

    let outcome = session.generate(&text, &config, &collector).await;
    interrupt.abort();
    // Session and loop dropped their log handles; the feed drains and closes
    let _ = printer.await;

    match outcome {
        RunOutcome::Completed(results) => {
            println!("{} {} result(s)", "✓".green(), results.len());
            Ok(())
        }
        RunOutcome::Cancelled(results) => {
            println!(
                "{} Cancelled after {} result(s)",
                "⚠".yellow(),
                results.len()
            );
            Ok(())
        }
        RunOutcome::Failed { error, .. } if error.is_abandonment() => {
            println!("{} Variable entry abandoned", "⚠".yellow());
            Ok(())
        }
        RunOutcome::Failed { error, .. } => Err(error),
    }
}

async fn print_feed(
    mut feed: tokio::sync::mpsc::UnboundedReceiver<Event>,
    max_count: u32,
    raw: bool,
) {
    while let Some(event) = feed.recv().await {
        if raw {
            if let Ok(json) = serde_json::to_string(&event) {
                eprintln!("{json}");
            }
        }
        match event.kind {
            EventKind::ProviderSelected { provider, model } => {
                println!(
                    "{} Using backend: {} | model: {}",
                    "→".cyan(),
                    provider.cyan().bold(),
                    model.cyan()
                );
            }
            EventKind::CallCompleted {
                index,
                text,
                duration_ms,
                ..
            } => {
                println!(
                    "{} {}",
                    format!("[{}/{}]", index + 1, max_count).cyan().bold(),
                    format!("{duration_ms}ms").dimmed()
                );
                println!("{text}");
            }
            _ => {}
        }
    }
}

async fn list_vars(path: &Path) -> Result<(), PlayError> {
    let text = tokio::fs::read_to_string(path).await?;
    let names = template::extract(&text);

    if names.is_empty() {
        println!("{} No variables", "✓".green());
        return Ok(());
    }
    for name in names {
        println!("${name}");
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<(), PlayError> {
    let config = load_config(path)?;
    let provider = provider::select(&config)?;

    println!("{} Configuration '{}' is valid", "✓".green(), path.display());
    println!("  Backend: {}", provider.name());
    println!("  Model: {}", provider.model());
    println!("  Generations: {}", config.max_count);
    Ok(())
}

fn prompt_var(name: &str) {
    eprint!("{} ", format!("${name}:").cyan());
}
