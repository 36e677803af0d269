//! CLI interface for local-learner

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::LearnerConfig;
use crate::learning::{Details, LearningManager, NaiveBayesEngine};

#[derive(Parser)]
#[command(name = "local-learner")]
#[command(about = "On-device continual learning store and trainer", long_about = None)]
#[command(version)]
struct Cli {
    /// Override the data directory from the config file
    #[arg(long, global = true, env = "LOCAL_LEARNER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Use an explicit config file instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show learning statistics
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Turn data collection on
    Enable,
    /// Turn data collection off
    Disable,
    /// Record an assistant interaction
    Record {
        /// What the user said
        message: String,
        /// What the assistant answered
        response: String,
        /// Detected intent label
        #[arg(short, long)]
        intent: String,
        /// Intent confidence (0.0-1.0)
        #[arg(short, long, default_value = "1.0")]
        confidence: f64,
        /// Context entries as key=value
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
    /// Record an in-app action
    Behavior {
        /// Action name (open, search, download, install, sign, ...)
        action: String,
        /// Screen the action happened on
        screen: String,
        /// Seconds spent
        #[arg(short, long, default_value = "0")]
        duration: f64,
        /// Details as key=value
        #[arg(long = "detail", value_name = "KEY=VALUE")]
        details: Vec<String>,
    },
    /// Record a feature usage pattern
    Usage {
        /// Feature name
        feature: String,
        /// Seconds spent
        #[arg(short, long, default_value = "0")]
        time_spent: f64,
        /// Steps taken, in order
        #[arg(short, long, value_delimiter = ',')]
        steps: Vec<String>,
        /// The task was completed
        #[arg(long)]
        completed: bool,
    },
    /// Rate a recorded interaction
    Feedback {
        /// Interaction id
        id: String,
        /// Rating from 1 to 5
        #[arg(allow_hyphen_values = true)]
        rating: i32,
        /// Optional comment
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Train a new model version now
    Train,
    /// Print the path of the current model
    ModelPath,
    /// Export the current model (password protected)
    Export {
        /// Export password
        #[arg(short, long)]
        password: String,
    },
    /// Delete collected data
    Clear {
        /// Also clear behaviors and usage patterns
        #[arg(long)]
        all: bool,
    },
}

fn parse_pairs(pairs: &[String]) -> Result<Details> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn load_config(cli: &Cli) -> Result<LearnerConfig> {
    let mut config = match &cli.config {
        Some(path) => LearnerConfig::load_from(path)?,
        None => LearnerConfig::load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    // Each invocation is short-lived, so a debounce armed by the previous one
    // never fired.
    config.reconcile_schedule_on_start = true;
    Ok(config)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let manager = LearningManager::start(config, Arc::new(NaiveBayesEngine::new()))?;

    let result = execute(&manager, cli.command).await;
    manager.shutdown();
    result
}

async fn execute(manager: &LearningManager, command: Commands) -> Result<()> {
    match command {
        Commands::Status { json } => {
            let stats = manager.statistics();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("Learning Statistics");
            println!("==================");
            println!("Learning: {}", if stats.learning_enabled { "enabled" } else { "disabled" });
            println!("Interactions: {}", stats.total_interactions);
            println!("With feedback: {}", stats.interactions_with_feedback);
            println!("Average rating: {:.2}", stats.average_feedback_rating);
            println!("Behaviors: {}", stats.behavior_count);
            println!("Usage patterns: {}", stats.pattern_count);
            println!();
            println!("Model version: {}", stats.model_version);
            match stats.last_training {
                Some(at) => println!("Last training: {}", at.to_rfc3339()),
                None => println!("Last training: never"),
            }
            println!("Data: {}", manager.config().data_dir.display());
        }
        Commands::Enable => {
            manager.set_learning_enabled(true);
            println!("Learning enabled.");
        }
        Commands::Disable => {
            manager.set_learning_enabled(false);
            println!("Learning disabled.");
        }
        Commands::Record { message, response, intent, confidence, context } => {
            let context = parse_pairs(&context)?;
            let context = (!context.is_empty()).then_some(context);
            match manager.record_interaction_with_context(&message, &response, &intent, confidence, context) {
                Some(id) => println!("{}", id),
                None => println!("Learning is disabled; nothing recorded."),
            }
        }
        Commands::Behavior { action, screen, duration, details } => {
            if manager.record_behavior(&action, &screen, duration, parse_pairs(&details)?) {
                println!("Recorded {} on {}.", action, screen);
            } else {
                println!("Learning is disabled; nothing recorded.");
            }
        }
        Commands::Usage { feature, time_spent, steps, completed } => {
            if manager.record_usage(&feature, time_spent, steps, completed) {
                println!("Recorded usage of {}.", feature);
            } else {
                println!("Learning is disabled; nothing recorded.");
            }
        }
        Commands::Feedback { id, rating, comment } => {
            if manager.record_feedback(&id, rating, comment) {
                println!("Feedback saved.");
            } else {
                eprintln!("No interaction with id {}", id);
            }
        }
        Commands::Train => match manager.train_now_async().await {
            Ok(report) => {
                println!("Successfully trained model version {}", report.version);
                println!(
                    "  {} examples ({} interactions, {} behaviors, {} usage patterns)",
                    report.examples, report.interaction_examples, report.behavior_examples, report.pattern_examples
                );
                println!("  {}", report.model_path.display());
            }
            Err(e) if e.is_insufficient_data() => println!("{}", e),
            Err(e) => anyhow::bail!("Training failed: {}", e),
        },
        Commands::ModelPath => match manager.latest_model_path_async().await {
            Some(path) => println!("{}", path.display()),
            None => println!("No trained model yet."),
        },
        Commands::Export { password } => {
            let path = manager.export_model(&password)?;
            println!("Exported model to {}", path.display());
        }
        Commands::Clear { all } => {
            if all {
                manager.clear_all_data();
                println!("Cleared all collected data.");
            } else {
                manager.clear_all_interactions();
                println!("Cleared all interactions.");
            }
        }
    }

    Ok(())
}
