//! # genagent CLI
//!
//! Turns natural-language scene requests into rendered Blender scenes.
//!
//! Usage:
//!   genagent run <task>
//!   genagent plan --mode structured <task>
//!   genagent template <task>
//!   genagent config check|show
//!   genagent memory list|search <text>|patterns|reflect
//!
//! Examples:
//!   genagent run "a modern living room with a grey sofa, a glass coffee table and a TV"
//!   genagent run --manual --max-iterations 3 "a bedroom with a lamp"
//!   genagent --config config/config.yaml config show

mod backend;

use backend::{Backend, Runner};
use clap::{Parser, Subcommand};
use genagent_agent::verifier::feedback;
use genagent_agent::{Pipeline, PipelineEvent, PipelineReport, PlannerAgent};
use genagent_core::config::{Config, LoggingConfig, PlanMode, CHAR_CODE_EMBEDDER};
use genagent_core::error::{Error, ErrorKind, Result};
use genagent_core::memory::{embed_text, CharCodeEmbedder, SceneMemory};
use genagent_core::{fallback_template, init_logging};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

/// Used when `--config` is not given and the file exists
const DEFAULT_CONFIG: &str = "config/config.yaml";

#[derive(Parser)]
#[command(name = "genagent")]
#[command(author, version, about = "GenAgent3D - natural-language requests to Blender scenes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `genagent_agent=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: text or json
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan, render and verify until the scene passes
    Run {
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,

        /// Run scripts in Blender yourself instead of headless
        #[arg(long)]
        manual: bool,

        /// script or structured
        #[arg(long)]
        mode: Option<String>,

        /// Print planner output as it arrives
        #[arg(long)]
        stream: bool,

        #[arg(long)]
        max_iterations: Option<usize>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
    /// One planning step; writes the script
    Plan {
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,

        #[arg(long)]
        mode: Option<String>,

        /// Script destination (default: render.script_path)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Write the offline fallback scene script
    Template {
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect scene memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate and report where settings come from
    Check,
    /// Print the effective configuration, API key masked
    Show,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List remembered attempts
    List,
    /// Attempts similar to a request
    Search {
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,

        #[arg(short, default_value = "5")]
        k: usize,
    },
    /// Object, style and relationship frequencies
    Patterns,
    /// Lessons from low-scoring attempts
    Reflect,
}

fn config_source(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            default.exists().then(|| default.to_path_buf())
        }
    }
}

fn load_config(source: Option<&Path>) -> Result<Config> {
    match source {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

fn write_script(path: &Path, script: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, script).map_err(|e| {
        Error::new(ErrorKind::IoFailed, format!("failed to write {}: {}", path.display(), e)).set_source(e)
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn print_event(event: &PipelineEvent<'_>, pass_score: u8) {
    match event {
        PipelineEvent::PlanDelta(delta) => {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        PipelineEvent::Planned { iteration, plan } => {
            println!("\n=== Iteration {} ===", iteration);
            if !plan.reasoning.is_empty() {
                println!("Reasoning:\n{}\n", plan.reasoning);
            }
        }
        PipelineEvent::ScriptFailed { attempt, error, .. } => {
            let last = error.lines().last().unwrap_or_default();
            println!("Script error (repair {}): {}", attempt, truncate(last, 160));
        }
        PipelineEvent::Rendered { image, .. } => println!("Rendered: {}", image.display()),
        PipelineEvent::Verified { verification, .. } => println!("{}", feedback(verification, pass_score)),
        PipelineEvent::Reflection(text) => println!("Reflection:\n{}\n", text),
    }
}

fn print_summary(report: &PipelineReport) {
    println!("\n=== Summary ===");
    println!("Iterations: {}", report.iterations.len());
    match report.best_score {
        Some(score) => println!("Best score: {}", score),
        None => println!("Best score: none"),
    }
    println!("Passed: {}", if report.passed { "yes" } else { "no" });
    if let Some(image) = &report.final_image {
        println!("Image: {}", image.display());
    }
    println!(
        "Tokens: {} over {} calls",
        report.usage.total_tokens(),
        report.usage.total_calls
    );
}

async fn run_task(
    mut config: Config,
    task: &str,
    manual: bool,
    mode: Option<String>,
    stream: bool,
    max_iterations: Option<usize>,
    json: bool,
) -> Result<()> {
    if let Some(mode) = mode {
        config.pipeline.mode = mode.parse()?;
    }
    if let Some(n) = max_iterations {
        config.pipeline.max_iterations = n;
    }
    config.validate()?;

    let pass_score = config.pipeline.pass_score;
    let backend = Backend::from_config(&config)?;
    let runner = Runner::select(&config, manual);
    let memory = SceneMemory::open(&config.memory).await?;
    let final_script_path = config.render.output_path.join("final_scene.py");

    if !json {
        println!("Task: {}", task);
    }

    let mut pipeline = Pipeline::new(backend, runner, config, memory).with_streaming(stream && !json);
    if !json {
        pipeline = pipeline.with_event_handler(move |event| print_event(event, pass_score));
    }
    let report = pipeline.run(task).await?;

    write_script(&final_script_path, &report.final_script)?;

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::serialization_failed(e.to_string()).set_source(e))?;
        println!("{}", out);
    } else {
        print_summary(&report);
        println!("Script: {}", final_script_path.display());
    }
    Ok(())
}

async fn plan_task(config: Config, task: &str, mode: Option<String>, out: Option<PathBuf>) -> Result<()> {
    let mode = match mode {
        Some(mode) => mode.parse()?,
        None => config.pipeline.mode,
    };
    let backend = Backend::from_config(&config)?;
    let memory = SceneMemory::open(&config.memory).await?;
    let reflection = memory.reflect(config.pipeline.pass_score);

    let mut planner = PlannerAgent::new(&backend, &config).with_mode(mode);
    let hint = Some(reflection.as_str()).filter(|r| !r.is_empty());
    let plan = planner.plan(task, hint).await?;

    if !plan.reasoning.is_empty() {
        println!("Reasoning:\n{}\n", plan.reasoning);
    }
    if mode == PlanMode::Structured {
        if let Some(scene_plan) = &plan.scene_plan {
            let json = serde_json::to_string_pretty(scene_plan)
                .map_err(|e| Error::serialization_failed(e.to_string()).set_source(e))?;
            println!("Scene plan:\n{}\n", json);
        }
    }

    let path = out.unwrap_or_else(|| config.render.script_path.clone());
    write_script(&path, &plan.script)?;
    println!("Script written to {}", path.display());
    Ok(())
}

fn template(config: &Config, task: &str, out: Option<PathBuf>) -> Result<()> {
    let render = &config.render;
    let output = render
        .output_path
        .join(format!("scene.{}", render.output_format.extension()));
    let script = fallback_template(task, config, &output);

    let path = out.unwrap_or_else(|| render.script_path.clone());
    write_script(&path, &script)?;
    println!("Template written to {}", path.display());
    Ok(())
}

fn config_command(config: &Config, source: Option<&Path>, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => {
            config.validate()?;
            match source {
                Some(path) => println!("Config: {}", path.display()),
                None => println!("Config: defaults + environment"),
            }
            println!("Provider: {} ({})", config.provider.as_str(), config.api.base_url);
            match config.api.resolve_api_key(config.provider) {
                Some(_) => println!("API key: resolved"),
                None => println!("API key: missing (set {})", config.api.api_key_env),
            }
            match &config.render.blender_path {
                Some(path) => println!("Blender: {}", path.display()),
                None => println!("Blender: not set (manual mode)"),
            }
            println!("Configuration OK");
        }
        ConfigAction::Show => print!("{}", config.redacted().to_yaml()?),
    }
    Ok(())
}

async fn memory_command(config: &Config, action: &MemoryAction) -> Result<()> {
    let memory = SceneMemory::open(&config.memory).await?;

    match action {
        MemoryAction::List => {
            if memory.is_empty() {
                println!("No memories");
            }
            for (i, record) in memory.records().iter().enumerate() {
                let score = record.score().map_or("-".to_string(), |s| s.to_string());
                println!(
                    "{:4}  score {:>3}  {}  {}",
                    i,
                    score,
                    truncate(&record.instruction, 50),
                    truncate(record.reasoning.lines().next().unwrap_or_default(), 60)
                );
            }
        }
        MemoryAction::Search { text, k } => {
            let text = text.join(" ");
            let model = &config.memory.embedding_model;
            let embedding = if model == CHAR_CODE_EMBEDDER {
                CharCodeEmbedder::default().embed(&text)
            } else {
                let backend = Backend::from_config(config)?;
                embed_text(&backend, model, &text).await?
            };

            let hits = memory.search_similar(&embedding, *k);
            if hits.is_empty() {
                println!("No similar memories");
            }
            for hit in hits {
                let score = hit.record.score().map_or("-".to_string(), |s| s.to_string());
                println!(
                    "{:8.4}  score {:>3}  {}",
                    hit.distance,
                    score,
                    truncate(&hit.record.instruction, 70)
                );
            }
        }
        MemoryAction::Patterns => {
            let report = memory.analyze_patterns();
            for (title, rows) in [
                ("Objects", &report.common_objects),
                ("Styles", &report.common_styles),
                ("Relationships", &report.common_relationships),
            ] {
                println!("{}:", title);
                if rows.is_empty() {
                    println!("  (none)");
                }
                for (name, count) in rows {
                    println!("  {:<20} {}", name, count);
                }
            }
        }
        MemoryAction::Reflect => {
            let reflection = memory.reflect(config.pipeline.pass_score);
            if reflection.is_empty() {
                println!("No attempts below {}", config.pipeline.pass_score);
            } else {
                println!("{}", reflection);
            }
        }
    }
    Ok(())
}

async fn execute(cli: Cli, config: Config, source: Option<PathBuf>) -> Result<()> {
    match cli.command {
        Commands::Run {
            task,
            manual,
            mode,
            stream,
            max_iterations,
            json,
        } => run_task(config, &task.join(" "), manual, mode, stream, max_iterations, json).await,
        Commands::Plan { task, mode, out } => plan_task(config, &task.join(" "), mode, out).await,
        Commands::Template { task, out } => template(&config, &task.join(" "), out),
        Commands::Config { action } => config_command(&config, source.as_deref(), &action),
        Commands::Memory { action } => memory_command(&config, &action).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let source = config_source(cli.config.as_deref());
    let loaded = load_config(source.as_deref());

    let fallback = LoggingConfig::default();
    let logging = loaded.as_ref().map_or(&fallback, |c| &c.logging);
    if let Err(e) = init_logging(logging, cli.log_level.as_deref(), cli.log_format.as_deref()) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = execute(cli, config, source).await {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
