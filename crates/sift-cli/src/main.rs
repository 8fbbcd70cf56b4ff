//! Sift CLI
//!
//! - `sift translate`: natural language → structured search query (+ trace)
//! - `sift tools`: the discovery tool schemas offered to the model
//! - `sift validate`: run the validator over a candidate query file

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use sift_agent::llm::{LLMConfig, Provider, UnifiedClient};
use sift_agent::{
    AgentConfig, AgentRunResult, HeuristicModel, Orchestrator, ProviderModel, QueryModel,
    TranslationRequest,
};
use sift_discovery::{FixtureBackend, HttpSearchBackend, SearchBackend};
use sift_query::{validate, CandidateQuery, DatasetKind, FieldCatalog, TimeRange, ValidationContext};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "sift")]
#[command(
    author,
    version,
    about = "Sift: natural-language search translated into structured queries"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a request into a structured query.
    Translate {
        /// The request, e.g. "slow API calls over 5s last week".
        text: String,
        /// Organization to scope discovery lookups to.
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: Option<String>,
        /// Preferred dataset (errors, spans, logs, issues).
        #[arg(long, value_parser = parse_dataset)]
        dataset: Option<DatasetKind>,
        /// Which model answers: the built-in heuristic model or a hosted LLM.
        #[arg(long, value_enum, default_value_t = ModelBackend::Mock)]
        backend: ModelBackend,
        /// Serve discovery lookups from a JSON fixture instead of the search API.
        #[arg(long)]
        fixture: Option<PathBuf>,
        /// Model turns allowed (overrides SIFT_MAX_STEPS).
        #[arg(long)]
        max_steps: Option<usize>,
        /// Fail instead of returning a query with residual violations.
        #[arg(long)]
        strict: bool,
        /// Print the run result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the discovery tool schemas.
    Tools {
        #[arg(long)]
        json: bool,
    },
    /// Validate (and repair) a candidate query JSON file.
    Validate {
        file: PathBuf,
        /// Fallback dataset when the file's dataset is unknown.
        #[arg(long, value_parser = parse_dataset)]
        dataset: Option<DatasetKind>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelBackend {
    Mock,
    Openai,
    Anthropic,
    Local,
}

fn parse_dataset(s: &str) -> Result<DatasetKind, String> {
    s.parse::<DatasetKind>().map_err(|e| e.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Translate {
            text,
            org,
            project,
            dataset,
            backend,
            fixture,
            max_steps,
            strict,
            json,
        } => {
            let mut request = TranslationRequest::new(text, org);
            if let Some(project) = project {
                request = request.with_project(project);
            }
            if let Some(dataset) = dataset {
                request = request.with_dataset_hint(dataset);
            }
            let mut config = AgentConfig::from_env()?;
            if let Some(max_steps) = max_steps {
                config = config.with_max_steps(max_steps);
            }
            if strict {
                config = config.with_strict_validation(true);
            }
            cmd_translate(&request, backend, fixture.as_ref(), config, json).await?;
        }
        Commands::Tools { json } => cmd_tools(json)?,
        Commands::Validate {
            file,
            dataset,
            json,
        } => cmd_validate(&file, dataset, json)?,
    }
    Ok(())
}

fn build_model(backend: ModelBackend, config: &AgentConfig) -> Result<Arc<dyn QueryModel>> {
    let provider = match backend {
        ModelBackend::Mock => return Ok(Arc::new(HeuristicModel::new())),
        ModelBackend::Openai => Provider::OpenAI,
        ModelBackend::Anthropic => Provider::Anthropic,
        ModelBackend::Local => Provider::Local,
    };
    let llm = LLMConfig::provider_from_env(provider)?;
    let client = UnifiedClient::from_config(llm)?;
    Ok(Arc::new(
        ProviderModel::new(Box::new(client)).with_max_output_tokens(config.max_output_tokens),
    ))
}

fn build_backend(fixture: Option<&PathBuf>) -> Result<Arc<dyn SearchBackend>> {
    if let Some(path) = fixture {
        let backend = FixtureBackend::from_path(path)
            .with_context(|| format!("loading fixture {}", path.display()))?;
        return Ok(Arc::new(backend));
    }
    if std::env::var("SIFT_API_TOKEN").is_ok_and(|t| !t.trim().is_empty()) {
        return Ok(Arc::new(HttpSearchBackend::from_env()?));
    }
    eprintln!(
        "{} SIFT_API_TOKEN not set; using the bundled demo fixture",
        "info:".yellow().bold()
    );
    Ok(Arc::new(FixtureBackend::demo()?))
}

async fn cmd_translate(
    request: &TranslationRequest,
    backend: ModelBackend,
    fixture: Option<&PathBuf>,
    config: AgentConfig,
    json: bool,
) -> Result<()> {
    let model = build_model(backend, &config)?;
    let search = build_backend(fixture)?;
    let orchestrator = Orchestrator::new(model, config);

    if !json {
        eprintln!(
            "{} {}",
            "Translating".green().bold(),
            request.natural_language_text.cyan()
        );
    }
    let result = orchestrator.translate_with_backend(request, search).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_run_result(&result);
    }
    Ok(())
}

fn print_run_result(result: &AgentRunResult) {
    let q = &result.result;
    println!("  Dataset: {}", q.dataset.as_str().cyan());
    if q.query.is_empty() {
        println!("  Query: {}", "(none)".dimmed());
    } else {
        println!("  Query: {}", q.query.yellow());
    }
    println!("  Fields: {}", q.fields.join(", "));
    println!("  Sort: {}", q.sort);
    match &q.time_range {
        Some(TimeRange::Relative { stats_period }) => println!("  Time range: last {stats_period}"),
        Some(TimeRange::Absolute { start, end }) => println!("  Time range: {start} .. {end}"),
        None => {}
    }
    for eq in &q.equations {
        println!("  Equation: {eq}");
    }

    println!("  Tool calls: {}", result.tool_calls.len());
    for call in &result.tool_calls {
        match &call.error {
            None => println!("    {} {} {}", "→".cyan(), call.tool_name, call.arguments),
            Some(err) => println!(
                "    {} {} {} {}",
                "→".red(),
                call.tool_name,
                call.arguments,
                err.red()
            ),
        }
    }
    for fix in &result.fixed {
        println!("  {} {fix}", "fixed:".green());
    }
    for v in &result.violations {
        println!("  {} {v}", "violation:".yellow().bold());
    }
    if result.is_clean() {
        println!("{}", "Done.".green());
    } else {
        println!("{}", "Done with violations.".yellow());
    }
}

fn cmd_tools(json: bool) -> Result<()> {
    let specs = sift_discovery::tool_specs();
    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }
    for spec in &specs {
        println!("{}", spec.name.green().bold());
        println!("  {}", spec.description);
        println!("  args: {}", spec.args_schema);
    }
    Ok(())
}

fn cmd_validate(file: &PathBuf, dataset: Option<DatasetKind>, json: bool) -> Result<()> {
    let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let candidate = CandidateQuery::from_value(value)?;

    let catalog = FieldCatalog::new();
    let ctx = ValidationContext::new(&catalog).with_dataset_hint(dataset);
    let report = validate(&candidate, &ctx);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} {}", "Validating".green().bold(), file.display());
        println!("{}", serde_json::to_string_pretty(&report.query)?);
        for fix in &report.fixed {
            println!("  {} {fix}", "fixed:".green());
        }
        for v in &report.violations {
            println!("  {} {v}", "violation:".red().bold());
        }
    }

    if report.is_valid() {
        if !json {
            println!("{}", "Valid.".green());
        }
        Ok(())
    } else {
        Err(anyhow!(
            "{} violation(s) remain after repair",
            report.violations.len()
        ))
    }
}
