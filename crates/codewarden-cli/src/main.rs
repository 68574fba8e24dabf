use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Deserialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use walkdir::WalkDir;

use codewarden_core::adapter::anthropic::AnthropicAdapter;
use codewarden_core::adapter::heuristic::HeuristicAdapter;
use codewarden_core::adapter::openai::OpenAiAdapter;
use codewarden_core::adapter::prompt::language_for_path;
use codewarden_core::{
    render_result, AdapterSettings, ModelAdapter, ModelRegistry, OutputFormat, Provider,
    ProviderCategory, RegistryConfig, RunnerConfig, ScanRunner, ScanStore, SourceSet,
};

#[derive(Parser, Debug)]
#[command(
    name = "codewarden",
    author,
    version,
    about = "Multi-model security scan consensus engine"
)]
struct Cli {
    /// Model roster file (YAML) listing adapters to register
    #[arg(long = "models-config", value_name = "FILE", global = true)]
    models_config: Option<PathBuf>,

    /// Settings file layered under CODEWARDEN_* environment variables
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan files or directories with every selected model
    Scan {
        /// Files or directories to scan
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Adapter ids to run (comma separated); defaults to all registered
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,

        #[arg(long, value_enum, default_value = "human")]
        format: Format,

        /// Treat a scan with failed model passes as an error
        #[arg(long)]
        strict: bool,
    },
    /// List registered model adapters
    Models {
        /// Restrict the listing to one provider
        #[arg(long)]
        provider: Option<String>,

        /// Emit the listing as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Probe every registered adapter
    Health,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Human,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Human => OutputFormat::Human,
            Format::Json => OutputFormat::Json,
        }
    }
}

/// Settings resolved from the optional config file plus environment.
#[derive(Debug, Deserialize)]
struct CliSettings {
    chunk_lines: usize,
    strict: bool,
    /// Default model timeout as a humantime string, e.g. `45s`.
    #[serde(default)]
    model_timeout: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    let registry = build_registry(cli.models_config.as_deref(), &settings)?;

    match cli.command {
        Commands::Scan {
            paths,
            models,
            format,
            strict,
        } => run_scan(&registry, &settings, &paths, &models, format, strict).await?,
        Commands::Models { provider, json } => list_models(&registry, provider.as_deref(), json)?,
        Commands::Health => check_health(&registry).await?,
    }
    Ok(())
}

async fn run_scan(
    registry: &ModelRegistry,
    settings: &CliSettings,
    paths: &[PathBuf],
    models: &[String],
    format: Format,
    strict: bool,
) -> Result<()> {
    let sources = collect_sources(paths)?;
    let adapters = if models.is_empty() {
        registry.adapters()
    } else {
        registry.select(models)?
    };
    if adapters.is_empty() {
        bail!("no model adapters registered; check --models-config");
    }

    let scan_id = Uuid::new_v4().to_string();
    let store = Arc::new(ScanStore::new());
    let runner = ScanRunner::with_config(
        Arc::clone(&store),
        RunnerConfig {
            chunk_lines: settings.chunk_lines,
            strict: strict || settings.strict,
        },
    );

    let result = runner.run(&scan_id, sources, adapters).await?;
    if !result.model_failures.is_empty() {
        eprintln!(
            "{}",
            format!(
                "warning: {} model(s) did not complete",
                result.model_failures.len()
            )
            .yellow()
        );
    }
    println!("{}", render_result(&result, format.into())?);
    Ok(())
}

fn list_models(registry: &ModelRegistry, provider: Option<&str>, json: bool) -> Result<()> {
    let listed = match provider {
        Some(label) => {
            let provider = Provider::from_label(label)
                .with_context(|| format!("unknown provider `{label}`"))?;
            registry.list_by_provider(provider)
        }
        None => registry.list(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    println!("{} model(s) registered", listed.len());
    for info in listed {
        println!(
            "- {id:<28} [{provider:9}] {category}",
            id = info.id,
            provider = info.provider.as_str(),
            category = category_label(info.category),
        );
    }
    Ok(())
}

async fn check_health(registry: &ModelRegistry) -> Result<()> {
    for adapter in registry.adapters() {
        println!("Checking model {}", adapter.id());
        match adapter.health().await {
            Ok(health) if health.healthy => {
                println!("  {} {}", "ok".green(), health.message)
            }
            Ok(health) => println!("  {} {}", "failed".red(), health.message),
            Err(err) => println!("  {} {err:#}", "failed".red()),
        }
    }
    Ok(())
}

fn category_label(category: ProviderCategory) -> &'static str {
    match category {
        ProviderCategory::CloudLlm => "cloud LLM",
        ProviderCategory::LocalAnalyzer => "local analyzer",
    }
}

fn load_settings(path: Option<&Path>) -> Result<CliSettings> {
    let mut builder = config::Config::builder()
        .set_default("chunk_lines", 400_i64)?
        .set_default("strict", false)?;
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("CODEWARDEN")
            .try_parsing(true)
            .ignore_empty(true),
    );
    let settings: CliSettings = builder
        .build()
        .context("failed to load configuration")?
        .try_deserialize()
        .context("invalid configuration values")?;
    if let Some(timeout) = &settings.model_timeout {
        humantime::parse_duration(timeout)
            .with_context(|| format!("invalid model_timeout `{timeout}`"))?;
    }
    Ok(settings)
}

/// Assemble the model roster: the YAML roster file, the always-available
/// local heuristic analyzer, and an optional env-configured cloud adapter.
fn build_registry(models_config: Option<&Path>, settings: &CliSettings) -> Result<ModelRegistry> {
    let mut registry = match models_config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read model roster at {}", path.display()))?;
            let config: RegistryConfig = serde_yaml::from_str(&raw)
                .with_context(|| format!("invalid model roster at {}", path.display()))?;
            ModelRegistry::from_config(&config)?
        }
        None => ModelRegistry::new(),
    };

    if registry.get("heuristic:builtin").is_none() {
        registry.register(Arc::new(HeuristicAdapter::new()));
    }

    if let Some(adapter) = env_adapter(settings)? {
        registry.register(adapter);
    }
    Ok(registry)
}

/// Build a cloud adapter from CODEWARDEN_* environment variables when
/// CODEWARDEN_PROVIDER names one.
fn env_adapter(settings: &CliSettings) -> Result<Option<Arc<dyn ModelAdapter>>> {
    let provider_label = match std::env::var("CODEWARDEN_PROVIDER") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(None),
    };
    let provider = Provider::from_label(&provider_label)
        .with_context(|| format!("unknown CODEWARDEN_PROVIDER `{provider_label}`"))?;
    if provider == Provider::Heuristic {
        return Ok(None);
    }

    let mut adapter_settings = AdapterSettings::from_env()?;
    if adapter_settings.timeout_secs.is_none() {
        if let Some(timeout) = &settings.model_timeout {
            adapter_settings.timeout_secs = humantime::parse_duration(timeout)
                .map(|duration| duration.as_secs())
                .ok();
        }
    }

    let adapter: Arc<dyn ModelAdapter> = match provider {
        Provider::Anthropic => Arc::new(AnthropicAdapter::new(&adapter_settings)?),
        Provider::OpenAi => Arc::new(OpenAiAdapter::new(&adapter_settings)?),
        Provider::Heuristic => unreachable!("handled above"),
    };
    Ok(Some(adapter))
}

fn collect_sources(paths: &[PathBuf]) -> Result<SourceSet> {
    let mut sources: SourceSet = BTreeMap::new();
    for root in paths {
        if root.is_file() {
            // a file named explicitly is scanned even with an unknown extension
            insert_source(&mut sources, root);
        } else if root.is_dir() {
            for entry in WalkDir::new(root)
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if language_for_path(&path.to_string_lossy()).is_some() {
                    insert_source(&mut sources, path);
                }
            }
        } else {
            bail!("path {} does not exist", root.display());
        }
    }
    if sources.is_empty() {
        bail!("no scannable source files under the given paths");
    }
    Ok(sources)
}

fn insert_source(sources: &mut SourceSet, path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => {
            sources.insert(path.to_string_lossy().into_owned(), content);
        }
        Err(err) => warn!(path = %path.display(), %err, "skipping unreadable file"),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
