#![warn(clippy::all)]

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use sajilo::api::{self, ApiState};
use sajilo::channels::{Channel, CliChannel, TelegramChannel};
use sajilo::config::{ClassifierBackend, Config};
use sajilo::controller::{dispatch, ConversationController};
use sajilo::engine::{EngineSettings, WorkflowEngine};
use sajilo::forms::fields::ValidationPolicy;
use sajilo::forms::phrases::PhraseBook;
use sajilo::forms::types::{FinalizeAction, FormKind};
use sajilo::forms::{load_forms, FormRegistry};
use sajilo::gateways::{
    ClassificationGateway, Classifier, Directory, KeywordClassifier, NcExgratiaClient, OllamaClassifier,
    StaticDirectory, SubmissionGateway,
};
use sajilo::records::RecordStore;
use sajilo::session::SessionStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, Level};

/// Sajilo - citizen services assistant for Sikkim
#[derive(Parser, Debug)]
#[command(name = "sajilo")]
#[command(version, about = "Multilingual citizen-services chatbot", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve citizens over Telegram
    Run,

    /// Talk to the bot from this terminal
    Chat,

    /// Load and validate the configuration, forms and directory
    CheckConfig,

    /// Form definition tools
    Forms {
        #[command(subcommand)]
        action: FormsAction,
    },

    /// Inspect or update stored submissions
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },
}

#[derive(Subcommand, Debug)]
enum FormsAction {
    /// Validate form files (built-ins plus overrides)
    Validate {
        /// Directory of form files; defaults to forms.dir from the config
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum RecordsAction {
    /// Newest first
    List {
        #[arg(long)]
        form: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print one record as JSON
    Show { reference: String },
    /// Change a record's status label
    SetStatus { reference: String, status: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = Level::from_str(&cli.log_level)
        .with_context(|| format!("Invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => {
            require_valid(&config, true)?;
            let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
                config.telegram.bot_token.clone(),
                config.telegram.allowed_users.clone(),
            ));
            if !channel.health_check().await {
                tracing::warn!("Telegram getMe failed; continuing, polling will retry");
            }
            serve(&config, channel).await
        }
        Commands::Chat => {
            require_valid(&config, false)?;
            serve(&config, Arc::new(CliChannel::new())).await
        }
        Commands::CheckConfig => check_config(&config),
        Commands::Forms {
            action: FormsAction::Validate { dir },
        } => validate_forms(dir.or_else(|| config.forms.dir()).as_deref()),
        Commands::Records { action } => records_command(&config, action),
    }
}

fn require_valid(config: &Config, telegram: bool) -> Result<()> {
    if let Err(problems) = config.validate(telegram) {
        bail!("Invalid configuration:\n  {}", problems.join("\n  "));
    }
    Ok(())
}

fn load_directory(config: &Config) -> Result<Arc<dyn Directory>> {
    let directory = match config.directory.path() {
        Some(path) => StaticDirectory::load(&path)?,
        None => StaticDirectory::builtin()?,
    };
    Ok(Arc::new(directory))
}

/// Lookup forms whose table the directory does not provide.
fn missing_tables(forms: &FormRegistry, directory: &dyn Directory) -> Vec<String> {
    forms
        .kinds()
        .into_iter()
        .filter_map(|kind| forms.get(kind))
        .filter(|def| def.finalize == FinalizeAction::Lookup)
        .filter_map(|def| {
            let table = def.directory.clone().unwrap_or_default();
            (!directory.has_table(&table)).then(|| format!("form '{}' looks up missing table '{table}'", def.kind))
        })
        .collect()
}

fn build_controller(config: &Config, records: Arc<RecordStore>) -> Result<ConversationController> {
    let forms = Arc::new(FormRegistry::with_overrides(config.forms.dir().as_deref())?);
    let directory = load_directory(config)?;
    let missing = missing_tables(&forms, directory.as_ref());
    if !missing.is_empty() {
        bail!("Directory does not match forms:\n  {}", missing.join("\n  "));
    }

    let settings = EngineSettings {
        validation: ValidationPolicy {
            numeric_overflow: config.validation.numeric_overflow,
        },
        language_policy: config.session.language_policy,
    };
    let engine = WorkflowEngine::new(forms, Arc::new(PhraseBook::default()), settings);

    let classifier: Arc<dyn Classifier> = match config.classifier.backend {
        ClassifierBackend::Ollama => Arc::new(OllamaClassifier::new(
            config.classifier.endpoint.clone(),
            config.classifier.model.clone(),
        )),
        ClassifierBackend::Keywords => Arc::new(KeywordClassifier),
    };
    let classifier = ClassificationGateway::new(classifier, config.classifier.timeout());
    info!(backend = classifier.backend(), "classifier ready");

    let mut controller = ConversationController::new(
        Arc::new(SessionStore::new()),
        engine,
        classifier,
        records,
        directory,
    )
    .with_idle_timeout(config.session.idle_timeout());

    if let Some(base_url) = config.submission.base_url.as_deref().filter(|_| config.submission.enabled()) {
        let client = NcExgratiaClient::new(base_url, &config.submission.username, &config.submission.password);
        controller = controller.with_submission(SubmissionGateway::new(Arc::new(client), config.submission.timeout()));
        info!(%base_url, "remote ex-gratia submission enabled");
    } else {
        info!("no remote submission service; applications are stored locally");
    }
    Ok(controller)
}

async fn serve(config: &Config, channel: Arc<dyn Channel>) -> Result<()> {
    let records = Arc::new(RecordStore::open(&config.storage.db_path())?);
    let controller = Arc::new(build_controller(config, records.clone())?);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let api_task = if config.api.enabled {
        let addr = config
            .api
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid api.bind '{}'", config.api.bind))?;
        let state = ApiState { records };
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = api::serve(addr, state, shutdown).await {
                tracing::error!("record API stopped: {e:#}");
            }
        }))
    } else {
        None
    };

    let result = dispatch::run(channel, controller, config.session.sweep_interval()).await;

    let _ = shutdown_tx.send(true);
    if let Some(task) = api_task {
        let _ = task.await;
    }
    result
}

fn check_config(config: &Config) -> Result<()> {
    let mut problems = config.validate(!config.telegram.bot_token.is_empty()).err().unwrap_or_default();

    match FormRegistry::with_overrides(config.forms.dir().as_deref()) {
        Ok(forms) => match load_directory(config) {
            Ok(directory) => problems.extend(missing_tables(&forms, directory.as_ref())),
            Err(e) => problems.push(format!("{e:#}")),
        },
        Err(e) => problems.push(e.to_string()),
    }

    if problems.is_empty() {
        println!("{} configuration is valid", style("✓").green());
        println!("  records:    {}", config.storage.db_path().display());
        println!("  classifier: {:?}", config.classifier.backend);
        println!(
            "  submission: {}",
            if config.submission.enabled() { "remote" } else { "local only" }
        );
        Ok(())
    } else {
        for problem in &problems {
            println!("{} {problem}", style("✗").red());
        }
        bail!("{} configuration problem(s)", problems.len())
    }
}

fn validate_forms(dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = dir {
        let loaded = load_forms(dir)?;
        let mut kinds: Vec<_> = loaded.keys().copied().collect();
        kinds.sort();
        for kind in kinds {
            println!("{} {} overrides the built-in", style("✓").green(), kind);
        }
    }
    let registry = FormRegistry::with_overrides(dir)?;
    for kind in registry.kinds() {
        if let Some(def) = registry.get(kind) {
            println!(
                "{} {:<24} {} fields, finalize {:?}",
                style("✓").green(),
                kind.as_str(),
                def.fields.len(),
                def.finalize
            );
        }
    }
    Ok(())
}

fn records_command(config: &Config, action: RecordsAction) -> Result<()> {
    let store = RecordStore::open(&config.storage.db_path())?;
    match action {
        RecordsAction::List { form, limit, offset } => {
            let kind = match form.as_deref() {
                Some(raw) => Some(FormKind::parse(raw).with_context(|| format!("Unknown form '{raw}'"))?),
                None => None,
            };
            let (records, total) = store.list(kind, limit, offset)?;
            for record in &records {
                println!(
                    "{:<22} {:<22} {:<10} {}",
                    style(&record.reference).bold(),
                    record.form_kind,
                    record.status,
                    style(&record.submission_timestamp).dim()
                );
            }
            println!("{} of {total} record(s)", records.len());
        }
        RecordsAction::Show { reference } => match store.get(&reference)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => bail!("No record with reference '{reference}'"),
        },
        RecordsAction::SetStatus { reference, status } => {
            let status = status.trim();
            if status.is_empty() {
                bail!("Status must not be empty");
            }
            if !store.update_status(&reference, status, Utc::now())? {
                bail!("No record with reference '{reference}'");
            }
            println!("{} {reference} → {status}", style("✓").green());
        }
    }
    Ok(())
}
