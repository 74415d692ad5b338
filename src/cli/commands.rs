use crate::advisor::AdvisorClient;
use crate::config::EngineConfig;
use crate::deploy::{select_backend, write_workspace, Orchestrator, PortPool};
use crate::events::{self, Event, EventKind, EventReceiver};
use crate::generator::{Generator, GeneratorOptions};
use crate::ids::ProjectId;
use crate::spec::{load_project, normalize, Industry, ModuleCatalog};
use crate::store::{BundleStore, FsBundleStore, InMemoryDeploymentStore};
use crate::templates::TemplateEngine;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Command-line interface for forgekit
///
/// Generates application bundles from project specifications and runs them
/// on the local machine.
#[derive(Parser)]
#[command(name = "forgekit")]
#[command(about = "Generate and deploy business applications from project specifications", long_about = None)]
pub struct Cli {
    /// Engine configuration file (YAML). `FORGE_*` variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available forgekit commands
#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new bundle version from a project specification
    Generate {
        /// Project specification (YAML or JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Where bundles are stored (overrides the configured data dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Also write the generated files under `<out>/<project>`
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Directory of `*.jinja` files overriding built-in templates
        #[arg(long)]
        templates: Option<PathBuf>,
    },
    /// List stored bundle versions of a project
    Bundles {
        #[arg(short, long)]
        project: String,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Deploy the newest complete bundle and follow its logs until Ctrl-C
    Deploy {
        #[arg(short, long)]
        project: String,

        /// Environment override, repeatable
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Show the built-in module catalog
    Catalog {
        #[arg(long, value_enum)]
        industry: Option<IndustryArg>,
    },
    /// List available template names
    Templates {
        /// Directory of `*.jinja` overrides to include
        #[arg(long)]
        templates: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndustryArg {
    Erp,
    Logistics,
    SupplyChain,
    Custom,
}

impl From<IndustryArg> for Industry {
    fn from(arg: IndustryArg) -> Self {
        match arg {
            IndustryArg::Erp => Industry::Erp,
            IndustryArg::Logistics => Industry::Logistics,
            IndustryArg::SupplyChain => Industry::SupplyChain,
            IndustryArg::Custom => Industry::Custom,
        }
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn bundle_store(config: &EngineConfig, data_dir: Option<PathBuf>) -> Arc<FsBundleStore> {
    let root = data_dir.unwrap_or_else(|| config.data_dir.clone());
    Arc::new(FsBundleStore::new(root.join("bundles")))
}

fn template_engine(dir: Option<&PathBuf>) -> anyhow::Result<TemplateEngine> {
    let engine = TemplateEngine::builtin();
    Ok(match dir {
        Some(dir) => engine
            .with_overrides(dir)
            .with_context(|| format!("loading templates from {}", dir.display()))?,
        None => engine,
    })
}

fn print_event(event: &Event) {
    let field = |key: &str| {
        event
            .data
            .get(key)
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .unwrap_or_default()
    };
    match event.kind {
        EventKind::Phase => eprintln!("==> {}", field("message")),
        EventKind::File => eprintln!("    {}", field("path")),
        EventKind::BuildLog => eprintln!("  | {}", field("line")),
        EventKind::Status => eprintln!("status: {}", field("status")),
        EventKind::Error => eprintln!("error: {}", field("message")),
        EventKind::Log => println!("{}", field("line")),
        EventKind::Progress | EventKind::Complete => {}
    }
}

async fn finish(printer: JoinHandle<()>) {
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer failed");
    }
}

fn spawn_printer(mut rx: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    })
}

/// Execute a parsed command line.
///
/// # Errors
///
/// Returns an error if configuration, loading, generation or deployment
/// fails. `deploy` destroys its deployment before returning.
pub async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Generate {
            spec,
            data_dir,
            out,
            templates,
        } => {
            let project = load_project(&spec)?;
            let project = normalize(project, ModuleCatalog::builtin())?;
            let engine = template_engine(templates.as_ref().or(config.template_dir.as_ref()))?;
            let advisor = AdvisorClient::from_config(&config.advisor)?;
            let store = bundle_store(&config, data_dir);
            let generator = Generator::new(
                Arc::new(engine),
                Arc::new(advisor),
                store,
                GeneratorOptions::from_config(&config),
            );

            let (tx, rx) = events::channel();
            let printer = spawn_printer(rx);
            let result = generator.generate(&project, &tx).await;
            drop(tx);
            finish(printer).await;
            let bundle = result?;

            println!(
                "{} v{}: {} files, digest {}",
                bundle.project_id,
                bundle.version,
                bundle.files.len(),
                bundle.digest.as_deref().unwrap_or("-")
            );
            if let Some(out) = out {
                let dir = write_workspace(&out, &bundle.project_id, &bundle).await?;
                println!("written to {}", dir.display());
            }
            Ok(())
        }
        Commands::Bundles { project, data_dir } => {
            let project = ProjectId::new(project)?;
            let store = bundle_store(&config, data_dir);
            let bundles = store.list(&project).await?;
            if bundles.is_empty() {
                println!("no bundles for {project}");
            }
            for summary in bundles {
                println!(
                    "v{:<4} {:<10} {:>4} files  {}  {}",
                    summary.version,
                    summary.status.as_str(),
                    summary.files,
                    summary.created_at.format("%Y-%m-%d %H:%M:%S"),
                    summary.digest.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Deploy {
            project,
            env,
            data_dir,
        } => {
            let project = ProjectId::new(project)?;
            let backend = select_backend(&config).await?;
            let orchestrator = Orchestrator::new(
                backend,
                bundle_store(&config, data_dir),
                Arc::new(InMemoryDeploymentStore::new()),
                Arc::new(PortPool::new(config.port_range_start, config.port_range_end)),
                config.database_url.clone(),
            );

            let (tx, rx) = events::channel();
            let printer = spawn_printer(rx);
            let env: BTreeMap<String, String> = env.into_iter().collect();
            let deployed = orchestrator.deploy(&project, env, &tx).await;
            drop(tx);
            finish(printer).await;
            let record = deployed?;
            println!(
                "{project} v{} running on {} ({})",
                record.bundle_version,
                record.url.as_deref().unwrap_or("-"),
                record.backend
            );

            let followed = follow_until_interrupted(&orchestrator, &project).await;
            let destroyed = orchestrator.destroy(&project).await;
            followed?;
            destroyed?;
            println!("{project} destroyed");
            Ok(())
        }
        Commands::Catalog { industry } => {
            let catalog = ModuleCatalog::builtin();
            let modules = match industry {
                Some(industry) => catalog.modules_for_industry(industry.into()),
                None => catalog.modules().iter().collect(),
            };
            if modules.is_empty() {
                bail!("no catalog modules match");
            }
            for module in modules {
                let entities: Vec<&str> = module.entities.iter().map(|e| e.name.as_str()).collect();
                println!(
                    "{:<14} {:<28} [{}] {}",
                    module.id,
                    module.name,
                    module.category.as_str(),
                    entities.join(", ")
                );
            }
            Ok(())
        }
        Commands::Templates { templates } => {
            let engine = template_engine(templates.as_ref().or(config.template_dir.as_ref()))?;
            for name in engine.names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn follow_until_interrupted(orchestrator: &Orchestrator, project: &ProjectId) -> anyhow::Result<()> {
    let (tx, rx) = events::channel();
    let printer = spawn_printer(rx);
    let outcome = tokio::select! {
        followed = orchestrator.follow_logs(project, &tx) => followed.map_err(anyhow::Error::from),
        interrupted = tokio::signal::ctrl_c() => {
            eprintln!("interrupted, tearing down");
            interrupted.context("waiting for Ctrl-C")
        }
    };
    drop(tx);
    finish(printer).await;
    outcome
}
