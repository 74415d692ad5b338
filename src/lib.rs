//! # forgekit
//!
//! **forgekit** turns a business-application specification into a running
//! application: it normalizes the specification, renders a complete Node.js
//! source bundle from templates, stores every bundle as an immutable version,
//! and deploys the newest complete version as an isolated container or a
//! native process.
//!
//! ## Architecture
//!
//! - **[`spec`]** - Project specification types, loading, the module catalog and normalization
//! - **[`templates`]** - minijinja template engine with built-in templates, overrides and fallbacks
//! - **[`advisor`]** - Optional remote enrichment of entities, endpoints and workflow logic
//! - **[`generator`]** - The phased generation pipeline producing a [`generator::GeneratedBundle`]
//! - **[`store`]** - Bundle and deployment persistence
//! - **[`deploy`]** - Port pool, execution backends and the deployment orchestrator
//! - **[`events`]** - Named progress events relayed to callers
//! - **[`config`]** / **[`logging`]** - Engine configuration and tracing setup
//! - **[`cli`]** - The `forgekit` command line
//!
//! ### Generate and Deploy Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant User
//!     participant CLI as CLI<br/>(forgekit)
//!     participant Norm as spec::normalize
//!     participant Gen as generator::Generator
//!     participant Tpl as templates::TemplateEngine
//!     participant Adv as advisor::AdvisorClient
//!     participant Store as store::BundleStore
//!     participant Orch as deploy::Orchestrator
//!     participant Backend as deploy::ExecutionBackend
//!
//!     User->>CLI: forgekit generate --spec acme.yaml
//!     CLI->>Norm: normalize(project, catalog)
//!     Norm-->>CLI: ProjectSpec
//!     CLI->>Gen: generate(&project, &events)
//!     Gen->>Store: begin(project) → version N
//!     loop scaffold, models, api, frontend, deployment-manifest
//!         Gen->>Adv: suggestions (optional, bounded by timeout)
//!         Gen->>Tpl: render(name, ctx)
//!         Tpl-->>Gen: source (or fallback output)
//!         Gen->>Store: update(bundle)
//!     end
//!     Gen-->>CLI: GeneratedBundle (complete, digest)
//!
//!     User->>CLI: forgekit deploy --project acme
//!     CLI->>Orch: deploy(project, env, &events)
//!     Orch->>Store: latest_complete(project)
//!     Orch->>Orch: PortPool::acquire
//!     Orch->>Backend: build_and_run(req, &build_log)
//!     Backend-->>Orch: RunningInstance
//!     Orch-->>CLI: DeploymentRecord (running)
//!     CLI->>Orch: logs(project) until Ctrl-C, then destroy
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forgekit::advisor::AdvisorClient;
//! use forgekit::events;
//! use forgekit::generator::{Generator, GeneratorOptions};
//! use forgekit::spec::{load_project, normalize, ModuleCatalog};
//! use forgekit::store::InMemoryBundleStore;
//! use forgekit::templates::TemplateEngine;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let project = normalize(load_project("acme.yaml")?, ModuleCatalog::builtin())?;
//! let generator = Generator::new(
//!     Arc::new(TemplateEngine::builtin()),
//!     Arc::new(AdvisorClient::disabled()),
//!     Arc::new(InMemoryBundleStore::new()),
//!     GeneratorOptions::default(),
//! );
//! let (tx, _rx) = events::channel();
//! let bundle = generator.generate(&project, &tx).await?;
//! println!("v{} with {} files", bundle.version, bundle.files.len());
//! # Ok(())
//! # }
//! ```

pub mod advisor;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod events;
pub mod generator;
pub mod ids;
pub mod logging;
pub mod spec;
pub mod store;
pub mod templates;

pub use config::EngineConfig;
pub use ids::{BundleId, DeploymentId, ProjectId};
