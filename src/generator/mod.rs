//! # Generation Pipeline
//!
//! Turns a normalized [`ProjectSpec`](crate::spec::ProjectSpec) into a
//! versioned, immutable [`GeneratedBundle`]: the complete source tree of an
//! Express/Node server plus an optional React client.
//!
//! ## Phases
//!
//! ```text
//! scaffold (15%) → models (35%) → api (55%) → frontend (80%) → deployment-manifest (95%) → 100%
//! ```
//!
//! `frontend` runs only when `settings.frontend` is set and
//! `deployment-manifest` only when `settings.docker` is set.
//!
//! ## Generated Structure
//!
//! ```text
//! package.json  .env.example  README.md  .gitignore
//! src/
//! ├── index.js                      # express-api/server
//! ├── seed.js                       # database/seed-runner
//! ├── config/database.js
//! ├── middleware/auth.js            # authentication only
//! ├── models/{Entity}.js            # mongoose or sequelize
//! ├── seeds/{Entity}.json
//! ├── routes/{module}.js            # mounts entity routers + workflows
//! ├── routes/{entity}Routes.js
//! ├── controllers/{entity}Controller.js
//! └── workflows/{module}Workflows.js
//! client/                           # frontend only
//! Dockerfile  docker-compose.yml  .dockerignore   # docker only
//! ```
//!
//! ## Failure Handling
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Template missing or broken | Fallback generator output, `fallback` log entry |
//! | Advisor error, timeout, bad shape | Deterministic default, `advisor-fallback` log entry |
//! | Bundle store write | Run aborts, bundle marked `error`, `error` event |

mod bundle;
mod pipeline;

pub use bundle::{
    language_for, BundleStatus, BundleStructure, FileOrigin, GeneratedBundle, GeneratedFile,
    GenerationLogEntry, LogStatus, Phase,
};
pub use pipeline::{merge_operations, seed_record, GenerationError, Generator, GeneratorOptions};
