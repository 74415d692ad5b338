//! # CLI Module
//!
//! Command-line front end for the `forgekit` binary.
//!
//! ## Commands
//!
//! ### `generate`
//!
//! Normalize a project specification and generate a new bundle version:
//!
//! ```bash
//! forgekit generate --spec acme.yaml --out ./out
//! ```
//!
//! Options:
//! - `--spec <FILE>` - Project specification, YAML or JSON (required)
//! - `--data-dir <DIR>` - Bundle store location
//! - `--out <DIR>` - Also write the files under `<DIR>/<project>`
//! - `--templates <DIR>` - `*.jinja` overrides for built-in templates
//!
//! ### `bundles`
//!
//! ```bash
//! forgekit bundles --project acme-erp
//! ```
//!
//! ### `deploy`
//!
//! Deploy the newest complete bundle, stream its output, and destroy the
//! deployment on Ctrl-C:
//!
//! ```bash
//! forgekit deploy --project acme-erp --env API_KEY=secret
//! ```
//!
//! ### `catalog` / `templates`
//!
//! ```bash
//! forgekit catalog --industry erp
//! forgekit templates --templates ./my-templates
//! ```
//!
//! ## Usage from Code
//!
//! ```rust,ignore
//! use forgekit::cli::{run_cli, Cli};
//! use clap::Parser;
//!
//! run_cli(Cli::parse()).await?;
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{run_cli, Cli, Commands, IndustryArg};
