//! Unit tests for CLI parsing

use crate::cli::{Cli, Commands, IndustryArg};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn test_generate_command_parses() {
    let cli = Cli::try_parse_from([
        "forgekit",
        "generate",
        "--spec",
        "acme.yaml",
        "--out",
        "out",
        "--templates",
        "tpl",
    ])
    .unwrap();

    match cli.command {
        Commands::Generate {
            spec,
            out,
            templates,
            data_dir,
        } => {
            assert_eq!(spec, PathBuf::from("acme.yaml"));
            assert_eq!(out, Some(PathBuf::from("out")));
            assert_eq!(templates, Some(PathBuf::from("tpl")));
            assert!(data_dir.is_none());
        }
        _ => panic!("Expected Generate command"),
    }
}

#[test]
fn test_deploy_collects_env_pairs() {
    let cli = Cli::try_parse_from([
        "forgekit",
        "deploy",
        "--project",
        "acme",
        "--env",
        "API_KEY=abc=def",
        "-e",
        "MODE=demo",
    ])
    .unwrap();

    match cli.command {
        Commands::Deploy { project, env, .. } => {
            assert_eq!(project, "acme");
            assert_eq!(
                env,
                vec![
                    ("API_KEY".to_string(), "abc=def".to_string()),
                    ("MODE".to_string(), "demo".to_string()),
                ]
            );
        }
        _ => panic!("Expected Deploy command"),
    }
}

#[test]
fn test_env_without_key_rejected() {
    assert!(Cli::try_parse_from(["forgekit", "deploy", "--project", "acme", "--env", "=x"]).is_err());
    assert!(Cli::try_parse_from(["forgekit", "deploy", "--project", "acme", "--env", "novalue"]).is_err());
}

#[test]
fn test_catalog_industry_values() {
    let cli = Cli::try_parse_from(["forgekit", "catalog", "--industry", "supply-chain"]).unwrap();
    match cli.command {
        Commands::Catalog { industry } => assert_eq!(industry, Some(IndustryArg::SupplyChain)),
        _ => panic!("Expected Catalog command"),
    }
    assert!(Cli::try_parse_from(["forgekit", "catalog", "--industry", "retail"]).is_err());
}

#[test]
fn test_global_config_flag() {
    let cli = Cli::try_parse_from(["forgekit", "templates", "--config", "forge.yaml"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("forge.yaml")));
    assert!(matches!(cli.command, Commands::Templates { templates: None }));
}
