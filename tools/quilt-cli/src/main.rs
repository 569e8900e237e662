//! Quilt Command Line Interface
//!
//! Explains how Quilt would plan a query against a schema config: the plan
//! tree, the client-side merge pipeline, and the per-backend SQL.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use quilt_query::ast::Statement;
use quilt_query::parser::parse_statement;
use quilt_query::{InsertPlan, SelectPlan};
use quilt_router::{Router, SchemaConfig};

/// Quilt Command Line Interface
///
/// A sharded-SQL proxy planner: shows the backend queries and the
/// client-side pipeline a statement would run with.
#[derive(Parser, Debug)]
#[command(name = "quilt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the schema config (JSON)
    #[arg(short, long, env = "QUILT_SCHEMA")]
    config: PathBuf,

    /// Default database for unqualified table names
    #[arg(short, long, default_value = "sbtest")]
    database: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Output format for plan descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    /// Pretty-printed JSON
    Pretty,
    /// Compact single-line JSON
    Compact,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the full plan for a statement
    Explain {
        /// The SQL statement to plan
        sql: String,
    },
    /// Show only the per-backend queries
    Queries {
        /// The SQL statement to plan
        sql: String,
    },
    /// Echo the parsed schema config
    Schema,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let text = fs::read_to_string(&cli.config)
        .with_context(|| format!("reading schema config {}", cli.config.display()))?;
    let schema = SchemaConfig::from_json(&text).context("parsing schema config")?;
    let router = Router::from_config(schema.clone());

    let value = match &cli.command {
        Commands::Explain { sql } => explain(&router, &cli.database, sql)?,
        Commands::Queries { sql } => {
            let tuples = plan_queries(&router, &cli.database, sql)?;
            serde_json::to_value(tuples)?
        }
        Commands::Schema => serde_json::to_value(&schema)?,
    };

    let rendered = match cli.format {
        OutputFormat::Pretty => serde_json::to_string_pretty(&value)?,
        OutputFormat::Compact => value.to_string(),
    };
    println!("{rendered}");
    Ok(())
}

fn explain(router: &Router, database: &str, sql: &str) -> Result<serde_json::Value> {
    match parse_statement(sql)? {
        Statement::Select(select) => {
            let plan = SelectPlan::build_from_select(router, database, *select, sql.to_string())?;
            Ok(plan.explain())
        }
        Statement::Insert(insert) => {
            let plan = InsertPlan::build_from_insert(router, database, *insert)?;
            Ok(serde_json::json!({
                "rawquery": sql,
                "querys": plan.query_tuples(),
            }))
        }
    }
}

fn plan_queries(
    router: &Router,
    database: &str,
    sql: &str,
) -> Result<Vec<quilt_query::QueryTuple>> {
    match parse_statement(sql)? {
        Statement::Select(select) => {
            let plan = SelectPlan::build_from_select(router, database, *select, sql.to_string())?;
            Ok(plan.query_tuples())
        }
        Statement::Insert(insert) => {
            let plan = InsertPlan::build_from_insert(router, database, *insert)?;
            Ok(plan.query_tuples().to_vec())
        }
    }
}
