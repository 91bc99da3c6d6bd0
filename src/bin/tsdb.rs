//! Test suite database command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Query a profile
//! tsdb select 'i-id i-input where i-input ~ "rain"' profiles/mrs
//!
//! # Print the schema of a profile
//! tsdb schema profiles/mrs
//!
//! # Initialize an empty profile from a relations file
//! tsdb init profiles/new --schema relations
//! ```
//!
//! Exit status: 0 on success, 2 for a schema error, 3 for a query error,
//! 4 when the database directory does not exist, 1 for anything else.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tsdb_core::codec;
use tsdb_core::{parse_schema, select, Database, DatabaseConfig, Result, TsdbError};

const EXIT_MISSING_DATABASE: u8 = 4;

/// Test suite database command-line interface
#[derive(Parser, Debug)]
#[command(name = "tsdb", version, about = "Query and initialize test suite databases")]
struct Args {
    /// Database configuration file (JSON)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging on standard error
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Evaluate a query and print one line per row
    Select {
        /// Query, e.g. `i-id i-input where i-wf = 1`
        query: String,
        /// Database directory
        database: PathBuf,
        /// Print fields in their escaped on-disk form
        #[arg(long)]
        raw: bool,
    },
    /// Print the schema of a database
    Schema {
        /// Database directory
        database: PathBuf,
    },
    /// Create an empty database from a schema file
    Init {
        /// Database directory to create
        database: PathBuf,
        /// Schema description file
        #[arg(long, value_name = "FILE")]
        schema: PathBuf,
    },
}

enum Failure {
    MissingDatabase(PathBuf),
    Error(TsdbError),
}

impl From<TsdbError> for Failure {
    fn from(e: TsdbError) -> Self {
        Failure::Error(e)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::MissingDatabase(path)) => {
            eprintln!("tsdb: database directory not found: {}", path.display());
            ExitCode::from(EXIT_MISSING_DATABASE)
        }
        Err(Failure::Error(e)) => {
            eprintln!("tsdb: {}: {}", e.name(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tsdb_core=debug,tsdb=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(args: &Args) -> std::result::Result<(), Failure> {
    let config = match &args.config {
        Some(path) => DatabaseConfig::from_json_file(path)?,
        None => DatabaseConfig::default(),
    };

    match &args.action {
        Action::Select {
            query,
            database,
            raw,
        } => {
            let mut db = open(database, config)?;
            print_rows(query, &mut db, *raw)?;
        }
        Action::Schema { database } => {
            let db = open(database, config)?;
            print!("{}", db.schema());
        }
        Action::Init { database, schema } => {
            let text = fs::read_to_string(schema).map_err(|e| TsdbError::io(schema, e))?;
            let schema = parse_schema(&text)?;
            let db = Database::create_with_config(database, &schema, config)?;
            info!(path = %db.root().display(), "initialized database");
        }
    }
    Ok(())
}

fn open(path: &Path, config: DatabaseConfig) -> std::result::Result<Database, Failure> {
    if !path.is_dir() {
        return Err(Failure::MissingDatabase(path.to_path_buf()));
    }
    Ok(Database::open_with_config(path, config)?)
}

fn print_rows(query: &str, db: &mut Database, raw: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut count = 0usize;

    for row in select(query, db)? {
        let fields: Vec<String> = row?
            .iter()
            .map(|value| {
                let text = value.to_string();
                if raw {
                    codec::escape(&text)
                } else {
                    text
                }
            })
            .collect();
        writeln!(out, "{}", codec::join(&fields)).map_err(|e| TsdbError::io("<stdout>", e))?;
        count += 1;
    }

    out.flush().map_err(|e| TsdbError::io("<stdout>", e))?;
    info!(rows = count, "query complete");
    Ok(())
}
