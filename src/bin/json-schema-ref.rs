//! JSON Schema $ref CLI
//!
//! Command-line interface for bundling, dereferencing and resolving schemas.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use json_schema_ref::{
    Circular, ExternalResolution, Options, Partial, PathType, RefError, RefParser,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "json-schema-ref")]
#[command(about = "Resolve, dereference and bundle JSON Schema $ref pointers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge every referenced file into one schema with internal $refs only
    Bundle {
        #[command(flatten)]
        common: CommonArgs,

        /// Keep internal $refs as written instead of pointing them at their final target
        #[arg(long)]
        no_optimize_internal_refs: bool,
    },

    /// Replace every $ref with the value it points at
    Dereference {
        #[command(flatten)]
        common: CommonArgs,

        /// Circular $ref handling: true (allow), false (fail) or ignore
        #[arg(long, default_value = "true")]
        circular: Circular,

        /// Maximum nesting depth
        #[arg(long, default_value_t = json_schema_ref::DEFAULT_MAX_DEPTH)]
        max_depth: usize,

        /// Copy every referenced value instead of sharing it
        #[arg(long)]
        clone_references: bool,

        /// Resolve relative external $refs against the root schema
        #[arg(long)]
        resolve_from_root: bool,

        /// Only merge these $ref sibling keys onto the target (default: all)
        #[arg(long = "preserve", value_name = "NAME")]
        preserved: Vec<String>,
    },

    /// List every file and URL the schema references
    Resolve {
        #[command(flatten)]
        common: CommonArgs,

        /// Only list locations of this type
        #[arg(long = "type", value_parser = ["file", "http", "other"])]
        types: Vec<String>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Schema source: file path or URL (http:// or https://)
    schema: String,

    /// Output file (stdout if not specified)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Write YAML instead of JSON
    #[arg(long, conflicts_with = "pretty")]
    yaml: bool,

    /// Keep going after a missing file or pointer and report every error at the end
    #[arg(long)]
    continue_on_error: bool,

    /// Do not fetch external files or URLs
    #[arg(long)]
    no_external: bool,

    /// Give up after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log resolution progress to stderr
    #[arg(long, short)]
    verbose: bool,
}

impl CommonArgs {
    fn options(&self) -> Options {
        let mut options = Options::new()
            .continue_on_error(self.continue_on_error)
            .external(!self.no_external);
        if let Some(timeout_ms) = self.timeout_ms {
            options = options.timeout_ms(timeout_ms);
        }
        options
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Bundle {
            common,
            no_optimize_internal_refs,
        } => {
            init_logging(common.verbose);
            let options = common
                .options()
                .optimize_internal_refs(!no_optimize_internal_refs);
            run_bundle(&common, options).await
        }

        Commands::Dereference {
            common,
            circular,
            max_depth,
            clone_references,
            resolve_from_root,
            preserved,
        } => {
            init_logging(common.verbose);
            let resolution = if resolve_from_root {
                ExternalResolution::Root
            } else {
                ExternalResolution::Relative
            };
            let options = common
                .options()
                .circular(circular)
                .max_depth(max_depth)
                .clone_references(clone_references)
                .external_reference_resolution(resolution)
                .preserved_properties(preserved);
            run_dereference(&common, options).await
        }

        Commands::Resolve { common, types } => {
            init_logging(common.verbose);
            run_resolve(&common, &types).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("json_schema_ref=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_bundle(common: &CommonArgs, options: Options) -> Result<(), u8> {
    match RefParser::new(options).bundle(common.schema.as_str()).await {
        Ok(bundled) => write_output(common, &bundled),
        Err(e) => {
            let code = report_error(&e);
            if let Some(Partial::Value(partial)) = e.partial() {
                write_output(common, partial)?;
            }
            Err(code)
        }
    }
}

async fn run_dereference(common: &CommonArgs, options: Options) -> Result<(), u8> {
    match RefParser::new(options).dereference(common.schema.as_str()).await {
        Ok(dereferenced) => {
            if dereferenced.is_circular() {
                tracing::info!("schema contains circular references");
            }
            write_output(common, &dereferenced.to_value())
        }
        Err(e) => {
            let code = report_error(&e);
            if let Some(Partial::Dereferenced(partial)) = e.partial() {
                write_output(common, &partial.to_value())?;
            }
            Err(code)
        }
    }
}

async fn run_resolve(common: &CommonArgs, types: &[String]) -> Result<(), u8> {
    let types: Vec<PathType> = types
        .iter()
        .map(|t| match t.as_str() {
            "file" => PathType::File,
            "http" => PathType::Http,
            _ => PathType::Other,
        })
        .collect();

    let (paths, code) = match RefParser::new(common.options())
        .resolve(common.schema.as_str())
        .await
    {
        Ok(registry) => (registry.paths(&types), None),
        Err(e) => {
            let code = report_error(&e);
            match e.partial() {
                Some(Partial::Registry(registry)) => (registry.paths(&types), Some(code)),
                _ => return Err(code),
            }
        }
    };

    let listing: String = paths.iter().map(|path| format!("{}\n", path)).collect();
    write_text(common, &listing)?;
    match code {
        Some(code) => Err(code),
        None => Ok(()),
    }
}

/// Print an error (and any collected errors) to stderr, returning its exit code.
fn report_error(e: &RefError) -> u8 {
    eprintln!("Error: {}", e);
    for collected in e.errors() {
        eprintln!("  {}", collected);
    }
    e.exit_code() as u8
}

fn write_output(common: &CommonArgs, value: &Value) -> Result<(), u8> {
    let text = if common.yaml {
        serde_yaml::to_string(value).map_err(|e| e.to_string())
    } else if common.pretty {
        serde_json::to_string_pretty(value)
            .map(|json| json + "\n")
            .map_err(|e| e.to_string())
    } else {
        serde_json::to_string(value)
            .map(|json| json + "\n")
            .map_err(|e| e.to_string())
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    write_text(common, &text)
}

fn write_text(common: &CommonArgs, text: &str) -> Result<(), u8> {
    match &common.output {
        Some(path) => {
            std::fs::write(path, text).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            print!("{}", text);
        }
    }
    Ok(())
}
