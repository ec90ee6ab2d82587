mod access;
mod classfile;
mod config;
mod descriptor;
mod error;
mod external;
mod index;
mod ir;
mod mcp;
mod opcodes;
mod render;
mod response;
mod scan;
mod session;
mod smali;
mod telemetry;
#[cfg(test)]
mod test_harness;
mod tools;
mod xref;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::classfile::ClassfileDecompiler;
use crate::config::Config;
use crate::descriptor::decode_method_signature;
use crate::external::ExternalCommand;
use crate::index::CodeIndex;
use crate::response::Envelope;
use crate::session::SessionHolder;
use crate::telemetry::{Telemetry, init_logging};
use crate::tools::{TOOLS, find_tool};

/// CLI arguments for classquery.
#[derive(Parser, Debug)]
#[command(
    name = "classquery",
    about = "Query decompiled JVM archives over MCP or from the command line.",
    version
)]
struct Cli {
    /// TOML config file; defaults to ./classquery.toml when present.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// OTLP HTTP endpoint for trace export.
    #[arg(long, value_name = "URL", global = true)]
    otel: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdio.
    Serve {
        /// Archive to load before accepting requests.
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
        #[arg(long, value_name = "PATH", requires = "input")]
        output: Option<PathBuf>,
    },
    /// Load an archive, run one tool and print its JSON result.
    Query {
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Tool name, see `classquery tools`.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
    },
    /// Decode a method signature such as `run(Ljava/lang/String;)V`.
    Decode { signature: String },
    /// List the available tools.
    Tools,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let config = Config::load(cli.config.as_deref())?;
    let endpoint = cli
        .otel
        .clone()
        .or_else(|| config.telemetry.otlp_endpoint.clone());
    let telemetry = endpoint.map(Telemetry::new).transpose()?.map(Arc::new);

    let result = run(cli.command, &config, telemetry.clone());
    if let Some(telemetry) = &telemetry {
        if let Err(err) = telemetry.shutdown() {
            tracing::warn!(error = %format!("{err:#}"), "telemetry shutdown failed");
        }
    }
    result
}

fn run(command: Command, config: &Config, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match command {
        Command::Decode { signature } => {
            let decoded = decode_method_signature(&signature);
            serde_json::to_writer_pretty(&mut out, &decoded)
                .context("failed to serialize signature")?;
            writeln!(out).context("failed to write output")?;
        }
        Command::Tools => {
            for tool in TOOLS {
                let params: Vec<&str> = tool.params.iter().map(|param| param.name).collect();
                writeln!(out, "{}({})\t{}", tool.name, params.join(", "), tool.description)
                    .context("failed to write output")?;
            }
        }
        Command::Serve { input, output } => {
            let index = build_index(config, telemetry)?;
            let input = input.or_else(|| config.session.input.clone());
            if let Some(input) = input {
                let output = output
                    .or_else(|| config.session.output.clone())
                    .unwrap_or_else(|| default_output_dir(&input));
                let summary = index
                    .init_session(&input, &output)
                    .with_context(|| format!("failed to load {}", input.display()))?;
                tracing::info!(classes = summary.class_count, "session ready");
            }
            mcp::run(&index, io::stdin().lock(), out)?;
        }
        Command::Query {
            input,
            output,
            tool,
            args,
        } => {
            let index = build_index(config, telemetry)?;
            let output = output.unwrap_or_else(|| default_output_dir(&input));
            let envelope = query(&index, &input, &output, &tool, &args)?;
            serde_json::to_writer_pretty(&mut out, &envelope)
                .context("failed to serialize result")?;
            writeln!(out).context("failed to write output")?;
            if !envelope.success {
                anyhow::bail!(
                    "{tool} failed: {}",
                    envelope.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    Ok(())
}

fn build_index(config: &Config, telemetry: Option<Arc<Telemetry>>) -> Result<CodeIndex> {
    let command = config
        .decompiler
        .command
        .as_deref()
        .map(ExternalCommand::from_argv)
        .transpose()
        .context("invalid [decompiler] command")?;
    let decompiler = Arc::new(ClassfileDecompiler::new(command, telemetry.clone()));
    Ok(CodeIndex::new(
        Arc::new(SessionHolder::new()),
        decompiler,
        telemetry,
    ))
}

/// Initialize a session on `input`, then run one tool. A failed init is returned as the envelope.
fn query(
    index: &CodeIndex,
    input: &Path,
    output: &Path,
    tool: &str,
    args: &str,
) -> Result<Envelope> {
    let selected = find_tool(tool).with_context(|| format!("unknown tool: {tool}"))?;
    let args: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if selected.name != "init_session" {
        if let Err(error) = index.init_session(input, output) {
            return Ok(Envelope::from_error(&error));
        }
    }
    Ok(selected.call(index, args))
}

/// `<dir>/<stem>-out` next to the input file.
fn default_output_dir(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "classquery".to_string());
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}-out"))
}
