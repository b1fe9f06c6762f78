//! `dialogc`: the command-line front end for dialog scripts.
//!
//! ```text
//! dialogc check bots/demo/*.bas
//! dialogc schema bots/demo/weather.bas --format function
//! dialogc run greeting.bas --root bots --bot demo --watch
//! ```

mod cli;
mod console;

use anyhow::{Context, Result};
use basic_dialog_parser::lexer::lex;
use basic_dialog_parser::{compile, CompileDiagnostic, CompileError, ErrorReporter};
use basic_dialog_runtime::adapters::FsSourceStore;
use basic_dialog_runtime::external::Collaborators;
use basic_dialog_runtime::watcher::{spawn_watcher, SCRIPT_EXTENSION};
use basic_dialog_runtime::{DialogService, RunOutcome, RuntimeConfig, RuntimeError, SuspendReason, Value};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Command, SchemaFormat};
use console::ConsoleTransport;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&cli.log))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Check {
            files,
            deny_warnings,
        } => check(&files, deny_warnings),
        Command::Schema { file, format } => schema(&file, format),
        Command::Tokens { file, line } => tokens(&file, line),
        Command::Run {
            script,
            root,
            bot,
            session,
            config,
            step_budget,
            watch,
        } => {
            let mut config = match config {
                Some(path) => RuntimeConfig::from_file(&path)?,
                None => RuntimeConfig::default(),
            };
            if let Some(budget) = step_budget {
                config.engine.step_budget = budget;
                config.validate()?;
            }
            run(script, root, bot, session, config, watch).await
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn display_name(path: &Path) -> String {
    path.display().to_string()
}

fn check(files: &[PathBuf], deny_warnings: bool) -> Result<ExitCode> {
    let mut failed = 0usize;
    let mut warned = 0usize;

    for file in files {
        let source = read_source(file)?;
        let name = display_name(file);
        let reporter = ErrorReporter::new(&name, &source);
        match compile(&source, &name) {
            Ok(compilation) => {
                for warning in &compilation.warnings {
                    reporter.report_warning(warning)?;
                }
                warned += usize::from(!compilation.warnings.is_empty());
                let tool = &compilation.signature;
                if tool.is_discoverable() {
                    println!("ok   {} (tool '{}', {} parameter(s))", name, tool.tool_name, tool.parameters.len());
                } else {
                    println!("ok   {}", name);
                }
            }
            Err(error) => {
                reporter.report_compile_error(&error)?;
                println!("FAIL {} ({} error(s))", name, error.diagnostics.len());
                failed += 1;
            }
        }
    }

    if failed > 0 || (deny_warnings && warned > 0) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn schema(file: &Path, format: SchemaFormat) -> Result<ExitCode> {
    let source = read_source(file)?;
    let name = display_name(file);
    match compile(&source, &name) {
        Ok(compilation) => {
            let json = match format {
                SchemaFormat::Mcp => compilation.schemas.mcp.to_json()?,
                SchemaFormat::Function => compilation.schemas.function.to_json()?,
            };
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            ErrorReporter::new(&name, &source).report_compile_error(&error)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn tokens(file: &Path, around: Option<usize>) -> Result<ExitCode> {
    let source = read_source(file)?;
    let (tokens, errors) = lex(&source);

    for token in &tokens {
        let shown = match around {
            Some(target) => token.line + 5 >= target && token.line <= target + 5,
            None => true,
        };
        if shown {
            println!(
                "{:>4}:{:<3} {:<14} {:?}",
                token.line,
                token.column,
                format!("{:?}", token.span),
                token.kind
            );
        }
    }

    if errors.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    let name = display_name(file);
    let error = CompileError {
        script_path: name.clone(),
        diagnostics: errors.into_iter().map(CompileDiagnostic::Lex).collect(),
    };
    ErrorReporter::new(&name, &source).report_compile_error(&error)?;
    Ok(ExitCode::FAILURE)
}

async fn run(
    script: String,
    root: PathBuf,
    bot: String,
    session: String,
    config: RuntimeConfig,
    watch: bool,
) -> Result<ExitCode> {
    let bot_dir = root.join(&bot);
    let service = Arc::new(DialogService::new(
        config,
        Arc::new(FsSourceStore::new(&root)),
        Collaborators::new(Arc::new(ConsoleTransport::new())),
    ));

    // Register every script of the bot so LLM calls can see its tools.
    for path in script_paths(&bot_dir)? {
        match service.compile(&bot, &path).await {
            Ok(compiled) if compiled.is_discoverable() => {
                info!(tool = %compiled.tool_name(), script = %path, "tool registered")
            }
            Ok(_) => debug!(script = %path, "script loaded"),
            Err(error) => warn!(script = %path, %error, "script does not compile"),
        }
    }

    if let Err(error) = service.compile(&bot, &script).await {
        let path = bot_dir.join(&script);
        let source = read_source(&path)?;
        if let basic_dialog_runtime::DialogError::Compile(error) = &error {
            ErrorReporter::new(&display_name(&path), &source).report_compile_error(error)?;
            return Ok(ExitCode::FAILURE);
        }
        return Err(error.into());
    }

    let cancel = CancellationToken::new();
    let watcher = watch.then(|| spawn_watcher(Arc::clone(&service), bot.clone(), "", cancel.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inbound = None;
    let code = loop {
        match service.run_script(&bot, &session, &script, inbound.take()).await {
            RunOutcome::Completed(value) => {
                if value != Value::Null {
                    println!("=> {}", value);
                }
                break ExitCode::SUCCESS;
            }
            RunOutcome::Suspended(suspension) => match suspension.reason {
                SuspendReason::AwaitingInput { .. } => {
                    console::prompt().await?;
                    match lines.next_line().await? {
                        Some(line) => inbound = Some(line),
                        None => break ExitCode::SUCCESS,
                    }
                }
                SuspendReason::Sleeping { until } => {
                    let remaining = (until - Utc::now()).to_std().unwrap_or_default();
                    debug!(?remaining, "sleeping before resuming");
                    tokio::time::sleep(remaining).await;
                }
            },
            RunOutcome::Failed(RuntimeError::Cancelled) => break ExitCode::FAILURE,
            RunOutcome::Failed(error) => {
                eprintln!("error: {}", error);
                break ExitCode::FAILURE;
            }
        }
    };

    cancel.cancel();
    if let Some(watcher) = watcher {
        watcher.await?;
    }
    Ok(code)
}

/// Script paths under `dir`, relative to it and `/`-separated.
fn script_paths(dir: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("cannot list {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.to_string_lossy().ends_with(SCRIPT_EXTENSION) {
                if let Ok(relative) = path.strip_prefix(dir) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    found.push(key);
                }
            }
        }
    }
    found.sort();
    Ok(found)
}
