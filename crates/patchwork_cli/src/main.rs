// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command line runner for patchwork projects.
//!
//! Loads a project dump, runs every node providers-first, reports node
//! annotations and writes the resulting project back out.
//!
//! ```text
//! patchwork <project> [--config <file.ron>] [--human | --compact] [--output <path>]
//! ```

use patchwork_graph::{ConfigError, DumpError, DumpMode, EngineConfig, Graph, GraphError, Severity};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const USAGE: &str = "usage: patchwork <project> [--config <file.ron>] [--human | --compact] [--output <path>]";

/// Failure of a CLI invocation
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}\n{usage}", usage = USAGE)]
    Usage(String),

    #[error("can't access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("can't read project: {0}")]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    project: PathBuf,
    config: Option<PathBuf>,
    mode: Option<DumpMode>,
    output: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, CliError> {
        let mut project = None;
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = Some(Self::value(&mut args, "--config")?),
                "--output" => parsed.output = Some(Self::value(&mut args, "--output")?),
                "--human" => parsed.mode = Some(DumpMode::Human),
                "--compact" => parsed.mode = Some(DumpMode::Compact),
                flag if flag.starts_with("--") => {
                    return Err(CliError::Usage(format!("unknown option {flag}")));
                }
                _ if project.is_some() => {
                    return Err(CliError::Usage(format!("unexpected argument {arg}")));
                }
                _ => project = Some(PathBuf::from(arg)),
            }
        }
        parsed.project = project.ok_or_else(|| CliError::Usage("missing project path".to_string()))?;
        Ok(parsed)
    }

    fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf, CliError> {
        args.next()
            .map(PathBuf::from)
            .ok_or_else(|| CliError::Usage(format!("{flag} needs a value")))
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let mode = args.mode.unwrap_or(config.dump_mode);

    let text = std::fs::read_to_string(&args.project).map_err(|source| CliError::Io {
        path: args.project.clone(),
        source,
    })?;
    let mut graph = Graph::with_config(config);
    graph.read_dump(&text, &patchwork_nodes::standard_registry())?;
    tracing::info!("loaded {} ({} nodes)", args.project.display(), graph.node_count());

    graph.run_all()?;

    let (mut warnings, mut errors) = (0, 0);
    for handle in graph.live_handles() {
        for annotation in graph.annotations(handle)? {
            match annotation.severity {
                Severity::Warning => warnings += 1,
                Severity::Error => errors += 1,
            }
        }
    }
    tracing::info!("ran {} nodes: {warnings} warning(s), {errors} error(s)", graph.node_count());

    let dump = graph.dump(mode)?;
    match &args.output {
        Some(path) => std::fs::write(path, dump).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })?,
        None => print!("{dump}"),
    }
    Ok(())
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = Args::parse(std::env::args().skip(1)).and_then(|args| run(&args));
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, CliError> {
        Args::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn test_parse_all_options() {
        let args = parse(&["scene.pw", "--compact", "--config", "engine.ron", "--output", "out.pw"]).unwrap();
        assert_eq!(
            args,
            Args {
                project: PathBuf::from("scene.pw"),
                config: Some(PathBuf::from("engine.ron")),
                mode: Some(DumpMode::Compact),
                output: Some(PathBuf::from("out.pw")),
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_command_lines() {
        assert!(matches!(parse(&[]), Err(CliError::Usage(_))));
        assert!(matches!(parse(&["a.pw", "b.pw"]), Err(CliError::Usage(_))));
        assert!(matches!(parse(&["a.pw", "--config"]), Err(CliError::Usage(_))));
        assert!(matches!(parse(&["a.pw", "--fast"]), Err(CliError::Usage(_))));
    }
}
