pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod processor;
pub mod writer;

use anyhow::Context;
use std::path::Path;

use crate::build::{BuildEvent, Orchestrator};
use crate::cli::{Cli, Command};
use crate::config::BuildConfig;
use crate::model::ProcessedProject;
use crate::writer::GeneratedSources;

pub fn run(args: Cli) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(path) => BuildConfig::load(path)?,
        None => BuildConfig::default(),
    };

    match args.command {
        Command::Compile { project, out_dir } => {
            let (_, sources) = compile(&project, &cfg)?;
            sources
                .write_to(&out_dir)
                .with_context(|| format!("Writing {}", out_dir.display()))?;
            Ok(())
        }
        Command::Build {
            project,
            src_root,
            build_dir,
            build_type,
        } => {
            if let Some(src_root) = src_root {
                cfg.src_root = src_root;
            }
            if let Some(build_dir) = build_dir {
                cfg.build_dir = build_dir;
            }
            let (_, sources) = compile(&project, &cfg)?;

            let runtime = tokio::runtime::Runtime::new().context("Starting async runtime")?;
            runtime.block_on(async move {
                let mut handle = Orchestrator::new(cfg).start(sources, build_type);
                while let Some(event) = handle.next_event().await {
                    match event {
                        BuildEvent::Out { text } => println!("{text}"),
                        BuildEvent::Err { text } => eprintln!("{text}"),
                        BuildEvent::Complete { .. } => break,
                    }
                }
                handle.wait().await.context("Building cartridge")
            })
        }
    }
}

/// Project file → generated sources, without touching the output directory.
pub fn compile(
    project_path: &Path,
    cfg: &BuildConfig,
) -> anyhow::Result<(ProcessedProject, GeneratedSources)> {
    // 1. ── Parse ──────────────────────────────────────────────────────
    let json = std::fs::read_to_string(project_path)
        .with_context(|| format!("Reading {}", project_path.display()))?;
    let snapshot = parser::load_from_json(&json).with_context(|| "Parsing project JSON")?;

    // 2. ── Process ────────────────────────────────────────────────────
    let root = project_path.parent().unwrap_or(Path::new("."));
    let processed = processor::run(&snapshot, root, cfg)
        .with_context(|| format!("Compiling {}", project_path.display()))?;

    // 3. ── Generate ───────────────────────────────────────────────────
    let sources = writer::generate(&processed).with_context(|| "Generating C sources")?;
    Ok((processed, sources))
}
