//! The functional core: snapshot in, placed binary data out.
pub mod assets;
pub mod banks;
pub mod opcode;
pub mod script_compiler;
pub mod tables;
pub mod world;

use std::path::Path;
use tracing::info;

use crate::config::BuildConfig;
use crate::error::PipelineError;
use crate::model::{ProcessedProject, ProjectSnapshot};
use banks::Symbol;
use tables::Tables;
use world::World;

/// Runs every processing pass and returns a read-only structure for writers.
///
/// `root` is the directory asset paths are relative to.
pub fn run(
    project: &ProjectSnapshot,
    root: &Path,
    cfg: &BuildConfig,
) -> Result<ProcessedProject, PipelineError> {
    crate::parser::validate(project)?;
    let tables = Tables::build(project)?;

    let scripts = script_compiler::compile_all(project, &tables)?;
    info!("compiled {} scripts", scripts.len());

    let assets = assets::pack_all(project, root)?;
    let world = World::build(project, &tables);

    let symbols = scripts
        .iter()
        .map(|s| Symbol::new(s.symbol.clone(), s.code.clone(), 1))
        .chain(
            assets
                .packed
                .iter()
                .map(|a| Symbol::new(a.symbol(), a.payload.clone(), a.align)),
        )
        .collect();
    let allocation = banks::allocate(symbols, cfg)?;

    Ok(ProcessedProject {
        title: project.title.clone(),
        tables,
        scripts,
        assets,
        world,
        allocation,
    })
}
