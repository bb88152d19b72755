//! Turns a processed project into the files the toolchain compiles.
//!
//! Generation is pure: everything is rendered into memory and only
//! [`GeneratedSources::write_to`] touches the filesystem.
pub mod bin;
pub mod c;

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::model::ProcessedProject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Relative to the output directory.
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedSources {
    pub files: Vec<GeneratedFile>,
}

impl GeneratedSources {
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path == path.as_ref())
    }

    pub fn write_to(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        for file in &self.files {
            let path = dir.join(&file.path);
            debug!("writing {} ({} bytes)", path.display(), file.contents.len());
            std::fs::write(path, &file.contents)?;
        }
        Ok(())
    }
}

pub fn generate(project: &ProcessedProject) -> io::Result<GeneratedSources> {
    let mut files = c::emit(project)?;
    files.push(bin::emit(project));
    Ok(GeneratedSources { files })
}
