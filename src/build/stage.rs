//! Places generated sources where the toolchain expects them.
//!
//! Sources are written to `build_dir`; the toolchain tree gets two aliases
//! pointing there (the bank header and the data directory).

use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use super::BuildLease;
use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::writer::GeneratedSources;
use crate::writer::c::BANKS_HEADER;

pub fn stage(
    _lease: &BuildLease,
    sources: &GeneratedSources,
    cfg: &BuildConfig,
) -> Result<(), BuildError> {
    let build_dir = std::path::absolute(&cfg.build_dir).map_err(staging(&cfg.build_dir))?;

    clear_dir(&build_dir).map_err(staging(&build_dir))?;
    sources.write_to(&build_dir).map_err(staging(&build_dir))?;
    info!("wrote {} generated files to {}", sources.files.len(), build_dir.display());

    relink(&cfg.header_link_path(), &build_dir.join(BANKS_HEADER))?;
    relink(&cfg.data_link_path(), &build_dir)?;
    Ok(())
}

fn staging(path: &Path) -> impl FnOnce(io::Error) -> BuildError + '_ {
    move |source| BuildError::Staging {
        path: path.to_path_buf(),
        source,
    }
}

/// Empty `dir` (creating it if needed) so no stale bank files survive.
fn clear_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return std::fs::create_dir_all(dir);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn relink(link: &Path, target: &Path) -> Result<(), BuildError> {
    remove_alias(link).map_err(staging(link))?;
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(staging(parent))?;
    }
    symlink(target, link).map_err(staging(link))?;
    debug!("{} -> {}", link.display(), target.display());
    Ok(())
}

fn remove_alias(link: &Path) -> io::Result<()> {
    let meta = match std::fs::symlink_metadata(link) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} did not exist, nothing to remove", link.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(link)
    } else {
        remove_link_file(link)
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(unix)]
fn remove_link_file(link: &Path) -> io::Result<()> {
    std::fs::remove_file(link)
}

#[cfg(windows)]
fn remove_link_file(link: &Path) -> io::Result<()> {
    // Directory symlinks on Windows need remove_dir.
    std::fs::remove_file(link).or_else(|_| std::fs::remove_dir(link))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::writer::GeneratedFile;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn lease() -> BuildLease {
        let slot = Arc::new(tokio::sync::Mutex::new(()));
        BuildLease {
            _guard: slot.try_lock_owned().unwrap(),
        }
    }

    fn sources(files: &[(&str, &str)]) -> GeneratedSources {
        GeneratedSources {
            files: files
                .iter()
                .map(|(p, c)| GeneratedFile {
                    path: (*p).into(),
                    contents: c.as_bytes().to_vec(),
                })
                .collect(),
        }
    }

    fn cfg(dir: &TempDir) -> BuildConfig {
        BuildConfig {
            src_root: dir.path().join("engine"),
            build_dir: dir.path().join("out"),
            ..BuildConfig::default()
        }
    }

    #[test]
    fn first_stage_creates_links() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(&dir);
        let files = sources(&[("banks.h", "#define NUM_BANKS 1\n"), ("bank_001.c", "x")]);
        stage(&lease(), &files, &cfg).unwrap();

        let header = std::fs::read_to_string(cfg.header_link_path()).unwrap();
        assert_eq!(header, "#define NUM_BANKS 1\n");
        assert!(std::fs::symlink_metadata(cfg.data_link_path()).unwrap().file_type().is_symlink());
        assert!(cfg.data_link_path().join("bank_001.c").exists());
    }

    #[test]
    fn restage_replaces_links_and_drops_stale_files() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(&dir);
        stage(&lease(), &sources(&[("banks.h", "one"), ("bank_002.c", "old")]), &cfg).unwrap();
        stage(&lease(), &sources(&[("banks.h", "two")]), &cfg).unwrap();

        assert_eq!(std::fs::read_to_string(cfg.header_link_path()).unwrap(), "two");
        assert!(!cfg.data_link_path().join("bank_002.c").exists());
    }

    #[test]
    fn real_directory_in_the_way_is_replaced() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(&dir);
        std::fs::create_dir_all(cfg.data_link_path()).unwrap();
        std::fs::write(cfg.data_link_path().join("leftover.c"), "x").unwrap();

        stage(&lease(), &sources(&[("banks.h", "h")]), &cfg).unwrap();
        assert!(!cfg.data_link_path().join("leftover.c").exists());
        assert!(cfg.data_link_path().join("banks.h").exists());
    }
}
