//! Build configuration: cartridge geometry and the toolchain's layout.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::CapacityError;

/// Size of one switchable ROM bank.
pub const BANK_CAPACITY: usize = 0x4000;
/// Highest number of data banks the mapper can address.
pub const BANK_CEILING: usize = 255;
/// Bank 0 holds the engine; generated data starts after it.
pub const FIRST_DATA_BANK: u16 = 1;
/// Offsets inside a bank are 16-bit.
pub const MAX_BANK_CAPACITY: usize = 0x10000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub bank_capacity: usize,
    pub bank_ceiling: usize,
    pub first_bank: u16,

    /// Directory prepended to `PATH` so the toolchain's binaries win.
    pub toolchain_bin: PathBuf,
    /// Program invoked with the build type as its only argument.
    pub build_program: String,
    /// Stderr lines containing this text mark the build as failed even on a clean exit.
    pub fatal_marker: String,

    /// Root of the toolchain's source tree (the process' working directory).
    pub src_root: PathBuf,
    /// Where generated sources are written before being linked into `src_root`.
    pub build_dir: PathBuf,
    /// Alias for the generated bank header, relative to `src_root`.
    pub header_link: PathBuf,
    /// Alias for the generated data directory, relative to `src_root`.
    pub data_link: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            bank_capacity: BANK_CAPACITY,
            bank_ceiling: BANK_CEILING,
            first_bank: FIRST_DATA_BANK,
            toolchain_bin: PathBuf::from("/opt/gbdk/bin"),
            build_program: "make".to_string(),
            fatal_marker: "***".to_string(),
            src_root: PathBuf::from("gb"),
            build_dir: std::env::temp_dir().join("cartforge-build"),
            header_link: PathBuf::from("include/banks.h"),
            data_link: PathBuf::from("src/data"),
        }
    }
}

impl BuildConfig {
    /// Load a JSON config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&json)
            .with_context(|| format!("Parsing config {}", path.display()))?;
        cfg.data_budget()
            .with_context(|| format!("Checking config {}", path.display()))?;
        Ok(cfg)
    }

    /// Total data bytes the bank geometry allows, once it is known to be
    /// addressable: offsets fit 16 bits and every bank number fits `u16`.
    pub fn data_budget(&self) -> Result<usize, CapacityError> {
        let capacity = self.bank_capacity;
        if !(1..=MAX_BANK_CAPACITY).contains(&capacity) {
            return Err(CapacityError::InvalidGeometry(format!(
                "bank_capacity {capacity} is outside 1..={MAX_BANK_CAPACITY}"
            )));
        }
        let end = usize::from(self.first_bank).checked_add(self.bank_ceiling);
        if end.is_none_or(|end| end > usize::from(u16::MAX) + 1) {
            return Err(CapacityError::InvalidGeometry(format!(
                "{} banks from bank {} run past bank {}",
                self.bank_ceiling,
                self.first_bank,
                u16::MAX
            )));
        }
        capacity.checked_mul(self.bank_ceiling).ok_or_else(|| {
            CapacityError::InvalidGeometry(format!(
                "{} banks of {capacity} bytes overflow",
                self.bank_ceiling
            ))
        })
    }

    pub fn header_link_path(&self) -> PathBuf {
        self.src_root.join(&self.header_link)
    }

    pub fn data_link_path(&self) -> PathBuf {
        self.src_root.join(&self.data_link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: BuildConfig =
            serde_json::from_str(r#"{ "bank_ceiling": 8, "build_program": "gmake" }"#).unwrap();
        assert_eq!(cfg.bank_ceiling, 8);
        assert_eq!(cfg.build_program, "gmake");
        assert_eq!(cfg.bank_capacity, BANK_CAPACITY);
        assert_eq!(cfg.first_bank, FIRST_DATA_BANK);
    }

    #[test]
    fn default_geometry_is_addressable() {
        assert_eq!(BuildConfig::default().data_budget(), Ok(BANK_CAPACITY * BANK_CEILING));
    }

    #[test]
    fn bank_capacity_must_fit_16_bit_offsets() {
        for capacity in [0, MAX_BANK_CAPACITY + 1, 0x20000] {
            let cfg = BuildConfig {
                bank_capacity: capacity,
                ..BuildConfig::default()
            };
            assert!(
                matches!(cfg.data_budget(), Err(CapacityError::InvalidGeometry(_))),
                "{capacity}"
            );
        }
        let cfg = BuildConfig {
            bank_capacity: MAX_BANK_CAPACITY,
            bank_ceiling: 2,
            ..BuildConfig::default()
        };
        assert_eq!(cfg.data_budget(), Ok(2 * MAX_BANK_CAPACITY));
    }

    #[test]
    fn bank_numbers_must_fit_u16() {
        let cfg = BuildConfig {
            first_bank: 65500,
            bank_ceiling: 255,
            ..BuildConfig::default()
        };
        assert!(matches!(cfg.data_budget(), Err(CapacityError::InvalidGeometry(_))));

        let cfg = BuildConfig {
            first_bank: u16::MAX,
            bank_ceiling: 1,
            ..BuildConfig::default()
        };
        assert!(cfg.data_budget().is_ok());
    }

    #[test]
    fn huge_ceiling_is_rejected() {
        let cfg = BuildConfig {
            bank_ceiling: usize::MAX,
            ..BuildConfig::default()
        };
        assert!(matches!(cfg.data_budget(), Err(CapacityError::InvalidGeometry(_))));
    }

    #[test]
    fn load_rejects_unaddressable_geometry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cartforge.json");
        std::fs::write(&path, r#"{ "bank_capacity": 131072 }"#).unwrap();
        let err = BuildConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid bank geometry"), "{err:#}");
    }

    #[test]
    fn link_paths_are_under_src_root() {
        let cfg = BuildConfig {
            src_root: PathBuf::from("/tmp/gb"),
            ..BuildConfig::default()
        };
        assert_eq!(cfg.header_link_path(), PathBuf::from("/tmp/gb/include/banks.h"));
        assert_eq!(cfg.data_link_path(), PathBuf::from("/tmp/gb/src/data"));
    }
}
