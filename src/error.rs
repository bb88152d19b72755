//! Error types for every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while lowering an event tree to bytecode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// A variable, flag, actor or symbol name is not declared in the project.
    #[error("{script}: node {node}: unknown {kind} `{name}` in field `{field}`")]
    UnresolvedReference {
        script: String,
        node: String,
        field: &'static str,
        kind: &'static str,
        name: String,
    },

    /// The node is structurally invalid (bad argument range, misplaced `break`, ...).
    #[error("{script}: node {node}: {reason}")]
    MalformedNode {
        script: String,
        node: String,
        reason: String,
    },

    /// The script's bytecode does not fit the 16-bit label space.
    #[error("{script}: compiled size {size} exceeds the 65535 byte script limit")]
    ScriptTooLarge { script: String, size: usize },

    /// A label reference survived emission. Always a compiler bug.
    #[error("{script}: label L{label} was referenced but never bound")]
    DanglingLabel { script: String, label: u16 },
}

/// Failure to turn one project resource into a packed asset.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("{path}: cannot read asset: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: unsupported {kind} asset: {reason}")]
    Unsupported {
        path: PathBuf,
        kind: &'static str,
        reason: String,
    },

    #[error("{path}: failed to decode: {reason}")]
    Decode { path: PathBuf, reason: String },
}

/// Every asset failure collected during one packing run.
#[derive(Debug, Error)]
#[error("{} asset(s) failed to pack:\n{}", .0.len(), render_list(.0))]
pub struct AssetErrors(pub Vec<AssetError>);

fn render_list(errors: &[AssetError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The generated data does not fit the cartridge's bank layout.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error(
        "symbol(s) larger than one bank ({capacity} bytes): {}",
        .symbols.iter().map(|(n, s)| format!("{n} ({s} bytes)")).collect::<Vec<_>>().join(", ")
    )]
    SymbolTooLarge {
        symbols: Vec<(String, usize)>,
        capacity: usize,
    },

    #[error("data needs {required} bytes but only {available} are available ({shortfall} short)")]
    TotalExceeded {
        required: usize,
        available: usize,
        shortfall: usize,
    },

    #[error("placing `{symbol}` ({size} bytes) would need bank {needed} of at most {ceiling}")]
    BankCeilingExceeded {
        symbol: String,
        size: usize,
        needed: usize,
        ceiling: usize,
    },

    #[error("invalid bank geometry: {0}")]
    InvalidGeometry(String),
}

/// Failures of the external build step.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("staging failed at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("toolchain failed: {0}")]
    Toolchain(String),

    #[error("build cancelled")]
    Cancelled,

    #[error("build task aborted: {0}")]
    Aborted(String),
}

/// Any failure of the compile pipeline, before a process is spawned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid project: {0}")]
    Project(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Assets(#[from] AssetErrors),

    #[error(transparent)]
    Capacity(#[from] CapacityError),
}
