//! Project snapshot handed to the compiler, and the per-stage results.
//!
//! Everything under [`ProjectSnapshot`] is read-only once loaded: the
//! pipeline borrows it and never mutates it.

use serde::Deserialize;
use std::path::PathBuf;

use crate::processor::assets::PackedAssets;
use crate::processor::banks::Allocation;
use crate::processor::script_compiler::CompiledScript;
use crate::processor::tables::Tables;
use crate::processor::world::World;

/// ─────────────────────────────────────────────────────
/// Snapshot
/// ─────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectSnapshot {
    pub title: String,
    pub start_scene: Option<String>,
    pub variables: Vec<String>,
    pub flags: Vec<String>,
    pub palettes: Vec<Palette>,
    pub assets: Vec<AssetSource>,
    pub scenes: Vec<Scene>,
    pub actors: Vec<Actor>,
    pub triggers: Vec<Trigger>,
    pub scripts: Vec<CustomScript>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Palette {
    pub name: String,
    pub colors: [[u8; 3]; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Tileset,
    Song,
    Sound,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Tileset => "tileset",
            Self::Song => "song",
            Self::Sound => "sound",
        }
    }
}

/// A resource on disk, relative to the project root.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetSource {
    pub name: String,
    pub kind: AssetKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub init: Vec<Event>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    pub name: String,
    pub scene: String,
    #[serde(default)]
    pub sprite: Option<String>,
    #[serde(default)]
    pub x: u8,
    #[serde(default)]
    pub y: u8,
    #[serde(default)]
    pub interact: Vec<Event>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub scene: String,
    #[serde(default)]
    pub x: u8,
    #[serde(default)]
    pub y: u8,
    #[serde(default = "one")]
    pub width: u8,
    #[serde(default = "one")]
    pub height: u8,
    #[serde(default)]
    pub enter: Vec<Event>,
}

fn one() -> u8 {
    1
}

/// Reusable script, invoked from other scripts with `call_script`.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomScript {
    pub name: String,
    #[serde(default)]
    pub body: Vec<Event>,
}

/// ─────────────────────────────────────────────────────
/// Event trees
/// ─────────────────────────────────────────────────────

/// Argument that is either an immediate or read from a variable at run time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Literal(u16),
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MathOp {
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Sub,
    #[serde(rename = "*=")]
    Mul,
    #[serde(rename = "/=")]
    Div,
    #[serde(rename = "%=")]
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Comparison {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Down,
    Up,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayColor {
    Black,
    White,
}

/// One node of a visual event script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Event {
    /// Stops the script unconditionally.
    End,
    Text {
        text: String,
    },
    SetVariable {
        variable: String,
        value: Value,
    },
    VariableMath {
        variable: String,
        operator: MathOp,
        value: Value,
    },
    SetFlag {
        flag: String,
    },
    ClearFlag {
        flag: String,
    },
    IfFlag {
        flag: String,
        #[serde(default)]
        true_branch: Vec<Event>,
        #[serde(default)]
        false_branch: Vec<Event>,
    },
    IfVariable {
        variable: String,
        comparison: Comparison,
        value: Value,
        #[serde(default)]
        true_branch: Vec<Event>,
        #[serde(default)]
        false_branch: Vec<Event>,
    },
    LoopWhile {
        variable: String,
        comparison: Comparison,
        value: Value,
        #[serde(default)]
        body: Vec<Event>,
    },
    LoopForever {
        #[serde(default)]
        body: Vec<Event>,
    },
    /// Leaves the innermost enclosing loop.
    Break,
    CallScript {
        script: String,
    },
    SwitchScene {
        scene: String,
        #[serde(default)]
        x: u8,
        #[serde(default)]
        y: u8,
    },
    ActorMoveTo {
        actor: String,
        x: Value,
        y: Value,
    },
    ActorSetDirection {
        actor: String,
        direction: Direction,
    },
    ActorShow {
        actor: String,
    },
    ActorHide {
        actor: String,
    },
    CameraMoveTo {
        x: u8,
        y: u8,
        #[serde(default)]
        speed: u8,
    },
    OverlayShow {
        color: OverlayColor,
        #[serde(default)]
        x: u8,
        #[serde(default)]
        y: u8,
    },
    OverlayHide,
    Wait {
        frames: u16,
    },
    PlaySong {
        song: String,
    },
    StopMusic,
    PlaySound {
        sound: String,
    },
}

/// ─────────────────────────────────────────────────────
/// Pipeline output
/// ─────────────────────────────────────────────────────

/// Fully processed output handed to `writer`.
#[derive(Debug)]
pub struct ProcessedProject {
    pub title: String,
    pub tables: Tables,
    pub scripts: Vec<CompiledScript>,
    pub assets: PackedAssets,
    pub world: World,
    pub allocation: Allocation,
}

impl ProcessedProject {
    /// Physical symbol a logical one is stored under.
    pub fn physical_symbol<'a>(&'a self, logical: &'a str) -> Option<&'a str> {
        if self.allocation.addresses.contains_key(logical) {
            return Some(logical);
        }
        self.assets
            .get(logical)
            .map(|a| a.symbol())
            .and_then(|name| self.allocation.addresses.get_key_value(&name))
            .map(|(k, _)| k.as_str())
    }

    /// (bank, offset) of a logical symbol.
    pub fn far_pointer(&self, logical: &str) -> Option<(u16, u16)> {
        self.physical_symbol(logical)
            .and_then(|name| self.allocation.address(name))
    }
}
