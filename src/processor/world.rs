//! Static placement data for scenes, actors and triggers.
//!
//! Everything here is expressed as table indices so the engine can walk
//! it without any string lookups.

use crate::model::ProjectSnapshot;
use crate::processor::tables::{
    Tables, actor_symbol, asset_symbol, scene_symbol, trigger_symbol,
};

/// Symbol index meaning "none".
pub const NO_SYMBOL: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneEntry {
    pub init: u16,
    pub background: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorEntry {
    pub slot: u8,
    /// Index into the scene table.
    pub scene: u8,
    pub x: u8,
    pub y: u8,
    pub sprite: u16,
    pub interact: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEntry {
    pub scene: u8,
    pub x: u8,
    pub y: u8,
    pub width: u8,
    pub height: u8,
    pub enter: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct World {
    pub scenes: Vec<SceneEntry>,
    pub actors: Vec<ActorEntry>,
    pub triggers: Vec<TriggerEntry>,
}

impl World {
    /// Assumes `project` has passed validation and `tables` was built from it.
    pub fn build(project: &ProjectSnapshot, tables: &Tables) -> Self {
        let sym = |name: String| tables.symbol(&name).unwrap_or(NO_SYMBOL);
        let scene_index = |name: &str| {
            project
                .scenes
                .iter()
                .position(|s| s.name == name)
                .and_then(|i| u8::try_from(i).ok())
                .unwrap_or(u8::MAX)
        };

        let scenes = project
            .scenes
            .iter()
            .map(|s| SceneEntry {
                init: sym(scene_symbol(&s.name)),
                background: s.background.as_deref().map_or(NO_SYMBOL, |b| sym(asset_symbol(b))),
            })
            .collect();

        let actors = project
            .actors
            .iter()
            .map(|a| ActorEntry {
                slot: tables.actor(&a.name).unwrap_or(0),
                scene: scene_index(&a.scene),
                x: a.x,
                y: a.y,
                sprite: a.sprite.as_deref().map_or(NO_SYMBOL, |s| sym(asset_symbol(s))),
                interact: sym(actor_symbol(&a.name)),
            })
            .collect();

        let triggers = project
            .triggers
            .iter()
            .map(|t| TriggerEntry {
                scene: scene_index(&t.scene),
                x: t.x,
                y: t.y,
                width: t.width,
                height: t.height,
                enter: sym(trigger_symbol(&t.name)),
            })
            .collect();

        World {
            scenes,
            actors,
            triggers,
        }
    }
}
