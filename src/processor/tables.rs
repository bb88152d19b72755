//! Name → slot tables shared read-only by every compile of a run.

use indexmap::IndexMap;

use crate::error::PipelineError;
use crate::model::{AssetKind, ProjectSnapshot};
use crate::parser::PLAYER;

/// Slot and symbol indices resolved from the snapshot's declarations.
///
/// Every table is keyed in declaration order, so indices are stable for a
/// given snapshot.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub variables: IndexMap<String, u8>,
    pub flags: IndexMap<String, u8>,
    pub actors: IndexMap<String, u8>,
    /// Declared asset name → kind, for type-checking asset arguments.
    pub assets: IndexMap<String, AssetKind>,
    /// Logical symbol name → index into the generated far-pointer table.
    pub symbols: IndexMap<String, u16>,
    pub start_scene: Option<String>,
}

impl Tables {
    pub fn build(project: &ProjectSnapshot) -> Result<Self, PipelineError> {
        let mut t = Tables::default();

        for (i, name) in project.variables.iter().enumerate() {
            t.variables.insert(name.clone(), i as u8);
        }
        for (i, name) in project.flags.iter().enumerate() {
            t.flags.insert(name.clone(), i as u8);
        }
        t.actors.insert(PLAYER.to_string(), 0);
        for (i, actor) in project.actors.iter().enumerate() {
            t.actors.insert(actor.name.clone(), i as u8 + 1);
        }

        for asset in &project.assets {
            t.assets.insert(asset.name.clone(), asset.kind);
        }

        for scene in &project.scenes {
            t.insert_symbol(scene_symbol(&scene.name))?;
        }
        for actor in &project.actors {
            t.insert_symbol(actor_symbol(&actor.name))?;
        }
        for trigger in &project.triggers {
            t.insert_symbol(trigger_symbol(&trigger.name))?;
        }
        for script in &project.scripts {
            t.insert_symbol(script_symbol(&script.name))?;
        }
        for asset in &project.assets {
            t.insert_symbol(asset_symbol(&asset.name))?;
        }
        for palette in &project.palettes {
            t.insert_symbol(palette_symbol(&palette.name))?;
        }

        t.start_scene = project
            .start_scene
            .as_deref()
            .or_else(|| project.scenes.first().map(|s| s.name.as_str()))
            .map(scene_symbol);

        Ok(t)
    }

    fn insert_symbol(&mut self, name: String) -> Result<u16, PipelineError> {
        if self.symbols.contains_key(&name) {
            return Err(PipelineError::Project(format!(
                "two declarations map to the same symbol `{name}`"
            )));
        }
        let index = u16::try_from(self.symbols.len())
            .map_err(|_| PipelineError::Project("more than 65535 symbols".to_string()))?;
        self.symbols.insert(name, index);
        Ok(index)
    }

    pub fn variable(&self, name: &str) -> Option<u8> {
        self.variables.get(name).copied()
    }

    pub fn flag(&self, name: &str) -> Option<u8> {
        self.flags.get(name).copied()
    }

    pub fn actor(&self, name: &str) -> Option<u8> {
        self.actors.get(name).copied()
    }

    pub fn symbol(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).copied()
    }
}

/// Lower-case C identifier; anything outside `[a-z0-9_]` becomes `_`.
pub fn c_ident(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub fn scene_symbol(name: &str) -> String {
    format!("scene_{}_init", c_ident(name))
}

pub fn actor_symbol(name: &str) -> String {
    format!("actor_{}_interact", c_ident(name))
}

pub fn trigger_symbol(name: &str) -> String {
    format!("trigger_{}_enter", c_ident(name))
}

pub fn script_symbol(name: &str) -> String {
    format!("script_{}", c_ident(name))
}

pub fn asset_symbol(name: &str) -> String {
    format!("asset_{}", c_ident(name))
}

pub fn palette_symbol(name: &str) -> String {
    format!("palette_{}", c_ident(name))
}
