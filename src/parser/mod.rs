use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::model::{AssetKind, ProjectSnapshot};

/// Name reserved for the player actor (slot 0).
pub const PLAYER: &str = "player";

/// Parse the whole project JSON into a validated `ProjectSnapshot`.
pub fn load_from_json(json: &str) -> Result<ProjectSnapshot> {
    debug!("project file loaded, size: {} bytes", json.len());
    let snapshot: ProjectSnapshot =
        serde_json::from_str(json).with_context(|| "Deserializing project")?;

    info!(
        "project `{}`: {} scenes, {} actors, {} triggers, {} scripts, {} assets",
        snapshot.title,
        snapshot.scenes.len(),
        snapshot.actors.len(),
        snapshot.triggers.len(),
        snapshot.scripts.len(),
        snapshot.assets.len()
    );

    validate(&snapshot)?;
    Ok(snapshot)
}

/// Structural checks that do not need any script to be compiled.
pub fn validate(project: &ProjectSnapshot) -> Result<(), PipelineError> {
    unique("variable", project.variables.iter().map(String::as_str))?;
    unique("flag", project.flags.iter().map(String::as_str))?;
    unique("palette", project.palettes.iter().map(|p| p.name.as_str()))?;
    unique("asset", project.assets.iter().map(|a| a.name.as_str()))?;
    unique("scene", project.scenes.iter().map(|s| s.name.as_str()))?;
    unique("actor", project.actors.iter().map(|a| a.name.as_str()))?;
    unique("trigger", project.triggers.iter().map(|t| t.name.as_str()))?;
    unique("script", project.scripts.iter().map(|s| s.name.as_str()))?;

    limit("variables", project.variables.len(), 256)?;
    limit("flags", project.flags.len(), 256)?;
    limit("actors", project.actors.len(), 255)?;
    // Scene index 255 means "no scene" in the placement tables.
    limit("scenes", project.scenes.len(), 255)?;

    let scenes: HashSet<&str> = project.scenes.iter().map(|s| s.name.as_str()).collect();

    if let Some(start) = &project.start_scene {
        if !scenes.contains(start.as_str()) {
            return Err(invalid(format!("start scene `{start}` does not exist")));
        }
    }

    for actor in &project.actors {
        if actor.name == PLAYER {
            return Err(invalid(format!("actor name `{PLAYER}` is reserved")));
        }
        if !scenes.contains(actor.scene.as_str()) {
            return Err(invalid(format!(
                "actor `{}` is placed in unknown scene `{}`",
                actor.name, actor.scene
            )));
        }
        if let Some(sprite) = &actor.sprite {
            asset_of_kind(project, sprite, AssetKind::Image, &format!("actor `{}`", actor.name))?;
        }
    }

    for trigger in &project.triggers {
        if !scenes.contains(trigger.scene.as_str()) {
            return Err(invalid(format!(
                "trigger `{}` is placed in unknown scene `{}`",
                trigger.name, trigger.scene
            )));
        }
    }

    for scene in &project.scenes {
        if let Some(bg) = &scene.background {
            asset_of_kind(project, bg, AssetKind::Tileset, &format!("scene `{}`", scene.name))?;
        }
    }

    Ok(())
}

fn unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate {what} name `{name}`")));
        }
    }
    Ok(())
}

fn limit(what: &str, count: usize, max: usize) -> Result<(), PipelineError> {
    if count > max {
        return Err(invalid(format!("{count} {what} declared, at most {max} are supported")));
    }
    Ok(())
}

fn asset_of_kind(
    project: &ProjectSnapshot,
    name: &str,
    kind: AssetKind,
    owner: &str,
) -> Result<(), PipelineError> {
    match project.assets.iter().find(|a| a.name == name) {
        Some(a) if a.kind == kind => Ok(()),
        Some(a) => Err(invalid(format!(
            "{owner} uses `{name}` as {}, but it is a {}",
            kind.as_str(),
            a.kind.as_str()
        ))),
        None => Err(invalid(format!("{owner} uses unknown asset `{name}`"))),
    }
}

fn invalid(msg: String) -> PipelineError {
    PipelineError::Project(msg)
}
