//! Lowers event trees to linear bytecode.
//!
//! Pass 1 walks the tree with an explicit work stack, producing a flat list
//! of steps (instructions, block boundaries and label bindings) and the
//! script's exact size. Pass 2 encodes the steps; forward label references
//! are parked on the innermost open block's patch list and resolved when
//! that block closes, or handed to the enclosing block if their label is
//! bound further out.

use tracing::debug;

use crate::error::CompileError;
use crate::model::{AssetKind, Comparison, Event, ProjectSnapshot, Value};
use crate::processor::opcode::{Instruction, LabelId, Op, Operand, ValueOperand};
use crate::processor::tables::{
    Tables, actor_symbol, asset_symbol, scene_symbol, script_symbol, trigger_symbol,
};

const MAX_TEXT: usize = 255;
const MAX_CAMERA_SPEED: u8 = 5;

/// One entry point to compile.
#[derive(Debug, Clone)]
pub struct ScriptSource<'a> {
    /// Logical symbol the bytecode is published under.
    pub symbol: String,
    /// Human readable origin used in error messages.
    pub origin: String,
    pub body: &'a [Event],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
    pub symbol: String,
    pub code: Vec<u8>,
    /// Resolved byte offset of every label, indexed by label id.
    pub labels: Vec<u16>,
}

/// Every script entry point of the project, in symbol-table order.
pub fn collect_sources(project: &ProjectSnapshot) -> Vec<ScriptSource<'_>> {
    let scenes = project.scenes.iter().map(|s| ScriptSource {
        symbol: scene_symbol(&s.name),
        origin: format!("scene `{}` init", s.name),
        body: &s.init,
    });
    let actors = project.actors.iter().map(|a| ScriptSource {
        symbol: actor_symbol(&a.name),
        origin: format!("actor `{}` interact", a.name),
        body: &a.interact,
    });
    let triggers = project.triggers.iter().map(|t| ScriptSource {
        symbol: trigger_symbol(&t.name),
        origin: format!("trigger `{}` enter", t.name),
        body: &t.enter,
    });
    let scripts = project.scripts.iter().map(|s| ScriptSource {
        symbol: script_symbol(&s.name),
        origin: format!("script `{}`", s.name),
        body: &s.body,
    });
    scenes.chain(actors).chain(triggers).chain(scripts).collect()
}

/// Compile every entry point once. Calls between scripts are symbol
/// references, so self- and mutual recursion need no special handling.
pub fn compile_all(
    project: &ProjectSnapshot,
    tables: &Tables,
) -> Result<Vec<CompiledScript>, CompileError> {
    collect_sources(project)
        .iter()
        .map(|src| compile_script(src, tables))
        .collect()
}

pub fn compile_script(
    src: &ScriptSource<'_>,
    tables: &Tables,
) -> Result<CompiledScript, CompileError> {
    let lowered = Lowerer::new(&src.origin, tables).lower(src.body)?;
    if lowered.size > usize::from(u16::MAX) {
        return Err(CompileError::ScriptTooLarge {
            script: src.origin.clone(),
            size: lowered.size,
        });
    }
    let (code, labels) = emit(&src.origin, &lowered)?;
    debug_assert_eq!(code.len(), lowered.size);
    debug!(
        "compiled {} as {} ({} bytes, {} labels)",
        src.origin,
        src.symbol,
        code.len(),
        labels.len()
    );
    Ok(CompiledScript {
        symbol: src.symbol.clone(),
        code,
        labels,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Enter,
    Exit,
    Emit(Instruction),
    Bind(LabelId),
}

#[derive(Debug)]
struct Lowered {
    steps: Vec<Step>,
    label_count: usize,
    size: usize,
}

enum Work<'a> {
    Visit(&'a Event, String),
    Step(Step),
    CloseLoop,
}

// ─────────────────────────────────────────────────────
// Pass 1
// ─────────────────────────────────────────────────────

struct Lowerer<'t> {
    origin: &'t str,
    tables: &'t Tables,
    steps: Vec<Step>,
    size: usize,
    label_count: usize,
    /// Exit label of every loop currently open, innermost last.
    loops: Vec<LabelId>,
}

impl<'t> Lowerer<'t> {
    fn new(origin: &'t str, tables: &'t Tables) -> Self {
        Self {
            origin,
            tables,
            steps: Vec::new(),
            size: 0,
            label_count: 0,
            loops: Vec::new(),
        }
    }

    fn lower(mut self, body: &[Event]) -> Result<Lowered, CompileError> {
        let mut work: Vec<Work<'_>> = Vec::new();
        self.steps.push(Step::Enter);
        work.push(Work::Step(Step::Exit));
        work.push(Work::Step(Step::Emit(Instruction::new(Op::End, vec![]))));
        push_block(&mut work, body, "");

        while let Some(item) = work.pop() {
            match item {
                Work::Visit(event, path) => self.visit(event, path, &mut work)?,
                Work::Step(step) => self.push_step(step),
                Work::CloseLoop => {
                    self.loops.pop();
                }
            }
        }

        Ok(Lowered {
            steps: self.steps,
            label_count: self.label_count,
            size: self.size,
        })
    }

    fn push_step(&mut self, step: Step) {
        if let Step::Emit(ins) = &step {
            self.size += ins.size();
        }
        self.steps.push(step);
    }

    fn emit(&mut self, op: Op, operands: Vec<Operand>) {
        self.push_step(Step::Emit(Instruction::new(op, operands)));
    }

    fn new_label(&mut self) -> LabelId {
        let id = self.label_count as LabelId;
        self.label_count += 1;
        id
    }

    fn visit<'a>(
        &mut self,
        event: &'a Event,
        path: String,
        work: &mut Vec<Work<'a>>,
    ) -> Result<(), CompileError> {
        match event {
            Event::End => self.emit(Op::End, vec![]),
            Event::Text { text } => {
                if text.len() > MAX_TEXT {
                    return Err(self.malformed(
                        &path,
                        format!("text is {} bytes, at most {MAX_TEXT} fit one box", text.len()),
                    ));
                }
                self.emit(Op::Text, vec![Operand::Text(text.as_bytes().to_vec())]);
            }
            Event::SetVariable { variable, value } => {
                let slot = self.variable(&path, "variable", variable)?;
                let value = self.value(&path, "value", value)?;
                self.emit(Op::SetVar, vec![Operand::U8(slot), Operand::Value(value)]);
            }
            Event::VariableMath {
                variable,
                operator,
                value,
            } => {
                let slot = self.variable(&path, "variable", variable)?;
                let value = self.value(&path, "value", value)?;
                self.emit(
                    Op::VarMath,
                    vec![Operand::U8(slot), Operand::U8(*operator as u8), Operand::Value(value)],
                );
            }
            Event::SetFlag { flag } => {
                let slot = self.flag(&path, flag)?;
                self.emit(Op::SetFlag, vec![Operand::U8(slot)]);
            }
            Event::ClearFlag { flag } => {
                let slot = self.flag(&path, flag)?;
                self.emit(Op::ClearFlag, vec![Operand::U8(slot)]);
            }
            Event::IfFlag {
                flag,
                true_branch,
                false_branch,
            } => {
                let slot = self.flag(&path, flag)?;
                let else_label = self.new_label();
                self.push_step(Step::Enter);
                self.emit(Op::JumpIfFlagClear, vec![Operand::U8(slot), Operand::Label(else_label)]);
                self.branches(work, &path, else_label, true_branch, false_branch);
            }
            Event::IfVariable {
                variable,
                comparison,
                value,
                true_branch,
                false_branch,
            } => {
                let condition = self.condition(&path, variable, *comparison, value)?;
                let else_label = self.new_label();
                self.push_step(Step::Enter);
                self.emit(Op::JumpUnless, with_label(condition, else_label));
                self.branches(work, &path, else_label, true_branch, false_branch);
            }
            Event::LoopWhile {
                variable,
                comparison,
                value,
                body,
            } => {
                let condition = self.condition(&path, variable, *comparison, value)?;
                let (entry, exit) = self.open_loop();
                self.emit(Op::JumpUnless, with_label(condition, exit));
                self.close_loop(work, &path, entry, exit, body);
            }
            Event::LoopForever { body } => {
                let (entry, exit) = self.open_loop();
                self.close_loop(work, &path, entry, exit, body);
            }
            Event::Break => {
                let innermost = self.loops.last().copied();
                match innermost {
                    Some(exit) => self.emit(Op::Jump, vec![Operand::Label(exit)]),
                    None => {
                        return Err(self.malformed(&path, "`break` outside of a loop".to_string()));
                    }
                }
            }
            Event::CallScript { script } => {
                let index = self.symbol(&path, "script", "script", script_symbol(script), script)?;
                self.emit(Op::Invoke, vec![Operand::Symbol(index)]);
            }
            Event::SwitchScene { scene, x, y } => {
                let index = self.symbol(&path, "scene", "scene", scene_symbol(scene), scene)?;
                self.emit(
                    Op::SwitchScene,
                    vec![Operand::Symbol(index), Operand::U8(*x), Operand::U8(*y)],
                );
            }
            Event::ActorMoveTo { actor, x, y } => {
                let slot = self.actor(&path, actor)?;
                let x = self.value(&path, "x", x)?;
                let y = self.value(&path, "y", y)?;
                self.emit(
                    Op::ActorMoveTo,
                    vec![Operand::U8(slot), Operand::Value(x), Operand::Value(y)],
                );
            }
            Event::ActorSetDirection { actor, direction } => {
                let slot = self.actor(&path, actor)?;
                self.emit(Op::ActorSetDir, vec![Operand::U8(slot), Operand::U8(*direction as u8)]);
            }
            Event::ActorShow { actor } => {
                let slot = self.actor(&path, actor)?;
                self.emit(Op::ActorShow, vec![Operand::U8(slot)]);
            }
            Event::ActorHide { actor } => {
                let slot = self.actor(&path, actor)?;
                self.emit(Op::ActorHide, vec![Operand::U8(slot)]);
            }
            Event::CameraMoveTo { x, y, speed } => {
                if *speed > MAX_CAMERA_SPEED {
                    return Err(self.malformed(
                        &path,
                        format!("camera speed {speed} is outside 0..={MAX_CAMERA_SPEED}"),
                    ));
                }
                self.emit(
                    Op::CameraMoveTo,
                    vec![Operand::U8(*x), Operand::U8(*y), Operand::U8(*speed)],
                );
            }
            Event::OverlayShow { color, x, y } => self.emit(
                Op::OverlayShow,
                vec![Operand::U8(*color as u8), Operand::U8(*x), Operand::U8(*y)],
            ),
            Event::OverlayHide => self.emit(Op::OverlayHide, vec![]),
            Event::Wait { frames } => self.emit(Op::Wait, vec![Operand::U16(*frames)]),
            Event::PlaySong { song } => {
                let index = self.asset(&path, "song", song, AssetKind::Song)?;
                self.emit(Op::PlaySong, vec![Operand::Symbol(index)]);
            }
            Event::StopMusic => self.emit(Op::StopMusic, vec![]),
            Event::PlaySound { sound } => {
                let index = self.asset(&path, "sound", sound, AssetKind::Sound)?;
                self.emit(Op::PlaySound, vec![Operand::Symbol(index)]);
            }
        }
        Ok(())
    }

    /// Queues the tail of a conditional whose jump-if-false targets `else_label`.
    fn branches<'a>(
        &mut self,
        work: &mut Vec<Work<'a>>,
        path: &str,
        else_label: LabelId,
        true_branch: &'a [Event],
        false_branch: &'a [Event],
    ) {
        work.push(Work::Step(Step::Exit));
        if false_branch.is_empty() {
            work.push(Work::Step(Step::Bind(else_label)));
        } else {
            let end_label = self.new_label();
            work.push(Work::Step(Step::Bind(end_label)));
            push_block(work, false_branch, &format!("{path}.false_branch"));
            work.push(Work::Step(Step::Bind(else_label)));
            work.push(Work::Step(Step::Emit(Instruction::new(
                Op::Jump,
                vec![Operand::Label(end_label)],
            ))));
        }
        push_block(work, true_branch, &format!("{path}.true_branch"));
    }

    fn open_loop(&mut self) -> (LabelId, LabelId) {
        let entry = self.new_label();
        let exit = self.new_label();
        self.push_step(Step::Enter);
        self.push_step(Step::Bind(entry));
        self.loops.push(exit);
        (entry, exit)
    }

    fn close_loop<'a>(
        &mut self,
        work: &mut Vec<Work<'a>>,
        path: &str,
        entry: LabelId,
        exit: LabelId,
        body: &'a [Event],
    ) {
        work.push(Work::Step(Step::Exit));
        work.push(Work::Step(Step::Bind(exit)));
        work.push(Work::Step(Step::Emit(Instruction::new(
            Op::Jump,
            vec![Operand::Label(entry)],
        ))));
        work.push(Work::CloseLoop);
        push_block(work, body, &format!("{path}.body"));
    }

    fn condition(
        &self,
        path: &str,
        variable: &str,
        comparison: Comparison,
        value: &Value,
    ) -> Result<Vec<Operand>, CompileError> {
        let slot = self.variable(path, "variable", variable)?;
        let value = self.value(path, "value", value)?;
        Ok(vec![
            Operand::U8(slot),
            Operand::U8(comparison as u8),
            Operand::Value(value),
        ])
    }

    fn variable(&self, path: &str, field: &'static str, name: &str) -> Result<u8, CompileError> {
        self.tables
            .variable(name)
            .ok_or_else(|| self.unresolved(path, field, "variable", name))
    }

    fn flag(&self, path: &str, name: &str) -> Result<u8, CompileError> {
        self.tables
            .flag(name)
            .ok_or_else(|| self.unresolved(path, "flag", "flag", name))
    }

    fn actor(&self, path: &str, name: &str) -> Result<u8, CompileError> {
        self.tables
            .actor(name)
            .ok_or_else(|| self.unresolved(path, "actor", "actor", name))
    }

    fn value(
        &self,
        path: &str,
        field: &'static str,
        value: &Value,
    ) -> Result<ValueOperand, CompileError> {
        match value {
            Value::Literal(v) => Ok(ValueOperand::Literal(*v)),
            Value::Variable(name) => {
                Ok(ValueOperand::Variable(self.variable(path, field, name)?))
            }
        }
    }

    fn symbol(
        &self,
        path: &str,
        field: &'static str,
        kind: &'static str,
        symbol: String,
        name: &str,
    ) -> Result<u16, CompileError> {
        self.tables
            .symbol(&symbol)
            .ok_or_else(|| self.unresolved(path, field, kind, name))
    }

    fn asset(
        &self,
        path: &str,
        field: &'static str,
        name: &str,
        kind: AssetKind,
    ) -> Result<u16, CompileError> {
        match self.tables.assets.get(name) {
            Some(k) if *k == kind => {
                self.symbol(path, field, kind.as_str(), asset_symbol(name), name)
            }
            Some(k) => Err(self.malformed(
                path,
                format!("`{name}` is a {}, not a {}", k.as_str(), kind.as_str()),
            )),
            None => Err(self.unresolved(path, field, kind.as_str(), name)),
        }
    }

    fn unresolved(
        &self,
        path: &str,
        field: &'static str,
        kind: &'static str,
        name: &str,
    ) -> CompileError {
        CompileError::UnresolvedReference {
            script: self.origin.to_string(),
            node: path.to_string(),
            field,
            kind,
            name: name.to_string(),
        }
    }

    fn malformed(&self, path: &str, reason: String) -> CompileError {
        CompileError::MalformedNode {
            script: self.origin.to_string(),
            node: path.to_string(),
            reason,
        }
    }
}

fn push_block<'a>(work: &mut Vec<Work<'a>>, events: &'a [Event], prefix: &str) {
    for (i, event) in events.iter().enumerate().rev() {
        work.push(Work::Visit(event, format!("{prefix}[{i}]")));
    }
}

fn with_label(mut operands: Vec<Operand>, label: LabelId) -> Vec<Operand> {
    operands.push(Operand::Label(label));
    operands
}

// ─────────────────────────────────────────────────────
// Pass 2
// ─────────────────────────────────────────────────────

fn emit(origin: &str, lowered: &Lowered) -> Result<(Vec<u8>, Vec<u16>), CompileError> {
    let mut code = Vec::with_capacity(lowered.size);
    let mut bound: Vec<Option<u16>> = vec![None; lowered.label_count];
    let mut pending: Vec<Vec<(LabelId, usize)>> = Vec::new();

    for step in &lowered.steps {
        match step {
            Step::Enter => pending.push(Vec::new()),
            Step::Emit(ins) => {
                let refs = ins.encode(&mut code, |l| bound[usize::from(l)]);
                if let Some(open) = pending.last_mut() {
                    open.extend(refs);
                }
            }
            Step::Bind(label) => bound[usize::from(*label)] = Some(code.len() as u16),
            Step::Exit => {
                let patches = pending.pop().unwrap_or_default();
                let mut outer = Vec::new();
                for (label, at) in patches {
                    match bound[usize::from(label)] {
                        Some(addr) => code[at..at + 2].copy_from_slice(&addr.to_le_bytes()),
                        None => outer.push((label, at)),
                    }
                }
                match pending.last_mut() {
                    Some(parent) => parent.extend(outer),
                    None => {
                        if let Some((label, _)) = outer.first() {
                            return Err(CompileError::DanglingLabel {
                                script: origin.to_string(),
                                label: *label,
                            });
                        }
                    }
                }
            }
        }
    }

    let mut labels = Vec::with_capacity(bound.len());
    for (id, addr) in bound.into_iter().enumerate() {
        labels.push(addr.ok_or(CompileError::DanglingLabel {
            script: origin.to_string(),
            label: id as LabelId,
        })?);
    }
    Ok((code, labels))
}
