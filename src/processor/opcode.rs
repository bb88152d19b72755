//! Bytecode instruction set understood by the cartridge's script engine.

/// Placeholder written into a label field until its target is known.
pub const UNRESOLVED: u16 = 0xFFFF;

pub type LabelId = u16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    End = 0,
    Text,
    SetVar,
    VarMath,
    SetFlag,
    ClearFlag,
    JumpIfFlagClear,
    JumpUnless,
    Jump,
    Invoke,
    SwitchScene,
    ActorMoveTo,
    ActorSetDir,
    ActorShow,
    ActorHide,
    CameraMoveTo,
    OverlayShow,
    OverlayHide,
    Wait,
    PlaySong,
    StopMusic,
    PlaySound,
}

impl Op {
    /// Every opcode in numeric order (index == opcode byte).
    pub const ALL: &'static [Op] = &[
        Op::End,
        Op::Text,
        Op::SetVar,
        Op::VarMath,
        Op::SetFlag,
        Op::ClearFlag,
        Op::JumpIfFlagClear,
        Op::JumpUnless,
        Op::Jump,
        Op::Invoke,
        Op::SwitchScene,
        Op::ActorMoveTo,
        Op::ActorSetDir,
        Op::ActorShow,
        Op::ActorHide,
        Op::CameraMoveTo,
        Op::OverlayShow,
        Op::OverlayHide,
        Op::Wait,
        Op::PlaySong,
        Op::StopMusic,
        Op::PlaySound,
    ];

    /// Names used for the generated C enum, same order as [`Op::ALL`].
    pub const VARIANT_NAMES: &'static [&'static str] = &[
        "OP_END",
        "OP_TEXT",
        "OP_SET_VAR",
        "OP_VAR_MATH",
        "OP_SET_FLAG",
        "OP_CLEAR_FLAG",
        "OP_JUMP_IF_FLAG_CLEAR",
        "OP_JUMP_UNLESS",
        "OP_JUMP",
        "OP_INVOKE",
        "OP_SWITCH_SCENE",
        "OP_ACTOR_MOVE_TO",
        "OP_ACTOR_SET_DIR",
        "OP_ACTOR_SHOW",
        "OP_ACTOR_HIDE",
        "OP_CAMERA_MOVE_TO",
        "OP_OVERLAY_SHOW",
        "OP_OVERLAY_HIDE",
        "OP_WAIT",
        "OP_PLAY_SONG",
        "OP_STOP_MUSIC",
        "OP_PLAY_SOUND",
    ];

    pub fn name(self) -> &'static str {
        Self::VARIANT_NAMES[self as usize]
    }
}

/// A value resolved to its run-time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOperand {
    Literal(u16),
    Variable(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    U8(u8),
    U16(u16),
    Value(ValueOperand),
    /// Byte offset of a label inside the same script.
    Label(LabelId),
    /// Index into the far-pointer symbol table.
    Symbol(u16),
    /// Length-prefixed bytes.
    Text(Vec<u8>),
}

impl Operand {
    pub fn size(&self) -> usize {
        match self {
            Operand::U8(_) => 1,
            Operand::U16(_) | Operand::Label(_) | Operand::Symbol(_) => 2,
            Operand::Value(_) => 3,
            Operand::Text(bytes) => 1 + bytes.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(op: Op, operands: Vec<Operand>) -> Self {
        Self { op, operands }
    }

    pub fn size(&self) -> usize {
        1 + self.operands.iter().map(Operand::size).sum::<usize>()
    }

    /// Append the encoded instruction to `out`.
    ///
    /// Label fields are written with `resolve(label)` when it is already
    /// known, otherwise with [`UNRESOLVED`]; the positions of the latter are
    /// returned so the caller can patch them later.
    pub fn encode(
        &self,
        out: &mut Vec<u8>,
        resolve: impl Fn(LabelId) -> Option<u16>,
    ) -> Vec<(LabelId, usize)> {
        let mut pending = Vec::new();
        out.push(self.op as u8);
        for operand in &self.operands {
            match operand {
                Operand::U8(v) => out.push(*v),
                Operand::U16(v) | Operand::Symbol(v) => out.extend_from_slice(&v.to_le_bytes()),
                Operand::Value(ValueOperand::Literal(v)) => {
                    out.push(0);
                    out.extend_from_slice(&v.to_le_bytes());
                }
                Operand::Value(ValueOperand::Variable(slot)) => {
                    out.push(1);
                    out.extend_from_slice(&u16::from(*slot).to_le_bytes());
                }
                Operand::Label(label) => match resolve(*label) {
                    Some(addr) => out.extend_from_slice(&addr.to_le_bytes()),
                    None => {
                        pending.push((*label, out.len()));
                        out.extend_from_slice(&UNRESOLVED.to_le_bytes());
                    }
                },
                Operand::Text(bytes) => {
                    out.push(bytes.len() as u8);
                    out.extend_from_slice(bytes);
                }
            }
        }
        pending
    }
}
