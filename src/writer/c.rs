//! Emit the C headers and per-bank sources consumed by the cartridge build.

use std::io::{self, Write};

use crate::model::ProcessedProject;
use crate::processor::banks::Bank;
use crate::processor::opcode::Op;
use crate::processor::world::NO_SYMBOL;
use crate::writer::GeneratedFile;

pub const BANKS_HEADER: &str = "banks.h";
pub const DATA_HEADER: &str = "data_ptrs.h";
pub const DATA_SOURCE: &str = "data_ptrs.c";

const BANNER: &str = "// Auto-generated by cartforge - DO NOT EDIT";
const BYTES_PER_LINE: usize = 16;

pub fn emit(project: &ProcessedProject) -> io::Result<Vec<GeneratedFile>> {
    let mut files = vec![
        file(BANKS_HEADER, banks_header(project)?),
        file(DATA_HEADER, data_header(project)?),
        file(DATA_SOURCE, data_source(project)?),
    ];
    for bank in &project.allocation.banks {
        files.push(file(&bank_file_name(bank.index), bank_source(project, bank)?));
    }
    Ok(files)
}

pub fn bank_file_name(index: u16) -> String {
    format!("bank_{index:03}.c")
}

fn file(name: &str, contents: Vec<u8>) -> GeneratedFile {
    GeneratedFile {
        path: name.into(),
        contents,
    }
}

fn banks_header(project: &ProcessedProject) -> io::Result<Vec<u8>> {
    let alloc = &project.allocation;
    let mut h = Vec::new();
    writeln!(h, "{BANNER}")?;
    writeln!(h, "#ifndef BANKS_H")?;
    writeln!(h, "#define BANKS_H\n")?;
    writeln!(h, "#define NUM_BANKS {}", alloc.banks.len())?;
    writeln!(h, "#define FIRST_DATA_BANK {}", alloc.first_bank)?;
    writeln!(h, "#define BANK_CAPACITY {}", alloc.capacity)?;
    writeln!(h, "\n#endif")?;
    Ok(h)
}

fn data_header(project: &ProcessedProject) -> io::Result<Vec<u8>> {
    let t = &project.tables;
    let mut h = Vec::new();

    writeln!(h, "{BANNER}")?;
    writeln!(h, "#ifndef DATA_PTRS_H")?;
    writeln!(h, "#define DATA_PTRS_H\n")?;
    writeln!(h, "#include <stdint.h>")?;
    writeln!(h, "#include \"{BANKS_HEADER}\"\n")?;

    writeln!(h, "typedef struct {{")?;
    writeln!(h, "    uint16_t bank;")?;
    writeln!(h, "    uint16_t offset;")?;
    writeln!(h, "}} far_ptr_t;\n")?;

    // ---------------------------------------------------------------
    // 1. Symbol, variable, flag and actor indices
    // ---------------------------------------------------------------
    writeln!(h, "#define NO_SYMBOL {NO_SYMBOL:#06X}")?;
    for (name, index) in &t.symbols {
        writeln!(h, "#define SYM_{} {index}", name.to_ascii_uppercase())?;
    }
    writeln!(h, "#define SYMBOL_COUNT {}", t.symbols.len())?;
    match &t.start_scene {
        Some(start) => {
            writeln!(h, "#define START_SCENE_SYMBOL SYM_{}\n", start.to_ascii_uppercase())?
        }
        None => writeln!(h, "#define START_SCENE_SYMBOL NO_SYMBOL\n")?,
    }

    for (name, slot) in &t.variables {
        writeln!(h, "#define VAR_{} {slot}", c_upper(name))?;
    }
    writeln!(h, "#define NUM_VARIABLES {}\n", t.variables.len())?;
    for (name, slot) in &t.flags {
        writeln!(h, "#define FLAG_{} {slot}", c_upper(name))?;
    }
    writeln!(h, "#define NUM_FLAGS {}\n", t.flags.len())?;
    for (name, slot) in &t.actors {
        writeln!(h, "#define ACTOR_{} {slot}", c_upper(name))?;
    }
    writeln!(h)?;

    // ---------------------------------------------------------------
    // 2. Opcodes, derived from Op::VARIANT_NAMES
    // ---------------------------------------------------------------
    writeln!(h, "typedef enum {{")?;
    for (idx, name) in Op::VARIANT_NAMES.iter().enumerate() {
        writeln!(h, "    {name} = {idx},")?;
    }
    writeln!(h, "}} script_opcode;\n")?;

    // ---------------------------------------------------------------
    // 3. Placement tables
    // ---------------------------------------------------------------
    writeln!(h, "typedef struct {{")?;
    writeln!(h, "    uint16_t init;")?;
    writeln!(h, "    uint16_t background;")?;
    writeln!(h, "}} scene_def_t;\n")?;
    writeln!(h, "typedef struct {{")?;
    writeln!(h, "    uint8_t slot, scene, x, y;")?;
    writeln!(h, "    uint16_t sprite;")?;
    writeln!(h, "    uint16_t interact;")?;
    writeln!(h, "}} actor_def_t;\n")?;
    writeln!(h, "typedef struct {{")?;
    writeln!(h, "    uint8_t scene, x, y, width, height;")?;
    writeln!(h, "    uint16_t enter;")?;
    writeln!(h, "}} trigger_def_t;\n")?;

    writeln!(h, "#define SCENE_COUNT {}", project.world.scenes.len())?;
    writeln!(h, "#define ACTOR_COUNT {}", project.world.actors.len())?;
    writeln!(h, "#define TRIGGER_COUNT {}\n", project.world.triggers.len())?;

    writeln!(h, "extern const char GAME_TITLE[];")?;
    writeln!(h, "extern const far_ptr_t symbol_table[];")?;
    writeln!(h, "extern const scene_def_t scene_table[];")?;
    writeln!(h, "extern const actor_def_t actor_table[];")?;
    writeln!(h, "extern const trigger_def_t trigger_table[];")?;
    for bank in &project.allocation.banks {
        writeln!(h, "extern const unsigned char bank_{:03}_data[];", bank.index)?;
    }
    writeln!(h, "\n#endif")?;
    Ok(h)
}

fn data_source(project: &ProcessedProject) -> io::Result<Vec<u8>> {
    let world = &project.world;
    let mut c = Vec::new();

    writeln!(c, "{BANNER}")?;
    writeln!(c, "#include \"{DATA_HEADER}\"\n")?;
    writeln!(c, "const char GAME_TITLE[] = \"{}\";\n", c_string(&project.title))?;

    writeln!(c, "const far_ptr_t symbol_table[] = {{")?;
    if project.tables.symbols.is_empty() {
        writeln!(c, "    {{0, 0}},")?;
    }
    for name in project.tables.symbols.keys() {
        let (bank, offset) = project.far_pointer(name).unwrap_or((0, 0));
        let physical = project.physical_symbol(name).unwrap_or(name);
        if physical == name {
            writeln!(c, "    {{{bank}, {offset:#06x}}}, // {name}")?;
        } else {
            writeln!(c, "    {{{bank}, {offset:#06x}}}, // {name} -> {physical}")?;
        }
    }
    writeln!(c, "}};\n")?;

    writeln!(c, "const scene_def_t scene_table[] = {{")?;
    if world.scenes.is_empty() {
        writeln!(c, "    {{NO_SYMBOL, NO_SYMBOL}},")?;
    }
    for s in &world.scenes {
        writeln!(c, "    {{{}, {}}},", sym_ref(s.init), sym_ref(s.background))?;
    }
    writeln!(c, "}};\n")?;

    writeln!(c, "const actor_def_t actor_table[] = {{")?;
    if world.actors.is_empty() {
        writeln!(c, "    {{0, 0, 0, 0, NO_SYMBOL, NO_SYMBOL}},")?;
    }
    for a in &world.actors {
        writeln!(
            c,
            "    {{{}, {}, {}, {}, {}, {}}},",
            a.slot,
            a.scene,
            a.x,
            a.y,
            sym_ref(a.sprite),
            sym_ref(a.interact)
        )?;
    }
    writeln!(c, "}};\n")?;

    writeln!(c, "const trigger_def_t trigger_table[] = {{")?;
    if world.triggers.is_empty() {
        writeln!(c, "    {{0, 0, 0, 0, 0, NO_SYMBOL}},")?;
    }
    for t in &world.triggers {
        writeln!(
            c,
            "    {{{}, {}, {}, {}, {}, {}}},",
            t.scene,
            t.x,
            t.y,
            t.width,
            t.height,
            sym_ref(t.enter)
        )?;
    }
    writeln!(c, "}};")?;
    Ok(c)
}

fn bank_source(project: &ProcessedProject, bank: &Bank) -> io::Result<Vec<u8>> {
    let mut c = Vec::new();
    writeln!(c, "#pragma bank {}", bank.index)?;
    writeln!(c, "{BANNER}\n")?;

    for s in &bank.symbols {
        let start = usize::from(s.offset);
        let aliases: Vec<&str> = project
            .tables
            .symbols
            .keys()
            .map(String::as_str)
            .filter(|l| *l != s.name && project.physical_symbol(l) == Some(s.name.as_str()))
            .collect();
        write!(
            c,
            "// {start:#06x}-{:#06x} {} ({} bytes)",
            start + s.bytes.len().saturating_sub(1),
            s.name,
            s.bytes.len()
        )?;
        if aliases.is_empty() {
            writeln!(c)?;
        } else {
            writeln!(c, " = {}", aliases.join(", "))?;
        }
    }

    writeln!(c, "const unsigned char bank_{:03}_data[] = {{", bank.index)?;
    for line in bank.bytes().chunks(BYTES_PER_LINE) {
        let hex: Vec<String> = line.iter().map(|b| format!("0x{b:02X}")).collect();
        writeln!(c, "    {},", hex.join(", "))?;
    }
    writeln!(c, "}};")?;
    Ok(c)
}

fn sym_ref(index: u16) -> String {
    if index == NO_SYMBOL {
        "NO_SYMBOL".to_string()
    } else {
        index.to_string()
    }
}

fn c_upper(name: &str) -> String {
    crate::processor::tables::c_ident(name).to_ascii_uppercase()
}

/// Escapes for a C string literal; octal escapes never swallow the next char.
fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{b:03o}")),
        }
    }
    out
}
