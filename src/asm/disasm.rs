//! Disassembler for TRN programs.
//!
//! Converts memory words back to assembler syntax. Words that do not
//! decode are shown as `CON` data.

use crate::cpu::memory::Memory;
use crate::isa::decode::{decode, Instruction};
use crate::isa::opcodes::{mnemonic_for, Opcode};
use crate::isa::word;

/// Disassemble a single word to text.
pub fn disassemble_word(value: u32) -> String {
    match decode(value) {
        Ok(instr) => format_instruction(&instr),
        Err(_) => format!("CON ${:05X}", value & word::WORD_MASK),
    }
}

/// Disassemble a whole memory image.
pub fn disassemble(memory: &Memory) -> String {
    let mut output = String::new();
    output.push_str("// TRN Disassembly\n");
    output.push_str("// ---------------\n\n");

    for (addr, value) in memory.words().iter().enumerate() {
        let line = disassemble_word(*value);
        output.push_str(&format!(
            "{:04}: {}  {}\n",
            addr,
            word::to_binary(*value & word::WORD_MASK, word::WORD_BITS as usize),
            line
        ));
    }

    output
}

/// Format a decoded instruction as assembly text.
fn format_instruction(instr: &Instruction) -> String {
    let opcode = instr.operation.opcode();
    let mnemonic = mnemonic_for(opcode, instr.operation.subcode()).unwrap_or("???");
    let modifier = if instr.indexed { ",I" } else { "" };

    if !opcode.takes_operand() {
        let indirect = if instr.indirect { " ()" } else { "" };
        return format!("{}{}{}", mnemonic, modifier, indirect);
    }

    let operand = if opcode == Opcode::Ena {
        word::to_signed(word::sign_extend_operand(instr.operand as u32)).to_string()
    } else {
        instr.operand.to_string()
    };

    if instr.indirect {
        format!("{}{} ({})", mnemonic, modifier, operand)
    } else {
        format!("{}{} {}", mnemonic, modifier, operand)
    }
}
