//! The TRN opcode table.
//!
//! TRN has 32 five-bit opcodes. Some of them are shared by a family of
//! mnemonics (for example `INA`/`DCX`/...), in which case the family
//! member is told apart by a small sub-code stored in the operand field.
//!
//! The table is a `const` array and never changes at runtime. Lookups are
//! case-sensitive; callers upper-case mnemonics first.

use serde::{Deserialize, Serialize};

/// A five-bit TRN opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Lda = 1,
    Ldx = 2,
    Ldi = 3,
    Sta = 4,
    Stx = 5,
    Sti = 6,
    Ena = 7,
    Psh = 8,
    Pop = 9,
    /// INA, INX, INI, DCA, DCX, DCI.
    IncDec = 10,
    Eni = 11,
    Lsp = 12,
    Ada = 13,
    Sub = 14,
    And = 15,
    Ora = 16,
    Xor = 17,
    Cma = 18,
    Jmp = 19,
    Jpn = 20,
    Jag = 21,
    Jpz = 22,
    Jpo = 23,
    Jsr = 24,
    Jig = 25,
    /// SHAL, SHAR, SHXL, SHXR.
    Shift = 26,
    Ssp = 27,
    /// SAXL, SAXR.
    ShiftPair = 28,
    /// INP, OUT.
    Io = 29,
    Ret = 30,
    Hlt = 31,
}

/// One row of the mnemonic table.
struct Entry {
    mnemonic: &'static str,
    opcode: Opcode,
    subcode: u8,
}

const fn entry(mnemonic: &'static str, opcode: Opcode, subcode: u8) -> Entry {
    Entry { mnemonic, opcode, subcode }
}

/// Every mnemonic the assembler accepts for a machine instruction.
///
/// The first entry for an opcode/sub-code pair is its canonical spelling.
const TABLE: &[Entry] = &[
    entry("NOP", Opcode::Nop, 0),
    entry("LDA", Opcode::Lda, 0),
    entry("LDX", Opcode::Ldx, 0),
    entry("LDI", Opcode::Ldi, 0),
    entry("STA", Opcode::Sta, 0),
    entry("STX", Opcode::Stx, 0),
    entry("STI", Opcode::Sti, 0),
    entry("ENA", Opcode::Ena, 0),
    entry("PSH", Opcode::Psh, 0),
    entry("POP", Opcode::Pop, 0),
    entry("INA", Opcode::IncDec, 0),
    entry("INX", Opcode::IncDec, 1),
    entry("INI", Opcode::IncDec, 2),
    entry("DCA", Opcode::IncDec, 3),
    entry("DCX", Opcode::IncDec, 4),
    entry("DCI", Opcode::IncDec, 5),
    entry("ENI", Opcode::Eni, 0),
    entry("LSP", Opcode::Lsp, 0),
    entry("ADA", Opcode::Ada, 0),
    entry("SUB", Opcode::Sub, 0),
    entry("AND", Opcode::And, 0),
    entry("ORA", Opcode::Ora, 0),
    entry("XOR", Opcode::Xor, 0),
    entry("CMA", Opcode::Cma, 0),
    entry("JMP", Opcode::Jmp, 0),
    entry("JPN", Opcode::Jpn, 0),
    entry("JAG", Opcode::Jag, 0),
    entry("JPZ", Opcode::Jpz, 0),
    entry("JPO", Opcode::Jpo, 0),
    entry("JSR", Opcode::Jsr, 0),
    entry("JIG", Opcode::Jig, 0),
    entry("SHAL", Opcode::Shift, 0),
    entry("SHAR", Opcode::Shift, 1),
    entry("SHXL", Opcode::Shift, 2),
    entry("SHXR", Opcode::Shift, 3),
    entry("SSP", Opcode::Ssp, 0),
    entry("SAXL", Opcode::ShiftPair, 0),
    entry("SAXR", Opcode::ShiftPair, 1),
    entry("INP", Opcode::Io, 0),
    entry("OUT", Opcode::Io, 1),
    entry("OUTP", Opcode::Io, 1),
    entry("RET", Opcode::Ret, 0),
    entry("HLT", Opcode::Hlt, 0),
];

const OPCODES: [Opcode; 32] = [
    Opcode::Nop,
    Opcode::Lda,
    Opcode::Ldx,
    Opcode::Ldi,
    Opcode::Sta,
    Opcode::Stx,
    Opcode::Sti,
    Opcode::Ena,
    Opcode::Psh,
    Opcode::Pop,
    Opcode::IncDec,
    Opcode::Eni,
    Opcode::Lsp,
    Opcode::Ada,
    Opcode::Sub,
    Opcode::And,
    Opcode::Ora,
    Opcode::Xor,
    Opcode::Cma,
    Opcode::Jmp,
    Opcode::Jpn,
    Opcode::Jag,
    Opcode::Jpz,
    Opcode::Jpo,
    Opcode::Jsr,
    Opcode::Jig,
    Opcode::Shift,
    Opcode::Ssp,
    Opcode::ShiftPair,
    Opcode::Io,
    Opcode::Ret,
    Opcode::Hlt,
];

impl Opcode {
    /// Decode the five-bit opcode field.
    pub fn from_bits(bits: u8) -> Option<Opcode> {
        OPCODES.get(bits as usize).copied()
    }

    /// The five-bit encoding.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Whether the instruction carries an explicit operand.
    ///
    /// Instructions without one store a sub-code in the operand field
    /// instead (zero unless the opcode is shared by a family).
    pub fn takes_operand(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Lda | Ldx | Ldi | Sta | Stx | Sti | Ena | Eni | Lsp | Ada | Sub | And | Ora | Xor
                | Jmp | Jpn | Jag | Jpz | Jpo | Jsr | Jig | Ssp
        )
    }

    /// Canonical mnemonic for the first family member.
    pub fn mnemonic(self) -> &'static str {
        mnemonic_for(self, 0).unwrap_or("???")
    }
}

/// Look up the opcode of an upper-cased mnemonic.
pub fn mnemonic_to_opcode(name: &str) -> Option<Opcode> {
    TABLE.iter().find(|e| e.mnemonic == name).map(|e| e.opcode)
}

/// Sub-code packed into the operand field for a no-operand mnemonic.
///
/// Returns `None` for names that are not machine instructions.
pub fn mnemonic_to_subcode(name: &str) -> Option<u8> {
    TABLE.iter().find(|e| e.mnemonic == name).map(|e| e.subcode)
}

/// Canonical mnemonic for an opcode and sub-code pair.
pub fn mnemonic_for(opcode: Opcode, subcode: u8) -> Option<&'static str> {
    TABLE
        .iter()
        .find(|e| e.opcode == opcode && e.subcode == subcode)
        .map(|e| e.mnemonic)
}
