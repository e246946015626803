//! Instruction decoder for TRN words.
//!
//! Opcodes shared by a mnemonic family are decoded once into an explicit
//! sub-operation, so the execution engine never has to look at the raw
//! operand bits to know what it is doing.

use crate::isa::opcodes::Opcode;
use crate::isa::word;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Register selected by an increment/decrement or shift instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    A,
    X,
    I,
}

/// Direction of a one-bit shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftDirection {
    Left,
    Right,
}

/// Sub-operation of the increment/decrement family (`INA` ... `DCI`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOp {
    pub target: Target,
    pub increment: bool,
}

/// Sub-operation of the single-register shift family (`SHAL` ... `SHXR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftOp {
    pub target: Target,
    pub direction: ShiftDirection,
}

/// Direction of the `INP`/`OUT` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDirection {
    Input,
    Output,
}

/// Decoded TRN operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Nop,
    /// A := [addr]
    Lda,
    /// X := [addr]
    Ldx,
    /// I := [addr] (13 bits)
    Ldi,
    /// [addr] := A
    Sta,
    /// [addr] := X
    Stx,
    /// [addr] := I
    Sti,
    /// A := sign-extended operand
    Ena,
    Psh,
    Pop,
    /// INA, INX, INI, DCA, DCX, DCI
    Step(StepOp),
    /// I := operand
    Eni,
    /// SP := [addr]
    Lsp,
    /// A := A + [addr]
    Ada,
    /// A := A - [addr]
    Sub,
    And,
    Ora,
    Xor,
    /// A := !A
    Cma,
    Jmp,
    /// Jump if negative.
    Jpn,
    /// Jump if A is greater than zero.
    Jag,
    /// Jump if zero.
    Jpz,
    /// Jump on overflow.
    Jpo,
    Jsr,
    /// Jump if I is greater than 7 and not negative.
    Jig,
    /// SHAL, SHAR, SHXL, SHXR
    Shift(ShiftOp),
    /// [addr] := SP
    Ssp,
    /// SAXL, SAXR: shift the 40-bit A:X pair.
    ShiftPair(ShiftDirection),
    /// INP, OUT
    Io(IoDirection),
    Ret,
    Hlt,
}

impl Operation {
    /// The opcode this operation is encoded with.
    pub fn opcode(self) -> Opcode {
        match self {
            Operation::Nop => Opcode::Nop,
            Operation::Lda => Opcode::Lda,
            Operation::Ldx => Opcode::Ldx,
            Operation::Ldi => Opcode::Ldi,
            Operation::Sta => Opcode::Sta,
            Operation::Stx => Opcode::Stx,
            Operation::Sti => Opcode::Sti,
            Operation::Ena => Opcode::Ena,
            Operation::Psh => Opcode::Psh,
            Operation::Pop => Opcode::Pop,
            Operation::Step(_) => Opcode::IncDec,
            Operation::Eni => Opcode::Eni,
            Operation::Lsp => Opcode::Lsp,
            Operation::Ada => Opcode::Ada,
            Operation::Sub => Opcode::Sub,
            Operation::And => Opcode::And,
            Operation::Ora => Opcode::Ora,
            Operation::Xor => Opcode::Xor,
            Operation::Cma => Opcode::Cma,
            Operation::Jmp => Opcode::Jmp,
            Operation::Jpn => Opcode::Jpn,
            Operation::Jag => Opcode::Jag,
            Operation::Jpz => Opcode::Jpz,
            Operation::Jpo => Opcode::Jpo,
            Operation::Jsr => Opcode::Jsr,
            Operation::Jig => Opcode::Jig,
            Operation::Shift(_) => Opcode::Shift,
            Operation::Ssp => Opcode::Ssp,
            Operation::ShiftPair(_) => Opcode::ShiftPair,
            Operation::Io(_) => Opcode::Io,
            Operation::Ret => Opcode::Ret,
            Operation::Hlt => Opcode::Hlt,
        }
    }

    /// Sub-code stored in the operand field (zero outside the families).
    pub fn subcode(self) -> u8 {
        match self {
            Operation::Step(StepOp { target, increment }) => {
                let base = if increment { 0 } else { 3 };
                base + match target {
                    Target::A => 0,
                    Target::X => 1,
                    Target::I => 2,
                }
            }
            Operation::Shift(ShiftOp { target, direction }) => {
                let reg = if target == Target::X { 2 } else { 0 };
                reg + match direction {
                    ShiftDirection::Left => 0,
                    ShiftDirection::Right => 1,
                }
            }
            Operation::ShiftPair(ShiftDirection::Left) => 0,
            Operation::ShiftPair(ShiftDirection::Right) => 1,
            Operation::Io(IoDirection::Input) => 0,
            Operation::Io(IoDirection::Output) => 1,
            _ => 0,
        }
    }
}

/// A decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub operation: Operation,
    pub indirect: bool,
    pub indexed: bool,
    /// Raw 13-bit operand field.
    pub operand: u16,
}

impl Instruction {
    /// An instruction without address modifiers.
    pub fn new(operation: Operation, operand: u16) -> Self {
        Self {
            operation,
            indirect: false,
            indexed: false,
            operand,
        }
    }
}

/// Decode a 20-bit instruction word.
pub fn decode(word: u32) -> Result<Instruction, DecodeError> {
    let bits = word::opcode_bits(word);
    let opcode = Opcode::from_bits(bits).ok_or(DecodeError::InvalidOpcode(bits))?;
    let operand = word::operand(word);

    let operation = match opcode {
        Opcode::Nop => Operation::Nop,
        Opcode::Lda => Operation::Lda,
        Opcode::Ldx => Operation::Ldx,
        Opcode::Ldi => Operation::Ldi,
        Opcode::Sta => Operation::Sta,
        Opcode::Stx => Operation::Stx,
        Opcode::Sti => Operation::Sti,
        Opcode::Ena => Operation::Ena,
        Opcode::Psh => Operation::Psh,
        Opcode::Pop => Operation::Pop,
        Opcode::IncDec => {
            let sub = (operand & 0b111) as u8;
            let target = match sub % 3 {
                0 => Target::A,
                1 => Target::X,
                _ => Target::I,
            };
            if sub > 5 {
                return Err(DecodeError::InvalidSubOperation { opcode: bits, sub });
            }
            Operation::Step(StepOp { target, increment: sub < 3 })
        }
        Opcode::Eni => Operation::Eni,
        Opcode::Lsp => Operation::Lsp,
        Opcode::Ada => Operation::Ada,
        Opcode::Sub => Operation::Sub,
        Opcode::And => Operation::And,
        Opcode::Ora => Operation::Ora,
        Opcode::Xor => Operation::Xor,
        Opcode::Cma => Operation::Cma,
        Opcode::Jmp => Operation::Jmp,
        Opcode::Jpn => Operation::Jpn,
        Opcode::Jag => Operation::Jag,
        Opcode::Jpz => Operation::Jpz,
        Opcode::Jpo => Operation::Jpo,
        Opcode::Jsr => Operation::Jsr,
        Opcode::Jig => Operation::Jig,
        Opcode::Shift => {
            let sub = operand & 0b11;
            Operation::Shift(ShiftOp {
                target: if sub & 0b10 != 0 { Target::X } else { Target::A },
                direction: if sub & 0b01 != 0 {
                    ShiftDirection::Right
                } else {
                    ShiftDirection::Left
                },
            })
        }
        Opcode::Ssp => Operation::Ssp,
        Opcode::ShiftPair => Operation::ShiftPair(if operand & 1 != 0 {
            ShiftDirection::Right
        } else {
            ShiftDirection::Left
        }),
        Opcode::Io => Operation::Io(if operand & 1 != 0 {
            IoDirection::Output
        } else {
            IoDirection::Input
        }),
        Opcode::Ret => Operation::Ret,
        Opcode::Hlt => Operation::Hlt,
    };

    Ok(Instruction {
        operation,
        indirect: word::is_indirect(word),
        indexed: word::is_indexed(word),
        operand: operand as u16,
    })
}

/// Encode an instruction back into a word.
///
/// Family members encode their sub-code when the operand is zero.
pub fn encode(instr: &Instruction) -> u32 {
    let opcode = instr.operation.opcode();
    let operand = if opcode.takes_operand() {
        instr.operand as u32
    } else {
        instr.operand as u32 | instr.operation.subcode() as u32
    };
    word::pack(opcode.bits(), instr.indirect, instr.indexed, operand)
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    #[error("invalid sub-operation {sub} for opcode {opcode}")]
    InvalidSubOperation { opcode: u8, sub: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hlt() {
        let instr = decode(31 << 15).unwrap();
        assert_eq!(instr.operation, Operation::Hlt);
        assert!(!instr.indirect);
        assert!(!instr.indexed);
    }

    #[test]
    fn test_decode_modifiers() {
        let instr = decode(word::pack(1, true, true, 42)).unwrap();
        assert_eq!(instr.operation, Operation::Lda);
        assert!(instr.indirect);
        assert!(instr.indexed);
        assert_eq!(instr.operand, 42);
    }

    #[test]
    fn test_decode_step_family() {
        let dcx = decode(word::pack(10, false, false, 4)).unwrap();
        assert_eq!(
            dcx.operation,
            Operation::Step(StepOp { target: Target::X, increment: false })
        );
        let ini = decode(word::pack(10, false, false, 2)).unwrap();
        assert_eq!(
            ini.operation,
            Operation::Step(StepOp { target: Target::I, increment: true })
        );
        assert_eq!(
            decode(word::pack(10, false, false, 6)),
            Err(DecodeError::InvalidSubOperation { opcode: 10, sub: 6 })
        );
    }

    #[test]
    fn test_decode_shift_family() {
        let shxr = decode(word::pack(26, false, false, 3)).unwrap();
        assert_eq!(
            shxr.operation,
            Operation::Shift(ShiftOp { target: Target::X, direction: ShiftDirection::Right })
        );
        let saxr = decode(word::pack(28, false, false, 1)).unwrap();
        assert_eq!(saxr.operation, Operation::ShiftPair(ShiftDirection::Right));
        let out = decode(word::pack(29, false, false, 1)).unwrap();
        assert_eq!(out.operation, Operation::Io(IoDirection::Output));
    }

    #[test]
    fn test_subcode_matches_table() {
        use crate::isa::opcodes::mnemonic_to_subcode;

        let cases = [
            ("DCA", Operation::Step(StepOp { target: Target::A, increment: false })),
            ("INX", Operation::Step(StepOp { target: Target::X, increment: true })),
            (
                "SHXL",
                Operation::Shift(ShiftOp {
                    target: Target::X,
                    direction: ShiftDirection::Left,
                }),
            ),
            ("SAXR", Operation::ShiftPair(ShiftDirection::Right)),
            ("INP", Operation::Io(IoDirection::Input)),
        ];
        for (mnemonic, op) in cases {
            assert_eq!(mnemonic_to_subcode(mnemonic), Some(op.subcode()), "{}", mnemonic);
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let cases = [
            Instruction::new(Operation::Hlt, 0),
            Instruction::new(Operation::Jmp, 0x1FFF),
            Instruction {
                operation: Operation::Sta,
                indirect: true,
                indexed: false,
                operand: 7,
            },
            Instruction::new(Operation::Step(StepOp { target: Target::I, increment: false }), 0),
        ];
        for instr in cases {
            let decoded = decode(encode(&instr)).unwrap();
            assert_eq!(decoded.operation, instr.operation);
            assert_eq!(decoded.indirect, instr.indirect);
        }
    }
}
