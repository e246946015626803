//! The TRN instruction set.
//!
//! This module provides:
//! - The instruction word layout and bit helpers
//! - The opcode table shared by the assembler and the CPU
//! - Decoding of words into typed instructions

pub mod word;
pub mod opcodes;
pub mod decode;

pub use opcodes::{Opcode, mnemonic_to_opcode, mnemonic_to_subcode};
pub use decode::{decode, encode, Instruction, Operation, DecodeError};
