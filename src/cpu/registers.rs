//! TRN CPU registers.
//!
//! The TRN has:
//! - BR, A, X, IR: 20-bit data registers (buffer, accumulator, extension, instruction)
//! - SP, I, PC, AR: 13-bit address registers (stack pointer, index, program counter, address)
//! - SC: 2-bit micro-step counter, F: 2-bit phase selector
//! - V, Z, S, H: overflow, zero, sign and halted flags
//!
//! Register transfers are described by small pure functions that return a
//! [Transfer]; the CPU applies it and turns it into events.

use crate::cpu::event::Access;
use crate::isa::word::{self, ADDRESS_BITS, ADDRESS_MASK, WORD_BITS, WORD_MASK};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The phase selector F.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Fetch = 0,
    Indexed = 1,
    Indirect = 2,
    Execute = 3,
}

impl Phase {
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Identifies one register of the TRN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterId {
    Br,
    A,
    X,
    Ir,
    Sp,
    I,
    Pc,
    Ar,
    Sc,
    F,
    V,
    Z,
    S,
    H,
}

impl RegisterId {
    /// Number of significant bits.
    pub fn width(self) -> u32 {
        match self {
            RegisterId::Br | RegisterId::A | RegisterId::X | RegisterId::Ir => WORD_BITS,
            RegisterId::Sp | RegisterId::I | RegisterId::Pc | RegisterId::Ar => ADDRESS_BITS,
            RegisterId::Sc | RegisterId::F => 2,
            RegisterId::V | RegisterId::Z | RegisterId::S | RegisterId::H => 1,
        }
    }

    /// Mask for the significant bits.
    pub fn mask(self) -> u32 {
        (1u32 << self.width()) - 1
    }

    pub fn name(self) -> &'static str {
        match self {
            RegisterId::Br => "BR",
            RegisterId::A => "A",
            RegisterId::X => "X",
            RegisterId::Ir => "IR",
            RegisterId::Sp => "SP",
            RegisterId::I => "I",
            RegisterId::Pc => "PC",
            RegisterId::Ar => "AR",
            RegisterId::Sc => "SC",
            RegisterId::F => "F",
            RegisterId::V => "V",
            RegisterId::Z => "Z",
            RegisterId::S => "S",
            RegisterId::H => "H",
        }
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A register transfer ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub register: RegisterId,
    pub value: u32,
    pub access: Access,
    pub description: String,
}

impl Transfer {
    /// The value as it appears in the log.
    pub fn formatted_value(&self) -> String {
        format_value(self.register, self.value)
    }
}

/// Load `value` into `register`, masked to the register width.
pub fn load(register: RegisterId, value: u32, description: impl Into<String>) -> Transfer {
    Transfer {
        register,
        value: value & register.mask(),
        access: Access::Write,
        description: description.into(),
    }
}

/// Modify `register` in place, masked to the register width.
pub fn modify(register: RegisterId, value: u32, description: impl Into<String>) -> Transfer {
    Transfer {
        register,
        value: value & register.mask(),
        access: Access::InPlace,
        description: description.into(),
    }
}

/// Load an address register without folding it into 13 bits.
///
/// Used for the indexed address, which may point past the 13-bit range.
pub fn load_wide(register: RegisterId, value: u32, description: impl Into<String>) -> Transfer {
    Transfer {
        register,
        value: value & 0xFFFF,
        access: Access::Write,
        description: description.into(),
    }
}

/// Format a register value in binary at its natural width.
pub fn format_value(register: RegisterId, value: u32) -> String {
    word::to_binary(value, register.width() as usize)
}

/// The TRN register file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub br: u32,
    pub a: u32,
    pub x: u32,
    pub ir: u32,

    pub sp: u16,
    pub i: u16,
    pub pc: u16,
    pub ar: u16,

    /// Micro-step counter within the current phase.
    pub sc: u8,
    /// Phase selector.
    pub f: Phase,
    /// Number of phases begun since reset.
    pub clock: u64,

    /// Overflow
    pub v: bool,
    /// Zero
    pub z: bool,
    /// Sign
    pub s: bool,
    /// Halted
    pub h: bool,
}

impl Registers {
    /// Create a new register file with all values zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn get(&self, id: RegisterId) -> u32 {
        match id {
            RegisterId::Br => self.br,
            RegisterId::A => self.a,
            RegisterId::X => self.x,
            RegisterId::Ir => self.ir,
            RegisterId::Sp => self.sp as u32,
            RegisterId::I => self.i as u32,
            RegisterId::Pc => self.pc as u32,
            RegisterId::Ar => self.ar as u32,
            RegisterId::Sc => self.sc as u32,
            RegisterId::F => self.f.bits(),
            RegisterId::V => self.v as u32,
            RegisterId::Z => self.z as u32,
            RegisterId::S => self.s as u32,
            RegisterId::H => self.h as u32,
        }
    }

    /// Set a register. Values are stored as given; masking is the
    /// caller's job (see [load] and [modify]).
    pub fn set(&mut self, id: RegisterId, value: u32) {
        match id {
            RegisterId::Br => self.br = value,
            RegisterId::A => self.a = value,
            RegisterId::X => self.x = value,
            RegisterId::Ir => self.ir = value,
            RegisterId::Sp => self.sp = value as u16,
            RegisterId::I => self.i = value as u16,
            RegisterId::Pc => self.pc = value as u16,
            RegisterId::Ar => self.ar = value as u16,
            RegisterId::Sc => self.sc = (value & 0b11) as u8,
            RegisterId::F => {
                self.f = match value & 0b11 {
                    0 => Phase::Fetch,
                    1 => Phase::Indexed,
                    2 => Phase::Indirect,
                    _ => Phase::Execute,
                }
            }
            RegisterId::V => self.v = value != 0,
            RegisterId::Z => self.z = value != 0,
            RegisterId::S => self.s = value != 0,
            RegisterId::H => self.h = value != 0,
        }
    }

    /// The 13-bit operand field of IR.
    pub fn ir_operand(&self) -> u32 {
        self.ir & ADDRESS_MASK
    }

    /// A as a signed integer.
    pub fn a_signed(&self) -> i32 {
        word::to_signed(self.a & WORD_MASK)
    }
}
