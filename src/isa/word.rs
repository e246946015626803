//! Bit layout of TRN machine words.
//!
//! Every memory cell holds a 20-bit word. Instructions use the layout
//! below (bit 0 is the least significant bit):
//!
//! ```text
//!  19      15  14   13   12                  0
//! +----------+----+----+----------------------+
//! |  opcode  | IN | IX |       operand        |
//! +----------+----+----+----------------------+
//! ```
//!
//! `IN` selects indirect addressing, `IX` selects indexed addressing.

/// Number of significant bits in a word.
pub const WORD_BITS: u32 = 20;

/// Mask for a full 20-bit word.
pub const WORD_MASK: u32 = 0xF_FFFF;

/// Sign bit of a 20-bit word.
pub const SIGN_BIT: u32 = 1 << 19;

/// Number of bits in an address or operand field.
pub const ADDRESS_BITS: u32 = 13;

/// Mask for the 13-bit operand/address field.
pub const ADDRESS_MASK: u32 = 0x1FFF;

/// Number of addressable cells.
pub const ADDRESS_SPACE: usize = 1 << ADDRESS_BITS;

/// Sign bit of the 13-bit operand field.
pub const OPERAND_SIGN_BIT: u32 = 1 << 12;

/// Position of the opcode field.
pub const OPCODE_SHIFT: u32 = 15;

/// Mask for the opcode field after shifting.
pub const OPCODE_MASK: u32 = 0x1F;

/// Indirect-addressing flag.
pub const INDIRECT_BIT: u32 = 1 << 14;

/// Indexed-addressing flag.
pub const INDEXED_BIT: u32 = 1 << 13;

/// Bits OR-ed into a sign-extended operand (bits 13..=19).
const SIGN_EXTENSION: u32 = 0xF_E000;

/// Pack the fields of an instruction into a word.
#[inline]
pub fn pack(opcode: u8, indirect: bool, indexed: bool, operand: u32) -> u32 {
    let mut word = (opcode as u32 & OPCODE_MASK) << OPCODE_SHIFT;
    if indirect {
        word |= INDIRECT_BIT;
    }
    if indexed {
        word |= INDEXED_BIT;
    }
    word | (operand & ADDRESS_MASK)
}

/// The 5-bit opcode field.
#[inline]
pub fn opcode_bits(word: u32) -> u8 {
    ((word >> OPCODE_SHIFT) & OPCODE_MASK) as u8
}

#[inline]
pub fn is_indirect(word: u32) -> bool {
    word & INDIRECT_BIT != 0
}

#[inline]
pub fn is_indexed(word: u32) -> bool {
    word & INDEXED_BIT != 0
}

/// The 13-bit operand field.
#[inline]
pub fn operand(word: u32) -> u32 {
    word & ADDRESS_MASK
}

/// Sign-extend a 13-bit operand into a 20-bit word.
#[inline]
pub fn sign_extend_operand(operand: u32) -> u32 {
    let operand = operand & ADDRESS_MASK;
    if operand & OPERAND_SIGN_BIT != 0 {
        operand | SIGN_EXTENSION
    } else {
        operand
    }
}

/// True when bit 19 of the word is set.
#[inline]
pub fn is_negative(word: u32) -> bool {
    word & SIGN_BIT != 0
}

/// Interpret a 20-bit word as a signed integer.
pub fn to_signed(word: u32) -> i32 {
    let word = word & WORD_MASK;
    if is_negative(word) {
        word as i32 - (1 << WORD_BITS)
    } else {
        word as i32
    }
}

/// Add two 20-bit words, reporting signed overflow.
///
/// Overflow is flagged when both operands share a sign and the result
/// has the other one.
pub fn add_with_overflow(a: u32, b: u32) -> (u32, bool) {
    let a = a & WORD_MASK;
    let b = b & WORD_MASK;
    let result = a.wrapping_add(b) & WORD_MASK;
    let overflow = is_negative(a) == is_negative(b) && is_negative(result) != is_negative(a);
    (result, overflow)
}

/// Format a value as a zero-padded binary string of `width` digits.
pub fn to_binary(value: u32, width: usize) -> String {
    format!("{:0width$b}", value, width = width)
}
