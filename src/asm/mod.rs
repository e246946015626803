//! Assembler, memory image codec and disassembler for TRN programs.
//!
//! This module provides:
//! - A two-pass assembler (source text → memory image)
//! - The text memory image format (load/save)
//! - A disassembler (memory image → readable text)

pub mod line;
pub mod operand;
pub mod symbols;
pub mod assembler;
pub mod image;
pub mod disasm;

pub use assembler::{assemble, assemble_with_logger, AssemblerError};
pub use disasm::{disassemble, disassemble_word};
pub use image::{load_image, save_image, ImageError};
