//! # TRN Emulator
//!
//! An assembler, memory image codec and cycle-level emulator for the TRN,
//! a small 20-bit teaching computer.
//!
//! Programs are assembled (or loaded from a memory image) into a [Memory],
//! which is executed by a [Cpu] one micro-step at a time. The [Controller]
//! runs a CPU on a background thread with pause, single-step, input and
//! interruption support, reporting every register and memory transfer as
//! an [Event].

pub mod isa;
pub mod cpu;
pub mod asm;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use isa::{Instruction, Opcode, Operation};
pub use cpu::{
    Controller, Cpu, CpuError, CpuState, Event, EventListener, Memory, Registers, Termination, Tick,
};
pub use asm::{assemble, disassemble, load_image, save_image, AssemblerError, ImageError};
pub use config::{EmulatorConfig, LogLevel};
