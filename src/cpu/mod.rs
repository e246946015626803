//! CPU emulation for the TRN.
//!
//! This module implements the register-transfer model of the TRN:
//! - Growable memory of 20-bit words
//! - Data, address and flag registers plus the SC/F micro-step sequencer
//! - A resumable execution engine that reports every transfer as an event
//! - A controller that runs the engine on a background thread

pub mod memory;
pub mod registers;
pub mod event;
pub mod execute;
pub mod controller;

pub use memory::{Memory, MemoryError};
pub use registers::{Phase, RegisterId, Registers};
pub use event::{Access, Event, EventListener, LogLine};
pub use execute::{Cpu, CpuError, CpuState, Tick};
pub use controller::{ControlError, Controller, RunOutcome, Termination};
