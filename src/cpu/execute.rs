//! CPU execution engine for the TRN.
//!
//! Each instruction runs through up to four phases (fetch, indexed,
//! indirect, execute). A phase is split into micro-steps; between two
//! micro-steps lies a checkpoint where a driver may sleep, pause or
//! single-step. [Cpu::micro_step] performs exactly one micro-step, so the
//! engine itself never blocks.

use crate::asm::disasm::disassemble_word;
use crate::cpu::event::{Access, Event, EventDispatcher, EventListener, LogLine};
use crate::cpu::memory::{Memory, MemoryError};
use crate::cpu::registers::{self, Phase, RegisterId, Registers, Transfer};
use crate::isa::decode::{
    self, DecodeError, IoDirection, Operation, ShiftDirection, ShiftOp, StepOp, Target,
};
use crate::isa::word::{self, ADDRESS_MASK, WORD_MASK};
use crate::logging;
use serde::{Deserialize, Serialize};
use slog::{debug, error, o, trace, Logger};
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT instruction).
    Halted,
    /// CPU encountered a fatal error.
    Error,
}

/// Result of one micro-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A checkpoint was reached; more work remains.
    Continue,
    /// `INP` needs a value; call [Cpu::set_input] and step again.
    AwaitingInput,
    /// `HLT` was executed.
    Halted,
}

/// What the phase dispatcher should do after a micro-step.
enum Flow {
    /// Advance SC within the current phase.
    Next,
    /// The phase is over; continue with the given one.
    Enter(Phase),
    /// EXECUTE finished; return to FETCH and recompute flags.
    Done,
    /// `RET` finished; return to FETCH without touching the flags.
    Restart,
    /// Blocked on input.
    Await,
    Halt,
}

/// The TRN CPU.
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Working copy of memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Overflow side channel, published into V at the end of EXECUTE.
    overflow: bool,
    /// Value supplied for a pending or future `INP`.
    input: Option<u32>,
    input_requested: bool,
    /// True between the first micro-step of a phase and its completion.
    phase_open: bool,
    events: EventDispatcher,
    logger: Logger,
}

impl Cpu {
    /// Create a CPU that executes `memory`.
    pub fn new(memory: Memory) -> Self {
        Self::with_logger(memory, None)
    }

    /// Create a CPU that reports diagnostics to `logger`.
    pub fn with_logger<L: Into<Option<Logger>>>(memory: Memory, logger: L) -> Self {
        let logger = logging::resolve(logger).new(o!("stage" => "execution"));

        Self {
            regs: Registers::new(),
            mem: memory,
            state: CpuState::Running,
            overflow: false,
            input: None,
            input_requested: false,
            phase_open: false,
            events: EventDispatcher::new(),
            logger,
        }
    }

    /// Replace memory and reset every register.
    pub fn load(&mut self, memory: Memory) {
        self.mem = memory;
        self.reset();
    }

    /// Reset the CPU to its initial state, keeping memory.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.state = CpuState::Running;
        self.overflow = false;
        self.input = None;
        self.input_requested = false;
        self.phase_open = false;
    }

    /// Register a listener for execution events.
    pub fn add_listener<L: EventListener + 'static>(&mut self, listener: L) {
        self.events.add_listener(listener)
    }

    pub(crate) fn add_boxed_listener(&mut self, listener: Box<dyn EventListener>) {
        self.events.add_boxed(listener)
    }

    pub(crate) fn take_listeners(&mut self) -> Vec<Box<dyn EventListener>> {
        self.events.take()
    }

    /// Supply a value for `INP`.
    pub fn set_input(&mut self, value: u32) {
        self.input = Some(value & WORD_MASK);
    }

    /// True while an `INP` is waiting for [Cpu::set_input].
    pub fn is_awaiting_input(&self) -> bool {
        self.input_requested
    }

    /// True when no phase is in progress.
    pub fn at_phase_boundary(&self) -> bool {
        !self.phase_open
    }

    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Perform one micro-step.
    pub fn micro_step(&mut self) -> Result<Tick, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        if !self.phase_open {
            self.phase_open = true;
            self.regs.clock += 1;
            self.events.dispatch(Event::ClockTick {
                clock: self.regs.clock,
            });
        }

        let result = match self.regs.f {
            Phase::Fetch => self.fetch(),
            Phase::Indexed => self.indexed(),
            Phase::Indirect => self.indirect(),
            Phase::Execute => self.execute(),
        };

        let step = match result {
            Ok(step) => step,
            Err(e) => return Err(self.fault(e)),
        };

        match step {
            Flow::Next => {
                self.set_sc(self.regs.sc + 1);
                Ok(Tick::Continue)
            }
            Flow::Enter(phase) => {
                self.enter(phase);
                Ok(Tick::Continue)
            }
            Flow::Done => {
                self.enter(Phase::Fetch);
                self.update_flags();
                Ok(Tick::Continue)
            }
            Flow::Restart => {
                self.enter(Phase::Fetch);
                Ok(Tick::Continue)
            }
            Flow::Await => Ok(Tick::AwaitingInput),
            Flow::Halt => Ok(Tick::Halted),
        }
    }

    /// Run micro-steps until the current phase completes.
    pub fn step_phase(&mut self) -> Result<Tick, CpuError> {
        loop {
            let tick = self.micro_step()?;
            if tick != Tick::Continue || self.at_phase_boundary() {
                return Ok(tick);
            }
        }
    }

    /// Run micro-steps until the next instruction fetch begins.
    pub fn step_instruction(&mut self) -> Result<Tick, CpuError> {
        loop {
            let tick = self.micro_step()?;
            if tick != Tick::Continue || (self.at_phase_boundary() && self.regs.f == Phase::Fetch) {
                return Ok(tick);
            }
        }
    }

    /// Run until the program halts or waits for input.
    pub fn run(&mut self) -> Result<Tick, CpuError> {
        loop {
            let tick = self.micro_step()?;
            if tick != Tick::Continue {
                return Ok(tick);
            }
        }
    }

    /// Run for at most `max_phases` phases.
    ///
    /// Returns [Tick::Continue] if the limit was reached first.
    pub fn run_limited(&mut self, max_phases: u64) -> Result<Tick, CpuError> {
        let limit = self.regs.clock.saturating_add(max_phases);

        loop {
            if self.at_phase_boundary() && self.regs.clock >= limit {
                return Ok(Tick::Continue);
            }
            let tick = self.micro_step()?;
            if tick != Tick::Continue {
                return Ok(tick);
            }
        }
    }

    // ==================== Phases ====================

    fn fetch(&mut self) -> Result<Flow, CpuError> {
        match self.regs.sc {
            0 => {
                self.copy(RegisterId::Pc, RegisterId::Ar, "AR <- PC");
                Ok(Flow::Next)
            }
            1 => {
                self.read_memory()?;
                let pc = self.regs.pc as u32 + 1;
                self.apply(registers::modify(RegisterId::Pc, pc, "PC <- PC + 1"));
                Ok(Flow::Next)
            }
            _ => {
                self.copy(RegisterId::Br, RegisterId::Ir, "IR <- BR");
                let operand = self.regs.br & ADDRESS_MASK;
                self.apply(registers::load(RegisterId::Ar, operand, "AR <- BR[12:0]"));

                let ir = self.regs.ir;
                let next = if word::is_indexed(ir) {
                    Phase::Indexed
                } else if word::is_indirect(ir) {
                    Phase::Indirect
                } else {
                    Phase::Execute
                };
                Ok(Flow::Enter(next))
            }
        }
    }

    fn indexed(&mut self) -> Result<Flow, CpuError> {
        // The sum is not folded into 13 bits and never affects V.
        let address = self.regs.ir_operand() + self.regs.i as u32;
        self.read_register(RegisterId::I);
        self.apply(registers::load_wide(RegisterId::Ar, address, "AR <- IR[12:0] + I"));

        if word::is_indirect(self.regs.ir) {
            Ok(Flow::Enter(Phase::Indirect))
        } else {
            Ok(Flow::Enter(Phase::Execute))
        }
    }

    fn indirect(&mut self) -> Result<Flow, CpuError> {
        match self.regs.sc {
            0 => {
                self.read_memory()?;
                Ok(Flow::Next)
            }
            _ => {
                let address = self.regs.br & ADDRESS_MASK;
                self.apply(registers::load(RegisterId::Ar, address, "AR <- BR[12:0]"));
                Ok(Flow::Enter(Phase::Execute))
            }
        }
    }

    fn execute(&mut self) -> Result<Flow, CpuError> {
        use Operation::*;
        use RegisterId as R;

        let instr = decode::decode(self.regs.ir)?;
        let sc = self.regs.sc;

        if sc == 0 {
            trace!(self.logger, "execute";
                "clock" => self.regs.clock,
                "pc" => self.regs.pc,
                "instruction" => disassemble_word(self.regs.ir));
        }

        let step = match (instr.operation, sc) {
            (Nop, _) => Flow::Done,

            (Lda, 0) | (Ldx, 0) | (Ldi, 0) | (Lsp, 0) | (Ada, 0) | (Sub, 0) | (And, 0)
            | (Ora, 0) | (Xor, 0) => {
                self.read_memory()?;
                Flow::Next
            }

            (Lda, _) => {
                self.copy(R::Br, R::A, "A <- BR");
                Flow::Done
            }
            (Ldx, _) => {
                self.copy(R::Br, R::X, "X <- BR");
                Flow::Done
            }
            (Ldi, _) => {
                self.copy(R::Br, R::I, "I <- BR[12:0]");
                Flow::Done
            }

            (Sta, 0) => {
                self.copy(R::A, R::Br, "BR <- A");
                Flow::Next
            }
            (Stx, 0) => {
                self.copy(R::X, R::Br, "BR <- X");
                Flow::Next
            }
            (Sti, 0) => {
                self.copy(R::I, R::Br, "BR <- I");
                Flow::Next
            }
            (Sta, _) | (Stx, _) | (Sti, _) => {
                self.write_memory()?;
                Flow::Done
            }

            (Ena, _) => {
                let value = word::sign_extend_operand(self.regs.ir);
                self.apply(registers::load(R::A, value, "A <- sext(IR[12:0])"));
                Flow::Done
            }

            (Psh, 0) => {
                self.increment_sp();
                Flow::Next
            }
            (Psh, 1) => {
                self.copy(R::A, R::Br, "BR <- A");
                Flow::Next
            }
            (Psh, 2) => {
                self.copy(R::Sp, R::Ar, "AR <- SP");
                Flow::Next
            }
            (Psh, _) => {
                self.write_memory()?;
                Flow::Done
            }

            (Pop, 0) => {
                self.copy(R::Sp, R::Ar, "AR <- SP");
                Flow::Next
            }
            (Pop, 1) => {
                self.read_memory()?;
                Flow::Next
            }
            (Pop, 2) => {
                self.copy(R::Br, R::A, "A <- BR");
                Flow::Next
            }
            (Pop, _) => {
                self.decrement_sp();
                Flow::Done
            }

            (Step(op), _) => {
                self.step_register(op);
                Flow::Done
            }

            (Eni, _) => {
                let operand = self.regs.ir_operand();
                self.apply(registers::load(R::I, operand, "I <- IR[12:0]"));
                Flow::Done
            }

            (Lsp, _) => {
                self.copy(R::Br, R::Sp, "SP <- BR[12:0]");
                Flow::Done
            }

            (Ada, _) => {
                self.add_br_to_a("A <- A + BR");
                Flow::Done
            }

            (Sub, 1) => {
                let complement = !self.regs.br;
                self.apply(registers::modify(R::Br, complement, "BR <- ~BR"));
                Flow::Next
            }
            (Sub, 2) => {
                let a = self.regs.a + 1;
                self.apply(registers::modify(R::A, a, "A <- A + 1"));
                Flow::Next
            }
            (Sub, _) => {
                self.add_br_to_a("A <- A + BR");
                Flow::Done
            }

            (And, _) => {
                self.read_register(R::Br);
                let value = self.regs.a & self.regs.br;
                self.apply(registers::modify(R::A, value, "A <- A & BR"));
                Flow::Done
            }
            (Ora, _) => {
                self.read_register(R::Br);
                let value = self.regs.a | self.regs.br;
                self.apply(registers::modify(R::A, value, "A <- A | BR"));
                Flow::Done
            }
            (Xor, _) => {
                self.read_register(R::Br);
                let value = self.regs.a ^ self.regs.br;
                self.apply(registers::modify(R::A, value, "A <- A ^ BR"));
                Flow::Done
            }

            (Cma, _) => {
                let value = !self.regs.a;
                self.apply(registers::modify(R::A, value, "A <- ~A"));
                Flow::Done
            }

            (Jmp, _) => {
                self.jump();
                Flow::Done
            }
            (Jpn, _) => {
                if self.regs.s {
                    self.jump();
                }
                Flow::Done
            }
            (Jag, _) => {
                if !(self.regs.s || self.regs.z) {
                    self.jump();
                }
                Flow::Done
            }
            (Jpz, _) => {
                if self.regs.z {
                    self.jump();
                }
                Flow::Done
            }
            (Jpo, _) => {
                if self.regs.v {
                    self.jump();
                    self.overflow = false;
                }
                Flow::Done
            }

            (Jsr, 0) => {
                self.increment_sp();
                Flow::Next
            }
            (Jsr, 1) => {
                self.copy(R::Pc, R::Br, "BR <- PC");
                self.copy(R::Sp, R::Ar, "AR <- SP");
                Flow::Next
            }
            (Jsr, 2) => {
                self.write_memory()?;
                Flow::Next
            }
            (Jsr, _) => {
                let target = self.regs.ir_operand();
                self.apply(registers::load(R::Pc, target, "PC <- IR[12:0]"));
                Flow::Done
            }

            (Jig, _) => {
                let i = self.regs.i as u32;
                if (i >> 3) & 0x3FF != 0 && i & word::OPERAND_SIGN_BIT == 0 {
                    self.jump();
                }
                Flow::Done
            }

            (Shift(op), _) => {
                self.shift(op);
                Flow::Done
            }

            (Ssp, 0) => {
                self.copy(R::Sp, R::Br, "BR <- SP");
                Flow::Next
            }
            (Ssp, _) => {
                self.write_memory()?;
                Flow::Done
            }

            (ShiftPair(direction), _) => {
                self.shift_pair(direction);
                Flow::Done
            }

            (Io(IoDirection::Output), 0) => {
                self.copy(R::A, R::Br, "BR <- A");
                Flow::Next
            }
            (Io(IoDirection::Output), _) => {
                let value = self.regs.br;
                self.read_register(R::Br);
                self.events.dispatch(Event::Output { value });
                Flow::Done
            }
            (Io(IoDirection::Input), 0) => match self.input.take() {
                Some(value) => {
                    self.input_requested = false;
                    self.apply(registers::load(R::Br, value, "BR <- input"));
                    Flow::Next
                }
                None => {
                    if !self.input_requested {
                        self.input_requested = true;
                        self.events.dispatch(Event::InputRequested);
                    }
                    Flow::Await
                }
            },
            (Io(IoDirection::Input), _) => {
                self.copy(R::Br, R::A, "A <- BR");
                Flow::Done
            }

            (Ret, 0) => {
                self.copy(R::Sp, R::Ar, "AR <- SP");
                Flow::Next
            }
            (Ret, 1) => {
                self.read_memory()?;
                Flow::Next
            }
            (Ret, 2) => {
                self.copy(R::Br, R::Pc, "PC <- BR[12:0]");
                Flow::Next
            }
            (Ret, _) => {
                self.decrement_sp();
                Flow::Restart
            }

            (Hlt, _) => {
                self.apply(registers::load(R::H, 1, "H <- 1"));
                self.state = CpuState::Halted;
                debug!(self.logger, "halted"; "clock" => self.regs.clock, "pc" => self.regs.pc);
                self.events.dispatch(Event::Halted);
                Flow::Halt
            }
        };

        Ok(step)
    }

    // ==================== Instruction helpers ====================

    fn jump(&mut self) {
        self.copy(RegisterId::Br, RegisterId::Pc, "PC <- BR[12:0]");
    }

    fn increment_sp(&mut self) {
        let sp = self.regs.sp as u32 + 1;
        self.apply(registers::modify(RegisterId::Sp, sp, "SP <- SP + 1"));
    }

    fn decrement_sp(&mut self) {
        let sp = (self.regs.sp as u32).wrapping_sub(1);
        self.apply(registers::modify(RegisterId::Sp, sp, "SP <- SP - 1"));
    }

    fn add_br_to_a(&mut self, description: &str) {
        self.read_register(RegisterId::Br);
        let (sum, overflow) = word::add_with_overflow(self.regs.a, self.regs.br);
        self.overflow = overflow;
        self.apply(registers::modify(RegisterId::A, sum, description));
    }

    fn step_register(&mut self, op: StepOp) {
        let register = match op.target {
            Target::A => RegisterId::A,
            Target::X => RegisterId::X,
            Target::I => RegisterId::I,
        };
        let sign = if op.increment { "+" } else { "-" };
        let description = format!("{} <- {} {} 1", register, register, sign);
        let current = self.regs.get(register);

        let value = if register == RegisterId::A {
            let delta = if op.increment { 1 } else { WORD_MASK };
            let (sum, overflow) = word::add_with_overflow(current, delta);
            self.overflow = overflow;
            sum
        } else if op.increment {
            current.wrapping_add(1)
        } else {
            current.wrapping_sub(1)
        };

        self.apply(registers::modify(register, value, description));
    }

    fn shift(&mut self, op: ShiftOp) {
        let register = match op.target {
            Target::X => RegisterId::X,
            _ => RegisterId::A,
        };
        let current = self.regs.get(register);
        let (value, description) = match op.direction {
            ShiftDirection::Left => (current << 1, format!("{} <- {} << 1", register, register)),
            ShiftDirection::Right => (current >> 1, format!("{} <- {} >> 1", register, register)),
        };
        self.apply(registers::modify(register, value, description));
    }

    fn shift_pair(&mut self, direction: ShiftDirection) {
        const PAIR_MASK: u64 = (1 << 40) - 1;

        let mask = WORD_MASK as u64;
        let pair = ((self.regs.a as u64 & mask) << 20) | (self.regs.x as u64 & mask);
        let (pair, arrow) = match direction {
            ShiftDirection::Left => ((pair << 1) & PAIR_MASK, "<<"),
            ShiftDirection::Right => (pair >> 1, ">>"),
        };

        let a = (pair >> 20) as u32;
        let x = (pair & WORD_MASK as u64) as u32;
        self.apply(registers::modify(RegisterId::A, a, format!("A <- (A:X {} 1)[39:20]", arrow)));
        self.apply(registers::modify(RegisterId::X, x, format!("X <- (A:X {} 1)[19:0]", arrow)));
    }

    // ==================== Transfers and events ====================

    /// Apply a register transfer and report it.
    fn apply(&mut self, transfer: Transfer) {
        self.regs.set(transfer.register, transfer.value);
        self.events.dispatch(Event::RegisterChanged {
            register: transfer.register,
            value: transfer.value,
            access: transfer.access,
        });
        let value = transfer.formatted_value();
        self.log(transfer.description, value);
    }

    /// Copy one register into another, reporting the read of the source.
    fn copy(&mut self, from: RegisterId, to: RegisterId, description: &str) {
        self.read_register(from);
        let value = self.regs.get(from);
        self.apply(registers::load(to, value, description));
    }

    fn read_register(&mut self, register: RegisterId) {
        self.events.dispatch(Event::RegisterChanged {
            register,
            value: self.regs.get(register),
            access: Access::Read,
        });
    }

    fn log(&mut self, description: String, value: String) {
        self.events.dispatch(Event::Log(LogLine {
            clock: self.regs.clock,
            description,
            value,
        }));
    }

    /// BR <- M[AR]
    fn read_memory(&mut self) -> Result<(), CpuError> {
        let address = self.regs.ar as usize;
        let value = self.mem.read(address)?;
        self.events.dispatch(Event::MemoryChanged {
            address: self.regs.ar,
            value,
            access: Access::Read,
        });
        self.apply(registers::load(RegisterId::Br, value, "BR <- M[AR]"));
        Ok(())
    }

    /// M[AR] <- BR
    fn write_memory(&mut self) -> Result<(), CpuError> {
        let address = self.regs.ar as usize;
        let value = self.regs.br & WORD_MASK;
        self.read_register(RegisterId::Br);
        self.mem.write(address, value)?;
        self.events.dispatch(Event::MemoryChanged {
            address: self.regs.ar,
            value,
            access: Access::Write,
        });
        self.log("M[AR] <- BR".to_string(), word::to_binary(value, word::WORD_BITS as usize));
        Ok(())
    }

    fn set_sc(&mut self, value: u8) {
        let value = value & 0b11;
        if self.regs.sc != value {
            self.regs.sc = value;
            self.events.dispatch(Event::RegisterChanged {
                register: RegisterId::Sc,
                value: value as u32,
                access: Access::InPlace,
            });
        }
    }

    /// Close the current phase and select the next one.
    fn enter(&mut self, phase: Phase) {
        self.set_sc(0);
        if self.regs.f != phase {
            let value = registers::format_value(RegisterId::F, phase.bits());
            let description = format!("F <- {}", value);
            self.apply(registers::load(RegisterId::F, phase.bits(), description));
        }
        self.phase_open = false;
    }

    /// Recompute Z, S and V from A and the overflow side channel.
    fn update_flags(&mut self) {
        let a = self.regs.a & WORD_MASK;
        self.set_flag(RegisterId::Z, a == 0);
        self.set_flag(RegisterId::S, word::is_negative(a));
        let overflow = self.overflow;
        self.set_flag(RegisterId::V, overflow);
    }

    fn set_flag(&mut self, flag: RegisterId, value: bool) {
        if self.regs.get(flag) != value as u32 {
            let description = format!("{} <- {}", flag, value as u8);
            self.apply(registers::load(flag, value as u32, description));
        }
    }

    /// Stop execution on a fatal error.
    fn fault(&mut self, err: CpuError) -> CpuError {
        self.state = CpuState::Error;
        error!(self.logger, "execution stopped";
            "clock" => self.regs.clock,
            "pc" => self.regs.pc,
            "error" => %err);
        self.events.dispatch(Event::Error {
            message: err.to_string(),
        });
        err
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("regs", &self.regs)
            .field("mem", &self.mem)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("{0}")]
    Memory(#[from] MemoryError),

    #[error("{0}")]
    Decode(#[from] DecodeError),
}
