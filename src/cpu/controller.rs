//! Background execution of a loaded program.
//!
//! The [Controller] owns a worker thread that drives a [Cpu] one micro-step
//! at a time. Before each micro-step the worker sleeps for the configured
//! delay and then honours pause and single-step requests. All control
//! operations may be called from any thread while the worker is running.

use crate::config::EmulatorConfig;
use crate::cpu::event::{Event, EventListener};
use crate::cpu::execute::{Cpu, CpuError, Tick};
use crate::cpu::memory::Memory;
use crate::logging;
use slog::{debug, info, o, warn, Logger};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Placeholder handed to a blocked `INP` when execution is interrupted.
const INTERRUPT_INPUT: u32 = 0;

/// How a background run ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The program executed `HLT`.
    Halted,
    /// [Controller::request_interruption] stopped it at a phase boundary.
    Interrupted,
    /// The configured cycle limit was reached.
    CycleLimit,
}

/// The CPU handed back by [Controller::wait].
#[derive(Debug)]
pub struct RunOutcome {
    pub cpu: Cpu,
    pub result: Result<Termination, CpuError>,
}

/// Errors reported by the controller itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("no program loaded")]
    NothingLoaded,

    #[error("execution already started")]
    AlreadyRunning,

    #[error("execution not started")]
    NotStarted,

    #[error("execution thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Default)]
struct PauseState {
    paused: bool,
    /// Micro-steps granted while paused.
    permits: u64,
}

#[derive(Debug, Default)]
struct InputSlot {
    value: Option<u32>,
    /// `value` was injected by an interruption rather than supplied.
    placeholder: bool,
}

/// State shared between the controller and its worker.
#[derive(Debug)]
struct Shared {
    pause: Mutex<PauseState>,
    pause_cv: Condvar,
    input: Mutex<InputSlot>,
    input_cv: Condvar,
    delay_ms: AtomicU64,
    interrupted: AtomicBool,
}

impl Shared {
    fn new(delay_ms: u64, paused: bool) -> Self {
        Self {
            pause: Mutex::new(PauseState {
                paused,
                permits: 0,
            }),
            pause_cv: Condvar::new(),
            input: Mutex::new(InputSlot::default()),
            input_cv: Condvar::new(),
            delay_ms: AtomicU64::new(delay_ms),
            interrupted: AtomicBool::new(false),
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn pause_state(&self) -> MutexGuard<'_, PauseState> {
        // Neither side panics while holding the lock, but a poisoned guard
        // still carries valid data.
        self.pause.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_input(&self) -> MutexGuard<'_, InputSlot> {
        self.input.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The checkpoint in front of every micro-step.
    fn checkpoint(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        let mut state = self.pause_state();
        while state.paused && state.permits == 0 && !self.interrupted() {
            state = self
                .pause_cv
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if state.paused && state.permits > 0 {
            state.permits -= 1;
        }
    }

    /// Block until input is available.
    fn wait_input(&self) -> u32 {
        let mut input = self.pending_input();
        loop {
            if let Some(value) = input.value.take() {
                input.placeholder = false;
                return value;
            }
            input = self
                .input_cv
                .wait(input)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Runs a [Cpu] on a background thread.
pub struct Controller {
    shared: Arc<Shared>,
    program: Option<Memory>,
    listeners: Vec<Box<dyn EventListener>>,
    max_cycles: Option<u64>,
    worker: Option<JoinHandle<RunOutcome>>,
    logger: Logger,
}

impl Controller {
    pub fn new(config: &EmulatorConfig) -> Self {
        Self::with_logger(config, None)
    }

    pub fn with_logger<L: Into<Option<Logger>>>(config: &EmulatorConfig, logger: L) -> Self {
        let logger = logging::resolve(logger).new(o!("stage" => "control"));

        Self {
            shared: Arc::new(Shared::new(config.delay_ms, config.start_paused)),
            program: None,
            listeners: Vec::new(),
            max_cycles: config.max_cycles,
            worker: None,
            logger,
        }
    }

    /// Load a program; all registers start at zero.
    pub fn load(&mut self, memory: Memory) -> Result<(), ControlError> {
        if self.worker.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        debug!(self.logger, "program loaded"; "cells" => memory.len());
        self.program = Some(memory);
        Ok(())
    }

    /// Register a listener. Listeners move to the worker on [Controller::start]
    /// and come back with the CPU from [Controller::wait].
    pub fn add_listener<L: EventListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    /// Receive every event over a channel.
    pub fn subscribe(&mut self) -> Receiver<Event> {
        let (tx, rx) = channel();
        self.add_listener(tx);
        rx
    }

    /// Start executing the loaded program on a new thread.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.worker.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        let memory = self.program.take().ok_or(ControlError::NothingLoaded)?;

        let mut cpu = Cpu::with_logger(memory, self.logger.clone());
        for listener in self.listeners.drain(..) {
            cpu.add_boxed_listener(listener);
        }

        if self.shared.interrupted.swap(false, Ordering::SeqCst) {
            // Drop a placeholder left behind by the previous interruption.
            let mut input = self.shared.pending_input();
            if input.placeholder {
                *input = InputSlot::default();
            }
        }
        let shared = Arc::clone(&self.shared);
        let max_cycles = self.max_cycles;
        let logger = self.logger.clone();

        info!(self.logger, "execution started"; "delay_ms" => self.delay());
        self.worker = Some(thread::spawn(move || {
            let result = drive(&mut cpu, &shared, max_cycles, &logger);
            RunOutcome { cpu, result }
        }));
        Ok(())
    }

    /// Ask the worker to stop at the next phase boundary.
    ///
    /// Wakes a paused worker and feeds a blocked `INP` a placeholder value.
    pub fn request_interruption(&self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        {
            let _state = self.shared.pause_state();
            self.shared.pause_cv.notify_all();
        }
        let mut input = self.shared.pending_input();
        if input.value.is_none() {
            input.value = Some(INTERRUPT_INPUT);
            input.placeholder = true;
        }
        self.shared.input_cv.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted()
    }

    /// Hold the worker at its next checkpoint.
    pub fn pause(&self) {
        let mut state = self.shared.pause_state();
        state.paused = true;
        state.permits = 0;
    }

    /// Release a paused worker.
    pub fn resume(&self) {
        let mut state = self.shared.pause_state();
        state.paused = false;
        state.permits = 0;
        self.shared.pause_cv.notify_all();
    }

    /// Allow exactly one micro-step while paused.
    ///
    /// Returns false (and does nothing) if execution is not paused.
    pub fn step(&self) -> bool {
        let mut state = self.shared.pause_state();
        if !state.paused {
            return false;
        }
        state.permits += 1;
        self.shared.pause_cv.notify_all();
        true
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pause_state().paused
    }

    /// Queue a value for the next `INP`.
    pub fn set_input(&self, value: u32) {
        *self.shared.pending_input() = InputSlot {
            value: Some(value),
            placeholder: false,
        };
        self.shared.input_cv.notify_all();
    }

    /// Change the delay applied at every checkpoint.
    pub fn set_delay(&self, delay_ms: u64) {
        self.shared.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn delay(&self) -> u64 {
        self.shared.delay_ms.load(Ordering::SeqCst)
    }

    /// True while the worker thread has not finished.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    /// Wait for the worker to finish and take back the CPU.
    pub fn wait(&mut self) -> Result<RunOutcome, ControlError> {
        let worker = self.worker.take().ok_or(ControlError::NotStarted)?;
        let mut outcome = worker.join().map_err(|_| ControlError::WorkerPanicked)?;

        self.listeners.extend(outcome.cpu.take_listeners());
        match &outcome.result {
            Ok(termination) => info!(self.logger, "execution finished";
                "termination" => ?termination,
                "clock" => outcome.cpu.regs.clock),
            Err(err) => warn!(self.logger, "execution failed"; "error" => %err),
        }
        Ok(outcome)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.request_interruption();
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("loaded", &self.program.is_some())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .field("delay_ms", &self.delay())
            .finish()
    }
}

/// Worker loop.
fn drive(
    cpu: &mut Cpu,
    shared: &Shared,
    max_cycles: Option<u64>,
    logger: &Logger,
) -> Result<Termination, CpuError> {
    // Set after an `INP` got its value, so the retried micro-step does not
    // need another checkpoint.
    let mut resumed = false;

    loop {
        if !resumed {
            shared.checkpoint();
        }
        resumed = false;

        if cpu.at_phase_boundary() {
            if shared.interrupted() {
                debug!(logger, "interrupted"; "clock" => cpu.regs.clock);
                return Ok(Termination::Interrupted);
            }
            if max_cycles.map_or(false, |max| cpu.regs.clock >= max) {
                return Ok(Termination::CycleLimit);
            }
        }

        match cpu.micro_step()? {
            Tick::Continue => {}
            Tick::AwaitingInput => {
                let value = shared.wait_input();
                cpu.set_input(value);
                resumed = true;
            }
            Tick::Halted => return Ok(Termination::Halted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::decode::{encode, Instruction, IoDirection, Operation};

    fn op(operation: Operation, operand: u16) -> u32 {
        encode(&Instruction::new(operation, operand))
    }

    fn program(words: Vec<u32>) -> Memory {
        Memory::from_words(words)
    }

    fn paused() -> EmulatorConfig {
        EmulatorConfig {
            start_paused: true,
            ..EmulatorConfig::default()
        }
    }

    #[test]
    fn test_run_to_halt() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        ctl.load(program(vec![op(Operation::Ena, 4), op(Operation::Hlt, 0)]))
            .unwrap();
        ctl.start().unwrap();

        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Halted));
        assert_eq!(outcome.cpu.regs.a, 4);
    }

    #[test]
    fn test_start_without_program() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        assert_eq!(ctl.start(), Err(ControlError::NothingLoaded));
        assert!(matches!(ctl.wait(), Err(ControlError::NotStarted)));
    }

    #[test]
    fn test_step_while_paused() {
        let mut ctl = Controller::new(&paused());
        let rx = ctl.subscribe();
        ctl.load(program(vec![op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();

        // Three fetch micro-steps and one for HLT.
        for _ in 0..4 {
            assert!(ctl.step());
        }
        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Halted));

        let events: Vec<Event> = rx.try_iter().collect();
        assert!(events.contains(&Event::Halted));
    }

    fn log_descriptions(rx: &Receiver<Event>) -> Vec<String> {
        rx.try_iter()
            .filter_map(|event| match event {
                Event::Log(line) => Some(line.description),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_step_advances_one_micro_step() {
        let mut ctl = Controller::new(&paused());
        let rx = ctl.subscribe();
        ctl.load(program(vec![op(Operation::Jmp, 0)])).unwrap();
        ctl.start().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());

        assert!(ctl.step());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(log_descriptions(&rx), vec!["AR <- PC".to_string()]);

        // Blocked again until the next grant.
        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());

        assert!(ctl.step());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(
            log_descriptions(&rx),
            vec!["BR <- M[AR]".to_string(), "PC <- PC + 1".to_string()]
        );

        ctl.request_interruption();
        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Interrupted));
    }

    #[test]
    fn test_step_ignored_when_not_paused() {
        let ctl = Controller::new(&EmulatorConfig::default());
        assert!(!ctl.step());
    }

    #[test]
    fn test_pause_and_resume() {
        let mut ctl = Controller::new(&paused());
        let rx = ctl.subscribe();
        ctl.load(program(vec![op(Operation::Jmp, 0)])).unwrap();
        ctl.start().unwrap();
        assert!(ctl.is_paused());

        ctl.resume();
        assert!(!ctl.is_paused());
        let mut clock = 0;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            if let Event::ClockTick { clock: c } = event {
                clock = c;
                if clock >= 10 {
                    break;
                }
            }
        }
        assert!(clock >= 10);

        ctl.pause();
        assert!(ctl.is_paused());

        ctl.request_interruption();
        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Interrupted));
        assert!(outcome.cpu.at_phase_boundary());
        assert!(outcome.cpu.regs.clock >= 10);
    }

    #[test]
    fn test_input_queued_after_interruption_is_kept() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        ctl.load(program(vec![op(Operation::Jmp, 0)])).unwrap();
        ctl.start().unwrap();
        ctl.request_interruption();
        assert_eq!(ctl.wait().unwrap().result, Ok(Termination::Interrupted));

        ctl.set_input(42);
        let inp = op(Operation::Io(IoDirection::Input), 0);
        ctl.load(program(vec![inp, op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();

        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Halted));
        assert_eq!(outcome.cpu.regs.a, 42);
    }

    #[test]
    fn test_placeholder_not_carried_into_next_run() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        let rx = ctl.subscribe();
        ctl.load(program(vec![op(Operation::Jmp, 0)])).unwrap();
        ctl.start().unwrap();
        ctl.request_interruption();
        ctl.wait().unwrap();

        let inp = op(Operation::Io(IoDirection::Input), 0);
        ctl.load(program(vec![inp, op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();

        // The INP must block instead of consuming the old placeholder.
        let mut requested = false;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            if event == Event::InputRequested {
                requested = true;
                break;
            }
        }
        assert!(requested);

        ctl.set_input(7);
        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.cpu.regs.a, 7);
    }

    #[test]
    fn test_interrupt_blocked_input() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        let rx = ctl.subscribe();
        let inp = op(Operation::Io(IoDirection::Input), 0);
        ctl.load(program(vec![inp, op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();

        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            if event == Event::InputRequested {
                break;
            }
        }
        ctl.request_interruption();

        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Interrupted));
        assert_eq!(outcome.cpu.regs.a, INTERRUPT_INPUT);
    }

    #[test]
    fn test_queued_input() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        ctl.set_input(42);
        let inp = op(Operation::Io(IoDirection::Input), 0);
        ctl.load(program(vec![inp, op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();

        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::Halted));
        assert_eq!(outcome.cpu.regs.a, 42);
    }

    #[test]
    fn test_cycle_limit() {
        let config = EmulatorConfig {
            max_cycles: Some(20),
            ..EmulatorConfig::default()
        };
        let mut ctl = Controller::new(&config);
        ctl.load(program(vec![op(Operation::Jmp, 0)])).unwrap();
        ctl.start().unwrap();

        let outcome = ctl.wait().unwrap();
        assert_eq!(outcome.result, Ok(Termination::CycleLimit));
        assert_eq!(outcome.cpu.regs.clock, 20);
    }

    #[test]
    fn test_error_ends_run() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        ctl.load(program(vec![op(Operation::Lda, 50)])).unwrap();
        ctl.start().unwrap();

        let outcome = ctl.wait().unwrap();
        assert!(matches!(outcome.result, Err(CpuError::Memory(_))));
    }

    #[test]
    fn test_set_delay() {
        let ctl = Controller::new(&EmulatorConfig::default());
        ctl.set_delay(250);
        assert_eq!(ctl.delay(), 250);
    }

    #[test]
    fn test_listeners_returned_after_wait() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        let rx = ctl.subscribe();
        ctl.load(program(vec![op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();
        ctl.wait().unwrap();

        ctl.load(program(vec![op(Operation::Hlt, 0)])).unwrap();
        ctl.start().unwrap();
        ctl.wait().unwrap();

        let halts = rx.try_iter().filter(|e| *e == Event::Halted).count();
        assert_eq!(halts, 2);
    }

    #[test]
    fn test_drop_stops_worker() {
        let mut ctl = Controller::new(&EmulatorConfig::default());
        ctl.load(program(vec![op(Operation::Jmp, 0)])).unwrap();
        ctl.start().unwrap();
        drop(ctl);
    }
}
