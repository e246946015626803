//! Event handling.
//!
//! The CPU reports every observable state change as an [Event]. Front ends
//! register [EventListeners](EventListener) on the [Cpu](crate::cpu::Cpu)
//! (or on the [Controller](crate::cpu::Controller) before starting it).
//!
//! A blanket implementation of [EventListener] for all `FnMut(&Event) + Send`
//! is provided, as well as one for `mpsc::Sender<Event>`.

use crate::cpu::registers::RegisterId;
use std::fmt;
use std::sync::mpsc::Sender;

/// How a register or memory cell was touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The value was read as the source of a transfer.
    Read,
    /// The value was replaced by a transfer.
    Write,
    /// The value was modified where it is (increment, shift, ...).
    InPlace,
}

/// One line of the execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Clock cycle the line belongs to.
    pub clock: u64,
    /// Register-transfer description, for example `AR <- PC`.
    pub description: String,
    /// The transferred value in binary.
    pub value: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:>6}] {:<24} {}", self.clock, self.description, self.value)
    }
}

/// Represents an event that occurred while executing a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A memory cell was read or written.
    MemoryChanged {
        address: u16,
        value: u32,
        access: Access,
    },

    /// A register was read or modified.
    RegisterChanged {
        register: RegisterId,
        value: u32,
        access: Access,
    },

    /// A new phase began.
    ClockTick { clock: u64 },

    /// A register-transfer log line.
    Log(LogLine),

    /// `OUT` produced a value.
    Output { value: u32 },

    /// `INP` is blocked until input is supplied.
    InputRequested,

    /// Execution stopped on a fatal error.
    Error { message: String },

    /// `HLT` was executed.
    Halted,
}

/// Trait for consuming events.
pub trait EventListener: Send {
    /// Called whenever a new event has been created.
    fn event(&mut self, event: &Event);
}

impl<F> EventListener for F
where
    F: FnMut(&Event) + Send,
{
    fn event(&mut self, event: &Event) {
        self(event)
    }
}

impl EventListener for Sender<Event> {
    fn event(&mut self, event: &Event) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.send(event.clone());
    }
}

#[derive(Default)]
pub(crate) struct EventDispatcher {
    listeners: Vec<Box<dyn EventListener>>,
}

impl EventDispatcher {
    pub fn new() -> EventDispatcher {
        EventDispatcher {
            listeners: Vec::new(),
        }
    }

    pub fn add_listener<L: EventListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener) as Box<dyn EventListener>)
    }

    pub fn add_boxed(&mut self, listener: Box<dyn EventListener>) {
        self.listeners.push(listener)
    }

    pub fn take(&mut self) -> Vec<Box<dyn EventListener>> {
        std::mem::take(&mut self.listeners)
    }

    pub fn dispatch(&mut self, event: Event) {
        for listener in &mut self.listeners {
            listener.event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(move |e: &Event| sink.lock().unwrap().push(e.clone()));
        dispatcher.dispatch(Event::Halted);

        assert_eq!(*seen.lock().unwrap(), vec![Event::Halted]);
    }

    #[test]
    fn test_channel_listener() {
        let (tx, rx) = channel();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(tx);
        dispatcher.dispatch(Event::Output { value: 7 });

        assert_eq!(rx.try_recv(), Ok(Event::Output { value: 7 }));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = channel();
        drop(rx);
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(tx);
        dispatcher.dispatch(Event::InputRequested);
    }

    #[test]
    fn test_log_line_display() {
        let line = LogLine {
            clock: 3,
            description: "AR <- PC".into(),
            value: "0000000000001".into(),
        };
        let text = line.to_string();
        assert!(text.contains("AR <- PC"));
        assert!(text.ends_with("0000000000001"));
    }
}
