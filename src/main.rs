//! TRN Emulator - CLI Entry Point
//!
//! Commands:
//! - `trn-emu run <program>` - Run an assembly source or memory image
//! - `trn-emu debug <program>` - Interactive stepper
//! - `trn-emu asm <source>` - Assemble to a memory image
//! - `trn-emu disasm <image>` - Disassemble a memory image

use clap::{Parser, Subcommand};
use slog::Logger;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use trn::config::{EmulatorConfig, LogLevel};
use trn::cpu::{Controller, Event, Registers, Termination};
use trn::isa::word;
use trn::Memory;

#[derive(Parser)]
#[command(name = "trn-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An assembler and cycle-level emulator for the 20-bit TRN computer")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<String>,
    /// Diagnostic log level (critical, error, warning, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the .asm source or memory image to execute
        program: String,
        /// Delay before every micro-step, in milliseconds
        #[arg(short, long)]
        delay: Option<u64>,
        /// Stop after this many clock cycles
        #[arg(short, long)]
        max_cycles: Option<u64>,
        /// Print every register transfer
        #[arg(short, long)]
        trace: bool,
        /// Print the final registers as JSON
        #[arg(long)]
        json: bool,
        /// Values for INP, used before reading stdin
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
        input: Vec<i64>,
    },
    /// Step through a program interactively
    Debug {
        /// Path to the .asm source or memory image
        program: String,
        /// Delay before every micro-step once resumed, in milliseconds
        #[arg(short, long)]
        delay: Option<u64>,
    },
    /// Assemble source to a memory image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a memory image to readable text
    Disasm {
        /// Path to the memory image
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match EmulatorConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => EmulatorConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    match cli.command {
        Some(Commands::Run {
            program,
            delay,
            max_cycles,
            trace,
            json,
            input,
        }) => {
            if let Some(delay) = delay {
                config.delay_ms = delay;
            }
            if max_cycles.is_some() {
                config.max_cycles = max_cycles;
            }
            run_program(&program, config, trace, json, input);
        }
        Some(Commands::Debug { program, delay }) => {
            if let Some(delay) = delay {
                config.delay_ms = delay;
            }
            debug_program(&program, config);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output, &config);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("TRN Emulator v0.1.0");
            println!("A 20-bit teaching computer");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Assemble `.asm` files, decode anything else as a memory image.
fn load_program(path: &str, logger: &Logger) -> Memory {
    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match trn::asm::assemble_with_logger(&source, logger.clone()) {
            Ok(memory) => {
                println!("📝 Assembled {} cells", memory.len());
                memory
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match trn::load_image(path) {
            Ok(memory) => {
                println!("📂 Loaded {} cells", memory.len());
                memory
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn format_word(value: u32) -> String {
    format!(
        "{} ({})",
        word::to_binary(value, word::WORD_BITS as usize),
        word::to_signed(value)
    )
}

/// Read one INP value from stdin.
fn prompt_input() -> Option<u32> {
    let stdin = io::stdin();
    loop {
        print!("⌨️  INP> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        match trn::asm::operand::parse_literal(line.trim()) {
            Some(value) => return Some(value as u32 & word::WORD_MASK),
            None => eprintln!("⚠️  Not a number: {}", line.trim()),
        }
    }
}

fn run_program(path: &str, config: EmulatorConfig, trace: bool, json: bool, input: Vec<i64>) {
    let logger = trn::logging::terminal(config.log_level);

    println!("🔧 Running: {}", path);
    let memory = load_program(path, &logger);

    let mut controller = Controller::with_logger(&config, logger);
    let events = controller.subscribe();
    if let Err(e) = controller.load(memory).and_then(|_| controller.start()) {
        eprintln!("❌ Failed to start: {}", e);
        std::process::exit(1);
    }

    println!();
    println!("━━━ Execution ━━━");

    let mut inputs = input.into_iter().map(|v| v as u32 & word::WORD_MASK);

    loop {
        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => handle_event(event, &controller, &mut inputs, trace),
            Err(RecvTimeoutError::Timeout) if controller.is_running() => {}
            Err(_) => {
                for event in events.try_iter() {
                    handle_event(event, &controller, &mut inputs, trace);
                }
                break;
            }
        }
    }

    let outcome = match controller.wait() {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!();
    println!("━━━ Result ━━━");
    match &outcome.result {
        Ok(Termination::Halted) => println!("State: halted"),
        Ok(Termination::Interrupted) => println!("State: interrupted"),
        Ok(Termination::CycleLimit) => println!("State: cycle limit reached"),
        Err(e) => println!("State: error ({})", e),
    }
    print_registers(&outcome.cpu.regs);

    if json {
        match serde_json::to_string_pretty(&outcome.cpu.regs) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("❌ Failed to serialize registers: {}", e),
        }
    }

    if let Ok(Termination::CycleLimit) = outcome.result {
        println!();
        println!("⚠️  Reached max cycles limit. Use --max-cycles to increase.");
    }
    if outcome.result.is_err() {
        std::process::exit(1);
    }
}

fn handle_event(
    event: Event,
    controller: &Controller,
    inputs: &mut impl Iterator<Item = u32>,
    trace: bool,
) {
    match event {
        Event::Output { value } => println!("📤 OUT {}", format_word(value)),
        Event::InputRequested => match inputs.next().or_else(prompt_input) {
            Some(value) => controller.set_input(value),
            None => {
                eprintln!("⚠️  No more input, stopping");
                controller.request_interruption();
            }
        },
        Event::Log(line) if trace => println!("{}", line),
        Event::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }
}

fn print_registers(regs: &Registers) {
    println!("Clock: {}", regs.clock);
    println!("A:  {}", format_word(regs.a));
    println!("X:  {}", format_word(regs.x));
    println!("BR: {}", format_word(regs.br));
    println!("IR: {}", format_word(regs.ir));
    println!("PC: {:<5} SP: {:<5} I: {:<5} AR: {}", regs.pc, regs.sp, regs.i, regs.ar);
    println!(
        "V={} Z={} S={} H={}",
        regs.v as u8, regs.z as u8, regs.s as u8, regs.h as u8
    );
}

fn print_events(events: Receiver<Event>) {
    for event in events {
        match event {
            Event::Log(line) => println!("{}", line),
            Event::Output { value } => println!("📤 OUT {}", format_word(value)),
            Event::InputRequested => println!("⌨️  INP waiting, use `i <value>`"),
            Event::Error { message } => println!("❌ {}", message),
            Event::Halted => println!("⏹  Halted"),
            _ => {}
        }
    }
}

fn debug_program(path: &str, mut config: EmulatorConfig) {
    let logger = trn::logging::terminal(config.log_level);

    println!("🔍 Loading: {}", path);
    let memory = load_program(path, &logger);

    config.start_paused = true;
    let mut controller = Controller::with_logger(&config, logger);
    let events = controller.subscribe();
    let printer = thread::spawn(move || print_events(events));

    if let Err(e) = controller.load(memory).and_then(|_| controller.start()) {
        eprintln!("❌ Failed to start: {}", e);
        std::process::exit(1);
    }

    println!("Commands: s = step, c = continue, p = pause, q = quit");
    println!("          i <n> = input, d <ms> = delay");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.split_whitespace();

        match (parts.next(), parts.next()) {
            (Some("s"), _) => {
                if !controller.step() {
                    println!("Not paused");
                }
            }
            (Some("c"), _) => controller.resume(),
            (Some("p"), _) => controller.pause(),
            (Some("i"), Some(value)) => match trn::asm::operand::parse_literal(value) {
                Some(value) => controller.set_input(value as u32 & word::WORD_MASK),
                None => println!("Not a number: {}", value),
            },
            (Some("d"), Some(ms)) => match ms.parse() {
                Ok(ms) => controller.set_delay(ms),
                Err(_) => println!("Not a delay: {}", ms),
            },
            (Some("q"), _) => {
                controller.request_interruption();
                break;
            }
            (None, _) => {}
            _ => println!("Unknown command: {}", line),
        }

        if !controller.is_running() {
            break;
        }
    }

    controller.request_interruption();
    match controller.wait() {
        Ok(outcome) => {
            println!();
            print_registers(&outcome.cpu.regs);
        }
        Err(e) => eprintln!("❌ {}", e),
    }

    // Dropping the controller releases the event channel.
    drop(controller);
    let _ = printer.join();
}

fn assemble_file(source_path: &str, output: Option<String>, config: &EmulatorConfig) {
    let logger = trn::logging::terminal(config.log_level);

    let out_path = output.unwrap_or_else(|| {
        std::path::Path::new(source_path)
            .with_extension("mif")
            .to_string_lossy()
            .into_owned()
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let memory = match trn::asm::assemble_with_logger(&source, logger) {
        Ok(memory) => memory,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} cells", memory.len());

    if let Err(e) = trn::save_image(&out_path, &memory) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    println!("📖 Disassembling: {}", image_path);
    println!();

    let memory = match trn::load_image(image_path) {
        Ok(memory) => memory,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", trn::disassemble(&memory));
}

fn run_self_test() {
    use trn::asm::image;
    use trn::cpu::{Cpu, Tick};

    println!("━━━ TRN Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool| {
        print!("{}... ", name);
        if ok {
            println!("✓");
            passed += 1;
        } else {
            println!("✗");
            failed += 1;
        }
    };

    let run = |source: &str, input: Option<u32>| -> Option<Cpu> {
        let memory = trn::assemble(source).ok()?;
        let mut cpu = Cpu::new(memory);
        if let Some(value) = input {
            cpu.set_input(value);
        }
        match cpu.run_limited(10_000) {
            Ok(Tick::Halted) => Some(cpu),
            _ => None,
        }
    };

    let cpu = run("NAM T\nHLT\nEND", None);
    check("Halt instruction", cpu.map_or(false, |c| c.regs.h && c.regs.clock == 2));

    let cpu = run("NAM T\nLDA A\nADA B\nSUB C\nHLT\nA: CON 10\nB: CON 5\nC: CON 3\nEND", None);
    check("Load/add/subtract", cpu.map_or(false, |c| c.regs.a == 12));

    let source = "NAM T\nENI 10\nLOOP: ADA ONE\nDCI\nJIG LOOP\nHLT\nONE: CON 1\nEND";
    let cpu = run(source, None);
    check("Counting loop", cpu.map_or(false, |c| c.regs.a == 3 && c.regs.i == 7));

    let source = "NAM T\nLSP BASE\nJSR SUBR\nHLT\nSUBR: ENA 7\nRET\nBASE: CON 6\nRES 4\nEND";
    let cpu = run(source, None);
    check("Subroutine call", cpu.map_or(false, |c| c.regs.a == 7 && c.regs.sp == 6));

    let cpu = run("NAM T\nINP\nSHAL\nHLT\nEND", Some(21));
    check("Input and shift", cpu.map_or(false, |c| c.regs.a == 42));

    let memory = Memory::from_words(vec![0, 1, 0xF_FFFF, 0x1234]);
    check(
        "Memory image round-trip",
        image::decode(&image::encode_to_string(&memory)).as_ref() == Ok(&memory),
    );

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
