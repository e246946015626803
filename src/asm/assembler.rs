//! Two-pass assembler for TRN programs.
//!
//! Syntax:
//! ```text
//! // Comment
//!         NAM DEMO        // Open a program
//! START:  LDA VALUE       // Load from a label
//!         LDA,I 4         // Indexed: address 4 + I
//!         LDA (PTR)       // Indirect through PTR
//!         ADA $1F         // Hexadecimal literal
//!         JMP START+2     // Label expression
//!         HLT
//!         ORG 100         // Move the write cursor
//! VALUE:  CON 5,10,15     // Constants
//! BUF:    RES 4           // Reserve cells
//!         END
//! ```
//!
//! Pass 1 tokenizes every line, emits words and records operands that name
//! labels. Pass 2 patches those operands once every label is known.

use crate::asm::line::{self, SourceLine};
use crate::asm::operand::{self, Arguments, Operand};
use crate::asm::symbols::{DeferredLabel, SymbolTable};
use crate::cpu::memory::Memory;
use crate::isa::opcodes::{mnemonic_to_opcode, mnemonic_to_subcode, Opcode};
use crate::isa::word::{self, ADDRESS_MASK, ADDRESS_SPACE, WORD_MASK};
use crate::logging;
use slog::{debug, o, trace, Logger};
use thiserror::Error;

/// Smallest and largest literal accepted in an instruction operand.
const OPERAND_MIN: i64 = -4096;
const OPERAND_MAX: i64 = 8191;

/// Assemble source code into a memory image.
pub fn assemble(source: &str) -> Result<Memory, AssemblerError> {
    assemble_with_logger(source, None)
}

/// Assemble source code, reporting progress to `logger`.
pub fn assemble_with_logger<L>(source: &str, logger: L) -> Result<Memory, AssemblerError>
where
    L: Into<Option<Logger>>,
{
    let logger = logging::resolve(logger).new(o!("stage" => "assembler"));

    let mut asm = Assembler::new(logger);
    asm.first_pass(source)?;
    asm.second_pass()?;

    debug!(asm.logger, "assembled";
        "cells" => asm.memory.len(),
        "labels" => asm.symbols.len());
    Ok(asm.memory)
}

/// The assembler state.
struct Assembler {
    /// Next address to write.
    cursor: usize,
    memory: Memory,
    symbols: SymbolTable,
    deferred: Vec<DeferredLabel>,
    /// Name of the open program, if any.
    program: Option<String>,
    logger: Logger,
}

impl Assembler {
    fn new(logger: Logger) -> Self {
        Self {
            cursor: 0,
            memory: Memory::new(),
            symbols: SymbolTable::new(),
            deferred: Vec::new(),
            program: None,
            logger,
        }
    }

    fn first_pass(&mut self, source: &str) -> Result<(), AssemblerError> {
        let mut last_line = 0;

        for (idx, text) in source.lines().enumerate() {
            let line = idx + 1;
            last_line = line;

            let parsed = line::tokenize(text)
                .map_err(|message| AssemblerError::SyntaxError { line, message })?;
            if let Some(parsed) = parsed {
                self.process_line(&parsed, line)?;
            }
        }

        if let Some(name) = &self.program {
            return Err(AssemblerError::UnclosedProgram {
                line: last_line,
                name: name.clone(),
            });
        }
        Ok(())
    }

    fn process_line(&mut self, src: &SourceLine, line: usize) -> Result<(), AssemblerError> {
        if self.program.is_none() && src.mnemonic != "NAM" {
            return Err(AssemblerError::ExpectedNam {
                line,
                mnemonic: src.mnemonic.clone(),
            });
        }

        if let Some(label) = &src.label {
            self.symbols
                .define(label, self.cursor as u32)
                .map_err(|_| AssemblerError::DuplicateLabel {
                    line,
                    label: label.clone(),
                })?;
            trace!(self.logger, "label defined"; "label" => label, "address" => self.cursor);
        }

        match mnemonic_to_opcode(&src.mnemonic) {
            Some(opcode) => {
                let args = operand::parse_arguments(src.args, line)?;
                self.emit_instruction(opcode, src, &args, line)
            }
            None => self.pseudo_operation(src, line),
        }
    }

    fn emit_instruction(
        &mut self,
        opcode: Opcode,
        src: &SourceLine,
        args: &Arguments,
        line: usize,
    ) -> Result<(), AssemblerError> {
        let field = if opcode.takes_operand() {
            match args.values.as_slice() {
                [Operand::Literal(value)] => {
                    if !(OPERAND_MIN..=OPERAND_MAX).contains(value) {
                        return Err(AssemblerError::ValueOutOfRange { line, value: *value });
                    }
                    (*value as u32) & ADDRESS_MASK
                }
                [Operand::Expression(expr)] => {
                    self.defer(expr, line);
                    0
                }
                [] => {
                    return Err(AssemblerError::MissingArgument {
                        line,
                        mnemonic: src.mnemonic.clone(),
                    })
                }
                _ => {
                    return Err(AssemblerError::InvalidArgument {
                        line,
                        argument: src.args.to_string(),
                    })
                }
            }
        } else {
            if !args.values.is_empty() {
                return Err(AssemblerError::InvalidArgument {
                    line,
                    argument: src.args.to_string(),
                });
            }
            mnemonic_to_subcode(&src.mnemonic).unwrap_or(0) as u32
        };

        let word = word::pack(opcode.bits(), args.indirect, src.indexed, field);
        self.emit(word, line)
    }

    fn pseudo_operation(&mut self, src: &SourceLine, line: usize) -> Result<(), AssemblerError> {
        let mnemonic = src.mnemonic.as_str();

        match mnemonic {
            "NAM" | "END" | "CON" | "RES" | "ORG" | "ENT" | "EXT" => {}
            _ => {
                return Err(AssemblerError::UnknownInstruction {
                    line,
                    mnemonic: src.mnemonic.clone(),
                })
            }
        }

        let indirect = src.args.starts_with('(') && src.args.ends_with(')');
        if src.indexed || (indirect && mnemonic != "END") {
            return Err(AssemblerError::InvalidArgument {
                line,
                argument: src.args.to_string(),
            });
        }

        match mnemonic {
            "NAM" => {
                if let Some(open) = &self.program {
                    return Err(AssemblerError::NestedProgram {
                        line,
                        name: open.clone(),
                    });
                }
                if src.args.is_empty() {
                    return Err(AssemblerError::MissingArgument {
                        line,
                        mnemonic: src.mnemonic.clone(),
                    });
                }
                debug!(self.logger, "program opened"; "name" => src.args, "line" => line);
                self.program = Some(src.args.to_string());
            }

            "END" => {
                self.program = None;
            }

            "CON" => {
                let args = operand::parse_arguments(src.args, line)?;
                if args.values.is_empty() {
                    return Err(AssemblerError::MissingArgument {
                        line,
                        mnemonic: src.mnemonic.clone(),
                    });
                }
                for value in &args.values {
                    match value {
                        Operand::Literal(value) => self.emit((*value as u32) & WORD_MASK, line)?,
                        Operand::Expression(expr) => {
                            self.defer(expr, line);
                            self.emit(0, line)?;
                        }
                    }
                }
            }

            "RES" => {
                let count = self.single_literal(src, line)?;
                if count < 0 || count > (ADDRESS_SPACE - self.cursor) as i64 {
                    return Err(AssemblerError::ValueOutOfRange { line, value: count });
                }
                self.cursor += count as usize;
                self.memory.ensure_len(self.cursor);
            }

            "ORG" => {
                let address = self.single_literal(src, line)?;
                if !(0..=ADDRESS_SPACE as i64).contains(&address) {
                    return Err(AssemblerError::ValueOutOfRange { line, value: address });
                }
                self.cursor = address as usize;
            }

            // ENT and EXT are accepted for compatibility.
            _ => {}
        }

        Ok(())
    }

    /// The single numeric argument of `RES` or `ORG`.
    fn single_literal(&self, src: &SourceLine, line: usize) -> Result<i64, AssemblerError> {
        let args = operand::parse_arguments(src.args, line)?;
        match args.values.as_slice() {
            [Operand::Literal(value)] => Ok(*value),
            [] => Err(AssemblerError::MissingArgument {
                line,
                mnemonic: src.mnemonic.clone(),
            }),
            _ => Err(AssemblerError::InvalidArgument {
                line,
                argument: src.args.to_string(),
            }),
        }
    }

    /// Record a label expression for the cell at the cursor.
    fn defer(&mut self, expr: &operand::LabelExpr, line: usize) {
        trace!(self.logger, "reference deferred";
            "labels" => expr.labels.join("+"),
            "partial" => expr.partial,
            "address" => self.cursor);
        self.deferred.push(DeferredLabel {
            labels: expr.labels.clone(),
            partial: expr.partial,
            patch_address: self.cursor,
            line,
        });
    }

    fn emit(&mut self, value: u32, line: usize) -> Result<(), AssemblerError> {
        if self.cursor >= ADDRESS_SPACE {
            return Err(AssemblerError::AddressOutOfRange {
                line,
                address: self.cursor,
            });
        }
        self.memory.store(self.cursor, value);
        self.cursor += 1;
        Ok(())
    }

    fn second_pass(&mut self) -> Result<(), AssemblerError> {
        for reference in &self.deferred {
            let sum = reference
                .resolve(&self.symbols)
                .map_err(|label| AssemblerError::UndefinedLabel { label })?;

            let address = reference.patch_address;
            let mut cell = self
                .memory
                .get(address)
                .ok_or(AssemblerError::PatchOutOfRange { address })?;

            cell |= (sum as u32) & ADDRESS_MASK;
            if sum < 0 {
                // Two's complement of the whole patched word.
                cell = (!cell).wrapping_add(1) & WORD_MASK;
            }
            self.memory.store(address, cell);

            trace!(self.logger, "reference patched";
                "address" => address,
                "value" => sum,
                "line" => reference.line);
        }

        for (label, address) in self.symbols.sorted() {
            trace!(self.logger, "symbol"; "label" => label, "address" => address);
        }
        Ok(())
    }
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown instruction on line {line}: {mnemonic}")]
    UnknownInstruction { line: usize, mnemonic: String },

    #[error("invalid argument on line {line}: '{argument}'")]
    InvalidArgument { line: usize, argument: String },

    #[error("missing argument on line {line}: {mnemonic} requires an argument")]
    MissingArgument { line: usize, mnemonic: String },

    #[error("label starts with a digit on line {line}: {label}")]
    LabelStartsWithDigit { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("address out of range on line {line}: {address}")]
    AddressOutOfRange { line: usize, address: usize },

    #[error("expected NAM on line {line}, found {mnemonic}")]
    ExpectedNam { line: usize, mnemonic: String },

    #[error("NAM on line {line} inside open program {name}")]
    NestedProgram { line: usize, name: String },

    #[error("unclosed program {name} at line {line}: missing END")]
    UnclosedProgram { line: usize, name: String },

    #[error("label not defined: {label}")]
    UndefinedLabel { label: String },

    #[error("label patch address out of range: {address}")]
    PatchOutOfRange { address: usize },
}

impl AssemblerError {
    /// The 1-based source line, if the error belongs to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            AssemblerError::SyntaxError { line, .. }
            | AssemblerError::UnknownInstruction { line, .. }
            | AssemblerError::InvalidArgument { line, .. }
            | AssemblerError::MissingArgument { line, .. }
            | AssemblerError::LabelStartsWithDigit { line, .. }
            | AssemblerError::DuplicateLabel { line, .. }
            | AssemblerError::ValueOutOfRange { line, .. }
            | AssemblerError::AddressOutOfRange { line, .. }
            | AssemblerError::ExpectedNam { line, .. }
            | AssemblerError::NestedProgram { line, .. }
            | AssemblerError::UnclosedProgram { line, .. } => Some(*line),
            AssemblerError::UndefinedLabel { .. } | AssemblerError::PatchOutOfRange { .. } => None,
        }
    }

    /// The source line, or -1 for errors found while resolving labels.
    pub fn line_number(&self) -> i64 {
        self.line().map_or(-1, |line| line as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::decode::{decode, Operation};
    use slog::{Drain, Level, Never, OwnedKVList, Record};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn wrap(body: &str) -> String {
        format!("NAM TEST\n{}\nEND\n", body)
    }

    #[test]
    fn test_assemble_simple() {
        let source = wrap(
            "
            LDA 10
            ADA 11
            STA 12
            HLT
            ",
        );

        let mem = assemble(&source).unwrap();
        assert_eq!(mem.len(), 4);
        assert_eq!(mem.words()[0], (1 << 15) | 10);
        assert_eq!(mem.words()[3], 31 << 15);
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(assemble("").unwrap(), Memory::new());
        assert_eq!(assemble("\n  \n// nothing\n").unwrap(), Memory::new());
    }

    #[test]
    fn test_modifiers() {
        let mem = assemble(&wrap("LDA,I (5)\nSTA (6)\nLDX,I 7")).unwrap();
        let words = mem.words();
        assert_eq!(words[0], (1 << 15) | (1 << 14) | (1 << 13) | 5);
        assert_eq!(words[1], (4 << 15) | (1 << 14) | 6);
        assert_eq!(words[2], (2 << 15) | (1 << 13) | 7);
    }

    #[test]
    fn test_subcodes() {
        let mem = assemble(&wrap("INA\nDCI\nSHXR\nSAXR\nINP\nOUTP\nOUT")).unwrap();
        let words = mem.words();
        assert_eq!(words[0], 10 << 15);
        assert_eq!(words[1], (10 << 15) | 5);
        assert_eq!(words[2], (26 << 15) | 3);
        assert_eq!(words[3], (28 << 15) | 1);
        assert_eq!(words[4], 29 << 15);
        assert_eq!(words[5], (29 << 15) | 1);
        assert_eq!(words[6], (29 << 15) | 1);
    }

    #[test]
    fn test_negative_and_hex_operands() {
        let mem = assemble(&wrap("ENA -1\nENA $1F")).unwrap();
        assert_eq!(mem.words()[0], (7 << 15) | 0x1FFF);
        assert_eq!(mem.words()[1], (7 << 15) | 0x1F);
    }

    #[test]
    fn test_operand_range() {
        assert_eq!(
            assemble(&wrap("LDA 8192")),
            Err(AssemblerError::ValueOutOfRange { line: 2, value: 8192 })
        );
        assert!(assemble(&wrap("ENA -4097")).is_err());
        assert!(assemble(&wrap("ENA -4096")).is_ok());
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let source = wrap(
            "
        START:  JMP END_
                NOP
        END_:   JMP START
            ",
        );
        let mem = assemble(&source).unwrap();
        assert_eq!(mem.words()[0], (19 << 15) | 2);
        assert_eq!(mem.words()[2], 19 << 15);
    }

    #[test]
    fn test_label_expression() {
        let mem = assemble(&wrap("LDA DATA+2\nHLT\nDATA: CON 1,2,3")).unwrap();
        let instr = decode(mem.words()[0]).unwrap();
        assert_eq!(instr.operation, Operation::Lda);
        assert_eq!(instr.operand, 4);
    }

    #[test]
    fn test_label_case_insensitive() {
        let mem = assemble(&wrap("jmp loop\nLoop: hlt")).unwrap();
        assert_eq!(mem.words()[0], (19 << 15) | 1);
    }

    #[test]
    fn test_con_writes_consecutive_cells() {
        let mem = assemble(&wrap("ORG 10\nCON 5,10,15\nHLT")).unwrap();
        assert_eq!(&mem.words()[10..14], &[5, 10, 15, 31 << 15]);
    }

    #[test]
    fn test_con_masks_to_word() {
        let mem = assemble(&wrap("CON -1,$1FFFFF")).unwrap();
        assert_eq!(mem.words(), &[WORD_MASK, WORD_MASK]);
    }

    #[test]
    fn test_con_label() {
        let mem = assemble(&wrap("PTR: CON TARGET\nTARGET: HLT")).unwrap();
        assert_eq!(mem.words()[0], 1);
    }

    #[test]
    fn test_res_advances_cursor() {
        let mem = assemble(&wrap("NOP\nRES 4\nHLT")).unwrap();
        assert_eq!(mem.len(), 6);
        assert_eq!(mem.words()[5], 31 << 15);
        assert_eq!(&mem.words()[1..5], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_res_keeps_existing_cells() {
        let mem = assemble(&wrap("CON 1,2,3\nORG 0\nRES 2\nCON 9")).unwrap();
        assert_eq!(mem.words(), &[1, 2, 9]);
    }

    #[test]
    fn test_org_does_not_grow() {
        let mem = assemble(&wrap("HLT\nORG 50")).unwrap();
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn test_ent_ext_ignored() {
        let mem = assemble(&wrap("ENT MAIN\nEXT LIB\nMAIN: HLT")).unwrap();
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn test_expected_nam() {
        assert_eq!(
            assemble("HLT\n"),
            Err(AssemblerError::ExpectedNam {
                line: 1,
                mnemonic: "HLT".into()
            })
        );
        // Code after END needs a new NAM.
        assert!(matches!(
            assemble("NAM A\nEND\nHLT"),
            Err(AssemblerError::ExpectedNam { line: 3, .. })
        ));
    }

    #[test]
    fn test_multiple_programs() {
        let mem = assemble("NAM A\nHLT\nEND\nNAM B\nNOP\nEND").unwrap();
        assert_eq!(mem.words(), &[31 << 15, 0]);
    }

    #[test]
    fn test_nested_nam() {
        assert!(matches!(
            assemble("NAM A\nNAM B\nEND"),
            Err(AssemblerError::NestedProgram { line: 2, .. })
        ));
    }

    #[test]
    fn test_nam_requires_name() {
        assert!(matches!(
            assemble("NAM\nEND"),
            Err(AssemblerError::MissingArgument { line: 1, .. })
        ));
    }

    #[test]
    fn test_unclosed_program() {
        let err = assemble("NAM A\nHLT").unwrap_err();
        assert_eq!(
            err,
            AssemblerError::UnclosedProgram {
                line: 2,
                name: "A".into()
            }
        );
        assert!(err.to_string().contains("unclosed program"));
    }

    #[test]
    fn test_unknown_instruction() {
        assert_eq!(
            assemble(&wrap("FOO 1")),
            Err(AssemblerError::UnknownInstruction {
                line: 2,
                mnemonic: "FOO".into()
            })
        );
    }

    #[test]
    fn test_missing_and_extra_arguments() {
        assert!(matches!(
            assemble(&wrap("LDA")),
            Err(AssemblerError::MissingArgument { line: 2, .. })
        ));
        assert!(matches!(
            assemble(&wrap("HLT 5")),
            Err(AssemblerError::InvalidArgument { line: 2, .. })
        ));
        assert!(matches!(
            assemble(&wrap("LDA 1,2")),
            Err(AssemblerError::InvalidArgument { line: 2, .. })
        ));
        assert!(matches!(
            assemble(&wrap("CON")),
            Err(AssemblerError::MissingArgument { line: 2, .. })
        ));
    }

    #[test]
    fn test_modifier_on_pseudo_op() {
        assert!(matches!(
            assemble(&wrap("CON,I 5")),
            Err(AssemblerError::InvalidArgument { line: 2, .. })
        ));
        assert!(matches!(
            assemble(&wrap("ORG (5)")),
            Err(AssemblerError::InvalidArgument { line: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_label() {
        assert_eq!(
            assemble(&wrap("X: NOP\nX: HLT")),
            Err(AssemblerError::DuplicateLabel {
                line: 3,
                label: "X".into()
            })
        );
    }

    #[test]
    fn test_undefined_label() {
        let err = assemble(&wrap("JMP NOWHERE")).unwrap_err();
        assert_eq!(
            err,
            AssemblerError::UndefinedLabel {
                label: "NOWHERE".into()
            }
        );
        assert_eq!(err.line_number(), -1);
    }

    #[test]
    fn test_syntax_error_line() {
        let err = assemble("NAM A\n\n  123\nEND").unwrap_err();
        assert!(matches!(err, AssemblerError::SyntaxError { line: 3, .. }));
        assert_eq!(err.line_number(), 3);
    }

    #[test]
    fn test_negative_label_sum_is_complemented() {
        // 0 + -2 = -2: the masked sum is OR'd in, then the word is negated.
        let mem = assemble(&wrap("START: JMP START+-2")).unwrap();
        let patched = (19 << 15) | ((-2i64 as u32) & ADDRESS_MASK);
        assert_eq!(mem.words()[0], (!patched).wrapping_add(1) & WORD_MASK);
    }

    #[test]
    fn test_comments() {
        let mem = assemble("NAM A // program\nHLT // stop\n// trailing\nEND").unwrap();
        assert_eq!(mem.words(), &[31 << 15]);
    }

    #[test]
    fn test_deterministic() {
        let source = wrap("LOOP: LDA DATA\nJPZ LOOP\nHLT\nDATA: CON 7");
        assert_eq!(assemble(&source), assemble(&source));
    }

    struct LevelCounter {
        trace: Arc<AtomicUsize>,
        debug: Arc<AtomicUsize>,
    }

    impl Drain for LevelCounter {
        type Ok = ();
        type Err = Never;

        fn log(&self, record: &Record, _: &OwnedKVList) -> Result<(), Never> {
            match record.level() {
                Level::Trace => self.trace.fetch_add(1, Ordering::SeqCst),
                Level::Debug => self.debug.fetch_add(1, Ordering::SeqCst),
                _ => 0,
            };
            Ok(())
        }
    }

    #[test]
    fn test_passes_emit_trace_records() {
        let trace = Arc::new(AtomicUsize::new(0));
        let debug = Arc::new(AtomicUsize::new(0));
        let drain = LevelCounter {
            trace: Arc::clone(&trace),
            debug: Arc::clone(&debug),
        };
        let logger = Logger::root(drain, o!());

        assemble_with_logger("NAM A\nL: JMP L\nEND", logger).unwrap();

        // Label defined, reference deferred, reference patched, symbol listed.
        assert_eq!(trace.load(Ordering::SeqCst), 4);
        assert_eq!(debug.load(Ordering::SeqCst), 2);
    }
}
