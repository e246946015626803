//! Memory image format.
//!
//! A memory image is a simple text format:
//! - One cell per line: `<address>\t<value>`
//! - Both fields are binary digit strings
//! - Written images pad the address to 13 digits and the value to 20
//! - Blank lines are ignored; addresses may skip (gaps read as zero)

use crate::cpu::memory::Memory;
use crate::isa::word::{self, ADDRESS_BITS, WORD_BITS, WORD_MASK};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Parse a memory image.
pub fn decode(text: &str) -> Result<Memory, ImageError> {
    let mut memory = Memory::new();

    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 2 {
            return Err(ImageError::ParseError {
                line: line_num,
                message: format!("expected 2 tab-separated fields, found {}", fields.len()),
            });
        }

        let address = parse_binary(fields[0], u16::BITS, line_num, "address")? as usize;
        let value = parse_binary(fields[1], u32::BITS, line_num, "value")?;
        if value > WORD_MASK {
            return Err(ImageError::ParseError {
                line: line_num,
                message: format!("value wider than {} bits", WORD_BITS),
            });
        }

        memory.store(address, value);
    }

    Ok(memory)
}

fn parse_binary(field: &str, max_bits: u32, line: usize, what: &str) -> Result<u32, ImageError> {
    let field = field.trim();
    let malformed = || ImageError::ParseError {
        line,
        message: format!("could not parse {} '{}'", what, field),
    };

    if field.is_empty() || !field.chars().all(|c| c == '0' || c == '1') {
        return Err(malformed());
    }
    let digits = field.trim_start_matches('0');
    if digits.len() > max_bits as usize {
        return Err(malformed());
    }
    let value = if digits.is_empty() {
        0
    } else {
        u32::from_str_radix(digits, 2).map_err(|_| malformed())?
    };
    Ok(value)
}

/// Write a memory image, one line per cell.
///
/// On failure the error carries the 1-based index of the cell that could
/// not be written; lines written before it stay written.
pub fn encode<W: Write>(memory: &Memory, mut out: W) -> Result<(), ImageError> {
    for (i, value) in memory.words().iter().enumerate() {
        writeln!(
            out,
            "{}\t{}",
            word::to_binary(i as u32, ADDRESS_BITS as usize),
            word::to_binary(*value & WORD_MASK, WORD_BITS as usize)
        )
        .map_err(|e| ImageError::WriteError {
            index: i + 1,
            message: e.to_string(),
        })?;
    }
    Ok(())
}

/// Encode a memory image into a string.
pub fn encode_to_string(memory: &Memory) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = encode(memory, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Load a memory image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Memory, ImageError> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ImageError::IoError(e.to_string()))?;
    decode(&text)
}

/// Save a memory image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, memory: &Memory) -> Result<(), ImageError> {
    let file = std::fs::File::create(path.as_ref())
        .map_err(|e| ImageError::IoError(e.to_string()))?;
    let mut out = std::io::BufWriter::new(file);
    encode(memory, &mut out)?;
    out.flush().map_err(|e| ImageError::IoError(e.to_string()))
}

/// Errors that can occur while reading or writing memory images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("could not write cell {index}: {message}")]
    WriteError { index: usize, message: String },
}

impl ImageError {
    /// The failing line (decode) or 1-based cell index (encode).
    pub fn position(&self) -> Option<usize> {
        match self {
            ImageError::IoError(_) => None,
            ImageError::ParseError { line, .. } => Some(*line),
            ImageError::WriteError { index, .. } => Some(*index),
        }
    }
}
