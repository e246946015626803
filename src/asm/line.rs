//! Source line tokenizer.
//!
//! A line has the shape `[LABEL:] MNEMONIC[,I] [ARGS] [// comment]`.

/// A tokenized, non-blank source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine<'a> {
    /// Upper-cased label defined on this line.
    pub label: Option<String>,
    /// Upper-cased mnemonic, without the `,I` modifier.
    pub mnemonic: String,
    /// The mnemonic carried the `,I` (indexed) modifier.
    pub indexed: bool,
    /// Everything after the mnemonic, trimmed.
    pub args: &'a str,
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Remove a trailing `// comment`.
pub fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Tokenize one line.
///
/// Returns `Ok(None)` for blank and comment-only lines, and an error message
/// when no mnemonic can be extracted.
pub fn tokenize(line: &str) -> Result<Option<SourceLine<'_>>, String> {
    let line = strip_comment(line).trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (label, rest) = split_label(line)?;

    let letters = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    if letters == 0 {
        return Err(match label {
            Some(label) => format!("missing instruction after label {}", label),
            None => format!("expected instruction, found '{}'", rest),
        });
    }
    let mnemonic = rest[..letters].to_ascii_uppercase();
    let mut rest = &rest[letters..];

    let indexed = if rest.starts_with(",I") || rest.starts_with(",i") {
        rest = &rest[2..];
        true
    } else {
        false
    };

    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(format!("unexpected '{}' after {}", rest.trim(), mnemonic));
    }

    Ok(Some(SourceLine {
        label,
        mnemonic,
        indexed,
        args: rest.trim(),
    }))
}

fn split_label(line: &str) -> Result<(Option<String>, &str), String> {
    let Some(idx) = line.find(':') else {
        return Ok((None, line));
    };

    let candidate = line[..idx].trim();
    if is_identifier(candidate) {
        Ok((Some(candidate.to_ascii_uppercase()), line[idx + 1..].trim_start()))
    } else if candidate.is_empty() || !candidate.contains(char::is_whitespace) {
        Err(format!("invalid label '{}'", candidate))
    } else {
        // The colon belongs to the argument string.
        Ok((None, line))
    }
}
