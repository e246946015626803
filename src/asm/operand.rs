//! Argument parsing.
//!
//! Arguments are comma separated. Each one is a decimal literal (with an
//! optional sign), a `$`-prefixed hexadecimal literal, or, when it is the
//! only argument, a label expression such as `TABLE+2+OFFSET`.

use crate::asm::assembler::AssemblerError;
use crate::asm::line::is_identifier;

/// A label expression waiting for pass 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelExpr {
    /// Referenced labels, upper-cased, in source order.
    pub labels: Vec<String>,
    /// Sum of the numeric terms.
    pub partial: i64,
}

/// One parsed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(i64),
    Expression(LabelExpr),
}

/// The parsed argument string of one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    /// The arguments were wrapped in parentheses.
    pub indirect: bool,
    pub values: Vec<Operand>,
}

/// Parse a numeric literal.
pub fn parse_literal(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix('$') {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        return i64::from_str_radix(hex, 16).ok();
    }
    text.parse::<i64>().ok()
}

/// Parse an argument string.
pub fn parse_arguments(args: &str, line: usize) -> Result<Arguments, AssemblerError> {
    let mut args = args.trim();
    let mut indirect = false;

    if args.starts_with('(') && args.ends_with(')') && args.len() >= 2 {
        args = args[1..args.len() - 1].trim();
        indirect = true;
    }

    if args.is_empty() {
        return Ok(Arguments {
            indirect,
            values: Vec::new(),
        });
    }

    let pieces: Vec<&str> = args.split(',').map(str::trim).collect();
    let sole = pieces.len() == 1;

    let mut values = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if let Some(value) = parse_literal(piece) {
            values.push(Operand::Literal(value));
            continue;
        }

        let starts_numeric = piece.starts_with(|c: char| c.is_ascii_digit() || c == '$');
        if sole && !piece.is_empty() && !starts_numeric {
            values.push(Operand::Expression(parse_label_expr(piece, line)?));
        } else {
            return Err(AssemblerError::InvalidArgument {
                line,
                argument: piece.to_string(),
            });
        }
    }

    Ok(Arguments { indirect, values })
}

/// Parse `TERM+TERM+...` where each term is a decimal literal or a label.
pub fn parse_label_expr(text: &str, line: usize) -> Result<LabelExpr, AssemblerError> {
    let mut expr = LabelExpr {
        labels: Vec::new(),
        partial: 0,
    };

    for term in text.split('+').map(str::trim) {
        if let Ok(value) = term.parse::<i64>() {
            expr.partial = expr.partial.wrapping_add(value);
        } else if term.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(AssemblerError::LabelStartsWithDigit {
                line,
                label: term.to_string(),
            });
        } else if is_identifier(term) {
            expr.labels.push(term.to_ascii_uppercase());
        } else {
            return Err(AssemblerError::InvalidArgument {
                line,
                argument: text.to_string(),
            });
        }
    }

    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(parse_literal("42"), Some(42));
        assert_eq!(parse_literal("-7"), Some(-7));
        assert_eq!(parse_literal("+7"), Some(7));
        assert_eq!(parse_literal("$1F"), Some(31));
        assert_eq!(parse_literal("$"), None);
        assert_eq!(parse_literal("$-1"), None);
        assert_eq!(parse_literal("LOOP"), None);
    }

    #[test]
    fn test_indirect() {
        let args = parse_arguments("(12)", 1).unwrap();
        assert!(args.indirect);
        assert_eq!(args.values, vec![Operand::Literal(12)]);
    }

    #[test]
    fn test_list() {
        let args = parse_arguments("5, 10,$F", 1).unwrap();
        assert_eq!(
            args.values,
            vec![Operand::Literal(5), Operand::Literal(10), Operand::Literal(15)]
        );
    }

    #[test]
    fn test_label_expression() {
        let args = parse_arguments("table+2+count+-1", 3).unwrap();
        assert_eq!(
            args.values,
            vec![Operand::Expression(LabelExpr {
                labels: vec!["TABLE".into(), "COUNT".into()],
                partial: 1,
            })]
        );
    }

    #[test]
    fn test_label_in_list_is_invalid() {
        assert!(matches!(
            parse_arguments("1,LOOP", 4),
            Err(AssemblerError::InvalidArgument { line: 4, .. })
        ));
    }

    #[test]
    fn test_malformed_numbers() {
        assert!(matches!(
            parse_arguments("12AB", 2),
            Err(AssemblerError::InvalidArgument { line: 2, .. })
        ));
        assert!(matches!(
            parse_arguments("$XYZ", 2),
            Err(AssemblerError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_label_term_starting_with_digit() {
        assert_eq!(
            parse_arguments("LOOP+2X", 9),
            Err(AssemblerError::LabelStartsWithDigit {
                line: 9,
                label: "2X".into()
            })
        );
    }
}
