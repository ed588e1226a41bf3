use std::io::BufRead;

use tracing::{debug, info, warn};

use crate::bitfield::{low_mask, scatter_bits};
use crate::ds::{AsmSection, InstructionEntry, InstructionTable, OperandLayout};
use crate::error::{ErrorKind, ParseError};
use crate::lexer::{token_lines, TokenLine};

/// Parses an integer literal with an optional sign and `0x`/`0o`/`0b` prefix.
///
/// Negative values come back in two's complement so callers can mask them.
pub(crate) fn parse_literal(token: &str) -> Result<u64, ErrorKind> {
    let invalid = || ErrorKind::Syntax(format!("Invalid integer literal '{}'", token));

    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let body = body.to_ascii_lowercase();
    let (radix, digits) = if let Some(digits) = body.strip_prefix("0x") {
        (16, digits)
    } else if let Some(digits) = body.strip_prefix("0o") {
        (8, digits)
    } else if let Some(digits) = body.strip_prefix("0b") {
        (2, digits)
    } else {
        (10, body.as_str())
    };
    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }
    let magnitude = u64::from_str_radix(&digits, radix).map_err(|_| invalid())?;
    Ok(if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    })
}

/// Encodes one instruction and its operand literals as big-endian bytes.
///
/// Literals wider than their operand slot are truncated to the slot width.
/// Encodings that are not a whole number of bytes are right-aligned in
/// `ceil(width / 8)` bytes with a warning rather than rejected, so `0000()`
/// still assembles to a single byte.
pub(crate) fn encode_instruction(
    entry: &InstructionEntry,
    operands: &[String],
) -> Result<Vec<u8>, ErrorKind> {
    let enc = &entry.encoding;
    let expected = enc.operand_count();
    if operands.len() < expected {
        return Err(ErrorKind::Semantic(format!(
            "Instruction '{}' expects {} operands, found {}",
            entry.name,
            expected,
            operands.len()
        )));
    }
    if operands.len() > expected {
        warn!(
            instruction = %entry.name,
            extra = operands.len() - expected,
            "ignoring extra operands"
        );
    }

    let field = match &enc.operands {
        OperandLayout::Scattered(slots) => {
            slots
                .iter()
                .zip(operands)
                .try_fold(0, |field, (offsets, token)| {
                    let value = parse_literal(token)? & low_mask(offsets.len());
                    Ok::<_, ErrorKind>(field | scatter_bits(value, offsets))
                })?
        }
        OperandLayout::Unmapped => 0,
    } & low_mask(enc.operand_width);

    let opcode = enc.opcode & low_mask(enc.opcode_width);
    let word = (opcode << enc.operand_width) | field;
    let width = enc.total_width();
    if width % 8 != 0 {
        warn!(instruction = %entry.name, width, "encoding is not a whole number of bytes");
    }
    let bytes = (width + 7) / 8;
    Ok(word.to_be_bytes()[8 - bytes..].to_vec())
}

/// Machine code produced from one assembly source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Assembly {
    bytes: Vec<u8>,
}

impl Assembly {
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `index: binary` for every emitted byte.
    pub(crate) fn dump(&self) -> Vec<String> {
        self.bytes
            .iter()
            .enumerate()
            .map(|(i, byte)| format!("{:04}: {:08b}", i, byte))
            .collect()
    }
}

/// Accumulates machine code; nothing is handed out until every line assembled.
#[derive(Debug)]
pub(crate) struct Assembler<'a> {
    table: &'a InstructionTable,
    section: Option<AsmSection>,
    bytes: Vec<u8>,
}

impl<'a> Assembler<'a> {
    pub(crate) fn new(table: &'a InstructionTable) -> Self {
        Assembler {
            table,
            section: None,
            bytes: Vec::new(),
        }
    }

    pub(crate) fn feed(&mut self, line: &TokenLine) -> Result<(), ParseError> {
        let err = |kind| ParseError::new(line.line_number, kind);

        if let Some(marker) = line.marker('.') {
            self.section = match marker.parse::<AsmSection>() {
                Ok(section) => {
                    debug!(line = line.line_number, ?section, "entering section");
                    Some(section)
                }
                Err(e) => {
                    warn!(line = line.line_number, "{}, skipping its statements", e);
                    None
                }
            };
            if line.tokens.len() > 1 {
                warn!(line = line.line_number, "ignoring arguments of '.{}'", marker);
            }
            return Ok(());
        }

        match self.section {
            None => {
                warn!(line = line.line_number, "ignoring statement outside of a section");
            }
            Some(AsmSection::Text) => {
                let mnemonic = &line.tokens[0];
                let entry = self.table.lookup(mnemonic).ok_or_else(|| {
                    err(ErrorKind::Semantic(format!(
                        "Unknown instruction '{}'",
                        mnemonic
                    )))
                })?;
                let encoded = encode_instruction(entry, &line.tokens[1..]).map_err(err)?;
                self.bytes.extend(encoded);
            }
            Some(AsmSection::Data) => {
                for token in &line.tokens {
                    let value = parse_literal(token).map_err(err)?;
                    self.bytes.push((value & 0xff) as u8);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Assembly {
        info!(bytes = self.bytes.len(), "assembled program");
        Assembly { bytes: self.bytes }
    }
}

/// Lexes and assembles a whole source against `table`.
pub(crate) fn assemble<R: BufRead>(
    table: &InstructionTable,
    reader: R,
) -> Result<Assembly, ParseError> {
    let mut assembler = Assembler::new(table);
    for line in token_lines(reader)? {
        assembler.feed(&line)?;
    }
    Ok(assembler.finish())
}
