use std::collections::BTreeMap;

use crate::ds::{Encoding, OperandLayout, MAX_WORD_WIDTH};
use crate::error::ErrorKind;

/// Parses an instruction pattern `<opcode bits>(<operand spec>)`.
///
/// An all-digit operand spec assigns each character position to the logical
/// operand named by its digit, so `01(1001)` carries operand 0 in the middle
/// two bits and operand 1 in the outer two. Any other spec only reserves the
/// field width and takes no operands.
pub(crate) fn parse_encoding(pattern: &str) -> Result<Encoding, ErrorKind> {
    let syntax = |message: &str| ErrorKind::Syntax(format!("{} in pattern '{}'", message, pattern));

    let (opcode_str, rest) = pattern
        .split_once('(')
        .ok_or_else(|| syntax("Missing '('"))?;
    let spec = rest
        .strip_suffix(')')
        .ok_or_else(|| syntax("Missing trailing ')'"))?;
    if spec.contains(['(', ')']) {
        return Err(syntax("Unbalanced parentheses"));
    }
    if opcode_str.is_empty() {
        return Err(syntax("Empty opcode"));
    }
    if !opcode_str.chars().all(|c| c == '0' || c == '1') {
        return Err(syntax(&format!("Opcode '{}' is not binary", opcode_str)));
    }

    let opcode_width = opcode_str.len();
    let operand_width = spec.chars().count();
    if opcode_width + operand_width > MAX_WORD_WIDTH {
        return Err(syntax(&format!(
            "Encoding is {} bits wide, at most {} are supported",
            opcode_width + operand_width,
            MAX_WORD_WIDTH
        )));
    }
    let opcode = u64::from_str_radix(opcode_str, 2)
        .map_err(|e| syntax(&format!("Invalid opcode '{}': {}", opcode_str, e)))?;

    let operands = if spec.chars().all(|c| c.is_ascii_digit()) {
        let mut slots: BTreeMap<char, Vec<u32>> = BTreeMap::new();
        for (i, digit) in spec.chars().enumerate() {
            slots
                .entry(digit)
                .or_default()
                .push((operand_width - i - 1) as u32);
        }
        OperandLayout::Scattered(slots.into_values().collect())
    } else {
        OperandLayout::Unmapped
    };

    Ok(Encoding {
        opcode,
        opcode_width,
        operands,
        operand_width,
    })
}
