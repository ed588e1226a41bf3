use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use tracing::{debug, info, warn};

use crate::bitfield::{build_mask, extract_bits};
use crate::ds::{InstructionEntry, InstructionTable, Section, Word};
use crate::encoding::parse_encoding;
use crate::error::{BitfieldError, ErrorKind, ParseError};
use crate::lexer::{token_lines, TokenLine};

/// Largest address word a ROM image is built for.
pub(crate) const MAX_ADDRESS_WIDTH: usize = 16;

#[derive(Debug, Clone)]
struct Declaration {
    line_number: usize,
    names: Vec<String>,
}

#[derive(Debug, Clone)]
struct PendingInstruction {
    line_number: usize,
    name: String,
    pattern: String,
    flags: Vec<String>,
    steps: Vec<TokenLine>,
}

/// Collects microcode declarations line by line. Names are only resolved in
/// [`MicrocodeBuilder::finish`], so sections may appear in any order.
#[derive(Debug, Default)]
pub(crate) struct MicrocodeBuilder {
    section: Option<Section>,
    words: HashMap<Section, Declaration>,
    fetch: Vec<TokenLine>,
    instructions: Vec<PendingInstruction>,
}

impl MicrocodeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn feed(&mut self, line: &TokenLine) -> Result<(), ParseError> {
        let err = |kind| ParseError::new(line.line_number, kind);

        if let Some(marker) = line.marker('@') {
            let section: Section = marker.parse().map_err(err)?;
            let args = &line.tokens[1..];
            debug!(line = line.line_number, %section, "entering section");
            match section {
                Section::Fetch => {
                    if !args.is_empty() {
                        warn!(line = line.line_number, "ignoring arguments of '@fetch'");
                    }
                }
                Section::Instruction => {
                    let name = args.first().ok_or_else(|| {
                        err(ErrorKind::Syntax(
                            "Missing instruction name after '@instruction'".to_string(),
                        ))
                    })?;
                    let pattern = args.get(1).ok_or_else(|| {
                        err(ErrorKind::Syntax(format!(
                            "Missing opcode pattern for instruction '{}'",
                            name
                        )))
                    })?;
                    self.instructions.push(PendingInstruction {
                        line_number: line.line_number,
                        name: name.clone(),
                        pattern: pattern.clone(),
                        flags: args[2..].to_vec(),
                        steps: Vec::new(),
                    });
                }
                word => {
                    if let Some(previous) = self.words.get(&word) {
                        return Err(err(ErrorKind::Configuration(format!(
                            "Section '{}' already declared on line {}",
                            word, previous.line_number
                        ))));
                    }
                    self.words.insert(
                        word,
                        Declaration {
                            line_number: line.line_number,
                            names: args.to_vec(),
                        },
                    );
                }
            }
            self.section = Some(section);
            return Ok(());
        }

        match self.section {
            None => {
                warn!(line = line.line_number, "ignoring microstep outside of a section");
            }
            Some(Section::Fetch) => self.fetch.push(line.clone()),
            Some(Section::Instruction) => {
                // A pending instruction always exists once this section is entered.
                if let Some(instruction) = self.instructions.last_mut() {
                    instruction.steps.push(line.clone());
                }
            }
            Some(word) => {
                warn!(
                    line = line.line_number,
                    section = %word,
                    "ignoring line after a single-line word declaration"
                );
            }
        }
        Ok(())
    }

    fn declaration(&self, section: Section) -> Result<&Declaration, ParseError> {
        self.words.get(&section).ok_or_else(|| {
            ParseError::Global(ErrorKind::Configuration(format!(
                "Missing '@{}' declaration",
                section
            )))
        })
    }

    fn word(&self, section: Section) -> Result<(&Declaration, Word), ParseError> {
        let decl = self.declaration(section)?;
        let word = Word::new(&decl.names).map_err(|e| ParseError::new(decl.line_number, e.into()))?;
        Ok((decl, word))
    }

    /// Lines of a subset word, each of which must be an address line.
    fn address_lines(&self, section: Section, address_word: &Word) -> Result<Vec<String>, ParseError> {
        let decl = self.declaration(section)?;
        let mut seen = HashSet::new();
        for name in &decl.names {
            address_word
                .position(name)
                .map_err(|e| ParseError::new(decl.line_number, e.into()))?;
            if !seen.insert(name) {
                warn!(
                    line = decl.line_number,
                    %section,
                    line_name = %name,
                    "address line selected twice, decoding cannot be inverted"
                );
            }
        }
        Ok(decl.names.clone())
    }

    /// Resolves every name and freezes the instruction table.
    pub(crate) fn finish(self) -> Result<CompiledMicrocode, ParseError> {
        let (_, control_word) = self.word(Section::ControlWord)?;
        let (addr_decl, address_word) = self.word(Section::AddressWord)?;
        if address_word.len() > MAX_ADDRESS_WIDTH {
            return Err(ParseError::new(
                addr_decl.line_number,
                ErrorKind::Configuration(format!(
                    "Address word has {} lines, at most {} are supported",
                    address_word.len(),
                    MAX_ADDRESS_WIDTH
                )),
            ));
        }
        let instruction_lines = self.address_lines(Section::AddressInstruction, &address_word)?;
        let operation_lines = self.address_lines(Section::AddressOperation, &address_word)?;

        let steps = |lines: &[TokenLine]| -> Result<Vec<u64>, ParseError> {
            lines
                .iter()
                .map(|line| {
                    build_mask(&control_word, &line.tokens)
                        .map_err(|e| ParseError::new(line.line_number, e.into()))
                })
                .collect()
        };

        let fetch = steps(&self.fetch)?;
        let mut table = InstructionTable::default();
        for pending in &self.instructions {
            let at = |kind| ParseError::new(pending.line_number, kind);
            let encoding = parse_encoding(&pending.pattern).map_err(at)?;
            let flags = build_mask(&address_word, &pending.flags).map_err(|e| at(e.into()))?;
            let entry = InstructionEntry {
                name: pending.name.clone(),
                encoding,
                flags,
                steps: steps(&pending.steps)?,
            };
            table.insert(entry).map_err(at)?;
        }

        info!(
            control_lines = control_word.len(),
            address_lines = address_word.len(),
            fetch_steps = fetch.len(),
            instructions = table.len(),
            "compiled microcode"
        );

        Ok(CompiledMicrocode {
            control_word,
            address_word,
            instruction_lines,
            operation_lines,
            fetch,
            table,
        })
    }
}

/// Lexes and compiles a whole microcode source.
pub(crate) fn compile<R: BufRead>(reader: R) -> Result<CompiledMicrocode, ParseError> {
    let mut builder = MicrocodeBuilder::new();
    for line in token_lines(reader)? {
        builder.feed(&line)?;
    }
    builder.finish()
}

/// What the control unit does at one ROM address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Microstep<'a> {
    pub(crate) instruction: Option<&'a InstructionEntry>,
    pub(crate) counter: u64,
    pub(crate) control: u64,
}

/// Immutable result of a microcode compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompiledMicrocode {
    control_word: Word,
    address_word: Word,
    instruction_lines: Vec<String>,
    operation_lines: Vec<String>,
    fetch: Vec<u64>,
    table: InstructionTable,
}

impl CompiledMicrocode {
    pub(crate) fn table(&self) -> &InstructionTable {
        &self.table
    }

    /// Number of ROM entries, one per address.
    pub(crate) fn address_space(&self) -> u64 {
        1 << self.address_word.len()
    }

    /// Bytes per ROM entry.
    pub(crate) fn entry_width(&self) -> usize {
        self.control_word.byte_width()
    }

    pub(crate) fn decode(&self, address: u64) -> Result<Microstep<'_>, BitfieldError> {
        let opcode = extract_bits(address, &self.address_word, &self.instruction_lines)?;
        let counter = extract_bits(address, &self.address_word, &self.operation_lines)?;
        let instruction = self.table.get(opcode);
        let control = match instruction {
            None => 0,
            Some(_) if counter < self.fetch.len() as u64 => self.fetch[counter as usize],
            Some(entry) => {
                let index = (counter - self.fetch.len() as u64) as usize;
                let gated = entry.flags == 0 || address & entry.flags != 0;
                match entry.steps.get(index) {
                    Some(&control) if gated => control,
                    _ => 0,
                }
            }
        };
        Ok(Microstep {
            instruction,
            counter,
            control,
        })
    }

    /// Big-endian control words for every address, in address order.
    pub(crate) fn rom_image(&self) -> Result<Vec<u8>, BitfieldError> {
        let width = self.entry_width();
        let mut rom = Vec::with_capacity(self.address_space() as usize * width);
        for address in 0..self.address_space() {
            let control = self.decode(address)?.control;
            rom.extend_from_slice(&control.to_be_bytes()[8 - width..]);
        }
        Ok(rom)
    }

    /// One human-readable line per address.
    pub(crate) fn listing(&self) -> Result<Vec<String>, BitfieldError> {
        let address_digits = self.address_word.len().max(1);
        let control_digits = self.control_word.len().max(1);
        (0..self.address_space())
            .map(|address| {
                let step = self.decode(address)?;
                let name = step.instruction.map(|e| e.name.as_str()).unwrap_or("");
                Ok::<_, BitfieldError>(format!(
                    "{:0aw$b}: {:6} [{:02}] {:0cw$b}",
                    address,
                    name,
                    step.counter,
                    step.control,
                    aw = address_digits,
                    cw = control_digits
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TINY: &str = r#"
        @control-word A B C
        @address-word X Y
        @address-instruction X
        @address-operation Y

        @fetch
        A

        @instruction INSTR 1(Y)
        B C
    "#;

    /// Helper function to compile the given input
    fn compile_input(input: &str) -> Result<CompiledMicrocode, ParseError> {
        compile(Cursor::new(input))
    }

    fn compile_error(input: &str) -> String {
        compile_input(input).unwrap_err().to_string()
    }

    #[test]
    fn test_rom_lookup_rule() {
        let ucode = compile_input(TINY).expect("Compiling failed");
        assert_eq!(ucode.address_space(), 4);
        assert_eq!(ucode.entry_width(), 1);
        // X=0 has no instruction, X=1 Y=0 fetches, X=1 Y=1 executes.
        assert_eq!(ucode.rom_image().unwrap(), vec![0b000, 0b000, 0b100, 0b011]);
    }

    #[test]
    fn test_sections_in_any_order() {
        let input = r#"
            @instruction INSTR 1(Y)
            B C
            @fetch
            A
            @address-operation Y
            @address-instruction X
            @address-word X Y
            @control-word A B C
        "#;
        let reordered = compile_input(input).expect("Compiling failed");
        let reference = compile_input(TINY).expect("Compiling failed");
        assert_eq!(reordered.rom_image().unwrap(), reference.rom_image().unwrap());
    }

    #[test]
    fn test_scrambled_address_lines() {
        // Opcode bits are O1 O0, counter bits are S1 S0, interleaved on the bus.
        let input = r#"
            @control-word A B C D E F G H I
            @address-word S0 O0 S1 O1
            @address-instruction O1 O0
            @address-operation S1 S0
            @fetch
            A
            B
            @instruction ADD 10()
            C
            D
            @instruction SUB 01()
            E
        "#;
        let ucode = compile_input(input).expect("Compiling failed");
        assert_eq!(ucode.entry_width(), 2);
        // ADD: O1=1 O0=0 -> 0b0001 | step bits; S1 S0 = counter.
        let addr = |op: u64, counter: u64| {
            ((counter & 1) << 3) | ((op & 1) << 2) | ((counter >> 1) << 1) | (op >> 1)
        };
        let step = ucode.decode(addr(0b10, 2)).unwrap();
        assert_eq!(step.instruction.map(|e| e.name.as_str()), Some("ADD"));
        assert_eq!(step.counter, 2);
        assert_eq!(step.control, 1 << 6);
        assert_eq!(ucode.decode(addr(0b10, 3)).unwrap().control, 1 << 5);
        assert_eq!(ucode.decode(addr(0b01, 0)).unwrap().control, 1 << 8);
        assert_eq!(ucode.decode(addr(0b01, 1)).unwrap().control, 1 << 7);
        assert_eq!(ucode.decode(addr(0b01, 2)).unwrap().control, 1 << 4);
        assert_eq!(ucode.decode(addr(0b01, 3)).unwrap().control, 0);
        assert_eq!(ucode.decode(addr(0b11, 0)).unwrap().control, 0);

        let rom = ucode.rom_image().unwrap();
        let a = addr(0b10, 2) as usize * 2;
        assert_eq!(&rom[a..a + 2], &[0x00, 0x40]);
        let a = addr(0b01, 0) as usize * 2;
        assert_eq!(&rom[a..a + 2], &[0x01, 0x00]);
    }

    #[test]
    fn test_flag_gated_instruction() {
        let input = r#"
            @control-word A B
            @address-word Z I S
            @address-instruction I
            @address-operation S
            @fetch
            A
            @instruction JZ 1() Z
            B
        "#;
        let ucode = compile_input(input).expect("Compiling failed");
        assert_eq!(ucode.table().lookup("JZ").map(|e| e.flags), Some(0b100));
        // Z I S
        assert_eq!(ucode.decode(0b010).unwrap().control, 0b10);
        assert_eq!(ucode.decode(0b110).unwrap().control, 0b10);
        assert_eq!(ucode.decode(0b011).unwrap().control, 0b00);
        assert_eq!(ucode.decode(0b111).unwrap().control, 0b01);
    }

    #[test]
    fn test_listing() {
        let ucode = compile_input(TINY).expect("Compiling failed");
        assert_eq!(
            ucode.listing().unwrap(),
            vec![
                "00:        [00] 000",
                "01:        [01] 000",
                "10: INSTR  [00] 100",
                "11: INSTR  [01] 011",
            ]
        );
    }

    #[test]
    fn test_error_unknown_section() {
        assert_eq!(
            compile_error("@control-word A\n@decode X"),
            "Error on line 2: 'decode' is not a valid section"
        );
    }

    #[test]
    fn test_error_reserved_instruction_table() {
        let err = compile_input("@instruction-table").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "Error on line 1: Section 'instruction-table' is reserved and cannot be declared"
        );
    }

    #[test]
    fn test_error_redeclared_word() {
        assert_eq!(
            compile_error("@control-word A B\n@fetch\nA\n@control-word C"),
            "Error on line 4: Section 'control-word' already declared on line 1"
        );
    }

    #[test]
    fn test_error_duplicate_opcode() {
        let input = format!("{}\n@instruction OTHER 1(Y)\nA", TINY);
        let err = compile_input(&input).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "Error on line 13: Opcode 1 of instruction 'OTHER' already used by 'INSTR'"
        );
    }

    #[test]
    fn test_error_duplicate_instruction_name() {
        let input = format!("{}\n@instruction INSTR 0(Y)\nA", TINY);
        assert_eq!(
            compile_error(&input),
            "Error on line 13: Instruction 'INSTR' defined more than once"
        );
    }

    #[test]
    fn test_error_undeclared_control_line() {
        let input = TINY.replace("B C", "B Q");
        assert_eq!(compile_error(&input), "Error on line 11: Undefined line 'Q'");
    }

    #[test]
    fn test_error_undeclared_flag_line() {
        let input = TINY.replace("1(Y)", "1(Y) Z");
        assert_eq!(compile_error(&input), "Error on line 10: Undefined line 'Z'");
    }

    #[test]
    fn test_error_operation_line_outside_address_word() {
        let input = TINY.replace("@address-operation Y", "@address-operation W");
        assert_eq!(compile_error(&input), "Error on line 5: Undefined line 'W'");
    }

    #[test]
    fn test_error_duplicate_line_in_word() {
        assert_eq!(
            compile_error("@control-word A A\n@address-word X\n@address-instruction X\n@address-operation"),
            "Error on line 1: Line 'A' declared more than once"
        );
    }

    #[test]
    fn test_duplicate_instruction_line_is_allowed() {
        let input = TINY.replace("@address-instruction X", "@address-instruction X X");
        let ucode = compile_input(&input).expect("Compiling failed");
        // X X reads 0b11 for X=1, which no instruction claims.
        assert_eq!(ucode.rom_image().unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_error_missing_word() {
        let input = TINY.replace("@address-operation Y", "");
        let err = compile_input(&input).unwrap_err();
        assert!(matches!(err, ParseError::Global(ErrorKind::Configuration(_))));
        assert_eq!(err.to_string(), "Error: Missing '@address-operation' declaration");
    }

    #[test]
    fn test_steps_outside_sequences_are_ignored() {
        let input = format!(
            "Q R\n{}",
            TINY.replace("@address-word X Y", "@address-word X Y\n        A B")
        );
        let ucode = compile_input(&input).expect("Compiling failed");
        let reference = compile_input(TINY).expect("Compiling failed");
        assert_eq!(ucode.rom_image().unwrap(), reference.rom_image().unwrap());
    }

    #[test]
    fn test_error_instruction_header() {
        assert_eq!(
            compile_error("@instruction"),
            "Error on line 1: Missing instruction name after '@instruction'"
        );
        let err = compile_input("@instruction NOP").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Syntax(_)));
        assert_eq!(
            err.to_string(),
            "Error on line 1: Missing opcode pattern for instruction 'NOP'"
        );
    }

    #[test]
    fn test_error_malformed_pattern() {
        let input = TINY.replace("1(Y)", "1Y");
        let err = compile_input(&input).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Syntax(_)));
        assert_eq!(err.to_string(), "Error on line 10: Missing '(' in pattern '1Y'");
    }

    #[test]
    fn test_error_address_word_too_wide() {
        let names: Vec<String> = (0..17).map(|i| format!("a{}", i)).collect();
        let input = format!(
            "@control-word A\n@address-word {}\n@address-instruction a0\n@address-operation a1",
            names.join(" ")
        );
        assert_eq!(
            compile_error(&input),
            "Error on line 2: Address word has 17 lines, at most 16 are supported"
        );
    }
}
