use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{BitfieldError, ErrorKind};

/// Widest word a mask can hold.
pub(crate) const MAX_WORD_WIDTH: usize = u64::BITS as usize;

/// Ordered, uniquely named bit lines. Position 0 is the most significant bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Word {
    lines: Vec<String>,
}

impl Word {
    pub(crate) fn new<S: AsRef<str>>(names: &[S]) -> Result<Self, BitfieldError> {
        if names.len() > MAX_WORD_WIDTH {
            return Err(BitfieldError::TooWide(names.len()));
        }
        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !seen.insert(name) {
                return Err(BitfieldError::DuplicateLine(name.to_string()));
            }
            lines.push(name.to_string());
        }
        Ok(Word { lines })
    }

    pub(crate) fn len(&self) -> usize {
        self.lines.len()
    }

    pub(crate) fn position(&self, name: &str) -> Result<usize, BitfieldError> {
        self.lines
            .iter()
            .position(|line| line == name)
            .ok_or_else(|| BitfieldError::UndefinedLine(name.to_string()))
    }

    /// Bytes needed to store one value of this word.
    pub(crate) fn byte_width(&self) -> usize {
        (self.lines.len() + 7) / 8
    }
}

/// Section markers of the microcode source (`@name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Section {
    ControlWord,
    AddressWord,
    AddressInstruction,
    AddressOperation,
    Fetch,
    Instruction,
}

impl Section {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Section::ControlWord => "control-word",
            Section::AddressWord => "address-word",
            Section::AddressInstruction => "address-instruction",
            Section::AddressOperation => "address-operation",
            Section::Fetch => "fetch",
            Section::Instruction => "instruction",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Section {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control-word" => Ok(Section::ControlWord),
            "address-word" => Ok(Section::AddressWord),
            "address-instruction" => Ok(Section::AddressInstruction),
            "address-operation" => Ok(Section::AddressOperation),
            "fetch" => Ok(Section::Fetch),
            "instruction" => Ok(Section::Instruction),
            "instruction-table" => Err(ErrorKind::Configuration(
                "Section 'instruction-table' is reserved and cannot be declared".to_string(),
            )),
            _ => Err(ErrorKind::Configuration(format!(
                "'{}' is not a valid section",
                s
            ))),
        }
    }
}

/// Section markers of the assembly source (`.name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AsmSection {
    Text,
    Data,
}

impl FromStr for AsmSection {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(AsmSection::Text),
            "data" => Ok(AsmSection::Data),
            _ => Err(ErrorKind::Syntax(format!("'.{}' is not a valid section", s))),
        }
    }
}

/// How the operand field of an instruction is split into logical operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OperandLayout {
    /// One physical bit-offset list per logical operand, in operand order.
    Scattered(Vec<Vec<u32>>),
    /// No addressable operand bits; the field is always zero.
    Unmapped,
}

/// Opcode and operand field of an instruction pattern such as `0101(0011)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Encoding {
    pub(crate) opcode: u64,
    pub(crate) opcode_width: usize,
    pub(crate) operands: OperandLayout,
    pub(crate) operand_width: usize,
}

impl Encoding {
    pub(crate) fn operand_count(&self) -> usize {
        match &self.operands {
            OperandLayout::Scattered(slots) => slots.len(),
            OperandLayout::Unmapped => 0,
        }
    }

    pub(crate) fn total_width(&self) -> usize {
        self.opcode_width + self.operand_width
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstructionEntry {
    pub(crate) name: String,
    pub(crate) encoding: Encoding,
    /// Address-word lines gating the microsteps; 0 means unconditional.
    pub(crate) flags: u64,
    pub(crate) steps: Vec<u64>,
}

/// Instructions keyed by opcode value, with a mnemonic index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct InstructionTable {
    by_opcode: BTreeMap<u64, InstructionEntry>,
    by_name: HashMap<String, u64>,
}

impl InstructionTable {
    pub(crate) fn insert(&mut self, entry: InstructionEntry) -> Result<(), ErrorKind> {
        if self.by_name.contains_key(&entry.name) {
            return Err(ErrorKind::Configuration(format!(
                "Instruction '{}' defined more than once",
                entry.name
            )));
        }
        let opcode = entry.encoding.opcode;
        if let Some(existing) = self.by_opcode.get(&opcode) {
            return Err(ErrorKind::Configuration(format!(
                "Opcode {:b} of instruction '{}' already used by '{}'",
                opcode, entry.name, existing.name
            )));
        }
        self.by_name.insert(entry.name.clone(), opcode);
        self.by_opcode.insert(opcode, entry);
        Ok(())
    }

    pub(crate) fn get(&self, opcode: u64) -> Option<&InstructionEntry> {
        self.by_opcode.get(&opcode)
    }

    pub(crate) fn lookup(&self, mnemonic: &str) -> Option<&InstructionEntry> {
        self.by_name
            .get(mnemonic)
            .and_then(|opcode| self.by_opcode.get(opcode))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_opcode.len()
    }
}
