use super::{DecodedCode, InsnIndex};

/// Source of line numbers for instructions, used to locate verification failures
pub trait LineLookup {
    /// Source line of an instruction, if known
    fn line_of(&self, index: InsnIndex) -> Option<u32>;
}

impl<F: Fn(InsnIndex) -> Option<u32>> LineLookup for F {
    fn line_of(&self, index: InsnIndex) -> Option<u32> {
        self(index)
    }
}

/// Line number table, keyed by instruction index
///
/// Each entry marks the start of a run of instructions on one line, and applies until the next
/// entry. Instructions before the first entry have no line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineNumbers {
    /// Sorted by instruction index
    entries: Vec<(InsnIndex, u32)>,
}

impl LineNumbers {
    pub fn new(mut entries: Vec<(InsnIndex, u32)>) -> LineNumbers {
        entries.sort_by_key(|(index, _)| *index);
        LineNumbers { entries }
    }

    /// Translate a `LineNumberTable` attribute, given as `(start_pc, line_number)` pairs
    ///
    /// Entries whose `start_pc` is not the start of an instruction are dropped.
    pub fn from_byte_offsets(table: &[(u16, u16)], code: &DecodedCode) -> LineNumbers {
        let entries = table
            .iter()
            .filter_map(|(start_pc, line)| {
                let index = code.index_of(*start_pc as u32);
                if index.is_none() {
                    log::warn!("Dropping line number entry at invalid offset {}", start_pc);
                }
                Some((index?, *line as u32))
            })
            .collect();
        LineNumbers::new(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LineLookup for LineNumbers {
    fn line_of(&self, index: InsnIndex) -> Option<u32> {
        let after = self.entries.partition_point(|(start, _)| *start <= index);
        after.checked_sub(1).map(|entry| self.entries[entry].1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{decode_code, ConstantTable};

    #[test]
    fn runs_of_lines() {
        let lines = LineNumbers::new(vec![(4, 12), (1, 10)]);
        assert_eq!(lines.line_of(0), None);
        assert_eq!(lines.line_of(1), Some(10));
        assert_eq!(lines.line_of(3), Some(10));
        assert_eq!(lines.line_of(4), Some(12));
        assert_eq!(lines.line_of(400), Some(12));
        assert_eq!(LineNumbers::default().line_of(0), None);
    }

    #[test]
    fn closures_as_lookups() {
        let lookup = |index: InsnIndex| Some(index as u32 * 2);
        assert_eq!(lookup.line_of(3), Some(6));
    }

    #[test]
    fn byte_offset_table() {
        // bipush 1, iconst_2, iadd, ireturn
        let code = decode_code(&[0x10, 0x01, 0x05, 0x60, 0xac], &ConstantTable::new()).unwrap();
        let lines = LineNumbers::from_byte_offsets(&[(0, 7), (1, 99), (3, 8)], &code);
        assert_eq!(lines.line_of(0), Some(7));
        assert_eq!(lines.line_of(1), Some(7));
        assert_eq!(lines.line_of(2), Some(8));
        assert_eq!(lines.line_of(3), Some(8));
    }
}
