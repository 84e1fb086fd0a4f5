//! One-instruction disassembly on top of the catalog.

use a64_decoder::{DecodeError, Fields};

use crate::catalog::{self, format, InstructionDef};

/// Find the catalog entry matching `word`.
pub fn decode(word: u32) -> Result<(&'static InstructionDef, Fields), DecodeError> {
    catalog::decode(word)
}

/// Render `word` as assembler text. Words that match no entry render as `.inst 0x...`.
pub fn disassemble(word: u32) -> String {
    match decode(word) {
        Ok((def, fields)) => (def.format)(&fields),
        Err(_) => format::inst(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_words_render_as_raw_data() {
        assert_eq!(disassemble(0x0000_0000), ".inst 0x00000000");
        assert_eq!(disassemble(0xffff_ffff), ".inst 0xffffffff");
    }

    #[test]
    fn decode_reports_the_word() {
        assert_eq!(
            decode(0).map(|(def, _)| def.mnemonic),
            Err(DecodeError::InvalidEncoding(0))
        );
        assert_eq!(decode(0xd503201f).map(|(def, _)| def.mnemonic), Ok("hint"));
    }
}
