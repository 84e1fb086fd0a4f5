//! The A64 instruction catalog: encoding pattern, assembler formatter and IR emitter for every
//! supported instruction.
//!
//! Entries are tried in declaration order; aliases (`mov`, `cmp`, `lsl`, ...) are chosen by the
//! formatters rather than by separate entries, so one entry covers an encoding and all of its
//! preferred spellings.

use std::sync::OnceLock;

use a64_decoder::{Constraint, DecodeError, DecodeTable, Fields, Pattern};

use crate::ctx::CompileCtx;
use crate::error::JitError;

mod branch;
mod data_imm;
mod data_reg;
mod emit;
pub mod format;
mod load_store;
mod system;

pub type FormatFn = fn(&Fields) -> String;
pub type EmitFn = fn(&mut CompileCtx<'_>, &Fields) -> Result<(), JitError>;

pub struct InstructionDef {
    pub mnemonic: &'static str,
    pub format: FormatFn,
    /// `None` for instructions that decode and disassemble but cannot be compiled.
    pub emit: Option<EmitFn>,
}

impl std::fmt::Debug for InstructionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionDef")
            .field("mnemonic", &self.mnemonic)
            .field("compiles", &self.emit.is_some())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct Builder {
    entries: Vec<(Pattern, InstructionDef)>,
}

impl Builder {
    fn push(
        &mut self,
        mnemonic: &'static str,
        pattern: &'static str,
        format: FormatFn,
        emit: Option<EmitFn>,
    ) -> Entry<'_> {
        let pattern = Pattern::parse(pattern)
            .unwrap_or_else(|err| panic!("catalog pattern for {mnemonic}: {err}"));
        self.entries.push((
            pattern,
            InstructionDef {
                mnemonic,
                format,
                emit,
            },
        ));
        Entry { builder: self }
    }

    pub(crate) fn insn(
        &mut self,
        mnemonic: &'static str,
        pattern: &'static str,
        format: FormatFn,
        emit: EmitFn,
    ) -> Entry<'_> {
        self.push(mnemonic, pattern, format, Some(emit))
    }

    /// An instruction that decodes and disassembles but is rejected by the compiler.
    pub(crate) fn decode_only(
        &mut self,
        mnemonic: &'static str,
        pattern: &'static str,
        format: FormatFn,
    ) -> Entry<'_> {
        self.push(mnemonic, pattern, format, None)
    }
}

/// Handle for attaching field constraints to the entry just added.
pub(crate) struct Entry<'b> {
    builder: &'b mut Builder,
}

impl Entry<'_> {
    fn constrain(self, field: &'static str, constraint: Constraint) -> Self {
        if let Some((pattern, def)) = self.builder.entries.pop() {
            let pattern = pattern
                .with_constraint(field, constraint)
                .unwrap_or_else(|err| panic!("catalog constraint for {}: {err}", def.mnemonic));
            self.builder.entries.push((pattern, def));
        }
        self
    }

    pub(crate) fn not(self, field: &'static str, values: &'static [u32]) -> Self {
        self.constrain(field, Constraint::Not(values))
    }

    pub(crate) fn only(self, field: &'static str, values: &'static [u32]) -> Self {
        self.constrain(field, Constraint::Only(values))
    }
}

fn build() -> DecodeTable<InstructionDef> {
    let mut b = Builder::default();
    branch::register(&mut b);
    system::register(&mut b);
    load_store::register(&mut b);
    data_imm::register(&mut b);
    data_reg::register(&mut b);
    DecodeTable::new(b.entries)
}

static CATALOG: OnceLock<DecodeTable<InstructionDef>> = OnceLock::new();

pub fn catalog() -> &'static DecodeTable<InstructionDef> {
    CATALOG.get_or_init(build)
}

pub fn decode(word: u32) -> Result<(&'static InstructionDef, Fields), DecodeError> {
    catalog().decode(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_builds_and_bucketing_agrees_with_linear_scan() {
        let table = catalog();
        // branch 14, data_imm 6, data_reg 9, load_store 7, system 11
        assert_eq!(table.len(), 47);

        let agree = |word: u32| {
            let fast = table.decode(word).map(|(d, _)| d.mnemonic);
            let slow = table.decode_linear(word).map(|(d, _)| d.mnemonic);
            assert_eq!(fast, slow, "{word:#010x}");
            fast.is_ok()
        };

        let known = [
            0xab010002, 0x9ac12c07, 0x93434c0e, 0xa9bf07e0, 0xf86978e8, 0x385ff0ea, 0xd50342ff,
            0xd53b4220, 0xb5ffffe0, 0x54000042, 0x10000041, 0xd61f0020, 0xd65f03c0, 0xd4000001,
        ];
        for word in known {
            assert!(agree(word), "{word:#010x} should decode");
        }

        let mut word = 0x1234_5678u32;
        let mut decoded = 0;
        for _ in 0..20_000 {
            // xorshift32
            word ^= word << 13;
            word ^= word >> 17;
            word ^= word << 5;
            decoded += u32::from(agree(word));
        }
        assert!(decoded > 0);
    }

    #[test]
    fn exception_generation_decodes_without_codegen() {
        let (def, _) = decode(0xd400_0001).unwrap();
        assert_eq!(def.mnemonic, "svc");
        assert!(def.emit.is_none());
    }
}
