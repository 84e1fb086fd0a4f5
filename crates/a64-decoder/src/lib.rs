//! Priority-ordered bitfield decoding for fixed-width 32-bit instruction sets.
//!
//! A [`DecodeTable`] holds [`Pattern`]s in declaration order together with a caller-supplied
//! payload (typically an instruction definition). Decoding a word returns the payload of the
//! first pattern that matches plus the extracted [`Fields`].
#![forbid(unsafe_code)]

mod error;
mod fields;
mod pattern;
mod table;

pub use error::{DecodeError, PatternError};
pub use fields::Fields;
pub use pattern::{Constraint, FieldSpec, Pattern};
pub use table::DecodeTable;
