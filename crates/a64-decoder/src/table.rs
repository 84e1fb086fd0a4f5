use crate::error::DecodeError;
use crate::fields::Fields;
use crate::pattern::Pattern;

/// Bits `[28:25]` select the top-level encoding group (`op0`) in the A64 encoding index.
const BUCKET_SHIFT: u32 = 25;
const BUCKET_COUNT: usize = 16;
const BUCKET_MASK: u32 = (BUCKET_COUNT as u32 - 1) << BUCKET_SHIFT;

/// Ordered decode table. The first entry whose pattern fully matches a word wins.
///
/// Entries are pre-sorted into 16 buckets keyed on bits `[28:25]`. A bucket keeps every entry
/// whose fixed bits are compatible with that key, in declaration order, so a bucketed lookup
/// returns exactly what a linear scan over all entries would.
#[derive(Debug)]
pub struct DecodeTable<T> {
    entries: Vec<(Pattern, T)>,
    buckets: [Vec<u32>; BUCKET_COUNT],
}

impl<T> DecodeTable<T> {
    pub fn new(entries: Vec<(Pattern, T)>) -> Self {
        let mut buckets: [Vec<u32>; BUCKET_COUNT] = Default::default();
        for (key, bucket) in buckets.iter_mut().enumerate() {
            let key_bits = (key as u32) << BUCKET_SHIFT;
            for (idx, (pattern, _)) in entries.iter().enumerate() {
                let relevant = pattern.mask() & BUCKET_MASK;
                if key_bits & relevant == pattern.value() & relevant {
                    bucket.push(idx as u32);
                }
            }
        }
        Self { entries, buckets }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Pattern, &T)> {
        self.entries.iter().map(|(p, t)| (p, t))
    }

    /// Decode `word`, returning the matching entry and its extracted fields.
    pub fn decode(&self, word: u32) -> Result<(&T, Fields), DecodeError> {
        let bucket = &self.buckets[((word & BUCKET_MASK) >> BUCKET_SHIFT) as usize];
        bucket
            .iter()
            .map(|&idx| &self.entries[idx as usize])
            .find(|(pattern, _)| pattern.matches(word))
            .map(|(pattern, entry)| (entry, pattern.extract(word)))
            .ok_or(DecodeError::InvalidEncoding(word))
    }

    /// Reference decode: scans every entry in order.
    pub fn decode_linear(&self, word: u32) -> Result<(&T, Fields), DecodeError> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.matches(word))
            .map(|(pattern, entry)| (entry, pattern.extract(word)))
            .ok_or(DecodeError::InvalidEncoding(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Constraint;

    fn table() -> DecodeTable<&'static str> {
        DecodeTable::new(vec![
            (
                Pattern::parse("1101010100 0 00 011 0010 0000 000 11111").unwrap(),
                "nop",
            ),
            (
                Pattern::parse("1101010100 0 00 011 0010 CRm:4 op2:3 11111").unwrap(),
                "hint",
            ),
            (
                Pattern::parse("sf:1 opc:2 100101 hw:2 imm16:16 Rd:5")
                    .unwrap()
                    .with_constraint("opc", Constraint::Not(&[1]))
                    .unwrap(),
                "movewide",
            ),
        ])
    }

    #[test]
    fn earlier_entries_take_priority() {
        let t = table();
        let (name, _) = t.decode(0xd503_201f).unwrap();
        assert_eq!(*name, "nop");
        let (name, fields) = t.decode(0xd503_203f).unwrap();
        assert_eq!(*name, "hint");
        assert_eq!(fields.take(["CRm", "op2"]), [0, 1]);
    }

    #[test]
    fn constraint_failure_falls_through_to_invalid() {
        let t = table();
        // movz x0, #1
        let (name, fields) = t.decode(0xd280_0020).unwrap();
        assert_eq!(*name, "movewide");
        assert_eq!(fields.get("imm16"), 1);
        // opc == 01 is unallocated for move-wide.
        assert_eq!(
            t.decode(0xa280_0020).unwrap_err(),
            DecodeError::InvalidEncoding(0xa280_0020)
        );
    }

    #[test]
    fn unknown_word_reports_the_word() {
        let t = table();
        assert_eq!(
            t.decode(0).unwrap_err().to_string(),
            "invalid instruction encoding 0x00000000"
        );
    }
}
