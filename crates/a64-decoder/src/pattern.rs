use crate::error::PatternError;
use crate::fields::Fields;

/// Value-set restriction attached to a named field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constraint {
    /// The pattern only matches when the field value is *not* in the set.
    Not(&'static [u32]),
    /// The pattern only matches when the field value is in the set.
    Only(&'static [u32]),
}

impl Constraint {
    #[inline]
    pub fn admits(&self, value: u32) -> bool {
        match self {
            Constraint::Not(set) => !set.contains(&value),
            Constraint::Only(set) => set.contains(&value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Bit position of the least significant bit of the field.
    pub lsb: u8,
    pub width: u8,
    pub constraint: Option<Constraint>,
}

impl FieldSpec {
    #[inline]
    pub fn extract(&self, word: u32) -> u32 {
        let mask = if self.width == 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        (word >> self.lsb) & mask
    }
}

/// A 32-bit encoding pattern: fixed bits plus named variable-width fields.
///
/// Patterns are written most-significant bit first, the way the architecture reference lays
/// out encoding diagrams. Tokens are separated by whitespace; a token is either a run of fixed
/// `0`/`1` bits or a `name:width` field:
///
/// ```
/// use a64_decoder::Pattern;
///
/// let subs = Pattern::parse("sf:1 11 100010 sh:1 imm12:12 Rn:5 Rd:5").unwrap();
/// assert!(subs.matches(0xf100_0400));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    mask: u32,
    value: u32,
    fields: Vec<FieldSpec>,
}

impl Pattern {
    pub fn parse(spec: &'static str) -> Result<Self, PatternError> {
        let mut mask = 0u32;
        let mut value = 0u32;
        let mut fields = Vec::new();
        // Number of bits still to be assigned, counting down from bit 31.
        let mut remaining: u32 = 32;

        for token in spec.split_whitespace() {
            if let Some((name, width)) = token.split_once(':') {
                let width: u32 = width
                    .parse()
                    .map_err(|_| PatternError::BadToken(token.to_string()))?;
                if name.is_empty() || width == 0 {
                    return Err(PatternError::BadToken(token.to_string()));
                }
                if width > remaining {
                    return Err(PatternError::Width(spec.to_string()));
                }
                if fields.iter().any(|f: &FieldSpec| f.name == name) {
                    return Err(PatternError::DuplicateField(name));
                }
                remaining -= width;
                fields.push(FieldSpec {
                    name,
                    lsb: remaining as u8,
                    width: width as u8,
                    constraint: None,
                });
                continue;
            }

            for ch in token.chars() {
                let bit = match ch {
                    '0' => 0,
                    '1' => 1,
                    _ => return Err(PatternError::BadToken(token.to_string())),
                };
                if remaining == 0 {
                    return Err(PatternError::Width(spec.to_string()));
                }
                remaining -= 1;
                mask |= 1 << remaining;
                value |= bit << remaining;
            }
        }

        if remaining != 0 {
            return Err(PatternError::Width(spec.to_string()));
        }

        Ok(Self {
            mask,
            value,
            fields,
        })
    }

    /// Attach a constraint to the field called `name`.
    pub fn with_constraint(
        mut self,
        name: &str,
        constraint: Constraint,
    ) -> Result<Self, PatternError> {
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| PatternError::UnknownField(name.to_string()))?;
        field.constraint = Some(constraint);
        Ok(self)
    }

    /// Mask of the fixed bits.
    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Required values of the fixed bits (zero outside [`Self::mask`]).
    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[inline]
    pub fn fixed_bits_match(&self, word: u32) -> bool {
        word & self.mask == self.value
    }

    /// Full match: fixed bits plus every field constraint.
    pub fn matches(&self, word: u32) -> bool {
        self.fixed_bits_match(word)
            && self.fields.iter().all(|field| match field.constraint {
                Some(c) => c.admits(field.extract(word)),
                None => true,
            })
    }

    pub fn extract(&self, word: u32) -> Fields {
        Fields::new(
            word,
            self.fields
                .iter()
                .map(|field| (field.name, field.extract(word)))
                .collect(),
        )
    }
}
