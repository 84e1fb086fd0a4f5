use crate::flags::Nzcv;

/// A64 condition code (`cond` field, 4 bits).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Eq = 0b0000,
    Ne = 0b0001,
    Cs = 0b0010,
    Cc = 0b0011,
    Mi = 0b0100,
    Pl = 0b0101,
    Vs = 0b0110,
    Vc = 0b0111,
    Hi = 0b1000,
    Ls = 0b1001,
    Ge = 0b1010,
    Lt = 0b1011,
    Gt = 0b1100,
    Le = 0b1101,
    Al = 0b1110,
    Nv = 0b1111,
}

impl Cond {
    const ALL: [Cond; 16] = [
        Cond::Eq,
        Cond::Ne,
        Cond::Cs,
        Cond::Cc,
        Cond::Mi,
        Cond::Pl,
        Cond::Vs,
        Cond::Vc,
        Cond::Hi,
        Cond::Ls,
        Cond::Ge,
        Cond::Lt,
        Cond::Gt,
        Cond::Le,
        Cond::Al,
        Cond::Nv,
    ];

    /// Decode the low four bits of `bits`.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self::ALL[(bits & 0xf) as usize]
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// The opposite condition. `AL` and `NV` both mean "always", so they map to each other.
    #[inline]
    pub const fn invert(self) -> Self {
        Self::from_bits(self.bits() ^ 1)
    }

    /// Whether the condition is one of the two "always" encodings.
    #[inline]
    pub const fn is_always(self) -> bool {
        matches!(self, Cond::Al | Cond::Nv)
    }

    pub const fn holds(self, f: Nzcv) -> bool {
        match self {
            Cond::Eq => f.z,
            Cond::Ne => !f.z,
            Cond::Cs => f.c,
            Cond::Cc => !f.c,
            Cond::Mi => f.n,
            Cond::Pl => !f.n,
            Cond::Vs => f.v,
            Cond::Vc => !f.v,
            Cond::Hi => f.c && !f.z,
            Cond::Ls => !(f.c && !f.z),
            Cond::Ge => f.n == f.v,
            Cond::Lt => f.n != f.v,
            Cond::Gt => !f.z && f.n == f.v,
            Cond::Le => !(!f.z && f.n == f.v),
            Cond::Al | Cond::Nv => true,
        }
    }

    /// Assembler name; `CS`/`CC` use their `hs`/`lo` spellings.
    pub const fn name(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Cs => "hs",
            Cond::Cc => "lo",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "al",
            Cond::Nv => "nv",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_pairs_disagree_except_always() {
        for bits in 0..16 {
            let cond = Cond::from_bits(bits);
            for flags in 0..16 {
                let nzcv = Nzcv::from_bits(flags);
                if cond.is_always() {
                    assert!(cond.holds(nzcv) && cond.invert().holds(nzcv));
                } else {
                    assert_ne!(cond.holds(nzcv), cond.invert().holds(nzcv), "{cond:?}");
                }
            }
        }
    }

    #[test]
    fn signed_compare_conditions() {
        // cmp 1, 2: N=1 Z=0 C=0 V=0
        let lt = Nzcv::from_bits(0b1000);
        assert!(Cond::Lt.holds(lt));
        assert!(Cond::Le.holds(lt));
        assert!(!Cond::Gt.holds(lt));
        assert!(Cond::Cc.holds(lt));
        assert!(!Cond::Hi.holds(lt));
    }
}
