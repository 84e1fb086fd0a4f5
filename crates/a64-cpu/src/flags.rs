use crate::Width;

/// Condition flag, numbered in the order the flags are laid out in [`crate::CpuState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    N = 0,
    Z = 1,
    C = 2,
    V = 3,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::N, Flag::Z, Flag::C, Flag::V];
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Nzcv {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl Nzcv {
    /// Build from a 4-bit `NZCV` nibble (N in bit 3).
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            n: bits & 0b1000 != 0,
            z: bits & 0b0100 != 0,
            c: bits & 0b0010 != 0,
            v: bits & 0b0001 != 0,
        }
    }

    pub const fn to_bits(self) -> u32 {
        ((self.n as u32) << 3) | ((self.z as u32) << 2) | ((self.c as u32) << 1) | self.v as u32
    }

    pub const fn get(self, flag: Flag) -> bool {
        match flag {
            Flag::N => self.n,
            Flag::Z => self.z,
            Flag::C => self.c,
            Flag::V => self.v,
        }
    }
}

/// One `a + b` step: masked sum, unsigned carry out and signed overflow.
#[inline]
fn add_step(a: u64, b: u64, width: Width) -> (u64, bool, bool) {
    let sum = a.wrapping_add(b) & width.mask();
    let carry = sum < a;
    let overflow = (a ^ sum) & (b ^ sum) & width.sign_bit() != 0;
    (sum, carry, overflow)
}

/// `x + y + carry_in` at `width`, with the NZCV the A64 `AddWithCarry` pseudocode produces.
///
/// The sum is formed in two steps (`x + y`, then `+ carry_in`); the final carry and overflow are
/// the XOR of the per-step carries and overflows. The generated code uses the same
/// decomposition, so the two must agree bit for bit.
pub fn add_with_carry(x: u64, y: u64, carry_in: bool, width: Width) -> (u64, Nzcv) {
    let (x, y) = (x & width.mask(), y & width.mask());
    let (partial, c1, v1) = add_step(x, y, width);
    let (result, c2, v2) = add_step(partial, carry_in as u64, width);
    let flags = Nzcv {
        n: result & width.sign_bit() != 0,
        z: result == 0,
        c: c1 ^ c2,
        v: v1 ^ v2,
    };
    (result, flags)
}

/// `x - y` as `x + !y + 1`.
#[inline]
pub fn subtract(x: u64, y: u64, width: Width) -> (u64, Nzcv) {
    add_with_carry(x, !y, true, width)
}
