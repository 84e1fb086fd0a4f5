//! Bit-manipulation helpers used by immediate decoding and instruction semantics.

use crate::Width;

/// A value with the low `n` bits set (`n` may be 0..=64).
#[inline]
pub const fn ones(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Rotate the low `esize` bits of `value` right by `amount`.
#[inline]
pub const fn ror(value: u64, esize: u32, amount: u32) -> u64 {
    let value = value & ones(esize);
    let amount = amount % esize;
    if amount == 0 {
        return value;
    }
    ((value >> amount) | (value << (esize - amount))) & ones(esize)
}

/// Repeat the low `esize` bits of `pattern` until `width` bits are filled.
pub const fn replicate(pattern: u64, esize: u32, width: u32) -> u64 {
    let pattern = pattern & ones(esize);
    let mut out = 0u64;
    let mut pos = 0;
    while pos < width {
        out |= pattern << pos;
        pos += esize;
    }
    out & ones(width)
}

/// Interpret the low `bits` bits of `value` as a two's-complement number.
#[inline]
pub const fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Decode a logical/bitfield immediate (`N:immr:imms`) into `(wmask, tmask)`.
///
/// `wmask` is the element pattern (a run of `S+1` ones rotated right by `R`) replicated to
/// `width`; it is the immediate of the logical-immediate instructions. `tmask` is a run of
/// `(S-R)+1` ones replicated without rotation, used by the bitfield moves to pick the bits
/// above the inserted field.
///
/// Returns `None` for reserved encodings: `N:!imms` with no bit above bit 0 set, an element
/// wider than `width`, and (when `immediate`) the all-ones element.
pub fn decode_bit_masks(
    n: u32,
    imms: u32,
    immr: u32,
    immediate: bool,
    width: Width,
) -> Option<(u64, u64)> {
    let combined = ((n & 1) << 6) | (!imms & 0x3f);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 {
        return None;
    }
    let esize = 1u32 << len;
    if esize > width.bits() {
        return None;
    }

    let levels = ones(len) as u32;
    let s = imms & levels;
    let r = immr & levels;
    if immediate && s == levels {
        return None;
    }
    let d = s.wrapping_sub(r) & levels;

    let welem = ones(s + 1);
    let telem = ones(d + 1);
    let wmask = replicate(ror(welem, esize, r), esize, width.bits());
    let tmask = replicate(telem, esize, width.bits());
    Some((wmask, tmask))
}

/// Decode only the logical-immediate value.
#[inline]
pub fn decode_logical_immediate(n: u32, imms: u32, immr: u32, width: Width) -> Option<u64> {
    decode_bit_masks(n, imms, immr, true, width).map(|(wmask, _)| wmask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ones_and_ror() {
        assert_eq!(ones(0), 0);
        assert_eq!(ones(8), 0xff);
        assert_eq!(ones(64), u64::MAX);
        assert_eq!(ror(0b0001, 4, 1), 0b1000);
        assert_eq!(ror(0xff, 64, 8), 0xff00_0000_0000_0000);
        assert_eq!(ror(0x1234, 16, 0), 0x1234);
    }

    #[test]
    fn replicate_fills_width() {
        assert_eq!(replicate(0b01, 2, 64), 0x5555_5555_5555_5555);
        assert_eq!(replicate(0xff, 16, 32), 0x00ff_00ff);
    }

    #[test]
    fn sign_extend_narrow_values() {
        assert_eq!(sign_extend(0x7_ffff, 19), -1);
        assert_eq!(sign_extend(0x3_ffff, 19), 0x3_ffff);
        assert_eq!(sign_extend(0x200_0000, 26), -(1 << 25));
    }

    #[test]
    fn single_run_masks() {
        // and x0, x0, #0xff: N=1 immr=0 imms=7
        assert_eq!(decode_logical_immediate(1, 7, 0, Width::W64), Some(0xff));
        // and w0, w0, #0x80000000: N=0 immr=1 imms=0
        assert_eq!(decode_logical_immediate(0, 0, 1, Width::W32), Some(0x8000_0000));
        // orr x0, xzr, #0xfffffffffffffffe: immr=63 imms=62
        assert_eq!(
            decode_logical_immediate(1, 62, 63, Width::W64),
            Some(0xffff_ffff_ffff_fffe)
        );
    }

    #[test]
    fn replicated_element_masks() {
        // #0x5555555555555555: 2-bit element, one set bit.
        assert_eq!(
            decode_logical_immediate(0, 0b111100, 0, Width::W64),
            Some(0x5555_5555_5555_5555)
        );
        // #0x0f0f0f0f with 8-bit elements in a 32-bit register.
        assert_eq!(
            decode_logical_immediate(0, 0b110011, 0, Width::W32),
            Some(0x0f0f_0f0f)
        );
    }

    #[test]
    fn bitfield_masks() {
        // lsr x0, x1, #4 == ubfm x0, x1, #4, #63
        let (wmask, tmask) = decode_bit_masks(1, 63, 4, false, Width::W64).unwrap();
        assert_eq!(wmask & tmask, 0x0fff_ffff_ffff_ffff);
        // lsl w0, w1, #8 == ubfm w0, w1, #24, #23
        let (wmask, tmask) = decode_bit_masks(0, 23, 24, false, Width::W32).unwrap();
        assert_eq!(wmask & tmask, 0xffff_ff00);
    }

    #[test]
    fn reserved_encodings_are_rejected() {
        // All-ones element as an immediate.
        assert_eq!(decode_logical_immediate(1, 63, 0, Width::W64), None);
        // 64-bit element in a 32-bit register.
        assert_eq!(decode_logical_immediate(1, 7, 0, Width::W32), None);
        // N=0 with imms=0b111111 has no element size.
        assert_eq!(decode_bit_masks(0, 0b111111, 0, false, Width::W64), None);
    }

    #[test]
    fn decoding_is_idempotent() {
        let first = decode_bit_masks(0, 0b100111, 3, false, Width::W64);
        let second = decode_bit_masks(0, 0b100111, 3, false, Width::W64);
        assert_eq!(first, second);
    }
}
