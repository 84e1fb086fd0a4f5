use a64_cpu::{add_with_carry, subtract, Cond, Nzcv, Width};
use proptest::prelude::*;

/// Flags computed from the mathematical (unbounded) sums.
fn reference(x: u64, y: u64, carry: bool, width: Width) -> (u64, Nzcv) {
    let bits = width.bits();
    let mask = width.mask();
    let (x, y) = (x & mask, y & mask);
    let unsigned = x as u128 + y as u128 + carry as u128;
    let signed_of = |v: u64| -> i128 {
        if bits == 64 {
            v as i64 as i128
        } else {
            v as u32 as i32 as i128
        }
    };
    let signed = signed_of(x) + signed_of(y) + carry as i128;
    let result = (unsigned as u64) & mask;
    let flags = Nzcv {
        n: result >> (bits - 1) & 1 == 1,
        z: result == 0,
        c: unsigned > mask as u128,
        v: signed != signed_of(result),
    };
    (result, flags)
}

fn width() -> impl Strategy<Value = Width> {
    prop_oneof![Just(Width::W32), Just(Width::W64)]
}

proptest! {
    #[test]
    fn add_with_carry_matches_wide_arithmetic(x in any::<u64>(), y in any::<u64>(), c in any::<bool>(), w in width()) {
        prop_assert_eq!(add_with_carry(x, y, c, w), reference(x, y, c, w));
    }

    #[test]
    fn subtract_is_add_of_complement(x in any::<u64>(), y in any::<u64>(), w in width()) {
        let (diff, flags) = subtract(x, y, w);
        prop_assert_eq!((diff, flags), add_with_carry(x, !y, true, w));
        prop_assert_eq!(diff, x.wrapping_sub(y) & w.mask());
        // Carry is "no borrow".
        prop_assert_eq!(flags.c, (x & w.mask()) >= (y & w.mask()));
    }

    #[test]
    fn compare_conditions_agree_with_integers(x in any::<i64>(), y in any::<i64>()) {
        let (_, f) = subtract(x as u64, y as u64, Width::W64);
        prop_assert_eq!(Cond::Eq.holds(f), x == y);
        prop_assert_eq!(Cond::Lt.holds(f), x < y);
        prop_assert_eq!(Cond::Ge.holds(f), x >= y);
        prop_assert_eq!(Cond::Gt.holds(f), x > y);
        prop_assert_eq!(Cond::Le.holds(f), x <= y);
        prop_assert_eq!(Cond::Hi.holds(f), (x as u64) > (y as u64));
        prop_assert_eq!(Cond::Cc.holds(f), (x as u64) < (y as u64));
    }
}

#[test]
fn subs_and_adds_boundary_flags() {
    assert_eq!(subtract(10, 1, Width::W64), (9, Nzcv::from_bits(0b0010)));
    assert_eq!(subtract(1, 1, Width::W64), (0, Nzcv::from_bits(0b0110)));
    assert_eq!(
        add_with_carry(0xffff_ffff, 1, false, Width::W32),
        (0, Nzcv::from_bits(0b0110))
    );
}
