mod common;

use a64_cpu::{Flag, MemoryError, Nzcv, Width};
use a64_jit::{JitConfig, JitError};
use common::{emulator, run, run_with, CODE_BASE, RAM_BYTES, RETURN_SENTINEL, STACK_TOP};
use proptest::prelude::*;

const RET: u32 = 0xd65f03c0;

fn flags(n: bool, z: bool, c: bool, v: bool) -> Nzcv {
    Nzcv { n, z, c, v }
}

#[test]
fn subs_immediate_sets_borrow_free_flags() {
    let code = [
        0xf1000400, // subs x0, x0, #1
        RET,
    ];
    let emu = run(&code, |cpu| cpu.set_x(0, Width::W64, 10));
    assert_eq!(emu.cpu().x(0, Width::W64), 9);
    assert_eq!(emu.cpu().nzcv(), flags(false, false, true, false));

    let emu = run(&code, |cpu| cpu.set_x(0, Width::W64, 1));
    assert_eq!(emu.cpu().x(0, Width::W64), 0);
    assert_eq!(emu.cpu().nzcv(), flags(false, true, true, false));
}

#[test]
fn adds_w_wraps_and_zero_extends() {
    let code = [
        0x31000400, // adds w0, w0, #1
        RET,
    ];
    let emu = run(&code, |cpu| cpu.set_x(0, Width::W64, 0xabcd_0000_ffff_ffff));
    assert_eq!(emu.cpu().x(0, Width::W64), 0);
    assert_eq!(emu.cpu().nzcv(), flags(false, true, true, false));
}

#[test]
fn counted_loop() {
    let code = [
        0xd2800000, // mov x0, #0
        0xd2800141, // mov x1, #10
        0x8b010000, // add x0, x0, x1
        0xf1000421, // subs x1, x1, #1
        0x54ffffc1, // b.ne #-8
        RET,
    ];
    let emu = run(&code, |_| {});
    assert_eq!(emu.cpu().x(0, Width::W64), 55);
    assert_eq!(emu.cpu().x(1, Width::W64), 0);
    assert!(emu.cpu().flag(Flag::Z));
    assert_eq!(emu.compiler().stats().compilations, 1);
}

#[test]
fn bl_calls_and_returns() {
    let code = [
        0xaa1e03f3, // mov x19, x30
        0xd2800060, // mov x0, #3
        0x94000003, // bl #12
        0xaa1303fe, // mov x30, x19
        RET,
        0x8b000000, // add x0, x0, x0
        RET,
    ];
    let emu = run(&code, |_| {});
    assert_eq!(emu.cpu().x(0, Width::W64), 6);
    assert_eq!(emu.cpu().x(30, Width::W64), RETURN_SENTINEL);
    let stats = emu.compiler().stats();
    assert_eq!(stats.compilations, 2);
    assert_eq!(stats.trampolines_created, 2);
}

#[test]
fn recursive_factorial_through_the_stack() {
    let code = [
        0xa9be7bfd, // stp x29, x30, [sp, #-32]!
        0xf9000bf3, // str x19, [sp, #16]
        0xaa0003f3, // mov x19, x0
        0xd2800020, // mov x0, #1
        0xf100067f, // cmp x19, #1
        0x5400008d, // b.le #0x10
        0xd1000660, // sub x0, x19, #1
        0x97fffff9, // bl #-0x1c
        0x9b137c00, // mul x0, x0, x19
        0xf9400bf3, // ldr x19, [sp, #16]
        0xa8c27bfd, // ldp x29, x30, [sp], #32
        RET,
    ];
    let emu = run(&code, |cpu| {
        cpu.set_x(0, Width::W64, 5);
        cpu.set_x(19, Width::W64, 0x77);
    });
    assert_eq!(emu.cpu().x(0, Width::W64), 120);
    assert_eq!(emu.cpu().x(19, Width::W64), 0x77);
    assert_eq!(emu.cpu().sp(), STACK_TOP);
    // The recursive call binds to the slot of the function being compiled.
    assert_eq!(emu.compiler().stats().compilations, 1);
}

proptest! {
    #[test]
    fn store_then_load_keeps_full_width(value: u64) {
        let code = [
            0xf9000441, // str x1, [x2, #8]
            0xf9400443, // ldr x3, [x2, #8]
            RET,
        ];
        let emu = run(&code, |cpu| {
            cpu.set_x(1, Width::W64, value);
            cpu.set_x(2, Width::W64, 0x8000);
        });
        prop_assert_eq!(emu.cpu().x(3, Width::W64), value);
        prop_assert_eq!(emu.cpu().x(1, Width::W64), value);
        prop_assert_eq!(emu.memory().read_u64(0x8008).unwrap(), value);
    }
}

#[test]
fn pre_and_post_index_write_back() {
    let code = [
        0xf8008c41, // str x1, [x2, #8]!
        0xf85f8443, // ldr x3, [x2], #-8
        RET,
    ];
    let value = 0x1122_3344_5566_7788;
    let emu = run(&code, |cpu| {
        cpu.set_x(1, Width::W64, value);
        cpu.set_x(2, Width::W64, 0x8000);
    });
    assert_eq!(emu.cpu().x(2, Width::W64), 0x8000);
    assert_eq!(emu.cpu().x(3, Width::W64), value);
    assert_eq!(emu.memory().read_u64(0x8008).unwrap(), value);
}

#[test]
fn narrow_loads_and_stores() {
    let code = [
        0x398000a4, // ldrsb x4, [x5]
        0x794004a6, // ldrh w6, [x5, #2]
        0x390004a7, // strb w7, [x5, #1]
        RET,
    ];
    let mut emu = emulator(&code, JitConfig::default());
    emu.memory_mut().write_u32(0x9000, 0xbeef_ff80).unwrap();
    let cpu = emu.cpu_mut();
    cpu.set_x(5, Width::W64, 0x9000);
    cpu.set_x(6, Width::W64, 0xffff_0000_0000_0000);
    cpu.set_x(7, Width::W64, 0x1234);
    assert_eq!(emu.execute(CODE_BASE).unwrap(), RETURN_SENTINEL);

    assert_eq!(emu.cpu().x(4, Width::W64), 0xffff_ffff_ffff_ff80);
    assert_eq!(emu.cpu().x(6, Width::W64), 0xbeef);
    assert_eq!(emu.memory().read_u8(0x9001).unwrap(), 0x34);
    assert_eq!(emu.memory().read_u32(0x9000).unwrap(), 0xbeef_3480);
}

#[test]
fn conditional_select_uses_signed_compare() {
    let code = [
        0xeb01001f, // cmp x0, x1
        0x9a81c002, // csel x2, x0, x1, gt
        0x9a9fa7e3, // cset x3, lt
        RET,
    ];
    let emu = run(&code, |cpu| {
        cpu.set_x(0, Width::W64, (-5i64) as u64);
        cpu.set_x(1, Width::W64, 3);
    });
    assert_eq!(emu.cpu().x(2, Width::W64), 3);
    assert_eq!(emu.cpu().x(3, Width::W64), 1);
}

#[test]
fn conditional_compare_takes_immediate_flags_when_condition_fails() {
    let code = [
        0xfa411004, // ccmp x0, x1, #4, ne
        RET,
    ];
    let emu = run(&code, |cpu| {
        cpu.set_flag(Flag::Z, true);
        cpu.set_x(0, Width::W64, 1);
        cpu.set_x(1, Width::W64, 2);
    });
    assert_eq!(emu.cpu().nzcv(), flags(false, true, false, false));

    let emu = run(&code, |cpu| {
        cpu.set_x(0, Width::W64, 5);
        cpu.set_x(1, Width::W64, 5);
    });
    assert_eq!(emu.cpu().nzcv(), flags(false, true, true, false));
}

#[test]
fn register_shift_amount_is_masked_to_width() {
    let code = [
        0x1ac22020, // lsl w0, w1, w2
        RET,
    ];
    let emu = run(&code, |cpu| {
        cpu.set_x(1, Width::W64, 1);
        cpu.set_x(2, Width::W64, 33);
    });
    assert_eq!(emu.cpu().x(0, Width::W64), 2);
}

#[test]
fn division_never_traps() {
    let code = [
        0x9ac10802, // udiv x2, x0, x1
        0x9ac10c03, // sdiv x3, x0, x1
        RET,
    ];
    let emu = run(&code, |cpu| {
        cpu.set_x(0, Width::W64, 100);
        cpu.set_x(1, Width::W64, 0);
    });
    assert_eq!(emu.cpu().x(2, Width::W64), 0);
    assert_eq!(emu.cpu().x(3, Width::W64), 0);

    let emu = run(&code, |cpu| {
        cpu.set_x(0, Width::W64, i64::MIN as u64);
        cpu.set_x(1, Width::W64, u64::MAX);
    });
    assert_eq!(emu.cpu().x(2, Width::W64), 0);
    assert_eq!(emu.cpu().x(3, Width::W64), i64::MIN as u64);
}

#[test]
fn move_wide_and_bitfield_extracts() {
    let code = [
        0xf2a24680, // movk x0, #0x1234, lsl #16
        0x92800001, // movn x1, #0
        0xd3505c02, // ubfx x2, x0, #16, #8
        0x93441c03, // sbfx x3, x0, #4, #4
        RET,
    ];
    let emu = run(&code, |cpu| cpu.set_x(0, Width::W64, 0xffff_0000_0000_00f8));
    assert_eq!(emu.cpu().x(0, Width::W64), 0xffff_0000_1234_00f8);
    assert_eq!(emu.cpu().x(1, Width::W64), u64::MAX);
    assert_eq!(emu.cpu().x(2, Width::W64), 0x34);
    assert_eq!(emu.cpu().x(3, Width::W64), u64::MAX);
}

#[test]
fn multiply_add_and_long_multiply() {
    let code = [
        0x9b010808, // madd x8, x0, x1, x2
        0x9b21080a, // smaddl x10, w0, w1, x2
        0x93c1400d, // extr x13, x0, x1, #16
        RET,
    ];
    let emu = run(&code, |cpu| {
        cpu.set_x(0, Width::W64, 0xffff_ffff);
        cpu.set_x(1, Width::W64, 3);
        cpu.set_x(2, Width::W64, 10);
    });
    assert_eq!(emu.cpu().x(8, Width::W64), 0x3_0000_0007);
    assert_eq!(emu.cpu().x(10, Width::W64), 7);
    assert_eq!(emu.cpu().x(13, Width::W64), 0xffff_0000_0000_0000);
}

#[test]
fn test_bit_and_compare_branches() {
    let tbnz = [
        0xb7f80040, // tbnz x0, #63, #8
        RET,
        0xd28000e0, // mov x0, #7
        RET,
    ];
    let emu = run(&tbnz, |cpu| cpu.set_x(0, Width::W64, 1 << 63));
    assert_eq!(emu.cpu().x(0, Width::W64), 7);
    let emu = run(&tbnz, |cpu| cpu.set_x(0, Width::W64, 5));
    assert_eq!(emu.cpu().x(0, Width::W64), 5);

    let cbz = [
        0xb4000040, // cbz x0, #8
        RET,
        0xd28000e0, // mov x0, #7
        RET,
    ];
    let emu = run(&cbz, |_| {});
    assert_eq!(emu.cpu().x(0, Width::W64), 7);
    let emu = run(&cbz, |cpu| cpu.set_x(0, Width::W64, 1));
    assert_eq!(emu.cpu().x(0, Width::W64), 1);
}

#[test]
fn register_branch_runs_target_as_new_function() {
    let code = [
        0x10000041, // adr x1, #8
        0xd61f0020, // br x1
        0xd28000e0, // mov x0, #7
        RET,
    ];
    let emu = run(&code, |_| {});
    assert_eq!(emu.cpu().x(0, Width::W64), 7);
    assert_eq!(emu.cpu().x(1, Width::W64), CODE_BASE + 8);
    assert_eq!(emu.compiler().stats().compilations, 2);
}

#[test]
fn mrs_reads_current_el() {
    let code = [
        0xd5384240, // mrs x0, currentel
        RET,
    ];
    let emu = run(&code, |_| {});
    assert_eq!(emu.cpu().x(0, Width::W64), 1 << 2);
}

#[test]
fn fresh_state_runs_on_sp_el0() {
    let code = [
        0x910003e0, // mov x0, sp
        0xd5384101, // mrs x1, sp_el0
        RET,
    ];
    let emu = run(&code, |_| {});
    assert_eq!(emu.cpu().x(0, Width::W64), STACK_TOP);
    assert_eq!(emu.cpu().x(1, Width::W64), STACK_TOP);
    assert_eq!(emu.cpu().sp_el(1), 0);
}

#[test]
fn eret_restores_pstate_and_returns_to_elr() {
    let code = [
        0xd69f03e0, // eret
    ];
    let (emu, result) = run_with(&code, |cpu| {
        cpu.set_spsr(1, 0x6000_0000);
        cpu.set_elr(1, 0x1234);
    });
    assert_eq!(result, Ok(0x1234));
    assert_eq!(emu.cpu().el(), 0);
    assert!(!emu.cpu().spsel());
    assert_eq!(emu.cpu().nzcv(), flags(false, true, true, false));
}

#[test]
fn compile_errors_name_the_failing_instruction() {
    let (_, result) = run_with(&[0x0000_0000], |_| {});
    assert_eq!(
        result,
        Err(JitError::InvalidEncoding {
            pc: CODE_BASE,
            word: 0
        })
    );

    let (_, result) = run_with(&[0xd4000001], |_| {}); // svc #0
    assert_eq!(
        result,
        Err(JitError::UnsupportedInstruction {
            pc: CODE_BASE,
            word: 0xd4000001,
            mnemonic: "svc"
        })
    );

    let mut emu = emulator(&[RET], JitConfig::default());
    let outside = RAM_BYTES as u64;
    assert_eq!(
        emu.execute(outside),
        Err(JitError::FetchOutOfBounds { pc: outside })
    );
}

#[test]
fn guest_memory_fault_surfaces_at_run_time() {
    let code = [
        0xf9400020, // ldr x0, [x1]
        RET,
    ];
    let (_, result) = run_with(&code, |cpu| cpu.set_x(1, Width::W64, 0x10_0000));
    assert_eq!(
        result,
        Err(JitError::Memory(MemoryError::OutOfBounds {
            addr: 0x10_0000,
            len: 8,
            size: RAM_BYTES
        }))
    );
}

#[test]
fn loop_budget_stops_a_spinning_guest() {
    let code = [
        0x14000000, // b #0
    ];
    let config = JitConfig {
        loop_budget: Some(100),
        ..JitConfig::default()
    };
    let mut emu = emulator(&code, config);
    assert_eq!(emu.execute(CODE_BASE), Err(JitError::BudgetExhausted));
    // The budget is refilled for every execute.
    assert_eq!(emu.execute(CODE_BASE), Err(JitError::BudgetExhausted));
}

#[test]
fn unbounded_recursion_hits_the_call_depth_limit() {
    let code = [
        0x94000000, // bl #0
        RET,
    ];
    let config = JitConfig {
        max_call_depth: 16,
        ..JitConfig::default()
    };
    let mut emu = emulator(&code, config);
    assert_eq!(
        emu.execute(CODE_BASE),
        Err(JitError::CallDepthExceeded { depth: 16 })
    );
}
