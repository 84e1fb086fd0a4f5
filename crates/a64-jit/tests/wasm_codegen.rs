mod common;

use a64_cpu::{CpuState, Width};
use a64_jit::wasm::abi::{
    EXPORT_RUN, IMPORT_CALL_SLOT, IMPORT_JUMP_TO_PC, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_TICK,
    WASM_PAGE_BYTES,
};
use a64_jit::wasm::{emit_function, WasmOptions};
use a64_jit::{Compiler, InterpBackend, JitConfig};
use common::{emulator, guest_memory, initial_cpu, CODE_BASE, RAM_BYTES, RETURN_SENTINEL};
use proptest::prelude::*;
use wasmi::{Caller, Engine, Func, Linker, Memory, MemoryType, Module, Store};
use wasmparser::{Parser, Payload, TypeRef};

const RET: u32 = 0xd65f03c0;

/// `CpuState` lives in the page right after guest RAM.
const CPU_PTR: i32 = RAM_BYTES as i32;
const MEMORY_PAGES: u32 = (RAM_BYTES as u64 / WASM_PAGE_BYTES) as u32 + 1;

const ARITHMETIC: [u32; 20] = [
    0xab010002, // adds x2, x0, x1
    0x4b010003, // sub w3, w0, w1
    0xcac11c04, // eor x4, x0, x1, ror #7
    0x9ac12405, // lsr x5, x0, x1
    0x1ac12806, // asr w6, w0, w1
    0x9ac12c07, // ror x7, x0, x1
    0x1ac10808, // udiv w8, w0, w1
    0x1ac10c09, // sdiv w9, w0, w1
    0x6b01001f, // cmp w0, w1
    0x9a81840a, // csinc x10, x0, x1, hi
    0xfa41a002, // ccmp x0, x1, #2, ge
    0x9a9f77eb, // cset x11, vs
    0x1b01080c, // madd w12, w0, w1, w2
    0x9b217c0d, // smull x13, w0, w1
    0x93434c0e, // sbfx x14, x0, #3, #17
    0xb3782c2f, // bfi x15, x1, #8, #12
    0x13811410, // extr w16, w0, w1, #5
    0x9a010011, // adc x17, x0, x1
    0xd53b4212, // mrs x18, nzcv
    RET,
];

const MEMORY_OPS: [u32; 10] = [
    0xa9bf07e0, // stp x0, x1, [sp, #-16]!
    0x29400fe2, // ldp w2, w3, [sp]
    0xb98007e4, // ldrsw x4, [sp, #4]
    0x79c007e5, // ldrsh w5, [sp, #2]
    0x79000fe1, // strh w1, [sp, #6]
    0xf84107e6, // ldr x6, [sp], #16
    0xf86978e8, // ldr x8, [x7, x9, lsl #3]
    0xf81fd0e0, // stur x0, [x7, #-3]
    0x385ff0ea, // ldurb w10, [x7, #-1]
    RET,
];

const SYSTEM_OPS: [u32; 15] = [
    0xd50342ff, // msr daifclr, #2
    0xd53b4220, // mrs x0, daif
    0xd51b4201, // msr nzcv, x1
    0xd53b4202, // mrs x2, nzcv
    0xd50040bf, // msr spsel, #0
    0x910003e3, // mov x3, sp
    0xd50041bf, // msr spsel, #1
    0xd5384104, // mrs x4, sp_el0
    0xd51bd045, // msr tpidr_el0, x5
    0xd53bd046, // mrs x6, tpidr_el0
    0x910083ff, // add sp, sp, #32
    0x910003e7, // mov x7, sp
    0xd5184028, // msr elr_el1, x8
    0xd5384029, // mrs x9, elr_el1
    RET,
];

const COUNTDOWN: [u32; 3] = [
    0xd1000400, // sub x0, x0, #1
    0xb5ffffe0, // cbnz x0, #-4
    RET,
];

fn options() -> WasmOptions {
    WasmOptions {
        memory_min_pages: MEMORY_PAGES,
        guest_ram_bytes: Some(RAM_BYTES as u64),
        ..WasmOptions::default()
    }
}

fn compile_to_wasm(code: &[u32]) -> Vec<u8> {
    let mut compiler = Compiler::new(InterpBackend, JitConfig::default());
    let func = compiler.build(CODE_BASE, &guest_memory(code)).unwrap();
    let wasm = emit_function(&func, &options()).unwrap();
    validate_wasm(&wasm);
    wasm
}

fn validate_wasm(bytes: &[u8]) {
    let mut validator = wasmparser::Validator::new();
    validator.validate_all(bytes).unwrap();
}

fn import_names(wasm: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::ImportSection(imports) = payload.expect("parse wasm") {
            for group in imports {
                let group = group.expect("parse import group");
                for import in group {
                    let (_offset, import) = import.expect("parse import");
                    match import.ty {
                        TypeRef::Func(_) | TypeRef::Memory(_) => {
                            out.push((import.module.to_string(), import.name.to_string()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    out
}

struct Host {
    /// Back edges left before `env.tick` traps.
    budget: u64,
    slot_calls: Vec<i32>,
    /// What `env.call_slot` hands back as the callee's return address.
    call_slot_returns: i64,
}

/// Run `wasm` against `cpu` and `ram`, returning the function's result and the final state.
fn run_wasm(
    wasm: &[u8],
    cpu: &CpuState,
    ram: &[u8],
    host: Host,
) -> (Result<i64, wasmi::Error>, CpuState, Vec<u8>, Host) {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm).unwrap();
    let mut store = Store::new(&engine, host);
    let mut linker = Linker::new(&engine);

    let memory = Memory::new(&mut store, MemoryType::new(MEMORY_PAGES, None)).unwrap();
    linker.define(IMPORT_MODULE, IMPORT_MEMORY, memory).unwrap();
    linker
        .define(
            IMPORT_MODULE,
            IMPORT_TICK,
            Func::wrap(
                &mut store,
                |mut caller: Caller<'_, Host>, _cpu_ptr: i32| -> Result<(), wasmi::Error> {
                    let host = caller.data_mut();
                    if host.budget == 0 {
                        return Err(wasmi::Error::new("loop budget exhausted"));
                    }
                    host.budget -= 1;
                    Ok(())
                },
            ),
        )
        .unwrap();
    linker
        .define(
            IMPORT_MODULE,
            IMPORT_CALL_SLOT,
            Func::wrap(
                &mut store,
                |mut caller: Caller<'_, Host>, slot: i32, cpu_ptr: i32| -> i64 {
                    assert_eq!(cpu_ptr, CPU_PTR);
                    let host = caller.data_mut();
                    host.slot_calls.push(slot);
                    host.call_slot_returns
                },
            ),
        )
        .unwrap();
    linker
        .define(
            IMPORT_MODULE,
            IMPORT_JUMP_TO_PC,
            Func::wrap(
                &mut store,
                |_caller: Caller<'_, Host>, _cpu_ptr: i32, target: i64| -> i64 { target },
            ),
        )
        .unwrap();

    let instance = linker.instantiate_and_start(&mut store, &module).unwrap();
    let run = instance
        .get_typed_func::<i32, i64>(&store, EXPORT_RUN)
        .unwrap();

    memory.write(&mut store, 0, ram).unwrap();
    let mut cpu_bytes = vec![0u8; CpuState::BYTE_SIZE];
    cpu.write_to_mem(&mut cpu_bytes, 0);
    memory
        .write(&mut store, CPU_PTR as usize, &cpu_bytes)
        .unwrap();

    let result = run.call(&mut store, CPU_PTR);

    memory
        .read(&store, CPU_PTR as usize, &mut cpu_bytes)
        .unwrap();
    let mut ram_out = vec![0u8; ram.len()];
    memory.read(&store, 0, &mut ram_out).unwrap();
    let cpu = CpuState::read_from_mem(&cpu_bytes, 0);
    (result, cpu, ram_out, store.into_data())
}

fn host() -> Host {
    Host {
        budget: u64::MAX,
        slot_calls: Vec::new(),
        call_slot_returns: 0,
    }
}

/// Run `code` through the interpreter and through the generated module from the same starting
/// state and require identical results.
fn assert_backends_agree(code: &[u32], setup: impl Fn(&mut CpuState)) {
    let mut emu = emulator(code, JitConfig::default());
    setup(emu.cpu_mut());
    let start_cpu = emu.cpu().clone();
    let start_ram = emu.memory().as_slice().to_vec();
    let expected = emu.execute(CODE_BASE).unwrap();

    let wasm = compile_to_wasm(code);
    let (result, cpu, ram, _) = run_wasm(&wasm, &start_cpu, &start_ram, host());
    assert_eq!(result.unwrap() as u64, expected);
    assert_eq!(&cpu, emu.cpu());
    assert!(ram == emu.memory().as_slice(), "guest RAM differs");
}

#[test]
fn straight_line_module_imports_only_memory() {
    let wasm = compile_to_wasm(&ARITHMETIC);
    assert_eq!(
        import_names(&wasm),
        vec![(IMPORT_MODULE.to_string(), IMPORT_MEMORY.to_string())]
    );
}

#[test]
fn loops_import_tick_and_calls_import_their_helpers() {
    let names = |code: &[u32]| -> Vec<String> {
        import_names(&compile_to_wasm(code))
            .into_iter()
            .map(|(_, name)| name)
            .collect()
    };
    assert_eq!(names(&COUNTDOWN), vec![IMPORT_MEMORY, IMPORT_TICK]);
    assert_eq!(
        names(&[
            0x94000002, // bl #8
            RET,
            RET,
        ]),
        vec![IMPORT_MEMORY, IMPORT_CALL_SLOT]
    );
    assert_eq!(
        names(&[
            0xd61f0020, // br x1
        ]),
        vec![IMPORT_MEMORY, IMPORT_JUMP_TO_PC]
    );
}

#[test]
fn export_name_is_configurable() {
    let mut compiler = Compiler::new(InterpBackend, JitConfig::default());
    let func = compiler.build(CODE_BASE, &guest_memory(&[RET])).unwrap();
    let options = WasmOptions {
        export_name: "guest_fn",
        ..WasmOptions::default()
    };
    let wasm = emit_function(&func, &options).unwrap();
    validate_wasm(&wasm);

    let mut exports = Vec::new();
    for payload in Parser::new(0).parse_all(&wasm) {
        if let Payload::ExportSection(reader) = payload.unwrap() {
            for export in reader {
                exports.push(export.unwrap().name.to_string());
            }
        }
    }
    assert_eq!(exports, vec!["guest_fn".to_string()]);
}

#[test]
fn invalid_memory_options_are_rejected() {
    let mut compiler = Compiler::new(InterpBackend, JitConfig::default());
    let func = compiler.build(CODE_BASE, &guest_memory(&[RET])).unwrap();
    let options = WasmOptions {
        memory_min_pages: 4,
        memory_max_pages: Some(2),
        ..WasmOptions::default()
    };
    assert!(emit_function(&func, &options).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arithmetic_matches_interpreter(
        x0 in any::<u64>(),
        x1 in prop_oneof![any::<u64>(), 0u64..70],
        x15 in any::<u64>(),
        nzcv in 0u32..16,
    ) {
        assert_backends_agree(&ARITHMETIC, |cpu| {
            cpu.set_x(0, Width::W64, x0);
            cpu.set_x(1, Width::W64, x1);
            cpu.set_x(15, Width::W64, x15);
            cpu.set_nzcv(a64_cpu::Nzcv::from_bits(nzcv));
        });
    }

    #[test]
    fn memory_ops_match_interpreter(x0 in any::<u64>(), x1 in any::<u64>()) {
        assert_backends_agree(&MEMORY_OPS, |cpu| {
            cpu.set_x(0, Width::W64, x0);
            cpu.set_x(1, Width::W64, x1);
            cpu.set_x(7, Width::W64, 0x8000);
            cpu.set_x(9, Width::W64, 2);
        });
    }

    #[test]
    fn system_ops_match_interpreter(
        x1 in any::<u64>(),
        x5 in any::<u64>(),
        x8 in any::<u64>(),
        sp0 in 0u64..0x8000,
    ) {
        assert_backends_agree(&SYSTEM_OPS, |cpu| {
            cpu.set_x(1, Width::W64, x1);
            cpu.set_x(5, Width::W64, x5);
            cpu.set_x(8, Width::W64, x8);
            cpu.set_sp_el(0, sp0);
        });
    }
}

#[test]
fn loops_run_and_charge_tick() {
    assert_backends_agree(&COUNTDOWN, |cpu| cpu.set_x(0, Width::W64, 10));

    let wasm = compile_to_wasm(&COUNTDOWN);
    let mut cpu = CpuState::new();
    initial_cpu(&mut cpu);
    cpu.set_x(0, Width::W64, 10);
    let ram = guest_memory(&COUNTDOWN).as_slice().to_vec();

    let (result, cpu_out, _, host_out) = run_wasm(
        &wasm,
        &cpu,
        &ram,
        Host {
            budget: 20,
            ..host()
        },
    );
    assert_eq!(result.unwrap() as u64, RETURN_SENTINEL);
    assert_eq!(cpu_out.x(0, Width::W64), 0);
    assert_eq!(host_out.budget, 20 - 9);

    let (result, _, _, _) = run_wasm(
        &wasm,
        &cpu,
        &ram,
        Host {
            budget: 3,
            ..host()
        },
    );
    assert!(result.is_err());
}

#[test]
fn call_slot_result_decides_whether_the_caller_continues() {
    let code = [
        0xaa1e03f3, // mov x19, x30
        0xd2800060, // mov x0, #3
        0x94000003, // bl #12
        0xaa1303fe, // mov x30, x19
        RET,
        0x8b000000, // add x0, x0, x0
        RET,
    ];
    let wasm = compile_to_wasm(&code);
    let mut cpu = CpuState::new();
    initial_cpu(&mut cpu);
    let ram = guest_memory(&code).as_slice().to_vec();
    let link = (CODE_BASE + 0xc) as i64;

    let (result, cpu_out, _, host_out) = run_wasm(
        &wasm,
        &cpu,
        &ram,
        Host {
            call_slot_returns: link,
            ..host()
        },
    );
    assert_eq!(result.unwrap() as u64, RETURN_SENTINEL);
    assert_eq!(cpu_out.x(30, Width::W64), RETURN_SENTINEL);
    assert_eq!(cpu_out.x(0, Width::W64), 3);
    // `build` never installs the caller, so the callee holds the first slot.
    assert_eq!(host_out.slot_calls, vec![0]);

    // A callee that returns somewhere else unwinds the caller with that address.
    let (result, _, _, _) = run_wasm(
        &wasm,
        &cpu,
        &ram,
        Host {
            call_slot_returns: 0x7777,
            ..host()
        },
    );
    assert_eq!(result.unwrap(), 0x7777);
}

#[test]
fn accesses_outside_guest_ram_trap() {
    let code = [
        0xf9400020, // ldr x0, [x1]
        RET,
    ];
    let wasm = compile_to_wasm(&code);
    let mut cpu = CpuState::new();
    initial_cpu(&mut cpu);
    let ram = guest_memory(&code).as_slice().to_vec();

    // The CpuState page is in linear memory but not guest RAM.
    cpu.set_x(1, Width::W64, CPU_PTR as u64);
    let (result, _, _, _) = run_wasm(&wasm, &cpu, &ram, host());
    assert!(result.is_err());

    cpu.set_x(1, Width::W64, RAM_BYTES as u64 - 8);
    let (result, _, _, _) = run_wasm(&wasm, &cpu, &ram, host());
    assert_eq!(result.unwrap() as u64, RETURN_SENTINEL);
}
