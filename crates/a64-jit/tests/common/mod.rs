#![allow(dead_code)]

use a64_cpu::{CpuState, GuestMemory};
use a64_jit::{Emulator, InterpBackend, JitConfig, JitError};

/// Address test programs are loaded at.
pub const CODE_BASE: u64 = 0x400;

/// Link register value on entry; a program that returns normally hands this back.
pub const RETURN_SENTINEL: u64 = 0xdead_0000;

pub const RAM_BYTES: usize = 0x1_0000;

/// Initial stack pointer, 16-byte aligned at the top of RAM.
pub const STACK_TOP: u64 = RAM_BYTES as u64;

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

pub fn guest_memory(code: &[u32]) -> GuestMemory {
    let mut mem = GuestMemory::new(RAM_BYTES);
    mem.load_image(CODE_BASE, &words_to_bytes(code)).unwrap();
    mem
}

pub fn initial_cpu(cpu: &mut CpuState) {
    cpu.set_x(30, a64_cpu::Width::W64, RETURN_SENTINEL);
    cpu.set_sp(STACK_TOP);
}

pub fn emulator(code: &[u32], config: JitConfig) -> Emulator<InterpBackend> {
    let mut emu = Emulator::new(guest_memory(code), InterpBackend, config);
    initial_cpu(emu.cpu_mut());
    emu
}

/// Run `code` from [`CODE_BASE`] after `setup`, returning the emulator and the address the
/// program returned to.
pub fn run_with(
    code: &[u32],
    setup: impl FnOnce(&mut CpuState),
) -> (Emulator<InterpBackend>, Result<u64, JitError>) {
    let mut emu = emulator(code, JitConfig::default());
    setup(emu.cpu_mut());
    let result = emu.execute(CODE_BASE);
    (emu, result)
}

/// Run `code` and require it to return to the sentinel.
pub fn run(code: &[u32], setup: impl FnOnce(&mut CpuState)) -> Emulator<InterpBackend> {
    let (emu, result) = run_with(code, setup);
    assert_eq!(result.unwrap(), RETURN_SENTINEL);
    emu
}
