use crate::flags::{Flag, Nzcv};
use crate::sysreg::{self, SysRegBinding, SYS_SLOTS};

/// Operating width of a general-register access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    /// Width selected by the `sf` bit of most data-processing encodings.
    #[inline]
    pub const fn from_sf(sf: u32) -> Self {
        if sf & 1 == 1 {
            Width::W64
        } else {
            Width::W32
        }
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    #[inline]
    pub const fn mask(self) -> u64 {
        match self {
            Width::W32 => 0xffff_ffff,
            Width::W64 => u64::MAX,
        }
    }

    #[inline]
    pub const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }
}

/// Architectural register state of a single AArch64 core.
///
/// The state is also the ABI shared with generated WebAssembly: it is stored in linear memory at
/// `cpu_ptr` as a flat sequence of little-endian `u64` words in field order.
///
/// Layout (bytes):
/// - `x[0..31]`
/// - `sp_el[0..4]`: banked stack pointers `SP_EL0..SP_EL3`
/// - `elr_el[0..3]`, `spsr_el[0..3]`: `ELR_EL1..3`, `SPSR_EL1..3`
/// - `flags[0..4]`: N, Z, C, V as 0/1
/// - `el`, `spsel`, `daif`
/// - `sys[0..SYS_SLOTS]`: storage for backed system registers
#[derive(Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CpuState {
    x: [u64; 31],
    sp_el: [u64; 4],
    elr_el: [u64; 3],
    spsr_el: [u64; 3],
    flags: [u64; 4],
    el: u64,
    spsel: u64,
    daif: u64,
    sys: [u64; SYS_SLOTS],
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            x: [0; 31],
            sp_el: [0; 4],
            elr_el: [0; 3],
            spsr_el: [0; 3],
            flags: [0; 4],
            // EL1 with SPSel clear, so `sp` starts out as SP_EL0.
            el: 1,
            spsel: 0,
            // Reset with all exceptions masked.
            daif: 0x3c0,
            sys: [0; SYS_SLOTS],
        }
    }
}

impl CpuState {
    pub const X_OFFSET: u32 = 0;
    pub const SP_EL_OFFSET: u32 = Self::X_OFFSET + 31 * 8;
    pub const ELR_OFFSET: u32 = Self::SP_EL_OFFSET + 4 * 8;
    pub const SPSR_OFFSET: u32 = Self::ELR_OFFSET + 3 * 8;
    pub const FLAGS_OFFSET: u32 = Self::SPSR_OFFSET + 3 * 8;
    pub const EL_OFFSET: u32 = Self::FLAGS_OFFSET + 4 * 8;
    pub const SPSEL_OFFSET: u32 = Self::EL_OFFSET + 8;
    pub const DAIF_OFFSET: u32 = Self::SPSEL_OFFSET + 8;
    pub const SYS_OFFSET: u32 = Self::DAIF_OFFSET + 8;
    pub const BYTE_SIZE: usize = Self::SYS_OFFSET as usize + SYS_SLOTS * 8;
    const WORDS: usize = Self::BYTE_SIZE / 8;

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub const fn x_offset(index: u8) -> u32 {
        Self::X_OFFSET + (index as u32) * 8
    }

    #[inline]
    pub const fn flag_offset(flag: Flag) -> u32 {
        Self::FLAGS_OFFSET + (flag as u32) * 8
    }

    #[inline]
    pub const fn sys_offset(slot: usize) -> u32 {
        Self::SYS_OFFSET + (slot as u32) * 8
    }

    /// Read `x<index>` at `width`; a 32-bit read truncates.
    #[inline]
    pub fn x(&self, index: u8, width: Width) -> u64 {
        self.x[index as usize] & width.mask()
    }

    /// Write `x<index>`; a 32-bit write zero-extends into the full register.
    #[inline]
    pub fn set_x(&mut self, index: u8, width: Width, value: u64) {
        self.x[index as usize] = value & width.mask();
    }

    /// Index of the stack pointer selected by `PSTATE.SP` and the current EL.
    #[inline]
    pub fn sp_index(&self) -> usize {
        if self.spsel & 1 == 1 {
            self.el as usize & 3
        } else {
            0
        }
    }

    pub fn sp(&self) -> u64 {
        self.sp_el[self.sp_index()]
    }

    pub fn set_sp(&mut self, value: u64) {
        let idx = self.sp_index();
        self.sp_el[idx] = value;
    }

    pub fn sp_el(&self, el: u8) -> u64 {
        self.sp_el[el as usize & 3]
    }

    pub fn set_sp_el(&mut self, el: u8, value: u64) {
        self.sp_el[el as usize & 3] = value;
    }

    /// `ELR_ELn` for `n` in `1..=3`.
    pub fn elr(&self, el: u8) -> u64 {
        self.elr_el[bank_index(el)]
    }

    pub fn set_elr(&mut self, el: u8, value: u64) {
        self.elr_el[bank_index(el)] = value;
    }

    /// `SPSR_ELn` for `n` in `1..=3`.
    pub fn spsr(&self, el: u8) -> u64 {
        self.spsr_el[bank_index(el)]
    }

    pub fn set_spsr(&mut self, el: u8, value: u64) {
        self.spsr_el[bank_index(el)] = value;
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        self.flags[flag as usize] != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.flags[flag as usize] = value as u64;
    }

    pub fn nzcv(&self) -> Nzcv {
        Nzcv {
            n: self.flag(Flag::N),
            z: self.flag(Flag::Z),
            c: self.flag(Flag::C),
            v: self.flag(Flag::V),
        }
    }

    pub fn set_nzcv(&mut self, nzcv: Nzcv) {
        self.set_flag(Flag::N, nzcv.n);
        self.set_flag(Flag::Z, nzcv.z);
        self.set_flag(Flag::C, nzcv.c);
        self.set_flag(Flag::V, nzcv.v);
    }

    #[inline]
    pub fn el(&self) -> u8 {
        (self.el & 3) as u8
    }

    pub fn set_el(&mut self, el: u8) {
        self.el = u64::from(el & 3);
    }

    #[inline]
    pub fn spsel(&self) -> bool {
        self.spsel & 1 == 1
    }

    pub fn set_spsel(&mut self, spsel: bool) {
        self.spsel = spsel as u64;
    }

    pub fn daif(&self) -> u64 {
        self.daif
    }

    pub fn set_daif(&mut self, value: u64) {
        self.daif = value & sysreg::DAIF_MASK;
    }

    pub fn sys_slot(&self, slot: usize) -> u64 {
        self.sys[slot]
    }

    pub fn set_sys_slot(&mut self, slot: usize, value: u64) {
        self.sys[slot] = value;
    }

    /// Read a system register by selector; unknown registers and registers without a read
    /// binding read as zero.
    pub fn read_sysreg(&self, selector: u16) -> u64 {
        let Some(binding) = sysreg::lookup(selector).and_then(|def| def.read) else {
            return 0;
        };
        match binding {
            SysRegBinding::Backed(slot) => self.sys[slot],
            SysRegBinding::Const(value) => value,
            SysRegBinding::CurrentEl => u64::from(self.el()) << 2,
            SysRegBinding::SpSel => self.spsel & 1,
            SysRegBinding::Nzcv => u64::from(self.nzcv().to_bits()) << 28,
            SysRegBinding::Daif => self.daif,
            SysRegBinding::StackPointer(el) => self.sp_el(el),
            SysRegBinding::Elr(el) => self.elr(el),
            SysRegBinding::Spsr(el) => self.spsr(el),
        }
    }

    /// Write a system register by selector; writes without a binding are discarded.
    pub fn write_sysreg(&mut self, selector: u16, value: u64) {
        let Some(binding) = sysreg::lookup(selector).and_then(|def| def.write) else {
            return;
        };
        match binding {
            SysRegBinding::Backed(slot) => self.sys[slot] = value,
            SysRegBinding::Const(_) | SysRegBinding::CurrentEl => {}
            SysRegBinding::SpSel => self.spsel = value & 1,
            SysRegBinding::Nzcv => self.set_nzcv(Nzcv::from_bits((value >> 28) as u32)),
            SysRegBinding::Daif => self.set_daif(value),
            SysRegBinding::StackPointer(el) => self.set_sp_el(el, value),
            SysRegBinding::Elr(el) => self.set_elr(el, value),
            SysRegBinding::Spsr(el) => self.set_spsr(el, value),
        }
    }

    fn to_words(&self) -> [u64; Self::WORDS] {
        let mut words = [0u64; Self::WORDS];
        let scalars = [self.el, self.spsel, self.daif];
        let fields = self
            .x
            .iter()
            .chain(&self.sp_el)
            .chain(&self.elr_el)
            .chain(&self.spsr_el)
            .chain(&self.flags)
            .chain(&scalars)
            .chain(&self.sys);
        for (slot, value) in words.iter_mut().zip(fields) {
            *slot = *value;
        }
        words
    }

    fn from_words(words: &[u64; Self::WORDS]) -> Self {
        let mut state = Self::default();
        let mut it = words.iter().copied();
        let mut fill = |dst: &mut [u64]| {
            for slot in dst {
                *slot = it.next().unwrap_or(0);
            }
        };
        fill(&mut state.x);
        fill(&mut state.sp_el);
        fill(&mut state.elr_el);
        fill(&mut state.spsr_el);
        fill(&mut state.flags);
        let mut scalars = [0u64; 3];
        fill(&mut scalars);
        fill(&mut state.sys);
        [state.el, state.spsel, state.daif] = scalars;
        state
    }

    /// Serialize into `mem[base..base + BYTE_SIZE]`.
    pub fn write_to_mem(&self, mem: &mut [u8], base: usize) {
        assert!(
            base + Self::BYTE_SIZE <= mem.len(),
            "CpuState write out of bounds"
        );
        for (i, word) in self.to_words().iter().enumerate() {
            let off = base + i * 8;
            mem[off..off + 8].copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn read_from_mem(mem: &[u8], base: usize) -> Self {
        assert!(
            base + Self::BYTE_SIZE <= mem.len(),
            "CpuState read out of bounds"
        );
        let mut words = [0u64; Self::WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            let off = base + i * 8;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&mem[off..off + 8]);
            *word = u64::from_le_bytes(buf);
        }
        Self::from_words(&words)
    }
}

/// `ELR`/`SPSR` bank for `el`; EL0 has no bank of its own and shares EL1's.
#[inline]
fn bank_index(el: u8) -> usize {
    match el & 3 {
        0 | 1 => 0,
        n => n as usize - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    #[test]
    fn layout_matches_offsets() {
        assert_eq!(offset_of!(CpuState, x), CpuState::X_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, sp_el), CpuState::SP_EL_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, elr_el), CpuState::ELR_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, spsr_el), CpuState::SPSR_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, flags), CpuState::FLAGS_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, el), CpuState::EL_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, spsel), CpuState::SPSEL_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, daif), CpuState::DAIF_OFFSET as usize);
        assert_eq!(offset_of!(CpuState, sys), CpuState::SYS_OFFSET as usize);
        assert_eq!(std::mem::size_of::<CpuState>(), CpuState::BYTE_SIZE);
    }

    #[test]
    fn narrow_writes_zero_extend() {
        let mut cpu = CpuState::new();
        cpu.set_x(3, Width::W64, u64::MAX);
        cpu.set_x(3, Width::W32, 0x1_2345_6789);
        assert_eq!(cpu.x(3, Width::W64), 0x2345_6789);
        cpu.set_x(4, Width::W64, 0xdead_beef_cafe_f00d);
        assert_eq!(cpu.x(4, Width::W32), 0xcafe_f00d);
    }

    #[test]
    fn reset_state_selects_sp_el0() {
        let mut cpu = CpuState::new();
        assert_eq!(cpu.el(), 1);
        assert!(!cpu.spsel());
        cpu.set_sp(0x8000);
        assert_eq!(cpu.sp_el(0), 0x8000);
        assert_eq!(cpu.sp_el(1), 0);
    }

    #[test]
    fn stack_pointer_follows_spsel_and_el() {
        let mut cpu = CpuState::new();
        for el in 0..4u8 {
            cpu.set_sp_el(el, 0x1000 * (u64::from(el) + 1));
        }
        assert_eq!(cpu.sp(), 0x1000);
        cpu.set_spsel(true);
        assert_eq!(cpu.sp(), 0x2000);
        cpu.set_el(3);
        assert_eq!(cpu.sp(), 0x4000);
        cpu.set_spsel(false);
        assert_eq!(cpu.sp(), 0x1000);
        cpu.set_sp(0x1234);
        assert_eq!(cpu.sp_el(0), 0x1234);
        assert_eq!(cpu.sp_el(3), 0x4000);
        cpu.set_el(0);
        cpu.set_spsel(true);
        assert_eq!(cpu.sp(), 0x1234);
    }

    #[test]
    fn memory_roundtrip_preserves_every_field() {
        let mut cpu = CpuState::new();
        cpu.set_x(30, Width::W64, 0xfeed);
        cpu.set_sp_el(2, 0x8000);
        cpu.set_elr(3, 0x4444);
        cpu.set_spsr(1, 0x3c5);
        cpu.set_flag(Flag::C, true);
        cpu.set_el(2);
        cpu.set_sys_slot(SYS_SLOTS - 1, 7);

        let mut mem = vec![0u8; 64 + CpuState::BYTE_SIZE];
        cpu.write_to_mem(&mut mem, 64);
        assert_eq!(CpuState::read_from_mem(&mem, 64), cpu);
        let off = 64 + CpuState::flag_offset(Flag::C) as usize;
        assert_eq!(mem[off], 1);
    }

    #[test]
    fn sysreg_bindings() {
        let mut cpu = CpuState::new();
        cpu.set_el(3);
        assert_eq!(cpu.read_sysreg(sysreg::CURRENT_EL), 3 << 2);
        cpu.write_sysreg(sysreg::CURRENT_EL, 0);
        assert_eq!(cpu.el(), 3);

        cpu.write_sysreg(sysreg::NZCV, 0x6000_0000);
        assert_eq!(cpu.nzcv(), Nzcv::from_bits(0b0110));
        assert_eq!(cpu.read_sysreg(sysreg::NZCV), 0x6000_0000);

        cpu.write_sysreg(sysreg::VBAR_EL1, 0x8_0000);
        assert_eq!(cpu.read_sysreg(sysreg::VBAR_EL1), 0x8_0000);

        cpu.write_sysreg(sysreg::ELR_EL2, 0x42);
        assert_eq!(cpu.elr(2), 0x42);

        // Unknown selectors read zero and swallow writes.
        cpu.write_sysreg(0xffff, 5);
        assert_eq!(cpu.read_sysreg(0xffff), 0);
    }
}
