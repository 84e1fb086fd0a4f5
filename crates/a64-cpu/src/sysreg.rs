//! System registers reachable through `MRS`/`MSR`.
//!
//! Registers are addressed by a 16-bit selector `op0:op1:CRn:CRm:op2`. Only a sparse set is
//! modelled; anything else reads as zero and ignores writes.

/// Number of [`SysRegBinding::Backed`] storage slots in [`crate::CpuState`].
pub const SYS_SLOTS: usize = 20;

/// `DAIF` bits (D, A, I, F at bits 9..6).
pub const DAIF_MASK: u64 = 0x3c0;

/// Where an access to a system register goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysRegBinding {
    /// Plain storage in `CpuState::sys[slot]`.
    Backed(usize),
    /// Fixed identification value.
    Const(u64),
    /// `PSTATE.EL` in bits 3..2.
    CurrentEl,
    /// `PSTATE.SP` in bit 0.
    SpSel,
    /// Flags in bits 31..28.
    Nzcv,
    Daif,
    /// `SP_ELn`.
    StackPointer(u8),
    /// `ELR_ELn`.
    Elr(u8),
    /// `SPSR_ELn`.
    Spsr(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SysRegDef {
    pub name: &'static str,
    pub selector: u16,
    /// `None` reads as zero.
    pub read: Option<SysRegBinding>,
    /// `None` discards the write.
    pub write: Option<SysRegBinding>,
}

/// Pack `op0:op1:CRn:CRm:op2` into a selector.
pub const fn selector(op0: u32, op1: u32, crn: u32, crm: u32, op2: u32) -> u16 {
    (((op0 & 3) << 14) | ((op1 & 7) << 11) | ((crn & 0xf) << 7) | ((crm & 0xf) << 3) | (op2 & 7))
        as u16
}

/// Split a selector back into `(op0, op1, CRn, CRm, op2)`.
pub const fn split(selector: u16) -> (u32, u32, u32, u32, u32) {
    let s = selector as u32;
    ((s >> 14) & 3, (s >> 11) & 7, (s >> 7) & 0xf, (s >> 3) & 0xf, s & 7)
}

pub const MIDR_EL1: u16 = selector(3, 0, 0, 0, 0);
pub const MPIDR_EL1: u16 = selector(3, 0, 0, 0, 5);
pub const ID_AA64PFR0_EL1: u16 = selector(3, 0, 0, 4, 0);
pub const SCTLR_EL1: u16 = selector(3, 0, 1, 0, 0);
pub const CPACR_EL1: u16 = selector(3, 0, 1, 0, 2);
pub const TTBR0_EL1: u16 = selector(3, 0, 2, 0, 0);
pub const TTBR1_EL1: u16 = selector(3, 0, 2, 0, 1);
pub const TCR_EL1: u16 = selector(3, 0, 2, 0, 2);
pub const SPSR_EL1: u16 = selector(3, 0, 4, 0, 0);
pub const ELR_EL1: u16 = selector(3, 0, 4, 0, 1);
pub const SP_EL0: u16 = selector(3, 0, 4, 1, 0);
pub const SPSEL: u16 = selector(3, 0, 4, 2, 0);
pub const CURRENT_EL: u16 = selector(3, 0, 4, 2, 2);
pub const ESR_EL1: u16 = selector(3, 0, 5, 2, 0);
pub const FAR_EL1: u16 = selector(3, 0, 6, 0, 0);
pub const MAIR_EL1: u16 = selector(3, 0, 10, 2, 0);
pub const VBAR_EL1: u16 = selector(3, 0, 12, 0, 0);
pub const CONTEXTIDR_EL1: u16 = selector(3, 0, 13, 0, 1);
pub const TPIDR_EL1: u16 = selector(3, 0, 13, 0, 4);
pub const CTR_EL0: u16 = selector(3, 3, 0, 0, 1);
pub const DCZID_EL0: u16 = selector(3, 3, 0, 0, 7);
pub const NZCV: u16 = selector(3, 3, 4, 2, 0);
pub const DAIF: u16 = selector(3, 3, 4, 2, 1);
pub const TPIDR_EL0: u16 = selector(3, 3, 13, 0, 2);
pub const TPIDRRO_EL0: u16 = selector(3, 3, 13, 0, 3);
pub const CNTFRQ_EL0: u16 = selector(3, 3, 14, 0, 0);
pub const SCTLR_EL2: u16 = selector(3, 4, 1, 0, 0);
pub const HCR_EL2: u16 = selector(3, 4, 1, 1, 0);
pub const SPSR_EL2: u16 = selector(3, 4, 4, 0, 0);
pub const ELR_EL2: u16 = selector(3, 4, 4, 0, 1);
pub const SP_EL1: u16 = selector(3, 4, 4, 1, 0);
pub const VBAR_EL2: u16 = selector(3, 4, 12, 0, 0);
pub const SCTLR_EL3: u16 = selector(3, 6, 1, 0, 0);
pub const SCR_EL3: u16 = selector(3, 6, 1, 1, 0);
pub const SPSR_EL3: u16 = selector(3, 6, 4, 0, 0);
pub const ELR_EL3: u16 = selector(3, 6, 4, 0, 1);
pub const SP_EL2: u16 = selector(3, 6, 4, 1, 0);
pub const VBAR_EL3: u16 = selector(3, 6, 12, 0, 0);

const fn rw(name: &'static str, selector: u16, binding: SysRegBinding) -> SysRegDef {
    SysRegDef {
        name,
        selector,
        read: Some(binding),
        write: Some(binding),
    }
}

const fn ro(name: &'static str, selector: u16, binding: SysRegBinding) -> SysRegDef {
    SysRegDef {
        name,
        selector,
        read: Some(binding),
        write: None,
    }
}

use SysRegBinding::{Backed, Const};

static SYSREGS: &[SysRegDef] = &[
    // Cortex-A53 r0p4 identification.
    ro("midr_el1", MIDR_EL1, Const(0x410f_d034)),
    ro("mpidr_el1", MPIDR_EL1, Const(0x8000_0000)),
    // EL0..EL3 AArch64-only, no FP/AdvSIMD.
    ro("id_aa64pfr0_el1", ID_AA64PFR0_EL1, Const(0x00ff_1111)),
    rw("sctlr_el1", SCTLR_EL1, Backed(0)),
    rw("cpacr_el1", CPACR_EL1, Backed(1)),
    rw("ttbr0_el1", TTBR0_EL1, Backed(2)),
    rw("ttbr1_el1", TTBR1_EL1, Backed(3)),
    rw("tcr_el1", TCR_EL1, Backed(4)),
    rw("spsr_el1", SPSR_EL1, SysRegBinding::Spsr(1)),
    rw("elr_el1", ELR_EL1, SysRegBinding::Elr(1)),
    rw("sp_el0", SP_EL0, SysRegBinding::StackPointer(0)),
    rw("spsel", SPSEL, SysRegBinding::SpSel),
    ro("currentel", CURRENT_EL, SysRegBinding::CurrentEl),
    rw("esr_el1", ESR_EL1, Backed(5)),
    rw("far_el1", FAR_EL1, Backed(6)),
    rw("mair_el1", MAIR_EL1, Backed(7)),
    rw("vbar_el1", VBAR_EL1, Backed(8)),
    rw("contextidr_el1", CONTEXTIDR_EL1, Backed(9)),
    rw("tpidr_el1", TPIDR_EL1, Backed(10)),
    ro("ctr_el0", CTR_EL0, Const(0x8444_c004)),
    ro("dczid_el0", DCZID_EL0, Const(0x4)),
    rw("nzcv", NZCV, SysRegBinding::Nzcv),
    rw("daif", DAIF, SysRegBinding::Daif),
    rw("tpidr_el0", TPIDR_EL0, Backed(11)),
    rw("tpidrro_el0", TPIDRRO_EL0, Backed(12)),
    rw("cntfrq_el0", CNTFRQ_EL0, Backed(13)),
    rw("sctlr_el2", SCTLR_EL2, Backed(14)),
    rw("hcr_el2", HCR_EL2, Backed(15)),
    rw("spsr_el2", SPSR_EL2, SysRegBinding::Spsr(2)),
    rw("elr_el2", ELR_EL2, SysRegBinding::Elr(2)),
    rw("sp_el1", SP_EL1, SysRegBinding::StackPointer(1)),
    rw("vbar_el2", VBAR_EL2, Backed(16)),
    rw("sctlr_el3", SCTLR_EL3, Backed(17)),
    rw("scr_el3", SCR_EL3, Backed(18)),
    rw("spsr_el3", SPSR_EL3, SysRegBinding::Spsr(3)),
    rw("elr_el3", ELR_EL3, SysRegBinding::Elr(3)),
    rw("sp_el2", SP_EL2, SysRegBinding::StackPointer(2)),
    rw("vbar_el3", VBAR_EL3, Backed(19)),
];

pub fn lookup(selector: u16) -> Option<&'static SysRegDef> {
    SYSREGS.iter().find(|def| def.selector == selector)
}

pub fn all() -> &'static [SysRegDef] {
    SYSREGS
}

/// Assembler name of a selector: the table name, or the generic `s<op0>_<op1>_c<n>_c<m>_<op2>`.
pub fn name(selector: u16) -> String {
    match lookup(selector) {
        Some(def) => def.name.to_string(),
        None => {
            let (op0, op1, crn, crm, op2) = split(selector);
            format!("s{op0}_{op1}_c{crn}_c{crm}_{op2}")
        }
    }
}
