//! Assembler text helpers shared by the instruction formatters.

use a64_cpu::bits::sign_extend;
use a64_cpu::Cond;
use a64_decoder::Fields;

/// `mnemonic op1, op2, ...`.
pub fn asm<S: AsRef<str>>(mnemonic: &str, operands: &[S]) -> String {
    let mut out = String::from(mnemonic);
    for (i, operand) in operands.iter().enumerate() {
        out.push_str(if i == 0 { " " } else { ", " });
        out.push_str(operand.as_ref());
    }
    out
}

/// Signed immediate: `#0`, decimal below 10 in magnitude, hex otherwise.
pub fn imm(value: i64) -> String {
    let magnitude = value.unsigned_abs();
    let sign = if value < 0 { "-" } else { "" };
    if magnitude < 10 {
        format!("#{sign}{magnitude}")
    } else {
        format!("#{sign}{magnitude:#x}")
    }
}

/// Unsigned immediate, same rules as [`imm`].
pub fn uimm(value: u64) -> String {
    if value < 10 {
        format!("#{value}")
    } else {
        format!("#{value:#x}")
    }
}

/// Word that decodes but falls in an unallocated sub-encoding.
pub fn inst(word: u32) -> String {
    format!(".inst {word:#010x}")
}

pub fn unallocated(f: &Fields) -> String {
    inst(f.word())
}

/// General register; 31 is the zero register.
pub fn reg(n: u32, sf: u32) -> String {
    match (n, sf & 1) {
        (31, 1) => "xzr".to_string(),
        (31, _) => "wzr".to_string(),
        (n, 1) => format!("x{n}"),
        (n, _) => format!("w{n}"),
    }
}

/// General register; 31 is the stack pointer.
pub fn reg_sp(n: u32, sf: u32) -> String {
    match (n, sf & 1) {
        (31, 1) => "sp".to_string(),
        (31, _) => "wsp".to_string(),
        _ => reg(n, sf),
    }
}

pub fn xreg(n: u32) -> String {
    reg(n, 1)
}

pub fn wreg(n: u32) -> String {
    reg(n, 0)
}

pub fn cond(bits: u32) -> &'static str {
    Cond::from_bits(bits).name()
}

/// Branch displacement `field << 2`, sign-extended from `bits + 2` bits.
pub fn branch_offset(field: u32, bits: u32) -> i64 {
    sign_extend(u64::from(field) << 2, bits + 2)
}

pub fn shift_name(shift: u32) -> &'static str {
    match shift & 3 {
        0 => "lsl",
        1 => "lsr",
        2 => "asr",
        _ => "ror",
    }
}

pub fn extend_name(option: u32) -> &'static str {
    match option & 7 {
        0 => "uxtb",
        1 => "uxth",
        2 => "uxtw",
        3 => "uxtx",
        4 => "sxtb",
        5 => "sxth",
        6 => "sxtw",
        _ => "sxtx",
    }
}

/// Trailing `, <shift> #amount` of a shifted-register operand, omitted for `lsl #0`.
pub fn shift_suffix(operands: &mut Vec<String>, shift: u32, amount: u32) {
    if amount != 0 || shift != 0 {
        operands.push(format!("{} {}", shift_name(shift), imm(i64::from(amount))));
    }
}

/// `[base]`, `[base, #off]`, `[base, #off]!` or `[base], #off`.
pub fn mem_operand(base: u32, offset: i64, mode: AddrMode) -> String {
    let base = reg_sp(base, 1);
    match mode {
        AddrMode::Offset if offset == 0 => format!("[{base}]"),
        AddrMode::Offset => format!("[{base}, {}]", imm(offset)),
        AddrMode::PreIndex => format!("[{base}, {}]!", imm(offset)),
        AddrMode::PostIndex => format!("[{base}], {}", imm(offset)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrMode {
    Offset,
    PreIndex,
    PostIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediates() {
        assert_eq!(imm(0), "#0");
        assert_eq!(imm(9), "#9");
        assert_eq!(imm(-9), "#-9");
        assert_eq!(imm(10), "#0xa");
        assert_eq!(imm(-0x100), "#-0x100");
        assert_eq!(imm(i64::MIN), "#-0x8000000000000000");
        assert_eq!(uimm(u64::MAX), "#0xffffffffffffffff");
    }

    #[test]
    fn registers() {
        assert_eq!(reg(31, 1), "xzr");
        assert_eq!(reg(31, 0), "wzr");
        assert_eq!(reg_sp(31, 0), "wsp");
        assert_eq!(reg_sp(3, 1), "x3");
        assert_eq!(asm("ret", &[] as &[String]), "ret");
        assert_eq!(asm("add", &["x0", "x1", "#1"]), "add x0, x1, #1");
    }

    #[test]
    fn memory_operands() {
        assert_eq!(mem_operand(31, 0, AddrMode::Offset), "[sp]");
        assert_eq!(mem_operand(2, 8, AddrMode::Offset), "[x2, #8]");
        assert_eq!(mem_operand(31, -16, AddrMode::PreIndex), "[sp, #-0x10]!");
        assert_eq!(mem_operand(1, 16, AddrMode::PostIndex), "[x1], #0x10");
    }

    #[test]
    fn branch_offsets_sign_extend() {
        assert_eq!(branch_offset(1, 19), 4);
        assert_eq!(branch_offset(0x7ffff, 19), -4);
        assert_eq!(branch_offset(0x3ff_ffff, 26), -4);
        assert_eq!(branch_offset(0x200_0000, 26), -(1 << 27));
    }
}
