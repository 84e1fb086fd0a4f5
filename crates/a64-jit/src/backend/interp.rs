//! Tree-walking backend: runs the structured IR directly against a [`Runtime`].

use a64_cpu::Width;

use crate::backend::{Backend, Runtime};
use crate::error::{InvariantViolation, JitError};
use crate::ir::{
    eval_bin, eval_cmp, eval_extend, ElBank, IrOp, Operand, Place, StructuredFunction, Ty,
};
use crate::shape::{walk, Visitor};

#[derive(Debug, Default, Clone, Copy)]
pub struct InterpBackend;

#[derive(Debug, Clone)]
pub struct InterpFunction {
    func: StructuredFunction,
}

impl InterpFunction {
    pub fn structured(&self) -> &StructuredFunction {
        &self.func
    }
}

impl Backend for InterpBackend {
    type Function = InterpFunction;

    fn lower(&mut self, func: StructuredFunction) -> Result<InterpFunction, JitError> {
        Ok(InterpFunction { func })
    }

    fn invoke(func: &InterpFunction, rt: &mut dyn Runtime) -> Result<u64, JitError> {
        let func = &func.func;
        let mut frame = Frame {
            rt,
            locals: vec![0; func.locals.len()],
            types: &func.locals,
        };
        walk(&func.body, &mut frame)?
            .ok_or(JitError::Invariant(InvariantViolation::FellOffEnd { entry: func.entry }))
    }
}

struct Frame<'a> {
    rt: &'a mut dyn Runtime,
    locals: Vec<u64>,
    types: &'a [Ty],
}

/// EL whose `ELR`/`SPSR` bank `bank` names when running at `current`.
fn bank(current: u8, bank: ElBank) -> u8 {
    match bank {
        ElBank::Current => current,
        ElBank::El(el) => el,
    }
}

impl Frame<'_> {
    fn read(&mut self, operand: &Operand) -> u64 {
        match operand {
            Operand::Imm(value) => *value,
            Operand::Place(place) => self.read_place(*place),
        }
    }

    fn read_place(&mut self, place: Place) -> u64 {
        let cpu = self.rt.cpu();
        match place {
            Place::X(n) if n < 31 => cpu.x(n, Width::W64),
            Place::X(_) => 0,
            Place::Sp => cpu.sp(),
            Place::SpEl(el) => cpu.sp_el(el),
            Place::Flag(flag) => cpu.flag(flag) as u64,
            Place::El => u64::from(cpu.el()),
            Place::SpSel => cpu.spsel() as u64,
            Place::Daif => cpu.daif(),
            Place::Elr(b) => cpu.elr(bank(cpu.el(), b)),
            Place::Spsr(b) => cpu.spsr(bank(cpu.el(), b)),
            Place::Sys(slot) => cpu.sys_slot(slot),
            Place::Local(local) => self.locals[local.0 as usize],
        }
    }

    fn write(&mut self, place: Place, value: u64) {
        if let Place::Local(local) = place {
            let idx = local.0 as usize;
            self.locals[idx] = value & self.types[idx].mask();
            return;
        }
        let cpu = self.rt.cpu();
        match place {
            Place::X(n) if n < 31 => cpu.set_x(n, Width::W64, value),
            Place::X(_) | Place::Local(_) => {}
            Place::Sp => cpu.set_sp(value),
            Place::SpEl(el) => cpu.set_sp_el(el, value),
            Place::Flag(flag) => cpu.set_flag(flag, value != 0),
            Place::El => cpu.set_el(value as u8),
            Place::SpSel => cpu.set_spsel(value & 1 == 1),
            Place::Daif => cpu.set_daif(value),
            Place::Elr(b) => {
                let el = bank(cpu.el(), b);
                cpu.set_elr(el, value);
            }
            Place::Spsr(b) => {
                let el = bank(cpu.el(), b);
                cpu.set_spsr(el, value);
            }
            Place::Sys(slot) => cpu.set_sys_slot(slot, value),
        }
    }

    fn run(&mut self, ops: &[IrOp]) -> Result<Option<u64>, JitError> {
        for op in ops {
            match op {
                IrOp::Mov { dst, src, width } => {
                    let value = self.read(src) & width.mask();
                    self.write(*dst, value);
                }
                IrOp::Bin {
                    dst,
                    op,
                    width,
                    lhs,
                    rhs,
                } => {
                    let value = eval_bin(*op, *width, self.read(lhs), self.read(rhs));
                    self.write(*dst, value);
                }
                IrOp::Cmp {
                    dst,
                    op,
                    width,
                    lhs,
                    rhs,
                } => {
                    let value = eval_cmp(*op, *width, self.read(lhs), self.read(rhs));
                    self.write(*dst, value);
                }
                IrOp::Select {
                    dst,
                    cond,
                    if_true,
                    if_false,
                } => {
                    let value = if self.read(cond) != 0 {
                        self.read(if_true)
                    } else {
                        self.read(if_false)
                    };
                    self.write(*dst, value);
                }
                IrOp::Extend {
                    dst,
                    src,
                    bits,
                    signed,
                } => {
                    let value = eval_extend(self.read(src), *bits, *signed);
                    self.write(*dst, value);
                }
                IrOp::Load { dst, addr, size } => {
                    let addr = self.read(addr);
                    let value = self.rt.memory().read_sized(addr, *size)?;
                    self.write(*dst, value);
                }
                IrOp::Store { addr, value, size } => {
                    let addr = self.read(addr);
                    let value = self.read(value);
                    self.rt.memory().write_sized(addr, *size, value)?;
                }
                IrOp::CallSlot { dst, slot } => {
                    let value = self.rt.call_slot(*slot)?;
                    self.write(*dst, value);
                }
                IrOp::JumpToPc { dst, target } => {
                    let target = self.read(target);
                    let value = self.rt.jump_to_pc(target)?;
                    self.write(*dst, value);
                }
                IrOp::If {
                    cond,
                    then_ops,
                    else_ops,
                } => {
                    let branch = if self.read(cond) != 0 {
                        then_ops
                    } else {
                        else_ops
                    };
                    if let Some(value) = self.run(branch)? {
                        return Ok(Some(value));
                    }
                }
                IrOp::Return { value } => return Ok(Some(self.read(value))),
            }
        }
        Ok(None)
    }
}

impl Visitor<Vec<IrOp>, Operand> for Frame<'_> {
    type Error = JitError;

    fn body(&mut self, body: &Vec<IrOp>) -> Result<Option<u64>, JitError> {
        self.run(body)
    }

    fn test(&mut self, cond: &Operand) -> Result<bool, JitError> {
        Ok(self.read(cond) != 0)
    }

    fn back_edge(&mut self) -> Result<(), JitError> {
        self.rt.tick()
    }
}
