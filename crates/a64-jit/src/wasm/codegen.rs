use a64_cpu::bits::ones;
use a64_cpu::sysreg::DAIF_MASK;
use a64_cpu::{CpuState, MemSize, Width};
use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemArg, MemoryType, Module, TypeSection, ValType,
};

use super::abi::{
    EXPORT_RUN, IMPORT_CALL_SLOT, IMPORT_JUMP_TO_PC, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_TICK,
    WASM32_MAX_PAGES,
};
use crate::error::JitError;
use crate::ir::{BinOp, CmpOp, ElBank, IrOp, Local, Operand, Place, StructuredFunction, Ty};
use crate::shape::{LabelId, Shape, Test};

#[derive(Debug, Clone, Copy)]
pub struct WasmOptions {
    /// Minimum size (in 64KiB pages) of the imported `env.memory`.
    pub memory_min_pages: u32,

    /// Maximum size (in 64KiB pages) of the imported `env.memory`.
    pub memory_max_pages: Option<u32>,

    /// Bytes of guest RAM at the bottom of linear memory. Guest loads and stores outside it trap.
    ///
    /// `None` skips the check, leaving out-of-range accesses to whatever the linear memory holds
    /// at that address.
    pub guest_ram_bytes: Option<u64>,

    /// Name of the exported entry point.
    pub export_name: &'static str,
}

impl Default for WasmOptions {
    fn default() -> Self {
        Self {
            memory_min_pages: 1,
            memory_max_pages: None,
            guest_ram_bytes: None,
            export_name: EXPORT_RUN,
        }
    }
}

impl WasmOptions {
    fn validate_memory_import(self) -> Result<(), JitError> {
        if self.memory_min_pages > WASM32_MAX_PAGES {
            return Err(JitError::Backend(format!(
                "env.memory min_pages ({}) exceeds wasm32 max pages ({WASM32_MAX_PAGES})",
                self.memory_min_pages
            )));
        }
        if let Some(max) = self.memory_max_pages {
            if max > WASM32_MAX_PAGES || self.memory_min_pages > max {
                return Err(JitError::Backend(format!(
                    "env.memory max_pages ({max}) must lie in {}..={WASM32_MAX_PAGES}",
                    self.memory_min_pages
                )));
            }
        }
        Ok(())
    }
}

/// Function indices of the host imports a module actually declares.
#[derive(Clone, Copy, Default)]
struct ImportedFuncs {
    call_slot: Option<u32>,
    jump_to_pc: Option<u32>,
    tick: Option<u32>,
    count: u32,
}

/// Encode `func` as a standalone module exporting `run(cpu_ptr: i32) -> i64`.
pub fn emit_function(func: &StructuredFunction, options: &WasmOptions) -> Result<Vec<u8>, JitError> {
    options.validate_memory_import()?;

    let uses_call_slot = func.any_op(|op| matches!(op, IrOp::CallSlot { .. }));
    let uses_jump = func.any_op(|op| matches!(op, IrOp::JumpToPc { .. }));
    let uses_tick = has_loop(&func.body);

    let mut module = Module::new();

    let mut types = TypeSection::new();
    let ty_call_slot = types.len();
    types
        .ty()
        .function([ValType::I32, ValType::I32], [ValType::I64]);
    let ty_jump_to_pc = types.len();
    types
        .ty()
        .function([ValType::I32, ValType::I64], [ValType::I64]);
    let ty_tick = types.len();
    types.ty().function([ValType::I32], []);
    let ty_run = types.len();
    types.ty().function([ValType::I32], [ValType::I64]);
    module.section(&types);

    let mut imports = ImportSection::new();
    imports.import(
        IMPORT_MODULE,
        IMPORT_MEMORY,
        MemoryType {
            minimum: u64::from(options.memory_min_pages),
            maximum: options.memory_max_pages.map(u64::from),
            memory64: false,
            shared: false,
            page_size_log2: None,
        },
    );

    let mut next_func = 0u32;
    let mut imported = ImportedFuncs::default();
    if uses_call_slot {
        imported.call_slot = Some(next(&mut next_func));
        imports.import(
            IMPORT_MODULE,
            IMPORT_CALL_SLOT,
            EntityType::Function(ty_call_slot),
        );
    }
    if uses_jump {
        imported.jump_to_pc = Some(next(&mut next_func));
        imports.import(
            IMPORT_MODULE,
            IMPORT_JUMP_TO_PC,
            EntityType::Function(ty_jump_to_pc),
        );
    }
    if uses_tick {
        imported.tick = Some(next(&mut next_func));
        imports.import(IMPORT_MODULE, IMPORT_TICK, EntityType::Function(ty_tick));
    }
    imported.count = next_func;
    module.section(&imports);

    let mut funcs = FunctionSection::new();
    funcs.function(ty_run);
    module.section(&funcs);

    let mut exports = ExportSection::new();
    exports.export(options.export_name, ExportKind::Func, imported.count);
    module.section(&exports);

    let layout = LocalsLayout::new(func.locals.len() as u32);
    let mut wasm_func = Function::new(vec![
        (layout.total_i64_locals(), ValType::I64),
        (1, ValType::I32),
    ]);

    let mut emitter = Emitter {
        func: &mut wasm_func,
        imported,
        layout,
        types: &func.locals,
        ram_bytes: options.guest_ram_bytes,
        frames: Vec::new(),
    };
    emitter.emit_shape(&func.body)?;
    // Structured bodies end every path with a return; reaching here is a codegen bug.
    emitter.func.instruction(&Instruction::Unreachable);
    emitter.func.instruction(&Instruction::End);

    let mut code = CodeSection::new();
    code.function(&wasm_func);
    module.section(&code);

    Ok(module.finish())
}

fn has_loop<B, C>(shape: &Shape<B, C>) -> bool {
    match shape {
        Shape::Loop { .. } => true,
        Shape::Seq(items) => items.iter().any(has_loop),
        Shape::Block { body, .. } => has_loop(body),
        Shape::If {
            then, otherwise, ..
        } => has_loop(then) || has_loop(otherwise),
        Shape::Body(_) | Shape::Br(_) | Shape::SetDispatch(_) => false,
    }
}

#[derive(Clone, Copy)]
struct LocalsLayout {
    values: u32,
}

impl LocalsLayout {
    fn new(values: u32) -> Self {
        Self { values }
    }

    fn cpu_ptr_local(self) -> u32 {
        0
    }

    fn value_local(self, Local(id): Local) -> u32 {
        1 + id
    }

    fn scratch_local(self) -> u32 {
        1 + self.values
    }

    fn lhs_local(self) -> u32 {
        self.scratch_local() + 1
    }

    fn rhs_local(self) -> u32 {
        self.scratch_local() + 2
    }

    fn dispatch_local(self) -> u32 {
        self.total_i64_locals() + 1
    }

    fn total_i64_locals(self) -> u32 {
        // values + scratch + lhs + rhs
        self.values + 3
    }
}

/// One enclosing structured construct; `label` is `None` for `if` arms.
struct Frame {
    label: Option<LabelId>,
    is_loop: bool,
}

struct Emitter<'a> {
    func: &'a mut Function,
    imported: ImportedFuncs,
    layout: LocalsLayout,
    types: &'a [Ty],
    ram_bytes: Option<u64>,
    frames: Vec<Frame>,
}

impl Emitter<'_> {
    fn ins(&mut self, instruction: Instruction<'_>) {
        self.func.instruction(&instruction);
    }

    fn emit_shape(&mut self, shape: &Shape<Vec<IrOp>, Operand>) -> Result<(), JitError> {
        match shape {
            Shape::Seq(items) => {
                for item in items {
                    self.emit_shape(item)?;
                }
            }
            Shape::Body(ops) => {
                for op in ops {
                    self.emit_op(op)?;
                }
            }
            Shape::Block { label, body } => {
                self.ins(Instruction::Block(BlockType::Empty));
                self.enclosed(Some(*label), false, body)?;
                self.ins(Instruction::End);
            }
            Shape::Loop { label, body } => {
                self.ins(Instruction::Loop(BlockType::Empty));
                self.enclosed(Some(*label), true, body)?;
                self.ins(Instruction::End);
            }
            Shape::If {
                test,
                then,
                otherwise,
            } => {
                match test {
                    Test::Cond(cond) => self.emit_truthy(cond),
                    Test::DispatchIs(id) => {
                        self.ins(Instruction::LocalGet(self.layout.dispatch_local()));
                        self.ins(Instruction::I32Const(*id as i32));
                        self.ins(Instruction::I32Eq);
                    }
                }
                self.ins(Instruction::If(BlockType::Empty));
                self.enclosed(None, false, then)?;
                if !matches!(otherwise.as_ref(), Shape::Seq(items) if items.is_empty()) {
                    self.ins(Instruction::Else);
                    self.enclosed(None, false, otherwise)?;
                }
                self.ins(Instruction::End);
            }
            Shape::Br(label) => {
                let Some((depth, frame)) = self
                    .frames
                    .iter()
                    .rev()
                    .enumerate()
                    .find(|(_, frame)| frame.label == Some(*label))
                else {
                    return Err(JitError::Backend(format!(
                        "branch to label {} outside its construct",
                        label.0
                    )));
                };
                let (depth, is_loop) = (depth as u32, frame.is_loop);
                if is_loop {
                    if let Some(tick) = self.imported.tick {
                        self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
                        self.ins(Instruction::Call(tick));
                    }
                }
                self.ins(Instruction::Br(depth));
            }
            Shape::SetDispatch(id) => {
                self.ins(Instruction::I32Const(*id as i32));
                self.ins(Instruction::LocalSet(self.layout.dispatch_local()));
            }
        }
        Ok(())
    }

    fn enclosed(
        &mut self,
        label: Option<LabelId>,
        is_loop: bool,
        body: &Shape<Vec<IrOp>, Operand>,
    ) -> Result<(), JitError> {
        self.frames.push(Frame { label, is_loop });
        let result = self.emit_shape(body);
        self.frames.pop();
        result
    }

    fn emit_op(&mut self, op: &IrOp) -> Result<(), JitError> {
        match op {
            IrOp::Mov { dst, src, width } => {
                self.emit_operand(src);
                self.emit_mask(*width);
                self.set_place(*dst);
            }
            IrOp::Bin {
                dst,
                op,
                width,
                lhs,
                rhs,
            } => {
                match op {
                    BinOp::DivU | BinOp::DivS => self.emit_div(*op, *width, lhs, rhs),
                    _ => {
                        self.emit_narrow(lhs, *width);
                        self.emit_narrow(rhs, *width);
                        self.ins(bin_instruction(*op, *width));
                        self.emit_widen(*width);
                    }
                }
                self.set_place(*dst);
            }
            IrOp::Cmp {
                dst,
                op,
                width,
                lhs,
                rhs,
            } => {
                self.emit_narrow(lhs, *width);
                self.emit_narrow(rhs, *width);
                self.ins(cmp_instruction(*op, *width));
                self.ins(Instruction::I64ExtendI32U);
                self.set_place(*dst);
            }
            IrOp::Select {
                dst,
                cond,
                if_true,
                if_false,
            } => {
                self.emit_operand(if_true);
                self.emit_operand(if_false);
                self.emit_truthy(cond);
                self.ins(Instruction::Select);
                self.set_place(*dst);
            }
            IrOp::Extend {
                dst,
                src,
                bits,
                signed,
            } => {
                self.emit_operand(src);
                let bits = u32::from(*bits);
                if bits < 64 {
                    if *signed {
                        let shift = i64::from(64 - bits);
                        self.ins(Instruction::I64Const(shift));
                        self.ins(Instruction::I64Shl);
                        self.ins(Instruction::I64Const(shift));
                        self.ins(Instruction::I64ShrS);
                    } else {
                        self.ins(Instruction::I64Const(ones(bits) as i64));
                        self.ins(Instruction::I64And);
                    }
                }
                self.set_place(*dst);
            }
            IrOp::Load { dst, addr, size } => {
                self.emit_guest_address(addr, *size);
                let arg = memarg(0, size.log2());
                self.ins(match size {
                    MemSize::U8 => Instruction::I64Load8U(arg),
                    MemSize::U16 => Instruction::I64Load16U(arg),
                    MemSize::U32 => Instruction::I64Load32U(arg),
                    MemSize::U64 => Instruction::I64Load(arg),
                });
                self.set_place(*dst);
            }
            IrOp::Store { addr, value, size } => {
                self.emit_guest_address(addr, *size);
                self.emit_operand(value);
                let arg = memarg(0, size.log2());
                self.ins(match size {
                    MemSize::U8 => Instruction::I64Store8(arg),
                    MemSize::U16 => Instruction::I64Store16(arg),
                    MemSize::U32 => Instruction::I64Store32(arg),
                    MemSize::U64 => Instruction::I64Store(arg),
                });
            }
            IrOp::CallSlot { dst, slot } => {
                let callee = self.import(self.imported.call_slot, IMPORT_CALL_SLOT)?;
                self.ins(Instruction::I32Const(slot.0 as i32));
                self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
                self.ins(Instruction::Call(callee));
                self.set_place(*dst);
            }
            IrOp::JumpToPc { dst, target } => {
                let callee = self.import(self.imported.jump_to_pc, IMPORT_JUMP_TO_PC)?;
                self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
                self.emit_operand(target);
                self.ins(Instruction::Call(callee));
                self.set_place(*dst);
            }
            IrOp::If {
                cond,
                then_ops,
                else_ops,
            } => {
                self.emit_truthy(cond);
                self.ins(Instruction::If(BlockType::Empty));
                for op in then_ops {
                    self.emit_op(op)?;
                }
                if !else_ops.is_empty() {
                    self.ins(Instruction::Else);
                    for op in else_ops {
                        self.emit_op(op)?;
                    }
                }
                self.ins(Instruction::End);
            }
            IrOp::Return { value } => {
                self.emit_operand(value);
                self.ins(Instruction::Return);
            }
        }
        Ok(())
    }

    fn import(&self, index: Option<u32>, name: &str) -> Result<u32, JitError> {
        index.ok_or_else(|| JitError::Backend(format!("env.{name} used but not imported")))
    }

    /// Push `operand` as an i64.
    fn emit_operand(&mut self, operand: &Operand) {
        match *operand {
            Operand::Imm(value) => self.ins(Instruction::I64Const(value as i64)),
            Operand::Place(place) => self.emit_read(place),
        }
    }

    /// Push `operand != 0` as an i32.
    fn emit_truthy(&mut self, operand: &Operand) {
        self.emit_operand(operand);
        self.ins(Instruction::I64Const(0));
        self.ins(Instruction::I64Ne);
    }

    /// Push `operand` truncated to `width`: an i32 for `W32`, an i64 for `W64`.
    fn emit_narrow(&mut self, operand: &Operand, width: Width) {
        self.emit_operand(operand);
        if width == Width::W32 {
            self.ins(Instruction::I32WrapI64);
        }
    }

    fn emit_widen(&mut self, width: Width) {
        if width == Width::W32 {
            self.ins(Instruction::I64ExtendI32U);
        }
    }

    fn emit_mask(&mut self, width: Width) {
        if width == Width::W32 {
            self.ins(Instruction::I64Const(width.mask() as i64));
            self.ins(Instruction::I64And);
        }
    }

    /// Division never traps: `x / 0` is 0 and `MIN / -1` is `MIN`.
    fn emit_div(&mut self, op: BinOp, width: Width, lhs: &Operand, rhs: &Operand) {
        let (a, b) = (self.layout.lhs_local(), self.layout.rhs_local());
        self.emit_operand(lhs);
        self.emit_mask(width);
        self.ins(Instruction::LocalSet(a));
        self.emit_operand(rhs);
        self.emit_mask(width);
        self.ins(Instruction::LocalSet(b));

        self.ins(Instruction::LocalGet(b));
        self.ins(Instruction::I64Eqz);
        self.ins(Instruction::If(BlockType::Result(ValType::I64)));
        self.ins(Instruction::I64Const(0));
        self.ins(Instruction::Else);
        if op == BinOp::DivS {
            self.ins(Instruction::LocalGet(b));
            self.ins(Instruction::I64Const(width.mask() as i64));
            self.ins(Instruction::I64Eq);
            self.ins(Instruction::If(BlockType::Result(ValType::I64)));
            self.ins(Instruction::I64Const(0));
            self.ins(Instruction::LocalGet(a));
            self.ins(Instruction::I64Sub);
            self.emit_mask(width);
            self.ins(Instruction::Else);
        }
        self.ins(Instruction::LocalGet(a));
        if width == Width::W32 {
            self.ins(Instruction::I32WrapI64);
        }
        self.ins(Instruction::LocalGet(b));
        if width == Width::W32 {
            self.ins(Instruction::I32WrapI64);
        }
        self.ins(match (op, width) {
            (BinOp::DivS, Width::W32) => Instruction::I32DivS,
            (BinOp::DivS, Width::W64) => Instruction::I64DivS,
            (_, Width::W32) => Instruction::I32DivU,
            (_, Width::W64) => Instruction::I64DivU,
        });
        self.emit_widen(width);
        if op == BinOp::DivS {
            self.ins(Instruction::End);
        }
        self.ins(Instruction::End);
    }

    /// Evaluate a guest address, trap if the access leaves guest RAM, and push it as an i32.
    fn emit_guest_address(&mut self, addr: &Operand, size: MemSize) {
        let a = self.layout.lhs_local();
        self.emit_operand(addr);
        self.ins(Instruction::LocalSet(a));
        if let Some(ram) = self.ram_bytes {
            match ram.checked_sub(size.bytes() as u64) {
                Some(last) => {
                    self.ins(Instruction::LocalGet(a));
                    self.ins(Instruction::I64Const(last as i64));
                    self.ins(Instruction::I64GtU);
                    self.ins(Instruction::If(BlockType::Empty));
                    self.ins(Instruction::Unreachable);
                    self.ins(Instruction::End);
                }
                None => self.ins(Instruction::Unreachable),
            }
        }
        self.ins(Instruction::LocalGet(a));
        self.ins(Instruction::I32WrapI64);
    }

    fn emit_read(&mut self, place: Place) {
        match place {
            Place::Local(local) => {
                self.ins(Instruction::LocalGet(self.layout.value_local(local)));
            }
            Place::X(n) if n >= 31 => self.ins(Instruction::I64Const(0)),
            Place::Sp => {
                self.emit_selected_sp_address();
                self.ins(Instruction::I64Load(memarg(CpuState::SP_EL_OFFSET, 3)));
            }
            Place::Elr(ElBank::Current) => {
                self.emit_current_bank_address();
                self.ins(Instruction::I64Load(memarg(CpuState::ELR_OFFSET, 3)));
            }
            Place::Spsr(ElBank::Current) => {
                self.emit_current_bank_address();
                self.ins(Instruction::I64Load(memarg(CpuState::SPSR_OFFSET, 3)));
            }
            fixed => {
                self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
                self.ins(Instruction::I64Load(memarg(fixed_offset(fixed), 3)));
            }
        }
    }

    /// Pop an i64 and write it to `place` with the same normalization the interpreter applies.
    fn set_place(&mut self, place: Place) {
        let scratch = self.layout.scratch_local();
        match place {
            Place::Local(local) => {
                if self.types.get(local.0 as usize) == Some(&Ty::I32) {
                    self.emit_mask(Width::W32);
                }
                self.ins(Instruction::LocalSet(self.layout.value_local(local)));
            }
            Place::X(n) if n >= 31 => self.ins(Instruction::Drop),
            Place::Sp => {
                self.ins(Instruction::LocalSet(scratch));
                self.emit_selected_sp_address();
                self.ins(Instruction::LocalGet(scratch));
                self.ins(Instruction::I64Store(memarg(CpuState::SP_EL_OFFSET, 3)));
            }
            Place::Elr(ElBank::Current) | Place::Spsr(ElBank::Current) => {
                let base = if matches!(place, Place::Elr(_)) {
                    CpuState::ELR_OFFSET
                } else {
                    CpuState::SPSR_OFFSET
                };
                self.ins(Instruction::LocalSet(scratch));
                self.emit_current_bank_address();
                self.ins(Instruction::LocalGet(scratch));
                self.ins(Instruction::I64Store(memarg(base, 3)));
            }
            fixed => {
                self.ins(Instruction::LocalSet(scratch));
                self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
                self.ins(Instruction::LocalGet(scratch));
                match fixed {
                    Place::Flag(_) => {
                        self.ins(Instruction::I64Const(0));
                        self.ins(Instruction::I64Ne);
                        self.ins(Instruction::I64ExtendI32U);
                    }
                    Place::El => self.emit_and(3),
                    Place::SpSel => self.emit_and(1),
                    Place::Daif => self.emit_and(DAIF_MASK),
                    _ => {}
                }
                self.ins(Instruction::I64Store(memarg(fixed_offset(fixed), 3)));
            }
        }
    }

    fn emit_and(&mut self, mask: u64) {
        self.ins(Instruction::I64Const(mask as i64));
        self.ins(Instruction::I64And);
    }

    fn emit_cpu_field(&mut self, offset: u32) {
        self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
        self.ins(Instruction::I64Load(memarg(offset, 3)));
    }

    /// `cpu_ptr + 8 * index` where `index` is an i64 on the stack.
    fn emit_index_address(&mut self) {
        self.ins(Instruction::I32WrapI64);
        self.ins(Instruction::I32Const(3));
        self.ins(Instruction::I32Shl);
        self.ins(Instruction::LocalGet(self.layout.cpu_ptr_local()));
        self.ins(Instruction::I32Add);
    }

    /// Address of `sp_el[spsel ? el : 0]`, relative to `SP_EL_OFFSET`.
    fn emit_selected_sp_address(&mut self) {
        self.emit_cpu_field(CpuState::EL_OFFSET);
        self.emit_cpu_field(CpuState::SPSEL_OFFSET);
        self.ins(Instruction::I64Mul);
        self.emit_index_address();
    }

    /// Address of the current EL's ELR/SPSR bank entry (EL0 shares EL1's), relative to the
    /// bank's base offset.
    fn emit_current_bank_address(&mut self) {
        self.emit_cpu_field(CpuState::EL_OFFSET);
        self.emit_cpu_field(CpuState::EL_OFFSET);
        self.ins(Instruction::I64Const(0));
        self.ins(Instruction::I64Ne);
        self.ins(Instruction::I64ExtendI32U);
        self.ins(Instruction::I64Sub);
        self.emit_index_address();
    }
}

fn bank_slot(el: u8) -> u32 {
    u32::from((el & 3).max(1) - 1)
}

/// Offset from `cpu_ptr` of a place whose location does not depend on run-time state.
fn fixed_offset(place: Place) -> u32 {
    match place {
        Place::X(n) => CpuState::x_offset(n),
        Place::SpEl(el) => CpuState::SP_EL_OFFSET + u32::from(el & 3) * 8,
        Place::Flag(flag) => CpuState::flag_offset(flag),
        Place::El => CpuState::EL_OFFSET,
        Place::SpSel => CpuState::SPSEL_OFFSET,
        Place::Daif => CpuState::DAIF_OFFSET,
        Place::Elr(ElBank::El(el)) => CpuState::ELR_OFFSET + bank_slot(el) * 8,
        Place::Spsr(ElBank::El(el)) => CpuState::SPSR_OFFSET + bank_slot(el) * 8,
        Place::Sys(slot) => CpuState::sys_offset(slot),
        // Handled by the callers before reaching here.
        Place::Sp | Place::Elr(ElBank::Current) | Place::Spsr(ElBank::Current) | Place::Local(_) => {
            0
        }
    }
}

fn bin_instruction(op: BinOp, width: Width) -> Instruction<'static> {
    use Instruction as I;
    match (op, width) {
        (BinOp::Add, Width::W32) => I::I32Add,
        (BinOp::Add, Width::W64) => I::I64Add,
        (BinOp::Sub, Width::W32) => I::I32Sub,
        (BinOp::Sub, Width::W64) => I::I64Sub,
        (BinOp::Mul, Width::W32) => I::I32Mul,
        (BinOp::Mul, Width::W64) => I::I64Mul,
        (BinOp::And, Width::W32) => I::I32And,
        (BinOp::And, Width::W64) => I::I64And,
        (BinOp::Or, Width::W32) => I::I32Or,
        (BinOp::Or, Width::W64) => I::I64Or,
        (BinOp::Xor, Width::W32) => I::I32Xor,
        (BinOp::Xor, Width::W64) => I::I64Xor,
        (BinOp::Shl, Width::W32) => I::I32Shl,
        (BinOp::Shl, Width::W64) => I::I64Shl,
        (BinOp::ShrU, Width::W32) => I::I32ShrU,
        (BinOp::ShrU, Width::W64) => I::I64ShrU,
        (BinOp::ShrS, Width::W32) => I::I32ShrS,
        (BinOp::ShrS, Width::W64) => I::I64ShrS,
        (BinOp::RotR, Width::W32) => I::I32Rotr,
        (BinOp::RotR, Width::W64) => I::I64Rotr,
        (BinOp::DivU, Width::W32) => I::I32DivU,
        (BinOp::DivU, Width::W64) => I::I64DivU,
        (BinOp::DivS, Width::W32) => I::I32DivS,
        (BinOp::DivS, Width::W64) => I::I64DivS,
    }
}

fn cmp_instruction(op: CmpOp, width: Width) -> Instruction<'static> {
    use Instruction as I;
    match (op, width) {
        (CmpOp::Eq, Width::W32) => I::I32Eq,
        (CmpOp::Eq, Width::W64) => I::I64Eq,
        (CmpOp::Ne, Width::W32) => I::I32Ne,
        (CmpOp::Ne, Width::W64) => I::I64Ne,
        (CmpOp::LtS, Width::W32) => I::I32LtS,
        (CmpOp::LtS, Width::W64) => I::I64LtS,
        (CmpOp::LtU, Width::W32) => I::I32LtU,
        (CmpOp::LtU, Width::W64) => I::I64LtU,
        (CmpOp::LeS, Width::W32) => I::I32LeS,
        (CmpOp::LeS, Width::W64) => I::I64LeS,
        (CmpOp::LeU, Width::W32) => I::I32LeU,
        (CmpOp::LeU, Width::W64) => I::I64LeU,
        (CmpOp::GtS, Width::W32) => I::I32GtS,
        (CmpOp::GtS, Width::W64) => I::I64GtS,
        (CmpOp::GtU, Width::W32) => I::I32GtU,
        (CmpOp::GtU, Width::W64) => I::I64GtU,
        (CmpOp::GeS, Width::W32) => I::I32GeS,
        (CmpOp::GeS, Width::W64) => I::I64GeS,
        (CmpOp::GeU, Width::W32) => I::I32GeU,
        (CmpOp::GeU, Width::W64) => I::I64GeU,
    }
}

fn next(idx: &mut u32) -> u32 {
    let cur = *idx;
    *idx += 1;
    cur
}

fn memarg(offset: u32, align: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align,
        memory_index: 0,
    }
}
