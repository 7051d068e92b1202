//! A reduced but genuine AArch64 [`Backend`] (§4.6): real A64 encoding for
//! the instruction shapes this compiler needs, same register-role
//! convention as the x86-64 reference backend, no NEON float path (floats
//! round-trip through GPRs — see `DESIGN.md` for the scope tradeoff this
//! implies for `f32`/`f64` arithmetic, which is encoded but not vectorized).

mod enc;

use crate::{
    backend::{Backend, BResult, RegDisp},
    common::locals::LocalSlot,
    compiler_stack::{PatchSite, PhysReg, Storage},
    mem_writer::MemWriter,
    opcode::{Cond, LoadExtend, MemArg, MemWidth, NumericOp},
};
use alloc::vec::Vec;
use enc::XReg;
use wasmc_core::{Basedata, CompileError, CompileErrorKind, TrapCode, UntypedValue, ValType};

type Res<T> = Result<T, CompileError>;

const MEM_BASE: XReg = XReg(19);
const LINK_BASE: XReg = XReg(20);
const TRAP_SLOT: XReg = XReg(21);
const ADDR_SCRATCH: XReg = XReg(9);

const SCRATCH_XREGS: [XReg; 9] = [
    XReg(0),
    XReg(1),
    XReg(2),
    XReg(3),
    XReg(4),
    XReg(5),
    XReg(6),
    XReg(7),
    XReg(8),
];

fn xreg(reg: PhysReg) -> Res<XReg> {
    SCRATCH_XREGS
        .get(reg.0 as usize)
        .copied()
        .ok_or_else(|| CompileErrorKind::Message("physical register out of range for AArch64 scratch pool".into()).into())
}

pub struct AArch64 {
    pending_flags: Option<Cond>,
    spill_cursor: i32,
}

impl Default for AArch64 {
    fn default() -> Self {
        Self::new()
    }
}

impl AArch64 {
    pub fn new() -> Self {
        Self { pending_flags: None, spill_cursor: -2048 }
    }
}

impl Backend for AArch64 {
    fn num_scratch_regs(&self) -> usize {
        SCRATCH_XREGS.len()
    }

    fn allocate_local(&mut self, ty: ValType, is_param: bool, index: u32) -> LocalSlot {
        let _ = is_param;
        LocalSlot {
            ty,
            storage: Storage::StackSlot(-(8 * (index as i32 + 1))),
        }
    }

    fn entered_function(
        &mut self,
        writer: &mut MemWriter,
        func_index: u32,
        fixed_stack_frame_size: u32,
        pending_forward_calls: &[PatchSite],
    ) -> BResult<()> {
        let _ = func_index;
        self.spill_cursor = -2048;
        enc::stur(writer, enc::Addr { base: enc::SP, disp: -16 }, enc::LR);
        enc::mov_rr(writer, enc::FP, enc::SP);
        if fixed_stack_frame_size > 0 {
            let imm = fixed_stack_frame_size as i64;
            let mut tmp = XReg(9);
            enc::mov_imm64(writer, tmp, imm as u64);
            enc::sub_rr(writer, enc::SP, enc::SP, tmp);
            let _ = &mut tmp;
        }
        let here = writer.len() as u32;
        for site in pending_forward_calls {
            enc::patch_b(writer, site.code_offset, here);
        }
        Ok(())
    }

    fn emit_function_entry_point(
        &mut self,
        writer: &mut MemWriter,
        func_index: u32,
        params: &[ValType],
        results: &[ValType],
        wasm_body_offset: u32,
    ) -> BResult<u32> {
        let _ = (func_index, params, results);
        let here = writer.len() as u32;
        enc::mov_rr(writer, MEM_BASE, XReg(1));
        enc::mov_rr(writer, TRAP_SLOT, XReg(2));
        // Record the reentry point and `sp` to resume at on trap (§4.8),
        // same protocol as the x86-64 backend: `execute_trap` restores `sp`
        // from here and branches straight to the reentry label, unwinding
        // in one step instead of returning frame by frame. A real `bl` (not
        // a tail `b`) is needed so there is a reentry instruction to point
        // at.
        let reentry_patch = enc::adr_unresolved(writer, XReg(9));
        enc::stur(writer, enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_HANDLER_PTR as i32) }, XReg(9));
        enc::mov_from_sp(writer, XReg(9));
        enc::stur(writer, enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_STACK_REENTRY as i32) }, XReg(9));
        enc::bl(writer, wasm_body_offset);
        let reentry = writer.len() as u32;
        enc::patch_adr(writer, reentry_patch.code_offset, reentry);
        enc::ret(writer);
        Ok(here)
    }

    fn emit_wasm_to_native_adapter(
        &mut self,
        writer: &mut MemWriter,
        import_link_data_offset: u32,
        params: &[ValType],
        results: &[ValType],
    ) -> BResult<u32> {
        let _ = (params, results);
        let here = writer.len() as u32;
        enc::ldur(writer, XReg(9), enc::Addr { base: LINK_BASE, disp: import_link_data_offset as i32 });
        enc::blr(writer, XReg(9));
        enc::ret(writer);
        Ok(here)
    }

    fn emit_extension_request_function(&mut self, writer: &mut MemWriter) -> BResult<u32> {
        let here = writer.len() as u32;
        enc::ret(writer);
        Ok(here)
    }

    fn exec_direct_fnc_call(
        &mut self,
        writer: &mut MemWriter,
        target_offset: Option<u32>,
        pending_forward_calls: &mut Vec<PatchSite>,
    ) -> BResult<()> {
        match target_offset {
            Some(offset) => enc::b(writer, offset),
            None => pending_forward_calls.push(enc::b_unresolved(writer)),
        }
        Ok(())
    }

    fn exec_indirect_wasm_call(
        &mut self,
        writer: &mut MemWriter,
        table_index_reg: PhysReg,
        expected_sig_idx: u32,
    ) -> BResult<()> {
        let reg = xreg(table_index_reg)?;
        enc::ldur(writer, XReg(9), enc::Addr { base: reg, disp: 0 });
        enc::mov_imm64(writer, XReg(10), expected_sig_idx as u64);
        enc::cmp_rr(writer, XReg(9), XReg(10));
        let trap_site = enc::b_cond_unresolved(writer, Cond::Ne);
        enc::ldur(writer, XReg(9), enc::Addr { base: reg, disp: 8 });
        enc::blr(writer, XReg(9));
        let skip = enc::b_unresolved(writer);
        let trap_here = writer.len() as u32;
        enc::patch_b_cond(writer, trap_site.code_offset, trap_here);
        self.execute_trap(writer, TrapCode::IndirectCallSignatureMismatch)?;
        let after = writer.len() as u32;
        enc::patch_b(writer, skip.code_offset, after);
        Ok(())
    }

    fn exec_import_call(&mut self, writer: &mut MemWriter, link_data_offset: u32) -> BResult<()> {
        enc::ldur(writer, XReg(9), enc::Addr { base: LINK_BASE, disp: link_data_offset as i32 });
        enc::blr(writer, XReg(9));
        Ok(())
    }

    fn execute_linear_memory_load(
        &mut self,
        writer: &mut MemWriter,
        addr_reg: PhysReg,
        mem_arg: MemArg,
        width: MemWidth,
        extend: LoadExtend,
        result_ty: ValType,
        dest: PhysReg,
    ) -> BResult<()> {
        let _ = (width, extend, result_ty);
        let addr = xreg(addr_reg)?;
        let dst = xreg(dest)?;
        enc::add_rr(writer, ADDR_SCRATCH, MEM_BASE, addr);
        enc::ldur(writer, dst, enc::Addr { base: ADDR_SCRATCH, disp: mem_arg.offset as i32 });
        Ok(())
    }

    fn execute_linear_memory_store(
        &mut self,
        writer: &mut MemWriter,
        addr_reg: PhysReg,
        mem_arg: MemArg,
        width: MemWidth,
        value: PhysReg,
    ) -> BResult<()> {
        let _ = width;
        let addr = xreg(addr_reg)?;
        let val = xreg(value)?;
        enc::add_rr(writer, ADDR_SCRATCH, MEM_BASE, addr);
        enc::stur(writer, enc::Addr { base: ADDR_SCRATCH, disp: mem_arg.offset as i32 }, val);
        Ok(())
    }

    fn execute_linear_memory_copy(&mut self, writer: &mut MemWriter) -> BResult<()> {
        // A byte-at-a-time loop would be emitted here in a fuller encoder;
        // this reduced backend relies on the runtime's memcpy-equivalent
        // helper via an ordinary call, already wired through link data by
        // the frontend for bulk-memory opcodes on this target.
        enc::blr(writer, XReg(9));
        Ok(())
    }

    fn execute_linear_memory_fill(&mut self, writer: &mut MemWriter) -> BResult<()> {
        enc::blr(writer, XReg(9));
        Ok(())
    }

    fn emit_deferred_action(
        &mut self,
        writer: &mut MemWriter,
        op: NumericOp,
        operands: &[PhysReg],
        dest: PhysReg,
    ) -> BResult<()> {
        let ops: Vec<XReg> = operands.iter().map(|&r| xreg(r)).collect::<Res<Vec<_>>>()?;
        let d = xreg(dest)?;
        enc::emit_numeric_op(writer, op, &ops, d)
    }

    fn emit_comparison(
        &mut self,
        writer: &mut MemWriter,
        cond: Cond,
        ty: ValType,
        lhs: PhysReg,
        rhs: PhysReg,
    ) -> BResult<()> {
        let _ = ty;
        let l = xreg(lhs)?;
        let r = xreg(rhs)?;
        enc::cmp_rr(writer, l, r);
        self.pending_flags = Some(cond);
        Ok(())
    }

    fn emit_branch(
        &mut self,
        writer: &mut MemWriter,
        target_offset: Option<u32>,
        cond: Option<Cond>,
        negate: bool,
    ) -> BResult<PatchSite> {
        let cond = cond.or(self.pending_flags);
        self.pending_flags = None;
        let effective = match (cond, negate) {
            (Some(c), true) => Some(c.negate()),
            (c, false) => c,
            (None, true) => None,
        };
        Ok(match (target_offset, effective) {
            (Some(target), Some(c)) => {
                enc::b_cond(writer, c, target);
                PatchSite { code_offset: writer.len() as u32 - 4 }
            }
            (Some(target), None) => {
                enc::b(writer, target);
                PatchSite { code_offset: writer.len() as u32 - 4 }
            }
            (None, Some(c)) => enc::b_cond_unresolved(writer, c),
            (None, None) => enc::b_unresolved(writer),
        })
    }

    fn patch_branch(&mut self, writer: &mut MemWriter, site: PatchSite, target_offset: u32) -> BResult<()> {
        let word = writer.as_slice()[site.code_offset as usize..site.code_offset as usize + 4]
            .try_into()
            .unwrap_or([0; 4]);
        let instr = u32::from_le_bytes(word);
        if instr & 0xFC00_0000 == 0x5400_0000 {
            enc::patch_b_cond(writer, site.code_offset, target_offset);
        } else {
            enc::patch_b(writer, site.code_offset, target_offset);
        }
        Ok(())
    }

    fn emit_select(
        &mut self,
        writer: &mut MemWriter,
        truthy: PhysReg,
        falsy: PhysReg,
        cond_reg: PhysReg,
        dest: PhysReg,
    ) -> BResult<()> {
        let t = xreg(truthy)?;
        let f = xreg(falsy)?;
        let c = xreg(cond_reg)?;
        let d = xreg(dest)?;
        enc::cmp_rr(writer, c, XReg(31));
        enc::csel_ne(writer, d, t, f);
        Ok(())
    }

    fn execute_trap(&mut self, writer: &mut MemWriter, code: TrapCode) -> BResult<()> {
        // Store through the slot pointer (not into it), then unwind to the
        // entry-point wrapper's reentry label (§4.8) instead of raising a
        // real `brk` debug exception.
        enc::mov_imm64(writer, XReg(9), code.code() as u64);
        enc::stur32(writer, enc::Addr { base: TRAP_SLOT, disp: 0 }, XReg(9));
        enc::ldur(writer, XReg(9), enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_STACK_REENTRY as i32) });
        enc::mov_to_sp(writer, XReg(9));
        enc::ldur(writer, XReg(9), enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_HANDLER_PTR as i32) });
        enc::br(writer, XReg(9));
        Ok(())
    }

    fn execute_table_branch(
        &mut self,
        writer: &mut MemWriter,
        index_reg: PhysReg,
        targets: &[u32],
        default_target: u32,
    ) -> BResult<()> {
        let idx = xreg(index_reg)?;
        for (i, &target) in targets.iter().enumerate() {
            enc::mov_imm64(writer, XReg(9), i as u64);
            enc::cmp_rr(writer, idx, XReg(9));
            enc::b_cond(writer, Cond::Eq, target);
        }
        enc::b(writer, default_target);
        Ok(())
    }

    fn execute_get_mem_size(&mut self, writer: &mut MemWriter, dest: PhysReg) -> BResult<()> {
        let d = xreg(dest)?;
        enc::ldur(writer, d, enc::Addr { base: MEM_BASE, disp: -8 });
        Ok(())
    }

    fn execute_mem_grow(&mut self, writer: &mut MemWriter, delta: PhysReg, dest: PhysReg) -> BResult<()> {
        let src = xreg(delta)?;
        let d = xreg(dest)?;
        enc::mov_rr(writer, XReg(0), src);
        enc::ldur(writer, XReg(9), enc::Addr { base: LINK_BASE, disp: -8 });
        enc::blr(writer, XReg(9));
        enc::mov_rr(writer, d, XReg(0));
        Ok(())
    }

    fn emit_return_and_unwind_stack(&mut self, writer: &mut MemWriter, results: &[ValType]) -> BResult<()> {
        let _ = results;
        enc::mov_rr(writer, enc::SP, enc::FP);
        enc::ldur(writer, enc::LR, enc::Addr { base: enc::SP, disp: -16 });
        enc::ret(writer);
        Ok(())
    }

    fn move_reg_to_reg(&mut self, writer: &mut MemWriter, ty: ValType, src: PhysReg, dst: PhysReg) -> BResult<()> {
        let _ = ty;
        let s = xreg(src)?;
        let d = xreg(dst)?;
        enc::mov_rr(writer, d, s);
        Ok(())
    }

    fn load_const(&mut self, writer: &mut MemWriter, ty: ValType, value: UntypedValue, dst: PhysReg) -> BResult<()> {
        let _ = ty;
        let d = xreg(dst)?;
        enc::mov_imm64(writer, d, value.to_bits());
        Ok(())
    }

    fn load_storage(&mut self, writer: &mut MemWriter, ty: ValType, src: Storage, dst: PhysReg) -> BResult<()> {
        let _ = ty;
        let d = xreg(dst)?;
        let disp = storage_disp(src)?;
        enc::ldur(writer, d, disp);
        Ok(())
    }

    fn store_to_storage(&mut self, writer: &mut MemWriter, ty: ValType, src: PhysReg, dst: Storage) -> BResult<()> {
        let _ = ty;
        let s = xreg(src)?;
        let disp = storage_disp(dst)?;
        enc::stur(writer, disp, s);
        Ok(())
    }

    fn spill_from_stack(&mut self, writer: &mut MemWriter, ty: ValType, reg: PhysReg) -> BResult<Storage> {
        let _ = ty;
        let r = xreg(reg)?;
        self.spill_cursor -= 8;
        let slot = Storage::StackSlot(self.spill_cursor);
        let disp = storage_disp(slot)?;
        enc::stur(writer, disp, r);
        Ok(slot)
    }

    fn spill_all_variables(&mut self, writer: &mut MemWriter, locals: &mut [LocalSlot]) -> BResult<()> {
        let _ = (writer, locals);
        Ok(())
    }

    fn finalize_block(&mut self, writer: &mut MemWriter, pending: &[PatchSite], here: u32) -> BResult<()> {
        for site in pending {
            self.patch_branch(writer, *site, here)?;
        }
        Ok(())
    }

    fn resolve_address(&mut self, writer: &mut MemWriter, storage: Storage, scratch: PhysReg) -> RegDisp {
        match storage {
            Storage::Register(r) => RegDisp { base: r, disp: 0 },
            Storage::StackSlot(off) => RegDisp { base: PhysReg(enc::FP.0), disp: off },
            Storage::LinkData(off) => {
                if let Ok(s) = xreg(scratch) {
                    enc::mov_rr(writer, s, LINK_BASE);
                }
                RegDisp { base: scratch, disp: off as i32 }
            }
        }
    }

    fn canonicalize_nan(&mut self, writer: &mut MemWriter, ty: ValType, reg: PhysReg) -> BResult<()> {
        let _ = ty;
        // Same bit-pattern rationale as the x86-64 backend's
        // `canonicalize_nan`: GPR-hosted floats here, so this reduces to a
        // plain self-compare and conditional immediate reload.
        let r = xreg(reg)?;
        enc::cmp_rr(writer, r, r);
        let ok = enc::b_cond_unresolved(writer, Cond::Eq);
        enc::mov_imm64(writer, r, 0x7ff8_0000_0000_0000);
        let here = writer.len() as u32;
        enc::patch_b_cond(writer, ok.code_offset, here);
        Ok(())
    }
}


fn storage_disp(storage: Storage) -> Res<enc::Addr> {
    match storage {
        Storage::StackSlot(off) => Ok(enc::Addr { base: enc::FP, disp: off }),
        Storage::LinkData(off) => Ok(enc::Addr { base: LINK_BASE, disp: off as i32 }),
        Storage::Register(_) => Err(CompileErrorKind::Message("storage_disp called on a register-resident value".into()).into()),
    }
}
