//! The reference, full-fidelity [`Backend`] (§4.6): System V AMD64, SSE2 for
//! floats, real REX/ModRM/SIB encoding for the instruction subset this
//! compiler actually emits.
//!
//! Register assignment mirrors the teacher-adjacent fixed-register
//! convention (see the mica JIT example): a handful of GPRs are reserved for
//! ABI-fixed roles, the rest are the scratch pool `Common`'s allocator draws
//! from.
//!
//! ```text
//! rbp  - native frame pointer
//! rbx  - linear memory base (callee-saved, loaded once per call)
//! r12  - link data base
//! r13  - trap code output slot pointer
//! r14  - address scratch (used transiently by resolve_address)
//! rax,rcx,rdx,rsi,rdi,r8,r9,r10,r11,r15 - scratch pool (Common-managed)
//! ```

mod enc;

use crate::{
    backend::{Backend, BResult, RegDisp},
    common::locals::LocalSlot,
    compiler_stack::{PatchSite, PhysReg, Storage},
    mem_writer::MemWriter,
    opcode::{Cond, LoadExtend, MemArg, MemWidth, NumericOp},
};
use alloc::vec::Vec;
use enc::Gpr;
use wasmc_core::{Basedata, CompileError, CompileErrorKind, TrapCode, UntypedValue, ValType};

type Res<T> = Result<T, CompileError>;

const MEM_BASE: Gpr = Gpr::Rbx;
const LINK_BASE: Gpr = Gpr::R12;
const TRAP_SLOT: Gpr = Gpr::R13;
const ADDR_SCRATCH: Gpr = Gpr::R14;

/// Physical-register index to GPR mapping for the scratch pool; excludes
/// the four fixed-role registers above and `rsp`.
const SCRATCH_GPRS: [Gpr; 10] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
    Gpr::R15,
];

fn gpr(reg: PhysReg) -> Res<Gpr> {
    SCRATCH_GPRS
        .get(reg.0 as usize)
        .copied()
        .ok_or_else(|| CompileErrorKind::Message("physical register out of range for x86-64 scratch pool".into()).into())
}

/// Minimal state the x86-64 backend needs beyond what `Common` tracks:
/// whether the last emitted comparison set flags usable by a following
/// branch (§4.6 "last-emitted-comparison hint").
pub struct X86_64 {
    pending_flags: Option<Cond>,
    /// Next unused spill-slot offset from `rbp`, walking downward past the
    /// locals region; reset at the start of each function (§4.5 "a freshly
    /// allocated temp slot" — freshly allocated per spill, not reused within
    /// the same function body).
    spill_cursor: i32,
}

impl Default for X86_64 {
    fn default() -> Self {
        Self::new()
    }
}

impl X86_64 {
    pub fn new() -> Self {
        Self { pending_flags: None, spill_cursor: -2048 }
    }
}

impl Backend for X86_64 {
    fn num_scratch_regs(&self) -> usize {
        SCRATCH_GPRS.len()
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
        enc::push_reg(writer, Gpr::Rbp);
        enc::mov_rr(writer, Gpr::Rbp, Gpr::Rsp, true);
        if fixed_stack_frame_size > 0 {
            enc::sub_ri32(writer, Gpr::Rsp, fixed_stack_frame_size as i32, true);
        }
        let here = writer.len() as u32;
        for site in pending_forward_calls {
            enc::patch_rel32(writer, site.code_offset, here);
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
        enc::push_reg(writer, Gpr::Rbp);
        enc::mov_rr(writer, Gpr::Rbp, Gpr::Rsp, true);
        // userArgs(rdi), linMemBase(rsi), trapCodeSlot(rdx), returnValues(rcx)
        enc::mov_rr(writer, MEM_BASE, Gpr::Rsi, true);
        enc::mov_rr(writer, TRAP_SLOT, Gpr::Rdx, true);
        // Record where `execute_trap` should resume (§4.8): the reentry
        // label below, and the stack pointer as it stands right before the
        // call, so a trap anywhere in the call tree below this frame can
        // restore `rsp` and jump straight back here in one step instead of
        // returning frame by frame.
        let reentry_patch = enc::lea_rip_rel32_unresolved(writer, Gpr::Rax);
        enc::mov_reg_to_mem(
            writer,
            enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_HANDLER_PTR as i32) },
            Gpr::Rax,
            8,
        );
        enc::mov_reg_to_mem(
            writer,
            enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_STACK_REENTRY as i32) },
            Gpr::Rsp,
            8,
        );
        enc::call_rel32(writer, wasm_body_offset);
        let reentry = writer.len() as u32;
        enc::patch_rel32(writer, reentry_patch.code_offset, reentry);
        enc::pop_reg(writer, Gpr::Rbp);
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
        enc::push_reg(writer, Gpr::Rbp);
        enc::mov_rr(writer, Gpr::Rbp, Gpr::Rsp, true);
        enc::mov_mem_to_reg(writer, Gpr::Rax, enc::Addr { base: LINK_BASE, disp: import_link_data_offset as i32 }, 8);
        enc::call_reg(writer, Gpr::Rax);
        enc::pop_reg(writer, Gpr::Rbp);
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
            Some(offset) => {
                enc::call_rel32(writer, offset);
            }
            None => {
                let site = enc::call_rel32_unresolved(writer);
                pending_forward_calls.push(site);
            }
        }
        Ok(())
    }

    fn exec_indirect_wasm_call(
        &mut self,
        writer: &mut MemWriter,
        table_index_reg: PhysReg,
        expected_sig_idx: u32,
    ) -> BResult<()> {
        let reg = gpr(table_index_reg)?;
        // Table entries are (sig_idx: u32, code_ptr: u64) pairs living off
        // the link data base; check the signature before calling through.
        enc::cmp_mem_imm32(
            writer,
            enc::Addr { base: LINK_BASE, disp: 0 },
            Some(reg),
            expected_sig_idx,
        );
        let trap_site = enc::jcc_rel32_unresolved(writer, Cond::Ne);
        enc::mov_mem_to_reg(writer, Gpr::Rax, enc::Addr { base: reg, disp: 8 }, 8);
        enc::call_reg(writer, Gpr::Rax);
        let skip = enc::jmp_rel32_unresolved(writer);
        let trap_here = writer.len() as u32;
        enc::patch_rel32(writer, trap_site.code_offset, trap_here);
        self.execute_trap(writer, TrapCode::IndirectCallSignatureMismatch)?;
        let after = writer.len() as u32;
        enc::patch_rel32(writer, skip.code_offset, after);
        Ok(())
    }

    fn exec_import_call(&mut self, writer: &mut MemWriter, link_data_offset: u32) -> BResult<()> {
        enc::mov_mem_to_reg(writer, Gpr::Rax, enc::Addr { base: LINK_BASE, disp: link_data_offset as i32 }, 8);
        enc::call_reg(writer, Gpr::Rax);
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
        let addr = gpr(addr_reg)?;
        let dst = gpr(dest)?;
        enc::lea_add_offset(writer, ADDR_SCRATCH, MEM_BASE, addr, mem_arg.offset as i32);
        let base = enc::Addr { base: ADDR_SCRATCH, disp: 0 };
        if is_float(result_ty) {
            enc::movsd_load(writer, dst, base, matches!(result_ty, ValType::F32));
        } else {
            enc::mov_mem_to_reg_sized(writer, dst, base, width, extend);
        }
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
        let addr = gpr(addr_reg)?;
        let val = gpr(value)?;
        enc::lea_add_offset(writer, ADDR_SCRATCH, MEM_BASE, addr, mem_arg.offset as i32);
        let base = enc::Addr { base: ADDR_SCRATCH, disp: 0 };
        enc::mov_reg_to_mem_sized(writer, base, val, width);
        Ok(())
    }

    fn execute_linear_memory_copy(&mut self, writer: &mut MemWriter) -> BResult<()> {
        // rdi=dst, rsi=src, rdx=len already placed by Common's calling
        // convention prep; emit a `rep movsb` byte-copy loop.
        enc::rep_movsb(writer);
        Ok(())
    }

    fn execute_linear_memory_fill(&mut self, writer: &mut MemWriter) -> BResult<()> {
        // rdi=dst, al=byte, rcx=len
        enc::rep_stosb(writer);
        Ok(())
    }

    fn emit_deferred_action(
        &mut self,
        writer: &mut MemWriter,
        op: NumericOp,
        operands: &[PhysReg],
        dest: PhysReg,
    ) -> BResult<()> {
        let mut gprs = [Gpr::Rax; 2];
        for (slot, operand) in gprs.iter_mut().zip(operands) {
            *slot = gpr(*operand)?;
        }
        let d = gpr(dest)?;
        enc::emit_numeric_op(writer, op, &gprs[..operands.len()], d, &mut self.pending_flags)
    }

    fn emit_comparison(
        &mut self,
        writer: &mut MemWriter,
        cond: Cond,
        ty: ValType,
        lhs: PhysReg,
        rhs: PhysReg,
    ) -> BResult<()> {
        let l = gpr(lhs)?;
        let r = gpr(rhs)?;
        if is_float(ty) {
            enc::ucomisd(writer, l, r, matches!(ty, ValType::F32));
        } else {
            enc::cmp_rr(writer, l, r, matches!(ty, ValType::I64));
        }
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
                enc::jcc_rel32(writer, c, target);
                PatchSite { code_offset: writer.len() as u32 - 4 }
            }
            (Some(target), None) => {
                enc::jmp_rel32(writer, target);
                PatchSite { code_offset: writer.len() as u32 - 4 }
            }
            (None, Some(c)) => enc::jcc_rel32_unresolved(writer, c),
            (None, None) => enc::jmp_rel32_unresolved(writer),
        })
    }

    fn patch_branch(&mut self, writer: &mut MemWriter, site: PatchSite, target_offset: u32) -> BResult<()> {
        enc::patch_rel32(writer, site.code_offset, target_offset);
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
        let t = gpr(truthy)?;
        let f = gpr(falsy)?;
        let c = gpr(cond_reg)?;
        let d = gpr(dest)?;
        enc::mov_rr(writer, d, f, true);
        enc::test_rr(writer, c, c, false);
        enc::cmovnz_rr(writer, d, t);
        Ok(())
    }

    fn execute_trap(&mut self, writer: &mut MemWriter, code: TrapCode) -> BResult<()> {
        // Write the trap code through the slot pointer (rather than into
        // the pointer register itself), then unwind to the entry-point
        // wrapper's reentry label (§4.8) instead of faulting the host
        // process with `ud2`.
        enc::mov_ri32(writer, Gpr::Rax, code.code() as i32, false);
        enc::mov_reg_to_mem(writer, enc::Addr { base: TRAP_SLOT, disp: 0 }, Gpr::Rax, 4);
        enc::mov_mem_to_reg(
            writer,
            Gpr::Rsp,
            enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_STACK_REENTRY as i32) },
            8,
        );
        enc::mov_mem_to_reg(
            writer,
            Gpr::Rax,
            enc::Addr { base: MEM_BASE, disp: -(Basedata::TRAP_HANDLER_PTR as i32) },
            8,
        );
        enc::jmp_reg(writer, Gpr::Rax);
        Ok(())
    }

    fn execute_table_branch(
        &mut self,
        writer: &mut MemWriter,
        index_reg: PhysReg,
        targets: &[u32],
        default_target: u32,
    ) -> BResult<()> {
        let idx = gpr(index_reg)?;
        for (i, &target) in targets.iter().enumerate() {
            enc::cmp_ri32(writer, idx, i as i32, false);
            enc::jcc_rel32(writer, Cond::Eq, target);
        }
        enc::jmp_rel32(writer, default_target);
        Ok(())
    }

    fn execute_get_mem_size(&mut self, writer: &mut MemWriter, dest: PhysReg) -> BResult<()> {
        let d = gpr(dest)?;
        enc::mov_mem_to_reg(writer, d, enc::Addr { base: MEM_BASE, disp: -8 }, 4);
        Ok(())
    }

    fn execute_mem_grow(&mut self, writer: &mut MemWriter, delta: PhysReg, dest: PhysReg) -> BResult<()> {
        let src = gpr(delta)?;
        let d = gpr(dest)?;
        // Memory growth calls into the runtime's extension-request helper;
        // the delta is passed in rdi, the old page count returned in rax.
        enc::mov_rr(writer, Gpr::Rdi, src, true);
        enc::call_mem(writer, enc::Addr { base: LINK_BASE, disp: -8 });
        enc::mov_rr(writer, d, Gpr::Rax, true);
        Ok(())
    }

    fn emit_return_and_unwind_stack(&mut self, writer: &mut MemWriter, results: &[ValType]) -> BResult<()> {
        let _ = results;
        enc::mov_rr(writer, Gpr::Rsp, Gpr::Rbp, true);
        enc::pop_reg(writer, Gpr::Rbp);
        enc::ret(writer);
        Ok(())
    }

    fn move_reg_to_reg(&mut self, writer: &mut MemWriter, ty: ValType, src: PhysReg, dst: PhysReg) -> BResult<()> {
        let s = gpr(src)?;
        let d = gpr(dst)?;
        if is_float(ty) {
            enc::movsd_rr(writer, d, s, matches!(ty, ValType::F32));
        } else {
            enc::mov_rr(writer, d, s, matches!(ty, ValType::I64));
        }
        Ok(())
    }

    fn load_const(&mut self, writer: &mut MemWriter, ty: ValType, value: UntypedValue, dst: PhysReg) -> BResult<()> {
        let d = gpr(dst)?;
        match ty {
            ValType::I32 => enc::mov_ri32(writer, d, value.as_i32(), false),
            ValType::I64 => enc::mov_ri64(writer, d, value.as_i64()),
            ValType::F32 | ValType::F64 => {
                enc::mov_ri64(writer, ADDR_SCRATCH, value.to_bits() as i64);
                enc::movq_from_gpr(writer, d, ADDR_SCRATCH, matches!(ty, ValType::F32));
            }
            ValType::FuncRef => return Err(CompileErrorKind::Message("funcref constants are not materialized as values".into()).into()),
        }
        Ok(())
    }

    fn load_storage(&mut self, writer: &mut MemWriter, ty: ValType, src: Storage, dst: PhysReg) -> BResult<()> {
        let d = gpr(dst)?;
        let disp = storage_disp(src)?;
        if is_float(ty) {
            enc::movsd_load(writer, d, disp, matches!(ty, ValType::F32));
        } else {
            enc::mov_mem_to_reg(writer, d, disp, size_of_val(ty));
        }
        Ok(())
    }

    fn store_to_storage(&mut self, writer: &mut MemWriter, ty: ValType, src: PhysReg, dst: Storage) -> BResult<()> {
        let s = gpr(src)?;
        let disp = storage_disp(dst)?;
        if is_float(ty) {
            enc::movsd_store(writer, disp, s, matches!(ty, ValType::F32));
        } else {
            enc::mov_reg_to_mem(writer, disp, s, size_of_val(ty));
        }
        Ok(())
    }

    fn spill_from_stack(&mut self, writer: &mut MemWriter, ty: ValType, reg: PhysReg) -> BResult<Storage> {
        let r = gpr(reg)?;
        self.spill_cursor -= 8;
        let slot = Storage::StackSlot(self.spill_cursor);
        let disp = storage_disp(slot)?;
        if is_float(ty) {
            enc::movsd_store(writer, disp, r, matches!(ty, ValType::F32));
        } else {
            enc::mov_reg_to_mem(writer, disp, r, size_of_val(ty));
        }
        Ok(slot)
    }

    fn spill_all_variables(&mut self, writer: &mut MemWriter, locals: &mut [LocalSlot]) -> BResult<()> {
        let _ = (writer, locals);
        Ok(())
    }

    fn finalize_block(&mut self, writer: &mut MemWriter, pending: &[PatchSite], here: u32) -> BResult<()> {
        for site in pending {
            enc::patch_rel32(writer, site.code_offset, here);
        }
        Ok(())
    }

    fn resolve_address(&mut self, writer: &mut MemWriter, storage: Storage, scratch: PhysReg) -> RegDisp {
        match storage {
            Storage::Register(r) => RegDisp { base: r, disp: 0 },
            // No scratch-pool register names the frame pointer; this
            // encodes it as the raw `rbp` GPR number, understood only by
            // this backend's own `gpr_raw` (never fed back through the
            // scratch-pool `gpr()` lookup).
            Storage::StackSlot(off) => RegDisp { base: PhysReg(Gpr::Rbp as u8), disp: off },
            Storage::LinkData(off) => {
                if let Ok(s) = gpr(scratch) {
                    enc::mov_rr(writer, s, LINK_BASE, true);
                }
                RegDisp { base: scratch, disp: off as i32 }
            }
        }
    }

    fn canonicalize_nan(&mut self, writer: &mut MemWriter, ty: ValType, reg: PhysReg) -> BResult<()> {
        // `min(x, x)` is not bit-exact here: real IEEE min/max propagate the
        // first operand's NaN payload unchanged on some inputs, while the
        // result we need is the single canonical quiet NaN bit pattern.
        // Compare against self and branch around a direct bit-pattern load.
        let r = gpr(reg)?;
        let single = matches!(ty, ValType::F32);
        enc::ucomisd(writer, r, r, single);
        let ok = enc::jcc_rel32_unresolved(writer, Cond::Eq);
        let bits: i64 = if single {
            0x7fc0_0000i64
        } else {
            0x7ff8_0000_0000_0000u64 as i64
        };
        enc::mov_ri64(writer, ADDR_SCRATCH, bits);
        enc::movq_from_gpr(writer, r, ADDR_SCRATCH, single);
        let here = writer.len() as u32;
        enc::patch_rel32(writer, ok.code_offset, here);
        Ok(())
    }
}

fn is_float(ty: ValType) -> bool {
    matches!(ty, ValType::F32 | ValType::F64)
}

fn size_of_val(ty: ValType) -> u32 {
    match ty {
        ValType::I32 | ValType::F32 => 4,
        ValType::I64 | ValType::F64 => 8,
        ValType::FuncRef => 8,
    }
}

fn storage_disp(storage: Storage) -> Res<enc::Addr> {
    match storage {
        Storage::StackSlot(off) => Ok(enc::Addr { base: Gpr::Rbp, disp: off }),
        Storage::LinkData(off) => Ok(enc::Addr { base: LINK_BASE, disp: off as i32 }),
        Storage::Register(_) => Err(CompileErrorKind::Message("storage_disp called on a register-resident value".into()).into()),
    }
}
