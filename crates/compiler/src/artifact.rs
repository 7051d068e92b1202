//! Binary module artifact writer (§6 "External interfaces").
//!
//! A [`frontend::CompiledModule`] already has every native offset resolved;
//! this module only serializes it into the fixed section layout the
//! runtime's loader expects. Sections are written in the order the runtime
//! reads them (tail-first is a loader concern, not a writer one — we simply
//! lay sections out forward and let each one's own length field let the
//! reader skip it).

use crate::frontend::CompiledModule;
use crate::mem_writer::MemWriter;
use crate::module_info::ExportKind;
use alloc::vec::Vec;

/// `version` field in the module-metadata section (§6); bump on ABI break.
pub const ARTIFACT_VERSION: u32 = 3;

pub const NO_OFFSET: u32 = u32::MAX;
pub const NO_SIG: u32 = u32::MAX;
pub const NO_FUNC_INDEX: u32 = u32::MAX;

fn push_padded_name(writer: &mut MemWriter, name: &[u8]) {
    writer.push_bytes(name);
    writer.align_to(4);
}

fn push_padded_signature(writer: &mut MemWriter, params: &[wasmc_core::ValType], results: &[wasmc_core::ValType]) {
    for &p in params {
        writer.push_u8(sig_code(p));
    }
    writer.push_u8(b':');
    for &r in results {
        writer.push_u8(sig_code(r));
    }
    writer.align_to(4);
}

/// Per-type single-character signature codes (§6 "Dynamic symbol record").
fn sig_code(ty: wasmc_core::ValType) -> u8 {
    match ty {
        wasmc_core::ValType::I32 => b'i',
        wasmc_core::ValType::I64 => b'l',
        wasmc_core::ValType::F32 => b'f',
        wasmc_core::ValType::F64 => b'd',
        wasmc_core::ValType::FuncRef => b'r',
    }
}

/// Writes a section body, then backpatches the trailing (or, per callers
/// that need it up-front, leading) length field.
fn write_length_prefixed(out: &mut MemWriter, body: impl FnOnce(&mut MemWriter)) {
    let len_at = out.len();
    out.push_u32_le(0);
    let start = out.len();
    body(out);
    let size = (out.len() - start) as u32;
    out.patch_u32_le(len_at, size);
}

/// Serializes a compiled module into the on-disk/in-memory artifact format
/// described by §6. `code` (the native instruction stream) is appended
/// verbatim after every metadata section; all offsets in the module are
/// relative to its start.
pub fn write(compiled: &CompiledModule) -> Vec<u8> {
    let mut out = MemWriter::new();
    let module = &compiled.module;

    // --- module metadata ---
    write_length_prefixed(&mut out, |out| {
        out.push_u32_le(ARTIFACT_VERSION);
        out.push_u32_le(0); // stacktraceEntryCount; debug maps aren't emitted by this compiler
        out.push_u32_le(NO_OFFSET); // landingPadOffset: unused, no host-side unwinding support
        out.push_u32_le(compiled.link_data_length);
    });

    // --- table-entry wrappers ---
    write_length_prefixed(&mut out, |out| {
        for entry in &compiled.table {
            out.push_u32_le(entry.map(|(offset, _)| offset).unwrap_or(NO_OFFSET));
        }
    });

    // --- table (body offset + signature index per slot) ---
    write_length_prefixed(&mut out, |out| {
        for entry in &compiled.table {
            match entry {
                Some((offset, sig)) => {
                    out.push_u32_le(*offset);
                    out.push_u32_le(*sig);
                }
                None => {
                    out.push_u32_le(NO_OFFSET);
                    out.push_u32_le(NO_SIG);
                }
            }
        }
    });

    // --- link status: one byte per import, padded to 4 ---
    write_length_prefixed(&mut out, |out| {
        for _ in &module.imports {
            out.push_u8(0); // every import starts unlinked; `init` resolves these
        }
        out.align_to(4);
    });

    // --- exported functions ---
    // Every variable-length field is length-prefixed (length written before
    // the padded bytes, not after) so a reader can size its read without
    // scanning for padding. Adds `entryPointOffset` beyond the field set
    // named in the external-interfaces table: `fncIndex` alone gives the
    // runtime no way to find the native-ABI wrapper to call, and no other
    // section carries a func-index-to-offset map (see DESIGN.md).
    write_length_prefixed(&mut out, |out| {
        for (i, export) in module.exports.iter().enumerate() {
            if export.kind != ExportKind::Func {
                continue;
            }
            let ty = module
                .func_type(export.index)
                .expect("export-section parsing already validated this index");
            out.push_u32_le((ty.params().len() + 1 + ty.results().len()) as u32);
            push_padded_signature(out, ty.params(), ty.results());
            out.push_u32_le(export.name.len() as u32);
            push_padded_name(out, export.name.as_bytes());
            let indirect_only = module.table.is_none()
                && module.elements.iter().flat_map(|seg| seg.func_indices.iter()).any(|&i| i == export.index);
            out.push_u32_le(if indirect_only { NO_FUNC_INDEX } else { export.index });
            out.push_u32_le(compiled.export_entry_points[i].expect("Func export always has an entry point"));
        }
    });

    // --- exported globals ---
    write_length_prefixed(&mut out, |out| {
        for export in &module.exports {
            if export.kind != ExportKind::Global {
                continue;
            }
            let g = &module.globals[export.index as usize];
            out.push_u64_le(0); // filled in by the runtime from link data / const init at `init` time
            out.push_u8(g.ty.mutable as u8);
            out.push_u8(sig_code(g.ty.val_type));
            out.push_u8(0);
            out.push_u8(0);
            out.push_u32_le(export.name.len() as u32);
            push_padded_name(out, export.name.as_bytes());
        }
    });

    // --- memory (fixed width, no length prefix) ---
    out.push_u32_le(module.memory.map(|m| m.min_pages).unwrap_or(NO_OFFSET));

    // --- dynamic imports ---
    write_length_prefixed(&mut out, |out| {
        for (i, import) in module.imports.iter().enumerate() {
            let crate::module_info::ImportKind::Func { sig_idx } = import.kind else {
                unreachable!("non-func imports are rejected before this point");
            };
            let ty = module.signature(sig_idx).expect("import signature index was validated at parse time");
            out.push_u32_le(import.module.len() as u32);
            push_padded_name(out, import.module.as_bytes());
            out.push_u32_le(import.name.len() as u32);
            push_padded_name(out, import.name.as_bytes());
            out.push_u32_le((ty.params().len() + 1 + ty.results().len()) as u32);
            push_padded_signature(out, ty.params(), ty.results());
            out.push_u32_le(compiled.import_link_offsets[i]);
        }
    });

    // --- mutable globals init ---
    write_length_prefixed(&mut out, |out| {
        for (i, g) in module.globals.iter().enumerate() {
            if !g.ty.mutable {
                continue;
            }
            out.push_u64_le(match g.init {
                Some(crate::module_info::GlobalInit::Const(v)) => v.to_bits(),
                _ => 0,
            });
            out.push_u32_le(compiled.global_link_offsets[i]);
            out.push_u8(sig_code(g.ty.val_type));
            out.push_u8(0);
            out.push_u8(0);
            out.push_u8(0);
        }
    });

    // --- start function ---
    write_length_prefixed(&mut out, |out| {
        if let Some(offset) = compiled.start_entry_point {
            out.push_u32_le(1); // sigLen for "()"
            push_padded_signature(out, &[], &[]);
            // wrapper-code is referenced by offset only; the runtime jumps
            // straight into the already-emitted native-ABI entry point.
            out.push_u32_le(offset);
        }
    });

    // --- function names (only present when debug maps are requested) ---
    write_length_prefixed(&mut out, |_out| {});

    // --- data segments ---
    write_length_prefixed(&mut out, |out| {
        for seg in &module.data {
            out.push_u32_le(seg.bytes.len() as u32);
            push_padded_name(out, &seg.bytes);
            out.push_u32_le(seg.offset as u32);
        }
    });

    out.push_bytes(&compiled.code);
    out.into_vec()
}
