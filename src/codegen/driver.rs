//! The code-generation driver: the single state machine spec §4.7
//! describes, orchestrating optimize -> allocate -> emit -> patch for
//! one function against one [`Backend`].
//!
//! Grounded on libjit's `jit_function_compile` ->  `_jit_create_entry_
//! point` pipeline (`examples/original_source/jit/jit-compile.c`),
//! generalized off the concrete x86/x86-64 encoders it calls through
//! a vtable of function pointers (`_jit_gen_*`) — this crate expresses
//! that vtable as the [`Backend`] trait instead.

use crate::binemit::{FixupList, OffsetMap};
use crate::cache::{CodeCache, MethodRecord};
use crate::codegen::{Backend, CodeBuffer};
use crate::error::{CompileError, CompileResult};
use crate::flowgraph::compute_cfg;
use crate::ir::{Function, Inst, Opcode};
use crate::live_range::build_live_ranges;
use crate::liveness;
use crate::regalloc::{Coloring, LocalAllocator, RegClass, Spill};
use crate::settings::{AllocatorKind, OptLevel, Settings};
use log::{debug, trace};
use std::collections::HashMap;

/// The cache-full restart ceiling (spec §9 "Manual long-jmp restart"):
/// past this many attempts something other than cache exhaustion is
/// wrong, and the driver gives up rather than looping forever.
const MAX_RESTART_ATTEMPTS: u32 = 8;

/// Compile `func` against `backend`, placing the result in `cache`.
/// Returns the method's cache record and its sealed bytecode-offset map
/// (spec §4.7, §4.8).
pub fn compile<B: Backend>(
    func: &mut Function,
    backend: &mut B,
    cache: &mut CodeCache,
    settings: &Settings,
) -> CompileResult<(MethodRecord, OffsetMap)> {
    if func.entry_block.is_none() {
        return Err(CompileError::NullFunction);
    }
    for (_inst, data) in func.instructions.iter() {
        if !backend.opcode_is_supported(data.opcode) {
            return Err(CompileError::CompileError(format!(
                "backend has no encoding for {:?}",
                data.opcode
            )));
        }
    }

    optimize(func, backend, settings);
    let mut spills = allocate_registers(func, backend, settings);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let (bytes, offsets) = match emit_once(func, backend, &spills) {
            Ok(v) => v,
            Err(CompileError::CacheFull) if attempt < MAX_RESTART_ATTEMPTS => {
                trace!("codegen: cache full during emit, restarting (attempt {})", attempt);
                func.reset_locations_for_restart(&[]);
                spills = allocate_registers(func, backend, settings);
                continue;
            }
            Err(e) => return Err(e),
        };

        match cache.start_method(bytes.len() as u32, 16) {
            Ok(cursor) => {
                cache.buffer_mut(&cursor)[..bytes.len()].copy_from_slice(&bytes);
                let record = cache.end_method(cursor, bytes.len() as u32)?;
                cache.flush_exec(record.start, bytes.len() as u32);

                // The entry point's real address (this cache offset plus
                // the owning page's base) is resolved and published by
                // `crate::context::Context::compile`, which alone knows
                // where the cache's pages live in memory (spec §3
                // "Lifecycles": "the code cache outlives the builder and
                // is owned by the context").
                func.status.is_compiled = true;
                debug!(
                    "codegen: compiled function into {} bytes at cache offset {}",
                    bytes.len(),
                    record.start
                );
                return Ok((record, offsets));
            }
            Err(CompileError::CacheFull) if attempt < MAX_RESTART_ATTEMPTS => {
                trace!(
                    "codegen: cache full (page factor now {}), re-emitting (attempt {})",
                    cache.page_factor(),
                    attempt
                );
                func.reset_locations_for_restart(&[]);
                spills = allocate_registers(func, backend, settings);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

fn optimize<B: Backend>(func: &mut Function, backend: &mut B, settings: &Settings) {
    if func.status.is_optimized {
        return;
    }
    if let OptLevel::Normal = settings.opt_level {
        compute_cfg(func);
        liveness::analyze(func);
        build_live_ranges(func);

        if !func.status.has_try && !func.status.has_tail_call {
            for (_v, data) in func.values.iter_mut() {
                if backend.is_global_candidate(data) {
                    data.has_global_register = true;
                }
            }
        }
    }
    func.status.is_optimized = true;
}

/// Assign registers, returning every eviction the local allocator made
/// that needs a real spill emitted (spec §4.7). The graph-coloring
/// allocator has no equivalent here: it resolves spills by rewriting
/// spilled ranges to per-use reload/store sequences during `color`
/// itself, rather than reporting them to the driver.
fn allocate_registers<B: Backend>(func: &mut Function, backend: &B, settings: &Settings) -> Vec<(Inst, Spill)> {
    let counts = backend.register_counts();
    match settings.allocator {
        AllocatorKind::Local => {
            let mut alloc = LocalAllocator::new(settings.pointer_bytes, &counts);
            return alloc.run(func);
        }
        AllocatorKind::GraphColoring => {
            let colors_available: Vec<(RegClass, u8)> = counts
                .iter()
                .map(|&(class, n)| (class, n.min(u8::MAX as usize) as u8))
                .collect();
            let coloring = Coloring::new(settings.pointer_bytes, &colors_available);
            coloring.build_interference(func);
            // A function the graph-coloring pass cannot legally color
            // (e.g. an interference clique larger than any class's
            // register count) simply yields spilled ranges rather than
            // erroring; spills still compile correctly, just slower,
            // matching spec §4.6's "optimistic spill always succeeds in
            // the end (possibly with everything spilled)".
            let _ = coloring.color(func);
        }
    }
    Vec::new()
}

fn emit_once<B: Backend>(
    func: &mut Function,
    backend: &mut B,
    spills: &[(Inst, Spill)],
) -> CompileResult<(Vec<u8>, OffsetMap)> {
    let mut buf = CodeBuffer::new();
    let mut fixups = FixupList::new();
    let mut offsets = OffsetMap::new();

    let mut spills_by_inst: HashMap<Inst, Vec<Spill>> = HashMap::new();
    for &(inst, spill) in spills {
        spills_by_inst.entry(inst).or_default().push(spill);
    }

    backend.gen_prolog(&mut buf, func)?;

    let layout = func.layout.clone();
    for block in layout {
        if let Some(label) = func.blocks[block].label {
            let here = buf.offset();
            fixups.resolve(buf.as_mut_slice(), label, here);
            func.blocks[block].address = Some(here);
        } else {
            func.blocks[block].address = Some(buf.offset());
        }

        let insts: Vec<_> = func.block_insts(block).collect();
        for inst in insts {
            let opcode = func.instructions[inst].opcode;
            if opcode == Opcode::Nop {
                continue;
            }
            if opcode == Opcode::MarkOffset {
                let bc = func.instructions[inst]
                    .extra
                    .bytecode_offset
                    .expect("MarkOffset always carries a bytecode offset");
                offsets.push(bc, buf.offset());
                continue;
            }
            // Spills this instruction's register allocation forced must
            // land in the code stream before the instruction that forced
            // them (spec §4.7): the victim's old register is about to be
            // overwritten.
            if let Some(here) = spills_by_inst.get(&inst) {
                for spill in here {
                    backend.spill_reg(&mut buf, spill.reg, &func.values[spill.value])?;
                }
            }
            backend.gen_insn(&mut buf, func, inst, &mut fixups)?;
        }
    }

    backend.gen_epilog(&mut buf, func)?;

    let unresolved = fixups.unresolved_labels();
    if !unresolved.is_empty() {
        return Err(CompileError::CompileError(format!(
            "{} label(s) referenced by a branch were never bound to a block",
            unresolved.len()
        )));
    }

    Ok((buf.into_bytes(), offsets))
}

#[cfg(all(test, feature = "testing_hooks"))]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::{AbiTag, CondCode, Signature, Type};
    use crate::testing::RecordingBackend;

    fn sig() -> Signature {
        Signature::new(Type::I32, vec![Type::I32], AbiTag::Cdecl)
    }

    #[test]
    fn compiles_straight_line_function() {
        let mut f = Function::with_signature(sig());
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        let c1 = b.function_mut().make_int_const(Type::I32, 1);
        let v1 = b.binary(Opcode::IAdd, Type::I32, v0, c1);
        b.ret(Some(v1));
        drop(b);

        let mut backend = RecordingBackend::new();
        let mut cache = CodeCache::new(4096);
        let settings = Settings::default();
        let (record, offsets) = compile(&mut f, &mut backend, &mut cache, &settings).unwrap();

        assert!(record.end > record.start);
        assert!(offsets.is_empty());
        assert!(f.status.is_compiled);
    }

    #[test]
    fn compiles_function_with_forward_branch() {
        let mut f = Function::with_signature(sig());
        let label = f.new_label();
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        let zero = b.function_mut().make_int_const(Type::I32, 0);
        b.br_cond(CondCode::Eq, v0, zero, label);
        let one = b.function_mut().make_int_const(Type::I32, 1);
        let _ = b.binary(Opcode::IAdd, Type::I32, v0, one);
        b.ret(Some(v0));

        b.start_new_block();
        let target = b.current_block();
        b.function_mut().bind_label(label, target);
        b.ret(Some(v0));
        drop(b);

        let mut backend = RecordingBackend::new();
        let mut cache = CodeCache::new(4096);
        let settings = Settings::default();
        let result = compile(&mut f, &mut backend, &mut cache, &settings);
        assert!(result.is_ok());
    }

    #[test]
    fn cache_full_restart_through_compile() {
        // spec §8 scenario 5, end to end through `compile`: pre-fill the
        // cache's only page completely, so the first emit's
        // `start_method` call raises CacheFull; `compile` must restart
        // (re-allocate, re-emit) against the regrown page and succeed.
        let mut f = Function::with_signature(sig());
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        let c1 = b.function_mut().make_int_const(Type::I32, 1);
        let v1 = b.binary(Opcode::IAdd, Type::I32, v0, c1);
        b.ret(Some(v1));
        drop(b);

        let mut backend = RecordingBackend::new();
        let mut cache = CodeCache::new(16);
        let filler = cache.start_method(16, 16).unwrap();
        let _ = cache.end_method(filler, 16).unwrap();
        assert_eq!(cache.page_factor(), 1);

        let settings = Settings::default();
        let (record, _offsets) = compile(&mut f, &mut backend, &mut cache, &settings).unwrap();

        assert!(cache.page_factor() >= 2, "a restart must have doubled the page factor");
        assert!(record.end > record.start);
        assert!(f.status.is_compiled);
    }

    #[test]
    fn unbound_label_is_a_compile_error() {
        let mut f = Function::with_signature(sig());
        let dangling = f.new_label();
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        let zero = b.function_mut().make_int_const(Type::I32, 0);
        b.br_cond(CondCode::Eq, v0, zero, dangling);
        b.ret(Some(v0));
        drop(b);

        let mut backend = RecordingBackend::new();
        let mut cache = CodeCache::new(4096);
        let settings = Settings::default();
        let result = compile(&mut f, &mut backend, &mut cache, &settings);
        assert!(result.is_err());
    }
}
