//! The top-level JIT context: owns the code cache and serializes
//! compiles against it.
//!
//! See spec §3 ("Lifecycles": "the code cache outlives the builder and
//! is owned by the context") and §5 ("one build lock per context;
//! `Context::compile` called re-entrantly on the same context is an
//! error"). Grounded on libjit's context, visible at its call sites
//! rather than a definition file: `jit_mutex_lock(&context->cache_lock)`/
//! `jit_mutex_unlock` brackets both compilation (`jit-compile.c`) and
//! function creation/finalization (`jit-function.c`), pairing exactly
//! this pair of fields — a cache and a non-reentrant build lock —
//! behind a public handle.

use crate::binemit::OffsetMap;
use crate::cache::{CodeCache, MethodRecord};
use crate::codegen::{self, Backend};
use crate::error::{CompileError, CompileResult};
use crate::ir::Function;
use crate::settings::Settings;
use std::sync::Mutex;

/// Owns a [`CodeCache`] and the settings every compile on it shares.
/// Thread-safe to hold behind a shared reference: [`Self::compile`]
/// takes `&self` and serializes concurrent callers through an internal
/// lock, the same way libjit's `jit_context_build_start`/`_end` pair
/// does around the whole compile pipeline.
pub struct Context {
    cache: Mutex<CodeCache>,
    settings: Settings,
    build_lock: Mutex<()>,
}

impl Context {
    /// A fresh context with its own empty code cache.
    pub fn new(settings: Settings) -> Self {
        Self {
            cache: Mutex::new(CodeCache::new(settings.initial_page_size)),
            settings,
            build_lock: Mutex::new(()),
        }
    }

    /// A context using 64-bit default settings.
    pub fn new_default() -> Self {
        Self::new(Settings::default())
    }

    /// The settings this context's compiles run with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Compile `func` against `backend`, publishing its entry point on
    /// success (spec §5). Fails with [`CompileError::CalledNested`] if
    /// called again on this context before the first call returns — the
    /// usual cause is a `Backend` callback invoking `compile` itself,
    /// which libjit also forbids.
    pub fn compile<B: Backend>(&self, func: &mut Function, backend: &mut B) -> CompileResult<OffsetMap> {
        let _guard = self
            .build_lock
            .try_lock()
            .map_err(|_| CompileError::CalledNested)?;

        if func.status.is_compiled && !func.status.is_recompilable {
            return Err(CompileError::CompileError(
                "function is already compiled and is not marked recompilable".into(),
            ));
        }

        let mut cache = self.cache.lock().expect("code cache lock poisoned");
        let (record, offsets) = codegen::compile(func, backend, &mut cache, &self.settings)?;
        let ptr = cache.entry_ptr(record.start);
        func.entry_point.store(ptr);
        cache.set_cookie(record.start, func as *mut Function as usize);
        Ok(offsets)
    }

    /// Look up the function whose compiled range contains `pc`, for a
    /// stack walker or debugger (spec §4.8). Returns the cookie stashed
    /// by [`Self::compile`] — the compiled `Function`'s address, cast
    /// back by the caller if it's still the same object.
    pub fn lookup_pc(&self, pc: *const u8) -> Option<MethodRecord> {
        let cache = self.cache.lock().expect("code cache lock poisoned");
        cache.get_method_by_ptr(pc).cloned()
    }
}

#[cfg(all(test, feature = "testing_hooks"))]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::{AbiTag, Opcode, Signature, Type};
    use crate::testing::RecordingBackend;

    fn sig() -> Signature {
        Signature::new(Type::I32, vec![Type::I32], AbiTag::Cdecl)
    }

    #[test]
    fn compile_publishes_entry_point() {
        let mut f = Function::with_signature(sig());
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        let _ = b.unary(Opcode::INeg, Type::I32, v0);
        b.ret(Some(v0));
        drop(b);

        let ctx = Context::new_default();
        let mut backend = RecordingBackend::new();
        ctx.compile(&mut f, &mut backend).unwrap();

        assert!(f.entry_point.load().is_some());
        assert!(f.status.is_compiled);
    }

    #[test]
    fn lookup_pc_resolves_a_just_compiled_function() {
        let mut f = Function::with_signature(sig());
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        b.ret(Some(v0));
        drop(b);

        let ctx = Context::new_default();
        let mut backend = RecordingBackend::new();
        ctx.compile(&mut f, &mut backend).unwrap();

        let pc = f.entry_point.load().unwrap();
        assert!(ctx.lookup_pc(pc).is_some());
    }

    #[test]
    fn recompiling_a_non_recompilable_function_is_rejected() {
        let mut f = Function::with_signature(sig());
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        b.ret(Some(v0));
        drop(b);

        let ctx = Context::new_default();
        let mut backend = RecordingBackend::new();
        ctx.compile(&mut f, &mut backend).unwrap();

        let mut backend2 = RecordingBackend::new();
        assert!(ctx.compile(&mut f, &mut backend2).is_err());
    }
}
