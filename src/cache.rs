//! The code cache: a growable store of compiled native-code pages.
//!
//! See spec §4.8. Grounded on the `_jit_cache_start_method`/
//! `_jit_cache_end_method`/`_jit_cache_is_full`/`_jit_cache_get_method`
//! protocol as called from `jit-compile.c` and `jit-function.c` (the
//! cache implementation itself is not among the retrieved libjit
//! sources): a page-based bump allocator handing out linear regions for
//! each compiled method, doubling its page size on exhaustion rather
//! than failing outright (spec §9 "cache-full restart"), plus a method
//! table sorted by start address for `get_method`'s reverse PC lookup.
//!
//! Serialization across threads is the caller's job: spec §5 makes the
//! whole-context build lock responsible for that, so this cache assumes
//! at most one method is ever being written at a time.

use crate::error::{CompileError, CompileResult};

/// One compiled method's extent and metadata in the cache (spec §4.8,
/// libjit's `_jit_cache_method_info`).
#[derive(Clone, Debug)]
pub struct MethodRecord {
    /// Start offset (inclusive) into the cache's logical address space.
    pub start: u32,
    /// End offset (exclusive).
    pub end: u32,
    /// Opaque value stashed by the driver via `set_cookie`, typically
    /// identifying the owning `Function` for stack-walking/debug info.
    pub cookie: Option<usize>,
}

/// A position inside a code-cache page currently being written to
/// (spec §4.8's cursor); returned by [`CodeCache::start_method`],
/// consumed by [`CodeCache::end_method`].
#[derive(Clone, Copy, Debug)]
pub struct MethodCursor {
    page: usize,
    start_offset: u32,
}

struct Page {
    bytes: Vec<u8>,
    used: u32,
}

/// A growable store of compiled-code pages plus a sorted method table.
pub struct CodeCache {
    pages: Vec<Page>,
    page_size: u32,
    page_factor: u32,
    methods: Vec<MethodRecord>,
    /// Set by [`Self::start_method`] the moment it has raised
    /// `CacheFull` and doubled `page_factor` in response; consumed by
    /// the next call, which grows the now-larger page instead of
    /// raising again. Mirrors libjit's `_jit_cache_start_method`
    /// returning `NULL` once per exhaustion before the caller's retry
    /// succeeds against the regrown cache (spec §9 "cache-full
    /// restart").
    pending_grow: bool,
}

impl CodeCache {
    /// An empty cache that will allocate pages of at least
    /// `initial_page_size` bytes.
    pub fn new(initial_page_size: u32) -> Self {
        Self {
            pages: Vec::new(),
            page_size: initial_page_size.max(64),
            page_factor: 1,
            methods: Vec::new(),
            pending_grow: false,
        }
    }

    /// Current page-size multiplier (spec glossary "Page factor"),
    /// doubled every time [`Self::start_method`] runs out of room.
    pub fn page_factor(&self) -> u32 {
        self.page_factor
    }

    /// Begin writing a new method, ensuring room for `estimated_len`
    /// bytes at `align`-byte alignment.
    ///
    /// The first page is allocated lazily on first use. Once pages
    /// exist, a method that doesn't fit in the current page raises
    /// `CompileError::CacheFull` exactly once per exhaustion (spec
    /// §4.7/§9: "one `CACHE_FULL` is raised internally, the page
    /// factor doubles") while doubling `page_factor`; the driver's
    /// restart loop (spec §4.7 step 6) is expected to re-emit and call
    /// this again, at which point the now-larger page is grown and the
    /// method fits.
    pub fn start_method(&mut self, estimated_len: u32, align: u32) -> CompileResult<MethodCursor> {
        if self.pending_grow {
            self.grow(estimated_len.max(self.page_size * self.page_factor));
            self.pending_grow = false;
            let page = self.pages.len() - 1;
            let start_offset = align_up(self.pages[page].used, align);
            return Ok(MethodCursor { page, start_offset });
        }

        if self.pages.is_empty() {
            self.grow(estimated_len.max(self.page_size));
            let page = self.pages.len() - 1;
            let start_offset = align_up(self.pages[page].used, align);
            return Ok(MethodCursor { page, start_offset });
        }

        if self.current_page_fits(estimated_len, align) {
            let page = self.pages.len() - 1;
            let start_offset = align_up(self.pages[page].used, align);
            return Ok(MethodCursor { page, start_offset });
        }

        self.page_factor *= 2;
        self.pending_grow = true;
        Err(CompileError::CacheFull)
    }

    fn current_page_fits(&self, estimated_len: u32, align: u32) -> bool {
        match self.pages.last() {
            None => false,
            Some(page) => {
                let start = align_up(page.used, align);
                start as u64 + estimated_len as u64 <= page.bytes.len() as u64
            }
        }
    }

    fn grow(&mut self, min_len: u32) {
        self.page_factor *= 2;
        let size = (self.page_size * self.page_factor).max(min_len);
        self.pages.push(Page {
            bytes: vec![0u8; size as usize],
            used: 0,
        });
    }

    /// The writable byte buffer for the method currently open at
    /// `cursor`, for a [`crate::codegen::Backend`] to emit into.
    pub fn buffer_mut(&mut self, cursor: &MethodCursor) -> &mut [u8] {
        &mut self.pages[cursor.page].bytes[cursor.start_offset as usize..]
    }

    /// Finish writing a method of `len` bytes, recording it in the
    /// method table sorted by start address (spec §4.8: "`get_method`
    /// binary-searches a sorted method table").
    pub fn end_method(&mut self, cursor: MethodCursor, len: u32) -> CompileResult<MethodRecord> {
        self.pages[cursor.page].used = cursor.start_offset + len;
        let record = MethodRecord {
            start: self.global_offset(cursor.page, cursor.start_offset),
            end: self.global_offset(cursor.page, cursor.start_offset + len),
            cookie: None,
        };
        let pos = self.methods.partition_point(|m| m.start < record.start);
        self.methods.insert(pos, record.clone());
        Ok(record)
    }

    fn global_offset(&self, page: usize, offset: u32) -> u32 {
        let prior: u32 = self.pages[..page].iter().map(|p| p.bytes.len() as u32).sum();
        prior + offset
    }

    /// Attach an opaque cookie to whichever method's range contains
    /// `pc` (spec §4.8 "`set_cookie`").
    pub fn set_cookie(&mut self, pc: u32, cookie: usize) {
        if let Some(m) = self.methods.iter_mut().find(|m| m.start <= pc && pc < m.end) {
            m.cookie = Some(cookie);
        }
    }

    /// Binary search the method table for the method containing `pc`
    /// (spec §4.8 "`get_method`").
    pub fn get_method(&self, pc: u32) -> Option<&MethodRecord> {
        let idx = self.methods.partition_point(|m| m.start <= pc);
        if idx == 0 {
            return None;
        }
        let candidate = &self.methods[idx - 1];
        if candidate.start <= pc && pc < candidate.end {
            Some(candidate)
        } else {
            None
        }
    }

    /// Number of methods currently recorded.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Translate a logical cache offset into the real address of the
    /// byte living there, for publishing as a function's entry point
    /// (spec §5 "Redirectors": "the published entry point is the real
    /// address of the first byte of the compiled method").
    pub fn entry_ptr(&self, native_offset: u32) -> *const u8 {
        let mut remaining = native_offset;
        for page in &self.pages {
            let len = page.bytes.len() as u32;
            if remaining < len {
                return unsafe { page.bytes.as_ptr().add(remaining as usize) };
            }
            remaining -= len;
        }
        panic!("native_offset out of range for this cache");
    }

    /// Inverse of [`Self::entry_ptr`] composed with [`Self::get_method`]:
    /// given a raw PC that lives inside one of this cache's pages, find
    /// the method table entry covering it. Used by a stack walker /
    /// debugger resolving a crash address back to a compiled function
    /// (spec §4.8).
    pub fn get_method_by_ptr(&self, pc: *const u8) -> Option<&MethodRecord> {
        let mut base = 0u32;
        for page in &self.pages {
            let start = page.bytes.as_ptr();
            let len = page.bytes.len();
            let in_range = unsafe {
                let end = start.add(len);
                pc >= start && pc < end
            };
            if in_range {
                let offset = base + unsafe { pc.offset_from(start) as u32 };
                return self.get_method(offset);
            }
            base += len as u32;
        }
        None
    }

    /// Flush the instruction cache for a just-written range (spec
    /// §4.8). On real hardware this is an `mprotect`/cache-line-flush
    /// call; since emitting genuinely executable memory is out of
    /// scope here (Non-goal: no ELF serialization/dynamic loading),
    /// this is a documented no-op hook a platform-specific cache
    /// implementation can fill in without changing the driver.
    pub fn flush_exec(&self, _start: u32, _len: u32) {}
}

fn align_up(v: u32, align: u32) -> u32 {
    if align <= 1 {
        v
    } else {
        (v + align - 1) / align * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_end_method_records_extent() {
        let mut cache = CodeCache::new(256);
        let cursor = cache.start_method(32, 8).unwrap();
        let record = cache.end_method(cursor, 32).unwrap();
        assert_eq!(record.end - record.start, 32);
        assert_eq!(cache.method_count(), 1);
    }

    #[test]
    fn get_method_finds_containing_range() {
        let mut cache = CodeCache::new(256);
        let c1 = cache.start_method(16, 1).unwrap();
        let r1 = cache.end_method(c1, 16).unwrap();
        let c2 = cache.start_method(16, 1).unwrap();
        let r2 = cache.end_method(c2, 16).unwrap();

        assert_eq!(cache.get_method(r1.start).map(|m| m.start), Some(r1.start));
        assert_eq!(cache.get_method(r2.start + 1).map(|m| m.start), Some(r2.start));
        assert!(cache.get_method(r2.end + 1000).is_none());
    }

    #[test]
    fn cache_full_restart_scenario() {
        // spec §8 scenario 5: pre-fill the page so only 16 bytes remain,
        // then ask for a method that doesn't fit. Expected: one
        // CacheFull, the page factor doubles, and retrying succeeds.
        let mut cache = CodeCache::new(16);
        let c0 = cache.start_method(16, 1).unwrap();
        let _ = cache.end_method(c0, 16).unwrap(); // page now full

        assert_eq!(cache.page_factor(), 1);
        let err = cache.start_method(32, 1);
        assert!(matches!(err, Err(CompileError::CacheFull)));
        assert_eq!(cache.page_factor(), 2, "page factor doubles when CacheFull is raised");

        let cursor = cache
            .start_method(32, 1)
            .expect("retry after CacheFull must succeed against the regrown page");
        let record = cache.end_method(cursor, 32).unwrap();
        assert_eq!(record.end - record.start, 32);
    }

    #[test]
    fn entry_ptr_round_trips_through_get_method_by_ptr() {
        let mut cache = CodeCache::new(256);
        let cursor = cache.start_method(16, 1).unwrap();
        let record = cache.end_method(cursor, 16).unwrap();
        let ptr = cache.entry_ptr(record.start);
        let found = cache.get_method_by_ptr(ptr).unwrap();
        assert_eq!(found.start, record.start);
    }

    #[test]
    fn set_cookie_attaches_to_containing_method() {
        let mut cache = CodeCache::new(256);
        let cursor = cache.start_method(16, 1).unwrap();
        let record = cache.end_method(cursor, 16).unwrap();
        cache.set_cookie(record.start, 42);
        assert_eq!(cache.get_method(record.start).unwrap().cookie, Some(42));
    }
}
