//! Bump allocator with chained blocks, fuseable lifetimes, and cleanup
//! callbacks.
//!
//! Mirrors `upb_Arena`: allocation is a bump pointer inside a current block
//! that falls back to requesting a new (larger) block when exhausted.
//! Arenas may be *fused* so that two arenas share one backing store and are
//! freed together — this is how a sub-message built in one arena stays
//! alive once it's linked into a message that lives in another. The shared
//! store is an `alloc::rc::Rc`, not a hand-rolled refcount: whichever fused
//! handle happens to be dropped last is the one whose `Rc` strong count
//! reaches zero, so teardown (cleanups, then blocks) runs exactly once no
//! matter what order the caller drops the handles in.

extern crate alloc as alloc_crate;

use alloc_crate::boxed::Box;
use alloc_crate::rc::Rc;
use alloc_crate::vec::Vec;
use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use allocator_api2::alloc::{Allocator, Global};

use crate::error::ArenaError;

/// Initial block size; doubles on every subsequent block request that isn't
/// itself larger than the doubled size (a single allocation larger than the
/// current doubling size gets its own exactly-sized block).
const INITIAL_BLOCK_SIZE: usize = 256;

struct Block<'a> {
    /// Allocator this block's memory came from, kept so `Drop` can return it
    /// (spec.md §4.A teardown: "release each block").
    allocator: &'a dyn Allocator,
    /// Backing allocation for this block; `next`/`end` are used for bump
    /// allocation, `layout` is kept so `Drop` can hand the exact layout back
    /// to `allocator.deallocate`.
    memory: NonNull<[u8]>,
    layout: Layout,
    /// Bump pointer: next free byte within `memory`.
    next: Cell<*mut u8>,
    /// End of `memory`.
    end: *mut u8,
}

impl<'a> Block<'a> {
    fn new(allocator: &'a dyn Allocator, size: usize) -> Result<Box<Block<'a>>, ArenaError> {
        let layout = Layout::from_size_align(size, core::mem::align_of::<u64>())
            .map_err(|_| ArenaError::AllocationFailed)?;
        let memory = allocator
            .allocate(layout)
            .map_err(|_| ArenaError::AllocationFailed)?;
        let start = memory.as_ptr() as *mut u8;
        let end = unsafe { start.add(memory.len()) };
        Ok(Box::new(Block {
            allocator,
            memory,
            layout,
            next: Cell::new(start),
            end,
        }))
    }

    fn remaining(&self) -> usize {
        self.end as usize - self.next.get() as usize
    }

    /// Bump-allocate `layout` out of this block if there's room.
    fn try_alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let cur = self.next.get() as usize;
        let aligned = (cur + layout.align() - 1) & !(layout.align() - 1);
        let new_next = aligned.checked_add(layout.size())?;
        if new_next > self.end as usize {
            return None;
        }
        self.next.set(new_next as *mut u8);
        NonNull::new(aligned as *mut u8)
    }

    fn is_most_recent(&self, ptr: NonNull<u8>, size: usize) -> bool {
        unsafe { ptr.as_ptr().add(size) as *const u8 == self.next.get() as *const u8 }
    }
}

impl Drop for Block<'_> {
    fn drop(&mut self) {
        // Safety: `memory`/`layout` are exactly what `self.allocator` handed
        // back from `allocate(layout)` in `Block::new`; a block is never
        // resized (only abandoned in favor of a fresh one), so the layout
        // passed to `allocate` is still the layout this memory was last
        // allocated with.
        let ptr = unsafe { NonNull::new_unchecked(self.memory.as_ptr() as *mut u8) };
        unsafe { self.allocator.deallocate(ptr, self.layout) };
    }
}

type Cleanup = (*mut (), unsafe fn(*mut ()));

/// The data an [`Arena`] bump-allocates out of. Shared by every handle in a
/// fused group via `Rc` (see [`Arena::fuse`]) so teardown — cleanups, then
/// blocks — runs exactly once, when the last `Rc` clone drops.
struct ArenaInner<'a> {
    allocator: &'a dyn Allocator,
    blocks: Cell<Vec<Box<Block<'a>>>>,
    cleanups: Cell<Vec<Cleanup>>,
}

impl<'a> ArenaInner<'a> {
    fn new(allocator: &'a dyn Allocator) -> Rc<Self> {
        Rc::new(ArenaInner {
            allocator,
            blocks: Cell::new(Vec::new()),
            cleanups: Cell::new(Vec::new()),
        })
    }

    fn with_blocks<R>(&self, f: impl FnOnce(&mut Vec<Box<Block<'a>>>) -> R) -> R {
        let mut blocks = self.blocks.take();
        let r = f(&mut blocks);
        self.blocks.set(blocks);
        r
    }

    /// Raw byte allocation. Returns `Err` only on genuine allocator
    /// exhaustion; the fast-path decoder treats this as a signal to fall
    /// back to the mini-table decoder rather than checking inline (the
    /// "fast headroom" idea in spec.md §9).
    fn alloc_raw(&self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        let found = self.with_blocks(|blocks| blocks.last().and_then(|b| b.try_alloc(layout)));
        if let Some(p) = found {
            return Ok(p);
        }
        let prev_total: usize = self.with_blocks(|blocks| blocks.iter().map(|b| b.memory.len()).sum());
        let wanted = (prev_total.max(INITIAL_BLOCK_SIZE / 2) * 2).max(layout.size() + layout.align());
        let block = Block::new(self.allocator, wanted)?;
        let ptr = block.try_alloc(layout).expect("freshly sized block must fit");
        self.with_blocks(|blocks| blocks.push(block));
        Ok(ptr)
    }

    /// Grow or relocate an existing allocation. Grows in place only when it
    /// is the most recent allocation out of the current block and the new
    /// size still fits; otherwise allocates fresh and copies, abandoning the
    /// old storage (it stays resident until the whole arena is freed).
    fn realloc(&self, ptr: NonNull<u8>, old_layout: Layout, new_size: usize) -> Result<NonNull<u8>, ArenaError> {
        let in_place = self.with_blocks(|blocks| {
            blocks.last().is_some_and(|b| {
                b.is_most_recent(ptr, old_layout.size()) && b.remaining() + old_layout.size() >= new_size
            })
        });
        if in_place {
            self.with_blocks(|blocks| {
                let b = blocks.last().unwrap();
                let base = ptr.as_ptr() as usize;
                b.next.set((base + new_size) as *mut u8);
            });
            return Ok(ptr);
        }
        let new_layout =
            Layout::from_size_align(new_size, old_layout.align()).map_err(|_| ArenaError::AllocationFailed)?;
        let new_ptr = self.alloc_raw(new_layout)?;
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_layout.size().min(new_size));
        }
        Ok(new_ptr)
    }

    /// Register a destructor to run when the arena (or its fused group) is
    /// torn down. Cleanups run newest-first, like `upb_Arena_AddCleanup`.
    fn add_cleanup<T>(&self, ptr: *mut T, f: unsafe fn(*mut T)) {
        let erased: unsafe fn(*mut ()) = unsafe { core::mem::transmute(f) };
        let mut c = self.cleanups.take();
        c.push((ptr as *mut (), erased));
        self.cleanups.set(c);
    }

    /// Moves `other`'s blocks and cleanups into `self`, leaving `other`
    /// empty. Called only by [`Arena::fuse`] right before `other`'s `Rc`
    /// handle is dropped in favor of a clone of `self`'s, so nothing is
    /// lost when that now-empty `Rc` is later discarded.
    fn absorb(&self, other: &ArenaInner<'a>) {
        let other_blocks = other.with_blocks(core::mem::take);
        self.with_blocks(|b| b.extend(other_blocks));
        let other_cleanups = other.cleanups.take();
        let mut mine = self.cleanups.take();
        mine.extend(other_cleanups);
        self.cleanups.set(mine);
    }
}

impl Drop for ArenaInner<'_> {
    fn drop(&mut self) {
        // `ArenaInner` is only ever reached through `Rc`, so this is the
        // true last live handle — whichever fused `Arena` happens to be
        // dropped last, by construction, not by a refcount check that a
        // compiler-generated field drop could race past.
        let mut cleanups = self.cleanups.take();
        for (ptr, f) in cleanups.drain(..).rev() {
            unsafe { f(ptr) };
        }
        // `self.blocks` drops here: each `Box<Block>`'s own `Drop` returns
        // its memory to `self.allocator`.
    }
}

/// A bump allocator whose allocations all die together when the arena (or
/// its fused group) is dropped.
///
/// `fuse` lets two `Arena` handles share one backing [`ArenaInner`] (via
/// `Rc`) so a deeply-linked sub-message allocated in a different arena
/// stays alive for as long as its parent does, whatever order the two
/// handles are later dropped in.
pub struct Arena<'a> {
    inner: RefCell<Rc<ArenaInner<'a>>>,
}

impl<'a> Arena<'a> {
    /// A fresh arena backed by `allocator`, not yet fused with anything.
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Arena { inner: RefCell::new(ArenaInner::new(allocator)) }
    }

    /// Raw byte allocation; see [`ArenaInner::alloc_raw`].
    pub fn alloc_raw(&self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        self.inner.borrow().alloc_raw(layout)
    }

    /// Allocate space for, and initialize, a single `T`.
    pub fn alloc<T>(&self, value: T) -> Result<&'a mut T, ArenaError> {
        let ptr = self.alloc_raw(Layout::new::<T>())?.cast::<T>();
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Allocate and zero-fill `size` bytes, aligned to `align`. Used for
    /// message instances: a freshly zeroed block is always a valid empty
    /// message (spec.md §6, in-memory layout contract).
    pub fn alloc_zeroed(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        let layout = Layout::from_size_align(size, align).map_err(|_| ArenaError::AllocationFailed)?;
        let ptr = self.alloc_raw(layout)?;
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    /// Grow or relocate an existing allocation; see [`ArenaInner::realloc`].
    pub fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<u8>, ArenaError> {
        self.inner.borrow().realloc(ptr, old_layout, new_size)
    }

    /// Register a destructor to run when the arena (or its fused group) is
    /// torn down.
    pub fn add_cleanup<T>(&self, ptr: *mut T, f: unsafe fn(*mut T)) {
        self.inner.borrow().add_cleanup(ptr, f)
    }

    /// Fuse `self` and `other` so they share one backing store and free
    /// together. After this call both handles' allocations, and any
    /// cleanups registered on either (before or after the fuse), are torn
    /// down exactly once, whichever of the two is dropped last.
    pub fn fuse(&self, other: &Arena<'a>) {
        let mut mine = self.inner.borrow_mut();
        let mut theirs = other.inner.borrow_mut();
        if Rc::ptr_eq(&*mine, &*theirs) {
            return;
        }
        mine.absorb(&**theirs);
        let shared = Rc::clone(&*mine);
        *theirs = shared;
        log::debug!("fused two arenas into one shared backing store");
    }
}

/// An arena backed by the global allocator with no other arena to fuse
/// with. Convenient for tests and one-off decodes.
pub struct StandaloneArena;

impl StandaloneArena {
    pub fn new() -> Self {
        StandaloneArena
    }

    pub fn arena(&self) -> Arena<'_> {
        Arena::new(&Global)
    }
}

impl Default for StandaloneArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocates_and_grows_blocks() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let a = arena.alloc(1u64).unwrap();
        let b = arena.alloc(2u64).unwrap();
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
        for i in 0..10_000u32 {
            let v = arena.alloc(i).unwrap();
            assert_eq!(*v, i);
        }
    }

    #[test]
    fn cleanup_runs_on_drop() {
        static mut RAN: bool = false;
        unsafe fn mark(_p: *mut u8) {
            unsafe { RAN = true };
        }
        {
            let owner = StandaloneArena::new();
            let arena = owner.arena();
            arena.add_cleanup(core::ptr::null_mut::<u8>(), mark);
        }
        assert!(unsafe { RAN });
    }

    #[test]
    fn fuse_shares_group_and_both_stay_alive() {
        let a = Arena::new(&Global);
        let b = Arena::new(&Global);
        a.fuse(&b);
        let x = a.alloc(42u32).unwrap();
        assert_eq!(*x, 42);
        // Allocating through the other fused handle must land in the same
        // shared backing store, not a second independent one.
        let y = b.alloc(7u32).unwrap();
        assert_eq!(*y, 7);
    }

    #[test]
    fn fused_cleanups_survive_either_drop_order() {
        // Two distinct static flags, one per arena's registered cleanup,
        // so we can tell which one(s) actually ran.
        static mut RAN_A: bool = false;
        static mut RAN_B: bool = false;
        unsafe fn mark_a(_p: *mut u8) {
            unsafe { RAN_A = true };
        }
        unsafe fn mark_b(_p: *mut u8) {
            unsafe { RAN_B = true };
        }

        let a = Arena::new(&Global);
        {
            let b = Arena::new(&Global);
            a.fuse(&b);
            a.add_cleanup(core::ptr::null_mut::<u8>(), mark_a);
            b.add_cleanup(core::ptr::null_mut::<u8>(), mark_b);

            // `b` is not the last handle to the shared group (`a` is still
            // alive): dropping it here must not run, or silently lose, its
            // cleanup — `a` must still run it once `a` itself drops.
        }
        assert!(!unsafe { RAN_A }, "a hasn't dropped yet");
        assert!(!unsafe { RAN_B }, "b's cleanup must defer to the surviving handle, not run or get lost on drop");

        drop(a);
        assert!(unsafe { RAN_A }, "a's own cleanup must run when the last fused handle drops");
        assert!(unsafe { RAN_B }, "b's cleanup, moved into the shared store at fuse time, must also run");
    }

    #[test]
    fn zeroed_alloc_is_all_zero() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let ptr = arena.alloc_zeroed(64, 8).unwrap();
        let slice = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(slice.iter().all(|&b| b == 0));
    }
}
