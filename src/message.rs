//! Arena-backed runtime message, array, and map (component F).
//!
//! A [`Message`] is a flat, zeroed block of `instance_size` bytes laid out
//! by `crate::schema::message::compute_layout` — hasbit region, oneof case
//! words, then scalar/pointer slots — exactly the shape
//! `crate::minitable::MiniTable` describes. This module is the *runtime*
//! counterpart to `crate::schema::message::MessageDef`, the *schema* one;
//! grounded in `base.rs`'s `Object` (raw `ref_at`/`ref_mut`/has-bit helpers
//! over an arena-allocated byte block) and `containers.rs`'s `RawVec`/
//! `RepeatedField` (bump-grow-via-arena array), generalized from the
//! teacher's compile-time-typed fields to the schema-interpreted fields this
//! crate's decoder actually produces.

extern crate alloc;

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::arena::Arena;
use crate::error::ArenaError;
use crate::schema::INTERNAL_HEADER_SIZE;

/// Raw, type-erased view of a `string`/`bytes` field's inline slot (spec.md
/// §3: "string view = pointer+length"). Points either into the arena (owned
/// copy) or into the original input buffer (alias mode) — the message
/// itself doesn't know which; that's a property of who wrote the pointer.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StrView {
    ptr: *const u8,
    len: u32,
}

impl StrView {
    pub const EMPTY: StrView = StrView { ptr: core::ptr::null(), len: 0 };

    pub fn new(bytes: &[u8]) -> Self {
        StrView { ptr: bytes.as_ptr(), len: bytes.len() as u32 }
    }

    /// # Safety
    /// The caller must ensure the pointed-to bytes are still alive (either
    /// the arena that copied them, or the input buffer an alias points
    /// into, per spec.md §5's aliasing precondition).
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() {
            &[]
        } else {
            unsafe { core::slice::from_raw_parts(self.ptr, self.len as usize) }
        }
    }
}

/// A tagged pointer to a linked (typed) or unlinked (opaque) sub-message
/// (spec.md §3: "A sub-message pointer may be tagged to indicate
/// empty/unlinked"). Low bit set = unlinked. Reading code must go through
/// [`Self::get`]; only the parser and the arena copier are allowed to
/// construct the unlinked variant.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct SubMessagePtr(usize);

/// The two states a [`SubMessagePtr`] can resolve to.
pub enum SubMessage {
    Linked(NonNull<Message>),
    Unlinked(NonNull<Message>),
}

impl SubMessagePtr {
    pub const NULL: SubMessagePtr = SubMessagePtr(0);

    pub fn linked(ptr: NonNull<Message>) -> Self {
        SubMessagePtr(ptr.as_ptr() as usize)
    }

    pub fn unlinked(ptr: NonNull<Message>) -> Self {
        SubMessagePtr(ptr.as_ptr() as usize | 1)
    }

    /// Reconstructs a tagged pointer from its raw bit pattern, e.g. the 8
    /// bytes `crate::encode` reads back out of a map value slot that was
    /// copied verbatim by `crate::decode::raw_field_bytes`.
    pub(crate) fn from_raw(v: usize) -> Self {
        SubMessagePtr(v)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn get(self) -> Option<SubMessage> {
        if self.0 == 0 {
            return None;
        }
        let untagged = (self.0 & !1) as *mut Message;
        // Safety: only `linked`/`unlinked` construct a non-zero value, and
        // both start from a `NonNull`.
        let ptr = unsafe { NonNull::new_unchecked(untagged) };
        Some(if self.0 & 1 != 0 { SubMessage::Unlinked(ptr) } else { SubMessage::Linked(ptr) })
    }
}

/// Type-erased, arena-grown element storage for a repeated field (spec.md
/// §3 "upb_Array": capacity, size, element-size log2, tagged base
/// pointer"). The message stores a `*mut Array` (or null for "empty") at a
/// repeated field's slot rather than the array inline, matching
/// `PTR_SIZE`/`PTR_ALIGN` in `crate::schema::message`.
pub struct Array {
    ptr: *mut u8,
    cap: u32,
    len: u32,
    elem_size_lg2: u8,
}

impl Array {
    fn elem_layout(&self) -> Layout {
        let size = 1usize << self.elem_size_lg2;
        Layout::from_size_align(size, size.min(8).max(1)).expect("element layout from a valid lg2 size")
    }

    pub fn new_in<'a>(arena: &Arena<'a>, elem_size_lg2: u8) -> Result<&'a mut Array, ArenaError> {
        arena.alloc(Array { ptr: core::ptr::null_mut(), cap: 0, len: 0, elem_size_lg2 })
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw bytes of one element at `index`. Panics if out of bounds.
    pub fn get_raw(&self, index: u32) -> &[u8] {
        assert!(index < self.len);
        let elem_size = 1usize << self.elem_size_lg2;
        unsafe {
            let p = self.ptr.add(index as usize * elem_size);
            core::slice::from_raw_parts(p, elem_size)
        }
    }

    pub fn as_typed_slice<T: Copy>(&self) -> &[T] {
        debug_assert_eq!(core::mem::size_of::<T>(), 1usize << self.elem_size_lg2);
        if self.cap == 0 {
            &[]
        } else {
            unsafe { core::slice::from_raw_parts(self.ptr as *const T, self.len as usize) }
        }
    }

    /// Appends one element's raw bytes, doubling capacity on overflow and
    /// abandoning the old storage in the arena (spec.md §3: "Growth doubles
    /// capacity; on reallocation the old storage is abandoned").
    pub fn push_raw(&mut self, arena: &Arena<'_>, elem: &[u8]) -> Result<(), ArenaError> {
        let elem_size = 1usize << self.elem_size_lg2;
        debug_assert_eq!(elem.len(), elem_size);
        if self.len == self.cap {
            self.grow(arena, (self.cap.max(4)) * 2)?;
        }
        unsafe {
            let dst = self.ptr.add(self.len as usize * elem_size);
            core::ptr::copy_nonoverlapping(elem.as_ptr(), dst, elem_size);
        }
        self.len += 1;
        Ok(())
    }

    pub fn push<T: Copy>(&mut self, arena: &Arena<'_>, value: T) -> Result<(), ArenaError> {
        debug_assert_eq!(core::mem::size_of::<T>(), 1usize << self.elem_size_lg2);
        let bytes =
            unsafe { core::slice::from_raw_parts(&value as *const T as *const u8, core::mem::size_of::<T>()) };
        self.push_raw(arena, bytes)
    }

    fn grow(&mut self, arena: &Arena<'_>, new_cap: u32) -> Result<(), ArenaError> {
        let elem_layout = self.elem_layout();
        let new_size = elem_layout.size() * new_cap as usize;
        if self.cap == 0 {
            let ptr = arena.alloc_raw(
                Layout::from_size_align(new_size, elem_layout.align()).map_err(|_| ArenaError::AllocationFailed)?,
            )?;
            self.ptr = ptr.as_ptr();
        } else {
            let old_size = elem_layout.size() * self.cap as usize;
            let old_ptr = NonNull::new(self.ptr).expect("nonzero cap implies a real allocation");
            let old_layout =
                Layout::from_size_align(old_size, elem_layout.align()).map_err(|_| ArenaError::AllocationFailed)?;
            let new_ptr = arena.realloc(old_ptr, old_layout, new_size)?;
            self.ptr = new_ptr.as_ptr();
        }
        self.cap = new_cap;
        Ok(())
    }
}

/// A single entry in a [`Map`]'s backing store: raw key/value byte spans.
/// Keys and values are arena-owned copies (never aliased into the input,
/// since a map's lifetime always matches its owning message's arena).
struct MapEntry {
    key: Array,
    value: Array,
}

/// Minimal arena-backed map (spec.md §3 "upb_Map (a string- or int-keyed
/// hash table of entries)"). Implemented as a linear-scan append-only list
/// of entries rather than a true hash table — map fields are rare and
/// typically small in practice, and `crate::hash`'s tables are shaped for
/// `&str → DefId` symbol lookups, not arbitrary type-erased byte keys, so
/// reusing them here would need its own generalization; that tradeoff is
/// recorded in DESIGN.md.
///
/// Entries are stored in a raw, exact-stride byte buffer rather than
/// through [`Array`]: `Array`'s growth API only accepts elements whose size
/// is a power of two (it stores a log2 size for scalar field slots), and
/// `MapEntry` (two `Array`s back to back) generally isn't one.
pub struct Map {
    ptr: *mut u8,
    len: u32,
    cap: u32,
}

const MAP_ENTRY_STRIDE: usize = core::mem::size_of::<MapEntry>();

impl Map {
    pub fn new_in<'a>(arena: &Arena<'a>) -> Result<&'a mut Map, ArenaError> {
        arena.alloc(Map { ptr: core::ptr::null_mut(), len: 0, cap: 0 })
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    /// Finds the entry whose key bytes equal `key`, if any.
    fn find(&self, key: &[u8]) -> Option<usize> {
        for i in 0..self.len {
            let e = self.entry_at(i);
            if e.key.as_typed_slice::<u8>() == key {
                return Some(i as usize);
            }
        }
        None
    }

    fn entry_at(&self, index: u32) -> &MapEntry {
        debug_assert!(index < self.len);
        unsafe { &*(self.ptr.add(index as usize * MAP_ENTRY_STRIDE) as *const MapEntry) }
    }

    fn entry_at_mut(&mut self, index: u32) -> &mut MapEntry {
        debug_assert!(index < self.len);
        unsafe { &mut *(self.ptr.add(index as usize * MAP_ENTRY_STRIDE) as *mut MapEntry) }
    }

    fn grow(&mut self, arena: &Arena<'_>, new_cap: u32) -> Result<(), ArenaError> {
        let layout = Layout::from_size_align(MAP_ENTRY_STRIDE, core::mem::align_of::<MapEntry>())
            .map_err(|_| ArenaError::AllocationFailed)?;
        let new_ptr = if self.cap == 0 {
            arena.alloc_raw(Layout::from_size_align(layout.size() * new_cap as usize, layout.align()).unwrap())?
        } else {
            let old_layout = Layout::from_size_align(layout.size() * self.cap as usize, layout.align()).unwrap();
            arena.realloc(NonNull::new(self.ptr).expect("nonzero cap implies a real allocation"), old_layout, layout.size() * new_cap as usize)?
        };
        self.ptr = new_ptr.as_ptr();
        self.cap = new_cap;
        Ok(())
    }

    /// Inserts or overwrites the value for `key` (last-write-wins, matching
    /// binary decode's "later entry overwrites" map semantics).
    pub fn insert_raw(&mut self, arena: &Arena<'_>, key: &[u8], value: &[u8]) -> Result<(), ArenaError> {
        if let Some(idx) = self.find(key) {
            let entry = self.entry_at_mut(idx as u32);
            entry.value = Array::default_empty();
            copy_into_array(&mut entry.value, arena, value)?;
            return Ok(());
        }
        let mut key_arr = Array::default_empty();
        copy_into_array(&mut key_arr, arena, key)?;
        let mut value_arr = Array::default_empty();
        copy_into_array(&mut value_arr, arena, value)?;
        if self.len == self.cap {
            self.grow(arena, (self.cap.max(4)) * 2)?;
        }
        unsafe {
            let dst = self.ptr.add(self.len as usize * MAP_ENTRY_STRIDE) as *mut MapEntry;
            dst.write(MapEntry { key: key_arr, value: value_arr });
        }
        self.len += 1;
        Ok(())
    }

    pub fn get_raw(&self, key: &[u8]) -> Option<&[u8]> {
        let idx = self.find(key)?;
        Some(self.entry_at(idx as u32).value.as_typed_slice::<u8>())
    }

    /// Iterates every entry's raw key/value byte spans in insertion order,
    /// for `crate::encode` to re-emit as wire-format map entries.
    pub(crate) fn iter_raw(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        (0..self.len).map(move |i| {
            let e = self.entry_at(i);
            (e.key.as_typed_slice::<u8>(), e.value.as_typed_slice::<u8>())
        })
    }
}

impl Array {
    fn default_empty() -> Array {
        Array { ptr: core::ptr::null_mut(), cap: 0, len: 0, elem_size_lg2: 0 }
    }
}

fn copy_into_array(arr: &mut Array, arena: &Arena<'_>, bytes: &[u8]) -> Result<(), ArenaError> {
    for &b in bytes {
        arr.push(arena, b)?;
    }
    Ok(())
}

/// Header every message instance carries before its hasbit region: a
/// pointer/len/cap to the arena-grown span of verbatim unknown-field bytes
/// (spec.md §3 "Unknown fields"). Always exactly [`INTERNAL_HEADER_SIZE`]
/// bytes, placed at offset 0 by `crate::schema::message::compute_layout`.
#[repr(C)]
struct UnknownFieldsHeader {
    ptr: *mut u8,
    len: u32,
    cap: u32,
}

const _: () = assert!(core::mem::size_of::<UnknownFieldsHeader>() == INTERNAL_HEADER_SIZE);

/// A flat, arena-allocated message instance (spec.md §3 "A message is a
/// flat block of bytes laid out per its MessageDef"). Opaque: all field
/// access goes through offset-based accessors driven by
/// `crate::minitable::MiniTableField`, since this type has no compile-time
/// knowledge of its own schema (it's produced by the mini-table decoder,
/// not by generated per-message Rust structs).
pub struct Message {
    _opaque: [u8; 0],
}

impl Message {
    /// Allocates a zeroed instance of `instance_size` bytes (a freshly
    /// zeroed block is always a valid empty message, spec.md §6).
    pub fn new_in<'a>(arena: &Arena<'a>, instance_size: u32) -> Result<&'a mut Message, ArenaError> {
        let ptr = arena.alloc_zeroed(instance_size as usize, 8)?;
        Ok(unsafe { &mut *(ptr.as_ptr() as *mut Message) })
    }

    fn header(&self) -> &UnknownFieldsHeader {
        unsafe { &*(self as *const Message as *const UnknownFieldsHeader) }
    }

    fn header_mut(&mut self) -> &mut UnknownFieldsHeader {
        unsafe { &mut *(self as *mut Message as *mut UnknownFieldsHeader) }
    }

    pub fn unknown_fields(&self) -> &[u8] {
        let h = self.header();
        if h.ptr.is_null() {
            &[]
        } else {
            unsafe { core::slice::from_raw_parts(h.ptr, h.len as usize) }
        }
    }

    /// Appends `bytes` (a complete tag+value record) to the unknown-fields
    /// span, verbatim and in order (spec.md §8 "Unknown fields preservation").
    pub fn append_unknown(&mut self, arena: &Arena<'_>, bytes: &[u8]) -> Result<(), ArenaError> {
        let h = self.header_mut();
        let needed = h.len as usize + bytes.len();
        if needed > h.cap as usize {
            let new_cap = needed.next_power_of_two().max(16) as u32;
            let new_ptr = if h.ptr.is_null() {
                arena.alloc_raw(Layout::from_size_align(new_cap as usize, 1).unwrap())?
            } else {
                let old_layout = Layout::from_size_align(h.cap as usize, 1).unwrap();
                arena.realloc(NonNull::new(h.ptr).unwrap(), old_layout, new_cap as usize)?
            };
            h.ptr = new_ptr.as_ptr();
            h.cap = new_cap;
        }
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), h.ptr.add(h.len as usize), bytes.len());
        }
        h.len += bytes.len() as u32;
        Ok(())
    }

    /// # Safety
    /// `offset` must be inside this message's `instance_size` and properly
    /// aligned for `T` (guaranteed by a mini-table built from a correctly
    /// laid-out `MessageDef`).
    pub unsafe fn field_ptr<T>(&self, offset: u32) -> *mut T {
        unsafe { (self as *const Message as *mut u8).add(offset as usize) as *mut T }
    }

    pub fn get<T: Copy>(&self, offset: u32) -> T {
        unsafe { *self.field_ptr::<T>(offset) }
    }

    pub fn set<T>(&mut self, offset: u32, value: T) {
        unsafe { self.field_ptr::<T>(offset).write(value) }
    }

    pub fn hasbit(&self, byte_offset: u32, bit_index: u32) -> bool {
        let word_offset = byte_offset + (bit_index / 32) * 4;
        let word: u32 = self.get(word_offset);
        word & (1 << (bit_index % 32)) != 0
    }

    pub fn set_hasbit(&mut self, byte_offset: u32, bit_index: u32) {
        let word_offset = byte_offset + (bit_index / 32) * 4;
        let word: u32 = self.get(word_offset);
        self.set(word_offset, word | (1 << (bit_index % 32)));
    }

    pub fn clear_hasbit(&mut self, byte_offset: u32, bit_index: u32) {
        let word_offset = byte_offset + (bit_index / 32) * 4;
        let word: u32 = self.get(word_offset);
        self.set(word_offset, word & !(1 << (bit_index % 32)));
    }

    /// Field number of the oneof member currently set at `case_offset`, or
    /// `0` if none (spec.md §3: "a oneof's 'which one is set' is encoded as
    /// the field number of the set member").
    pub fn oneof_case(&self, case_offset: u32) -> u32 {
        self.get(case_offset)
    }

    pub fn set_oneof_case(&mut self, case_offset: u32, field_number: u32) {
        self.set(case_offset, field_number);
    }

    pub fn string_view(&self, offset: u32) -> StrView {
        self.get(offset)
    }

    pub fn set_string_view(&mut self, offset: u32, view: StrView) {
        self.set(offset, view)
    }

    pub fn array_ptr(&self, offset: u32) -> Option<NonNull<Array>> {
        NonNull::new(self.get::<*mut Array>(offset))
    }

    pub fn get_or_create_array<'a>(
        &mut self,
        arena: &Arena<'a>,
        offset: u32,
        elem_size_lg2: u8,
    ) -> Result<&'a mut Array, ArenaError> {
        if let Some(p) = self.array_ptr(offset) {
            return Ok(unsafe { &mut *p.as_ptr() });
        }
        let arr = Array::new_in(arena, elem_size_lg2)?;
        self.set(offset, arr as *mut Array);
        Ok(arr)
    }

    pub fn map_ptr(&self, offset: u32) -> Option<NonNull<Map>> {
        NonNull::new(self.get::<*mut Map>(offset))
    }

    pub fn get_or_create_map<'a>(&mut self, arena: &Arena<'a>, offset: u32) -> Result<&'a mut Map, ArenaError> {
        if let Some(p) = self.map_ptr(offset) {
            return Ok(unsafe { &mut *p.as_ptr() });
        }
        let map = Map::new_in(arena)?;
        self.set(offset, map as *mut Map);
        Ok(map)
    }

    pub fn sub_message(&self, offset: u32) -> SubMessagePtr {
        self.get(offset)
    }

    pub fn set_sub_message(&mut self, offset: u32, ptr: SubMessagePtr) {
        self.set(offset, ptr)
    }

    /// Returns the linked/unlinked sub-message at `offset`, allocating a
    /// fresh zeroed child (linked) if absent — decode's merge semantics
    /// create the sub-message on first touch (spec.md §4.I "the sub-message
    /// is created if absent").
    pub fn get_or_create_sub_message<'a>(
        &mut self,
        arena: &Arena<'a>,
        offset: u32,
        child_instance_size: u32,
    ) -> Result<NonNull<Message>, ArenaError> {
        if let Some(msg) = self.sub_message(offset).get() {
            return Ok(match msg {
                SubMessage::Linked(p) | SubMessage::Unlinked(p) => p,
            });
        }
        let child = Message::new_in(arena, child_instance_size)?;
        let ptr = NonNull::from(child);
        self.set_sub_message(offset, SubMessagePtr::linked(ptr));
        Ok(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::StandaloneArena;

    #[test]
    fn hasbit_round_trip() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let msg = Message::new_in(&arena, 32).unwrap();
        assert!(!msg.hasbit(INTERNAL_HEADER_SIZE as u32, 3));
        msg.set_hasbit(INTERNAL_HEADER_SIZE as u32, 3);
        assert!(msg.hasbit(INTERNAL_HEADER_SIZE as u32, 3));
        msg.clear_hasbit(INTERNAL_HEADER_SIZE as u32, 3);
        assert!(!msg.hasbit(INTERNAL_HEADER_SIZE as u32, 3));
    }

    #[test]
    fn unknown_fields_accumulate_in_order() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let msg = Message::new_in(&arena, 32).unwrap();
        msg.append_unknown(&arena, &[1, 2, 3]).unwrap();
        msg.append_unknown(&arena, &[4, 5]).unwrap();
        assert_eq!(msg.unknown_fields(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn array_push_and_grow() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let arr = Array::new_in(&arena, 2).unwrap(); // 4-byte elements
        for i in 0..20u32 {
            arr.push(&arena, i).unwrap();
        }
        assert_eq!(arr.len(), 20);
        assert_eq!(arr.as_typed_slice::<u32>(), (0..20u32).collect::<alloc::vec::Vec<_>>().as_slice());
    }

    #[test]
    fn sub_message_tag_round_trips() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let child = Message::new_in(&arena, 16).unwrap();
        let ptr = NonNull::from(child);
        let linked = SubMessagePtr::linked(ptr);
        match linked.get().unwrap() {
            SubMessage::Linked(p) => assert_eq!(p, ptr),
            SubMessage::Unlinked(_) => panic!("expected linked"),
        }
        let unlinked = SubMessagePtr::unlinked(ptr);
        match unlinked.get().unwrap() {
            SubMessage::Unlinked(p) => assert_eq!(p, ptr),
            SubMessage::Linked(_) => panic!("expected unlinked"),
        }
    }

    #[test]
    fn map_insert_overwrites_last_write_wins() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let map = Map::new_in(&arena).unwrap();
        map.insert_raw(&arena, b"k", b"v1").unwrap();
        map.insert_raw(&arena, b"k", b"v2").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get_raw(b"k").unwrap(), b"v2");
    }
}
