//! A safe view over a (possibly nested-limited) input buffer, giving the
//! decoder a small number of primitives — `is_done`, `push_limit`/
//! `pop_limit`, `check_size`, `read_string_aliased` — instead of raw
//! pointer arithmetic (component G).
//!
//! upb's C implementation guarantees `SLOP` bytes are always safely
//! readable past the logical end of the current chunk so that bounded
//! primitive reads (varint, fixed32/64) need no per-byte bounds check; that
//! trick only pays for itself with raw pointers and is reserved for the
//! fast-path decoder (`crate::fastdecode`), which operates over a single
//! fully-buffered input and keeps its own slop-guaranteeing cursor. This
//! module is the safe, general-purpose stream the mini-table decoder
//! (`crate::decode`) uses instead: an index into a `&[u8]` plus a stack of
//! saved limits, with ordinary bounds-checked reads. `SLOP_SIZE` is kept
//! here as the documented constant the fast path's cursor also uses, so the
//! two components agree on the same overrun budget.

extern crate alloc;
use alloc::vec::Vec;

/// Bytes guaranteed readable past a chunk boundary by the fast-path cursor.
/// Large enough for the widest single primitive read (a 10-byte varint).
pub const SLOP_SIZE: usize = 16;

/// Opaque delta returned by [`EpsCopyInputStream::push_limit`] and required
/// by [`EpsCopyInputStream::pop_limit`], matching upb's
/// `upb_EpsCopyInputStream_PushLimit`/`PopLimit` pairing.
#[derive(Debug, Clone, Copy)]
pub struct LimitDelta(usize);

pub struct EpsCopyInputStream<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Absolute end of the current innermost limit (starts at `buf.len()`).
    limit: usize,
    /// Stack of previously active limits, restored by `pop_limit`.
    saved_limits: Vec<usize>,
    error: bool,
}

impl<'a> EpsCopyInputStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        EpsCopyInputStream {
            buf,
            pos: 0,
            limit: buf.len(),
            saved_limits: Vec::new(),
            error: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    fn set_error(&mut self) {
        self.error = true;
    }

    /// True once the stream has reached its current limit (or the overall
    /// end of input, if no limit is pushed). Once this returns `true` for
    /// the outermost limit, the caller must check [`Self::is_error`] to
    /// distinguish clean EOF from a sticky error.
    pub fn is_done(&self) -> bool {
        self.pos >= self.limit
    }

    pub fn remaining_in_limit(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Checks that a just-read length does not escape the current limit,
    /// without advancing. `size` came from a `read_size()` call at the
    /// current position.
    pub fn check_size(&self, size: i32) -> bool {
        if size < 0 {
            return false;
        }
        self.pos.saturating_add(size as usize) <= self.limit
    }

    fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..self.limit.min(self.buf.len())]
    }

    /// Whole-buffer slice available for the fast-path cursor to alias into
    /// directly (bypassing the stream's own bookkeeping); used when handing
    /// off between the fast path and the mini-table decoder.
    pub fn raw_buf(&self) -> &'a [u8] {
        self.buf
    }

    pub fn read_tag(&mut self) -> Option<u64> {
        let (tag, n) = super::reader::read_tag(self.remaining_slice())?;
        self.pos += n;
        Some(tag)
    }

    pub fn read_varint(&mut self) -> Option<u64> {
        let (v, n) = super::reader::read_varint(self.remaining_slice())?;
        self.pos += n;
        Some(v)
    }

    pub fn read_fixed32(&mut self) -> Option<u32> {
        let (v, n) = super::reader::read_fixed32(self.remaining_slice())?;
        self.pos += n;
        Some(v)
    }

    pub fn read_fixed64(&mut self) -> Option<u64> {
        let (v, n) = super::reader::read_fixed64(self.remaining_slice())?;
        self.pos += n;
        Some(v)
    }

    pub fn read_size(&mut self) -> Option<i32> {
        let (v, n) = super::reader::read_size(self.remaining_slice())?;
        self.pos += n;
        Some(v)
    }

    /// Advances past `size` bytes and returns a reference to them, aliased
    /// into the original input buffer (never copied). Returns `None` if
    /// `size` would read past the current limit.
    pub fn read_string_aliased(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.pos + size > self.limit || self.limit > self.buf.len() {
            self.set_error();
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + size];
        self.pos += size;
        Some(slice)
    }

    pub fn skip(&mut self, size: usize) -> Option<()> {
        if self.pos + size > self.limit {
            self.set_error();
            return None;
        }
        self.pos += size;
        Some(())
    }

    /// Pushes a new, nested limit `size` bytes beyond the current position.
    /// Returns a delta to hand back to [`Self::pop_limit`].
    pub fn push_limit(&mut self, size: i32) -> Option<LimitDelta> {
        if size < 0 {
            return None;
        }
        let new_limit = self.pos.checked_add(size as usize)?;
        if new_limit > self.limit {
            self.set_error();
            return None;
        }
        self.saved_limits.push(self.limit);
        self.limit = new_limit;
        Some(LimitDelta(new_limit))
    }

    /// Restores the limit active before the matching `push_limit`. The
    /// caller must only do this once `is_done()` is true for the inner
    /// limit, matching upb's documented precondition.
    pub fn pop_limit(&mut self, delta: LimitDelta) {
        debug_assert_eq!(self.limit, delta.0);
        if let Some(prev) = self.saved_limits.pop() {
            self.limit = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_limits_restore_correctly() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut s = EpsCopyInputStream::new(&buf);
        let outer = s.push_limit(4).unwrap();
        assert!(!s.is_done());
        let inner = s.push_limit(2).unwrap();
        s.skip(2).unwrap();
        assert!(s.is_done());
        s.pop_limit(inner);
        assert!(!s.is_done());
        s.skip(2).unwrap();
        assert!(s.is_done());
        s.pop_limit(outer);
        assert!(!s.is_done());
    }

    #[test]
    fn check_size_rejects_escaping_limit() {
        let buf = [0u8; 10];
        let mut s = EpsCopyInputStream::new(&buf);
        s.push_limit(5).unwrap();
        assert!(s.check_size(5));
        assert!(!s.check_size(6));
        assert!(!s.check_size(-1));
    }

    #[test]
    fn read_string_aliased_points_into_input() {
        let buf = b"hello world".to_vec();
        let mut s = EpsCopyInputStream::new(&buf);
        let slice = s.read_string_aliased(5).unwrap();
        assert_eq!(slice, b"hello");
        assert_eq!(slice.as_ptr(), buf.as_ptr());
    }

    #[test]
    fn escaping_current_limit_is_an_error() {
        let buf = [0u8; 4];
        let mut s = EpsCopyInputStream::new(&buf);
        s.push_limit(2).unwrap();
        assert!(s.read_string_aliased(3).is_none());
        assert!(s.is_error());
    }
}
