//! Provides the immutable value payload stored by all caches.
//!
//! A [ByteView] wraps an arbitrary byte sequence. Once created, the contents can no longer be
//! modified - neither by the cache nor by any caller. This permits to hand out views onto
//! cached data without copying it, while still guaranteeing that the cached bytes remain
//! exactly as loaded. Callers which need an owned buffer obtain an independent copy via
//! [to_vec](ByteView::to_vec).
use std::fmt;

use bytes::Bytes;

/// Computes the size of a value in bytes.
///
/// The LRU cache uses this to enforce its memory limit. The reported size should cover the
/// payload of a value (i.e. its heap allocation) - bookkeeping fields on the stack can be
/// ignored, as can the size of the key, which is accounted for separately.
pub trait ByteSize {
    /// Returns the payload size of this value in bytes.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.capacity()
    }
}

/// An immutable view onto a cached byte sequence.
///
/// Views are cheap to clone as all clones share the same underlying buffer. This is what
/// permits a single load to fan its result out to many coalesced callers without multiplying
/// the allocation. The buffer itself can never be mutated, therefore sharing is safe even
/// across threads.
///
/// # Examples
/// ```
/// # use hivecache::byteview::ByteView;
/// let view = ByteView::from("hello");
/// assert_eq!(view.len(), 5);
/// assert_eq!(view.to_vec(), b"hello");
///
/// // A clone shares the buffer instead of copying it...
/// let other = view.clone();
/// assert_eq!(other, view);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if this view is empty. Empty values are permitted cache contents.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Provides read access to the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns an owned copy of the underlying bytes.
    ///
    /// Modifying the returned buffer has no effect on the cached contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(bytes: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(bytes),
        }
    }
}

impl From<&str> for ByteView {
    fn from(string: &str) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(string.as_bytes()),
        }
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({} bytes)", self.data.len())
    }
}
