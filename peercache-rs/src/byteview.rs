//! Provides the immutable value type stored in all caches.
//!
//! A [ByteView](ByteView) wraps a chunk of bytes which can never be modified once it has been
//! created. This permits the cache to hand out the very same stored value to many concurrent
//! readers without any further synchronization. Cloning a view is cheap, as the underlying
//! buffer is reference counted (see **bytes::Bytes**).
//!
//! # Examples
//!
//! ```
//! # use peercache::byteview::ByteView;
//! let view = ByteView::from("630");
//!
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.to_string(), "630");
//!
//! // Obtaining the bytes yields a copy, so that the cached value remains untouched...
//! let mut copy = view.to_vec();
//! copy[0] = b'9';
//! assert_eq!(view.to_string(), "630");
//! ```
use std::fmt;
use std::fmt::{Debug, Display};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable view on a byte sequence.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Creates a view which takes ownership of the given bytes.
    pub fn new(bytes: Bytes) -> Self {
        ByteView { bytes }
    }

    /// Creates a view by copying the given slice.
    ///
    /// This is used when storing values obtained from a getter, so that the caller cannot
    /// modify the cached data later on.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        ByteView {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Determines if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns an owned copy of the underlying bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Returns a cheap handle on the underlying buffer.
    ///
    /// **Bytes** itself is immutable, therefore this doesn't leak any way of altering the
    /// cached data.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Interprets the bytes as UTF-8 string, replacing invalid sequences.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.bytes.len()
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str_lossy())
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({:?})", self.bytes)
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        ByteView::new(bytes)
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView::new(Bytes::from(data))
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        ByteView::new(Bytes::from(data))
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from_slice(data.as_bytes())
    }
}
