//! Provides the immutable value type which is stored in caches.
//!
//! A [ByteView](ByteView) wraps a **Bytes** buffer. Cloning a view is cheap, as only a reference
//! count is incremented. There is no way to mutate the underlying data, therefore a view can be
//! handed out to any number of callers without the risk of one of them changing the cached value.
//! Accessors which yield owned data ([to_vec](ByteView::to_vec)) always return a fresh copy.
//!
//! # Example
//!
//! ```
//! # use peercache::byteview::ByteView;
//! let view = ByteView::copy_from_slice(b"630");
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.to_string(), "630");
//!
//! // Modifying an owned copy doesn't affect the view...
//! let mut data = view.to_vec();
//! data[0] = b'7';
//! assert_eq!(view.as_slice(), b"630");
//! ```
use bytes::Bytes;
use std::fmt::{Display, Formatter};

/// Represents an immutable snapshot of cached bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates an empty view.
    pub fn empty() -> Self {
        ByteView { data: Bytes::new() }
    }

    /// Creates a view by copying the given data.
    ///
    /// This is used when the data originates from a getter, as the caller might still hold on
    /// to (and modify) the original buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if this view contains no data at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Provides read-only access to the underlying data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns an owned copy of the underlying data.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Returns the underlying buffer.
    ///
    /// **Bytes** is itself immutable, therefore this doesn't need to copy anything. This is used
    /// to send a value over the wire without an additional allocation.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from_slice(data.as_bytes())
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl std::fmt::Debug for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteView({:?})", self.data)
    }
}
