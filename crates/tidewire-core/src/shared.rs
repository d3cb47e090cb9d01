use std::{ops::Deref, sync::Arc};

/// Reference-counted byte payload.
///
/// A queued message and every relay copy of it point at the same allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedBytes {
    data: Arc<[u8]>,
}

impl SharedBytes {
    /// Takes ownership of a vector.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self { data: Arc::from(vec.into_boxed_slice()) }
    }

    /// Copies a slice into a new shared buffer.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self { data: Arc::from(bytes) }
    }

    /// An empty payload.
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// The payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Length of the payload.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for SharedBytes {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for SharedBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_allocation() {
        let bytes = SharedBytes::from_vec(vec![1, 2, 3]);
        let copy = bytes.clone();
        assert!(std::ptr::eq(bytes.as_slice(), copy.as_slice()));
        assert_eq!(&*copy, &[1, 2, 3]);
    }

    #[test]
    fn test_copy_from_slice_owns_its_bytes() {
        let source = vec![4u8, 5];
        let bytes = SharedBytes::copy_from_slice(&source);
        assert!(!std::ptr::eq(bytes.as_slice(), source.as_slice()));
        assert_eq!(bytes, SharedBytes::from(source));
    }

    #[test]
    fn test_empty() {
        let bytes = SharedBytes::default();
        assert!(bytes.is_empty());
        assert_eq!(bytes.len(), 0);
    }
}
