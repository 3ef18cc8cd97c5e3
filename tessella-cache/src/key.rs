//! Fragment-scoped store keys.
//!
//! A [`FragmentKey`] addresses exactly one stored fragment payload:
//! `(namespace, product, fragment interval)`. Two overlapping queries that
//! decompose to the same aligned fragment produce byte-identical keys,
//! which is what makes the store deduplicate their downloads.
//!
//! # Binary Format
//!
//! Keys encode to a variable-length byte string:
//! - namespace bytes, then a 0xFF separator
//! - product bytes, then a 0xFF separator
//! - fragment start, 8 bytes big-endian with the sign bit flipped
//! - fragment duration in milliseconds, 8 bytes big-endian
//!
//! 0xFF never occurs in valid UTF-8, so the separators cannot collide with
//! namespace or product content. The sign-flipped big-endian start means a
//! product's fragments sort in time order under LMDB's byte comparator,
//! and the two text fields lead so one prefix scan lists a whole product
//! or a whole namespace.

use tessella_core::{Interval, Namespace, ProductId};

/// Separator byte between the text fields of an encoded key.
const SEPARATOR: u8 = 0xFF;

/// Fixed length of the binary tail: start (8) + duration (8).
const BINARY_TAIL: usize = 16;

/// The addressable unit of the fragment store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    namespace: Namespace,
    product: ProductId,
    covers: Interval,
}

impl FragmentKey {
    /// Create a key for one fragment of a product.
    pub fn new(namespace: Namespace, product: ProductId, covers: Interval) -> Self {
        Self {
            namespace,
            product,
            covers,
        }
    }

    /// The namespace this key belongs to.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The product this key belongs to.
    pub fn product(&self) -> &ProductId {
        &self.product
    }

    /// The fragment interval this key addresses.
    pub fn covers(&self) -> Interval {
        self.covers
    }

    /// Encode this key to bytes for store lookup.
    pub fn encode(&self) -> Vec<u8> {
        let ns = self.namespace.as_str().as_bytes();
        let product = self.product.as_str().as_bytes();
        let mut bytes = Vec::with_capacity(ns.len() + product.len() + 2 + BINARY_TAIL);
        bytes.extend_from_slice(ns);
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(product);
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(&encode_ordered_millis(self.covers.start().timestamp_millis()));
        let duration_ms = self.covers.duration().as_millis() as u64;
        bytes.extend_from_slice(&duration_ms.to_be_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if either separator is missing, the binary tail is
    /// not exactly 16 bytes, a text field is empty or not UTF-8, or the
    /// timestamps fall outside the representable range.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let first = bytes.iter().position(|&b| b == SEPARATOR)?;
        let second = first + 1 + bytes[first + 1..].iter().position(|&b| b == SEPARATOR)?;
        if bytes.len() != second + 1 + BINARY_TAIL {
            return None;
        }

        let namespace = std::str::from_utf8(&bytes[..first]).ok()?;
        let product = std::str::from_utf8(&bytes[first + 1..second]).ok()?;

        let tail = &bytes[second + 1..];
        let start_ms = decode_ordered_millis(tail[..8].try_into().ok()?);
        let duration_ms = u64::from_be_bytes(tail[8..16].try_into().ok()?);
        let stop_ms = start_ms.checked_add(i64::try_from(duration_ms).ok()?)?;

        Some(Self {
            namespace: Namespace::new(namespace).ok()?,
            product: ProductId::new(product).ok()?,
            covers: Interval::from_millis(start_ms, stop_ms).ok()?,
        })
    }

    /// Prefix matching every fragment of one product.
    pub fn product_prefix(namespace: &Namespace, product: &ProductId) -> Vec<u8> {
        let ns = namespace.as_str().as_bytes();
        let product = product.as_str().as_bytes();
        let mut prefix = Vec::with_capacity(ns.len() + product.len() + 2);
        prefix.extend_from_slice(ns);
        prefix.push(SEPARATOR);
        prefix.extend_from_slice(product);
        prefix.push(SEPARATOR);
        prefix
    }

    /// Prefix matching every fragment of one namespace.
    pub fn namespace_prefix(namespace: &Namespace) -> Vec<u8> {
        let ns = namespace.as_str().as_bytes();
        let mut prefix = Vec::with_capacity(ns.len() + 1);
        prefix.extend_from_slice(ns);
        prefix.push(SEPARATOR);
        prefix
    }
}

impl std::fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.namespace, self.product, self.covers)
    }
}

/// Encode a signed millisecond offset so that big-endian byte order equals
/// numeric order.
fn encode_ordered_millis(ms: i64) -> [u8; 8] {
    ((ms as u64) ^ (1 << 63)).to_be_bytes()
}

/// Inverse of [`encode_ordered_millis`].
fn decode_ordered_millis(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}
