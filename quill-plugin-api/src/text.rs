//! Fixed-capacity, NUL-terminated string buffers used by the ABI structs

use std::ffi::c_char;
use std::fmt;

/// Result of storing a string into a [`FixedStr`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// The whole value was stored
    Whole,
    /// The value was cut at a character boundary; `kept` bytes were stored
    Truncated { kept: usize },
}

impl Fit {
    pub fn is_truncated(self) -> bool {
        matches!(self, Fit::Truncated { .. })
    }
}

/// A C string buffer of `N` bytes, including the terminator.
///
/// Writes never overflow: values longer than `N - 1` bytes are truncated at
/// the last UTF-8 character boundary that fits. Reads never look past `N`
/// bytes, even when the other side of the ABI forgot the terminator.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct FixedStr<const N: usize>([c_char; N]);

impl<const N: usize> FixedStr<N> {
    /// Capacity in bytes, terminator included
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self([0; N])
    }

    /// Build a buffer from a string, truncating if needed
    pub fn from_str_truncated(value: &str) -> Self {
        let mut buf = Self::new();
        let _ = buf.set(value);
        buf
    }

    /// Store `value`, replacing the previous contents
    pub fn set(&mut self, value: &str) -> Fit {
        let limit = N.saturating_sub(1);
        let mut kept = value.len().min(limit);
        while !value.is_char_boundary(kept) {
            kept -= 1;
        }

        self.0 = [0; N];
        for (slot, byte) in self.0.iter_mut().zip(&value.as_bytes()[..kept]) {
            *slot = *byte as c_char;
        }

        if kept < value.len() {
            Fit::Truncated { kept }
        } else {
            Fit::Whole
        }
    }

    /// Raw bytes up to (not including) the first NUL, bounded by `N`
    pub fn as_bytes(&self) -> Vec<u8> {
        self.0
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect()
    }

    /// Contents as a `String`; invalid UTF-8 is replaced
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.as_bytes()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        N == 0 || self.0[0] == 0
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl<const N: usize> PartialEq for FixedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> Eq for FixedStr<N> {}
