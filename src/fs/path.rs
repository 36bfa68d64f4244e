//! Card file paths
//!
//! A [`Path`] is a sequence of 2-byte file identifiers, starting at the
//! master file (`3F00`) for absolute paths. Paths are plain values: joining a
//! child identifier returns a new path and never touches the original.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util::hex_to_bin;

/// Maximum encoded path length in bytes (eight levels)
pub const MAX_PATH_SIZE: usize = 16;

/// Identifier of the master file
pub const MF_ID: [u8; 2] = [0x3F, 0x00];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    value: Vec<u8>,
}

impl Path {
    /// The master file `3F00`
    pub fn root() -> Self {
        Self {
            value: MF_ID.to_vec(),
        }
    }

    /// Build a path from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidPath("empty path".to_string()));
        }
        if bytes.len() % 2 != 0 {
            return Err(Error::InvalidPath(format!(
                "odd length {} (file identifiers are 2 bytes)",
                bytes.len()
            )));
        }
        if bytes.len() > MAX_PATH_SIZE {
            return Err(Error::PathTooLong {
                len: bytes.len(),
                max: MAX_PATH_SIZE,
            });
        }
        Ok(Self {
            value: bytes.to_vec(),
        })
    }

    /// Parse a hex path such as `3F00`, `3F005015` or `3F:00:50:15`
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = hex_to_bin(s).map_err(|_| Error::InvalidPath(s.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Copy of this path extended by one file identifier
    pub fn join(&self, fid: [u8; 2]) -> Result<Self> {
        let len = self.value.len() + 2;
        if len > MAX_PATH_SIZE {
            return Err(Error::PathTooLong {
                len,
                max: MAX_PATH_SIZE,
            });
        }
        let mut value = Vec::with_capacity(len);
        value.extend_from_slice(&self.value);
        value.extend_from_slice(&fid);
        Ok(Self { value })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Length in bytes, always even
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Number of file identifiers
    pub fn depth(&self) -> usize {
        self.value.len() / 2
    }

    pub fn is_root(&self) -> bool {
        self.value == MF_ID
    }

    pub fn starts_at_root(&self) -> bool {
        self.value.starts_with(&MF_ID)
    }

    /// Identifier of the last component
    pub fn file_id(&self) -> [u8; 2] {
        let n = self.value.len();
        [self.value[n - 2], self.value[n - 1]]
    }

    /// Iterate the 2-byte identifiers in order
    pub fn components(&self) -> impl Iterator<Item = [u8; 2]> + '_ {
        self.value.chunks_exact(2).map(|c| [c[0], c[1]])
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::root()
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.value {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}
