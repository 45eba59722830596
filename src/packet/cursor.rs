//! Bounds-checked packet reader
//!
//! [`ProtocolCursor`] is the only way the classifier touches packet bytes.
//! It wraps a borrowed buffer together with a logical end that may be
//! shorter than the buffer (IP total length smaller than the captured
//! frame). Every read validates `offset + width <= end` before indexing, and
//! fails with [`PacketError::Truncated`] otherwise.
//!
//! Offsets are relative to the cursor's base; [`ProtocolCursor::sub`] yields
//! a new cursor whose base is further into the same buffer, which is how
//! the classifier steps from the IP header into the transport header and
//! into ICMP-embedded packets.

use crate::error::PacketError;

/// Read-only, bounds-checked view over packet bytes
#[derive(Debug, Clone, Copy)]
pub struct ProtocolCursor<'a> {
    data: &'a [u8],
}

impl<'a> ProtocolCursor<'a> {
    /// Create a cursor covering the whole buffer
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Create a cursor whose logical end is `min(end, data.len())`
    #[must_use]
    pub fn with_end(data: &'a [u8], end: usize) -> Self {
        let end = end.min(data.len());
        Self { data: &data[..end] }
    }

    /// Number of readable bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no byte can be read
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether `width` bytes starting at `offset` lie within the logical end
    #[must_use]
    pub fn has(&self, offset: usize, width: usize) -> bool {
        offset
            .checked_add(width)
            .is_some_and(|stop| stop <= self.data.len())
    }

    fn check(&self, offset: usize, width: usize) -> Result<(), PacketError> {
        if self.has(offset, width) {
            Ok(())
        } else {
            Err(PacketError::truncated(offset, width, self.data.len()))
        }
    }

    /// Borrow `width` bytes starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Truncated` if the range crosses the logical end.
    pub fn bytes(&self, offset: usize, width: usize) -> Result<&'a [u8], PacketError> {
        self.check(offset, width)?;
        Ok(&self.data[offset..offset + width])
    }

    /// Copy a fixed-size array starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Truncated` if the range crosses the logical end.
    pub fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    /// Read one byte
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Truncated` if `offset` is at or past the end.
    pub fn read_u8(&self, offset: usize) -> Result<u8, PacketError> {
        self.check(offset, 1)?;
        Ok(self.data[offset])
    }

    /// Read a big-endian u16
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Truncated` if the two bytes cross the end.
    pub fn read_u16(&self, offset: usize) -> Result<u16, PacketError> {
        self.read_array::<2>(offset).map(u16::from_be_bytes)
    }

    /// Read a big-endian u32
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Truncated` if the four bytes cross the end.
    pub fn read_u32(&self, offset: usize) -> Result<u32, PacketError> {
        self.read_array::<4>(offset).map(u32::from_be_bytes)
    }

    /// Cursor over the bytes from `offset` to the logical end
    ///
    /// `offset == len()` is allowed and yields an empty cursor.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Truncated` if `offset` is past the end.
    pub fn sub(&self, offset: usize) -> Result<Self, PacketError> {
        self.check(offset, 0)?;
        Ok(Self {
            data: &self.data[offset..],
        })
    }

    /// Shrink the logical end to `end` bytes from the base
    ///
    /// A larger `end` than the current length leaves the cursor unchanged.
    #[must_use]
    pub fn truncate(&self, end: usize) -> Self {
        Self::with_end(self.data, end)
    }
}
