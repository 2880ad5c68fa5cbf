//! Bounds-checked reads over packet memory
//!
//! All header access goes through [`PacketView`]: a read of `N` bytes at the
//! current offset is only performed if `offset + N <= len`, otherwise it fails
//! with [`ParseError::Truncated`] and the view is left unchanged.

use crate::error::ParseError;

/// A fixed-size value that can be decoded from its on-the-wire representation
pub trait WireHeader: Sized {
    /// Number of bytes consumed on the wire
    const SIZE: usize;

    /// Decode from a slice of exactly `SIZE` bytes
    ///
    /// Returns `None` if the bytes do not form a valid value.
    fn decode(bytes: &[u8]) -> Option<Self>;
}

impl WireHeader for u8 {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Option<Self> {
        bytes.first().copied()
    }
}

impl WireHeader for u16 {
    const SIZE: usize = 2;

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b0, b1] => Some(u16::from_be_bytes([*b0, *b1])),
            _ => None,
        }
    }
}

impl WireHeader for u32 {
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b0, b1, b2, b3] => Some(u32::from_be_bytes([*b0, *b1, *b2, *b3])),
            _ => None,
        }
    }
}

/// Read-only view over the bytes of one packet, with a current offset
#[derive(Clone, Copy, Debug)]
pub struct PacketView<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PacketView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PacketView { data, offset: 0 }
    }

    /// Total length of the underlying buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes left after the current offset
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn window(&self, needed: usize) -> Result<&'a [u8], ParseError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ParseError::Truncated { needed, remaining });
        }
        Ok(&self.data[self.offset..self.offset + needed])
    }

    /// Decode a `T` at the current offset without moving
    pub fn peek<T: WireHeader>(&self) -> Result<T, ParseError> {
        let bytes = self.window(T::SIZE)?;
        T::decode(bytes).ok_or(ParseError::NotClassifiable("invalid header encoding"))
    }

    /// Decode a `T` at the current offset, and advance by `T::SIZE` on success
    pub fn try_read<T: WireHeader>(&mut self) -> Result<T, ParseError> {
        let value = self.peek::<T>()?;
        self.offset += T::SIZE;
        Ok(value)
    }

    /// Move forward by `count` bytes
    pub fn advance(&mut self, count: usize) -> Result<(), ParseError> {
        self.window(count)?;
        self.offset += count;
        Ok(())
    }

    /// Move to an absolute offset. The end of the buffer is a valid position.
    pub fn seek(&mut self, offset: usize) -> Result<(), ParseError> {
        if offset > self.data.len() {
            return Err(ParseError::Truncated {
                needed: offset - self.offset,
                remaining: self.remaining(),
            });
        }
        self.offset = offset;
        Ok(())
    }
}
