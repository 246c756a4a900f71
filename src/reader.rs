// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A position-tracked view over the input bytes.
//!
//! The reader is a borrowed cursor: it never allocates, all primitive reads
//! are bounds-checked, and failures surface as [`ErrorKind::UnexpectedEnd`]
//! at the current position. Multi-byte reads convert from the wire's
//! little-endian representation to host order at this boundary and nowhere
//! else; on big-endian hosts the conversions compile to byte swaps.

use crate::error::{Error, ErrorKind};

pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// The current absolute byte offset.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// The number of unread bytes.
    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn eof(&self) -> Error {
        Error::new(ErrorKind::UnexpectedEnd, self.pos)
    }

    /// Returns the next byte without consuming it.
    pub(crate) fn peek_byte(&self) -> Result<u8, Error> {
        self.bytes.get(self.pos).copied().ok_or_else(|| self.eof())
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8, Error> {
        let byte = self.peek_byte()?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads exactly `count` bytes, returning them as a borrowed slice.
    pub(crate) fn read_exact(&mut self, count: usize) -> Result<&'a [u8], Error> {
        if count > self.remaining() {
            return Err(self.eof());
        }
        let slice = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, Error> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    #[allow(dead_code)]
    pub(crate) fn read_u64_le(&mut self) -> Result<u64, Error> {
        let bytes = self.read_exact(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_f32_le(&mut self) -> Result<f32, Error> {
        let bytes = self.read_exact(4)?;
        Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_f64_le(&mut self) -> Result<f64, Error> {
        let bytes = self.read_exact(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn skip(&mut self, count: usize) -> Result<(), Error> {
        if count > self.remaining() {
            return Err(self.eof());
        }
        self.pos += count;
        Ok(())
    }

    // Repositions the cursor. Only section dispatch uses this; the public
    // parse path never rewinds.
    pub(crate) fn seek(&mut self, pos: usize) -> Result<(), Error> {
        if pos > self.bytes.len() {
            return Err(self.eof());
        }
        self.pos = pos;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn positions_and_remaining() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.remaining(), 3);
        assert!(!reader.at_end());

        assert_eq!(reader.read_byte().unwrap(), 1);
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.remaining(), 2);

        reader.skip(2).unwrap();
        assert!(reader.at_end());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut reader = Reader::new(&[7]);
        assert_eq!(reader.peek_byte().unwrap(), 7);
        assert_eq!(reader.read_byte().unwrap(), 7);
        assert_matches!(
            reader.peek_byte(),
            Err(Error {
                kind: ErrorKind::UnexpectedEnd,
                offset: 1,
                ..
            })
        );
    }

    #[test]
    fn little_endian_primitives() {
        let mut reader = Reader::new(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(reader.read_u32_le().unwrap(), 1);
        assert_eq!(reader.read_f32_le().unwrap(), 1.0);
    }

    #[test]
    fn u64_round_trip() {
        let value = 0x0123_4567_89ab_cdefu64;
        let bytes = value.to_le_bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_u64_le().unwrap(), value);
    }

    #[test]
    fn f64_preserves_bits() {
        let bits = 0x7ff8_0000_0000_1234u64; // A NaN with a payload.
        let bytes = bits.to_le_bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_f64_le().unwrap().to_bits(), bits);
    }

    #[test]
    fn short_reads_fail_without_consuming() {
        let mut reader = Reader::new(&[1, 2]);
        assert_matches!(
            reader.read_u32_le(),
            Err(Error {
                kind: ErrorKind::UnexpectedEnd,
                ..
            })
        );
        // Position is unchanged after a failed read.
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_exact(2).unwrap(), &[1, 2]);
    }

    #[test]
    fn seek_is_bounds_checked() {
        let mut reader = Reader::new(&[0; 4]);
        reader.seek(4).unwrap();
        assert!(reader.at_end());
        assert_matches!(
            reader.seek(5),
            Err(Error {
                kind: ErrorKind::UnexpectedEnd,
                ..
            })
        );
    }
}
