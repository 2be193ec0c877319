// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Wire primitives of the binary cache: LEB128 varints, length-prefixed
//! UTF-8 strings and fixed-width little-endian bit-sets.

use std::io::{Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of cache file")]
    UnexpectedEof,
    #[error("varint overflows 64 bits")]
    VarintOverflow,
    #[error("string is not valid UTF-8")]
    BadUtf8,
    #[error("bad magic bytes; not a cache file")]
    BadMagic,
    #[error("unknown version part tag {0}")]
    BadPartTag(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn write_varint(w: &mut impl Write, mut value: u64) -> std::io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return w.write_all(&[byte]);
        }
        w.write_all(&[byte | 0x80])?;
    }
}

pub fn read_varint(r: &mut impl Read) -> Result<u64, DecodeError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        match r.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(DecodeError::UnexpectedEof)
            }
            Err(e) => return Err(e.into()),
        }
        if shift >= 64 {
            return Err(DecodeError::VarintOverflow);
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

pub fn write_string(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    write_varint(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

pub fn read_string(r: &mut impl Read) -> Result<String, DecodeError> {
    let len = read_varint(r)? as usize;
    let mut buf = vec![0u8; len];
    match r.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(DecodeError::UnexpectedEof)
        }
        Err(e) => return Err(e.into()),
    }
    String::from_utf8(buf).map_err(|_| DecodeError::BadUtf8)
}

pub fn write_string_list(w: &mut impl Write, items: &[String]) -> std::io::Result<()> {
    write_varint(w, items.len() as u64)?;
    for item in items {
        write_string(w, item)?;
    }
    Ok(())
}

pub fn read_string_list(r: &mut impl Read) -> Result<Vec<String>, DecodeError> {
    let count = read_varint(r)? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(read_string(r)?);
    }
    Ok(items)
}

pub fn write_bitset(w: &mut impl Write, bits: u32) -> std::io::Result<()> {
    w.write_all(&bits.to_le_bytes())
}

pub fn read_bitset(r: &mut impl Read) -> Result<u32, DecodeError> {
    let mut buf = [0u8; 4];
    match r.read_exact(&mut buf) {
        Ok(()) => Ok(u32::from_le_bytes(buf)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(DecodeError::UnexpectedEof)
        }
        Err(e) => Err(e.into()),
    }
}
