//! Tuple keys and their order-preserving byte encoding
//!
//! Each part is written as a type tag followed by its payload:
//!
//! - `0x01` bytes, `0x02` string: payload with `0x00` escaped as `0x00 0xFF`,
//!   terminated by a single `0x00`
//! - `0x03` integer: 8 bytes big-endian with the sign bit flipped
//! - `0x04` boolean: one byte
//!
//! The encoding of a tuple is a byte prefix of the encoding of every tuple
//! that extends it, and byte order matches the derived `Ord` on [`Key`].

use crate::error::{KvError, Result};
use std::fmt;

const TAG_BYTES: u8 = 0x01;
const TAG_STR: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// A single typed component of a [`Key`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Bytes(Vec<u8>),
    Str(String),
    Int(i64),
    Bool(bool),
}

impl KeyPart {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyPart::Str(s) => Some(s),
            _ => None,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            KeyPart::Bytes(bytes) => {
                out.push(TAG_BYTES);
                escape_into(bytes, out);
            }
            KeyPart::Str(s) => {
                out.push(TAG_STR);
                escape_into(s.as_bytes(), out);
            }
            KeyPart::Int(n) => {
                out.push(TAG_INT);
                out.extend_from_slice(&((*n as u64) ^ (1 << 63)).to_be_bytes());
            }
            KeyPart::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Str(s.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

impl From<Vec<u8>> for KeyPart {
    fn from(bytes: Vec<u8>) -> Self {
        KeyPart::Bytes(bytes)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            KeyPart::Str(s) => write!(f, "{:?}", s),
            KeyPart::Int(n) => write!(f, "{}", n),
            KeyPart::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// An ordered tuple of [`KeyPart`]s
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<KeyPart>);

impl Key {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// A new key with one more part appended
    pub fn child(&self, part: impl Into<KeyPart>) -> Key {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Key(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&KeyPart> {
        self.0.get(index)
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 8);
        for part in &self.0 {
            part.encode_into(&mut out);
        }
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Key> {
        let mut parts = Vec::new();
        while let Some((&tag, rest)) = bytes.split_first() {
            let (part, rest) = match tag {
                TAG_BYTES => {
                    let (raw, rest) = unescape(rest)?;
                    (KeyPart::Bytes(raw), rest)
                }
                TAG_STR => {
                    let (raw, rest) = unescape(rest)?;
                    let s = String::from_utf8(raw)
                        .map_err(|e| KvError::InvalidKey(format!("string part: {}", e)))?;
                    (KeyPart::Str(s), rest)
                }
                TAG_INT => {
                    if rest.len() < 8 {
                        return Err(KvError::InvalidKey("truncated integer part".to_string()));
                    }
                    let (raw, rest) = rest.split_at(8);
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(raw);
                    let n = (u64::from_be_bytes(buf) ^ (1 << 63)) as i64;
                    (KeyPart::Int(n), rest)
                }
                TAG_BOOL => match rest.split_first() {
                    Some((&b, rest)) => (KeyPart::Bool(b != 0), rest),
                    None => {
                        return Err(KvError::InvalidKey("truncated boolean part".to_string()))
                    }
                },
                other => {
                    return Err(KvError::InvalidKey(format!("unknown tag {:#04x}", other)));
                }
            };
            parts.push(part);
            bytes = rest;
        }
        Ok(Key(parts))
    }

    /// Byte range covering every key strictly below this one
    ///
    /// Every part starts with a tag in `0x01..=0x04`, so all descendants sort
    /// between `prefix ++ 0x00` and `prefix ++ 0xFF`, and the key itself does not.
    pub(crate) fn descendant_range(&self) -> (Vec<u8>, Vec<u8>) {
        let prefix = self.encode();
        let mut start = prefix.clone();
        start.push(0x00);
        let mut end = prefix;
        end.push(0xFF);
        (start, end)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

fn escape_into(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        out.push(b);
        if b == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn unescape(bytes: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let mut raw = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == TERMINATOR {
            if bytes.get(i + 1) == Some(&ESCAPE) {
                raw.push(TERMINATOR);
                i += 2;
                continue;
            }
            return Ok((raw, &bytes[i + 1..]));
        }
        raw.push(b);
        i += 1;
    }
    Err(KvError::InvalidKey("unterminated byte string part".to_string()))
}
