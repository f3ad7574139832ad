//! Deterministic DAG-oriented CBOR subset codec.
//!
//! Blocks must hash identically across independent writers, so the encoding
//! is strict: minimal-width integer heads, no indefinite-length items, map
//! keys ordered shortest-first then lexicographically, and links encoded as
//! tag 42 over an identity-prefixed byte string. The decoder rejects
//! anything outside this subset.

use crate::link::Link;
use std::collections::BTreeMap;
use thiserror::Error;

/// A decoded data item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    /// Unsigned integer (major type 0). Negative integers are outside the
    /// subset.
    Int(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Content-addressed link (tag 42).
    Link(Link),
}

impl Value {
    /// The link inside a `Value::Link`, if that is what this is.
    pub fn as_link(&self) -> Option<Link> {
        match self {
            Value::Link(link) => Some(*link),
            _ => None,
        }
    }

    /// The items inside a `Value::Array`, if that is what this is.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The text inside a `Value::Text`, if that is what this is.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Link> for Value {
    fn from(link: Link) -> Self {
        Value::Link(link)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

/// Codec failure while decoding a block.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("trailing bytes after value")]
    TrailingBytes,

    #[error("unsupported item: major type {0}, info {1}")]
    Unsupported(u8, u8),

    #[error("unsupported tag: {0}")]
    UnsupportedTag(u64),

    #[error("non-minimal length header")]
    NonMinimalHead,

    #[error("invalid utf-8 in text item")]
    InvalidUtf8,

    #[error("invalid link payload")]
    InvalidLink,

    #[error("duplicate map key: {0}")]
    DuplicateKey(String),
}

const MAJOR_UINT: u8 = 0;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const LINK_TAG: u64 = 42;
const SIMPLE_NULL: u8 = 22;

/// Encode a value to its canonical byte form.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, value);
    buf
}

fn write_head(buf: &mut Vec<u8>, major: u8, arg: u64) {
    if arg < 24 {
        buf.push((major << 5) | (arg as u8));
    } else if arg <= 0xff {
        buf.push((major << 5) | 24);
        buf.push(arg as u8);
    } else if arg <= 0xffff {
        buf.push((major << 5) | 25);
        buf.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= 0xffff_ffff {
        buf.push((major << 5) | 26);
        buf.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        buf.push((major << 5) | 27);
        buf.extend_from_slice(&arg.to_be_bytes());
    }
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push((MAJOR_SIMPLE << 5) | SIMPLE_NULL),
        Value::Int(n) => write_head(buf, MAJOR_UINT, *n),
        Value::Bytes(bytes) => {
            write_head(buf, MAJOR_BYTES, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
        Value::Text(s) => {
            write_head(buf, MAJOR_TEXT, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            write_head(buf, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                write_value(buf, item);
            }
        }
        Value::Map(map) => {
            // Canonical key order: shortest first, then lexicographic.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            write_head(buf, MAJOR_MAP, keys.len() as u64);
            for key in keys {
                write_head(buf, MAJOR_TEXT, key.len() as u64);
                buf.extend_from_slice(key.as_bytes());
                write_value(buf, &map[key]);
            }
        }
        Value::Link(link) => {
            write_head(buf, MAJOR_TAG, LINK_TAG);
            // Identity multibase prefix, then the raw digest.
            write_head(buf, MAJOR_BYTES, (Link::LEN + 1) as u64);
            buf.push(0x00);
            buf.extend_from_slice(link.as_bytes());
        }
    }
}

/// Decode a single value, rejecting trailing bytes.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut decoder = Decoder { buf: bytes, pos: 0 };
    let value = decoder.read_value()?;
    if decoder.pos != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(value)
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self.buf.get(self.pos).ok_or(CodecError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEnd)?;
        if end > self.buf.len() {
            return Err(CodecError::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a header, enforcing minimal-width encoding.
    fn read_head(&mut self) -> Result<(u8, u64), CodecError> {
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        let arg = match info {
            0..=23 => u64::from(info),
            24 => {
                let n = u64::from(self.read_byte()?);
                if n < 24 {
                    return Err(CodecError::NonMinimalHead);
                }
                n
            }
            25 => {
                let mut be = [0u8; 2];
                be.copy_from_slice(self.read_slice(2)?);
                let n = u64::from(u16::from_be_bytes(be));
                if n <= 0xff {
                    return Err(CodecError::NonMinimalHead);
                }
                n
            }
            26 => {
                let mut be = [0u8; 4];
                be.copy_from_slice(self.read_slice(4)?);
                let n = u64::from(u32::from_be_bytes(be));
                if n <= 0xffff {
                    return Err(CodecError::NonMinimalHead);
                }
                n
            }
            27 => {
                let mut be = [0u8; 8];
                be.copy_from_slice(self.read_slice(8)?);
                let n = u64::from_be_bytes(be);
                if n <= 0xffff_ffff {
                    return Err(CodecError::NonMinimalHead);
                }
                n
            }
            // Reserved widths and indefinite lengths are outside the subset.
            _ => return Err(CodecError::Unsupported(major, info)),
        };
        Ok((major, arg))
    }

    fn read_value(&mut self) -> Result<Value, CodecError> {
        let (major, arg) = self.read_head()?;
        match major {
            MAJOR_UINT => Ok(Value::Int(arg)),
            MAJOR_BYTES => Ok(Value::Bytes(self.read_slice(arg as usize)?.to_vec())),
            MAJOR_TEXT => {
                let bytes = self.read_slice(arg as usize)?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(s.to_string()))
            }
            MAJOR_ARRAY => {
                let mut items = Vec::with_capacity(arg.min(1024) as usize);
                for _ in 0..arg {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            MAJOR_MAP => {
                let mut map = BTreeMap::new();
                for _ in 0..arg {
                    let (kmajor, klen) = self.read_head()?;
                    if kmajor != MAJOR_TEXT {
                        return Err(CodecError::Unsupported(kmajor, 0));
                    }
                    let kbytes = self.read_slice(klen as usize)?;
                    let key = std::str::from_utf8(kbytes)
                        .map_err(|_| CodecError::InvalidUtf8)?
                        .to_string();
                    let value = self.read_value()?;
                    if map.insert(key.clone(), value).is_some() {
                        return Err(CodecError::DuplicateKey(key));
                    }
                }
                Ok(Value::Map(map))
            }
            MAJOR_TAG => {
                if arg != LINK_TAG {
                    return Err(CodecError::UnsupportedTag(arg));
                }
                let (pmajor, plen) = self.read_head()?;
                if pmajor != MAJOR_BYTES || plen as usize != Link::LEN + 1 {
                    return Err(CodecError::InvalidLink);
                }
                let payload = self.read_slice(plen as usize)?;
                if payload[0] != 0x00 {
                    return Err(CodecError::InvalidLink);
                }
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&payload[1..]);
                Ok(Value::Link(Link::from_bytes(digest)))
            }
            MAJOR_SIMPLE => {
                if arg == u64::from(SIMPLE_NULL) {
                    Ok(Value::Null)
                } else {
                    Err(CodecError::Unsupported(major, arg as u8))
                }
            }
            _ => Err(CodecError::Unsupported(major, 0)),
        }
    }
}
