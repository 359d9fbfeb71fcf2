//! Replay buffer format
//!
//! A compact, self-describing encoding of a choice sequence. It is the unit a
//! caller stores in an example database and hands back through the reuse
//! phase; the core itself never touches storage.
//!
//! Each choice is a header byte `tag << 5 | size` followed by `size` payload
//! bytes. Sizes of 31 or more store 31 in the header and the real size as a
//! ULEB128 varint straight after it.
//!
//! | tag | kind    | payload                                  |
//! |-----|---------|------------------------------------------|
//! | 0   | boolean | none, the size field holds the value     |
//! | 1   | float   | 8 bytes, big-endian IEEE 754 bits         |
//! | 2   | integer | big-endian two's complement, minimal      |
//! | 3   | bytes   | raw bytes                                |
//! | 4   | string  | UTF-8                                    |

use crate::choice::ChoiceValue;
use crate::data::{ConjectureData, ConjectureResult};

use byteorder::{BigEndian, ByteOrder};
use sha2::{Digest, Sha256};
use thiserror::Error;

const TAG_BOOLEAN: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_STRING: u8 = 4;

const SIZE_MASK: u8 = 0b1_1111;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("unknown tag {tag} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("invalid payload size {size} for tag {tag} at offset {offset}")]
    InvalidSize { tag: u8, size: usize, offset: usize },
    #[error("integer at offset {offset} does not fit in 128 bits")]
    IntegerOverflow { offset: usize },
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
}

/// A decoded choice sequence, ready to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReplayableChoices(Vec<ChoiceValue>);

impl ReplayableChoices {
    pub fn new(choices: Vec<ChoiceValue>) -> Self {
        Self(choices)
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self, DecodeError> {
        choices_from_bytes(buffer).map(Self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        choices_to_bytes(&self.0)
    }

    pub fn as_slice(&self) -> &[ChoiceValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<ChoiceValue> {
        self.0
    }

    /// A test case that replays these choices, allowing up to `max_choices`
    /// draws in total.
    pub fn into_data(self, max_choices: usize) -> ConjectureData {
        ConjectureData::for_choices(self.0, max_choices)
    }
}

impl From<&ConjectureResult> for ReplayableChoices {
    fn from(result: &ConjectureResult) -> Self {
        Self(result.choices())
    }
}

pub fn serialize(result: &ConjectureResult) -> Vec<u8> {
    result.to_bytes()
}

pub fn deserialize(buffer: &[u8]) -> Result<ReplayableChoices, DecodeError> {
    ReplayableChoices::from_bytes(buffer)
}

fn write_header(out: &mut Vec<u8>, tag: u8, size: usize) {
    if size < SIZE_MASK as usize {
        out.push(tag << 5 | size as u8);
        return;
    }
    out.push(tag << 5 | SIZE_MASK);
    let mut remaining = size;
    loop {
        let byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Smallest big-endian two's complement form of `value`.
fn integer_bytes(value: i128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let sign = if value < 0 { 0xFF } else { 0x00 };
    let mut start = 0;
    // A leading sign byte is redundant when the next byte carries the same sign bit.
    while start < bytes.len() - 1 && bytes[start] == sign && (bytes[start + 1] & 0x80) == (sign & 0x80) {
        start += 1;
    }
    bytes[start..].to_vec()
}

pub fn choices_to_bytes(choices: &[ChoiceValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for choice in choices {
        match choice {
            ChoiceValue::Boolean(value) => out.push(TAG_BOOLEAN << 5 | u8::from(*value)),
            ChoiceValue::Float(value) => {
                write_header(&mut out, TAG_FLOAT, 8);
                let mut payload = [0u8; 8];
                BigEndian::write_f64(&mut payload, *value);
                out.extend_from_slice(&payload);
            }
            ChoiceValue::Integer(value) => {
                let payload = integer_bytes(*value);
                write_header(&mut out, TAG_INTEGER, payload.len());
                out.extend_from_slice(&payload);
            }
            ChoiceValue::Bytes(value) => {
                write_header(&mut out, TAG_BYTES, value.len());
                out.extend_from_slice(value);
            }
            ChoiceValue::String(value) => {
                write_header(&mut out, TAG_STRING, value.len());
                out.extend_from_slice(value.as_bytes());
            }
        }
    }
    out
}

struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .buffer
            .get(self.offset)
            .ok_or(DecodeError::Truncated { offset: self.offset })?;
        self.offset += 1;
        Ok(byte)
    }

    fn uleb128(&mut self) -> Result<usize, DecodeError> {
        let start = self.offset;
        let mut value: usize = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            let bits = usize::from(byte & 0x7F);
            if shift >= usize::BITS || (bits << shift) >> shift != bits {
                return Err(DecodeError::InvalidSize {
                    tag: 0,
                    size: usize::MAX,
                    offset: start,
                });
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(size)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(DecodeError::Truncated { offset: self.offset })?;
        let slice = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(slice)
    }
}

fn decode_integer(payload: &[u8], offset: usize) -> Result<i128, DecodeError> {
    let negative = payload.first().map_or(false, |&b| b & 0x80 != 0);
    let sign = if negative { 0xFF } else { 0x00 };
    let excess = payload.len().saturating_sub(16);
    let (extension, digits) = payload.split_at(excess);
    if extension.iter().any(|&b| b != sign) {
        return Err(DecodeError::IntegerOverflow { offset });
    }
    if excess > 0 && digits.first().map_or(false, |&b| (b & 0x80 != 0) != negative) {
        return Err(DecodeError::IntegerOverflow { offset });
    }
    let mut bytes = [sign; 16];
    bytes[16 - digits.len()..].copy_from_slice(digits);
    Ok(i128::from_be_bytes(bytes))
}

pub fn choices_from_bytes(buffer: &[u8]) -> Result<Vec<ChoiceValue>, DecodeError> {
    let mut reader = Reader { buffer, offset: 0 };
    let mut choices = Vec::new();
    while reader.offset < buffer.len() {
        let offset = reader.offset;
        let header = reader.byte()?;
        let tag = header >> 5;
        let mut size = usize::from(header & SIZE_MASK);
        if size == SIZE_MASK as usize {
            size = reader.uleb128()?;
        }
        let invalid_size = DecodeError::InvalidSize { tag, size, offset };
        let choice = match tag {
            TAG_BOOLEAN => match size {
                0 => ChoiceValue::Boolean(false),
                1 => ChoiceValue::Boolean(true),
                _ => return Err(invalid_size),
            },
            TAG_FLOAT => {
                if size != 8 {
                    return Err(invalid_size);
                }
                ChoiceValue::Float(BigEndian::read_f64(reader.take(8)?))
            }
            TAG_INTEGER => {
                if size == 0 {
                    return Err(invalid_size);
                }
                ChoiceValue::Integer(decode_integer(reader.take(size)?, offset)?)
            }
            TAG_BYTES => ChoiceValue::Bytes(reader.take(size)?.to_vec()),
            TAG_STRING => {
                let payload = reader.take(size)?;
                let value = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8 { offset })?;
                ChoiceValue::String(value.to_string())
            }
            _ => return Err(DecodeError::UnknownTag { tag, offset }),
        };
        choices.push(choice);
    }
    Ok(choices)
}

/// SHA-256 of the encoded sequence. Two sequences share a fingerprint
/// exactly when they encode identically.
pub fn fingerprint(choices: &[ChoiceValue]) -> [u8; 32] {
    Sha256::digest(choices_to_bytes(choices)).into()
}
