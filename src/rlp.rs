//! Recursive-length-prefix codec used to serialize node records.
//!
//! Node records are heterogenous lists (a branch slot may hold an empty
//! element, a hash string or a nested inline node), so decoding goes
//! through a generic [`Item`] tree rather than typed targets.

use crate::bytes::Bytes;

use self::exceptions::RlpException;

pub mod exceptions;

/// A decoded RLP item: a byte string or a list of items.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Str(Bytes),
    List(Vec<Item>),
}

impl Item {
    pub fn encode(&self, buffer: &mut Bytes) {
        match self {
            Item::Str(bytes) => encode_bytes(buffer, bytes),
            Item::List(items) => {
                let mut joined_encodings = Bytes::default();
                for item in items {
                    item.encode(&mut joined_encodings);
                }
                encode_joined_encodings(buffer, &joined_encodings);
            }
        }
    }
}

//
// RLP Encode
//

/// Encodes `raw_bytes`, a sequence of bytes, using RLP.
pub fn encode_bytes(buffer: &mut Bytes, raw_bytes: &[u8]) {
    let len_raw_data = raw_bytes.len();

    if len_raw_data == 1 && raw_bytes[0] < 0x80 {
        buffer.push(raw_bytes[0]);
    } else if len_raw_data < 0x38 {
        buffer.push(0x80 + (len_raw_data as u8));
        buffer.extend(raw_bytes.iter().copied());
    } else {
        // length of raw data represented as big endian bytes
        let len_raw_data_as_be = len_raw_data.to_be_bytes();
        let lz = len_raw_data_as_be.iter()
            .position(|b| *b != 0)
            .unwrap(); // len_raw_data not zero.
        let len_raw_data_as_be = &len_raw_data_as_be[lz..];
        buffer.push(0xB7 + len_raw_data_as_be.len() as u8);
        buffer.extend(len_raw_data_as_be.iter().copied());
        buffer.extend(raw_bytes.iter().copied());
    }
}

/// Frames `joined_encodings`, a concatenation of already-encoded items,
/// as an RLP list.
pub fn encode_joined_encodings(dest: &mut Bytes, joined_encodings: &[u8]) {
    let len_joined_encodings = joined_encodings.len();
    if len_joined_encodings < 0x38 {
        dest.push(0xC0 + len_joined_encodings as u8);
    } else {
        let len_joined_encodings_as_be = len_joined_encodings.to_be_bytes();
        let lz = len_joined_encodings_as_be.iter()
            .position(|b| *b != 0)
            .unwrap(); // len_joined_encodings not zero.
        let len_joined_encodings_as_be = &len_joined_encodings_as_be[lz..];
        dest.push(0xF7 + len_joined_encodings_as_be.len() as u8);
        dest.extend(len_joined_encodings_as_be.iter().copied());
    }
    dest.extend(joined_encodings.iter().copied());
}

//
// RLP Decode
//

/// Decodes a complete RLP encoding into an [`Item`] tree.
///
/// Rejects empty input, trailing bytes and non-canonical forms.
pub fn decode(mut buffer: &[u8]) -> Result<Item, RlpException> {
    if buffer.is_empty() {
        return Err(RlpException::DecodingError("Cannot decode empty bytestring"));
    }
    let item = decode_item(&mut buffer)?;
    if !buffer.is_empty() {
        return Err(RlpException::DecodingError("trailing bytes after item"));
    }
    Ok(item)
}

fn decode_item(buffer: &mut &[u8]) -> Result<Item, RlpException> {
    let Some(&first) = buffer.first() else {
        return Err(RlpException::DecodingError("truncated item"));
    };
    if first < 0x80 {
        *buffer = &buffer[1..];
        Ok(Item::Str(Bytes(vec![first])))
    } else if first <= 0xB7 {
        let len_raw_data = (first - 0x80) as usize;
        if buffer.len() < 1 + len_raw_data {
            return Err(RlpException::DecodingError("truncated string"));
        }
        let raw_data = &buffer[1..1 + len_raw_data];
        if len_raw_data == 1 && raw_data[0] < 0x80 {
            return Err(RlpException::DecodingError("incorrect length"));
        }
        let item = Item::Str(Bytes(raw_data.to_vec()));
        *buffer = &buffer[1 + len_raw_data..];
        Ok(item)
    } else if first <= 0xBF {
        let (len_raw_data, header_len) = decode_long_length(buffer, 0xB7)?;
        if buffer.len() < header_len + len_raw_data {
            return Err(RlpException::DecodingError("truncated string"));
        }
        let raw_data = &buffer[header_len..header_len + len_raw_data];
        let item = Item::Str(Bytes(raw_data.to_vec()));
        *buffer = &buffer[header_len + len_raw_data..];
        Ok(item)
    } else if first <= 0xF7 {
        let len_joined_encodings = (first - 0xC0) as usize;
        if buffer.len() < 1 + len_joined_encodings {
            return Err(RlpException::DecodingError("truncated list"));
        }
        let joined_encodings = &buffer[1..1 + len_joined_encodings];
        let item = decode_list(joined_encodings)?;
        *buffer = &buffer[1 + len_joined_encodings..];
        Ok(item)
    } else {
        let (len_joined_encodings, header_len) = decode_long_length(buffer, 0xF7)?;
        if buffer.len() < header_len + len_joined_encodings {
            return Err(RlpException::DecodingError("truncated list"));
        }
        let joined_encodings = &buffer[header_len..header_len + len_joined_encodings];
        let item = decode_list(joined_encodings)?;
        *buffer = &buffer[header_len + len_joined_encodings..];
        Ok(item)
    }
}

/// Decodes the long-form length header starting at `buffer[0]`, whose tag
/// byte is `base + len_of_len`. Returns the payload length and header size.
fn decode_long_length(buffer: &[u8], base: u8) -> Result<(usize, usize), RlpException> {
    let len_of_len = (buffer[0] - base) as usize;
    if buffer.len() < 1 + len_of_len {
        return Err(RlpException::DecodingError("truncated length"));
    }
    if buffer[1] == 0 {
        return Err(RlpException::DecodingError("leading zero in length"));
    }
    if len_of_len > size_of::<usize>() {
        return Err(RlpException::DecodingError("length too large"));
    }
    let length = decode_length(&buffer[1..1 + len_of_len]);
    if length < 0x38 {
        return Err(RlpException::DecodingError("incorrect length"));
    }
    Ok((length, 1 + len_of_len))
}

fn decode_list(mut joined_encodings: &[u8]) -> Result<Item, RlpException> {
    let mut items = Vec::new();
    let buffer = &mut joined_encodings;
    while !buffer.is_empty() {
        items.push(decode_item(buffer)?);
    }
    Ok(Item::List(items))
}

/// Decode a variable length slice to a usize.
fn decode_length(src: &[u8]) -> usize {
    let mut res = [0; size_of::<usize>()];
    res[size_of::<usize>() - src.len()..].copy_from_slice(src);
    usize::from_be_bytes(res)
}
