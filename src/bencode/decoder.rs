use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;

use std::collections::HashMap;
use tracing::instrument;

/// Decodes a bencode string from the front of `input`.
///
/// Reads a bencode string in the format `<length>:<data>` where:
/// - `<length>` is a decimal number indicating the length of the string
/// - `<data>` is the actual string data of the specified length
///
/// # Returns
/// The decoded bytes and the number of input bytes consumed, or an error if:
///   - The length prefix is invalid or missing
///   - The input ends before `<length>` bytes of data are available
///
/// # Example
/// For input `"5:hello"`, this returns `(b"hello".to_vec(), 7)`.
#[instrument(skip(input), level = "trace")]
pub fn decode_string(input: &[u8]) -> BencodeResult<(Vec<u8>, usize)> {
    let colon = input
        .iter()
        .position(|&b| b == b':')
        .ok_or(BencodeError::UnexpectedEOI)?;

    let length_str =
        std::str::from_utf8(&input[..colon]).map_err(|_| BencodeError::InvalidStringLength)?;
    if length_str.is_empty() || !length_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::InvalidStringLength);
    }
    let length: usize = length_str
        .parse()
        .map_err(|_| BencodeError::InvalidStringLength)?;

    let start = colon + 1;
    let end = start
        .checked_add(length)
        .ok_or(BencodeError::InvalidStringLength)?;
    if end > input.len() {
        return Err(BencodeError::UnexpectedEOI);
    }

    Ok((input[start..end].to_vec(), end))
}

/// Decodes a bencode integer from the front of `input`.
///
/// Reads a bencode integer in the format `i<number>e` where:
/// - `i` is the literal character 'i' marking the start of an integer
/// - `<number>` is the actual integer value
/// - `e` is the literal character 'e' marking the end of the integer
///
/// Rejects leading zeros (except for a lone `0`), `-0`, and an empty body.
///
/// # Example
/// For input `"i42e"`, this returns `(42, 4)`.
#[instrument(skip(input), level = "trace")]
pub fn decode_integer(input: &[u8]) -> BencodeResult<(i64, usize)> {
    if input.first() != Some(&b'i') {
        return Err(BencodeError::InvalidFormat(
            "integer must start with 'i'".to_string(),
        ));
    }

    let end = input
        .iter()
        .position(|&b| b == b'e')
        .ok_or(BencodeError::UnexpectedEOI)?;
    let num_str = std::str::from_utf8(&input[1..end]).map_err(|_| BencodeError::InvalidInteger)?;

    if num_str.is_empty() {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str.len() > 1 && num_str.starts_with('0') {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str.len() > 2 && num_str.starts_with("-0") {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str.starts_with('+') {
        return Err(BencodeError::InvalidInteger);
    }

    let value = num_str
        .parse::<i64>()
        .map_err(|_| BencodeError::InvalidInteger)?;
    Ok((value, end + 1))
}

/// Decodes a bencode list from the front of `input`.
///
/// Reads a bencode list in the format `l<items>e`, recursively decoding each
/// item with [`decode_next`].
///
/// # Example
/// For input `"li42ei-1ee"`, this returns `(vec![Integer(42), Integer(-1)], 10)`.
#[instrument(skip(input), level = "trace")]
fn decode_list(input: &[u8]) -> BencodeResult<(Vec<BencodeValue>, usize)> {
    if input.first() != Some(&b'l') {
        return Err(BencodeError::InvalidFormat(
            "list must start with 'l'".to_string(),
        ));
    }

    let mut pos = 1;
    let mut list = Vec::new();

    loop {
        match input.get(pos) {
            None => return Err(BencodeError::UnexpectedEOI),
            Some(b'e') => {
                pos += 1;
                break;
            }
            Some(_) => {
                let (item, consumed) = decode_next(&input[pos..])?;
                list.push(item);
                pos += consumed;
            }
        }
    }

    Ok((list, pos))
}

/// Decodes a bencode dictionary from the front of `input`.
///
/// Dictionaries start with `d` and end with `e`. Keys must be byte strings;
/// the source data is assumed (not re-verified) to list keys in ascending
/// byte order, per the bencode spec.
///
/// # Example
/// For input `"d3:keyi42ee"`, this returns `({b"key": Integer(42)}, 11)`.
#[instrument(skip(input), level = "trace")]
fn decode_dict(input: &[u8]) -> BencodeResult<(HashMap<Vec<u8>, BencodeValue>, usize)> {
    if input.first() != Some(&b'd') {
        return Err(BencodeError::InvalidFormat(
            "dictionary must start with 'd'".to_string(),
        ));
    }

    let mut pos = 1;
    let mut dict = HashMap::new();

    loop {
        match input.get(pos) {
            None => return Err(BencodeError::UnexpectedEOI),
            Some(b'e') => {
                pos += 1;
                break;
            }
            Some(_) => {
                let (key, key_len) = decode_string(&input[pos..])?;
                pos += key_len;
                let (value, value_len) = decode_next(&input[pos..])?;
                pos += value_len;
                dict.insert(key, value);
            }
        }
    }

    Ok((dict, pos))
}

/// Dispatches on the first byte to decode any bencode value, direct-switch
/// style (`i` integer, digit string length, `l` list, `d` dictionary).
#[instrument(skip(input), level = "trace")]
pub fn decode_next(input: &[u8]) -> BencodeResult<(BencodeValue, usize)> {
    match input.first() {
        None => Err(BencodeError::UnexpectedEOI),
        Some(b'0'..=b'9') => {
            let (s, n) = decode_string(input)?;
            Ok((BencodeValue::String(s), n))
        }
        Some(b'i') => {
            let (i, n) = decode_integer(input)?;
            Ok((BencodeValue::Integer(i), n))
        }
        Some(b'l') => {
            let (l, n) = decode_list(input)?;
            Ok((BencodeValue::List(l), n))
        }
        Some(b'd') => {
            let (d, n) = decode_dict(input)?;
            Ok((BencodeValue::Dict(d), n))
        }
        Some(&c) => Err(BencodeError::InvalidFormat(format!(
            "unexpected character: {}",
            c as char
        ))),
    }
}
