use thiserror::Error;

use crate::common::{CR, LF};

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("containing RESP message is malformed: {0}")]
    Invalid(String),
    #[error("need more data to correctly process message")]
    Incomplete,
}

impl From<std::num::ParseIntError> for ParseError {
    fn from(value: std::num::ParseIntError) -> Self {
        ParseError::Invalid(value.to_string())
    }
}

impl From<std::str::Utf8Error> for ParseError {
    fn from(value: std::str::Utf8Error) -> Self {
        ParseError::Invalid(value.to_string())
    }
}

/// A single RESP2 value. `Array` is the only recursive variant; client
/// commands always arrive as `Array` of `BulkString`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Token {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(Vec<u8>),
    NullBulkString,
    Array(Vec<Token>),
}

impl Token {
    pub fn get_bulk_string_data(&self) -> Result<&Vec<u8>> {
        match self {
            Token::BulkString(data) => Ok(data),
            other => Err(ParseError::Invalid(format!(
                "expected bulk string, found {other:?}"
            ))),
        }
    }

    pub fn get_simple_string_data(&self) -> Result<&String> {
        match self {
            Token::SimpleString(data) => Ok(data),
            other => Err(ParseError::Invalid(format!(
                "expected simple string, found {other:?}"
            ))),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Token::SimpleString(data) => format!("+{data}\r\n").into_bytes(),
            Token::SimpleError(data) => format!("-{data}\r\n").into_bytes(),
            Token::Integer(n) => format!(":{n}\r\n").into_bytes(),
            Token::NullBulkString => b"$-1\r\n".to_vec(),
            Token::BulkString(data) => {
                let mut out = format!("${}\r\n", data.len()).into_bytes();
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
                out
            }
            Token::Array(items) => {
                let mut out = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    out.extend(item.serialize());
                }
                out
            }
        }
    }
}

#[derive(Debug)]
pub struct ParseResult {
    pub tokens: Vec<Token>,
    pub len: usize,
}

pub fn find_first_crlf(message: &[u8]) -> Option<usize> {
    message.windows(2).position(|window| window == [CR, LF])
}

fn bytes_to_signed(bytes: &[u8]) -> Result<i64> {
    Ok(std::str::from_utf8(bytes)?.parse::<i64>()?)
}

fn parse_bytes(message: &[u8], len: usize) -> Result<&[u8]> {
    if len + 2 > message.len() {
        return Err(ParseError::Incomplete);
    }
    if message[len] != CR || message[len + 1] != LF {
        return Err(ParseError::Invalid(
            "bulk string payload not terminated by CRLF".to_string(),
        ));
    }
    Ok(&message[..len])
}

fn parse_bulk_string(message: &[u8]) -> Result<ParseResult> {
    assert_eq!(message.first(), Some(&b'$'));

    let size_offset = find_first_crlf(message).ok_or(ParseError::Incomplete)?;
    let data_size = bytes_to_signed(&message[1..size_offset])?;
    let data_start = size_offset + 2; // Skip CRLF

    if data_size == -1 {
        return Ok(ParseResult {
            tokens: vec![Token::NullBulkString],
            len: data_start,
        });
    }
    if data_size < 0 {
        return Err(ParseError::Invalid(format!(
            "negative bulk string length {data_size}"
        )));
    }

    let data = parse_bytes(&message[data_start..], data_size as usize)?;
    let offset = data_start + data_size as usize + 2;

    Ok(ParseResult {
        tokens: vec![Token::BulkString(data.to_vec())],
        len: offset,
    })
}

fn parse_simple_string(message: &[u8]) -> Result<ParseResult> {
    assert_eq!(message.first(), Some(&b'+'));

    let str_size = find_first_crlf(message).ok_or(ParseError::Incomplete)?;
    let data = std::str::from_utf8(&message[1..str_size])?;

    Ok(ParseResult {
        tokens: vec![Token::SimpleString(data.to_owned())],
        len: str_size + 2,
    })
}

fn parse_simple_error(message: &[u8]) -> Result<ParseResult> {
    assert_eq!(message.first(), Some(&b'-'));

    let str_size = find_first_crlf(message).ok_or(ParseError::Incomplete)?;
    let data = std::str::from_utf8(&message[1..str_size])?;

    Ok(ParseResult {
        tokens: vec![Token::SimpleError(data.to_owned())],
        len: str_size + 2,
    })
}

fn parse_integer(message: &[u8]) -> Result<ParseResult> {
    assert_eq!(message.first(), Some(&b':'));

    let str_size = find_first_crlf(message).ok_or(ParseError::Incomplete)?;
    let data = bytes_to_signed(&message[1..str_size])?;

    Ok(ParseResult {
        tokens: vec![Token::Integer(data)],
        len: str_size + 2,
    })
}

fn parse_array(message: &[u8]) -> Result<ParseResult> {
    assert_eq!(message.first(), Some(&b'*'));

    let size_offset = find_first_crlf(message).ok_or(ParseError::Incomplete)?;
    let num_elements = bytes_to_signed(&message[1..size_offset])?;
    if num_elements < 0 {
        return Err(ParseError::Invalid(format!(
            "negative array length {num_elements}"
        )));
    }

    let mut offset = size_offset + 2;
    let mut elements = Vec::with_capacity(num_elements as usize);

    for _ in 0..num_elements {
        let res = parse_one(&message[offset..])?;
        elements.push(
            res.tokens
                .into_iter()
                .next()
                .expect("parse_one yields exactly one token"),
        );
        offset += res.len;
    }

    Ok(ParseResult {
        tokens: vec![Token::Array(elements)],
        len: offset,
    })
}

/// Parses exactly one top-level RESP value, returning it as the single
/// element of `ParseResult::tokens`. Arrays are preserved in their nested
/// structure, unlike `parse_buffer` below.
pub fn parse_one(message: &[u8]) -> Result<ParseResult> {
    match message.first() {
        Some(b'*') => parse_array(message),
        Some(b'+') => parse_simple_string(message),
        Some(b'-') => parse_simple_error(message),
        Some(b':') => parse_integer(message),
        Some(b'$') => parse_bulk_string(message),
        Some(byte) => Err(ParseError::Invalid(format!(
            "unsupported RESP type byte {byte:#04x}"
        ))),
        None => Err(ParseError::Incomplete),
    }
}

/// Parses a command frame: a top-level RESP array whose elements are
/// flattened into `ParseResult::tokens`, the argv-style contract C6 expects.
pub fn parse_buffer(buffer: &[u8]) -> Result<ParseResult> {
    let result = parse_one(buffer)?;
    match result.tokens.into_iter().next() {
        Some(Token::Array(items)) => Ok(ParseResult {
            tokens: items,
            len: result.len,
        }),
        Some(other) => Err(ParseError::Invalid(format!(
            "expected array command frame, found {other:?}"
        ))),
        None => unreachable!("parse_one always yields exactly one token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_string_parsing_works() {
        let message = b"+OK\r\n";
        let result = parse_simple_string(message).unwrap();
        assert_eq!(result.len, message.len());
        assert_eq!(
            result.tokens.first(),
            Some(&Token::SimpleString("OK".to_owned()))
        )
    }

    #[test]
    fn bulk_string_parsing_works() {
        let message = b"$5\r\nhello\r\n";
        let result = parse_bulk_string(message).unwrap();
        assert_eq!(result.len, message.len());
        assert_eq!(
            result.tokens.first(),
            Some(&Token::BulkString(b"hello".to_vec()))
        )
    }

    #[test]
    fn null_bulk_string_parsing_works() {
        let message = b"$-1\r\n";
        let result = parse_bulk_string(message).unwrap();
        assert_eq!(result.len, message.len());
        assert_eq!(result.tokens.first(), Some(&Token::NullBulkString));
    }

    #[test]
    fn null_bulk_string_serializes_to_dollar_minus_one() {
        assert_eq!(Token::NullBulkString.serialize(), b"$-1\r\n");
    }

    #[test]
    fn array_parsing_works() {
        let message = b"*2\r\n$3\r\nget\r\n$5\r\nfruit\r\n";
        let result = parse_buffer(message).unwrap();
        assert_eq!(result.len, message.len());
        assert_eq!(
            result.tokens,
            vec![
                Token::BulkString(b"get".to_vec()),
                Token::BulkString(b"fruit".to_vec())
            ]
        );
    }

    #[test]
    fn incomplete_buffer_reports_incomplete() {
        let message = b"*2\r\n$3\r\nget\r\n$5\r\nfru";
        assert!(matches!(parse_buffer(message), Err(ParseError::Incomplete)));
    }

    #[test]
    fn framing_parses_concatenated_values_one_at_a_time() {
        let message_part_one = b"*1\r\n$4\r\nping\r\n";
        let message_part_two = b"*2\r\n$4\r\necho\r\n$4\r\ndata\r\n";
        let message = [message_part_one.as_slice(), message_part_two.as_slice()].concat();

        let result = parse_buffer(&message).unwrap();
        assert_eq!(result.len, message_part_one.len());
        assert_eq!(result.tokens, vec![Token::BulkString(b"ping".to_vec())]);

        let rest = &message[result.len..];
        let result = parse_buffer(rest).unwrap();
        assert_eq!(result.len, message_part_two.len());
        assert_eq!(
            result.tokens,
            vec![
                Token::BulkString(b"echo".to_vec()),
                Token::BulkString(b"data".to_vec())
            ]
        );
    }

    #[test]
    fn round_trip_array_of_bulk_strings() {
        let token = Token::Array(vec![
            Token::BulkString(b"SET".to_vec()),
            Token::BulkString(b"foo".to_vec()),
            Token::BulkString(b"bar".to_vec()),
        ]);
        let bytes = token.serialize();
        let parsed = parse_one(&bytes).unwrap();
        assert_eq!(parsed.len, bytes.len());
        assert_eq!(parsed.tokens, vec![token]);
    }

    #[test]
    fn unsupported_type_byte_is_invalid() {
        let message = b"!notatype\r\n";
        assert!(matches!(parse_one(message), Err(ParseError::Invalid(_))));
    }
}
