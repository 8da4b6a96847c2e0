use super::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::collections::BTreeMap;

/// Containers nested deeper than this are refused rather than recursed into
const MAX_DEPTH: usize = 64;

/// Decode a complete bencoded document. Trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != data.len() {
        return Err(decoder.error("trailing data after value"));
    }
    Ok(value)
}

/// Exact bytes of the value stored under `key` in a top-level dictionary,
/// as they appear in `data`. With a repeated key the last one wins, the
/// same as in the decoded map.
pub fn raw_value<'a>(data: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>> {
    let mut decoder = Decoder { data, pos: 0 };
    if decoder.peek()? != b'd' {
        return Err(decoder.error("expected a dictionary"));
    }
    decoder.pos += 1;

    let mut found = None;
    while decoder.peek()? != b'e' {
        if !decoder.peek()?.is_ascii_digit() {
            return Err(decoder.error("dictionary key must be a string"));
        }
        let name = decoder.string()?;
        let start = decoder.pos;
        decoder.value(1)?;
        if name == key {
            found = Some(&data[start..decoder.pos]);
        }
    }
    Ok(found)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn error(&self, what: &str) -> BittorrentError {
        BittorrentError::BencodeError(format!("{} at byte {}", what, self.pos))
    }

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("unexpected end of input"))
    }

    fn value(&mut self, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.string().map(BencodeValue::String),
            c => Err(self.error(&format!("invalid token '{}'", c as char))),
        }
    }

    /// Digits up to (not including) `terminator`, consuming the terminator
    fn digits_until(&mut self, terminator: u8) -> Result<&'a str> {
        let start = self.pos;
        let len = self.data[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| self.error("unterminated number"))?;
        self.pos = start + len + 1;

        std::str::from_utf8(&self.data[start..start + len])
            .map_err(|_| self.error("non-ascii number"))
    }

    fn integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1;
        let text = self.digits_until(b'e')?;

        let digits = text.strip_prefix('-').unwrap_or(text);
        let malformed = digits.is_empty()
            || (digits.len() > 1 && digits.starts_with('0'))
            || text == "-0";
        if malformed {
            return Err(self.error(&format!("malformed integer '{}'", text)));
        }

        text.parse::<i64>()
            .map(BencodeValue::Integer)
            .map_err(|_| self.error(&format!("integer out of range '{}'", text)))
    }

    fn string(&mut self) -> Result<Vec<u8>> {
        let len: usize = self
            .digits_until(b':')?
            .parse()
            .map_err(|_| self.error("invalid string length"))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.error("string length exceeds data"))?;

        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<BencodeValue> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(BencodeValue::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<BencodeValue> {
        self.pos += 1;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(self.error("dictionary key must be a string"));
            }
            let key = self.string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(BencodeValue::Dict(entries))
    }
}
