mod decoder;
mod encoder;
mod value;

pub use decoder::{decode, raw_value};
pub use encoder::encode;
pub use value::BencodeValue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_keys_are_emitted_sorted() {
        let mut dict = std::collections::BTreeMap::new();
        dict.insert(b"foo".to_vec(), BencodeValue::Integer(42));
        dict.insert(b"bar".to_vec(), BencodeValue::String(b"spam".to_vec()));
        let encoded = encode(&BencodeValue::Dict(dict));
        assert_eq!(encoded, b"d3:bar4:spam3:fooi42ee");
    }

    #[test]
    fn test_decode_nested() {
        let value = decode(b"d4:listl4:spami-3ee3:numi0ee").unwrap();
        let list = value.get("list").and_then(|v| v.as_list()).unwrap();
        assert_eq!(list[0].as_str(), Some("spam"));
        assert_eq!(list[1].as_integer(), Some(-3));
        assert_eq!(value.get("num").and_then(|v| v.as_integer()), Some(0));
    }

    #[test]
    fn test_reencoding_is_byte_identical() {
        let raw = b"d6:lengthi59616e4:name8:file.bin12:piece lengthi32768ee";
        assert_eq!(encode(&decode(raw).unwrap()), raw.to_vec());
    }

    #[test]
    fn test_raw_value_keeps_original_key_order() {
        let raw = b"d4:infod4:name1:x6:lengthi3ee3:numi1ee";
        assert_eq!(
            raw_value(raw, b"info").unwrap(),
            Some(&b"d4:name1:x6:lengthi3ee"[..])
        );
        assert_eq!(raw_value(raw, b"num").unwrap(), Some(&b"i1e"[..]));
        assert_eq!(raw_value(raw, b"missing").unwrap(), None);
        assert!(raw_value(b"l4:infoe", b"info").is_err());
        assert!(raw_value(b"d4:infod", b"info").is_err());
    }

    #[test]
    fn test_malformed_integers_rejected() {
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"i007e").is_err());
        assert!(decode(b"ie").is_err());
        assert!(decode(b"i12").is_err());
    }

    #[test]
    fn test_truncated_and_trailing_input_rejected() {
        assert!(decode(b"5:abc").is_err());
        assert!(decode(b"l4:spam").is_err());
        assert!(decode(b"i1ei2e").is_err());
        assert!(decode(b"di1ei2ee").is_err());
    }
}
