use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Encode a JSON value canonically: object keys sorted lexicographically
/// at every nesting level, no insignificant whitespace.
///
/// Numbers are rendered through serde_json's formatter (integers without
/// a fraction part, non-integral doubles in shortest-roundtrip form), so
/// the encoding is stable across platforms.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical encoding as UTF-8 bytes.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    canonical_json(value).into_bytes()
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Content hash of a JSON value: SHA-256 over its canonical encoding.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(&canonical_bytes(value))
}

/// Content hash of any serializable value, going through `serde_json::Value`
/// so struct field order never leaks into the hash.
pub fn hash_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let tree = serde_json::to_value(value)?;
    Ok(hash_value(&tree))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json handles all required escaping.
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string serialization is infallible"),
                );
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let value = json!({
            "b": 1,
            "a": {"z": true, "m": [{"y": 2, "x": 1}]},
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":[{"x":1,"y":2}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn no_insignificant_whitespace() {
        let value = json!({"k": [1, 2, 3], "s": "a b"});
        assert_eq!(canonical_json(&value), r#"{"k":[1,2,3],"s":"a b"}"#);
    }

    #[test]
    fn encode_decode_is_identity_modulo_whitespace() {
        let original: Value = serde_json::from_str(
            r#"{ "outer" : { "list": [ null, false, 1.5, "x" ] }, "n": 42 }"#,
        )
        .unwrap();
        let canonical = canonical_json(&original);
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        assert_eq!(reparsed, original);
        // A second pass is byte-identical.
        assert_eq!(canonical_json(&reparsed), canonical);
    }

    #[test]
    fn hash_is_insensitive_to_key_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let h = hash_value(&json!({}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // SHA-256 of "{}"
        assert_eq!(
            h,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn unicode_passes_through_escaped_consistently() {
        let value = json!({"msg": "héllo \"quoted\"\n"});
        let canonical = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        assert_eq!(reparsed, value);
    }

    #[test]
    fn integers_and_floats_are_distinct_content() {
        let int = json!({"v": 1});
        let float = json!({"v": 1.5});
        assert_ne!(hash_value(&int), hash_value(&float));
    }
}
