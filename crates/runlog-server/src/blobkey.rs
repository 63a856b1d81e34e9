use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

/// Identifies one blob: a `(experiment, run, tag, step, index)` tuple.
///
/// The encoded form is a URL-safe UTF-8 string: a JSON array of the five
/// fields in declaration order, itself base64url-encoded without padding.
/// The string fields are base64url-encoded inside the JSON so that
/// non-UTF-8 byte strings survive the trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKey {
    pub experiment_id: Vec<u8>,
    pub run: Vec<u8>,
    pub tag: Vec<u8>,
    pub step: i64,
    pub index: i64,
}

#[derive(Debug, Error)]
pub enum BlobKeyError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field}: got {got}, want {want}")]
    Mismatch {
        field: &'static str,
        got: String,
        want: &'static str,
    },
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl BlobKey {
    pub fn new(experiment_id: &str, run: &str, tag: &str, step: i64, index: i64) -> Self {
        BlobKey {
            experiment_id: experiment_id.as_bytes().to_vec(),
            run: run.as_bytes().to_vec(),
            tag: tag.as_bytes().to_vec(),
            step,
            index,
        }
    }

    pub fn encode(&self) -> String {
        let wire = Value::Array(vec![
            Value::String(URL_SAFE_NO_PAD.encode(&self.experiment_id)),
            Value::String(URL_SAFE_NO_PAD.encode(&self.run)),
            Value::String(URL_SAFE_NO_PAD.encode(&self.tag)),
            Value::from(self.step),
            Value::from(self.index),
        ]);
        URL_SAFE_NO_PAD.encode(wire.to_string())
    }

    pub fn decode(encoded: &str) -> Result<Self, BlobKeyError> {
        let json = URL_SAFE_NO_PAD.decode(encoded)?;
        let wire: Value = serde_json::from_slice(&json)?;
        let Value::Array(fields) = &wire else {
            return Err(BlobKeyError::Mismatch {
                field: "key",
                got: json_type(&wire).to_string(),
                want: "array of 5 fields",
            });
        };
        if fields.len() != 5 {
            return Err(BlobKeyError::Mismatch {
                field: "key",
                got: format!("{} fields", fields.len()),
                want: "array of 5 fields",
            });
        }
        Ok(BlobKey {
            experiment_id: decode_wire_bytes("eid", &fields[0])?,
            run: decode_wire_bytes("run", &fields[1])?,
            tag: decode_wire_bytes("tag", &fields[2])?,
            step: decode_wire_i64("step", &fields[3])?,
            index: decode_wire_i64("index", &fields[4])?,
        })
    }
}

fn decode_wire_bytes(field: &'static str, value: &Value) -> Result<Vec<u8>, BlobKeyError> {
    let Value::String(s) = value else {
        return Err(BlobKeyError::Mismatch {
            field,
            got: json_type(value).to_string(),
            want: "string",
        });
    };
    Ok(URL_SAFE_NO_PAD.decode(s)?)
}

fn decode_wire_i64(field: &'static str, value: &Value) -> Result<i64, BlobKeyError> {
    let Value::Number(n) = value else {
        return Err(BlobKeyError::Mismatch {
            field,
            got: json_type(value).to_string(),
            want: "integer",
        });
    };
    if let Some(i) = n.as_i64() {
        return Ok(i);
    }
    // A number written with a decimal point or exponent is still acceptable
    // as long as it is mathematically integral and fits in i64.
    let Some(f) = n.as_f64() else {
        return Err(BlobKeyError::Mismatch {
            field,
            got: n.to_string(),
            want: "integer",
        });
    };
    if f.fract() != 0.0 {
        return Err(BlobKeyError::Mismatch {
            field,
            got: n.to_string(),
            want: "integer",
        });
    }
    if f < i64::MIN as f64 || f > i64::MAX as f64 {
        return Err(BlobKeyError::Mismatch {
            field,
            got: n.to_string(),
            want: "integer in i64 range",
        });
    }
    Ok(f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_simple_and_binary_tags() {
        let cases = [
            BlobKey::new("123", "mnist", "input", 777, 23),
            BlobKey {
                experiment_id: b"123".to_vec(),
                run: b"mnist".to_vec(),
                tag: b"\x00\x77\x99\xcc".to_vec(),
                step: 777,
                index: 23,
            },
        ];
        for key in cases {
            let encoded = key.encode();
            assert!(
                encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
                "not URL-safe: {encoded:?}"
            );
            assert_eq!(BlobKey::decode(&encoded).unwrap(), key);
        }
    }

    #[test]
    fn accepts_integral_floats_for_step_and_index() {
        let b64 = |s: &str| URL_SAFE_NO_PAD.encode(s);
        // Whole numbers written with a decimal point or exponent are still
        // integers.
        let key = BlobKey::decode(&b64(r#"["","","",777.0,2.3e1]"#)).unwrap();
        assert_eq!(key.step, 777);
        assert_eq!(key.index, 23);

        let key = BlobKey::decode(&b64(r#"["","","",-5.0,0]"#)).unwrap();
        assert_eq!(key.step, -5);
    }

    #[test]
    fn rejects_malformed_keys() {
        let b64 = |s: &str| URL_SAFE_NO_PAD.encode(s);

        assert!(matches!(
            BlobKey::decode("???"),
            Err(BlobKeyError::Base64(_))
        ));
        assert!(matches!(
            BlobKey::decode(&b64("notjson")),
            Err(BlobKeyError::Json(_))
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"{"json":true,"valid":false}"#)),
            Err(BlobKeyError::Mismatch { field: "key", .. })
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"["","",0,0]"#)),
            Err(BlobKeyError::Mismatch { field: "key", .. })
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"[false,"","",0,0]"#)),
            Err(BlobKeyError::Mismatch { field: "eid", .. })
        ));
        // String fields must themselves hold valid base64.
        assert!(matches!(
            BlobKey::decode(&b64(r#"["???","","",0,0]"#)),
            Err(BlobKeyError::Base64(_))
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"["","","",false,0]"#)),
            Err(BlobKeyError::Mismatch { field: "step", .. })
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"["","","",123.45,0]"#)),
            Err(BlobKeyError::Mismatch { field: "step", .. })
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"["","","",1267650600228229401496703205376,0]"#)),
            Err(BlobKeyError::Mismatch { field: "step", .. })
        ));
        assert!(matches!(
            BlobKey::decode(&b64(r#"["","","",0,"x"]"#)),
            Err(BlobKeyError::Mismatch { field: "index", .. })
        ));
    }

    #[test]
    fn error_messages_name_the_field() {
        let b64 = |s: &str| URL_SAFE_NO_PAD.encode(s);
        let err = BlobKey::decode(&b64(r#"["","","",false,0]"#)).unwrap_err();
        assert_eq!(err.to_string(), "step: got bool, want integer");
    }
}
