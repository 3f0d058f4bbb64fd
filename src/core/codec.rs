//! Wire message codec: `(name, args, kwargs) <-> bytes`.

use serde_json::{Map, Value};

use super::error::CodecError;

/// A decoded wire message: task name, positional args, keyword args.
pub type Message = (String, Vec<Value>, Map<String, Value>);

/// Pluggable transformation between `(name, args, kwargs)` and bytes.
///
/// The runtime holds a single `Arc<dyn TaskCodec>` shared by the producer and
/// consumer paths. Swapping the codec requires upgrading both fleets in
/// lockstep; there is no version negotiation.
pub trait TaskCodec: Send + Sync {
    /// Serialize a task invocation to bytes.
    fn encode(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Vec<u8>, CodecError>;

    /// Deserialize bytes back into a task invocation.
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// Default codec: a JSON array `[name, args, kwargs]`.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl TaskCodec for JsonCodec {
    fn encode(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Vec<u8>, CodecError> {
        let wire = Value::Array(vec![
            Value::String(name.to_string()),
            Value::Array(args.to_vec()),
            Value::Object(kwargs.clone()),
        ]);
        serde_json::to_vec(&wire).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        let mut elements = match value {
            Value::Array(elements) if elements.len() == 3 => elements,
            _ => {
                return Err(CodecError::Decode(
                    "expected a 3-element [name, args, kwargs] array".into(),
                ))
            }
        };
        let kwargs = match elements.pop().unwrap() {
            Value::Object(map) => map,
            _ => return Err(CodecError::Decode("kwargs must be an object".into())),
        };
        let args = match elements.pop().unwrap() {
            Value::Array(items) => items,
            _ => return Err(CodecError::Decode("args must be an array".into())),
        };
        let name = match elements.pop().unwrap() {
            Value::String(name) => name,
            _ => return Err(CodecError::Decode("name must be a string".into())),
        };
        Ok((name, args, kwargs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_is_identity() {
        let codec = JsonCodec;
        let args = vec![json!(3), json!("four")];
        let mut kwargs = Map::new();
        kwargs.insert("flag".into(), json!(true));

        let bytes = codec.encode("t.add", &args, &kwargs).unwrap();
        let (name, decoded_args, decoded_kwargs) = codec.decode(&bytes).unwrap();

        assert_eq!(name, "t.add");
        assert_eq!(decoded_args, args);
        assert_eq!(decoded_kwargs, kwargs);
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        let codec = JsonCodec;
        assert!(codec.decode(b"not json").is_err());
        assert!(codec.decode(b"{}").is_err());
        assert!(codec.decode(b"[1, 2]").is_err());
    }

    #[test]
    fn decode_rejects_wrong_shapes() {
        let codec = JsonCodec;
        assert!(codec.decode(b"[1, [], {}]").is_err());
        assert!(codec.decode(br#"["t", {}, {}]"#).is_err());
        assert!(codec.decode(br#"["t", [], []]"#).is_err());
    }
}
