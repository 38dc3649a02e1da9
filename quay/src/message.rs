//! Message codec and type registry.
//!
//! Applications describe their messages as a closed enum implementing
//! [`Message`], with one struct per variant implementing [`MessageType`].
//! A [`MessageRegistry`] lists which of those types a queue accepts and knows
//! how to turn a stored `(message_type, document)` pair back into the enum.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::QueueError;

/// A concrete message schema with a stable type tag.
///
/// The tag is what gets persisted in the `message_type` column, so renaming
/// it orphans every stored job of that type.
pub trait MessageType: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// The closed set of messages a queue carries.
pub trait Message: Send + Sync + 'static {
    /// Type tag of the variant held by this value.
    fn message_type(&self) -> &'static str;

    /// Serialize the variant's fields (not the enum wrapper) into a document.
    fn to_document(&self) -> serde_json::Result<Value>;
}

type DecodeFn<M> = fn(Value) -> Result<M, String>;

/// Maps type tags to decoders for a message set `M`.
pub struct MessageRegistry<M> {
    decoders: BTreeMap<&'static str, DecodeFn<M>>,
}

impl<M: Message> MessageRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Accept messages of type `T`.
    pub fn register<T>(mut self) -> Self
    where
        T: MessageType + Into<M>,
    {
        self.decoders.insert(T::NAME, decode_as::<T, M>);
        self
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.decoders.contains_key(message_type)
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Split a message into its type tag and document.
    pub fn encode(&self, message: &M) -> Result<(&'static str, Value), QueueError> {
        let message_type = message.message_type();
        if !self.contains(message_type) {
            return Err(QueueError::unknown_type(message_type));
        }
        let document = message.to_document()?;
        Ok((message_type, document))
    }

    /// Rebuild a message from its stored tag and document.
    pub fn decode(&self, message_type: &str, document: Value) -> Result<M, QueueError> {
        let decode = self
            .decoders
            .get(message_type)
            .ok_or_else(|| QueueError::unknown_type(message_type))?;
        decode(document).map_err(|reason| QueueError::malformed(message_type, reason))
    }
}

impl<M: Message> Default for MessageRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MessageRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("types", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Strict decode: serde rejects missing and mistyped fields, and any key the
/// schema would not have produced on re-encode counts as an extra field.
fn decode_as<T, M>(document: Value) -> Result<M, String>
where
    T: MessageType + Into<M>,
{
    let extra_check = match &document {
        Value::Object(fields) => Some(fields.keys().cloned().collect::<Vec<_>>()),
        _ => None,
    };

    let decoded: T = serde_json::from_value(document).map_err(|e| e.to_string())?;

    if let Some(keys) = extra_check {
        let canonical = serde_json::to_value(&decoded).map_err(|e| e.to_string())?;
        if let Value::Object(known) = canonical {
            if let Some(extra) = keys.iter().find(|key| !known.contains_key(key.as_str())) {
                return Err(format!("unexpected field `{extra}`"));
            }
        }
    }

    Ok(decoded.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    impl MessageType for Ping {
        const NAME: &'static str = "Ping";
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Resize {
        width: u32,
        height: u32,
        label: Option<String>,
    }

    impl MessageType for Resize {
        const NAME: &'static str = "Resize";
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Msg {
        Ping(Ping),
        Resize(Resize),
    }

    impl From<Ping> for Msg {
        fn from(value: Ping) -> Self {
            Msg::Ping(value)
        }
    }

    impl From<Resize> for Msg {
        fn from(value: Resize) -> Self {
            Msg::Resize(value)
        }
    }

    impl Message for Msg {
        fn message_type(&self) -> &'static str {
            match self {
                Msg::Ping(_) => Ping::NAME,
                Msg::Resize(_) => Resize::NAME,
            }
        }

        fn to_document(&self) -> serde_json::Result<Value> {
            match self {
                Msg::Ping(m) => serde_json::to_value(m),
                Msg::Resize(m) => serde_json::to_value(m),
            }
        }
    }

    fn registry() -> MessageRegistry<Msg> {
        MessageRegistry::new().register::<Ping>().register::<Resize>()
    }

    #[test]
    fn encode_then_decode_reproduces_message() {
        let registry = registry();
        for message in [
            Msg::Ping(Ping { seq: 7 }),
            Msg::Resize(Resize {
                width: 640,
                height: 480,
                label: Some("thumb".into()),
            }),
            Msg::Resize(Resize {
                width: 1,
                height: 1,
                label: None,
            }),
        ] {
            let (tag, document) = registry.encode(&message).unwrap();
            assert_eq!(registry.decode(tag, document).unwrap(), message);
        }
    }

    #[test]
    fn encode_uses_variant_fields_only() {
        let (tag, document) = registry().encode(&Msg::Ping(Ping { seq: 3 })).unwrap();
        assert_eq!(tag, "Ping");
        assert_eq!(document, json!({"seq": 3}));
    }

    #[test]
    fn encode_rejects_unregistered_type() {
        let registry = MessageRegistry::<Msg>::new().register::<Ping>();
        let err = registry
            .encode(&Msg::Resize(Resize {
                width: 1,
                height: 2,
                label: None,
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::UnknownMessageType { ref message_type } if message_type == "Resize"
        ));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = registry().decode("Pong", json!({"seq": 1})).unwrap_err();
        assert!(matches!(err, QueueError::UnknownMessageType { .. }));
    }

    #[test]
    fn decode_rejects_missing_field() {
        let err = registry()
            .decode("Resize", json!({"width": 10}))
            .unwrap_err();
        assert!(matches!(err, QueueError::MalformedPayload { .. }));
    }

    #[test]
    fn decode_rejects_mistyped_field() {
        let err = registry().decode("Ping", json!({"seq": "one"})).unwrap_err();
        assert!(matches!(err, QueueError::MalformedPayload { .. }));
    }

    #[test]
    fn decode_rejects_extra_field() {
        let err = registry()
            .decode("Ping", json!({"seq": 1, "verbose": true}))
            .unwrap_err();
        match err {
            QueueError::MalformedPayload { message_type, reason } => {
                assert_eq!(message_type, "Ping");
                assert!(reason.contains("verbose"), "reason was {reason}");
            }
            other => panic!("expected MalformedPayload, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_non_object_document() {
        let err = registry().decode("Ping", json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, QueueError::MalformedPayload { .. }));
    }

    #[test]
    fn registry_lists_types_sorted() {
        let registry = registry();
        assert_eq!(registry.types().collect::<Vec<_>>(), vec!["Ping", "Resize"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("Ping"));
        assert!(!registry.contains("ping"));
    }
}
