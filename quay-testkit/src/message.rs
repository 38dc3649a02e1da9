use quay::{Message, MessageRegistry, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Print a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub message: String,
}

impl MessageType for Echo {
    const NAME: &'static str = "Echo";
}

/// Add two numbers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Add {
    pub a: i64,
    pub b: i64,
}

impl MessageType for Add {
    const NAME: &'static str = "Add";
}

/// A job whose outcome is decided by the handler's failure plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SometimesFail {}

impl MessageType for SometimesFail {
    const NAME: &'static str = "SometimesFail";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestMessage {
    Echo(Echo),
    Add(Add),
    SometimesFail(SometimesFail),
}

impl TestMessage {
    pub fn echo(message: impl Into<String>) -> Self {
        TestMessage::Echo(Echo {
            message: message.into(),
        })
    }

    pub fn add(a: i64, b: i64) -> Self {
        TestMessage::Add(Add { a, b })
    }

    pub fn sometimes_fail() -> Self {
        TestMessage::SometimesFail(SometimesFail {})
    }
}

impl From<Echo> for TestMessage {
    fn from(value: Echo) -> Self {
        TestMessage::Echo(value)
    }
}

impl From<Add> for TestMessage {
    fn from(value: Add) -> Self {
        TestMessage::Add(value)
    }
}

impl From<SometimesFail> for TestMessage {
    fn from(value: SometimesFail) -> Self {
        TestMessage::SometimesFail(value)
    }
}

impl Message for TestMessage {
    fn message_type(&self) -> &'static str {
        match self {
            TestMessage::Echo(_) => Echo::NAME,
            TestMessage::Add(_) => Add::NAME,
            TestMessage::SometimesFail(_) => SometimesFail::NAME,
        }
    }

    fn to_document(&self) -> serde_json::Result<Value> {
        match self {
            TestMessage::Echo(m) => serde_json::to_value(m),
            TestMessage::Add(m) => serde_json::to_value(m),
            TestMessage::SometimesFail(m) => serde_json::to_value(m),
        }
    }
}

/// Registry accepting all three fixture types.
pub fn test_registry() -> MessageRegistry<TestMessage> {
    MessageRegistry::new()
        .register::<Echo>()
        .register::<Add>()
        .register::<SometimesFail>()
}
