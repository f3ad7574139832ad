//! Event blocks: the nodes of the causal DAG.
//!
//! An event is `{ parents, data }` where `data` is an arbitrary payload the
//! caller can round-trip through the deterministic codec. Events with zero
//! parents are genesis events. The encoded wire form is a canonical map, so
//! the same event built by independent writers hashes to the same link.

use scuttle_block::{cbor, Block, BlockFetcher, CodecError, Link, Value};
use thiserror::Error;

/// Errors surfaced by the causal DAG clock.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClockError {
    /// A referenced event block is absent from the store.
    #[error("missing block: {0}")]
    MissingBlock(Link),

    /// Block bytes did not decode to a well-formed event.
    #[error("malformed event: {0}")]
    MalformedEvent(Link),
}

/// Payload codec: anything that can round-trip through a codec [`Value`]
/// can ride inside an event.
pub trait Payload: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

impl Payload for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl Payload for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl Payload for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

/// A causal event: multi-parent links plus an opaque payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event<T> {
    pub parents: Vec<Link>,
    pub data: T,
}

impl<T: Payload> Event<T> {
    pub fn new(data: T, parents: Vec<Link>) -> Self {
        Event { parents, data }
    }

    fn to_cbor(&self) -> Value {
        let mut map = std::collections::BTreeMap::new();
        map.insert("data".to_string(), self.data.to_value());
        map.insert(
            "parents".to_string(),
            Value::Array(self.parents.iter().map(|p| Value::Link(*p)).collect()),
        );
        Value::Map(map)
    }

    fn from_cbor(value: &Value) -> Option<Self> {
        let map = match value {
            Value::Map(map) => map,
            _ => return None,
        };
        if map.len() != 2 {
            return None;
        }
        let data = T::from_value(map.get("data")?)?;
        let parents = map
            .get("parents")?
            .as_array()?
            .iter()
            .map(|p| p.as_link())
            .collect::<Option<Vec<Link>>>()?;
        Some(Event { parents, data })
    }
}

/// An encoded event together with its link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBlock<T> {
    pub link: Link,
    pub bytes: Vec<u8>,
    pub event: Event<T>,
}

impl<T: Payload> EventBlock<T> {
    /// Encode an event, addressing the block by its bytes.
    pub fn encode(event: Event<T>) -> Self {
        let Block { link, bytes } = Block::encode(&event.to_cbor());
        EventBlock {
            link,
            bytes,
            event,
        }
    }

    /// Decode event bytes fetched from a store.
    pub fn decode(link: Link, bytes: Vec<u8>) -> Result<Self, ClockError> {
        let value = decode_cbor(link, &bytes)?;
        let event = Event::from_cbor(&value).ok_or(ClockError::MalformedEvent(link))?;
        Ok(EventBlock {
            link,
            bytes,
            event,
        })
    }

    /// Convert to a plain block for persistence by the caller.
    pub fn as_block(&self) -> Block {
        Block {
            link: self.link,
            bytes: self.bytes.clone(),
        }
    }
}

fn decode_cbor(link: Link, bytes: &[u8]) -> Result<Value, ClockError> {
    cbor::decode(bytes).map_err(|_: CodecError| ClockError::MalformedEvent(link))
}

/// Fetches and decodes events through a [`BlockFetcher`].
pub struct EventFetcher<'a, S: ?Sized> {
    blocks: &'a S,
}

impl<'a, S: BlockFetcher + ?Sized> EventFetcher<'a, S> {
    pub fn new(blocks: &'a S) -> Self {
        EventFetcher { blocks }
    }

    /// Fetch and fully decode an event.
    pub async fn get<T: Payload>(&self, link: &Link) -> Result<EventBlock<T>, ClockError> {
        let block = self
            .blocks
            .get(link)
            .await
            .ok_or(ClockError::MissingBlock(*link))?;
        EventBlock::decode(block.link, block.bytes)
    }

    /// Fetch an event and read just its parent links, leaving the payload
    /// opaque. Head maintenance never needs the payload.
    pub async fn parents(&self, link: &Link) -> Result<Vec<Link>, ClockError> {
        let block = self
            .blocks
            .get(link)
            .await
            .ok_or(ClockError::MissingBlock(*link))?;
        let value = decode_cbor(block.link, &block.bytes)?;
        let event: Event<Value> =
            Event::from_cbor(&value).ok_or(ClockError::MalformedEvent(block.link))?;
        Ok(event.parents)
    }
}
