//! Purpose: Model stored configuration items as they travel on the wire.
//! Exports: `Item`, `ItemList`, `Link`, `Tag`.
//! Role: Opaque carriers; values stay raw bytes until a caller asks for a type.
//! Invariants: Items are immutable after decoding; the client never re-sorts lists.
//! Invariants: List conversion is all-or-nothing; no partial vectors escape.
use super::codec::{base64_bytes, overlay};
use crate::core::error::{Error, ErrorKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// One stored configuration item before it is interpreted as a concrete type.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Item {
    key: String,
    #[serde(rename = "type")]
    item_type: String,
    #[serde(with = "base64_bytes")]
    value: Vec<u8>,
    #[serde(with = "time::serde::rfc3339", default = "unix_epoch")]
    updated: OffsetDateTime,
}

fn unix_epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

impl Item {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    /// Raw stored payload, usually JSON.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Last write time as recorded by the service.
    pub fn updated(&self) -> OffsetDateTime {
        self.updated
    }

    pub fn value_json(&self) -> Result<Value, Error> {
        serde_json::from_slice(&self.value).map_err(|err| self.decode_error(err))
    }

    /// Decodes the stored value into a fresh `T`.
    pub fn typed<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.value).map_err(|err| self.decode_error(err))
    }

    /// Decodes the stored value into `prototype` and hands the same slot back.
    ///
    /// Top-level fields the stored value does not mention keep the prototype's
    /// values; a mentioned field is replaced whole. Unknown stored fields are
    /// ignored. On error the prototype is untouched.
    pub fn typed_into<'a, T>(&self, prototype: &'a mut T) -> Result<&'a mut T, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        let stored = self.value_json()?;
        let mut merged = serde_json::to_value(&*prototype).map_err(|err| {
            Error::new(ErrorKind::Encode)
                .with_message("failed to encode prototype")
                .with_key(self.key.clone())
                .with_source(err)
        })?;
        overlay(&mut merged, stored);
        *prototype = serde_json::from_value(merged).map_err(|err| self.decode_error(err))?;
        Ok(prototype)
    }

    fn decode_error(&self, err: serde_json::Error) -> Error {
        Error::new(ErrorKind::Decode)
            .with_message(format!("cannot decode item value of type '{}'", self.item_type))
            .with_key(self.key.clone())
            .with_source(err)
    }
}

/// Items in the order the service returned them.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemList {
    items: Vec<Item>,
}

impl ItemList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.iter().map(Item::key)
    }

    /// Converts every item into a slot produced by `factory`.
    ///
    /// The first failing item aborts the whole conversion.
    pub fn typed<T, F>(&self, mut factory: F) -> Result<Vec<T>, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> T,
    {
        self.items
            .iter()
            .map(|item| {
                let mut slot = factory();
                item.typed_into(&mut slot)?;
                Ok(slot)
            })
            .collect()
    }
}

impl FromIterator<Item> for ItemList {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ItemList {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a ItemList {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Directed relation between two item keys.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Link {
    pub from: String,
    pub to: String,
}

impl Link {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Name/value label attached to an item.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    pub item_key: String,
    pub name: String,
    pub value: Option<String>,
}

impl Tag {
    pub fn new(item_key: impl Into<String>, name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            item_key: item_key.into(),
            name: name.into(),
            value: value.filter(|value| !value.is_empty()).map(str::to_string),
        }
    }

    /// Route segment for the tag: `name` or `name|value`.
    pub fn segment(&self) -> Result<String, Error> {
        if self.name.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("a tag name is required")
                .with_key(self.item_key.clone()));
        }
        Ok(match &self.value {
            Some(value) => format!("{}|{}", self.name, value),
            None => self.name.clone(),
        })
    }
}
