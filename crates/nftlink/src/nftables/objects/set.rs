//! nf_tables sets and set elements.

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::{Message, MessageBuilder, Result};
use crate::nftables::types::{Family, set_attr, set_elem_attr};

use super::{NftObject, ObjectKind, missing, split_payload};

/// Soft limit on the size of one set element message (libc `BUFSIZ`).
///
/// Elements are appended until a message grows past this, then the rest go
/// into another message with the same header.
pub const ELEMENT_CHUNK_SIZE: usize = 8192;

/// One set element: a key and, for maps, the data it maps to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct SetElement {
    /// Key bytes in network order.
    pub key: Vec<u8>,
    /// Mapped value for maps.
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub data: Option<Vec<u8>>,
    /// `NFT_SET_ELEM_*` flags (e.g. interval end).
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub flags: Option<u32>,
}

impl SetElement {
    /// Element with the given key.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Map element: `key : data`.
    pub fn mapping(key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            data: Some(data.into()),
            flags: None,
        }
    }

    fn write(&self, msg: &mut MessageBuilder) -> Result<()> {
        let elem = msg.nest_start(set_elem_attr::LIST_ELEM);

        let key = msg.nest_start(set_elem_attr::KEY);
        msg.try_append_attr(set_elem_attr::DATA_VALUE, &self.key)?;
        msg.nest_end(key)?;

        if let Some(data) = &self.data {
            let nest = msg.nest_start(set_elem_attr::DATA);
            msg.try_append_attr(set_elem_attr::DATA_VALUE, data)?;
            msg.nest_end(nest)?;
        }
        if let Some(flags) = self.flags {
            msg.append_attr_u32_be(set_elem_attr::FLAGS, flags);
        }

        msg.nest_end(elem)
    }

    fn parse(data: &[u8]) -> Result<Self> {
        let mut elem = SetElement::default();
        for (kind, value) in AttrIter::new(data) {
            match kind {
                set_elem_attr::KEY => elem.key = data_value(value),
                set_elem_attr::DATA => elem.data = Some(data_value(value)),
                set_elem_attr::FLAGS => elem.flags = Some(get::u32_be(value)?),
                _ => {}
            }
        }
        Ok(elem)
    }
}

/// Unwrap an `NFTA_DATA_VALUE` nest.
fn data_value(nest: &[u8]) -> Vec<u8> {
    AttrIter::new(nest)
        .find(|(kind, _)| *kind == set_elem_attr::DATA_VALUE)
        .map(|(_, value)| value.to_vec())
        .unwrap_or_default()
}

fn parse_elements(list: &[u8]) -> Result<Vec<SetElement>> {
    AttrIter::new(list)
        .filter(|(kind, _)| *kind == set_elem_attr::LIST_ELEM)
        .map(|(_, data)| SetElement::parse(data))
        .collect()
}

/// A named set (or map when `data_type` is present).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct Set {
    pub family: Family,
    pub table: String,
    pub name: String,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub handle: Option<u64>,
    /// `NFT_SET_*` flags.
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub flags: Option<u32>,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub key_type: Option<u32>,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub key_len: Option<u32>,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub data_type: Option<u32>,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub data_len: Option<u32>,
    /// Transaction-local id, lets later messages of a batch refer to a set
    /// created earlier in the same batch.
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub id: Option<u32>,
    /// Elements, filled by element reads or staged for element writes.
    pub elements: Vec<SetElement>,
}

impl Set {
    /// Reference an existing set by table and name.
    pub fn new(family: Family, table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            family,
            table: table.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Declare the key type and length.
    pub fn with_key(mut self, key_type: u32, key_len: u32) -> Self {
        self.key_type = Some(key_type);
        self.key_len = Some(key_len);
        self
    }

    /// Declare the mapped data type and length, turning the set into a map.
    pub fn with_data(mut self, data_type: u32, data_len: u32) -> Self {
        self.data_type = Some(data_type);
        self.data_len = Some(data_len);
        self
    }

    /// Set the `NFT_SET_*` flags.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Set the transaction-local id.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Add an element.
    pub fn with_element(mut self, element: SetElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Check whether this set maps keys to data.
    pub fn is_map(&self) -> bool {
        self.data_type.is_some()
    }

    /// Write the attributes naming this set in an element message.
    pub fn write_element_header(&self, msg: &mut MessageBuilder) {
        if !self.table.is_empty() {
            msg.append_attr_str(set_elem_attr::LIST_TABLE, &self.table);
        }
        if !self.name.is_empty() {
            msg.append_attr_str(set_elem_attr::LIST_SET, &self.name);
        }
        if let Some(id) = self.id {
            msg.append_attr_u32_be(set_elem_attr::LIST_SET_ID, id);
        }
    }

    /// Write the element list header and as many of `elements` as fit in
    /// one message of [`ELEMENT_CHUNK_SIZE`].
    ///
    /// At least one element is always written. Returns how many were.
    pub fn write_element_chunk(
        &self,
        msg: &mut MessageBuilder,
        elements: &[SetElement],
    ) -> Result<usize> {
        self.write_element_header(msg);
        if elements.is_empty() {
            return Ok(0);
        }

        let list = msg.nest_start(set_elem_attr::LIST_ELEMENTS);
        let mut written = 0;
        for element in elements {
            element.write(msg)?;
            written += 1;
            if msg.len() > ELEMENT_CHUNK_SIZE {
                break;
            }
        }
        msg.nest_end(list)?;
        Ok(written)
    }

    /// Merge the elements of an element message into this set.
    pub fn merge_elements(&mut self, msg: &Message<'_>) -> Result<()> {
        let list = SetElementList::parse(msg)?;
        self.elements.extend(list.elements);
        Ok(())
    }
}

impl NftObject for Set {
    const KIND: ObjectKind = ObjectKind::Set;

    fn family(&self) -> Family {
        self.family
    }

    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()> {
        if !self.table.is_empty() {
            msg.append_attr_str(set_attr::TABLE, &self.table);
        }
        if !self.name.is_empty() {
            msg.append_attr_str(set_attr::NAME, &self.name);
        }
        if let Some(handle) = self.handle {
            msg.append_attr_u64_be(set_attr::HANDLE, handle);
        }
        if let Some(flags) = self.flags {
            msg.append_attr_u32_be(set_attr::FLAGS, flags);
        }
        if let Some(key_type) = self.key_type {
            msg.append_attr_u32_be(set_attr::KEY_TYPE, key_type);
        }
        if let Some(key_len) = self.key_len {
            msg.append_attr_u32_be(set_attr::KEY_LEN, key_len);
        }
        if let Some(data_type) = self.data_type {
            msg.append_attr_u32_be(set_attr::DATA_TYPE, data_type);
        }
        if let Some(data_len) = self.data_len {
            msg.append_attr_u32_be(set_attr::DATA_LEN, data_len);
        }
        if let Some(id) = self.id {
            msg.append_attr_u32_be(set_attr::ID, id);
        }
        Ok(())
    }

    fn parse(msg: &Message<'_>) -> Result<Self> {
        let (header, attrs) = split_payload(msg)?;
        let mut set = Set {
            family: Family::from_u8(header.family),
            ..Default::default()
        };

        for (kind, data) in attrs {
            match kind {
                set_attr::TABLE => set.table = get::string(data)?.to_string(),
                set_attr::NAME => set.name = get::string(data)?.to_string(),
                set_attr::HANDLE => set.handle = Some(get::u64_be(data)?),
                set_attr::FLAGS => set.flags = Some(get::u32_be(data)?),
                set_attr::KEY_TYPE => set.key_type = Some(get::u32_be(data)?),
                set_attr::KEY_LEN => set.key_len = Some(get::u32_be(data)?),
                set_attr::DATA_TYPE => set.data_type = Some(get::u32_be(data)?),
                set_attr::DATA_LEN => set.data_len = Some(get::u32_be(data)?),
                set_attr::ID => set.id = Some(get::u32_be(data)?),
                _ => {}
            }
        }

        if set.table.is_empty() || set.name.is_empty() {
            return Err(missing(Self::KIND, "table or name"));
        }
        Ok(set)
    }
}

/// The elements carried by one element message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct SetElementList {
    pub family: Family,
    pub table: String,
    pub set: String,
    pub elements: Vec<SetElement>,
}

impl NftObject for SetElementList {
    const KIND: ObjectKind = ObjectKind::SetElements;

    fn family(&self) -> Family {
        self.family
    }

    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()> {
        msg.append_attr_str(set_elem_attr::LIST_TABLE, &self.table);
        msg.append_attr_str(set_elem_attr::LIST_SET, &self.set);
        if !self.elements.is_empty() {
            let list = msg.nest_start(set_elem_attr::LIST_ELEMENTS);
            for element in &self.elements {
                element.write(msg)?;
            }
            msg.nest_end(list)?;
        }
        Ok(())
    }

    fn parse(msg: &Message<'_>) -> Result<Self> {
        let (header, attrs) = split_payload(msg)?;
        let mut list = SetElementList {
            family: Family::from_u8(header.family),
            ..Default::default()
        };

        for (kind, data) in attrs {
            match kind {
                set_elem_attr::LIST_TABLE => list.table = get::string(data)?.to_string(),
                set_elem_attr::LIST_SET => list.set = get::string(data)?.to_string(),
                set_elem_attr::LIST_ELEMENTS => list.elements = parse_elements(data)?,
                _ => {}
            }
        }

        if list.set.is_empty() {
            return Err(missing(Self::KIND, "set name"));
        }
        Ok(list)
    }
}
