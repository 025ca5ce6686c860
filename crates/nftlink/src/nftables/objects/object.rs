//! nf_tables stateful objects (counters, quotas, limits, ...).

use crate::netlink::attr::get;
use crate::netlink::{Message, MessageBuilder, Result};
use crate::nftables::types::{Family, obj_attr, object_type};

use super::{NftObject, ObjectKind, missing, split_payload};

/// A named stateful object.
///
/// `data` holds the encoded content of the `NFTA_OBJ_DATA` nest, whose
/// layout depends on `obj_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct Object {
    pub family: Family,
    pub table: String,
    pub name: String,
    /// `NFT_OBJECT_*` type.
    pub obj_type: u32,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub handle: Option<u64>,
    #[cfg_attr(feature = "output", serde(skip))]
    pub data: Vec<u8>,
    pub use_count: u32,
}

impl Object {
    /// Create an object of `obj_type`.
    pub fn new(
        family: Family,
        table: impl Into<String>,
        name: impl Into<String>,
        obj_type: u32,
    ) -> Self {
        Self {
            family,
            table: table.into(),
            name: name.into(),
            obj_type,
            ..Default::default()
        }
    }

    /// Attach encoded type-specific data.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Type name for display.
    pub fn type_name(&self) -> &'static str {
        object_type::name(self.obj_type)
    }
}

impl NftObject for Object {
    const KIND: ObjectKind = ObjectKind::Object;

    fn family(&self) -> Family {
        self.family
    }

    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()> {
        if !self.table.is_empty() {
            msg.append_attr_str(obj_attr::TABLE, &self.table);
        }
        if !self.name.is_empty() {
            msg.append_attr_str(obj_attr::NAME, &self.name);
        }
        if self.obj_type != object_type::UNSPEC {
            msg.append_attr_u32_be(obj_attr::TYPE, self.obj_type);
        }
        if let Some(handle) = self.handle {
            msg.append_attr_u64_be(obj_attr::HANDLE, handle);
        }
        if !self.data.is_empty() {
            let nest = msg.nest_start(obj_attr::DATA);
            msg.append_bytes(&self.data);
            msg.nest_end(nest)?;
        }
        Ok(())
    }

    fn parse(msg: &Message<'_>) -> Result<Self> {
        let (header, attrs) = split_payload(msg)?;
        let mut obj = Object {
            family: Family::from_u8(header.family),
            ..Default::default()
        };

        for (kind, data) in attrs {
            match kind {
                obj_attr::TABLE => obj.table = get::string(data)?.to_string(),
                obj_attr::NAME => obj.name = get::string(data)?.to_string(),
                obj_attr::TYPE => obj.obj_type = get::u32_be(data)?,
                obj_attr::HANDLE => obj.handle = Some(get::u64_be(data)?),
                obj_attr::DATA => obj.data = data.to_vec(),
                obj_attr::USE => obj.use_count = get::u32_be(data)?,
                _ => {}
            }
        }

        if obj.table.is_empty() || obj.name.is_empty() {
            return Err(missing(Self::KIND, "table or name"));
        }
        Ok(obj)
    }
}

/// Selects the objects an object read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFilter {
    /// Restrict to one table.
    pub table: Option<String>,
    /// Restrict to one object name (with `table`, a single get).
    pub name: Option<String>,
    /// Restrict to one `NFT_OBJECT_*` type; `UNSPEC` matches all.
    pub obj_type: u32,
    /// Dump every match instead of getting exactly one object.
    pub dump: bool,
    /// Reset stateful counters while reading them.
    pub reset: bool,
}

impl Default for ObjectFilter {
    fn default() -> Self {
        Self {
            table: None,
            name: None,
            obj_type: object_type::UNSPEC,
            dump: true,
            reset: false,
        }
    }
}

impl ObjectFilter {
    /// Dump all objects.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Get one named object instead of dumping.
    pub fn named(mut self, table: impl Into<String>, name: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self.name = Some(name.into());
        self.dump = false;
        self
    }

    /// Restrict to one object type.
    pub fn obj_type(mut self, obj_type: u32) -> Self {
        self.obj_type = obj_type;
        self
    }

    /// Reset counters as they are read.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// The selector object sent with the request.
    pub(crate) fn selector(&self, family: Family) -> Object {
        Object {
            family,
            table: self.table.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            obj_type: self.obj_type,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nftables::frame::build_header;
    use crate::nftables::objects::test_util::with_message;
    use crate::nftables::types::NftMsg;

    #[test]
    fn counter_survives_the_wire() {
        // NFTA_COUNTER_BYTES = 4096 (be64) inside the data nest
        let data = [
            0x0c, 0x00, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0x10, 0x00,
        ];
        let obj = Object::new(Family::Inet, "t", "hits", object_type::COUNTER).with_data(data);
        let mut msg = build_header(NftMsg::NewObj, obj.family, 0, 1);
        obj.write_payload(&mut msg).unwrap();

        let parsed = with_message(msg, |m| Object::parse(m)).unwrap();
        assert_eq!(parsed, obj);
        assert_eq!(parsed.type_name(), "counter");
    }

    #[test]
    fn filter_selector() {
        let filter = ObjectFilter::all()
            .table("t")
            .obj_type(object_type::QUOTA);
        assert!(filter.dump);
        let sel = filter.selector(Family::Ip);
        assert_eq!(sel.table, "t");
        assert!(sel.name.is_empty());
        assert_eq!(sel.obj_type, object_type::QUOTA);

        let single = ObjectFilter::all().named("t", "q");
        assert!(!single.dump);
    }
}
