//! Netlink attribute (nlattr) headers and payload accessors.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4; // nla_align(size_of::<NlAttr>())

/// Largest payload a single attribute can carry (`nla_len` is 16 bits).
pub const NLA_MAX_PAYLOAD: usize = u16::MAX as usize - NLA_HDRLEN;

/// Netlink attribute header (mirrors struct nlattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    /// Attribute type.
    pub nla_type: u16,
}

/// Set on every nf_tables container attribute (hook, data, elements).
pub const NLA_F_NESTED: u16 = 1 << 15;
/// Strips the nested and byte order flags off `nla_type`.
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | 1 << 14);

impl NlAttr {
    /// Create a new attribute header.
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + data_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Get the attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Iterator over netlink attributes in a buffer.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Returns (attribute type, payload data).
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLA_HDRLEN {
            return None;
        }

        let attr = match NlAttr::from_bytes(self.data) {
            Ok(a) => a,
            Err(_) => return None,
        };

        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN || len > self.data.len() {
            return None;
        }

        let payload = &self.data[NLA_HDRLEN..len];
        let aligned_len = nla_align(len);

        // Move to next attribute
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some((attr.kind(), payload))
    }
}

/// Helper functions for extracting typed values from attribute payloads.
///
/// nf_tables encodes integers in network byte order, so the big endian
/// accessors are the common case here.
pub mod get {
    use super::*;

    /// Extract a u32 value (big endian / network order).
    pub fn u32_be(data: &[u8]) -> Result<u32> {
        let bytes: [u8; 4] = fixed(data, "u32")?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Extract an i32 value (big endian / network order).
    pub fn i32_be(data: &[u8]) -> Result<i32> {
        let bytes: [u8; 4] = fixed(data, "i32")?;
        Ok(i32::from_be_bytes(bytes))
    }

    /// Extract a u64 value (big endian / network order).
    pub fn u64_be(data: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = fixed(data, "u64")?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Extract a null-terminated string.
    pub fn string(data: &[u8]) -> Result<&str> {
        // Find null terminator or use whole buffer
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..len])
            .map_err(|e| Error::InvalidAttribute(format!("invalid UTF-8: {}", e)))
    }

    fn fixed<const N: usize>(data: &[u8], what: &str) -> Result<[u8; N]> {
        data.get(..N)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::InvalidAttribute(format!("truncated {} attribute", what)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_aligned_attributes() {
        // "t1\0" padded to 4, then a big endian u32
        let data = [
            0x07, 0x00, 0x01, 0x00, b't', b'1', 0x00, 0x00, // NAME
            0x08, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // FLAGS = 1
        ];
        let attrs: Vec<_> = AttrIter::new(&data).collect();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].0, 1);
        assert_eq!(get::string(attrs[0].1).unwrap(), "t1");
        assert_eq!(attrs[1].0, 2);
        assert_eq!(get::u32_be(attrs[1].1).unwrap(), 1);
    }

    #[test]
    fn nested_flag_is_masked() {
        let data = [0x04, 0x00, 0x03, 0x80];
        let (kind, payload) = AttrIter::new(&data).next().unwrap();
        assert_eq!(kind, 3);
        assert!(payload.is_empty());
    }

    #[test]
    fn truncated_integers_are_rejected() {
        assert!(get::u32_be(&[0, 1]).is_err());
        assert!(get::u64_be(&[0; 7]).is_err());
        assert_eq!(get::u64_be(&[0, 0, 0, 0, 0, 0, 0, 9]).unwrap(), 9);
    }
}
