//! nf_tables protocol constants and small wire enums.

/// nfnetlink subsystem id of nf_tables.
pub const NFNL_SUBSYS_NFTABLES: u8 = 10;

/// Batch begin marker message type (outside any subsystem).
pub const NFNL_MSG_BATCH_BEGIN: u16 = 0x10;
/// Batch end marker message type.
pub const NFNL_MSG_BATCH_END: u16 = 0x11;

/// Multicast group carrying nf_tables change notifications.
pub const NFNLGRP_NFTABLES: u32 = 7;

/// Build the netlink message type for an nf_tables command.
#[inline]
pub const fn nft_msg_type(cmd: u8) -> u16 {
    ((NFNL_SUBSYS_NFTABLES as u16) << 8) | cmd as u16
}

/// nf_tables commands (`enum nf_tables_msg_types`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NftMsg {
    NewTable = 0,
    GetTable = 1,
    DelTable = 2,
    NewChain = 3,
    GetChain = 4,
    DelChain = 5,
    NewRule = 6,
    GetRule = 7,
    DelRule = 8,
    NewSet = 9,
    GetSet = 10,
    DelSet = 11,
    NewSetElem = 12,
    GetSetElem = 13,
    DelSetElem = 14,
    NewGen = 15,
    GetGen = 16,
    Trace = 17,
    NewObj = 18,
    GetObj = 19,
    DelObj = 20,
    GetObjReset = 21,
}

impl NftMsg {
    /// Decode a command byte.
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0 => Self::NewTable,
            1 => Self::GetTable,
            2 => Self::DelTable,
            3 => Self::NewChain,
            4 => Self::GetChain,
            5 => Self::DelChain,
            6 => Self::NewRule,
            7 => Self::GetRule,
            8 => Self::DelRule,
            9 => Self::NewSet,
            10 => Self::GetSet,
            11 => Self::DelSet,
            12 => Self::NewSetElem,
            13 => Self::GetSetElem,
            14 => Self::DelSetElem,
            15 => Self::NewGen,
            16 => Self::GetGen,
            17 => Self::Trace,
            18 => Self::NewObj,
            19 => Self::GetObj,
            20 => Self::DelObj,
            21 => Self::GetObjReset,
            _ => return None,
        })
    }

    /// Full netlink message type.
    pub fn msg_type(self) -> u16 {
        nft_msg_type(self as u8)
    }

    /// Short lowercase name, used in logs and monitor output.
    pub fn name(self) -> &'static str {
        match self {
            Self::NewTable => "newtable",
            Self::GetTable => "gettable",
            Self::DelTable => "deltable",
            Self::NewChain => "newchain",
            Self::GetChain => "getchain",
            Self::DelChain => "delchain",
            Self::NewRule => "newrule",
            Self::GetRule => "getrule",
            Self::DelRule => "delrule",
            Self::NewSet => "newset",
            Self::GetSet => "getset",
            Self::DelSet => "delset",
            Self::NewSetElem => "newsetelem",
            Self::GetSetElem => "getsetelem",
            Self::DelSetElem => "delsetelem",
            Self::NewGen => "newgen",
            Self::GetGen => "getgen",
            Self::Trace => "trace",
            Self::NewObj => "newobj",
            Self::GetObj => "getobj",
            Self::DelObj => "delobj",
            Self::GetObjReset => "getobj-reset",
        }
    }
}

/// Address family of an nf_tables object (NFPROTO_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
#[cfg_attr(feature = "output", serde(into = "&'static str"))]
pub enum Family {
    /// Any family (dumps across all families).
    #[default]
    Unspec,
    /// Dual-stack `inet` tables.
    Inet,
    /// IPv4.
    Ip,
    /// ARP.
    Arp,
    /// Ingress/egress on a device.
    Netdev,
    /// Bridge.
    Bridge,
    /// IPv6.
    Ip6,
    /// A family this crate has no name for.
    Other(u8),
}

impl Family {
    /// Decode an NFPROTO value.
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Unspec,
            1 => Self::Inet,
            2 => Self::Ip,
            3 => Self::Arp,
            5 => Self::Netdev,
            7 => Self::Bridge,
            10 => Self::Ip6,
            other => Self::Other(other),
        }
    }

    /// The NFPROTO value.
    pub fn number(self) -> u8 {
        match self {
            Self::Unspec => 0,
            Self::Inet => 1,
            Self::Ip => 2,
            Self::Arp => 3,
            Self::Netdev => 5,
            Self::Bridge => 7,
            Self::Ip6 => 10,
            Self::Other(n) => n,
        }
    }

    /// Name as used by the nft command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unspec => "unspec",
            Self::Inet => "inet",
            Self::Ip => "ip",
            Self::Arp => "arp",
            Self::Netdev => "netdev",
            Self::Bridge => "bridge",
            Self::Ip6 => "ip6",
            Self::Other(_) => "unknown",
        }
    }
}

impl From<Family> for &'static str {
    fn from(family: Family) -> Self {
        family.name()
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(n) => write!(f, "family{}", n),
            _ => f.write_str(self.name()),
        }
    }
}

impl std::str::FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inet" => Ok(Self::Inet),
            "ip" | "ip4" | "ipv4" => Ok(Self::Ip),
            "ip6" | "ipv6" => Ok(Self::Ip6),
            "arp" => Ok(Self::Arp),
            "netdev" => Ok(Self::Netdev),
            "bridge" => Ok(Self::Bridge),
            "all" | "unspec" => Ok(Self::Unspec),
            other => Err(format!("unknown family '{}'", other)),
        }
    }
}

/// Table attributes (`NFTA_TABLE_*`).
pub mod table_attr {
    pub const NAME: u16 = 1;
    pub const FLAGS: u16 = 2;
    pub const USE: u16 = 3;
    pub const HANDLE: u16 = 4;
}

/// Chain attributes (`NFTA_CHAIN_*`).
pub mod chain_attr {
    pub const TABLE: u16 = 1;
    pub const HANDLE: u16 = 2;
    pub const NAME: u16 = 3;
    pub const HOOK: u16 = 4;
    pub const POLICY: u16 = 5;
    pub const USE: u16 = 6;
    pub const TYPE: u16 = 7;

    /// Nested inside [`HOOK`].
    pub const HOOK_HOOKNUM: u16 = 1;
    pub const HOOK_PRIORITY: u16 = 2;
    pub const HOOK_DEV: u16 = 3;
}

/// Rule attributes (`NFTA_RULE_*`).
pub mod rule_attr {
    pub const TABLE: u16 = 1;
    pub const CHAIN: u16 = 2;
    pub const HANDLE: u16 = 3;
    pub const EXPRESSIONS: u16 = 4;
    pub const POSITION: u16 = 6;
    pub const USERDATA: u16 = 7;
}

/// Set attributes (`NFTA_SET_*`).
pub mod set_attr {
    pub const TABLE: u16 = 1;
    pub const NAME: u16 = 2;
    pub const FLAGS: u16 = 3;
    pub const KEY_TYPE: u16 = 4;
    pub const KEY_LEN: u16 = 5;
    pub const DATA_TYPE: u16 = 6;
    pub const DATA_LEN: u16 = 7;
    pub const ID: u16 = 10;
    pub const HANDLE: u16 = 16;
}

/// Set element list attributes (`NFTA_SET_ELEM_LIST_*`, `NFTA_SET_ELEM_*`).
pub mod set_elem_attr {
    pub const LIST_TABLE: u16 = 1;
    pub const LIST_SET: u16 = 2;
    pub const LIST_ELEMENTS: u16 = 3;
    pub const LIST_SET_ID: u16 = 4;

    /// One element inside [`LIST_ELEMENTS`].
    pub const LIST_ELEM: u16 = 1;

    pub const KEY: u16 = 1;
    pub const DATA: u16 = 2;
    pub const FLAGS: u16 = 3;

    /// `NFTA_DATA_VALUE`, wraps key and data bytes.
    pub const DATA_VALUE: u16 = 1;
}

/// Stateful object attributes (`NFTA_OBJ_*`).
pub mod obj_attr {
    pub const TABLE: u16 = 1;
    pub const NAME: u16 = 2;
    pub const TYPE: u16 = 3;
    pub const DATA: u16 = 4;
    pub const USE: u16 = 5;
    pub const HANDLE: u16 = 6;
}

/// Generation attributes (`NFTA_GEN_*`).
pub mod gen_attr {
    pub const ID: u16 = 1;
    pub const PROC_PID: u16 = 2;
    pub const PROC_NAME: u16 = 3;
}

/// Stateful object types (`NFT_OBJECT_*`).
pub mod object_type {
    pub const UNSPEC: u32 = 0;
    pub const COUNTER: u32 = 1;
    pub const QUOTA: u32 = 2;
    pub const CT_HELPER: u32 = 3;
    pub const LIMIT: u32 = 4;
    pub const CONNLIMIT: u32 = 5;
    pub const TUNNEL: u32 = 6;
    pub const CT_TIMEOUT: u32 = 7;
    pub const SECMARK: u32 = 8;
    pub const CT_EXPECT: u32 = 9;
    pub const SYNPROXY: u32 = 10;

    /// Name as used by the nft command line.
    pub fn name(kind: u32) -> &'static str {
        match kind {
            COUNTER => "counter",
            QUOTA => "quota",
            CT_HELPER => "ct helper",
            LIMIT => "limit",
            CONNLIMIT => "connlimit",
            TUNNEL => "tunnel",
            CT_TIMEOUT => "ct timeout",
            SECMARK => "secmark",
            CT_EXPECT => "ct expectation",
            SYNPROXY => "synproxy",
            _ => "unknown",
        }
    }
}

/// Netfilter hook numbers, for display.
pub fn hook_name(family: Family, hooknum: u32) -> &'static str {
    match (family, hooknum) {
        (Family::Netdev, 0) => "ingress",
        (Family::Netdev, 1) => "egress",
        (Family::Arp, 0) => "input",
        (Family::Arp, 1) => "output",
        (_, 0) => "prerouting",
        (_, 1) => "input",
        (_, 2) => "forward",
        (_, 3) => "output",
        (_, 4) => "postrouting",
        (_, 5) => "ingress",
        _ => "unknown",
    }
}

/// Inverse of [`hook_name`].
pub fn hook_number(family: Family, name: &str) -> Option<u32> {
    (0..=5).find(|&n| hook_name(family, n) == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_types() {
        assert_eq!(NftMsg::NewTable.msg_type(), 0x0a00);
        assert_eq!(NftMsg::GetGen.msg_type(), 0x0a10);
        assert_eq!(NftMsg::from_u8(21), Some(NftMsg::GetObjReset));
        assert_eq!(NftMsg::from_u8(22), None);
    }

    #[test]
    fn family_roundtrip() {
        for n in [0u8, 1, 2, 3, 5, 7, 10, 42] {
            assert_eq!(Family::from_u8(n).number(), n);
        }
        assert_eq!("ip6".parse::<Family>().unwrap(), Family::Ip6);
        assert!("nope".parse::<Family>().is_err());
        assert_eq!(Family::Other(42).to_string(), "family42");
    }

    #[test]
    fn hooks() {
        assert_eq!(hook_name(Family::Inet, 4), "postrouting");
        assert_eq!(hook_number(Family::Inet, "input"), Some(1));
        assert_eq!(hook_number(Family::Netdev, "ingress"), Some(0));
        assert_eq!(hook_number(Family::Ip, "bogus"), None);
    }
}
