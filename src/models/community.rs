use std::fmt;
use std::net::Ipv6Addr;

use itertools::Itertools;

/// Standard community (RFC 1997), "asn:value"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Community {
    pub asn: u16,
    pub value: u16,
}

impl Community {
    pub fn new(asn: u16, value: u16) -> Self {
        Self { asn, value }
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asn, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtCommunity {
    /// 8 byte form (RFC 4360): type, subtype and 6 value bytes
    Regular {
        kind: u8,
        subtype: u8,
        value: [u8; 6],
    },
    /// 20 byte IPv6 address specific form (RFC 5701)
    Ipv6 {
        kind: u8,
        subtype: u8,
        global: Ipv6Addr,
        local: u16,
    },
}

impl ExtCommunity {
    pub fn is_ipv6(&self) -> bool {
        matches!(self, ExtCommunity::Ipv6 { .. })
    }
}

impl fmt::Display for ExtCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtCommunity::Regular {
                kind,
                subtype,
                value,
            } => write!(
                f,
                "{}:{}:{}",
                kind,
                subtype,
                value.iter().map(|b| format!("{:02x}", b)).join("")
            ),
            ExtCommunity::Ipv6 {
                kind,
                subtype,
                global,
                local,
            } => write!(f, "{}:{}:[{}]:{}", kind, subtype, global, local),
        }
    }
}

/// Large community (RFC 8092), "global:local1:local2"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargeCommunity {
    pub global: u32,
    pub local1: u32,
    pub local2: u32,
}

impl LargeCommunity {
    pub fn new(global: u32, local1: u32, local2: u32) -> Self {
        Self {
            global,
            local1,
            local2,
        }
    }
}

impl fmt::Display for LargeCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.global, self.local1, self.local2)
    }
}

/// Space separated rendering of any community list
pub struct CommunityList<'a, T>(pub &'a [T]);

impl<'a, T: fmt::Display> fmt::Display for CommunityList<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_list_display() {
        assert_eq!(
            CommunityList(&[Community::new(65000, 100), Community::new(65000, 200)]).to_string(),
            "65000:100 65000:200"
        );
        assert_eq!(
            CommunityList(&[LargeCommunity::new(4_200_000_000, 1, 2)]).to_string(),
            "4200000000:1:2"
        );
        assert_eq!(CommunityList::<Community>(&[]).to_string(), "");
    }

    #[test]
    fn test_ext_community_display() {
        let route_target = ExtCommunity::Regular {
            kind: 0x00,
            subtype: 0x02,
            value: [0xfd, 0xe8, 0x00, 0x00, 0x00, 0x64],
        };
        assert_eq!(route_target.to_string(), "0:2:fde800000064");
        assert!(!route_target.is_ipv6());

        let v6 = ExtCommunity::Ipv6 {
            kind: 0x00,
            subtype: 0x02,
            global: "2001:db8::1".parse().unwrap(),
            local: 100,
        };
        assert_eq!(v6.to_string(), "0:2:[2001:db8::1]:100");
        assert!(v6.is_ipv6());
    }
}
