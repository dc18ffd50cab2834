use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Internal (same AS) or external peering, recorded in dump headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Relationship {
    Internal = 1,
    External = 2,
}

impl Relationship {
    pub fn between(local_as: u32, remote_as: u32) -> Self {
        if local_as == remote_as {
            Relationship::Internal
        } else {
            Relationship::External
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Relationship::Internal => "iBGP",
            Relationship::External => "eBGP",
        };
        write!(f, "{}", word)
    }
}
