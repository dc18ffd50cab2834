use std::fmt;

/// ORIGIN attribute value as carried in dump records.
/// `Origin::ABSENT` (0xff) marks an origin that was not received or not exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin(pub u8);

impl Origin {
    pub const IGP: Origin = Origin(0);
    pub const EGP: Origin = Origin(1);
    pub const INCOMPLETE: Origin = Origin(2);
    pub const ABSENT: Origin = Origin(0xff);

    pub fn is_absent(&self) -> bool {
        *self == Origin::ABSENT
    }

    /// Single character code used by the machine readable decoder output
    pub fn code(&self) -> char {
        match self.0 {
            0 => 'I',
            1 => 'E',
            _ => '?',
        }
    }
}

impl Default for Origin {
    fn default() -> Self {
        Origin::ABSENT
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self.0 {
            0 => "IGP",
            1 => "EGP",
            2 => "Unknown",
            _ => "Error",
        };
        write!(f, "{}", word)
    }
}
