use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, Bytes};
use ipnetwork::IpNetwork;

use super::{Afi, WireError};

/// Bounds-checked reads over a received message.
/// Every read fails with [`WireError::Truncated`] instead of panicking on short input.
pub trait ReadUtils: Buf {
    #[inline]
    fn has_n_remaining(&self, n: usize) -> Result<(), WireError> {
        if self.remaining() < n {
            Err(WireError::Truncated {
                needed: n,
                remaining: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn read_u8(&mut self) -> Result<u8, WireError> {
        self.has_n_remaining(1)?;
        Ok(self.get_u8())
    }

    #[inline]
    fn read_u16(&mut self) -> Result<u16, WireError> {
        self.has_n_remaining(2)?;
        Ok(self.get_u16())
    }

    #[inline]
    fn read_u32(&mut self) -> Result<u32, WireError> {
        self.has_n_remaining(4)?;
        Ok(self.get_u32())
    }

    fn read_ipv4_address(&mut self) -> Result<Ipv4Addr, WireError> {
        let addr = self.read_u32()?;
        Ok(Ipv4Addr::from(addr))
    }

    fn read_ipv6_address(&mut self) -> Result<Ipv6Addr, WireError> {
        self.has_n_remaining(16)?;
        Ok(Ipv6Addr::from(self.get_u128()))
    }

    /// Split off the next `n` bytes as their own buffer
    fn read_n_bytes(&mut self, n: usize) -> Result<Bytes, WireError> {
        self.has_n_remaining(n)?;
        Ok(self.copy_to_bytes(n))
    }

    /// Read one compact NLRI prefix: a mask length followed by only the
    /// significant bytes. Bits beyond the mask are cleared.
    fn read_prefix(&mut self, afi: Afi) -> Result<IpNetwork, WireError> {
        let bits = self.read_u8()?;
        if bits > afi.max_prefix_len() {
            return Err(WireError::InvalidPrefixLength(bits));
        }
        let count = (usize::from(bits) + 7) / 8;
        self.has_n_remaining(count)?;
        let mut octets = [0u8; 16];
        self.copy_to_slice(&mut octets[..count]);
        if bits % 8 != 0 {
            octets[count - 1] &= 0xffu8 << (8 - bits % 8);
        }
        let addr = match afi {
            Afi::Ipv4 => IpAddr::from([octets[0], octets[1], octets[2], octets[3]]),
            Afi::Ipv6 => IpAddr::from(octets),
        };
        IpNetwork::new(addr, bits).map_err(|_| WireError::InvalidPrefixLength(bits))
    }
}

impl ReadUtils for Bytes {}

/// Decode a run of compact prefixes filling the whole buffer
pub fn decode_prefixes(mut buf: Bytes, afi: Afi) -> Result<Vec<IpNetwork>, WireError> {
    let mut prefixes = Vec::new();
    while buf.has_remaining() {
        prefixes.push(buf.read_prefix(afi)?);
    }
    Ok(prefixes)
}
