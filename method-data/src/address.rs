use std::fmt;

/// Location in the target process's address space.
///
/// An `Address` is only a location; it does not imply that anything is mapped there.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn offset(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns `None` for the null address so callers can treat it as "absent".
    #[inline]
    pub const fn non_null(self) -> Option<Self> {
        if self.0 == 0 {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for Address {
    type Err = std::num::ParseIntError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map(Self),
            None => s.parse::<u64>().map(Self),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::ops::Add<u64> for Address {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl std::ops::AddAssign<u64> for Address {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl std::ops::Sub<u64> for Address {
    type Output = Self;
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::Sub<Address> for Address {
    type Output = u64;
    fn sub(self, rhs: Address) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!("0x1000".parse::<Address>().unwrap(), Address::new(0x1000));
        assert_eq!("4096".parse::<Address>().unwrap(), Address::new(0x1000));
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn offsets_wrap() {
        let address = Address::new(u64::MAX);
        assert_eq!(address + 1, Address::NULL);
        assert_eq!(Address::NULL - 1, address);
        assert_eq!(Address::new(0x30) - Address::new(0x10), 0x20);
    }

    #[test]
    fn null_is_absent() {
        assert_eq!(Address::NULL.non_null(), None);
        assert_eq!(Address::new(8).non_null(), Some(Address::new(8)));
    }
}
