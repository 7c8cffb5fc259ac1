//! Bolt protocol version numbers.

use std::fmt;

/// A Bolt protocol version as a `(major, minor)` pair.
///
/// Ordering is by major, then minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoltVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl BoltVersion {
    /// Create a version.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Handshake response bytes announcing this version: `00 00 minor major`.
    pub fn to_bytes(self) -> [u8; 4] {
        [0, 0, self.minor, self.major]
    }

    /// Parse handshake response bytes (`00 00 minor major`).
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[3], bytes[2])
    }

    /// Tuple notation used in diagnostics, e.g. `(4, 4)`.
    pub fn tuple(self) -> String {
        format!("({}, {})", self.major, self.minor)
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Tuple notation for a version as written in a script, e.g. `(4,)` for
/// `BOLT 4` or `(4, 2)` for `BOLT 4.2`.
pub fn version_tuple(parts: &[u32]) -> String {
    match parts {
        [single] => format!("({},)", single),
        _ => {
            let inner: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
            format!("({})", inner.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bytes() {
        let v43 = BoltVersion::new(4, 3);
        let bytes = v43.to_bytes();
        assert_eq!(bytes, [0x00, 0x00, 0x03, 0x04]);
        assert_eq!(BoltVersion::from_bytes(bytes), v43);
    }

    #[test]
    fn test_version_ordering() {
        assert!(BoltVersion::new(5, 0) > BoltVersion::new(4, 4));
        assert!(BoltVersion::new(4, 4) > BoltVersion::new(4, 3));
        assert!(BoltVersion::new(4, 1) > BoltVersion::new(3, 0));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(BoltVersion::new(4, 0).to_string(), "4.0");
        assert_eq!(BoltVersion::new(5, 7).to_string(), "5.7");
        assert_eq!(BoltVersion::new(4, 4).tuple(), "(4, 4)");
    }

    #[test]
    fn test_version_tuple() {
        assert_eq!(version_tuple(&[4]), "(4,)");
        assert_eq!(version_tuple(&[4, 2]), "(4, 2)");
        assert_eq!(version_tuple(&[1, 2, 3]), "(1, 2, 3)");
    }
}
