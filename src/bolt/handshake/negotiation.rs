//! Bolt handshake negotiation.

use super::{hex_repr, BoltVersion, HandshakeError, BOLT_MAGIC, SLOTS_SIZE};

/// Handshake version 2 offer slot: `00 00 01 FF`, i.e. "version" 255.1.
pub const V2_OFFER: BoltVersion = BoltVersion::new(0xFF, 1);

/// Which bytes of a version slot a server generation pays attention to.
///
/// A slot is `[reserved, range, minor, major]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMask {
    /// Bolt 1 to 3 only look at the major byte.
    MajorOnly,
    /// Bolt 4.0 and 4.1 know minor versions but no ranges.
    NoRange,
    /// Bolt 4.2 onwards honor the range byte.
    Full,
}

impl SlotMask {
    fn apply(self, slot: [u8; 4]) -> [u8; 4] {
        match self {
            SlotMask::MajorOnly => [0, 0, 0, slot[3]],
            SlotMask::NoRange => [0, 0, slot[2], slot[3]],
            SlotMask::Full => [0, slot[1], slot[2], slot[3]],
        }
    }
}

/// Server side of the handshake for one declared version.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Version the server talks
    pub version: BoltVersion,
    /// Versions the server may negotiate instead
    pub equivalent_versions: Vec<BoltVersion>,
    /// Slot decoding rules
    pub mask: SlotMask,
    /// Feature flags offered in a version 2 handshake (varint)
    pub features: Vec<u8>,
}

impl Handshake {
    /// Expand the four version slots of a request into the set of
    /// `(major, minor)` pairs the client asks for.
    ///
    /// A slot with minor `m` and range `r` requests `m, m-1, ..., m-r`.
    pub fn decode_versions(&self, request: &[u8; SLOTS_SIZE]) -> Vec<BoltVersion> {
        let mut versions = Vec::new();
        for chunk in request.chunks_exact(4) {
            let slot = self.mask.apply([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let [_, range, minor, major] = slot;
            let lowest = minor as i16 - range as i16;
            for m in (lowest.max(0)..=minor as i16).rev() {
                versions.push(BoltVersion::new(major, m as u8));
            }
        }
        versions
    }

    /// Pick the version to answer a version 1 handshake with.
    ///
    /// The declared version wins if requested, otherwise the highest
    /// requested equivalent version.
    pub fn negotiate(&self, request: &[u8; SLOTS_SIZE]) -> Result<BoltVersion, HandshakeError> {
        let requested = self.decode_versions(request);
        if requested.contains(&self.version) {
            return Ok(self.version);
        }
        self.equivalent_versions
            .iter()
            .filter(|v| requested.contains(v))
            .max()
            .copied()
            .ok_or_else(|| HandshakeError::NoCompatibleVersion {
                supported: self.version,
                request: hex_repr(request),
            })
    }

    /// Check that a request offers handshake version 2 and build the
    /// server's offer: `00 00 01 FF`, one version, the version, features.
    pub fn v2_offer(&self, request: &[u8; SLOTS_SIZE]) -> Result<Vec<u8>, HandshakeError> {
        if !self.decode_versions(request).contains(&V2_OFFER) {
            return Err(HandshakeError::MissingV2Offer {
                request: hex_repr(request),
            });
        }
        let mut offer = vec![0x00, 0x00, 0x01, 0xFF, 0x01];
        offer.extend_from_slice(&self.version.to_bytes());
        offer.extend_from_slice(&self.features);
        Ok(offer)
    }

    /// Verify the client's version and feature pick after a v2 offer.
    pub fn check_v2_pick(&self, version: &[u8], features: &[u8]) -> Result<(), HandshakeError> {
        let offered = self.version.to_bytes();
        if version != offered {
            return Err(HandshakeError::VersionPickMismatch {
                picked: hex_repr(version),
                offered: hex_repr(&offered),
            });
        }
        if features != self.features.as_slice() {
            return Err(HandshakeError::FeaturePickMismatch {
                picked: hex_repr(features),
                offered: hex_repr(&self.features),
            });
        }
        Ok(())
    }
}

/// Build a client handshake message: magic plus up to four raw slots.
pub fn build_client_handshake(slots: &[[u8; 4]]) -> [u8; 20] {
    let mut data = [0u8; 20];
    data[0..4].copy_from_slice(&BOLT_MAGIC);
    for (i, slot) in slots.iter().take(4).enumerate() {
        let offset = 4 + (i * 4);
        data[offset..offset + 4].copy_from_slice(slot);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(major: u8, minor: u8, mask: SlotMask) -> Handshake {
        Handshake {
            version: BoltVersion::new(major, minor),
            equivalent_versions: Vec::new(),
            mask,
            features: vec![0x00],
        }
    }

    fn slots(data: &[[u8; 4]]) -> [u8; SLOTS_SIZE] {
        let full = build_client_handshake(data);
        let mut out = [0u8; SLOTS_SIZE];
        out.copy_from_slice(&full[4..]);
        out
    }

    #[test]
    fn test_exact_version() {
        let hs = handshake(4, 4, SlotMask::Full);
        let version = hs.negotiate(&slots(&[[0, 0, 4, 4]])).unwrap();
        assert_eq!(version.to_bytes(), [0, 0, 4, 4]);
    }

    #[test]
    fn test_range() {
        let hs = handshake(4, 2, SlotMask::Full);
        let request = slots(&[[0, 2, 4, 4]]);
        assert_eq!(
            hs.decode_versions(&request)[..3],
            [
                BoltVersion::new(4, 4),
                BoltVersion::new(4, 3),
                BoltVersion::new(4, 2)
            ]
        );
        assert_eq!(hs.negotiate(&request).unwrap(), BoltVersion::new(4, 2));
    }

    #[test]
    fn test_bolt_4_0_ignores_range() {
        let hs = handshake(4, 0, SlotMask::NoRange);
        let err = hs.negotiate(&slots(&[[0, 1, 1, 4]])).unwrap_err();
        assert!(matches!(err, HandshakeError::NoCompatibleVersion { .. }));
    }

    #[test]
    fn test_old_versions_only_look_at_major() {
        let hs = handshake(3, 0, SlotMask::MajorOnly);
        let version = hs.negotiate(&slots(&[[0xFF, 0xFF, 0x05, 3]])).unwrap();
        assert_eq!(version, BoltVersion::new(3, 0));
    }

    #[test]
    fn test_equivalent_version_fallback() {
        let mut hs = handshake(4, 2, SlotMask::Full);
        hs.equivalent_versions = vec![BoltVersion::new(4, 1)];
        let version = hs.negotiate(&slots(&[[0, 0, 1, 4]])).unwrap();
        assert_eq!(version.to_bytes(), [0, 0, 1, 4]);
    }

    #[test]
    fn test_no_compatible_version() {
        let hs = handshake(5, 0, SlotMask::Full);
        let err = hs.negotiate(&slots(&[[0, 0, 0, 3]])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed handshake, stub server talks protocol (5, 0). Driver sent handshake: \
             00 00 00 03 00 00 00 00 00 00 00 00 00 00 00 00"
        );
    }

    #[test]
    fn test_v2_offer() {
        let hs = handshake(5, 7, SlotMask::Full);
        let offer = hs.v2_offer(&slots(&[[0, 0, 1, 0xFF]])).unwrap();
        assert_eq!(offer, vec![0, 0, 1, 0xFF, 1, 0, 0, 7, 5, 0]);

        assert!(hs.check_v2_pick(&[0, 0, 7, 5], &[0]).is_ok());
        let err = hs.check_v2_pick(&[0, 0, 6, 5], &[0]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed handshake, client picked different version 00 00 06 05 than offered 00 00 07 05"
        );
        let err = hs.check_v2_pick(&[0, 0, 7, 5], &[1]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed handshake, client picked different features (01) than offered (00)"
        );
    }

    #[test]
    fn test_v2_offer_required() {
        let hs = handshake(5, 7, SlotMask::Full);
        let err = hs.v2_offer(&slots(&[[0, 0, 7, 5]])).unwrap_err();
        assert!(matches!(err, HandshakeError::MissingV2Offer { .. }));
    }
}
