//! PackStream marker bytes and structure tags.
//!
//! Every packed value starts with a marker byte. Small values (tiny ints) and
//! the sizes of small containers are folded into the marker itself.

/// Null marker
pub const NULL: u8 = 0xC0;
/// 64-bit IEEE 754 float marker
pub const FLOAT_64: u8 = 0xC1;
/// Boolean false
pub const FALSE: u8 = 0xC2;
/// Boolean true
pub const TRUE: u8 = 0xC3;

/// Signed integer markers (big-endian payload)
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// Byte array markers
pub const BYTES_8: u8 = 0xCC;
pub const BYTES_16: u8 = 0xCD;
pub const BYTES_32: u8 = 0xCE;

/// String markers; 0x80..=0x8F carry the length in the low nibble
pub const TINY_STRING: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

/// List markers; 0x90..=0x9F carry the length in the low nibble
pub const TINY_LIST: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;
pub const LIST_STREAM: u8 = 0xD7;

/// Map markers; 0xA0..=0xAF carry the entry count in the low nibble
pub const TINY_MAP: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;
pub const MAP_STREAM: u8 = 0xDB;

/// Structure markers; 0xB0..=0xBF carry the field count in the low nibble
pub const TINY_STRUCT: u8 = 0xB0;

/// Terminates LIST_STREAM and MAP_STREAM
pub const END_OF_STREAM: u8 = 0xDF;

/// Largest length that fits in a tiny marker
pub const TINY_MAX_LEN: usize = 0x0F;

/// Graph structure tags
pub const NODE: u8 = 0x4E;
pub const RELATIONSHIP: u8 = 0x52;
pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
pub const PATH: u8 = 0x50;

/// Temporal structure tags
pub const DATE: u8 = 0x44;
pub const TIME: u8 = 0x54;
pub const LOCAL_TIME: u8 = 0x74;
/// Date-time with offset, local seconds (PackStream v1)
pub const DATE_TIME: u8 = 0x46;
/// Date-time with zone id, local seconds (PackStream v1)
pub const DATE_TIME_ZONE_ID: u8 = 0x66;
/// Date-time with offset, UTC seconds (PackStream v2)
pub const DATE_TIME_UTC: u8 = 0x49;
/// Date-time with zone id, UTC seconds (PackStream v2)
pub const DATE_TIME_ZONE_ID_UTC: u8 = 0x69;
pub const LOCAL_DATE_TIME: u8 = 0x64;
pub const DURATION: u8 = 0x45;

/// Spatial structure tags
pub const POINT_2D: u8 = 0x58;
pub const POINT_3D: u8 = 0x59;

/// Check if a byte is a tiny integer (-16..=127).
#[inline]
pub fn is_tiny_int(marker: u8) -> bool {
    marker <= 0x7F || marker >= 0xF0
}

/// Check if an integer fits into a tiny int marker.
#[inline]
pub fn fits_tiny_int(value: i64) -> bool {
    (-0x10..0x80).contains(&value)
}

/// High nibble of a marker, used for the tiny container families.
#[inline]
pub fn high_nibble(marker: u8) -> u8 {
    marker & 0xF0
}

/// Size carried by a tiny container marker.
#[inline]
pub fn tiny_size(marker: u8) -> usize {
    (marker & 0x0F) as usize
}
