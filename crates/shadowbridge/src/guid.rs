//! 128-bit interface identifiers
//!
//! [`GUID`] is the key for every capability query on both sides of the bridge:
//! native `QueryInterface` requests, the [`registry`](crate::registry) and the
//! shadow capability tables.
//!
//! ## Memory Layout
//!
//! ```text
//! offset  size  field
//! 0       4     data1  (little-endian)
//! 4       2     data2  (little-endian)
//! 6       2     data3  (little-endian)
//! 8       8     data4  (raw bytes)
//! ```

use std::str::FromStr;

use crate::error::Error;

/// 128-bit globally unique identifier (GUID/UUID/IID).
///
/// Format: `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GUID {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl GUID {
    /// Create a new GUID from components
    #[must_use]
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// The nil/zero GUID
    pub const ZERO: GUID = GUID::new(0, 0, 0, [0; 8]);

    /// Create a GUID from its big-endian integer spelling, e.g.
    /// `GUID::from_u128(0x00000000_0000_0000_c000_000000000046)`.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        let d4 = (value as u64).to_be_bytes();
        Self::new((value >> 96) as u32, (value >> 80) as u16, (value >> 64) as u16, d4)
    }

    /// Inverse of [`GUID::from_u128`].
    #[must_use]
    pub const fn to_u128(&self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }

    /// Bytes exactly as they sit in native memory.
    #[must_use]
    pub const fn to_bytes_le(&self) -> [u8; 16] {
        let d1 = self.data1.to_le_bytes();
        let d2 = self.data2.to_le_bytes();
        let d3 = self.data3.to_le_bytes();
        let d4 = self.data4;
        [
            d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], d4[0], d4[1], d4[2], d4[3],
            d4[4], d4[5], d4[6], d4[7],
        ]
    }

    /// Read a GUID from its native memory representation.
    #[must_use]
    pub const fn from_bytes_le(b: [u8; 16]) -> Self {
        Self::new(
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            [b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]],
        )
    }

    /// True for the nil GUID
    #[inline]
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.to_u128() == 0
    }
}

impl FromStr for GUID {
    type Err = Error;

    /// Parses `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally wrapped in braces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(trimmed);

        let parsed = uguid::Guid::try_parse(bare)
            .map_err(|e| Error::InvalidArgument(format!("invalid GUID '{s}': {e}")))?;
        Ok(GUID::from_bytes_le(parsed.to_bytes()))
    }
}

impl From<uguid::Guid> for GUID {
    fn from(value: uguid::Guid) -> Self {
        GUID::from_bytes_le(value.to_bytes())
    }
}

impl From<GUID> for uguid::Guid {
    fn from(value: GUID) -> Self {
        uguid::Guid::from_bytes(value.to_bytes_le())
    }
}

#[cfg(feature = "windows-compat")]
impl From<windows_core::GUID> for GUID {
    fn from(value: windows_core::GUID) -> Self {
        GUID::new(value.data1, value.data2, value.data3, value.data4)
    }
}

#[cfg(feature = "windows-compat")]
impl From<GUID> for windows_core::GUID {
    fn from(value: GUID) -> Self {
        windows_core::GUID::from_values(value.data1, value.data2, value.data3, value.data4)
    }
}

impl std::fmt::Debug for GUID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

impl std::fmt::Display for GUID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}
