use crate::{Error, Result};
use std::{fmt, str::FromStr};

/// 16 byte protection scheme (DRM system) identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemeId(pub [u8; 16]);

impl SchemeId {
    /// W3C ClearKey.
    pub const CLEARKEY: Self = Self([
        0xe2, 0x71, 0x9d, 0x58, 0xa9, 0x85, 0xb3, 0xc9, 0x78, 0x1a, 0xb0, 0x30, 0xaf, 0x78, 0xd3,
        0x0e,
    ]);
    /// Common PSSH system id, answered by ClearKey.
    pub const COMMON: Self = Self([
        0x10, 0x77, 0xef, 0xec, 0xc0, 0xb2, 0x4d, 0x02, 0xac, 0xe3, 0x3c, 0x1e, 0x52, 0xe2, 0xfb,
        0x4b,
    ]);
    pub const PLAYREADY: Self = Self([
        0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f,
        0x95,
    ]);
    pub const WIDEVINE: Self = Self([
        0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21,
        0xed,
    ]);

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Human readable name of well known systems.
    pub fn system_name(&self) -> Option<&'static str> {
        match *self {
            Self::CLEARKEY => Some("clearkey"),
            Self::COMMON => Some("common"),
            Self::PLAYREADY => Some("playready"),
            Self::WIDEVINE => Some("widevine"),
            _ => None,
        }
    }
}

impl From<[u8; 16]> for SchemeId {
    fn from(value: [u8; 16]) -> Self {
        Self(value)
    }
}

impl FromStr for SchemeId {
    type Err = Error;

    /// Accepts 32 hex characters, with or without uuid dashes.
    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim().replace('-', ""))?;
        let id: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidInitData(format!("scheme id must be 16 bytes: {}", s)))?;
        Ok(Self(id))
    }
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &value[..8],
            &value[8..12],
            &value[12..16],
            &value[16..20],
            &value[20..]
        )
    }
}

impl fmt::Debug for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.system_name() {
            Some(name) => write!(f, "SchemeId({} {})", name, self),
            None => write!(f, "SchemeId({})", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_and_without_dashes() {
        let a: SchemeId = "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed".parse().unwrap();
        let b: SchemeId = "edef8ba979d64acea3c827dcd51d21ed".parse().unwrap();

        assert_eq!(a, SchemeId::WIDEVINE);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed");
    }

    #[test]
    fn reject_wrong_length() {
        assert!("e2719d58".parse::<SchemeId>().is_err());
        assert!("zz".parse::<SchemeId>().is_err());
    }
}
