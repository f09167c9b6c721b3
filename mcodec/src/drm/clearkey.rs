//! W3C ClearKey protection system.
//!
//! Sessions are opened from either a JSON Web Key set
//!
//! ```json
//! {"keys":[{"kty":"oct","kid":"<base64url kid>","k":"<base64url key>"}]}
//! ```
//!
//! or a `KID:KEY;KID:KEY` list of hex pairs.

use crate::{
    Error, Result,
    drm::{
        SchemeId, cipher,
        engine::{CryptoSession, ProtectionEngine},
        info::{CryptoInfo, CryptoMode},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};

const SCHEMES: [SchemeId; 2] = [SchemeId::CLEARKEY, SchemeId::COMMON];

pub struct ClearKeyEngine;

impl ProtectionEngine for ClearKeyEngine {
    fn schemes(&self) -> &[SchemeId] {
        &SCHEMES
    }

    fn is_mime_supported(&self, mime: &str) -> bool {
        let mime = mime.to_ascii_lowercase();
        mime.starts_with("video/")
            || mime.starts_with("audio/")
            || mime == "cenc"
            || mime == "webm"
    }

    fn open_session(&self, scheme: SchemeId, init_data: &[u8]) -> Result<Arc<dyn CryptoSession>> {
        if !SCHEMES.contains(&scheme) {
            return Err(Error::UnsupportedScheme(scheme));
        }

        Ok(Arc::new(ClearKeySession::parse(scheme, init_data)?))
    }
}

#[derive(Deserialize)]
struct JsonWebKeySet {
    keys: Vec<JsonWebKey>,
}

#[derive(Deserialize)]
struct JsonWebKey {
    kty: String,
    kid: String,
    k: String,
}

/// Session holding content keys indexed by key id.
pub struct ClearKeySession {
    scheme: SchemeId,
    keys: HashMap<[u8; 16], [u8; 16]>,
}

impl ClearKeySession {
    pub fn new(keys: HashMap<[u8; 16], [u8; 16]>) -> Self {
        Self {
            scheme: SchemeId::CLEARKEY,
            keys,
        }
    }

    fn parse(scheme: SchemeId, init_data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(init_data)
            .map_err(|_| Error::InvalidInitData("init data is not utf-8".to_owned()))?
            .trim();

        let keys = if text.starts_with('{') {
            parse_jwk_set(text)?
        } else {
            parse_hex_pairs(text)?
        };

        if keys.is_empty() {
            return Err(Error::InvalidInitData("no keys found".to_owned()));
        }

        log::debug!("clearkey session opened with {} key(s)", keys.len());
        Ok(Self { scheme, keys })
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &[u8; 16]> {
        self.keys.keys()
    }
}

impl CryptoSession for ClearKeySession {
    fn scheme(&self) -> SchemeId {
        self.scheme
    }

    fn requires_secure_decoder(&self, _mime: &str) -> bool {
        false
    }

    fn decrypt(&self, info: &CryptoInfo, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if info.mode() == CryptoMode::Unencrypted {
            return cipher::decrypt_sample(&[0; 16], info, src, dst);
        }

        let key = self
            .keys
            .get(info.key())
            .ok_or_else(|| Error::KeyNotFound(hex::encode(info.key())))?;
        cipher::decrypt_sample(key, info, src, dst)
    }
}

fn parse_jwk_set(text: &str) -> Result<HashMap<[u8; 16], [u8; 16]>> {
    let set: JsonWebKeySet = serde_json::from_str(text)?;
    let mut keys = HashMap::new();

    for jwk in set.keys {
        if jwk.kty != "oct" {
            log::warn!("skipping json web key of type {}", jwk.kty);
            continue;
        }

        keys.insert(decode_b64_16(&jwk.kid)?, decode_b64_16(&jwk.k)?);
    }

    Ok(keys)
}

fn parse_hex_pairs(text: &str) -> Result<HashMap<[u8; 16], [u8; 16]>> {
    let mut keys = HashMap::new();

    for pair in text.split(';').filter(|x| !x.trim().is_empty()) {
        let (kid, key) = pair
            .split_once(':')
            .ok_or_else(|| Error::InvalidInitData(format!("expected KID:KEY, got {}", pair)))?;
        keys.insert(decode_hex_16(kid)?, decode_hex_16(key)?);
    }

    Ok(keys)
}

fn decode_b64_16(value: &str) -> Result<[u8; 16]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|x| Error::InvalidInitData(format!("invalid base64url value {}: {}", value, x)))?;
    to_16(&bytes, value)
}

fn decode_hex_16(value: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(value.trim().replace('-', ""))?;
    to_16(&bytes, value)
}

fn to_16(bytes: &[u8], value: &str) -> Result<[u8; 16]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidInitData(format!("{} is not 16 bytes long", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::cipher::tests::{IV, KEY, encrypt_ctr, plaintext};

    const KID: [u8; 16] = [
        0xeb, 0x67, 0x6a, 0xbb, 0xcb, 0x34, 0x5e, 0x96, 0xbb, 0xcf, 0x61, 0x66, 0x30, 0xf1, 0xa3,
        0xda,
    ];

    fn jwk() -> String {
        format!(
            r#"{{"keys":[{{"kty":"oct","kid":"{}","k":"{}"}}]}}"#,
            URL_SAFE_NO_PAD.encode(KID),
            URL_SAFE_NO_PAD.encode(KEY)
        )
    }

    #[test]
    fn parse_jwk_and_hex() {
        let session = ClearKeySession::parse(SchemeId::CLEARKEY, jwk().as_bytes()).unwrap();
        assert_eq!(session.key_ids().collect::<Vec<_>>(), vec![&KID]);

        let pairs = format!("{}:{}", hex::encode(KID), hex::encode(KEY));
        let session = ClearKeySession::parse(SchemeId::COMMON, pairs.as_bytes()).unwrap();
        assert_eq!(session.keys.get(&KID), Some(&KEY));
        assert_eq!(session.scheme(), SchemeId::COMMON);
    }

    #[test]
    fn reject_bad_init_data() {
        assert!(ClearKeySession::parse(SchemeId::CLEARKEY, b"").is_err());
        assert!(ClearKeySession::parse(SchemeId::CLEARKEY, b"{\"keys\":[]}").is_err());
        assert!(ClearKeySession::parse(SchemeId::CLEARKEY, b"00ff:11").is_err());
        assert!(ClearKeySession::parse(SchemeId::CLEARKEY, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn engine_rejects_foreign_scheme() {
        let result = ClearKeyEngine.open_session(SchemeId::WIDEVINE, jwk().as_bytes());
        assert!(matches!(result, Err(Error::UnsupportedScheme(_))));
    }

    #[test]
    fn mime_support() {
        assert!(ClearKeyEngine.is_mime_supported("video/avc"));
        assert!(ClearKeyEngine.is_mime_supported("audio/mp4a-latm"));
        assert!(ClearKeyEngine.is_mime_supported("cenc"));
        assert!(ClearKeyEngine.is_mime_supported("webm"));
        assert!(!ClearKeyEngine.is_mime_supported("text/vtt"));
    }

    #[test]
    fn decrypt_with_known_and_unknown_kid() {
        let session = ClearKeySession::new(HashMap::from([(KID, KEY)]));
        let clear = plaintext(64);
        let mut sample = clear.clone();
        encrypt_ctr(&KEY, &IV, &mut [&mut sample[..]]);

        let info = CryptoInfo::new(KID, IV, CryptoMode::AesCtr, &[0], &[64]).unwrap();
        let mut out = vec![0; 64];
        session.decrypt(&info, &sample, &mut out).unwrap();
        assert_eq!(out, clear);
        assert!(!session.requires_secure_decoder("video/avc"));

        let info = CryptoInfo::new([9; 16], IV, CryptoMode::AesCtr, &[0], &[64]).unwrap();
        assert!(matches!(
            session.decrypt(&info, &sample, &mut out),
            Err(Error::KeyNotFound(_))
        ));
    }
}
