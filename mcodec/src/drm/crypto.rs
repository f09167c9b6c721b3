use crate::{
    Error, Result,
    drm::{
        SchemeId,
        engine::{self, CryptoSession},
        info::CryptoInfo,
    },
};
use std::sync::{Arc, PoisonError, RwLock};

/// Crypto context used by codec sessions to decrypt secure input.
///
/// Bound to exactly one scheme for its whole life. Shared between sessions and
/// other holders as `Arc<MediaCrypto>`, the engine session is dropped when the
/// last holder goes away or [`release`](Self::release) is called.
pub struct MediaCrypto {
    scheme: SchemeId,
    session: RwLock<Option<Arc<dyn CryptoSession>>>,
}

impl MediaCrypto {
    /// Open a crypto session of `scheme` from its initialization data.
    pub fn new(scheme: SchemeId, init_data: &[u8]) -> Result<Self> {
        let engine = engine::find_engine(scheme).ok_or(Error::UnsupportedScheme(scheme))?;
        Ok(Self::from_session(engine.open_session(scheme, init_data)?))
    }

    /// Wrap an already opened engine session.
    pub fn from_session(session: Arc<dyn CryptoSession>) -> Self {
        Self {
            scheme: session.scheme(),
            session: RwLock::new(Some(session)),
        }
    }

    pub fn is_crypto_scheme_supported(scheme: SchemeId) -> bool {
        engine::is_scheme_supported(scheme, None)
    }

    pub fn scheme(&self) -> SchemeId {
        self.scheme
    }

    /// Whether content of `mime` has to go through a secure decoder.
    ///
    /// Codec sessions consult this before configuring.
    pub fn requires_secure_decoder(&self, mime: &str) -> Result<bool> {
        Ok(self.session()?.requires_secure_decoder(mime))
    }

    /// Decrypt one sample into `dst`, returning the number of bytes written.
    pub fn decrypt(&self, info: &CryptoInfo, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        self.session()?.decrypt(info, src, dst)
    }

    /// Drop the engine session. Calling this twice is a no-op.
    pub fn release(&self) {
        if self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::debug!("crypto context for {:?} released", self.scheme);
        }
    }

    pub fn is_released(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn session(&self) -> Result<Arc<dyn CryptoSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::CryptoReleased)
    }
}

impl std::fmt::Debug for MediaCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCrypto")
            .field("scheme", &self.scheme)
            .field("released", &self.is_released())
            .finish()
    }
}
