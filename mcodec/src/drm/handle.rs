use crate::{
    Error, Result,
    drm::{MediaCrypto, SchemeId, engine},
};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle to a content protection system instance bound to one scheme.
///
/// Licensing and provisioning happen outside of this crate, the handle only
/// carries the initialization payload used to open crypto sessions.
pub struct MediaDrm {
    scheme: SchemeId,
    init_data: Mutex<Option<Vec<u8>>>,
}

impl MediaDrm {
    /// Bind a handle to `scheme`.
    ///
    /// Fails with [`Error::UnsupportedScheme`] when no registered engine answers the scheme.
    pub fn new(scheme: SchemeId, init_data: &[u8]) -> Result<Self> {
        if engine::find_engine(scheme).is_none() {
            return Err(Error::UnsupportedScheme(scheme));
        }

        log::debug!("drm handle created for {:?}", scheme);
        Ok(Self {
            scheme,
            init_data: Mutex::new(Some(init_data.to_vec())),
        })
    }

    /// Query support without creating an instance, optionally for a container mime type.
    pub fn is_crypto_scheme_supported(scheme: SchemeId, mime: Option<&str>) -> bool {
        engine::is_scheme_supported(scheme, mime)
    }

    pub fn scheme(&self) -> SchemeId {
        self.scheme
    }

    /// Open a crypto context for codec sessions from this handle.
    pub fn open_crypto(&self) -> Result<Arc<MediaCrypto>> {
        let init_data = self.init_data.lock().unwrap_or_else(PoisonError::into_inner);
        let init_data = init_data.as_deref().ok_or(Error::CryptoReleased)?;
        Ok(Arc::new(MediaCrypto::new(self.scheme, init_data)?))
    }

    /// Release the handle. Contexts opened earlier stay usable. Calling this twice is a no-op.
    pub fn release(&self) {
        if self
            .init_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::debug!("drm handle for {:?} released", self.scheme);
        }
    }

    pub fn is_released(&self) -> bool {
        self.init_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
