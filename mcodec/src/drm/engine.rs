use crate::{
    Result,
    drm::{SchemeId, clearkey::ClearKeyEngine, info::CryptoInfo},
};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Opened decryption session of a protection system.
pub trait CryptoSession: Send + Sync {
    fn scheme(&self) -> SchemeId;

    /// Whether content of `mime` must be decoded by a secure decoder component.
    fn requires_secure_decoder(&self, mime: &str) -> bool;

    /// Decrypt one sample from `src` into `dst` and return the bytes written.
    fn decrypt(&self, info: &CryptoInfo, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

/// A content protection system able to open [`CryptoSession`]s.
pub trait ProtectionEngine: Send + Sync {
    /// Scheme ids answered by this engine.
    fn schemes(&self) -> &[SchemeId];

    /// Whether the engine can handle content of the given container or codec mime type.
    fn is_mime_supported(&self, mime: &str) -> bool;

    /// Open a session from scheme specific initialization data.
    fn open_session(&self, scheme: SchemeId, init_data: &[u8]) -> Result<Arc<dyn CryptoSession>>;
}

static ENGINES: LazyLock<RwLock<Vec<Arc<dyn ProtectionEngine>>>> =
    LazyLock::new(|| RwLock::new(vec![Arc::new(ClearKeyEngine)]));

/// Make a protection system available to [`MediaDrm`](super::MediaDrm) and
/// [`MediaCrypto`](super::MediaCrypto).
///
/// Engines registered later take precedence for schemes they share with earlier ones.
pub fn register_engine(engine: Arc<dyn ProtectionEngine>) {
    log::debug!("registering protection engine for {:?}", engine.schemes());
    ENGINES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(engine);
}

pub(crate) fn find_engine(scheme: SchemeId) -> Option<Arc<dyn ProtectionEngine>> {
    ENGINES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .rev()
        .find(|x| x.schemes().contains(&scheme))
        .cloned()
}

/// Check whether a registered engine supports `scheme`, and `mime` if given.
pub fn is_scheme_supported(scheme: SchemeId, mime: Option<&str>) -> bool {
    match find_engine(scheme) {
        Some(engine) => mime.is_none_or(|x| engine.is_mime_supported(x)),
        None => false,
    }
}
