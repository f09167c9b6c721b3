//! Content protection for codec sessions.
//!
//! A [`MediaDrm`] handle is bound to one protection scheme. [`MediaCrypto`]
//! contexts derived from it are attached to a
//! [`CodecSession`](crate::codec::CodecSession) at configure time and decrypt
//! every sample queued with
//! [`queue_secure_input_buffer`](crate::codec::CodecSession::queue_secure_input_buffer).
//!
//! # Supported Schemes
//!
//! | Scheme | System id | Engine |
//! |--------|-----------|--------|
//! | ClearKey | `e2719d58-a985-b3c9-781a-b030af78d30e` | built in |
//! | Common PSSH | `1077efec-c0b2-4d02-ace3-3c1e52e2fb4b` | built in (ClearKey) |
//! | Widevine | `edef8ba9-79d6-4ace-a3c8-27dcd51d21ed` | [`register_engine`] |
//! | PlayReady | `9a04f079-9840-4286-ab92-e65be0885f95` | [`register_engine`] |
//!
//! # Cipher Modes
//!
//! | Mode | Description |
//! |------|-------------|
//! | [`CryptoMode::AesCtr`] | AES-128-CTR, keystream continues across subsamples |
//! | [`CryptoMode::AesCbc`] | AES-128-CBC, iv chains across subsamples |
//! | [`CryptoMode::AesCbcPattern`] | AES-128-CBC with an encrypt/skip block pattern, iv reset per subsample |
//!
//! # Example
//!
//! ```
//! use mcodec::drm::{CryptoInfo, CryptoMode, MediaDrm, SchemeId};
//!
//! let drm = MediaDrm::new(
//!     SchemeId::CLEARKEY,
//!     b"eb676abbcb345e96bbcf616630f1a3da:100b6c20940f779a4589152b57d2dacb",
//! )?;
//! let crypto = drm.open_crypto()?;
//! assert!(!crypto.requires_secure_decoder("video/avc")?);
//!
//! let kid = hex::decode("eb676abbcb345e96bbcf616630f1a3da")?;
//! let info = CryptoInfo::new(
//!     kid.as_slice().try_into().unwrap(),
//!     [0; 16],
//!     CryptoMode::AesCtr,
//!     &[16],
//!     &[32],
//! )?;
//!
//! let mut clear = [0u8; 48];
//! crypto.decrypt(&info, &[0u8; 48], &mut clear)?;
//! # Ok::<(), mcodec::Error>(())
//! ```

mod cipher;
mod clearkey;
mod crypto;
mod engine;
mod handle;
mod info;
mod scheme;

pub use clearkey::{ClearKeyEngine, ClearKeySession};
pub use crypto::MediaCrypto;
pub use engine::{CryptoSession, ProtectionEngine, is_scheme_supported, register_engine};
pub use handle::MediaDrm;
pub use info::{CryptoInfo, CryptoMode, Pattern, Subsample};
pub use scheme::SchemeId;
