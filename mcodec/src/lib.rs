//! Asynchronous media codec sessions with content protection.
//!
//! The crate is split in three parts:
//!
//! - [`format`]: typed key/value stream descriptors.
//! - [`drm`]: protection scheme handles, crypto contexts and per-sample encryption metadata.
//! - [`codec`]: the codec session state machine, its event channel and the native codec seam.
//!
//! A software passthrough decoder and a ClearKey protection engine are
//! registered by default, more can be added with
//! [`codec::register_codec`] and [`drm::register_engine`].

pub mod codec;
pub mod drm;
mod error;
pub mod format;

pub use error::{Error, Result};
