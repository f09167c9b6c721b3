use crate::codec::{CodecBackend, software::SoftwareCodec};
use std::sync::{LazyLock, PoisonError, RwLock};

/// Registered codec component.
#[derive(Clone)]
pub struct CodecInfo {
    name: String,
    mime_types: Vec<String>,
    secure: bool,
    create: fn(&str) -> Box<dyn CodecBackend>,
}

impl CodecInfo {
    /// Describe a decoder. Components whose name ends in `.secure` are secure variants.
    pub fn new(name: &str, mime_types: &[&str], create: fn(&str) -> Box<dyn CodecBackend>) -> Self {
        Self {
            name: name.to_owned(),
            mime_types: mime_types.iter().map(|x| x.to_ascii_lowercase()).collect(),
            secure: name.ends_with(".secure"),
            create,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn supports(&self, mime: &str) -> bool {
        let mime = mime.to_ascii_lowercase();
        self.mime_types.iter().any(|x| *x == mime)
    }

    pub(crate) fn create(&self) -> Box<dyn CodecBackend> {
        (self.create)(&self.name)
    }
}

impl std::fmt::Debug for CodecInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecInfo")
            .field("name", &self.name)
            .field("mime_types", &self.mime_types)
            .field("secure", &self.secure)
            .finish()
    }
}

const VIDEO_TYPES: [&str; 5] = [
    "video/avc",
    "video/hevc",
    "video/x-vnd.on2.vp8",
    "video/x-vnd.on2.vp9",
    "video/av01",
];
const AUDIO_TYPES: [&str; 4] = ["audio/mp4a-latm", "audio/opus", "audio/mpeg", "audio/flac"];

static CODECS: LazyLock<RwLock<Vec<CodecInfo>>> = LazyLock::new(|| {
    RwLock::new(vec![
        CodecInfo::new("sw.video.decoder", &VIDEO_TYPES, SoftwareCodec::boxed),
        CodecInfo::new("sw.video.decoder.secure", &VIDEO_TYPES, SoftwareCodec::boxed),
        CodecInfo::new("sw.audio.decoder", &AUDIO_TYPES, SoftwareCodec::boxed),
    ])
});

/// Add a codec component. A component with the same name is replaced.
pub fn register_codec(info: CodecInfo) {
    log::debug!("registering codec {:?}", info);
    let mut codecs = CODECS.write().unwrap_or_else(PoisonError::into_inner);
    codecs.retain(|x| x.name != info.name);
    codecs.push(info);
}

/// Snapshot of all registered components.
pub fn codecs() -> Vec<CodecInfo> {
    CODECS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub(crate) fn find_by_name(name: &str) -> Option<CodecInfo> {
    codecs().into_iter().find(|x| x.name == name)
}

/// First non secure decoder handling `mime`.
pub(crate) fn find_decoder(mime: &str) -> Option<CodecInfo> {
    codecs()
        .into_iter()
        .find(|x| !x.secure && x.supports(mime))
}
