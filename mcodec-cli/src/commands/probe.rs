use anyhow::Result;
use clap::Args;
use colored::Colorize;
use mcodec::{
    codec,
    drm::{MediaCrypto, MediaDrm, SchemeId},
};
use serde_json::json;

/// Report content protection and decoder support.
#[derive(Debug, Clone, Args)]
pub struct Probe {
    /// Protection system id, e.g. e2719d58-a985-b3c9-781a-b030af78d30e for ClearKey.
    #[arg(long, default_value_t = SchemeId::CLEARKEY)]
    scheme: SchemeId,

    /// Container or codec mime type to check.
    #[arg(long)]
    mime: Option<String>,

    /// Open a session with these keys (KID:KEY;KID:KEY...) to query secure decoder requirements.
    #[arg(long, value_name = "KID:KEY;...")]
    keys: Option<String>,

    /// Print the report as json.
    #[arg(long)]
    json: bool,
}

impl Probe {
    pub fn execute(self) -> Result<()> {
        let supported = MediaDrm::is_crypto_scheme_supported(self.scheme, self.mime.as_deref());

        let secure_decoder = match (&self.keys, &self.mime) {
            (Some(keys), Some(mime)) if supported => {
                let crypto = MediaCrypto::new(self.scheme, keys.as_bytes())?;
                Some(crypto.requires_secure_decoder(mime)?)
            }
            _ => None,
        };

        let decoders = codec::codecs()
            .into_iter()
            .filter(|x| self.mime.as_deref().is_none_or(|mime| x.supports(mime)))
            .collect::<Vec<_>>();

        if self.json {
            let report = json!({
                "scheme": self.scheme.to_string(),
                "system": self.scheme.system_name(),
                "mime": self.mime,
                "supported": supported,
                "secure_decoder": secure_decoder,
                "decoders": decoders
                    .iter()
                    .map(|x| json!({
                        "name": x.name(),
                        "secure": x.is_secure(),
                        "mime_types": x.mime_types(),
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!(
            "{} {} ({})",
            "Scheme:".bold(),
            self.scheme,
            self.scheme.system_name().unwrap_or("unknown")
        );
        println!(
            "{} {}",
            "Supported:".bold(),
            if supported { "yes".green() } else { "no".red() }
        );

        if let Some(secure) = secure_decoder {
            println!(
                "{} {}",
                "Secure decoder:".bold(),
                if secure { "required" } else { "not required" }
            );
        }

        println!("{}", "Decoders:".bold());
        for decoder in decoders {
            println!(
                "  {}{} [{}]",
                decoder.name(),
                if decoder.is_secure() { " (secure)".dimmed() } else { "".normal() },
                decoder.mime_types().join(", ")
            );
        }

        Ok(())
    }
}
