//! Magnet URI helpers
//!
//! Thin layer over gosh-dl's magnet parser: the scheme check that tells
//! unsupported sources apart from broken magnets, and the info-hash as
//! 40-char lowercase hex.

use crate::error::{Error, Result};
use gosh_dl::torrent::MagnetUri;

/// Parsed magnet link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magnet {
    pub info_hash: String,
    pub display_name: Option<String>,
    pub uri: String,
}

impl Magnet {
    /// Parse a magnet URI.
    ///
    /// Non-magnet input is `UnsupportedSource`; a magnet without a usable
    /// `urn:btih:` segment is `InvalidMagnet`.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if !is_magnet(uri) {
            return Err(Error::UnsupportedSource(uri.to_string()));
        }

        // gosh-dl only accepts the lowercase scheme
        let normalized = format!("magnet:?{}", &uri[8..]);
        let parsed = MagnetUri::parse(&normalized)
            .map_err(|e| Error::InvalidMagnet(format!("{}: {}", uri, e)))?;

        Ok(Self {
            info_hash: hex::encode(parsed.info_hash),
            display_name: parsed.display_name.filter(|name| !name.trim().is_empty()),
            uri: uri.to_string(),
        })
    }
}

/// Whether the input uses the magnet scheme
pub fn is_magnet(uri: &str) -> bool {
    uri.get(..8)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:?"))
}

/// Derive the lowercase hex info-hash from a magnet's `urn:btih:` segment
pub fn info_hash_from_magnet(uri: &str) -> Option<String> {
    Magnet::parse(uri).ok().map(|magnet| magnet.info_hash)
}
