//! HLS manifest parsing and URI resolution.
//!
//! Wraps `m3u8-rs` into a neutral shape carrying only what the evaluator
//! consumes: the variant table of a master playlist, or the segment list
//! and sequence counters of a media playlist.

use m3u8_rs::Playlist;

/// One variant row from a master playlist.
#[derive(Debug, Clone)]
pub struct VariantInfo {
    pub uri: String,
    pub bandwidth: u64,
    /// (width, height) when the RESOLUTION attribute is present.
    pub resolution: Option<(u64, u64)>,
}

/// One segment row from a media playlist.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub uri: String,
    pub duration: f64,
    pub discontinuity: bool,
}

/// Parsed manifest. A master playlist has a non-empty `variants`; a media
/// playlist has `segments` plus the sequence counters.
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    pub variants: Vec<VariantInfo>,
    pub segments: Vec<SegmentInfo>,
    pub media_sequence: i64,
    pub target_duration: u64,
    pub discontinuity_sequence: i64,
    pub playlist_type: Option<String>,
}

impl ParsedManifest {
    pub fn is_master(&self) -> bool {
        !self.variants.is_empty()
    }
}

/// Parse manifest text. Master and media playlists both map into
/// [`ParsedManifest`]; anything unparseable is reported as a plain message
/// so the caller can file it as a retrieval-class failure.
pub fn parse(body: &[u8]) -> Result<ParsedManifest, String> {
    match m3u8_rs::parse_playlist(body) {
        Ok((_, Playlist::MasterPlaylist(master))) => {
            let variants = master
                .variants
                .iter()
                .map(|v| VariantInfo {
                    uri: v.uri.clone(),
                    bandwidth: v.bandwidth,
                    resolution: v.resolution.as_ref().map(|r| (r.width, r.height)),
                })
                .collect();
            Ok(ParsedManifest {
                variants,
                ..Default::default()
            })
        }
        Ok((_, Playlist::MediaPlaylist(media))) => {
            let segments = media
                .segments
                .iter()
                .map(|s| SegmentInfo {
                    uri: s.uri.clone(),
                    duration: s.duration as f64,
                    discontinuity: s.discontinuity,
                })
                .collect();
            Ok(ParsedManifest {
                variants: Vec::new(),
                segments,
                media_sequence: media.media_sequence as i64,
                target_duration: media.target_duration,
                discontinuity_sequence: media.discontinuity_sequence as i64,
                playlist_type: media.playlist_type.as_ref().map(|pt| pt.to_string().to_uppercase()),
            })
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Resolve a sibling URI against a requesting URL: absolute URIs (starting
/// with `http`) are kept verbatim, otherwise the basename of `base` is
/// replaced with `uri`.
pub fn resolve_sibling(base: &str, uri: &str) -> String {
    if uri.starts_with("http") {
        return uri.to_string();
    }
    match base.rfind('/') {
        Some(idx) => format!("{}/{}", &base[..idx], uri),
        None => uri.to_string(),
    }
}
