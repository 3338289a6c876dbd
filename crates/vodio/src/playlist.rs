// Segment planner: fetches an HLS media playlist and resolves it into the
// ordered list of segment fetch descriptors that drives a run.

use std::sync::Arc;

use m3u8_rs::parse_playlist_res;
use reqwest::Client;
use url::Url;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Identity of the stream a session operates on.
///
/// The manifest URL is the cache identity; `base_url` is the manifest's
/// directory (its URL with the last path component stripped), used to
/// resolve relative segment references.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub manifest_url: Url,
    pub base_url: Url,
}

impl StreamDescriptor {
    pub fn new(manifest_url: Url) -> Result<Self, EngineError> {
        let base_url = manifest_url.join(".").map_err(|e| {
            EngineError::invalid_url(manifest_url.as_str(), format!("cannot derive base URL: {e}"))
        })?;
        Ok(Self {
            manifest_url,
            base_url,
        })
    }
}

/// One segment to fetch. `index` is 0-based, dense and unique; it is the
/// authoritative merge order and must never be reordered.
#[derive(Debug, Clone)]
pub struct SegmentDescriptor {
    pub index: usize,
    pub uri: String,
    pub resolved_url: Url,
}

/// One quality option from a master playlist, highest bandwidth first.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamVariant {
    pub url: String,
    pub bandwidth: u64,
    pub resolution: Option<(u64, u64)>,
    pub quality: String,
    pub label: String,
}

pub struct SegmentPlanner {
    client: Client,
    config: Arc<EngineConfig>,
}

impl SegmentPlanner {
    pub fn new(client: Client, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }

    /// Fetch a media playlist and plan its segments.
    pub async fn plan(&self, manifest_url: &Url) -> Result<Vec<SegmentDescriptor>, EngineError> {
        let text = self.fetch_manifest(manifest_url).await?;
        plan_from_manifest(&text, manifest_url)
    }

    /// Fetch a playlist and enumerate its quality variants, highest
    /// bandwidth first. A media playlist yields a single default variant.
    pub async fn list_variants(
        &self,
        manifest_url: &Url,
    ) -> Result<Vec<StreamVariant>, EngineError> {
        let text = self.fetch_manifest(manifest_url).await?;
        variants_from_manifest(&text, manifest_url)
    }

    async fn fetch_manifest(&self, manifest_url: &Url) -> Result<String, EngineError> {
        let response = self
            .client
            .get(manifest_url.clone())
            .timeout(self.config.manifest_timeout)
            .send()
            .await
            .map_err(|e| EngineError::manifest(format!("failed to fetch manifest: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(EngineError::manifest(format!(
                "failed to fetch manifest (status {status}) from {manifest_url}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| EngineError::manifest(format!("failed to read manifest body: {e}")))
    }
}

/// Parse a media playlist into ordered segment descriptors.
///
/// Fails with a manifest error on unparseable input, a master playlist
/// (variant selection is the caller's concern), or zero segments.
pub fn plan_from_manifest(
    text: &str,
    manifest_url: &Url,
) -> Result<Vec<SegmentDescriptor>, EngineError> {
    match parse_playlist_res(text.as_bytes()) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => {
            if playlist.segments.is_empty() {
                return Err(EngineError::manifest("no segments found in manifest"));
            }
            playlist
                .segments
                .iter()
                .enumerate()
                .map(|(index, segment)| {
                    let resolved_url = resolve_segment_url(manifest_url, &segment.uri)?;
                    Ok(SegmentDescriptor {
                        index,
                        uri: segment.uri.clone(),
                        resolved_url,
                    })
                })
                .collect()
        }
        Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => Err(EngineError::manifest(
            "expected a media playlist, got a master playlist",
        )),
        Err(e) => Err(EngineError::manifest(format!(
            "failed to parse manifest: {e}"
        ))),
    }
}

/// Enumerate the variants of a playlist, sorted by bandwidth descending.
///
/// The sort is stable, so variants with equal bandwidth keep their manifest
/// order. A media playlist has no variants and maps to a single `default`
/// entry pointing back at the manifest itself.
pub fn variants_from_manifest(
    text: &str,
    manifest_url: &Url,
) -> Result<Vec<StreamVariant>, EngineError> {
    match parse_playlist_res(text.as_bytes()) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(playlist)) => {
            let mut variants = playlist
                .variants
                .iter()
                .map(|variant| {
                    let url = resolve_segment_url(manifest_url, &variant.uri)?;
                    let resolution = variant.resolution.map(|r| (r.width, r.height));
                    let mbps = variant.bandwidth as f64 / 1_000_000.0;
                    let (quality, label) = match resolution {
                        Some((width, height)) => {
                            let quality = format!("{height}p");
                            let label = format!("{width}x{height} ({quality}) - {mbps:.1} Mbps");
                            (quality, label)
                        }
                        None => {
                            let quality = format!("{mbps:.1}M");
                            (quality.clone(), quality)
                        }
                    };
                    Ok(StreamVariant {
                        url: url.to_string(),
                        bandwidth: variant.bandwidth,
                        resolution,
                        quality,
                        label,
                    })
                })
                .collect::<Result<Vec<_>, EngineError>>()?;

            variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
            Ok(variants)
        }
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => Ok(vec![StreamVariant {
            url: manifest_url.to_string(),
            bandwidth: 0,
            resolution: None,
            quality: "default".to_string(),
            label: "Default quality".to_string(),
        }]),
        Err(e) => Err(EngineError::manifest(format!(
            "failed to parse manifest: {e}"
        ))),
    }
}

/// Resolve a segment reference against its manifest URL.
///
/// Priority: an absolute URL is used unchanged; a path starting with `/` is
/// resolved against the manifest host only; anything else is resolved
/// against the manifest's directory.
pub fn resolve_segment_url(manifest_url: &Url, uri: &str) -> Result<Url, EngineError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Url::parse(uri).map_err(|e| EngineError::invalid_url(uri, e.to_string()));
    }
    // Url::join strips the last path component of the base for relative
    // references and keeps only the host for root-relative ones, which is
    // exactly the resolution order the planner needs.
    manifest_url
        .join(uri)
        .map_err(|e| EngineError::invalid_url(uri, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_url() -> Url {
        Url::parse("https://cdn.example.com/streams/movie/playlist.m3u8").unwrap()
    }

    fn media_manifest(segment_uris: &[&str]) -> String {
        let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
        for uri in segment_uris {
            text.push_str("#EXTINF:9.0,\n");
            text.push_str(uri);
            text.push('\n');
        }
        text.push_str("#EXT-X-ENDLIST\n");
        text
    }

    #[test]
    fn resolves_relative_uri_against_manifest_directory() {
        let url = resolve_segment_url(&manifest_url(), "seg_00001.ts").unwrap();
        assert_eq!(
            url.as_str(),
            "https://cdn.example.com/streams/movie/seg_00001.ts"
        );
    }

    #[test]
    fn resolves_root_relative_uri_against_host_only() {
        let url = resolve_segment_url(&manifest_url(), "/other/seg.ts").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/other/seg.ts");
    }

    #[test]
    fn absolute_uri_is_used_unchanged() {
        let url = resolve_segment_url(&manifest_url(), "https://mirror.example.net/a.ts").unwrap();
        assert_eq!(url.as_str(), "https://mirror.example.net/a.ts");
    }

    #[test]
    fn plan_preserves_manifest_order_with_dense_indices() {
        let text = media_manifest(&["a.ts", "b.ts", "c.ts"]);
        let segments = plan_from_manifest(&text, &manifest_url()).unwrap();
        assert_eq!(segments.len(), 3);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i);
        }
        assert_eq!(segments[1].uri, "b.ts");
        assert_eq!(
            segments[2].resolved_url.as_str(),
            "https://cdn.example.com/streams/movie/c.ts"
        );
    }

    #[test]
    fn empty_manifest_is_a_manifest_error() {
        let text = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-ENDLIST\n";
        let err = plan_from_manifest(text, &manifest_url()).unwrap_err();
        assert!(matches!(err, EngineError::Manifest { .. }));
    }

    #[test]
    fn master_playlist_is_rejected_by_plan() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000\nlow.m3u8\n";
        let err = plan_from_manifest(text, &manifest_url()).unwrap_err();
        assert!(matches!(err, EngineError::Manifest { .. }));
    }

    #[test]
    fn variants_sorted_by_bandwidth_descending_with_labels() {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\n\
            low.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720\n\
            mid.m3u8\n";
        let variants = variants_from_manifest(text, &manifest_url()).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].bandwidth, 2_560_000);
        assert_eq!(variants[0].quality, "720p");
        assert_eq!(variants[0].label, "1280x720 (720p) - 2.6 Mbps");
        assert_eq!(
            variants[0].url,
            "https://cdn.example.com/streams/movie/mid.m3u8"
        );
        assert_eq!(variants[1].quality, "360p");
    }

    #[test]
    fn equal_bandwidth_variants_keep_manifest_order() {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000000\n\
            first.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000000\n\
            second.m3u8\n";
        let variants = variants_from_manifest(text, &manifest_url()).unwrap();
        assert!(variants[0].url.ends_with("first.m3u8"));
        assert!(variants[1].url.ends_with("second.m3u8"));
    }

    #[test]
    fn media_playlist_yields_single_default_variant() {
        let text = media_manifest(&["a.ts"]);
        let variants = variants_from_manifest(&text, &manifest_url()).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].quality, "default");
        assert_eq!(variants[0].url, manifest_url().to_string());
    }

    #[test]
    fn stream_descriptor_derives_base_url() {
        let descriptor = StreamDescriptor::new(manifest_url()).unwrap();
        assert_eq!(
            descriptor.base_url.as_str(),
            "https://cdn.example.com/streams/movie/"
        );
    }
}
