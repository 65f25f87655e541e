//! Shield keys and immutable image payloads.
//!
//! A [`ShieldKey`] identifies one logically distinct shield image and is
//! used both as the cache key and as the in-flight deduplication key. A
//! [`ShieldAsset`] is the decoded payload shared read-only by every
//! requester; it wraps [`Bytes`] so cloning it for fan-out is cheap.

use std::fmt;

use bytes::Bytes;

use crate::fetch::FetchError;

/// Stable identifier for a logically distinct shield image.
///
/// Keys must be stable and unique per logically-identical image: two
/// requests carrying the same key are assumed to want the same bytes and
/// will share one cache entry and one in-flight download.
///
/// # Example
///
/// ```
/// use shieldcache::ShieldKey;
///
/// let key = ShieldKey::for_shield("https://shields.example.com/v1", "us-interstate", "white");
/// assert_eq!(key.as_str(), "us-interstate-white@https://shields.example.com/v1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShieldKey(String);

impl ShieldKey {
    /// Creates a key from an already-derived identifier string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives a key from the shield's source description.
    ///
    /// The base URL participates so that the same shield name served from
    /// two sprite sources never collides.
    #[must_use]
    pub fn for_shield(base_url: &str, name: &str, text_color: &str) -> Self {
        Self(format!("{name}-{text_color}@{base_url}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShieldKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ShieldKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Image formats recognized by the payload sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

/// Decoded, immutable shield image payload.
///
/// Owned by the cache once stored and shared read-only by all consumers.
/// Cloning is cheap: the pixel data lives in a reference-counted [`Bytes`]
/// buffer.
#[derive(Debug, Clone)]
pub struct ShieldAsset {
    data: Bytes,
    format: ImageFormat,
}

impl ShieldAsset {
    /// Decodes a downloaded body into an asset.
    ///
    /// Full image decoding is out of scope for this layer; "decode" means
    /// validating that the body is non-empty and starts with a recognized
    /// image signature, which is enough to classify garbage bodies (HTML
    /// error pages, truncated responses) as [`FetchError::NoImageData`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NoImageData`] if `data` is empty or does not
    /// carry a recognized image signature.
    pub fn decode(url: &str, data: Bytes) -> Result<Self, FetchError> {
        if data.is_empty() {
            return Err(FetchError::no_image_data(url));
        }
        let format = sniff_format(&data).ok_or_else(|| FetchError::no_image_data(url))?;
        Ok(Self { data, format })
    }

    /// Returns the raw image bytes.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the sniffed image format.
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Returns the raw byte length of the payload.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Identifies the image format from its leading magic bytes.
fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageFormat::Png)
    } else if data.starts_with(b"\xff\xd8\xff") {
        Some(ImageFormat::Jpeg)
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        Some(ImageFormat::Webp)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shield_key_for_shield_is_stable() {
        let a = ShieldKey::for_shield("https://s.example.com", "us-101", "black");
        let b = ShieldKey::for_shield("https://s.example.com", "us-101", "black");
        assert_eq!(a, b);
    }

    #[test]
    fn test_shield_key_distinguishes_sources() {
        let a = ShieldKey::for_shield("https://one.example.com", "us-101", "black");
        let b = ShieldKey::for_shield("https://two.example.com", "us-101", "black");
        assert_ne!(a, b);
    }

    #[test]
    fn test_shield_key_distinguishes_text_color() {
        let a = ShieldKey::for_shield("https://s.example.com", "us-101", "black");
        let b = ShieldKey::for_shield("https://s.example.com", "us-101", "white");
        assert_ne!(a, b);
    }

    #[test]
    fn test_shield_key_display_matches_as_str() {
        let key = ShieldKey::new("shield-A");
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn test_decode_png() {
        let data = Bytes::from_static(b"\x89PNG\r\n\x1a\nrest-of-image");
        let asset = ShieldAsset::decode("https://example.com/shield.png", data).unwrap();
        assert_eq!(asset.format(), ImageFormat::Png);
        assert_eq!(asset.byte_len(), 21);
    }

    #[test]
    fn test_decode_jpeg() {
        let data = Bytes::from_static(b"\xff\xd8\xff\xe0rest");
        let asset = ShieldAsset::decode("https://example.com/shield.jpg", data).unwrap();
        assert_eq!(asset.format(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_decode_gif() {
        let data = Bytes::from_static(b"GIF89arest");
        let asset = ShieldAsset::decode("https://example.com/shield.gif", data).unwrap();
        assert_eq!(asset.format(), ImageFormat::Gif);
    }

    #[test]
    fn test_decode_webp() {
        let data = Bytes::from_static(b"RIFF\x00\x00\x00\x00WEBPVP8 ");
        let asset = ShieldAsset::decode("https://example.com/shield.webp", data).unwrap();
        assert_eq!(asset.format(), ImageFormat::Webp);
    }

    #[test]
    fn test_decode_empty_body_is_no_image_data() {
        let result = ShieldAsset::decode("https://example.com/empty", Bytes::new());
        assert!(matches!(result, Err(FetchError::NoImageData { .. })));
    }

    #[test]
    fn test_decode_html_body_is_no_image_data() {
        let data = Bytes::from_static(b"<html><body>not found</body></html>");
        let result = ShieldAsset::decode("https://example.com/redirect", data);
        assert!(matches!(result, Err(FetchError::NoImageData { .. })));
    }

    #[test]
    fn test_decode_truncated_webp_header_is_no_image_data() {
        // RIFF prefix but too short to carry the WEBP tag
        let data = Bytes::from_static(b"RIFF\x00\x00");
        let result = ShieldAsset::decode("https://example.com/short", data);
        assert!(matches!(result, Err(FetchError::NoImageData { .. })));
    }

    #[test]
    fn test_asset_clone_shares_bytes() {
        let data = Bytes::from_static(b"\x89PNG\r\n\x1a\nabc");
        let asset = ShieldAsset::decode("https://example.com/s.png", data).unwrap();
        let clone = asset.clone();
        assert_eq!(asset.data(), clone.data());
        assert_eq!(asset.byte_len(), clone.byte_len());
    }
}
