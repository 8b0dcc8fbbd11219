//! Image URI classification shared by every multimodal converter.

/// Classification of an image reference.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlTypeInfo {
    /// A `data:<media-type>;base64,<payload>` URI. `data` is the payload
    /// with the prefix stripped.
    Base64 {
        media_type: Option<String>,
        data: String,
    },

    /// Anything else: a remote URL the provider fetches itself.
    Remote,
}

impl UrlTypeInfo {
    pub fn media_type(&self) -> Option<&str> {
        match self {
            Self::Base64 { media_type, .. } => media_type.as_deref(),
            Self::Remote => None,
        }
    }
}

/// Strip surrounding whitespace and percent-encode embedded spaces.
///
/// Providers reject URLs with raw spaces; everything else is passed through
/// untouched so already-encoded URLs stay byte-identical.
pub fn sanitize_image_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(' ') {
        trimmed.replace(' ', "%20")
    } else {
        trimmed.to_string()
    }
}

/// Classify a sanitized image URL.
///
/// A data URI of the form `data:image/png;base64,AAAA` yields
/// [`UrlTypeInfo::Base64`] with `media_type = "image/png"` and the bare
/// payload; a data URI without a media type still classifies as base64.
/// Everything else is [`UrlTypeInfo::Remote`].
pub fn extract_url_type_info(url: &str) -> UrlTypeInfo {
    let Some(rest) = url.strip_prefix("data:") else {
        return UrlTypeInfo::Remote;
    };

    let Some((header, payload)) = rest.split_once(',') else {
        return UrlTypeInfo::Remote;
    };

    if !header.ends_with(";base64") {
        return UrlTypeInfo::Remote;
    }

    let media_type = header.trim_end_matches(";base64");
    let media_type = if media_type.is_empty() {
        None
    } else {
        Some(media_type.to_string())
    };

    UrlTypeInfo::Base64 {
        media_type,
        data: payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_trims_and_encodes_spaces() {
        assert_eq!(
            sanitize_image_url("  https://example.com/a b.png \n"),
            "https://example.com/a%20b.png"
        );
        assert_eq!(
            sanitize_image_url("https://example.com/a%20b.png"),
            "https://example.com/a%20b.png"
        );
    }

    #[test]
    fn data_uri_classifies_as_base64_with_media_type() {
        let info = extract_url_type_info("data:image/jpeg;base64,/9j/4AAQ");

        assert_eq!(
            info,
            UrlTypeInfo::Base64 {
                media_type: Some("image/jpeg".into()),
                data: "/9j/4AAQ".into(),
            }
        );
        assert_eq!(info.media_type(), Some("image/jpeg"));
    }

    #[test]
    fn data_uri_without_media_type_still_base64() {
        let info = extract_url_type_info("data:;base64,AAAA");
        assert_eq!(
            info,
            UrlTypeInfo::Base64 {
                media_type: None,
                data: "AAAA".into(),
            }
        );
    }

    #[test]
    fn remote_urls_and_malformed_data_uris_classify_as_remote() {
        assert_eq!(extract_url_type_info("https://example.com/cat.png"), UrlTypeInfo::Remote);
        assert_eq!(extract_url_type_info("data:image/png,not-base64"), UrlTypeInfo::Remote);
        assert_eq!(extract_url_type_info("data:image/png;base64"), UrlTypeInfo::Remote);
    }
}
