use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::ApiError;

/*
Inline image payloads arrive as data URLs:

    data:image/png;base64,iVBORw0KGgo...

The decoded bytes go to the asset store; this module only parses and
validates the envelope.
*/

#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub extension: String,
    pub bytes: Vec<u8>,
}

pub fn parse_data_url(field: &str, data: &str) -> Result<ImagePayload, ApiError> {
    let rest = data
        .strip_prefix("data:image/")
        .ok_or_else(|| ApiError::validation(field, "expected a data:image payload"))?;

    let (extension, encoded) = rest
        .split_once(";base64,")
        .ok_or_else(|| ApiError::validation(field, "expected a base64-encoded payload"))?;

    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::validation(field, "invalid image format"));
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| ApiError::validation(field, "invalid base64 image data"))?;

    Ok(ImagePayload {
        extension: extension.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // "hello" encoded
    const PNG_URL: &str = "data:image/png;base64,aGVsbG8=";

    #[test]
    fn parses_a_wellformed_data_url() {
        let payload = parse_data_url("avatar", PNG_URL).unwrap();
        assert_eq!(payload.extension, "png");
        assert_eq!(payload.bytes, b"hello");
    }

    #[test]
    fn rejects_non_image_payloads() {
        assert!(parse_data_url("avatar", "data:text/plain;base64,aGVsbG8=").is_err());
        assert!(parse_data_url("avatar", "just a string").is_err());
    }

    #[test]
    fn rejects_missing_or_broken_encoding() {
        assert!(parse_data_url("avatar", "data:image/png,aGVsbG8=").is_err());
        assert!(parse_data_url("avatar", "data:image/png;base64,???").is_err());
    }

    #[test]
    fn error_is_grouped_under_the_given_field() {
        match parse_data_url("image", "nope") {
            Err(crate::error::ApiError::Validation(errors)) => {
                assert!(errors.field("image").is_some());
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
