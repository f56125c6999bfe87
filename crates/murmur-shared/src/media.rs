//! Inline encoding of outbound images.
//!
//! Images travel as `data:<mime>;base64,<bytes>` URLs so the optimistic log
//! entry can be rendered immediately and is byte-identical to what is sent.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::MediaError;
use crate::types::Payload;

/// Encode raw image bytes into an image payload.
pub fn encode_image(bytes: &[u8], mime: &str, max_size: usize) -> Result<Payload, MediaError> {
    if !mime.starts_with("image/") {
        return Err(MediaError::NotAnImage(mime.to_string()));
    }
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }
    if bytes.len() > max_size {
        return Err(MediaError::TooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }

    Ok(Payload::Image(format!(
        "data:{mime};base64,{}",
        STANDARD.encode(bytes)
    )))
}
