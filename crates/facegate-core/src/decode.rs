//! Decoding of client-supplied image bytes into grayscale frames.
//!
//! Enrollment and approval requests carry JPEG or PNG stills captured by a
//! browser. The whole pipeline downstream (detection, alignment, embedding)
//! works on 8-bit grayscale, so colour information is dropped at the door.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid image format: {0}")]
    InvalidImage(String),
    #[error("image has zero width or height")]
    EmptyImage,
}

/// A decoded grayscale frame, row-major, one byte per pixel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode encoded image bytes (JPEG, PNG, ...) into a grayscale [`Frame`].
pub fn decode_image(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| DecodeError::InvalidImage(e.to_string()))?;

    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyImage);
    }

    Ok(Frame {
        pixels: gray.into_raw(),
        width,
        height,
    })
}
