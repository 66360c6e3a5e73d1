use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame payload has no `,` separating the prefix from the data")]
    MissingSeparator,
    #[error("Frame payload is empty")]
    EmptyPayload,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unrecognized image encoding")]
    UnknownFormat,
    #[error("Error reading image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Image(#[from] image::ImageError),
}

/// A data-URI style frame split into its encoding hint and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// MIME type taken from the prefix, e.g. `image/jpeg`.
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl EncodedFrame {
    /// Everything after the first comma is base64 image data; the prefix
    /// only contributes a format hint.
    pub fn parse(data_uri: &str) -> Result<Self, DecodeError> {
        let (prefix, payload) = data_uri
            .split_once(',')
            .ok_or(DecodeError::MissingSeparator)?;

        let payload = payload.trim();
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        let bytes = STANDARD.decode(payload)?;
        if bytes.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        Ok(Self {
            mime: mime_from_prefix(prefix),
            bytes,
        })
    }

    pub fn format_hint(&self) -> Option<ImageFormat> {
        self.mime.as_deref().and_then(ImageFormat::from_mime_type)
    }

    /// Decodes into an RGB buffer with the source dimensions. The byte
    /// signature wins over the MIME hint when both are available.
    pub fn decode(&self) -> Result<RgbImage, DecodeError> {
        let mut reader = image::ImageReader::new(Cursor::new(&self.bytes)).with_guessed_format()?;

        if reader.format().is_none() {
            match self.format_hint() {
                Some(format) => reader.set_format(format),
                None => return Err(DecodeError::UnknownFormat),
            }
        }

        Ok(reader.decode()?.to_rgb8())
    }
}

fn mime_from_prefix(prefix: &str) -> Option<String> {
    let mime = prefix
        .trim()
        .strip_prefix("data:")?
        .split(';')
        .next()?
        .trim();
    (!mime.is_empty()).then(|| mime.to_ascii_lowercase())
}

/// Turns a data-URI frame into a pixel buffer.
pub fn decode_frame(data_uri: &str) -> Result<RgbImage, DecodeError> {
    EncodedFrame::parse(data_uri)?.decode()
}

#[cfg(test)]
pub(crate) fn encode_data_uri(img: &RgbImage, format: ImageFormat) -> String {
    let mut image_data: Vec<u8> = Vec::new();
    img.write_to(&mut Cursor::new(&mut image_data), format)
        .unwrap();
    format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(image_data)
    )
}
