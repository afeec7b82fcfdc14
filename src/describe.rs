//! Frame captioning.

use crate::{error::FramecastError, extraction::Frame, services::ImageDescriber};

/// Ask `describer` for a caption of `frame`, following `instruction`.
///
/// The returned caption is trimmed.
///
/// # Errors
///
/// Returns [`FramecastError::Description`] if the service fails or answers
/// with an empty caption.
pub async fn describe_frame<D: ImageDescriber + ?Sized>(
    describer: &D,
    frame: &Frame,
    instruction: &str,
) -> Result<String, FramecastError> {
    log::debug!(
        "Describing frame at {:?} ({} bytes)",
        frame.timestamp(),
        frame.image().len()
    );

    let caption = describer
        .describe(frame.image(), instruction)
        .await
        .map_err(|error| match error {
            FramecastError::Description(_) | FramecastError::Cancelled => error,
            other => FramecastError::Description(other.to_string()),
        })?;

    let caption = caption.trim();
    if caption.is_empty() {
        return Err(FramecastError::Description(
            "service returned an empty caption".to_string(),
        ));
    }

    Ok(caption.to_string())
}
