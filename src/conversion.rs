//! Internal conversion helpers.
//!
//! Pixel-data copying and timestamp conversion shared by the FFmpeg
//! backend.

use std::time::Duration;

use ffmpeg_next::{Rational, frame::Video as VideoFrame};
use image::RgbImage;

use crate::error::FramecastError;

/// Copy pixel data from an FFmpeg video frame into a tightly-packed buffer.
///
/// `bytes_per_pixel` is the number of bytes per pixel of the frame's
/// format (3 for RGB24).
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_len = (width as usize) * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_len {
        data[..row_len * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_len * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_len]);
        }
        buffer
    }
}

/// Convert a scaled RGB24 frame into an [`RgbImage`].
pub(crate) fn rgb_frame_to_image(
    rgb_frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Result<RgbImage, FramecastError> {
    let buffer = frame_to_buffer(rgb_frame, width, height, 3);
    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        FramecastError::Ffmpeg("decoded frame is smaller than its reported size".to_string())
    })
}

/// Convert a [`Duration`] to a seek timestamp in AV_TIME_BASE
/// (microseconds), as expected by container-level seeking.
pub(crate) fn duration_to_seek_timestamp(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Rescale a PTS value from a stream time base to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator().max(1))
}

/// Rescale a packet PTS value from a stream time base to microseconds.
pub(crate) fn pts_to_micros(pts: i64, time_base: Rational) -> u64 {
    let pts = pts.max(0) as u128;
    let numerator = time_base.numerator().max(0) as u128;
    let denominator = time_base.denominator().max(1) as u128;
    u64::try_from(pts * numerator * 1_000_000 / denominator).unwrap_or(u64::MAX)
}
