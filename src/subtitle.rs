//! Subtitle recovery and WebVTT serialization.
//!
//! [`extract_subtitles`] activates the first text track of a source, waits
//! for its cue list to settle, and serializes the cues into a
//! [`SubtitlePayload`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use framecast::{Cue, to_webvtt};
//!
//! let payload = to_webvtt(&[Cue::new(
//!     Duration::from_millis(1_500),
//!     Duration::from_secs(4),
//!     "Hello",
//! )]);
//! assert_eq!(
//!     payload.as_str(),
//!     "WEBVTT\n\n00:00:01.500 --> 00:00:04.000\nHello\n\n",
//! );
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult, Write},
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    configuration::SettlePolicy,
    progress::CancellationToken,
    source::{TextTrack, TrackMode},
};

/// MIME type of a serialized [`SubtitlePayload`].
pub const WEBVTT_MIME_TYPE: &str = "text/vtt";

/// A timed subtitle entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// When the cue starts displaying.
    pub start_time: Duration,
    /// When the cue stops displaying.
    pub end_time: Duration,
    /// The cue text. May span several lines.
    pub text: String,
}

impl Cue {
    /// Create a cue.
    pub fn new(start_time: Duration, end_time: Duration, text: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            text: text.into(),
        }
    }
}

/// A WebVTT document built from a track's cues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitlePayload {
    text: String,
    cue_count: usize,
}

impl SubtitlePayload {
    /// The serialized document.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume the payload and return the serialized document.
    pub fn into_string(self) -> String {
        self.text
    }

    /// Number of cues in the document.
    pub fn cue_count(&self) -> usize {
        self.cue_count
    }

    /// MIME type of the document.
    pub fn mime_type(&self) -> &'static str {
        WEBVTT_MIME_TYPE
    }
}

impl Display for SubtitlePayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.text)
    }
}

/// Serialize cues into a WebVTT document, preserving their order.
pub fn to_webvtt(cues: &[Cue]) -> SubtitlePayload {
    let mut text = String::from("WEBVTT\n\n");
    for cue in cues {
        let _ = write!(
            text,
            "{} --> {}\n{}\n\n",
            format_vtt_timestamp(cue.start_time),
            format_vtt_timestamp(cue.end_time),
            cue.text,
        );
    }

    SubtitlePayload {
        text,
        cue_count: cues.len(),
    }
}

/// Format a duration as a WebVTT timestamp (`HH:MM:SS.mmm`).
pub fn format_vtt_timestamp(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = duration.subsec_millis();
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Recover the first text track's cues as a WebVTT payload.
///
/// Returns `None` when there are no tracks, when the track is still empty
/// once the settle policy resolves, or when `token` is cancelled while
/// waiting.
pub async fn extract_subtitles(
    tracks: &[TextTrack],
    policy: &SettlePolicy,
    token: &CancellationToken,
) -> Option<SubtitlePayload> {
    let track = tracks.first()?;
    log::debug!(
        "Activating text track {:?} ({} track(s) available)",
        track.label(),
        tracks.len(),
    );
    track.set_mode(TrackMode::Hidden);

    settle(track, policy, token).await;
    if token.is_cancelled() {
        return None;
    }

    let cues = track.cues();
    if cues.is_empty() {
        log::debug!("Text track produced no cues");
        return None;
    }

    log::debug!("Collected {} subtitle cue(s)", cues.len());
    Some(to_webvtt(&cues))
}

async fn settle(track: &TextTrack, policy: &SettlePolicy, token: &CancellationToken) {
    match *policy {
        SettlePolicy::Fixed(delay) => tokio::time::sleep(delay).await,
        SettlePolicy::Poll { interval, timeout } => {
            let deadline = Instant::now() + timeout;
            let mut previous_count = None;

            loop {
                if track.is_complete() || token.is_cancelled() {
                    return;
                }

                let count = track.cue_count();
                if count > 0 && previous_count == Some(count) {
                    return;
                }
                previous_count = Some(count);

                let now = Instant::now();
                if now >= deadline {
                    log::debug!("Cue list did not settle within {timeout:?}");
                    return;
                }
                tokio::time::sleep(interval.min(deadline - now)).await;
            }
        }
    }
}

/// Strip ASS/SSA override blocks and the `Dialogue:` field prefix.
pub(crate) fn strip_ass_tags(input: &str) -> String {
    // Dialogue: Layer,Start,End,Style,Name,MarginL,MarginR,MarginV,Effect,Text
    let text = if input.starts_with("Dialogue:") {
        input
            .char_indices()
            .filter(|&(_, c)| c == ',')
            .nth(8)
            .map_or(input, |(index, _)| &input[index + 1..])
    } else if input.split(',').count() >= 9 && input.split(',').next().is_some_and(is_digits) {
        // Decoder output: ReadOrder,Layer,Style,Name,MarginL,MarginR,MarginV,Effect,Text
        input
            .char_indices()
            .filter(|&(_, c)| c == ',')
            .nth(7)
            .map_or(input, |(index, _)| &input[index + 1..])
    } else {
        input
    };

    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '{' if !in_tag => in_tag = true,
            '}' if in_tag => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    result
        .replace("\\N", "\n")
        .replace("\\n", "\n")
        .trim()
        .to_string()
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}
