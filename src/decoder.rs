//! FFmpeg-backed media sources.
//!
//! [`FfmpegOpener`] opens files with `ffmpeg-next`. Each [`FfmpegSource`]
//! owns one dedicated decoder thread that holds the demuxer, the video
//! decoder and the RGB scaler; seeks are sent to it over a channel and
//! answered through a `oneshot`, so the async caller never blocks on
//! decoding. Dropping the source closes the channel and the thread releases
//! every FFmpeg resource.
//!
//! Subtitle streams are exposed as [`TextTrack`]s whose cues are decoded by
//! a separate thread, with its own demuxer, once the track is activated.

use std::{
    path::{Path, PathBuf},
    sync::mpsc::{Receiver, Sender, channel},
    thread,
    time::Duration,
};

use async_trait::async_trait;
use ffmpeg_next::{
    Rational, Subtitle,
    codec::{context::Context as CodecContext, decoder::Video as VideoDecoder},
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    subtitle::Rect,
};
use image::RgbImage;
use tokio::sync::oneshot;

use crate::{
    conversion::{duration_to_seek_timestamp, pts_to_micros, pts_to_seconds, rgb_frame_to_image},
    error::FramecastError,
    ffmpeg,
    metadata::{SourceMetadata, SubtitleTrackInfo},
    source::{CueSink, MediaOpener, MediaSource, TextTrack},
    subtitle::{Cue, strip_ass_tags},
};

/// Opens media files with FFmpeg.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegOpener;

impl FfmpegOpener {
    /// Create an opener.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaOpener for FfmpegOpener {
    type Source = FfmpegSource;

    async fn open(&self, path: &Path) -> Result<FfmpegSource, FramecastError> {
        let path = path.to_path_buf();
        log::debug!("Opening media file: {}", path.display());

        let (ready_sender, ready_receiver) = oneshot::channel();
        let (request_sender, request_receiver) = channel();

        let worker_path = path.clone();
        thread::Builder::new()
            .name("framecast-decoder".to_string())
            .spawn(move || run_decoder(&worker_path, ready_sender, request_receiver))
            .map_err(|error| FramecastError::MediaLoad {
                path: path.clone(),
                reason: format!("could not start decoder thread: {error}"),
            })?;

        let metadata = ready_receiver
            .await
            .map_err(|_| FramecastError::MediaLoad {
                path: path.clone(),
                reason: "decoder thread exited before reading metadata".to_string(),
            })??;

        let tracks = metadata
            .subtitle_tracks
            .iter()
            .map(|info| subtitle_track(&path, info))
            .collect();

        Ok(FfmpegSource {
            metadata,
            tracks,
            requests: request_sender,
            picture: None,
        })
    }
}

struct SeekRequest {
    position: Duration,
    reply: oneshot::Sender<Result<RgbImage, FramecastError>>,
}

/// A media file opened by [`FfmpegOpener`].
pub struct FfmpegSource {
    metadata: SourceMetadata,
    tracks: Vec<TextTrack>,
    requests: Sender<SeekRequest>,
    picture: Option<RgbImage>,
}

impl std::fmt::Debug for FfmpegSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegSource")
            .field("metadata", &self.metadata)
            .field("tracks", &self.tracks)
            .field("has_picture", &self.picture.is_some())
            .finish()
    }
}

#[async_trait]
impl MediaSource for FfmpegSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn text_tracks(&self) -> Vec<TextTrack> {
        self.tracks.clone()
    }

    async fn seek(&mut self, position: Duration) -> Result<(), FramecastError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SeekRequest { position, reply })
            .map_err(|_| FramecastError::Ffmpeg("decoder thread has stopped".to_string()))?;

        let picture = response
            .await
            .map_err(|_| FramecastError::Ffmpeg("decoder thread has stopped".to_string()))??;
        self.picture = Some(picture);
        Ok(())
    }

    fn current_picture(&self) -> Option<&RgbImage> {
        self.picture.as_ref()
    }
}

fn run_decoder(
    path: &Path,
    ready: oneshot::Sender<Result<SourceMetadata, FramecastError>>,
    requests: Receiver<SeekRequest>,
) {
    let mut decoder = match FrameDecoder::open(path) {
        Ok(decoder) => decoder,
        Err(error) => {
            let _ = ready.send(Err(error));
            return;
        }
    };

    if ready.send(Ok(decoder.metadata.clone())).is_err() {
        return;
    }

    while let Ok(request) = requests.recv() {
        let result = decoder.decode_at(request.position);
        let _ = request.reply.send(result);
    }

    log::debug!("Released decoder for {}", path.display());
}

/// Demuxer, decoder and scaler for one file. Lives on the decoder thread.
struct FrameDecoder {
    input: Input,
    decoder: VideoDecoder,
    scaler: Option<ScalingContext>,
    stream_index: usize,
    time_base: Rational,
    tolerance_secs: f64,
    metadata: SourceMetadata,
}

impl FrameDecoder {
    fn open(path: &Path) -> Result<Self, FramecastError> {
        ffmpeg::initialize(path)?;

        let load_error = |reason: String| FramecastError::MediaLoad {
            path: path.to_path_buf(),
            reason,
        };

        let input = ffmpeg_next::format::input(&path).map_err(|error| load_error(error.to_string()))?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| load_error("no video stream".to_string()))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let frames_per_second = {
            let rate = stream.avg_frame_rate();
            if rate.denominator() != 0 && rate.numerator() != 0 {
                f64::from(rate)
            } else {
                let rate = stream.rate();
                if rate.denominator() != 0 { f64::from(rate) } else { 0.0 }
            }
        };

        let stream_duration = stream.duration();
        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| load_error(format!("failed to create video decoder: {error}")))?;

        let container_micros = input.duration();
        let duration = if container_micros > 0 {
            Duration::from_micros(container_micros as u64)
        } else if stream_duration > 0 {
            Duration::from_micros(pts_to_micros(stream_duration, time_base))
        } else {
            Duration::ZERO
        };

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let subtitle_tracks = input
            .streams()
            .filter(|stream| stream.parameters().medium() == Type::Subtitle)
            .map(|stream| SubtitleTrackInfo {
                stream_index: stream.index(),
                codec: stream.parameters().id().name().to_string(),
                language: stream.metadata().get("language").map(str::to_string),
                title: stream.metadata().get("title").map(str::to_string),
            })
            .collect();

        let metadata = SourceMetadata {
            duration,
            width: decoder.width(),
            height: decoder.height(),
            frames_per_second,
            format: input.format().name().to_string(),
            codec,
            subtitle_tracks,
        };

        log::debug!(
            "Opened {}: {}x{} {} @ {:.2} fps, {:?}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.codec,
            metadata.frames_per_second,
            metadata.duration,
        );

        // Accept a frame half a frame early so rounding never skips the
        // frame that is displayed at the requested time.
        let tolerance_secs = if frames_per_second > 0.0 {
            0.5 / frames_per_second
        } else {
            0.0
        };

        Ok(Self {
            input,
            decoder,
            scaler: None,
            stream_index,
            time_base,
            tolerance_secs,
            metadata,
        })
    }

    /// Seek to the keyframe before `position` and decode forward to the
    /// first frame displayed at or after it.
    fn decode_at(&mut self, position: Duration) -> Result<RgbImage, FramecastError> {
        let target = duration_to_seek_timestamp(position);
        self.input.seek(target, ..=target)?;
        self.decoder.flush();

        let target_secs = position.as_secs_f64() - self.tolerance_secs;
        let (width, height) = (self.metadata.width, self.metadata.height);
        let mut decoded = VideoFrame::empty();
        let mut previous = VideoFrame::empty();
        let mut have_previous = false;

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }

            self.decoder.send_packet(&packet)?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if frame_seconds(&decoded, self.time_base) >= target_secs {
                    return scale_frame(&mut self.scaler, &decoded, width, height);
                }
                std::mem::swap(&mut decoded, &mut previous);
                have_previous = true;
            }
        }

        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            if frame_seconds(&decoded, self.time_base) >= target_secs {
                return scale_frame(&mut self.scaler, &decoded, width, height);
            }
            std::mem::swap(&mut decoded, &mut previous);
            have_previous = true;
        }

        // Past the last frame: use the last picture the stream has.
        if have_previous {
            return scale_frame(&mut self.scaler, &previous, width, height);
        }

        Err(FramecastError::Ffmpeg(format!(
            "no picture could be decoded at {position:?}"
        )))
    }
}

fn frame_seconds(frame: &VideoFrame, time_base: Rational) -> f64 {
    let pts = frame.timestamp().or_else(|| frame.pts()).unwrap_or(0);
    pts_to_seconds(pts, time_base)
}

fn scale_frame(
    scaler: &mut Option<ScalingContext>,
    frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Result<RgbImage, FramecastError> {
    let stale = scaler.as_ref().is_none_or(|context| {
        let input = context.input();
        input.format != frame.format()
            || input.width != frame.width()
            || input.height != frame.height()
    });
    if stale {
        *scaler = Some(ScalingContext::get(
            frame.format(),
            frame.width(),
            frame.height(),
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::BILINEAR,
        )?);
    }

    let Some(context) = scaler.as_mut() else {
        return Err(FramecastError::Ffmpeg("scaler unavailable".to_string()));
    };

    let mut rgb_frame = VideoFrame::empty();
    context.run(frame, &mut rgb_frame)?;
    rgb_frame_to_image(&rgb_frame, width, height)
}

fn subtitle_track(path: &Path, info: &SubtitleTrackInfo) -> TextTrack {
    let path: PathBuf = path.to_path_buf();
    let stream_index = info.stream_index;

    TextTrack::new(
        info.title.clone(),
        info.language.clone(),
        Box::new(move |sink: CueSink| {
            let spawned = thread::Builder::new()
                .name("framecast-subtitles".to_string())
                .spawn(move || {
                    if let Err(error) = decode_cues(&path, stream_index, &sink) {
                        log::warn!("Subtitle decoding stopped early: {error}");
                    }
                    sink.finish();
                });
            if let Err(error) = spawned {
                log::warn!("Could not start subtitle decoder thread: {error}");
            }
        }),
    )
}

/// Decode every text cue of one subtitle stream into `sink`, in stream
/// order.
fn decode_cues(path: &Path, stream_index: usize, sink: &CueSink) -> Result<(), FramecastError> {
    let mut input = ffmpeg_next::format::input(&path)?;

    let (time_base, mut decoder) = {
        let stream = input.stream(stream_index).ok_or_else(|| {
            FramecastError::Ffmpeg(format!("subtitle stream {stream_index} not found"))
        })?;
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .subtitle()?;
        (stream.time_base(), decoder)
    };

    let mut subtitle = Subtitle::new();
    let mut count = 0usize;

    for (stream, packet) in input.packets() {
        if !sink.is_observed() {
            log::debug!("Text track dropped; stopping subtitle decoding");
            break;
        }
        if stream.index() != stream_index {
            continue;
        }
        if !decoder.decode(&packet, &mut subtitle)? {
            continue;
        }

        // Subtitle PTS is in AV_TIME_BASE; fall back to the packet's own.
        let base_micros = subtitle
            .pts()
            .map(|pts| pts.max(0) as u64)
            .unwrap_or_else(|| pts_to_micros(packet.pts().unwrap_or(0), time_base));
        let base = Duration::from_micros(base_micros);

        let start_time = base + Duration::from_millis(u64::from(subtitle.start()));
        let end_time = if subtitle.end() > subtitle.start() {
            base + Duration::from_millis(u64::from(subtitle.end()))
        } else {
            base + Duration::from_micros(pts_to_micros(packet.duration(), time_base))
        };

        let text = subtitle
            .rects()
            .filter_map(|rect| match rect {
                Rect::Text(text) => Some(text.get().trim().to_string()),
                Rect::Ass(ass) => Some(strip_ass_tags(ass.get())),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if !text.is_empty() {
            sink.push(Cue::new(start_time, end_time, text));
            count += 1;
        }
    }

    log::debug!("Decoded {count} cue(s) from subtitle stream {stream_index}");
    Ok(())
}
