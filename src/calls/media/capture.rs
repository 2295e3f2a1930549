//! Sources of encoded samples for local tracks.
//!
//! A [`CaptureSource`] is opened once per track when local media is
//! captured. It yields a [`SampleFeed`] of already encoded frames (Opus for
//! audio, VP8 for video) which the engine paces into the track.
//!
//! [`FileCapture`] plays Ogg/Opus and IVF/VP8 recordings in a loop.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;

use super::{MediaError, TrackKind};

/// Opus granule positions count 48 kHz samples.
const OPUS_SAMPLES_PER_MS: u64 = 48;

/// One encoded frame and how long it plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub data: Bytes,
    pub duration: Duration,
}

pub trait SampleFeed: Send {
    /// `Ok(None)` once the feed is exhausted.
    fn next_sample(&mut self) -> Result<Option<EncodedSample>, MediaError>;
}

pub trait CaptureSource: Send + Sync + 'static {
    /// Open the device behind `kind`. A missing or unusable device is
    /// [`MediaError::DeviceUnavailable`].
    fn open(&self, kind: TrackKind) -> Result<Box<dyn SampleFeed>, MediaError>;
}

/// Capture backed by recorded files, one per track kind.
#[derive(Debug, Clone, Default)]
pub struct FileCapture {
    audio: Option<PathBuf>,
    video: Option<PathBuf>,
}

impl FileCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ogg file with an Opus stream.
    pub fn with_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio = Some(path.into());
        self
    }

    /// IVF file with a VP8 stream.
    pub fn with_video(mut self, path: impl Into<PathBuf>) -> Self {
        self.video = Some(path.into());
        self
    }
}

impl CaptureSource for FileCapture {
    fn open(&self, kind: TrackKind) -> Result<Box<dyn SampleFeed>, MediaError> {
        match kind {
            TrackKind::Audio => match &self.audio {
                Some(path) => Ok(Box::new(OggFeed::open(path)?)),
                None => Err(MediaError::DeviceUnavailable(
                    "no audio source configured".to_string(),
                )),
            },
            TrackKind::Video => match &self.video {
                Some(path) => Ok(Box::new(IvfFeed::open(path)?)),
                None => Err(MediaError::DeviceUnavailable(
                    "no video source configured".to_string(),
                )),
            },
        }
    }
}

fn open_file(path: &Path) -> Result<BufReader<File>, MediaError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| MediaError::DeviceUnavailable(format!("{}: {}", path.display(), e)))
}

fn unreadable(path: &Path, e: impl std::fmt::Display) -> MediaError {
    MediaError::DeviceUnavailable(format!("{}: {}", path.display(), e))
}

struct IvfFeed {
    reader: IVFReader<BufReader<File>>,
    frame_duration: Duration,
}

impl IvfFeed {
    fn open(path: &Path) -> Result<Self, MediaError> {
        let (reader, header) = IVFReader::new(open_file(path)?).map_err(|e| unreadable(path, e))?;
        if header.timebase_denominator == 0 {
            return Err(unreadable(path, "zero timebase"));
        }
        let frame_ms = 1000 * u64::from(header.timebase_numerator)
            / u64::from(header.timebase_denominator);
        debug!(
            "Opened {} ({}x{}, {} ms per frame)",
            path.display(),
            header.width,
            header.height,
            frame_ms
        );
        Ok(Self {
            reader,
            frame_duration: Duration::from_millis(frame_ms),
        })
    }
}

impl SampleFeed for IvfFeed {
    fn next_sample(&mut self) -> Result<Option<EncodedSample>, MediaError> {
        // The reader has no separate end marker; a frame that cannot be
        // read ends the recording.
        match self.reader.parse_next_frame() {
            Ok((frame, _)) => Ok(Some(EncodedSample {
                data: frame.freeze(),
                duration: self.frame_duration,
            })),
            Err(e) => {
                debug!("End of video recording: {}", e);
                Ok(None)
            }
        }
    }
}

struct OggFeed {
    reader: OggReader<BufReader<File>>,
    last_granule: u64,
}

impl OggFeed {
    fn open(path: &Path) -> Result<Self, MediaError> {
        let (reader, header) =
            OggReader::new(open_file(path)?, true).map_err(|e| unreadable(path, e))?;
        debug!(
            "Opened {} ({} channels, {} Hz)",
            path.display(),
            header.channels,
            header.sample_rate
        );
        Ok(Self {
            reader,
            last_granule: 0,
        })
    }
}

impl SampleFeed for OggFeed {
    fn next_sample(&mut self) -> Result<Option<EncodedSample>, MediaError> {
        match self.reader.parse_next_page() {
            Ok((page, header)) => {
                let samples = header.granule_position.saturating_sub(self.last_granule);
                self.last_granule = header.granule_position;
                Ok(Some(EncodedSample {
                    data: page.freeze(),
                    duration: Duration::from_millis(samples / OPUS_SAMPLES_PER_MS),
                }))
            }
            Err(e) => {
                debug!("End of audio recording: {}", e);
                Ok(None)
            }
        }
    }
}
