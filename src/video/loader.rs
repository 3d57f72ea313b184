use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::audio::AudioInfo;
use crate::config::RenderConfig;
use crate::error::{CompositorError, Result};
use crate::video::types::{Frame, MediaAsset, MediaKind};

/// Forward distance (in frames) still served by reading ahead instead of re-seeking
const MAX_READ_AHEAD_FRAMES: u64 = 120;

/// Raw `ffprobe -print_format json` output
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

impl ProbeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }
}

/// Parse ffprobe rationals such as `30000/1001`
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_seconds(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Opens media files and reports their metadata
///
/// Videos are probed with `ffprobe`, still images by reading their headers.
/// Results are cached per path for the lifetime of the loader.
pub struct MediaLoader {
    ffprobe_path: PathBuf,
    metadata_cache: Mutex<HashMap<PathBuf, MediaAsset>>,
}

impl MediaLoader {
    pub fn new(render: &RenderConfig) -> Self {
        Self {
            ffprobe_path: render.ffprobe_path.clone(),
            metadata_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Probe a video or still image
    pub fn probe<P: AsRef<Path>>(&self, path: P) -> Result<MediaAsset> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CompositorError::not_found(path));
        }

        if let Ok(cache) = self.metadata_cache.lock() {
            if let Some(asset) = cache.get(path) {
                return Ok(asset.clone());
            }
        }

        let asset = if Self::is_image_file(path) {
            Self::probe_image(path)?
        } else if Self::is_video_file(path) {
            let output = self.run_ffprobe(path)?;
            asset_from_probe(path, &output)?
        } else {
            return Err(CompositorError::UnsupportedFormat {
                format: extension_of(path),
            });
        };

        debug!(
            "Probed {}: {}x{} {:?} {:.2}s",
            asset.file_name(), asset.size.0, asset.size.1, asset.kind,
            asset.duration.unwrap_or(0.0)
        );

        if let Ok(mut cache) = self.metadata_cache.lock() {
            cache.insert(path.to_path_buf(), asset.clone());
        }
        Ok(asset)
    }

    /// Audio stream properties of a media file
    pub fn probe_audio<P: AsRef<Path>>(&self, path: P) -> Result<AudioInfo> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CompositorError::not_found(path));
        }
        let output = self.run_ffprobe(path)?;
        audio_from_probe(path, &output)
    }

    fn probe_image(path: &Path) -> Result<MediaAsset> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            CompositorError::codec(format!("{}: {}", path.display(), e))
        })?;

        Ok(MediaAsset {
            path: path.to_path_buf(),
            kind: MediaKind::StillImage,
            duration: None,
            size: (width, height),
            fps: None,
            has_audio: false,
            codec: Some("image".to_string()),
        })
    }

    fn run_ffprobe(&self, path: &Path) -> Result<ProbeOutput> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()
            .map_err(|e| CompositorError::codec(format!(
                "failed to run {}: {}",
                self.ffprobe_path.display(),
                e
            )))?;

        if !output.status.success() {
            return Err(CompositorError::UnsupportedFormat {
                format: format!("{} (ffprobe could not read {})", extension_of(path), path.display()),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            CompositorError::codec(format!("{}: invalid ffprobe output: {}", path.display(), e))
        })
    }

    pub fn is_image_file<P: AsRef<Path>>(path: P) -> bool {
        matches!(
            extension_of(path.as_ref()).as_str(),
            "jpg" | "jpeg" | "png" | "bmp" | "gif" | "tiff" | "webp"
        )
    }

    pub fn is_video_file<P: AsRef<Path>>(path: P) -> bool {
        matches!(
            extension_of(path.as_ref()).as_str(),
            "mp4" | "avi" | "mov" | "mkv" | "webm" | "m4v"
        )
    }

    pub fn is_supported<P: AsRef<Path>>(path: P) -> bool {
        Self::is_image_file(path.as_ref()) || Self::is_video_file(path.as_ref())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

fn asset_from_probe(path: &Path, output: &ProbeOutput) -> Result<MediaAsset> {
    let video = output
        .streams
        .iter()
        .find(|s| s.is("video"))
        .ok_or_else(|| CompositorError::UnsupportedFormat {
            format: format!("{} has no video stream", path.display()),
        })?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(CompositorError::codec(format!(
                "{}: video stream reports no frame size",
                path.display()
            )))
        }
    };

    let duration = parse_seconds(video.duration.as_ref())
        .or_else(|| output.format.as_ref().and_then(|f| parse_seconds(f.duration.as_ref())))
        .ok_or_else(|| CompositorError::codec(format!("{}: unknown duration", path.display())))?;

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));
    if fps.is_none() {
        warn!("No frame rate reported for {}", path.display());
    }

    Ok(MediaAsset {
        path: path.to_path_buf(),
        kind: MediaKind::Video,
        duration: Some(duration),
        size: (width, height),
        fps,
        has_audio: output.streams.iter().any(|s| s.is("audio")),
        codec: video.codec_name.clone(),
    })
}

fn audio_from_probe(path: &Path, output: &ProbeOutput) -> Result<AudioInfo> {
    let audio = output
        .streams
        .iter()
        .find(|s| s.is("audio"))
        .ok_or_else(|| CompositorError::NoAudioTrack {
            path: path.display().to_string(),
        })?;

    let duration = parse_seconds(audio.duration.as_ref())
        .or_else(|| output.format.as_ref().and_then(|f| parse_seconds(f.duration.as_ref())))
        .unwrap_or(0.0);

    Ok(AudioInfo {
        path: path.to_path_buf(),
        duration,
        sample_rate: audio.sample_rate.as_deref().and_then(|s| s.parse().ok()),
        channels: audio.channels,
        format: audio
            .codec_name
            .clone()
            .or_else(|| output.format.as_ref().and_then(|f| f.format_name.clone()))
            .unwrap_or_else(|| extension_of(path)),
    })
}

/// A running `ffmpeg` process streaming raw RGB frames
struct DecodeProcess {
    child: Child,
    stdout: ChildStdout,
}

impl DecodeProcess {
    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DecodeProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Default)]
struct DecoderState {
    process: Option<DecodeProcess>,

    /// Index of the next frame the process will produce
    next_index: u64,

    /// Recently decoded frames, oldest first
    cache: VecDeque<(u64, Frame)>,

    /// The process ran out of frames
    exhausted: bool,
}

/// Sequential frame decoder for one video source
///
/// Frames are indexed at the source frame rate. Forward requests read ahead on
/// the open pipe; backward requests (or long jumps) restart ffmpeg with a seek.
/// The subprocess is killed when the decoder is released or dropped.
pub struct VideoDecoder {
    path: PathBuf,
    ffmpeg_path: PathBuf,
    size: (u32, u32),
    fps: f64,
    cache_frames: usize,
    state: Mutex<DecoderState>,
}

impl VideoDecoder {
    pub fn new(asset: &MediaAsset, render: &RenderConfig, fallback_fps: f64) -> Self {
        Self {
            path: asset.path.clone(),
            ffmpeg_path: render.ffmpeg_path.clone(),
            size: asset.size,
            fps: asset.fps.unwrap_or(fallback_fps),
            cache_frames: render.decoder_cache_frames.max(1),
            state: Mutex::new(DecoderState::default()),
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// A second decoder over the same source with its own process and cache
    pub fn fork(&self) -> Self {
        Self {
            path: self.path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            size: self.size,
            fps: self.fps,
            cache_frames: self.cache_frames,
            state: Mutex::new(DecoderState::default()),
        }
    }

    fn frame_index(&self, t: f64) -> u64 {
        (t.max(0.0) * self.fps + 1e-6).floor() as u64
    }

    fn spawn_args(&self, start_index: u64) -> Vec<String> {
        let (w, h) = self.size;
        vec![
            "-v".into(), "error".into(),
            "-nostdin".into(),
            "-ss".into(), format!("{:.6}", start_index as f64 / self.fps),
            "-i".into(), self.path.display().to_string(),
            "-an".into(),
            "-vf".into(), format!("fps={},scale={}:{}", self.fps, w, h),
            "-f".into(), "rawvideo".into(),
            "-pix_fmt".into(), "rgb24".into(),
            "pipe:1".into(),
        ]
    }

    fn spawn(&self, start_index: u64) -> Result<DecodeProcess> {
        debug!("Starting decoder for {} at frame {}", self.path.display(), start_index);
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.spawn_args(start_index))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CompositorError::codec(format!(
                "failed to start {}: {}",
                self.ffmpeg_path.display(),
                e
            )))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CompositorError::codec("decoder stdout unavailable"))?;
        Ok(DecodeProcess { child, stdout })
    }

    /// Decode the frame shown at source time `t` (seconds)
    pub fn frame_at(&self, t: f64) -> Result<Frame> {
        let index = self.frame_index(t);
        let mut state = self
            .state
            .lock()
            .map_err(|_| CompositorError::codec("decoder lock poisoned"))?;

        if let Some((_, frame)) = state.cache.iter().find(|(i, _)| *i == index) {
            return Ok(frame.clone());
        }

        let can_read_ahead = state.process.is_some()
            && !state.exhausted
            && index >= state.next_index
            && index - state.next_index <= MAX_READ_AHEAD_FRAMES;

        if !can_read_ahead {
            state.process = Some(self.spawn(index)?);
            state.next_index = index;
            state.exhausted = false;
            state.cache.clear();
        }

        self.read_until(&mut state, index)?;

        if state.cache.is_empty() && state.exhausted && index > 0 {
            // Probed duration overshoots the decodable stream: back off and hold the tail
            let retry = index.saturating_sub(self.fps.ceil() as u64);
            debug!("Frame {} past end of {}, retrying from {}", index, self.path.display(), retry);
            state.process = Some(self.spawn(retry)?);
            state.next_index = retry;
            state.exhausted = false;
            self.read_until(&mut state, index)?;
        }

        // Past the last decodable frame: hold the final picture
        state
            .cache
            .back()
            .map(|(_, frame)| frame.clone())
            .ok_or_else(|| CompositorError::codec(format!(
                "no frame decodable at {:.3}s in {}",
                t,
                self.path.display()
            )))
    }

    fn read_until(&self, state: &mut DecoderState, index: u64) -> Result<()> {
        let (w, h) = self.size;
        let frame_bytes = w as usize * h as usize * 3;

        while state.next_index <= index && !state.exhausted {
            let mut buffer = vec![0u8; frame_bytes];
            let read = match state.process.as_mut() {
                Some(process) => process.stdout.read_exact(&mut buffer),
                None => break,
            };

            match read {
                Ok(()) => {
                    let frame = Frame::from_rgb_bytes(w, h, buffer)
                        .ok_or_else(|| CompositorError::codec("decoded frame has wrong size"))?;
                    let decoded = state.next_index;
                    state.cache.push_back((decoded, frame));
                    while state.cache.len() > self.cache_frames {
                        state.cache.pop_front();
                    }
                    state.next_index += 1;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    state.exhausted = true;
                    if let Some(mut process) = state.process.take() {
                        process.kill();
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Kill the decoder process and drop cached frames
    pub fn release(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.process.is_some() {
                info!("🧹 Releasing decoder for {}", self.path.display());
            }
            *state = DecoderState::default();
        }
    }
}
