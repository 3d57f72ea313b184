use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::AudioSpan;
use crate::config::RenderConfig;
use crate::error::{CompositorError, Result};
use crate::video::clip::{Clip, ClipRef, FitClip, TIME_EPSILON};
use crate::video::geometry::FitPolicy;
use crate::video::types::{Frame, Rgb, VideoParams};

/// Per-call export overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bitrate: Option<String>,
    /// Constant rate factor (0..=51); overrides the configured quality
    pub crf: Option<u8>,
    pub fps: Option<f64>,
    pub resolution: Option<(u32, u32)>,
}

/// Named output quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    /// Keep the configured quality
    #[default]
    Original,
    High,
    Medium,
    Low,
}

impl QualityPreset {
    pub fn crf(self) -> Option<u8> {
        match self {
            QualityPreset::Original => None,
            QualityPreset::High => Some(18),
            QualityPreset::Medium => Some(23),
            QualityPreset::Low => Some(28),
        }
    }
}

/// Settings actually used for a render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSettings {
    pub container: String,
    pub codec: String,
    pub audio_codec: String,
    pub bitrate: Option<String>,
    pub crf: u8,
    pub fps: f64,
    pub resolution: (u32, u32),
}

/// Result of a finished render
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub path: PathBuf,
    pub duration: f64,
    pub frame_count: u64,
    pub file_size: u64,
    pub settings: ResolvedSettings,
    pub job_id: String,
}

/// Default (video, audio) codec pairing for a container extension
pub fn default_codecs(container: &str) -> Result<(&'static str, &'static str)> {
    match container {
        "mp4" | "mov" | "mkv" | "m4v" => Ok(("libx264", "aac")),
        "avi" => Ok(("libx264", "libmp3lame")),
        "webm" => Ok(("libvpx-vp9", "libopus")),
        other => Err(CompositorError::UnsupportedFormat {
            format: if other.is_empty() { "(no extension)".to_string() } else { other.to_string() },
        }),
    }
}

fn check_combination(container: &str, codec: &str, audio_codec: &str) -> Result<()> {
    if container == "webm" {
        let video_ok = matches!(codec, "libvpx" | "libvpx-vp9" | "libaom-av1" | "libsvtav1");
        let audio_ok = matches!(audio_codec, "libopus" | "libvorbis" | "opus" | "vorbis");
        if !video_ok || !audio_ok {
            return Err(CompositorError::UnsupportedFormat {
                format: format!("webm with {}/{}", codec, audio_codec),
            });
        }
    }
    Ok(())
}

fn quality_to_crf(quality: u8) -> u8 {
    (51 - ((quality.min(100) as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
}

fn container_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

/// Hidden per-job sibling of the destination: `<dir>/.<stem>.<job>.partial.<ext>`
pub fn temp_path(output: &Path, job_id: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = format!(".{}.{}.partial.{}", stem, job_id, container_of(output));
    match output.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Removes the partial file on every exit path unless the render was committed
struct TempFileGuard {
    path: PathBuf,
    committed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, committed: false }
    }

    fn commit(mut self, destination: &Path) -> Result<()> {
        fs::rename(&self.path, destination)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove partial output {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Kills the encoder if it is still running when dropped
struct EncoderProcess {
    child: Child,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl EncoderProcess {
    fn stderr_tail(&mut self) -> String {
        let text = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let lines: Vec<&str> = text.lines().collect();
        lines[lines.len().saturating_sub(8)..].join("\n")
    }

    fn wait(mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .map_err(|e| CompositorError::codec(format!("failed to wait for ffmpeg: {}", e)))?;
        self.finished = true;
        if !status.success() {
            return Err(CompositorError::codec(format!(
                "ffmpeg exited with {}: {}",
                status,
                self.stderr_tail()
            )));
        }
        Ok(())
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Writes composite clips to container files through an `ffmpeg` subprocess
///
/// Frames are pulled from the clip in fixed-size batches on a dedicated rayon
/// pool and streamed as raw RGB to ffmpeg's stdin in timeline order. Audio
/// spans become an ffmpeg filter graph over the original source files.
pub struct Renderer {
    params: VideoParams,
    render: RenderConfig,
}

impl Renderer {
    pub fn new(params: VideoParams, render: RenderConfig) -> Self {
        Self { params, render }
    }

    pub fn check_ffmpeg_available(&self) -> bool {
        Command::new(&self.render.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Merge per-call overrides with configured defaults and container defaults
    pub fn resolve(&self, output: &Path, clip_size: (u32, u32), settings: &ExportSettings) -> Result<ResolvedSettings> {
        let container = container_of(output);
        let (default_video, default_audio) = default_codecs(&container)?;

        let codec = settings
            .codec
            .clone()
            .or_else(|| self.params.codec.clone())
            .unwrap_or_else(|| default_video.to_string());
        let audio_codec = settings
            .audio_codec
            .clone()
            .or_else(|| self.params.audio_codec.clone())
            .unwrap_or_else(|| default_audio.to_string());
        check_combination(&container, &codec, &audio_codec)?;

        let fps = settings.fps.unwrap_or(self.params.fps);
        if !(fps.is_finite() && fps > 0.0) {
            return Err(CompositorError::invalid(format!("fps must be positive, got {}", fps)));
        }

        let crf = match settings.crf {
            Some(crf) if crf > 51 => {
                return Err(CompositorError::invalid(format!("crf must be at most 51, got {}", crf)));
            }
            Some(crf) => crf,
            None => quality_to_crf(self.params.quality),
        };

        let resolution = settings.resolution.unwrap_or(clip_size);
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(CompositorError::invalid(format!(
                "resolution must be non-zero, got {}x{}",
                resolution.0, resolution.1
            )));
        }

        Ok(ResolvedSettings {
            container,
            codec,
            audio_codec,
            bitrate: settings.bitrate.clone().or_else(|| self.params.bitrate.clone()),
            crf,
            fps,
            resolution,
        })
    }

    /// Render `clip` to `output`
    ///
    /// The destination is only touched by the final rename, so a failed render
    /// leaves it as it was, and rendering over one of the clip's own sources
    /// is safe.
    pub fn render(&self, clip: &ClipRef, output: &Path, settings: &ExportSettings) -> Result<RenderOutcome> {
        let started = Instant::now();
        let job_id = Uuid::new_v4().simple().to_string();
        let resolved = self.resolve(output, clip.size(), settings)?;

        let duration = clip.duration();
        if !(duration.is_finite() && duration > 0.0) {
            return Err(CompositorError::invalid(format!(
                "cannot render a clip of duration {}",
                duration
            )));
        }

        let clip: ClipRef = if clip.size() == resolved.resolution {
            clip.clone()
        } else {
            debug!(
                "Fitting {}x{} composite to {}x{} for export",
                clip.size().0, clip.size().1, resolved.resolution.0, resolved.resolution.1
            );
            FitClip::wrap(clip.clone(), resolved.resolution, FitPolicy::Contain, Rgb::BLACK).0
        };

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial = temp_path(output, &job_id);
        let guard = TempFileGuard::new(partial.clone());
        let spans = clip.audio_spans();
        let args = build_ffmpeg_args(&resolved, duration, &spans, &partial);

        info!(
            "🎬 Rendering {:.2}s at {}x{} @ {}fps ({} / {}) to {}",
            duration, resolved.resolution.0, resolved.resolution.1, resolved.fps,
            resolved.codec, resolved.audio_codec, output.display()
        );
        debug!("ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.render.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CompositorError::codec(format!(
                "failed to start {}: {}",
                self.render.ffmpeg_path.display(),
                e
            )))?;

        // Drain stderr concurrently so a chatty encoder never blocks on a full pipe
        let stderr = child.stderr.take().map(|mut stream| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = stream.read_to_string(&mut text);
                text
            })
        });
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CompositorError::codec("encoder stdin unavailable"))?;
        let mut process = EncoderProcess { child, stderr, finished: false };

        let frame_count = frame_count(duration, resolved.fps);
        let written = self.stream_frames(&clip, &resolved, frame_count, &mut stdin);
        drop(stdin);

        if let Err(e) = written {
            let tail = process.stderr_tail();
            return Err(match e {
                CompositorError::Io(io) => CompositorError::codec(format!(
                    "ffmpeg stopped accepting frames ({}): {}",
                    io, tail
                )),
                other => other,
            });
        }

        process.wait()?;
        guard.commit(output)?;

        let file_size = fs::metadata(output)?.len();
        info!(
            "✅ Rendered {} frames in {:.1}s ({:.1}MB)",
            frame_count,
            started.elapsed().as_secs_f64(),
            file_size as f64 / 1024.0 / 1024.0
        );

        Ok(RenderOutcome {
            path: output.to_path_buf(),
            duration,
            frame_count,
            file_size,
            settings: resolved,
            job_id,
        })
    }

    /// Copy the audio stream of `input` into a standalone file
    ///
    /// Uses the same temp-then-rename discipline as [`Renderer::render`].
    pub fn extract_audio(&self, input: &Path, output: &Path, codec: &str) -> Result<u64> {
        let job_id = Uuid::new_v4().simple().to_string();
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial = temp_path(output, &job_id);
        let guard = TempFileGuard::new(partial.clone());
        let args = build_extract_args(input, codec, &partial);
        info!("🎵 Extracting audio from {} ({})", input.display(), codec);
        debug!("ffmpeg {}", args.join(" "));

        let result = Command::new(&self.render.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| CompositorError::codec(format!(
                "failed to start {}: {}",
                self.render.ffmpeg_path.display(),
                e
            )))?;
        if !result.status.success() {
            let text = String::from_utf8_lossy(&result.stderr);
            let lines: Vec<&str> = text.lines().collect();
            return Err(CompositorError::codec(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                lines[lines.len().saturating_sub(8)..].join("\n")
            )));
        }

        guard.commit(output)?;
        Ok(fs::metadata(output)?.len())
    }

    fn stream_frames<W: Write>(
        &self,
        clip: &ClipRef,
        settings: &ResolvedSettings,
        frame_count: u64,
        sink: &mut W,
    ) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.render.processing_threads.max(1))
            .build()
            .map_err(|e| CompositorError::codec(format!("failed to build render pool: {}", e)))?;

        let batch = self.render.batch_size.max(1) as u64;
        let mut next = 0u64;
        while next < frame_count {
            let end = (next + batch).min(frame_count);
            let indices: Vec<u64> = (next..end).collect();

            // Indexed parallel collect keeps frames in timeline order
            let frames: Vec<Frame> = pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| clip.frame_at(i as f64 / settings.fps))
                    .collect::<Result<Vec<Frame>>>()
            })?;

            for frame in &frames {
                if frame.size() != settings.resolution {
                    return Err(CompositorError::codec(format!(
                        "frame size {}x{} does not match output {}x{}",
                        frame.width(), frame.height(), settings.resolution.0, settings.resolution.1
                    )));
                }
                sink.write_all(frame.as_rgb_bytes())?;
            }

            if (end / batch) % 10 == 0 || end == frame_count {
                debug!("Encoded {}/{} frames", end, frame_count);
            }
            next = end;
        }
        sink.flush()?;
        Ok(())
    }
}

/// Audio encoder for an output extension; `None` for unknown extensions
pub fn audio_codec_for(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("libmp3lame"),
        "wav" => Some("pcm_s16le"),
        "aac" | "m4a" => Some("aac"),
        "ogg" => Some("libvorbis"),
        "opus" => Some("libopus"),
        "flac" => Some("flac"),
        _ => None,
    }
}

fn build_extract_args(input: &Path, codec: &str, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(), "error".into(),
        "-i".into(), input.display().to_string(),
        "-vn".into(),
        "-c:a".into(), codec.to_string(),
        "-y".into(), output.display().to_string(),
    ]
}

/// Number of output frames for `duration` seconds at `fps`
pub fn frame_count(duration: f64, fps: f64) -> u64 {
    ((duration * fps) - TIME_EPSILON).ceil().max(1.0) as u64
}

/// Split a tempo into `atempo` steps, each within ffmpeg's [0.5, 2.0] range
fn atempo_chain(tempo: f64) -> Vec<f64> {
    let mut remaining = tempo;
    let mut steps = Vec::new();
    while remaining > 2.0 + TIME_EPSILON {
        steps.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 - TIME_EPSILON {
        steps.push(0.5);
        remaining /= 0.5;
    }
    if (remaining - 1.0).abs() > TIME_EPSILON {
        steps.push(remaining);
    }
    steps
}

/// Filter chain for one span, reading from input `input` and labelled `[a{label}]`
fn span_filter(span: &AudioSpan, input: usize, label: usize) -> String {
    let mut filters = vec![
        format!("atrim=duration={:.6}", span.source_duration()),
        "asetpts=PTS-STARTPTS".to_string(),
    ];
    for step in atempo_chain(span.tempo) {
        filters.push(format!("atempo={:.6}", step));
    }
    if span.fade_in > TIME_EPSILON {
        filters.push(format!("afade=t=in:st=0:d={:.6}", span.fade_in));
    }
    if span.fade_out > TIME_EPSILON {
        filters.push(format!(
            "afade=t=out:st={:.6}:d={:.6}",
            (span.duration - span.fade_out).max(0.0),
            span.fade_out
        ));
    }
    if (span.gain - 1.0).abs() > TIME_EPSILON {
        filters.push(format!("volume={:.4}", span.gain));
    }
    let delay_ms = (span.start * 1000.0).round() as u64;
    if delay_ms > 0 {
        filters.push(format!("adelay={}:all=1", delay_ms));
    }
    format!("[{}:a]{}[a{}]", input, filters.join(","), label)
}

/// Full ffmpeg argument list: raw frames on stdin, one input per audio span
pub fn build_ffmpeg_args(
    settings: &ResolvedSettings,
    duration: f64,
    spans: &[AudioSpan],
    output: &Path,
) -> Vec<String> {
    let (w, h) = settings.resolution;
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(), "error".into(),
        "-f".into(), "rawvideo".into(),
        "-pix_fmt".into(), "rgb24".into(),
        "-s".into(), format!("{}x{}", w, h),
        "-r".into(), format!("{}", settings.fps),
        "-i".into(), "pipe:0".into(),
    ];

    let spans: Vec<&AudioSpan> = spans
        .iter()
        .filter(|s| s.duration > TIME_EPSILON && s.start < duration)
        .collect();

    for span in &spans {
        if span.looped {
            args.extend(["-stream_loop".into(), "-1".into()]);
        }
        args.extend([
            "-ss".into(),
            format!("{:.6}", span.source_start),
            "-i".into(),
            span.path.display().to_string(),
        ]);
    }

    if spans.is_empty() {
        args.extend(["-map".into(), "0:v".into(), "-an".into()]);
    } else {
        let mut graph: Vec<String> = spans
            .iter()
            .enumerate()
            .map(|(i, span)| span_filter(span, i + 1, i))
            .collect();
        let labels: String = (0..spans.len()).map(|i| format!("[a{}]", i)).collect();
        graph.push(format!(
            "{}amix=inputs={}:duration=longest:normalize=0[aout]",
            labels,
            spans.len()
        ));

        args.extend([
            "-filter_complex".into(), graph.join(";"),
            "-map".into(), "0:v".into(),
            "-map".into(), "[aout]".into(),
            "-c:a".into(), settings.audio_codec.clone(),
        ]);
    }

    // yuv420p needs even dimensions
    args.extend([
        "-vf".into(), "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
        "-c:v".into(), settings.codec.clone(),
        "-pix_fmt".into(), "yuv420p".into(),
    ]);

    match &settings.bitrate {
        Some(bitrate) => args.extend(["-b:v".into(), bitrate.clone()]),
        None => {
            args.extend(["-crf".into(), settings.crf.to_string()]);
            if settings.codec.starts_with("libvpx") {
                args.extend(["-b:v".into(), "0".into()]);
            }
        }
    }

    if matches!(settings.container.as_str(), "mp4" | "mov" | "m4v") {
        args.extend(["-movflags".into(), "+faststart".into()]);
    }

    args.extend([
        "-t".into(), format!("{:.6}", duration),
        "-y".into(), output.display().to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::clip::ColorClip;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn renderer() -> Renderer {
        let mut render = RenderConfig::default();
        render.processing_threads = 2;
        render.batch_size = 4;
        Renderer::new(VideoParams::default(), render)
    }

    fn settings() -> ResolvedSettings {
        renderer()
            .resolve(Path::new("out.mp4"), (64, 36), &ExportSettings::default())
            .unwrap()
    }

    #[test]
    fn test_codec_defaults_by_container() {
        assert_eq!(default_codecs("mp4").unwrap(), ("libx264", "aac"));
        assert_eq!(default_codecs("avi").unwrap(), ("libx264", "libmp3lame"));
        assert_eq!(default_codecs("webm").unwrap(), ("libvpx-vp9", "libopus"));
        assert!(matches!(default_codecs("flv"), Err(CompositorError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_resolve_prefers_call_overrides() {
        let overrides = ExportSettings {
            codec: Some("libx265".to_string()),
            fps: Some(24.0),
            resolution: Some((1280, 720)),
            ..Default::default()
        };
        let resolved = renderer().resolve(Path::new("a.mkv"), (640, 360), &overrides).unwrap();
        assert_eq!(resolved.codec, "libx265");
        assert_eq!(resolved.audio_codec, "aac");
        assert_eq!(resolved.fps, 24.0);
        assert_eq!(resolved.resolution, (1280, 720));
    }

    #[test]
    fn test_quality_presets_set_crf() {
        assert_eq!(settings().crf, 8);

        let high = ExportSettings {
            crf: QualityPreset::High.crf(),
            ..Default::default()
        };
        assert_eq!(renderer().resolve(Path::new("a.mp4"), (64, 36), &high).unwrap().crf, 18);
        assert_eq!(QualityPreset::Original.crf(), None);
        assert!(QualityPreset::Low.crf() > QualityPreset::Medium.crf());

        let bad = ExportSettings {
            crf: Some(60),
            ..Default::default()
        };
        assert!(renderer().resolve(Path::new("a.mp4"), (64, 36), &bad).is_err());
    }

    #[test]
    fn test_webm_rejects_h264() {
        let overrides = ExportSettings {
            codec: Some("libx264".to_string()),
            ..Default::default()
        };
        let err = renderer().resolve(Path::new("a.webm"), (64, 36), &overrides).unwrap_err();
        assert!(matches!(err, CompositorError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_temp_path_is_hidden_sibling_per_job() {
        let a = temp_path(Path::new("/out/final.mp4"), "job1");
        let b = temp_path(Path::new("/out/final.mp4"), "job2");
        assert_eq!(a, PathBuf::from("/out/.final.job1.partial.mp4"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_extract_args_drop_video() {
        let args = build_extract_args(Path::new("in.mp4"), "libmp3lame", Path::new("out.mp3"));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp3");
        assert_eq!(audio_codec_for("wav"), Some("pcm_s16le"));
        assert_eq!(audio_codec_for("xyz"), None);
    }

    #[test]
    fn test_frame_count_rounding() {
        assert_eq!(frame_count(1.0, 30.0), 30);
        assert_eq!(frame_count(1.01, 30.0), 31);
        assert_eq!(frame_count(0.001, 30.0), 1);
    }

    #[test]
    fn test_atempo_chain_stays_in_range() {
        assert!(atempo_chain(1.0).is_empty());
        assert_eq!(atempo_chain(4.0), vec![2.0, 2.0]);
        let slow = atempo_chain(0.2);
        assert!(slow.iter().all(|s| (0.5..=2.0).contains(s)));
        let product: f64 = slow.iter().product();
        assert!((product - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_args_without_audio() {
        let args = build_ffmpeg_args(&settings(), 2.0, &[], Path::new("/tmp/x.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 64x36 -r 30 -i pipe:0"));
        assert!(joined.contains("-an"));
        assert!(joined.contains("-crf 8"));
        assert!(joined.contains("-t 2.000000"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/x.mp4"));
    }

    #[test]
    fn test_args_build_mix_graph() {
        let mut sped = AudioSpan::new("/a/voice.wav", 3.0, 5.0).sped_up(2.0).shifted(1.5);
        sped.fade_in = 0.5;
        let mut music = AudioSpan::new("/a/music.mp3", 0.0, 10.0).with_gain(0.3);
        music.looped = true;

        let args = build_ffmpeg_args(&settings(), 10.0, &[sped, music], Path::new("o.mp4"));
        let joined = args.join(" ");

        assert!(joined.contains("-ss 3.000000 -i /a/voice.wav"));
        assert!(joined.contains("-stream_loop -1 -ss 0.000000 -i /a/music.mp3"));

        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_at + 1];
        assert!(graph.contains("[1:a]atrim=duration=5.000000"));
        assert!(graph.contains("atempo=2.000000"));
        assert!(graph.contains("afade=t=in:st=0:d=0.500000"));
        assert!(graph.contains("adelay=1500:all=1[a0]"));
        assert!(graph.contains("[2:a]atrim=duration=10.000000,asetpts=PTS-STARTPTS,volume=0.3000[a1]"));
        assert!(graph.ends_with("[a0][a1]amix=inputs=2:duration=longest:normalize=0[aout]"));
        assert!(joined.contains("-map [aout] -c:a aac"));
    }

    #[test]
    fn test_stream_frames_preserves_order() {
        struct Ramp;
        impl Clip for Ramp {
            fn duration(&self) -> f64 {
                1.0
            }

            fn size(&self) -> (u32, u32) {
                (2, 1)
            }

            fn fps(&self) -> f64 {
                10.0
            }

            fn frame_at(&self, t: f64) -> Result<Frame> {
                Ok(Frame::new_filled(2, 1, Rgb([(t * 100.0).round() as u8, 0, 0])))
            }

            fn fork(&self) -> ClipRef {
                Arc::new(Ramp)
            }
        }

        let clip: ClipRef = Arc::new(Ramp);
        let mut resolved = settings();
        resolved.fps = 10.0;
        resolved.resolution = (2, 1);

        let mut sink = Vec::new();
        renderer().stream_frames(&clip, &resolved, 10, &mut sink).unwrap();

        assert_eq!(sink.len(), 10 * 2 * 3);
        let reds: Vec<u8> = sink.chunks(6).map(|px| px[0]).collect();
        assert_eq!(reds, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn test_failed_render_leaves_no_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("never.mp4");

        let mut render = RenderConfig::default();
        render.ffmpeg_path = dir.path().join("no-such-ffmpeg");
        let renderer = Renderer::new(VideoParams::default(), render);

        let clip: ClipRef = Arc::new(ColorClip::new((8, 8), Rgb::WHITE, 0.5, 10.0));
        let err = renderer.render(&clip, &output, &ExportSettings::default()).unwrap_err();

        assert!(matches!(err, CompositorError::CodecFailure { .. }));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Renderer whose encoder is a shell script writing `body` to its output argument
    #[cfg(unix)]
    fn scripted_renderer(dir: &Path, body: &str) -> Renderer {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg.sh");
        fs::write(&script, format!("#!/bin/sh\nfor last in \"$@\"; do :; done\n{}\n", body)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut render = RenderConfig::default();
        render.ffmpeg_path = script;
        render.processing_threads = 2;
        render.batch_size = 4;
        Renderer::new(VideoParams::default(), render)
    }

    #[cfg(unix)]
    #[test]
    fn test_render_over_existing_file_goes_through_temp() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let output = dir.path().join("clip.mp4");
        fs::write(&output, "original").unwrap();

        let body = format!(
            "echo \"$@\" > {args}\ncat {dest} > {seen}\ncat > /dev/null\nprintf rendered > \"$last\"",
            args = scratch.join("args.txt").display(),
            dest = output.display(),
            seen = scratch.join("seen.txt").display(),
        );
        let renderer = scripted_renderer(&scratch, &body);

        let clip: ClipRef = Arc::new(ColorClip::new((8, 8), Rgb::WHITE, 0.5, 10.0));
        let outcome = renderer.render(&clip, &output, &ExportSettings::default()).unwrap();

        // The encoder wrote a hidden sibling while the destination was still intact
        let args = fs::read_to_string(scratch.join("args.txt")).unwrap();
        let target = args.split_whitespace().last().unwrap();
        assert_eq!(Path::new(target), temp_path(&output, &outcome.job_id));
        assert!(args.contains("-t 0.500000"));
        assert_eq!(fs::read_to_string(scratch.join("seen.txt")).unwrap(), "original");

        assert_eq!(fs::read_to_string(&output).unwrap(), "rendered");
        assert_eq!(outcome.duration, 0.5);
        assert_eq!(outcome.frame_count, 15);
        assert_eq!(outcome.file_size, 8);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_encode_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let output = dir.path().join("clip.mp4");
        fs::write(&output, "original").unwrap();

        let renderer = scripted_renderer(&scratch, "cat > /dev/null\nprintf partial > \"$last\"\necho boom >&2\nexit 3");
        let clip: ClipRef = Arc::new(ColorClip::new((8, 8), Rgb::WHITE, 0.5, 10.0));
        let err = renderer.render(&clip, &output, &ExportSettings::default()).unwrap_err();

        assert!(matches!(err, CompositorError::CodecFailure { .. }));
        assert!(err.to_string().contains("boom"));
        assert_eq!(fs::read_to_string(&output).unwrap(), "original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
