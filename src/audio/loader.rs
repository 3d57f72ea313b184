use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::debug;

use crate::audio::types::AudioInfo;
use crate::error::{CompositorError, Result};

/// Audio file prober supporting multiple formats
///
/// Only stream metadata is read; samples are never decoded into memory.
pub struct AudioLoader;

impl AudioLoader {
    /// Probe an audio file for duration, sample rate and channel count
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<AudioInfo> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CompositorError::not_found(path));
        }

        let extension = Self::detect_format(path).unwrap_or_default();

        match extension.as_str() {
            "wav" => Self::probe_wav(path),
            ext if Self::is_format_supported(ext) => Self::probe_with_symphonia(path, ext),
            _ => Err(CompositorError::UnsupportedFormat {
                format: extension
            }),
        }
    }

    /// WAV headers via hound (most reliable for WAV)
    fn probe_wav(path: &Path) -> Result<AudioInfo> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| CompositorError::codec(format!("{}: {}", path.display(), e)))?;

        let spec = reader.spec();
        let duration = reader.duration() as f64 / spec.sample_rate.max(1) as f64;

        Ok(AudioInfo {
            path: path.to_path_buf(),
            duration,
            sample_rate: Some(spec.sample_rate),
            channels: Some(spec.channels),
            format: "wav".to_string(),
        })
    }

    /// Compressed formats via Symphonia
    fn probe_with_symphonia(path: &Path, extension: &str) -> Result<AudioInfo> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(extension);

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| CompositorError::UnsupportedFormat {
                format: format!("{} ({})", extension, e),
            })?;

        let mut format = probed.format;

        // Find the first audio track with a known (decodable) codec
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| CompositorError::NoAudioTrack {
                path: path.display().to_string(),
            })?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params.sample_rate;
        let channels = params.channels.map(|c| c.count() as u16);
        let time_base = params
            .time_base
            .or_else(|| sample_rate.map(|sr| TimeBase::new(1, sr)));

        let duration = match (params.n_frames, time_base) {
            (Some(n_frames), Some(tb)) => Self::seconds(tb, n_frames),
            _ => {
                // No frame count in the header: walk packets and sum their durations
                debug!("No frame count in header for {:?}, scanning packets", path);
                let mut total: u64 = 0;
                loop {
                    match format.next_packet() {
                        Ok(packet) if packet.track_id() == track_id => total += packet.dur,
                        Ok(_) => continue,
                        Err(SymphoniaError::ResetRequired) => continue,
                        Err(_) => break,
                    }
                }
                let tb = time_base.ok_or_else(|| CompositorError::codec(format!(
                    "{}: stream has no time base",
                    path.display()
                )))?;
                Self::seconds(tb, total)
            }
        };

        Ok(AudioInfo {
            path: path.to_path_buf(),
            duration,
            sample_rate,
            channels,
            format: extension.to_string(),
        })
    }

    fn seconds(tb: TimeBase, ts: u64) -> f64 {
        let time = tb.calc_time(ts);
        time.seconds as f64 + time.frac
    }

    /// Detect audio format from file extension
    pub fn detect_format<P: AsRef<Path>>(path: P) -> Option<String> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Check if a file format is supported
    pub fn is_format_supported(extension: &str) -> bool {
        matches!(
            extension.to_lowercase().as_str(),
            "wav" | "mp3" | "flac" | "ogg" | "m4a" | "aac" | "mp4"
        )
    }
}

#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, seconds: f64, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * sample_rate as f64).round() as u32;
    for i in 0..frames {
        let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
        writer.write_sample(v).unwrap();
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();
}
