use std::sync::Arc;

use tracing::debug;

use crate::audio::AudioSpan;
use crate::effects::pixel;
use crate::effects::spec::{CropBox, EffectSpec, ZoomDirection};
use crate::error::Result;
use crate::video::clip::{clamp_time, Clip, ClipRef, TIME_EPSILON};
use crate::video::types::{Frame, Rgb};

/// One effect applied on top of another clip
pub struct EffectClip {
    inner: ClipRef,
    effect: EffectSpec,
    background: Rgb,
    crop: Option<CropBox>,
}

impl EffectClip {
    /// Validate `effect` against `inner` and wrap it
    pub fn new(inner: ClipRef, effect: EffectSpec, background: Rgb) -> Result<Self> {
        effect.validate(inner.size(), inner.duration())?;
        let crop = match effect {
            EffectSpec::Crop { .. } => Some(effect.crop_box(inner.size())?),
            _ => None,
        };
        Ok(Self { inner, effect, background, crop })
    }

    /// Progress through the clip in `[0, 1]`
    fn progress(&self, t: f64) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            0.0
        } else {
            (t / duration).clamp(0.0, 1.0)
        }
    }
}

impl Clip for EffectClip {
    fn duration(&self) -> f64 {
        match self.effect {
            EffectSpec::Speed { factor } => self.inner.duration() / factor,
            _ => self.inner.duration(),
        }
    }

    fn size(&self) -> (u32, u32) {
        match (&self.effect, self.crop) {
            (_, Some(rect)) => (rect.width, rect.height),
            (EffectSpec::Resize { width, height }, _) => {
                let (w, h) = self.inner.size();
                (width.unwrap_or(w), height.unwrap_or(h))
            }
            _ => self.inner.size(),
        }
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn frame_at(&self, t: f64) -> Result<Frame> {
        let t = clamp_time(t, self.duration());

        if let EffectSpec::Speed { factor } = self.effect {
            return self.inner.frame_at(t * factor);
        }

        let mut frame = self.inner.frame_at(t)?;
        let frame = match self.effect {
            EffectSpec::FadeIn { duration } => {
                pixel::blend_towards(&mut frame, self.background, t / duration);
                frame
            }
            EffectSpec::FadeOut { duration } => {
                pixel::blend_towards(&mut frame, self.background, (self.duration() - t) / duration);
                frame
            }
            EffectSpec::Zoom { factor, direction } => {
                let p = self.progress(t);
                let scale = match direction {
                    ZoomDirection::In => 1.0 + (factor - 1.0) * p,
                    ZoomDirection::Out => factor + (1.0 - factor) * p,
                };
                pixel::zoom_center(&frame, scale, self.background)
            }
            EffectSpec::Pan { direction, distance } => {
                let (ux, uy) = direction.vector();
                let offset = distance * self.progress(t);
                pixel::translate(
                    &frame,
                    (ux * offset).round() as i64,
                    (uy * offset).round() as i64,
                    self.background,
                )
            }
            EffectSpec::Rotate { angle } => pixel::rotate(&frame, angle, self.background),
            EffectSpec::Brightness { factor } => {
                pixel::adjust_brightness(&mut frame, factor);
                frame
            }
            EffectSpec::Crop { .. } => match self.crop {
                Some(rect) => pixel::crop(&frame, rect),
                None => frame,
            },
            EffectSpec::Resize { .. } => {
                let (w, h) = self.size();
                pixel::resize_exact(&frame, w, h)
            }
            EffectSpec::Speed { .. } | EffectSpec::AudioFadeIn { .. } | EffectSpec::AudioFadeOut { .. } => frame,
        };
        Ok(frame)
    }

    fn audio_spans(&self) -> Vec<AudioSpan> {
        let spans = self.inner.audio_spans();
        match self.effect {
            EffectSpec::Speed { factor } => spans.into_iter().map(|s| s.sped_up(factor)).collect(),
            EffectSpec::AudioFadeIn { duration } => spans
                .into_iter()
                .map(|mut s| {
                    if s.start < duration - TIME_EPSILON {
                        s.fade_in = s.fade_in.max(duration - s.start).min(s.duration);
                    }
                    s
                })
                .collect(),
            EffectSpec::AudioFadeOut { duration } => {
                let end = self.duration();
                spans
                    .into_iter()
                    .map(|mut s| {
                        let lead = end - s.end();
                        if lead < duration - TIME_EPSILON {
                            s.fade_out = s.fade_out.max(duration - lead.max(0.0)).min(s.duration);
                        }
                        s
                    })
                    .collect()
            }
            _ => spans,
        }
    }

    fn release(&self) {
        self.inner.release();
    }

    fn fork(&self) -> ClipRef {
        Arc::new(Self {
            inner: self.inner.fork(),
            effect: self.effect.clone(),
            background: self.background,
            crop: self.crop,
        })
    }
}

/// Apply `effects` in list order, failing on the first invalid one
///
/// Returns the wrapped clip and one trace entry per applied effect.
pub fn apply_effects(clip: ClipRef, effects: &[EffectSpec], background: Rgb) -> Result<(ClipRef, Vec<String>)> {
    let mut current = clip;
    let mut applied = Vec::with_capacity(effects.len());

    for effect in effects {
        let description = effect.describe(current.size());
        let wrapped = EffectClip::new(current, effect.clone(), background)?;
        debug!("Applied effect {}", description);
        applied.push(description);
        current = Arc::new(wrapped);
    }

    Ok((current, applied))
}

/// Validate a whole effect list against a clip shape without building anything
pub fn validate_effects(effects: &[EffectSpec], mut size: (u32, u32), mut duration: f64) -> Result<()> {
    for effect in effects {
        effect.validate(size, duration)?;
        match *effect {
            EffectSpec::Speed { factor } => duration /= factor,
            EffectSpec::Crop { .. } => {
                let rect = effect.crop_box(size)?;
                size = (rect.width, rect.height);
            }
            EffectSpec::Resize { width, height } => {
                size = (width.unwrap_or(size.0), height.unwrap_or(size.1));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::spec::PanDirection;
    use crate::error::CompositorError;
    use crate::video::clip::testing::{code, TimeCodeClip};
    use crate::video::clip::ColorClip;

    fn white(duration: f64) -> ClipRef {
        Arc::new(ColorClip::new((8, 8), Rgb::WHITE, duration, 10.0))
    }

    #[test]
    fn test_effects_compose_in_order() {
        let effects = vec![
            EffectSpec::Crop { x1: Some(0), y1: Some(0), x2: Some(4), y2: Some(8) },
            EffectSpec::Resize { width: Some(2), height: Some(2) },
        ];
        let (clip, applied) = apply_effects(white(1.0), &effects, Rgb::BLACK).unwrap();
        assert_eq!(clip.size(), (2, 2));
        assert_eq!(applied, vec!["crop(0,0,4,8)", "resize(2x2)"]);

        // Reversed order: resize first makes the crop exceed the frame
        let reversed: Vec<EffectSpec> = effects.into_iter().rev().collect();
        let err = apply_effects(white(1.0), &reversed, Rgb::BLACK).err().unwrap();
        assert!(matches!(err, CompositorError::InvalidEffectParameters { .. }));
    }

    #[test]
    fn test_fade_in_and_out_ramp_against_background() {
        let effects = vec![
            EffectSpec::FadeIn { duration: 1.0 },
            EffectSpec::FadeOut { duration: 1.0 },
        ];
        let (clip, _) = apply_effects(white(4.0), &effects, Rgb::BLACK).unwrap();

        assert_eq!(clip.frame_at(0.0).unwrap().get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(clip.frame_at(0.5).unwrap().get_pixel(0, 0), [128, 128, 128]);
        assert_eq!(clip.frame_at(2.0).unwrap().get_pixel(0, 0), [255, 255, 255]);
        assert_eq!(clip.frame_at(3.5).unwrap().get_pixel(0, 0), [128, 128, 128]);
    }

    #[test]
    fn test_speed_scales_duration_frames_and_audio() {
        let base = TimeCodeClip::new(10.0, 3).with_audio("a.wav").shared();
        let (fast, _) = apply_effects(base, &[EffectSpec::Speed { factor: 2.0 }], Rgb::BLACK).unwrap();

        assert_eq!(fast.duration(), 5.0);
        assert_eq!(fast.frame_at(2.0).unwrap().get_pixel(0, 0), code(3, 4.0));
        let spans = fast.audio_spans();
        assert_eq!(spans[0].duration, 5.0);
        assert_eq!(spans[0].tempo, 2.0);
    }

    #[test]
    fn test_audio_fades_touch_only_audio() {
        let base = TimeCodeClip::new(6.0, 1).with_audio("a.wav").shared();
        let effects = vec![
            EffectSpec::AudioFadeIn { duration: 1.5 },
            EffectSpec::AudioFadeOut { duration: 2.0 },
        ];
        let (clip, _) = apply_effects(base, &effects, Rgb::BLACK).unwrap();
        let spans = clip.audio_spans();
        assert_eq!(spans[0].fade_in, 1.5);
        assert_eq!(spans[0].fade_out, 2.0);
        assert_eq!(clip.frame_at(0.0).unwrap().get_pixel(0, 0), code(1, 0.0));
    }

    #[test]
    fn test_pan_moves_content_over_time() {
        let (clip, _) = apply_effects(
            white(2.0),
            &[EffectSpec::Pan { direction: PanDirection::Right, distance: 4.0 }],
            Rgb::BLACK,
        ).unwrap();

        assert_eq!(clip.frame_at(0.0).unwrap().get_pixel(0, 0), [255, 255, 255]);
        let later = clip.frame_at(1.0).unwrap();
        assert_eq!(later.get_pixel(1, 0), [0, 0, 0]);
        assert_eq!(later.get_pixel(2, 0), [255, 255, 255]);
    }

    #[test]
    fn test_fade_longer_than_clip_fails_fast() {
        let err = apply_effects(white(1.0), &[EffectSpec::FadeIn { duration: 2.0 }], Rgb::BLACK)
            .err()
            .unwrap();
        assert!(err.is_invalid_parameters());
    }

    #[test]
    fn test_validate_tracks_shape_changes() {
        let effects = vec![
            EffectSpec::Speed { factor: 4.0 },
            EffectSpec::FadeOut { duration: 2.0 },
        ];
        assert!(validate_effects(&effects, (8, 8), 10.0).is_ok());
        assert!(validate_effects(&effects, (8, 8), 4.0).is_err());
    }
}
