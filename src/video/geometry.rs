//! # Geometry Fitter
//!
//! Maps a source frame of arbitrary size onto a fixed target canvas. The
//! transform is a pure function of `(source, target, policy)`: every
//! comparison is done in integer arithmetic so identical inputs always give
//! bit-identical output.

use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::video::types::{Frame, Rgb};

/// Geometric rule for mapping a source frame into the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
    /// Scale to fit inside, letterbox with the background colour
    #[default]
    Contain,
    /// Scale to fill, center-crop the overflow
    Cover,
    /// Independent per-axis scale
    Stretch,
    /// No scaling; cut a canvas-sized window from the source center
    CropCenter,
}

impl FitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitPolicy::Contain => "contain",
            FitPolicy::Cover => "cover",
            FitPolicy::Stretch => "stretch",
            FitPolicy::CropCenter => "crop_center",
        }
    }
}

/// Rectangle in scaled-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Placement of a source frame on the target canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitTransform {
    pub scale_x: f64,
    pub scale_y: f64,

    /// Size of the source after scaling, before cropping
    pub scaled_size: (u32, u32),

    /// Top-left of the (cropped) scaled image on the canvas
    pub offset_x: u32,
    pub offset_y: u32,

    /// Window cut from the scaled image, if any
    pub crop: Option<CropRect>,

    /// Canvas size
    pub target: (u32, u32),

    /// Policy that actually produced this transform
    pub applied: FitPolicy,

    /// Set when `CropCenter` could not be honoured and `Contain` was used
    pub fell_back: bool,
}

impl FitTransform {
    /// Rectangle covered by source pixels on the canvas: (x, y, w, h)
    pub fn placed_rect(&self) -> (u32, u32, u32, u32) {
        let (w, h) = match self.crop {
            Some(c) => (c.width, c.height),
            None => self.scaled_size,
        };
        (self.offset_x, self.offset_y, w, h)
    }

    pub fn is_identity(&self) -> bool {
        self.scaled_size == self.target && self.crop.is_none() && self.offset_x == 0 && self.offset_y == 0
    }

    pub fn describe(&self) -> String {
        let (x, y, w, h) = self.placed_rect();
        let mut text = format!(
            "fit({}: {}x{} at {},{} on {}x{})",
            self.applied.as_str(), w, h, x, y, self.target.0, self.target.1
        );
        if self.fell_back {
            text.push_str(" [crop_center fallback]");
        }
        text
    }
}

/// Compute the transform for `source` on a `target` canvas
pub fn fit(source: (u32, u32), target: (u32, u32), policy: FitPolicy) -> FitTransform {
    let (sw, sh) = (source.0.max(1), source.1.max(1));
    let (tw, th) = (target.0.max(1), target.1.max(1));

    match policy {
        FitPolicy::Contain => contain(sw, sh, tw, th, false),
        FitPolicy::Cover => cover(sw, sh, tw, th),
        FitPolicy::Stretch => FitTransform {
            scale_x: tw as f64 / sw as f64,
            scale_y: th as f64 / sh as f64,
            scaled_size: (tw, th),
            offset_x: 0,
            offset_y: 0,
            crop: None,
            target: (tw, th),
            applied: FitPolicy::Stretch,
            fell_back: false,
        },
        FitPolicy::CropCenter => {
            if sw >= tw && sh >= th {
                FitTransform {
                    scale_x: 1.0,
                    scale_y: 1.0,
                    scaled_size: (sw, sh),
                    offset_x: 0,
                    offset_y: 0,
                    crop: Some(CropRect {
                        x: (sw - tw) / 2,
                        y: (sh - th) / 2,
                        width: tw,
                        height: th,
                    }),
                    target: (tw, th),
                    applied: FitPolicy::CropCenter,
                    fell_back: false,
                }
            } else {
                // Source smaller than canvas on some axis: letterbox instead of a negative crop
                contain(sw, sh, tw, th, true)
            }
        }
    }
}

fn rounded_div(num: u64, den: u64) -> u32 {
    ((num + den / 2) / den) as u32
}

fn contain(sw: u32, sh: u32, tw: u32, th: u32, fell_back: bool) -> FitTransform {
    let (sw64, sh64, tw64, th64) = (sw as u64, sh as u64, tw as u64, th as u64);

    // tw/sw <= th/sh  <=>  tw*sh <= th*sw : width is the binding axis
    let (w, h, scale) = if tw64 * sh64 <= th64 * sw64 {
        let h = rounded_div(sh64 * tw64, sw64).clamp(1, th);
        (tw, h, tw as f64 / sw as f64)
    } else {
        let w = rounded_div(sw64 * th64, sh64).clamp(1, tw);
        (w, th, th as f64 / sh as f64)
    };

    FitTransform {
        scale_x: scale,
        scale_y: scale,
        scaled_size: (w, h),
        offset_x: (tw - w) / 2,
        offset_y: (th - h) / 2,
        crop: None,
        target: (tw, th),
        applied: FitPolicy::Contain,
        fell_back,
    }
}

fn cover(sw: u32, sh: u32, tw: u32, th: u32) -> FitTransform {
    let (sw64, sh64, tw64, th64) = (sw as u64, sh as u64, tw as u64, th as u64);

    // Height is the binding axis when the source is relatively wider
    let (w, h, scale) = if tw64 * sh64 <= th64 * sw64 {
        let w = rounded_div(sw64 * th64, sh64).max(tw);
        (w, th, th as f64 / sh as f64)
    } else {
        let h = rounded_div(sh64 * tw64, sw64).max(th);
        (tw, h, tw as f64 / sw as f64)
    };

    FitTransform {
        scale_x: scale,
        scale_y: scale,
        scaled_size: (w, h),
        offset_x: 0,
        offset_y: 0,
        // Matching aspect ratios scale straight onto the canvas
        crop: ((w, h) != (tw, th)).then(|| CropRect {
            x: (w - tw) / 2,
            y: (h - th) / 2,
            width: tw,
            height: th,
        }),
        target: (tw, th),
        applied: FitPolicy::Cover,
        fell_back: false,
    }
}

/// Render `frame` onto a canvas according to `transform`
pub fn apply_fit(frame: &Frame, transform: &FitTransform, background: Rgb) -> Frame {
    if transform.is_identity() && frame.size() == transform.target {
        return frame.clone();
    }

    let (sw, sh) = transform.scaled_size;
    let scaled = if frame.size() == (sw, sh) {
        frame.as_image().clone()
    } else {
        imageops::resize(frame.as_image(), sw, sh, FilterType::Lanczos3)
    };

    let placed = match transform.crop {
        Some(c) => imageops::crop_imm(&scaled, c.x, c.y, c.width, c.height).to_image(),
        None => scaled,
    };

    if placed.dimensions() == transform.target {
        return Frame::new(placed);
    }

    let mut canvas = Frame::new_filled(transform.target.0, transform.target.1, background);
    imageops::replace(
        canvas.as_image_mut(),
        &placed,
        transform.offset_x as i64,
        transform.offset_y as i64,
    );
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HD: (u32, u32) = (1920, 1080);

    #[test]
    fn contain_mixed_aspect_ratios_touch_matching_edge() {
        // 16:9 fills the canvas exactly
        let wide = fit((1280, 720), HD, FitPolicy::Contain);
        assert_eq!(wide.placed_rect(), (0, 0, 1920, 1080));

        // 1:1 is pillarboxed; height touches
        let square = fit((800, 800), HD, FitPolicy::Contain);
        assert_eq!(square.placed_rect(), (420, 0, 1080, 1080));

        // 9:16 is pillarboxed; its longer edge (height) touches
        let tall = fit((1080, 1920), HD, FitPolicy::Contain);
        let (x, y, w, h) = tall.placed_rect();
        assert_eq!((y, h), (0, 1080));
        assert_eq!(w, 608);
        assert_eq!(x, (1920 - 608) / 2);
        assert!(tall.crop.is_none());
    }

    #[test]
    fn cover_overflows_then_crops_to_canvas() {
        let t = fit((1000, 1000), HD, FitPolicy::Cover);
        assert_eq!(t.scaled_size, (1920, 1920));
        assert_eq!(t.crop, Some(CropRect { x: 0, y: 420, width: 1920, height: 1080 }));
        assert_eq!(t.placed_rect(), (0, 0, 1920, 1080));
    }

    #[test]
    fn cover_without_overflow_needs_no_crop() {
        let same = fit(HD, HD, FitPolicy::Cover);
        assert!(same.crop.is_none());
        assert!(same.is_identity());

        let upscaled = fit((1280, 720), HD, FitPolicy::Cover);
        assert!(upscaled.crop.is_none());
        assert_eq!(upscaled.placed_rect(), (0, 0, 1920, 1080));
    }

    #[test]
    fn stretch_ignores_aspect() {
        let t = fit((100, 400), (300, 100), FitPolicy::Stretch);
        assert_eq!(t.scaled_size, (300, 100));
        assert_eq!(t.scale_x, 3.0);
        assert_eq!(t.scale_y, 0.25);
    }

    #[test]
    fn crop_center_cuts_window_without_scaling() {
        let t = fit((3840, 2160), HD, FitPolicy::CropCenter);
        assert!(!t.fell_back);
        assert_eq!(t.scale_x, 1.0);
        assert_eq!(t.crop, Some(CropRect { x: 960, y: 540, width: 1920, height: 1080 }));
    }

    #[test]
    fn crop_center_falls_back_to_contain_for_small_sources() {
        let t = fit((640, 2000), HD, FitPolicy::CropCenter);
        assert!(t.fell_back);
        assert_eq!(t.applied, FitPolicy::Contain);
        assert!(t.crop.is_none());
        assert!(t.describe().contains("fallback"));
    }

    #[test]
    fn apply_fit_letterboxes_with_background() {
        let src = Frame::new_filled(10, 10, Rgb([255, 0, 0]));
        let t = fit(src.size(), (20, 10), FitPolicy::Contain);
        let out = apply_fit(&src, &t, Rgb([0, 0, 255]));

        assert_eq!(out.size(), (20, 10));
        assert_eq!(out.get_pixel(0, 5), [0, 0, 255]);
        assert_eq!(out.get_pixel(10, 5), [255, 0, 0]);
        assert_eq!(out.get_pixel(19, 5), [0, 0, 255]);
    }

    #[test]
    fn apply_fit_cover_fills_canvas() {
        let src = Frame::new_filled(10, 30, Rgb([9, 9, 9]));
        let t = fit(src.size(), (20, 10), FitPolicy::Cover);
        let out = apply_fit(&src, &t, Rgb::BLACK);
        assert_eq!(out.size(), (20, 10));
        assert_eq!(out.get_pixel(0, 0), [9, 9, 9]);
    }

    proptest! {
        #[test]
        fn contain_stays_inside_and_touches_an_edge(
            sw in 1u32..5000, sh in 1u32..5000, tw in 1u32..4000, th in 1u32..4000
        ) {
            let t = fit((sw, sh), (tw, th), FitPolicy::Contain);
            let (x, y, w, h) = t.placed_rect();
            prop_assert!(x + w <= tw);
            prop_assert!(y + h <= th);
            prop_assert!(w == tw || h == th);
        }

        #[test]
        fn fit_is_deterministic(sw in 1u32..5000, sh in 1u32..5000, tw in 1u32..4000, th in 1u32..4000) {
            for policy in [FitPolicy::Contain, FitPolicy::Cover, FitPolicy::Stretch, FitPolicy::CropCenter] {
                prop_assert_eq!(fit((sw, sh), (tw, th), policy), fit((sw, sh), (tw, th), policy));
            }
        }

        #[test]
        fn cover_always_yields_canvas_sized_window(sw in 1u32..5000, sh in 1u32..5000, tw in 1u32..4000, th in 1u32..4000) {
            let t = fit((sw, sh), (tw, th), FitPolicy::Cover);
            prop_assert_eq!(t.placed_rect(), (0, 0, tw, th));
            if let Some(c) = t.crop {
                prop_assert!(c.x + c.width <= t.scaled_size.0);
                prop_assert!(c.y + c.height <= t.scaled_size.1);
            }
        }
    }
}
