//! Per-frame pixel kernels shared by effects and transitions

use image::imageops::{self, FilterType};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rayon::prelude::*;

use crate::effects::spec::CropBox;
use crate::video::types::{Frame, Rgb};

/// `frame * alpha + color * (1 - alpha)`
pub fn blend_towards(frame: &mut Frame, color: Rgb, alpha: f64) {
    let alpha = alpha.clamp(0.0, 1.0) as f32;
    if alpha >= 1.0 {
        return;
    }
    let bg = color.0.map(|c| c as f32 * (1.0 - alpha));
    frame
        .as_image_mut()
        .par_chunks_mut(3)
        .for_each(|px| {
            for c in 0..3 {
                px[c] = (px[c] as f32 * alpha + bg[c]).round().clamp(0.0, 255.0) as u8;
            }
        });
}

/// Multiply every channel by `factor`, saturating at 255
pub fn adjust_brightness(frame: &mut Frame, factor: f64) {
    let factor = factor as f32;
    let width = frame.width() as usize * 3;
    frame
        .as_image_mut()
        .par_chunks_mut(width.max(3))
        .for_each(|row| {
            for v in row.iter_mut() {
                *v = (*v as f32 * factor).round().clamp(0.0, 255.0) as u8;
            }
        });
}

/// Center-anchored scale keeping the frame size
///
/// `scale > 1` magnifies (the overflow is cropped); `scale < 1` shrinks onto
/// the background colour.
pub fn zoom_center(frame: &Frame, scale: f64, background: Rgb) -> Frame {
    let (w, h) = frame.size();
    if (scale - 1.0).abs() < 1e-4 {
        return frame.clone();
    }

    if scale > 1.0 {
        let cw = ((w as f64 / scale).round() as u32).clamp(1, w);
        let ch = ((h as f64 / scale).round() as u32).clamp(1, h);
        let window = imageops::crop_imm(frame.as_image(), (w - cw) / 2, (h - ch) / 2, cw, ch).to_image();
        Frame::new(imageops::resize(&window, w, h, FilterType::Triangle))
    } else {
        let sw = ((w as f64 * scale).round() as u32).max(1);
        let sh = ((h as f64 * scale).round() as u32).max(1);
        let small = imageops::resize(frame.as_image(), sw, sh, FilterType::Triangle);
        let mut canvas = Frame::new_filled(w, h, background);
        imageops::replace(canvas.as_image_mut(), &small, ((w - sw) / 2) as i64, ((h - sh) / 2) as i64);
        canvas
    }
}

/// Shift content by `(dx, dy)` pixels; uncovered area takes the background colour
pub fn translate(frame: &Frame, dx: i64, dy: i64, background: Rgb) -> Frame {
    if dx == 0 && dy == 0 {
        return frame.clone();
    }
    let (w, h) = frame.size();
    let mut canvas = Frame::new_filled(w, h, background);
    imageops::replace(canvas.as_image_mut(), frame.as_image(), dx, dy);
    canvas
}

/// Rotate counter-clockwise by `degrees` about the center, keeping the frame size
pub fn rotate(frame: &Frame, degrees: f64, background: Rgb) -> Frame {
    if degrees.rem_euclid(360.0).abs() < 1e-9 {
        return frame.clone();
    }
    // imageproc's positive angles turn clockwise in image coordinates
    let theta = -(degrees.to_radians()) as f32;
    Frame::new(rotate_about_center(
        frame.as_image(),
        theta,
        Interpolation::Bilinear,
        background.pixel(),
    ))
}

pub fn crop(frame: &Frame, rect: CropBox) -> Frame {
    Frame::new(imageops::crop_imm(frame.as_image(), rect.x, rect.y, rect.width, rect.height).to_image())
}

pub fn resize_exact(frame: &Frame, width: u32, height: u32) -> Frame {
    if frame.size() == (width, height) {
        return frame.clone();
    }
    Frame::new(imageops::resize(frame.as_image(), width, height, FilterType::Lanczos3))
}
