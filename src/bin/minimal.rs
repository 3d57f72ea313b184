// Smoke test for the clip model, effects, transitions and the renderer

use std::sync::Arc;

use timeline_compositor::{
    composition::{Composite, CompositionEngine},
    config::Config,
    effects::{apply_effects, EffectSpec},
    transitions::{SequenceClip, TransitionKind, TransitionSpec},
    video::{Clip, ClipRef, ColorClip, ExportSettings, Rgb},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🎬 Testing Timeline-Compositor Core Functionality");

    // Test 1: Solid clips
    println!("\n1. Building clips...");
    let size = (320, 180);
    let red: ClipRef = Arc::new(ColorClip::new(size, Rgb([220, 40, 40]), 2.0, 30.0));
    let blue: ClipRef = Arc::new(ColorClip::new(size, Rgb([40, 40, 220]), 2.0, 30.0));
    let green: ClipRef = Arc::new(ColorClip::new(size, Rgb([40, 220, 40]), 2.0, 30.0));
    println!("   Three 2.0s clips at {}x{}", size.0, size.1);

    // Test 2: Effects
    println!("\n2. Applying effects...");
    let (red, applied) = apply_effects(
        red,
        &[EffectSpec::FadeIn { duration: 0.5 }, EffectSpec::Rotate { angle: 10.0 }],
        Rgb::BLACK,
    )?;
    println!("   Applied: {:?}", applied);

    // Test 3: Transitions
    println!("\n3. Joining with transitions...");
    let sequenced = SequenceClip::build(
        vec![red, blue, green],
        vec![
            TransitionSpec::crossfade(0.5),
            TransitionSpec::new(TransitionKind::SlideLeft, 0.5),
        ],
        Rgb::BLACK,
        1.3,
    )?;
    let clip: ClipRef = Arc::new(sequenced.clip);
    println!("   Duration: {:.2}s (expected 5.00s)", clip.duration());
    assert!((clip.duration() - 5.0).abs() < 1e-9);

    // Test 4: Frame sampling
    println!("\n4. Sampling the crossfade midpoint...");
    let frame = clip.frame_at(1.75)?;
    match frame.save("minimal_test_output.png") {
        Ok(()) => println!("   📁 Frame saved to: minimal_test_output.png"),
        Err(e) => println!("   ⚠️  Could not save frame: {}", e),
    }

    // Test 5: Render, when ffmpeg is around
    println!("\n5. Rendering...");
    let engine = CompositionEngine::new(Config::default());
    if engine.renderer().check_ffmpeg_available() {
        let result = engine.render(
            &Composite::new(clip),
            "minimal_test_output.mp4".as_ref(),
            &ExportSettings::default(),
        )?;
        println!("   ✅ Rendered {:.2}s, {} bytes", result.duration, result.file_size);
    } else {
        println!("   ⚠️  ffmpeg not found, skipping render");
    }

    println!("\n🎉 All core tests passed!");
    Ok(())
}
