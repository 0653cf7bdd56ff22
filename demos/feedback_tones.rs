//! Plays every feedback effect through the default output device.
//!
//! Run with: cargo run --example feedback_tones --features cpal_output
//!
//! Native streams start paused just like a fresh browser context, so this
//! also walks the gesture/resume dance before the first tone.

use std::thread::sleep;
use std::time::Duration;

use plink::{AudioEngine, Settings, SoundEffect, UnlockGesture};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let engine = AudioEngine::default_output(Settings::new());
    if !engine.warm_up() {
        eprintln!("No audio output devices found!");
        return;
    }

    // A keypress would normally land here; fake it.
    engine.notice_gesture(UnlockGesture::KeyDown);
    if !engine.ensure_running_blocking() {
        eprintln!("Output never confirmed running; trying to play anyway.");
    }

    for effect in SoundEffect::ALL {
        println!("Playing {}...", effect.label());
        engine.play_sound(effect);
        sleep(Duration::from_millis(1200));
    }

    println!("\nDiagnostic log (oldest first):");
    for entry in engine.diagnostics().recent.iter().rev() {
        println!("  {entry}");
    }

    engine.close();
}
