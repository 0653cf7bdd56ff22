//! Loops the procedural background track and fades the volume live.
//!
//! Run with: cargo run --example music_loop --features cpal_output

use std::thread::sleep;
use std::time::Duration;

use plink::{AudioEngine, Settings};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let engine = AudioEngine::default_output(Settings::new());
    if !engine.ensure_running_blocking() {
        eprintln!("No audio output devices found!");
        return;
    }

    if !engine.start_music() {
        eprintln!("Music did not start, see the log above.");
        return;
    }

    println!("Playing one full pass of the loop...");
    sleep(Duration::from_secs(8));

    println!("Ducking the volume...");
    engine.set_music_volume(0.1);
    sleep(Duration::from_secs(4));

    println!("...and back up.");
    engine.set_music_volume(0.5);
    sleep(Duration::from_secs(4));

    engine.stop_music();
    engine.close();
}
