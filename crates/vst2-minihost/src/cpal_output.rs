use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::play::LivePlayer;

/// Streams `player` to the default output device until `frames` frames
/// have been played.
pub fn play(mut player: LivePlayer, sample_rate: u32, block_size: usize, frames: usize) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let desired_sample_rate = cpal::SampleRate(sample_rate);
    let wanted_channels = player.plugin().num_outputs().max(1) as u16;
    let mut selected = None;
    for range in device
        .supported_output_configs()
        .with_context(|| format!("failed to query {device_name}"))?
    {
        if range.sample_format() != cpal::SampleFormat::F32
            || range.min_sample_rate() > desired_sample_rate
            || range.max_sample_rate() < desired_sample_rate
        {
            continue;
        }
        let exact = range.channels() == wanted_channels;
        selected = Some(range);
        if exact {
            break;
        }
    }
    let range = selected.ok_or_else(|| anyhow!("{device_name} has no f32 output at {sample_rate} Hz"))?;

    let buffer_sizes = range.buffer_size().clone();
    let mut config = range.with_sample_rate(desired_sample_rate).config();
    if let cpal::SupportedBufferSize::Range { min, max } = buffer_sizes {
        let wanted = block_size as u32;
        if (min..=max).contains(&wanted) {
            config.buffer_size = cpal::BufferSize::Fixed(wanted);
        }
    }

    let channels = config.channels as usize;
    let progress = player.progress();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Err(err) = player.fill(data, channels) {
                    tracing::error!(?err, "plugin process failed during playback");
                }
            },
            move |err| {
                tracing::error!("cpal stream error: {err}");
            },
            None,
        )
        .with_context(|| format!("failed to open output stream on {device_name}"))?;
    stream.play().context("failed to start output stream")?;
    tracing::info!(device = %device_name, channels, sample_rate, buffer_size = ?config.buffer_size, "playback started");

    let tick = Duration::from_millis(20);
    let deadline = Duration::from_secs_f64(frames as f64 / sample_rate as f64) + Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    while progress.load(Ordering::Relaxed) < frames && waited < deadline {
        thread::sleep(tick);
        waited += tick;
    }
    stream.pause().ok();
    drop(stream);

    let played = progress.load(Ordering::Relaxed);
    if played < frames {
        tracing::warn!(played, frames, "output stream stalled before the note finished");
    }
    Ok(())
}
