use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vst2_host::{AudioBuffer, MidiMessage, Vst2Plugin};

/// MIDI message scheduled at an absolute frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMessage {
    pub frame: usize,
    pub message: MidiMessage,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub sample_rate: f32,
    pub block_size: usize,
    pub frames: usize,
}

/// One note held for three quarters of the render.
pub fn single_note(settings: &RenderSettings, note: u8, velocity: u8) -> Vec<TimedMessage> {
    vec![
        TimedMessage {
            frame: 0,
            message: MidiMessage::note_on(0, note, velocity),
        },
        TimedMessage {
            frame: settings.frames * 3 / 4,
            message: MidiMessage::note_off(0, note, 0),
        },
    ]
}

/// `count` random notes in 48..72, one per second.
pub fn random_notes(settings: &RenderSettings, count: usize, seed: u64) -> Vec<TimedMessage> {
    let mut rng = StdRng::seed_from_u64(seed);
    let second = settings.sample_rate as usize;
    let mut messages = Vec::with_capacity(count * 2);
    for index in 0..count {
        let note = rng.gen_range(48..72u8);
        let velocity = rng.gen_range(64..=127u8);
        let start = index * second;
        messages.push(TimedMessage {
            frame: start,
            message: MidiMessage::note_on(0, note, velocity),
        });
        messages.push(TimedMessage {
            frame: start + second * 9 / 10,
            message: MidiMessage::note_off(0, note, 0),
        });
    }
    messages.sort_by_key(|timed| timed.frame);
    messages
}

/// Runs the plug-in over `settings.frames` frames and returns one vector per
/// output channel. Messages are delivered with the block they fall into.
pub fn render(plugin: &Vst2Plugin, settings: &RenderSettings, messages: &[TimedMessage]) -> Result<Vec<Vec<f32>>> {
    plugin.turn_off()?;
    plugin.set_sample_rate(settings.sample_rate)?;
    plugin.set_block_size(settings.block_size)?;
    plugin.turn_on()?;

    let inputs = AudioBuffer::<f32>::new(plugin.num_inputs(), settings.block_size);
    let mut block = AudioBuffer::<f32>::new(plugin.num_outputs(), settings.block_size);
    let mut rendered = vec![Vec::with_capacity(settings.frames); plugin.num_outputs()];
    let mut pending = messages.iter().peekable();
    let mut position = 0;

    while position < settings.frames {
        let frames = settings.block_size.min(settings.frames - position);
        while let Some(timed) = pending.next_if(|timed| timed.frame < position + frames) {
            let delta = timed.frame.saturating_sub(position) as u32;
            plugin.queue_midi_message_at(timed.message.clone(), delta);
        }
        block.clear();
        plugin
            .process_replacing(&[], &inputs, &mut block, frames)
            .with_context(|| format!("process failed at frame {position}"))?;
        for (channel, out) in rendered.iter_mut().enumerate() {
            out.extend_from_slice(&block.channel(channel)[..frames]);
        }
        position += frames;
    }

    plugin.turn_off()?;
    tracing::info!(frames = settings.frames, channels = rendered.len(), "render finished");
    Ok(rendered)
}

/// Writes channels as an interleaved 32-bit float WAV file.
pub fn write_wav(path: &Path, sample_rate: u32, channels: &[Vec<f32>]) -> Result<()> {
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).with_context(|| format!("failed to create {}", path.display()))?;
    let frames = channels.first().map_or(0, Vec::len);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;
    Ok(())
}
