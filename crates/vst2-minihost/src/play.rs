use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vst2_host::{AudioBuffer, HostError, MidiMessage, Vst2Plugin};

/// Note played by the `play` command.
#[derive(Debug, Clone, Copy)]
pub struct LiveNote {
    pub note: u8,
    pub velocity: u8,
    /// Frame at which the note is released.
    pub release_at: usize,
}

/// Pulls audio from a plug-in on demand and writes it into interleaved
/// device buffers.
///
/// Device buffers are split into blocks no larger than the block size
/// the plug-in was prepared with.
pub struct LivePlayer {
    plugin: Vst2Plugin,
    inputs: AudioBuffer<f32>,
    block: AudioBuffer<f32>,
    block_size: usize,
    note: LiveNote,
    released: bool,
    position: usize,
    played: Arc<AtomicUsize>,
}

impl LivePlayer {
    /// Prepares `plugin` for streaming and queues the note-on for the
    /// first block.
    pub fn new(plugin: Vst2Plugin, sample_rate: f32, block_size: usize, note: LiveNote) -> Result<Self, HostError> {
        plugin.turn_off()?;
        plugin.set_sample_rate(sample_rate)?;
        plugin.set_block_size(block_size)?;
        plugin.turn_on()?;
        plugin.queue_midi_message(MidiMessage::note_on(0, note.note, note.velocity));

        Ok(Self {
            inputs: AudioBuffer::new(plugin.num_inputs(), block_size),
            block: AudioBuffer::new(plugin.num_outputs(), block_size),
            plugin,
            block_size,
            note,
            released: false,
            position: 0,
            played: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Frames rendered so far, readable from another thread.
    pub fn progress(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.played)
    }

    pub fn plugin(&self) -> &Vst2Plugin {
        &self.plugin
    }

    /// Fills `data`, holding `channels` interleaved channels. Device
    /// channels beyond the plug-in outputs repeat them cyclically.
    ///
    /// On failure the unfilled part of `data` is silenced.
    pub fn fill(&mut self, data: &mut [f32], channels: usize) -> Result<(), HostError> {
        if channels == 0 {
            return Ok(());
        }
        let outputs = self.plugin.num_outputs();
        for chunk in data.chunks_mut(self.block_size * channels) {
            let frames = chunk.len() / channels;
            if let Err(err) = self.render_block(frames) {
                chunk.fill(0.0);
                return Err(err);
            }
            for (frame, samples) in chunk.chunks_mut(channels).enumerate() {
                for (channel, sample) in samples.iter_mut().enumerate() {
                    *sample = match outputs {
                        0 => 0.0,
                        n => self.block.channel(channel % n)[frame],
                    };
                }
            }
        }
        Ok(())
    }

    fn render_block(&mut self, frames: usize) -> Result<(), HostError> {
        let end = self.position + frames;
        if !self.released && self.note.release_at < end {
            let delta = self.note.release_at.saturating_sub(self.position) as u32;
            self.plugin
                .queue_midi_message_at(MidiMessage::note_off(0, self.note.note, 0), delta);
            self.released = true;
        }
        self.block.clear();
        self.plugin
            .process_replacing(&[], &self.inputs, &mut self.block, frames)?;
        self.position = end;
        self.played.store(end, Ordering::Relaxed);
        Ok(())
    }

    /// Stops processing and hands the plug-in back.
    pub fn finish(self) -> Result<Vst2Plugin, HostError> {
        self.plugin.turn_off()?;
        tracing::info!(frames = self.position, "playback finished");
        Ok(self.plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vst2_host::HostRegistry;
    use vst2_test_plugin::{FakePluginConfig, VSTPluginMain};

    fn note(release_at: usize) -> LiveNote {
        LiveNote {
            note: 64,
            velocity: 90,
            release_at,
        }
    }

    #[test]
    fn device_buffers_are_split_into_plugin_blocks() {
        let registry = HostRegistry::default();
        let probe = FakePluginConfig::synth().install();
        let plugin = unsafe { registry.instantiate(VSTPluginMain) }.unwrap();
        let mut player = LivePlayer::new(plugin, 48_000.0, 128, note(290)).unwrap();
        let progress = player.progress();

        let mut data = vec![1.0f32; 300 * 2];
        player.fill(&mut data, 2).unwrap();

        assert!(data.iter().all(|&sample| sample == 0.0));
        assert_eq!(progress.load(Ordering::Relaxed), 300);
        assert_eq!(probe.process_calls.load(Ordering::SeqCst), 3);
        assert_eq!(*probe.block_sizes.lock(), vec![128]);
        // Note on in the first block, note off 34 frames into the third.
        assert_eq!(*probe.event_batches.lock(), vec![1, 1]);
        assert_eq!(*probe.received_deltas.lock(), vec![0, 34]);
        assert_eq!(probe.received.lock()[0], vec![0x90, 64, 90]);

        let plugin = player.finish().unwrap();
        assert!(!plugin.is_resumed());
    }

    #[test]
    fn release_is_sent_once_across_callbacks() {
        let registry = HostRegistry::default();
        let probe = FakePluginConfig::synth().install();
        let plugin = unsafe { registry.instantiate(VSTPluginMain) }.unwrap();
        let mut player = LivePlayer::new(plugin, 44_100.0, 64, note(100)).unwrap();

        let mut data = vec![0.0f32; 64];
        for _ in 0..4 {
            player.fill(&mut data, 1).unwrap();
        }

        assert_eq!(probe.process_calls.load(Ordering::SeqCst), 4);
        // 100 falls into the second callback, 36 frames in.
        assert_eq!(*probe.received_deltas.lock(), vec![0, 36]);
        assert_eq!(probe.received.lock()[1], vec![0x80, 64, 0]);
    }

    #[test]
    fn extra_device_channels_repeat_plugin_outputs() {
        let registry = HostRegistry::default();
        let _probe = FakePluginConfig {
            num_outputs: 1,
            ..FakePluginConfig::synth()
        }
        .install();
        let plugin = unsafe { registry.instantiate(VSTPluginMain) }.unwrap();
        let mut player = LivePlayer::new(plugin, 48_000.0, 32, note(1_000)).unwrap();

        let mut data = vec![0.5f32; 10 * 4];
        player.fill(&mut data, 4).unwrap();
        assert!(data.iter().all(|&sample| sample == 0.0));

        player.fill(&mut [], 4).unwrap();
        player.fill(&mut data, 0).unwrap();
        assert_eq!(player.progress().load(Ordering::Relaxed), 10);
    }
}
