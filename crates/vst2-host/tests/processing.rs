mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use vst2_host::ffi::effect_flags;
use vst2_host::{AudioBuffer, BufferError, Direction, HostError, HostRegistry, MidiMessage};
use vst2_test_plugin::FakePluginConfig;

#[test]
fn sine_passes_through_without_copies() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::default())?;
    plugin.turn_on()?;

    let inputs = vec![common::sine(512, 440.0, 48_000.0), common::sine(512, 660.0, 48_000.0)];
    let mut outputs = vec![vec![0.0f32; 512]; 2];
    plugin.process_replacing(&[], &inputs, &mut outputs, 512)?;

    assert_eq!(outputs, inputs);
    assert_eq!(
        *probe.channel_pointers.lock(),
        vec![(inputs[0].as_ptr() as usize, outputs[0].as_ptr() as usize)]
    );
    Ok(())
}

#[test]
fn audio_buffers_bind_directly() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::default())?;
    plugin.turn_on()?;

    let inputs = AudioBuffer::from_channels(vec![vec![0.5f32; 256], vec![-0.5; 256]]);
    let mut outputs = AudioBuffer::<f32>::new(2, 256);
    plugin.process_replacing(&[], &inputs, &mut outputs, 256)?;

    assert!(outputs.channel(1).iter().all(|&sample| sample == -0.5));
    assert_eq!(probe.channel_pointers.lock()[0].0, inputs.channel(0).as_ptr() as usize);
    Ok(())
}

#[test]
fn processing_requires_a_resumed_plugin() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::default())?;
    let inputs = vec![vec![0.0f32; 64]; 2];
    let mut outputs = vec![vec![0.0f32; 64]; 2];

    let err = plugin.process_replacing(&[], &inputs, &mut outputs, 64).unwrap_err();
    assert!(matches!(err, HostError::InvalidState(_)));
    assert_eq!(probe.process_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn buffers_are_validated_before_the_plugin_runs() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::default())?;
    plugin.turn_on()?;

    let mut outputs = vec![vec![0.0f32; 1024]; 2];
    let too_long = vec![vec![0.0f32; 1024]; 2];
    assert!(matches!(
        plugin.process_replacing(&[], &too_long, &mut outputs, 1024),
        Err(HostError::InvalidArgument(_))
    ));

    let one_channel = vec![vec![0.0f32; 64]];
    assert_eq!(
        plugin.process_replacing(&[], &one_channel, &mut outputs, 64).unwrap_err().to_string(),
        HostError::Buffer(BufferError::ConfigurationMismatch {
            direction: Direction::Input,
            expected: 2,
            actual: 1,
        })
        .to_string()
    );

    let short = vec![vec![0.0f32; 64], vec![0.0f32; 32]];
    assert!(matches!(
        plugin.process_replacing(&[], &short, &mut outputs, 64),
        Err(HostError::Buffer(BufferError::InvalidChannelPointer {
            direction: Direction::Input,
            channel: 1,
            len: 32,
            frames: 64,
        }))
    ));
    assert_eq!(probe.process_calls.load(Ordering::SeqCst), 0);

    // A failed call leaves nothing behind.
    let inputs = vec![vec![0.25f32; 64]; 2];
    plugin.process_replacing(&[], &inputs, &mut outputs, 64)?;
    assert_eq!(outputs[0][..64], [0.25f32; 64]);
    Ok(())
}

#[test]
fn midi_is_delivered_as_one_batch_before_processing() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::synth())?;
    plugin.turn_on()?;

    let inputs: Vec<Vec<f32>> = Vec::new();
    let mut outputs = vec![vec![1.0f32; 128]; 2];

    plugin.queue_midi_message(MidiMessage::note_on(0, 60, 100));
    let per_call = [
        MidiMessage::control_change(2, 7, 90),
        MidiMessage::SysEx(vec![0xF0, 0x43, 0x10, 0xF7]),
    ];
    plugin.process_replacing(&per_call, &inputs, &mut outputs, 128)?;

    assert_eq!(*probe.event_batches.lock(), vec![3]);
    assert_eq!(
        *probe.received.lock(),
        vec![vec![0x90, 60, 100], vec![0xB2, 7, 90], vec![0xF0, 0x43, 0x10, 0xF7]]
    );
    // Synths without inputs get silence written to every output.
    assert!(outputs.iter().flatten().all(|&sample| sample == 0.0));

    plugin.process_replacing(&[], &inputs, &mut outputs, 128)?;
    assert_eq!(probe.event_batches.lock().len(), 1);
    assert_eq!(probe.process_calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn accumulating_process_is_refused_for_vst_2_4() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, _) = common::prepared(&registry, FakePluginConfig::default())?;
    plugin.turn_on()?;
    let inputs = vec![vec![0.5f32; 32]; 2];
    let mut outputs = vec![vec![0.0f32; 32]; 2];
    assert!(matches!(
        plugin.process(&[], &inputs, &mut outputs, 32),
        Err(HostError::Unsupported(_))
    ));
    Ok(())
}

#[test]
fn accumulating_process_adds_into_outputs() -> Result<()> {
    let registry = HostRegistry::default();
    let config = FakePluginConfig {
        vst_version: 2300,
        ..FakePluginConfig::default()
    };
    let (plugin, _) = common::prepared(&registry, config)?;
    plugin.turn_on()?;
    let inputs = vec![vec![0.5f32; 32]; 2];
    let mut outputs = vec![vec![0.25f32; 32]; 2];
    plugin.process(&[], &inputs, &mut outputs, 32)?;
    assert!(outputs.iter().flatten().all(|&sample| sample == 0.75));
    Ok(())
}

#[test]
fn double_precision_needs_the_flag() -> Result<()> {
    let registry = HostRegistry::default();
    let (single, _) = common::prepared(&registry, FakePluginConfig::default())?;
    single.turn_on()?;
    let inputs = vec![vec![0.5f64; 32]; 2];
    let mut outputs = vec![vec![0.0f64; 32]; 2];
    assert!(matches!(
        single.process_double_replacing(&[], &inputs, &mut outputs, 32),
        Err(HostError::Unsupported(_))
    ));

    let config = FakePluginConfig::default().with_flags(effect_flags::CAN_DOUBLE_REPLACING);
    let (double, probe) = common::prepared(&registry, config)?;
    double.turn_on()?;
    double.process_double_replacing(&[], &inputs, &mut outputs, 32)?;
    assert_eq!(outputs, inputs);
    assert_eq!(probe.channel_pointers.lock()[0].1, outputs[0].as_ptr() as usize);
    Ok(())
}

#[test]
fn parameters_can_change_while_another_thread_processes() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::default())?;
    plugin.turn_on()?;
    let plugin = Arc::new(plugin);

    let audio = {
        let plugin = Arc::clone(&plugin);
        thread::spawn(move || -> Result<(), HostError> {
            let inputs = vec![vec![0.1f32; 256]; 2];
            let mut outputs = vec![vec![0.0f32; 256]; 2];
            for _ in 0..200 {
                plugin.process_replacing(&[], &inputs, &mut outputs, 256)?;
            }
            Ok(())
        })
    };
    for step in 0..200 {
        plugin.set_parameter(step % 4, (step % 10) as f32 / 10.0)?;
    }
    audio.join().expect("audio thread")?;

    assert_eq!(probe.process_calls.load(Ordering::SeqCst), 200);
    Ok(())
}

#[test]
fn queued_messages_keep_their_offset_into_the_block() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, probe) = common::prepared(&registry, FakePluginConfig::synth())?;
    plugin.turn_on()?;

    let inputs: Vec<Vec<f32>> = Vec::new();
    let mut outputs = vec![vec![0.0f32; 128]; 2];
    plugin.queue_midi_message_at(MidiMessage::note_on(0, 60, 100), 32);
    plugin.queue_midi_message_at(MidiMessage::note_off(0, 60, 0), 500);
    plugin.process_replacing(&[MidiMessage::control_change(0, 1, 10)], &inputs, &mut outputs, 128)?;

    // Offsets beyond the block land on its last frame; per-call messages start it.
    assert_eq!(*probe.received_deltas.lock(), vec![32, 127, 0]);
    assert_eq!(probe.received.lock()[0], vec![0x90, 60, 100]);
    Ok(())
}
