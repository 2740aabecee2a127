use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use vst2_host::events::EventBatch;
use vst2_host::{AudioBuffer, HostRegistry, MidiMessage};
use vst2_test_plugin::{FakePluginConfig, VSTPluginMain};

fn midi_burst(count: usize) -> Vec<MidiMessage> {
    (0..count)
        .map(|index| MidiMessage::note_on((index % 16) as u8, 36 + (index % 48) as u8, 100))
        .collect()
}

fn event_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("events");
    let messages = midi_burst(256);
    group.bench_function("build_release_256", |b| {
        b.iter(|| EventBatch::build(messages.iter()).release());
    });
    group.finish();
}

fn process_replacing(c: &mut Criterion) {
    let mut group = c.benchmark_group("process");
    group.measurement_time(Duration::from_secs(10));

    let registry = HostRegistry::default();
    let _probe = FakePluginConfig::default().install();
    let plugin = unsafe { registry.instantiate(VSTPluginMain) }.expect("instantiate test plugin");
    plugin.set_sample_rate(48_000.0).expect("sample rate");
    plugin.set_block_size(64).expect("block size");
    plugin.turn_on().expect("turn on");

    let inputs = AudioBuffer::from_channels(vec![vec![0.25f32; 64]; 2]);
    let mut outputs = AudioBuffer::<f32>::new(2, 64);
    group.bench_function("stereo_block64", |b| {
        b.iter(|| plugin.process_replacing(&[], &inputs, &mut outputs, 64).expect("process"));
    });

    let midi = midi_burst(16);
    group.bench_function("stereo_block64_midi16", |b| {
        b.iter(|| plugin.process_replacing(&midi, &inputs, &mut outputs, 64).expect("process"));
    });
    group.finish();
}

criterion_group!(benches, event_batches, process_replacing);
criterion_main!(benches);
