use vst2_sys::{time_info_flags as tf, VstTimeInfo};

/// Request bits the host knows how to answer. SMPTE is never reported.
pub const SUPPORTED_REQUEST: i32 = tf::NANOS_VALID
    | tf::PPQ_POS_VALID
    | tf::TEMPO_VALID
    | tf::BARS_VALID
    | tf::CYCLE_POS_VALID
    | tf::TIME_SIG_VALID
    | tf::CLOCK_VALID;

const MIDI_CLOCKS_PER_QUARTER: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: i32,
    pub denominator: i32,
}

impl TimeSignature {
    pub fn new(numerator: i32, denominator: i32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Length of one bar in quarter notes.
    pub fn quarters_per_bar(self) -> f64 {
        f64::from(self.numerator) * 4.0 / f64::from(self.denominator)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Transport as seen by plug-ins through `audioMasterGetTime`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transport {
    pub tempo: f64,
    pub time_signature: TimeSignature,
    /// Position of the next block, in samples.
    pub sample_position: f64,
    pub playing: bool,
}

impl Transport {
    pub fn new(tempo: f64) -> Self {
        Self {
            tempo,
            time_signature: TimeSignature::default(),
            sample_position: 0.0,
            playing: false,
        }
    }

    pub fn advance(&mut self, frames: usize) {
        self.sample_position += frames as f64;
    }

    /// Musical position in quarter notes.
    pub fn ppq_position(&self, sample_rate: f64) -> f64 {
        if sample_rate <= 0.0 {
            return 0.0;
        }
        self.sample_position / sample_rate * self.tempo / 60.0
    }
}

/// Everything needed to answer one time query.
#[derive(Debug, Clone, Copy)]
pub struct TimeQuery {
    pub transport: Transport,
    pub sample_rate: f64,
    /// Set when the playing state changed since the last query.
    pub transport_changed: bool,
    /// Wall clock, reported when `kVstNanosValid` is requested.
    pub system_nanos: f64,
}

/// Rewrites `info` for a request mask.
///
/// Fields belonging to bits outside `request` are zeroed and their valid
/// bits stay clear. Sample position, sample rate and transport bits are
/// always present.
pub fn fill_time_info(info: &mut VstTimeInfo, query: &TimeQuery, request: i32) {
    let transport = &query.transport;
    let sample_rate = query.sample_rate;
    let wants = |bit: i32| request & bit != 0;

    *info = VstTimeInfo {
        sample_pos: transport.sample_position,
        sample_rate,
        ..VstTimeInfo::default()
    };

    let mut flags = 0;
    if transport.playing {
        flags |= tf::TRANSPORT_PLAYING;
    }
    if query.transport_changed {
        flags |= tf::TRANSPORT_CHANGED;
    }

    let ppq = transport.ppq_position(sample_rate);

    if wants(tf::NANOS_VALID) {
        info.nano_seconds = query.system_nanos;
        flags |= tf::NANOS_VALID;
    }
    if wants(tf::PPQ_POS_VALID) {
        info.ppq_pos = ppq;
        flags |= tf::PPQ_POS_VALID;
    }
    if wants(tf::TEMPO_VALID) {
        info.tempo = transport.tempo;
        flags |= tf::TEMPO_VALID;
    }
    if wants(tf::BARS_VALID) {
        let bar = transport.time_signature.quarters_per_bar();
        info.bar_start_pos = if bar > 0.0 { (ppq / bar).floor() * bar } else { 0.0 };
        flags |= tf::BARS_VALID;
    }
    if wants(tf::CYCLE_POS_VALID) {
        info.cycle_start_pos = 0.0;
        info.cycle_end_pos = 0.0;
        flags |= tf::CYCLE_POS_VALID;
    }
    if wants(tf::TIME_SIG_VALID) {
        info.time_sig_numerator = transport.time_signature.numerator;
        info.time_sig_denominator = transport.time_signature.denominator;
        flags |= tf::TIME_SIG_VALID;
    }
    if wants(tf::CLOCK_VALID) {
        info.samples_to_next_clock = samples_to_next_clock(ppq, transport.tempo, sample_rate);
        flags |= tf::CLOCK_VALID;
    }

    info.flags = flags;
}

/// Samples until the next 24 ppq clock, never negative. Zero when the
/// position sits on a clock.
fn samples_to_next_clock(ppq: f64, tempo: f64, sample_rate: f64) -> i32 {
    if tempo <= 0.0 || sample_rate <= 0.0 {
        return 0;
    }
    let samples_per_clock = sample_rate * 60.0 / (tempo * MIDI_CLOCKS_PER_QUARTER);
    let clocks = ppq * MIDI_CLOCKS_PER_QUARTER;
    if (clocks - clocks.round()).abs() < 1e-9 {
        return 0;
    }
    ((clocks.ceil() - clocks) * samples_per_clock).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_BITS: [i32; 8] = [
        tf::NANOS_VALID,
        tf::PPQ_POS_VALID,
        tf::TEMPO_VALID,
        tf::BARS_VALID,
        tf::CYCLE_POS_VALID,
        tf::TIME_SIG_VALID,
        tf::SMPTE_VALID,
        tf::CLOCK_VALID,
    ];

    fn query() -> TimeQuery {
        let mut transport = Transport::new(120.0);
        transport.sample_position = 200_300.0;
        transport.playing = true;
        TimeQuery {
            transport,
            sample_rate: 48_000.0,
            transport_changed: false,
            system_nanos: 1.0e9,
        }
    }

    fn populated(info: &VstTimeInfo, bit: i32) -> bool {
        match bit {
            tf::NANOS_VALID => info.nano_seconds != 0.0,
            tf::PPQ_POS_VALID => info.ppq_pos != 0.0,
            tf::TEMPO_VALID => info.tempo != 0.0,
            tf::BARS_VALID => info.bar_start_pos != 0.0,
            tf::TIME_SIG_VALID => info.time_sig_numerator != 0 && info.time_sig_denominator != 0,
            tf::CLOCK_VALID => info.samples_to_next_clock != 0,
            tf::CYCLE_POS_VALID | tf::SMPTE_VALID => false,
            _ => unreachable!(),
        }
    }

    #[test]
    fn only_requested_fields_are_marked_valid() {
        let query = query();
        for mask in 0..(1 << ALL_BITS.len()) {
            let request = ALL_BITS
                .iter()
                .enumerate()
                .filter(|(index, _)| mask & (1 << index) != 0)
                .fold(0, |acc, (_, bit)| acc | bit);

            let mut info = VstTimeInfo {
                tempo: 999.0,
                ppq_pos: 999.0,
                flags: -1,
                ..VstTimeInfo::default()
            };
            fill_time_info(&mut info, &query, request);

            for bit in ALL_BITS {
                let requested = request & bit != 0;
                let supported = SUPPORTED_REQUEST & bit != 0;
                assert_eq!(info.flags & bit != 0, requested && supported, "bit {bit:#x} mask {request:#x}");
                if !requested {
                    assert!(!populated(&info, bit), "bit {bit:#x} populated without request");
                }
            }
            assert_eq!(info.sample_pos, 200_300.0);
            assert_eq!(info.sample_rate, 48_000.0);
            assert_ne!(info.flags & tf::TRANSPORT_PLAYING, 0);
        }
    }

    #[test]
    fn musical_position_follows_tempo_and_signature() {
        let query = query();
        let mut info = VstTimeInfo::default();
        fill_time_info(&mut info, &query, SUPPORTED_REQUEST);

        let expected_ppq = 200_300.0 / 48_000.0 * 2.0;
        assert!((info.ppq_pos - expected_ppq).abs() < 1e-9);
        assert_eq!(info.bar_start_pos, 8.0);
        assert_eq!(info.tempo, 120.0);
        assert_eq!((info.time_sig_numerator, info.time_sig_denominator), (4, 4));
        assert_eq!(info.samples_to_next_clock, 700);
    }

    #[test]
    fn clock_offset_points_forward() {
        // 1000 samples per clock at 48 kHz and 120 bpm.
        for (position, expected) in [(0.0, 0), (200_000.0, 0), (200_100.0, 900), (200_900.0, 100), (200_999.0, 1)] {
            let ppq = position / 48_000.0 * 2.0;
            let offset = samples_to_next_clock(ppq, 120.0, 48_000.0);
            assert_eq!(offset, expected, "position {position}");
        }
    }

    #[test]
    fn zero_sample_rate_reports_start_of_song() {
        let mut query = query();
        query.sample_rate = 0.0;
        let mut info = VstTimeInfo::default();
        fill_time_info(&mut info, &query, SUPPORTED_REQUEST);
        assert_eq!(info.ppq_pos, 0.0);
        assert_eq!(info.bar_start_pos, 0.0);
        assert_eq!(info.samples_to_next_clock, 0);
    }

    #[test]
    fn three_four_bars_are_three_quarters_long() {
        let signature = TimeSignature::new(3, 4);
        assert_eq!(signature.quarters_per_bar(), 3.0);
        assert_eq!(TimeSignature::new(6, 8).quarters_per_bar(), 3.0);
    }
}
