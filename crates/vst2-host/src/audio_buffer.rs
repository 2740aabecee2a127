use std::ops::{Index, IndexMut};

/// Channel-major sample storage handed to plug-in process calls.
///
/// Each channel is its own contiguous allocation, which is exactly the
/// `float**` layout VST plug-ins expect. The bridge borrows the channels
/// in place, so nothing is copied on the way in or out.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer<T> {
    channels: Vec<Vec<T>>,
    frames: usize,
}

impl<T: Copy + Default> AudioBuffer<T> {
    /// Creates a buffer with the provided number of channels and frames,
    /// initialised to silence.
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels: (0..channels).map(|_| vec![T::default(); frames]).collect(),
            frames,
        }
    }

    /// Wraps existing channel data. The shortest channel defines the frame count.
    pub fn from_channels(channels: Vec<Vec<T>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        Self { channels, frames }
    }

    /// Clears the contents of the buffer back to silence.
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(T::default());
        }
    }

    /// Resizes the buffer while preserving existing contents where
    /// possible. New samples are initialised to silence.
    pub fn resize(&mut self, channels: usize, frames: usize) {
        if self.channels.len() != channels {
            self.channels.resize_with(channels, Vec::new);
        }
        for channel in &mut self.channels {
            channel.resize(frames, T::default());
        }
        self.frames = frames;
    }
}

impl<T> AudioBuffer<T> {
    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[T] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [T] {
        &mut self.channels[index]
    }

    pub fn channel_slices(&self) -> impl Iterator<Item = &[T]> {
        self.channels.iter().map(Vec::as_slice)
    }

    pub fn channel_slices_mut(&mut self) -> impl Iterator<Item = &mut [T]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }

    pub fn into_channels(self) -> Vec<Vec<T>> {
        self.channels
    }
}

impl<T> Index<usize> for AudioBuffer<T> {
    type Output = [T];

    fn index(&self, index: usize) -> &Self::Output {
        self.channels[index].as_slice()
    }
}

impl<T> IndexMut<usize> for AudioBuffer<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.channels[index].as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_keeps_existing_samples() {
        let mut buffer = AudioBuffer::<f32>::new(1, 2);
        buffer[0][1] = 0.5;
        buffer.resize(2, 4);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 4);
        assert_eq!(buffer.channel(0), &[0.0, 0.5, 0.0, 0.0]);
        assert_eq!(buffer.channel(1), &[0.0; 4]);
    }

    #[test]
    fn from_channels_uses_shortest_channel() {
        let buffer = AudioBuffer::from_channels(vec![vec![1.0f64; 8], vec![2.0; 6]]);
        assert_eq!(buffer.frames(), 6);
        assert_eq!(buffer.channels(), 2);
    }
}
