//! Audio buffer bridge.
//!
//! Turns caller-owned channel storage into the `T**` arrays a plug-in's
//! process functions take. The pointer arrays are persistent members of the
//! instance state and are only resized when the plug-in's I/O layout
//! changes; binding a block never allocates.

use std::ptr;

use crate::audio_buffer::AudioBuffer;
use crate::error::{BufferError, Direction};

/// Read access to a set of input channels.
pub trait InputChannels<T> {
    fn channel_count(&self) -> usize;
    fn channel(&self, index: usize) -> &[T];
}

/// Write access to a set of output channels.
pub trait OutputChannels<T> {
    fn channel_count(&self) -> usize;
    fn channel_mut(&mut self, index: usize) -> &mut [T];
}

impl<T, S: AsRef<[T]>> InputChannels<T> for [S] {
    fn channel_count(&self) -> usize {
        self.len()
    }

    fn channel(&self, index: usize) -> &[T] {
        self[index].as_ref()
    }
}

impl<T, S: AsRef<[T]>, const N: usize> InputChannels<T> for [S; N] {
    fn channel_count(&self) -> usize {
        N
    }

    fn channel(&self, index: usize) -> &[T] {
        self[index].as_ref()
    }
}

impl<T, S: AsRef<[T]>> InputChannels<T> for Vec<S> {
    fn channel_count(&self) -> usize {
        self.len()
    }

    fn channel(&self, index: usize) -> &[T] {
        self[index].as_ref()
    }
}

impl<T> InputChannels<T> for AudioBuffer<T> {
    fn channel_count(&self) -> usize {
        self.channels()
    }

    fn channel(&self, index: usize) -> &[T] {
        AudioBuffer::channel(self, index)
    }
}

impl<T, S: AsMut<[T]>> OutputChannels<T> for [S] {
    fn channel_count(&self) -> usize {
        self.len()
    }

    fn channel_mut(&mut self, index: usize) -> &mut [T] {
        self[index].as_mut()
    }
}

impl<T, S: AsMut<[T]>, const N: usize> OutputChannels<T> for [S; N] {
    fn channel_count(&self) -> usize {
        N
    }

    fn channel_mut(&mut self, index: usize) -> &mut [T] {
        self[index].as_mut()
    }
}

impl<T, S: AsMut<[T]>> OutputChannels<T> for Vec<S> {
    fn channel_count(&self) -> usize {
        self.len()
    }

    fn channel_mut(&mut self, index: usize) -> &mut [T] {
        self[index].as_mut()
    }
}

impl<T> OutputChannels<T> for AudioBuffer<T> {
    fn channel_count(&self) -> usize {
        self.channels()
    }

    fn channel_mut(&mut self, index: usize) -> &mut [T] {
        AudioBuffer::channel_mut(self, index)
    }
}

/// Pointer array for one direction and precision.
///
/// The stored pointers are only meaningful between a `bind_*` call and the
/// matching [`ChannelArray::release`].
#[derive(Debug)]
pub struct ChannelArray<T> {
    ptrs: Vec<*mut T>,
}

// The raw pointers are scratch space, only dereferenced by the plug-in while
// the instance lock is held.
unsafe impl<T: Send> Send for ChannelArray<T> {}

impl<T> ChannelArray<T> {
    pub fn with_channels(channels: usize) -> Self {
        Self {
            ptrs: vec![ptr::null_mut(); channels],
        }
    }

    pub fn len(&self) -> usize {
        self.ptrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptrs.is_empty()
    }

    pub fn bind_inputs<I>(&mut self, inputs: &I, frames: usize) -> Result<*mut *mut T, BufferError>
    where
        I: InputChannels<T> + ?Sized,
    {
        self.check_count(Direction::Input, inputs.channel_count())?;
        for index in 0..self.ptrs.len() {
            let channel = inputs.channel(index);
            if channel.len() < frames {
                self.release();
                return Err(BufferError::InvalidChannelPointer {
                    direction: Direction::Input,
                    channel: index,
                    len: channel.len(),
                    frames,
                });
            }
            // Plug-ins receive inputs as `float**` but must not write to them.
            self.ptrs[index] = channel.as_ptr() as *mut T;
        }
        Ok(self.ptrs.as_mut_ptr())
    }

    pub fn bind_outputs<O>(&mut self, outputs: &mut O, frames: usize) -> Result<*mut *mut T, BufferError>
    where
        O: OutputChannels<T> + ?Sized,
    {
        self.check_count(Direction::Output, outputs.channel_count())?;
        for index in 0..self.ptrs.len() {
            let channel = outputs.channel_mut(index);
            if channel.len() < frames {
                self.release();
                return Err(BufferError::InvalidChannelPointer {
                    direction: Direction::Output,
                    channel: index,
                    len: channel.len(),
                    frames,
                });
            }
            self.ptrs[index] = channel.as_mut_ptr();
        }
        Ok(self.ptrs.as_mut_ptr())
    }

    /// Forgets the bound channel pointers. The array itself stays allocated.
    pub fn release(&mut self) {
        self.ptrs.fill(ptr::null_mut());
    }

    pub fn bound(&self) -> &[*mut T] {
        &self.ptrs
    }

    fn check_count(&self, direction: Direction, actual: usize) -> Result<(), BufferError> {
        if actual == self.ptrs.len() {
            Ok(())
        } else {
            Err(BufferError::ConfigurationMismatch {
                direction,
                expected: self.ptrs.len(),
                actual,
            })
        }
    }
}

/// Input/output pointer arrays for one precision.
#[derive(Debug)]
pub struct ChannelPair<T> {
    pub inputs: ChannelArray<T>,
    pub outputs: ChannelArray<T>,
}

impl<T> ChannelPair<T> {
    fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs: ChannelArray::with_channels(inputs),
            outputs: ChannelArray::with_channels(outputs),
        }
    }

    pub fn release(&mut self) {
        self.inputs.release();
        self.outputs.release();
    }
}

/// All pointer arrays owned by one plug-in instance.
#[derive(Debug)]
pub struct ChannelPointers {
    single: ChannelPair<f32>,
    double: Option<ChannelPair<f64>>,
}

impl ChannelPointers {
    /// Allocates arrays for the given layout. Double precision arrays only
    /// exist when the plug-in can process them.
    pub fn allocate(inputs: usize, outputs: usize, double_precision: bool) -> Self {
        Self {
            single: ChannelPair::new(inputs, outputs),
            double: double_precision.then(|| ChannelPair::new(inputs, outputs)),
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.single.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.single.outputs.len()
    }

    pub fn has_double_precision(&self) -> bool {
        self.double.is_some()
    }

    pub fn pair_mut<T: Sample>(&mut self) -> Option<&mut ChannelPair<T>> {
        T::pair_mut(self)
    }
}

/// Sample formats the bridge can hand to a plug-in.
pub trait Sample: Copy + Default + Send + 'static {
    fn pair_mut(pointers: &mut ChannelPointers) -> Option<&mut ChannelPair<Self>>;
}

impl Sample for f32 {
    fn pair_mut(pointers: &mut ChannelPointers) -> Option<&mut ChannelPair<f32>> {
        Some(&mut pointers.single)
    }
}

impl Sample for f64 {
    fn pair_mut(pointers: &mut ChannelPointers) -> Option<&mut ChannelPair<f64>> {
        pointers.double.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_points_at_caller_storage() {
        let inputs = vec![vec![0.25f32; 64], vec![0.5; 64]];
        let mut outputs = AudioBuffer::<f32>::new(2, 64);
        let mut pointers = ChannelPointers::allocate(2, 2, false);
        let pair = pointers.pair_mut::<f32>().expect("single precision");

        let ins = pair.inputs.bind_inputs(&inputs, 64).expect("inputs bind");
        let outs = pair.outputs.bind_outputs(&mut outputs, 64).expect("outputs bind");
        unsafe {
            assert_eq!(*ins.add(0) as *const f32, inputs[0].as_ptr());
            assert_eq!(*ins.add(1) as *const f32, inputs[1].as_ptr());
            assert_eq!(*outs.add(1) as *const f32, outputs.channel(1).as_ptr());
        }
        pair.release();
        assert!(pair.inputs.bound().iter().all(|ptr| ptr.is_null()));
    }

    #[test]
    fn channel_count_must_match_exactly() {
        let mut pointers = ChannelPointers::allocate(2, 2, false);
        let pair = pointers.pair_mut::<f32>().expect("single precision");
        let mono = [vec![0.0f32; 16]];
        let err = pair.inputs.bind_inputs(&mono, 16).unwrap_err();
        assert_eq!(
            err,
            BufferError::ConfigurationMismatch {
                direction: Direction::Input,
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn short_channel_is_rejected_and_nothing_stays_bound() {
        let mut pointers = ChannelPointers::allocate(0, 2, false);
        let pair = pointers.pair_mut::<f32>().expect("single precision");
        let mut left = vec![0.0f32; 32];
        let mut right = vec![0.0f32; 16];
        let mut outputs: [&mut [f32]; 2] = [&mut left, &mut right];
        let err = pair.outputs.bind_outputs(&mut outputs, 32).unwrap_err();
        assert!(matches!(
            err,
            BufferError::InvalidChannelPointer {
                direction: Direction::Output,
                channel: 1,
                len: 16,
                frames: 32,
            }
        ));
        assert!(pair.outputs.bound().iter().all(|ptr| ptr.is_null()));
    }

    #[test]
    fn double_precision_arrays_follow_capability() {
        let mut plain = ChannelPointers::allocate(1, 1, false);
        assert!(plain.pair_mut::<f64>().is_none());
        let mut capable = ChannelPointers::allocate(1, 1, true);
        assert_eq!(capable.pair_mut::<f64>().map(|pair| pair.outputs.len()), Some(1));
    }
}
