//! Multichannel f32 audio buffer with planar layout.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// A multichannel f32 audio buffer in planar layout.
///
/// Data is stored as `channels` contiguous planes of `frames` samples each.
/// `data[ch * frames + frame]` gives the sample for channel `ch` at `frame`.
#[derive(Clone, Debug, Default)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: usize,
    frames: usize,
}

impl AudioBuffer {
    /// Create a new silent buffer with the given dimensions.
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            data: alloc::vec![0.0; channels * frames],
            channels,
            frames,
        }
    }

    /// Like `new`, but reports allocation failure instead of aborting.
    pub fn try_new(channels: usize, frames: usize) -> Result<Self> {
        let len = channels
            .checked_mul(frames)
            .ok_or_else(|| Error::memory("audio buffer size overflow"))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0.0);
        Ok(Self {
            data,
            channels,
            frames,
        })
    }

    /// Fill all samples with zero.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Zero the first `len` frames of every channel.
    pub fn silence_range(&mut self, len: usize) {
        for ch in 0..self.channels {
            let n = len.min(self.frames);
            self.channel_mut(ch)[..n].fill(0.0);
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Read-only access to one channel's sample data.
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.frames;
        &self.data[start..start + self.frames]
    }

    /// Mutable access to one channel's sample data.
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.frames;
        let len = self.frames;
        &mut self.data[start..start + len]
    }

    /// Two distinct channels, one read-only and one mutable.
    pub fn split_pair(&mut self, read: usize, write: usize) -> (&[f32], &mut [f32]) {
        let frames = self.frames;
        if read < write {
            let (a, b) = self.data.split_at_mut(write * frames);
            (&a[read * frames..(read + 1) * frames], &mut b[..frames])
        } else {
            let (a, b) = self.data.split_at_mut(read * frames);
            (&b[..frames], &mut a[write * frames..(write + 1) * frames])
        }
    }

    /// Sum the first `len` frames of overlapping channels from `source`.
    pub fn mix_from(&mut self, source: &AudioBuffer, len: usize) {
        let chs = self.channels.min(source.channels);
        let frs = len.min(self.frames).min(source.frames);
        for ch in 0..chs {
            let dst = self.channel_mut(ch);
            let src = source.channel(ch);
            for i in 0..frs {
                dst[i] += src[i];
            }
        }
    }

    /// Scale all samples by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for s in &mut self.data {
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_silent() {
        let buf = AudioBuffer::new(2, 4);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 4);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
        assert!(buf.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn channel_mut_writes_correctly() {
        let mut buf = AudioBuffer::new(2, 2);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[1] = -0.5;
        assert_eq!(buf.channel(0), &[1.0, 0.0]);
        assert_eq!(buf.channel(1), &[0.0, -0.5]);
    }

    #[test]
    fn silence_range_clears_prefix_only() {
        let mut buf = AudioBuffer::new(1, 3);
        buf.channel_mut(0).fill(1.0);
        buf.silence_range(2);
        assert_eq!(buf.channel(0), &[0.0, 0.0, 1.0]);
        buf.silence();
        assert_eq!(buf.channel(0), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn mix_from_sums_prefix() {
        let mut dst = AudioBuffer::new(2, 3);
        dst.channel_mut(0)[0] = 0.5;
        let mut src = AudioBuffer::new(2, 3);
        src.channel_mut(0).fill(0.25);
        src.channel_mut(1).fill(1.0);
        dst.mix_from(&src, 2);
        assert_eq!(dst.channel(0), &[0.75, 0.25, 0.0]);
        assert_eq!(dst.channel(1), &[1.0, 1.0, 0.0]);
    }

    #[test]
    fn split_pair_borrows_both_directions() {
        let mut buf = AudioBuffer::new(3, 2);
        buf.channel_mut(2).fill(3.0);
        {
            let (src, dst) = buf.split_pair(2, 0);
            dst.copy_from_slice(src);
        }
        assert_eq!(buf.channel(0), &[3.0, 3.0]);
        let (src, dst) = buf.split_pair(0, 1);
        dst[0] = src[0] * 2.0;
        assert_eq!(buf.channel(1)[0], 6.0);
    }

    #[test]
    fn try_new_matches_new() {
        let buf = AudioBuffer::try_new(2, 16).unwrap();
        assert_eq!(buf.frames(), 16);
        assert_eq!(buf.channel(1).len(), 16);
        buf.channel(0).iter().for_each(|&s| assert_eq!(s, 0.0));
    }

    #[test]
    fn apply_gain_scales_all() {
        let mut buf = AudioBuffer::new(2, 1);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[0] = -0.5;
        buf.apply_gain(2.0);
        assert_eq!(buf.channel(0)[0], 2.0);
        assert_eq!(buf.channel(1)[0], -1.0);
    }
}
