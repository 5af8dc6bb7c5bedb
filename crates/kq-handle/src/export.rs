//! Offline rendering of whole tracks.

use std::io::Write;

use kq_ir::{Error, Result};
use kq_store::{wav, WavFormat};

use crate::Handle;

/// Write stereo planes as a WAV file.
pub fn write_wav(
    w: &mut impl Write,
    left: &[f32],
    right: &[f32],
    sample_rate: u32,
    format: WavFormat,
) -> std::io::Result<()> {
    w.write_all(&wav::encode(&[left, right], sample_rate, format))
}

impl Handle {
    /// Render `track` from its start, stopping at its end or after
    /// `max_frames` frames.
    pub fn render_track(&mut self, track: usize, max_frames: usize) -> Result<[Vec<f32>; 2]> {
        self.set_position(track, 0)?;
        let mut out = [Vec::new(), Vec::new()];
        for plane in &mut out {
            plane
                .try_reserve(max_frames.min(self.audio_rate() as usize * 600))
                .map_err(|e| Error::memory(e.to_string()))?;
        }
        while out[0].len() < max_frames {
            let want = (max_frames - out[0].len()).min(self.buffer_size());
            let n = self.play(want)?;
            if n == 0 {
                break;
            }
            for (ch, plane) in out.iter_mut().enumerate() {
                plane.extend_from_slice(self.get_buffer(ch));
            }
        }
        Ok(out)
    }

    /// Render `track` into a WAV file of at most `max_seconds`.
    pub fn render_to_wav(&mut self, track: usize, max_seconds: f64, format: WavFormat) -> Result<Vec<u8>> {
        let max_frames = (max_seconds.max(0.0) * self.audio_rate() as f64) as usize;
        let [left, right] = self.render_track(track, max_frames)?;
        Ok(wav::encode(&[&left, &right], self.audio_rate(), format))
    }
}
