//! Overlapping analysis frames over a borrowed waveform.
//!
//! Frames are views: a frame that lies entirely inside the signal exposes
//! the underlying slice, and frames that reach into the centring pad resolve
//! padded samples by index arithmetic instead of copying the signal.

use serde::{Deserialize, Serialize};

use crate::{Result, VisionWavError};

/// How the signal is extended when frames are centred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadMode {
    /// Mirror around the edge sample without repeating it.
    #[default]
    Reflect,
    Zero,
}

/// Frame layout for a given frame length and hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSegmenter {
    frame_length: usize,
    hop_length: usize,
    center: bool,
    pad_mode: PadMode,
}

impl FrameSegmenter {
    /// Creates a layout; both lengths must be positive.
    pub fn new(
        frame_length: usize,
        hop_length: usize,
        center: bool,
        pad_mode: PadMode,
    ) -> Result<Self> {
        if frame_length == 0 {
            return Err(VisionWavError::invalid("frame_length must be positive"));
        }
        if hop_length == 0 {
            return Err(VisionWavError::invalid("hop_length must be positive"));
        }
        Ok(Self {
            frame_length,
            hop_length,
            center,
            pad_mode,
        })
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn center(&self) -> bool {
        self.center
    }

    /// Samples of padding added on each side when centring.
    pub fn pad(&self) -> usize {
        if self.center {
            self.frame_length / 2
        } else {
            0
        }
    }

    /// Frame count for a signal of `len` samples.
    ///
    /// Centred: `1 + (len + 2 * pad - frame_length) / hop`, which is
    /// `1 + len / hop` for even frame lengths; an empty signal has no frames.
    /// Uncentred: `1 + (len - frame_length) / hop`, zero when the signal is
    /// shorter than one frame.
    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let padded = len + 2 * self.pad();
        if padded < self.frame_length {
            0
        } else {
            1 + (padded - self.frame_length) / self.hop_length
        }
    }

    /// Slices `waveform` into frames. Uncentred segmentation requires at
    /// least one full frame of signal.
    pub fn segment<'a>(&self, waveform: &'a [f32]) -> Result<Frames<'a>> {
        if !self.center && self.frame_length > waveform.len() {
            return Err(VisionWavError::invalid(format!(
                "frame_length {} exceeds waveform length {}",
                self.frame_length,
                waveform.len()
            )));
        }
        Ok(Frames {
            source: waveform,
            layout: *self,
            next: 0,
            count: self.frame_count(waveform.len()),
        })
    }
}

/// Segments with reflection padding when `center` is set.
pub fn segment(
    waveform: &[f32],
    frame_length: usize,
    hop_length: usize,
    center: bool,
) -> Result<Frames<'_>> {
    FrameSegmenter::new(frame_length, hop_length, center, PadMode::Reflect)?.segment(waveform)
}

/// Finite, restartable (via `Clone`) sequence of frames.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    source: &'a [f32],
    layout: FrameSegmenter,
    next: usize,
    count: usize,
}

impl<'a> Frames<'a> {
    /// Total number of frames, independent of iteration progress.
    pub fn count_total(&self) -> usize {
        self.count
    }

    /// Random access to frame `index`.
    pub fn get(&self, index: usize) -> Option<Frame<'a>> {
        if index >= self.count {
            return None;
        }
        let offset = (index * self.layout.hop_length) as isize - self.layout.pad() as isize;
        Some(Frame {
            offset,
            len: self.layout.frame_length,
            source: self.source,
            pad_mode: self.layout.pad_mode,
        })
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.get(self.next)?;
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_> {}

/// A read-only window of `len` samples starting at `offset`, which may be
/// negative or run past the end when frames are centred.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    offset: isize,
    len: usize,
    source: &'a [f32],
    pad_mode: PadMode,
}

impl<'a> Frame<'a> {
    /// Start position relative to the unpadded signal.
    pub fn offset(&self) -> isize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The underlying slice when the frame needs no padding.
    pub fn as_slice(&self) -> Option<&'a [f32]> {
        let start = usize::try_from(self.offset).ok()?;
        self.source.get(start..start + self.len)
    }

    /// Sample `i` of the frame, resolving the pad.
    pub fn sample(&self, i: usize) -> f32 {
        let position = self.offset + i as isize;
        let n = self.source.len();
        if position >= 0 && (position as usize) < n {
            return self.source[position as usize];
        }
        match self.pad_mode {
            PadMode::Zero => 0.0,
            PadMode::Reflect => reflect_index(position, n).map_or(0.0, |idx| self.source[idx]),
        }
    }

    /// Writes `frame[i] * window[i]` into `out` for every sample.
    pub fn write_windowed(&self, window: &[f32], out: &mut [f32]) {
        match self.as_slice() {
            Some(samples) => {
                for ((out, &sample), &w) in out.iter_mut().zip(samples).zip(window) {
                    *out = sample * w;
                }
            }
            None => {
                for (i, (out, &w)) in out.iter_mut().zip(window).enumerate() {
                    *out = self.sample(i) * w;
                }
            }
        }
    }
}

/// Maps an out-of-range position onto the signal by repeated reflection.
fn reflect_index(position: isize, n: usize) -> Option<usize> {
    match n {
        0 => None,
        1 => Some(0),
        _ => {
            let period = 2 * (n as isize - 1);
            let folded = position.rem_euclid(period);
            Some(if folded < n as isize {
                folded as usize
            } else {
                (period - folded) as usize
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn uncentred_frame_count() {
        let segmenter = FrameSegmenter::new(4, 2, false, PadMode::Reflect).unwrap();
        assert_eq!(segmenter.frame_count(10), 4);
        assert_eq!(segmenter.frame_count(11), 4);
        assert_eq!(segmenter.frame_count(12), 5);
        assert_eq!(segmenter.frame_count(3), 0);

        let signal = ramp(10);
        let frames: Vec<_> = segmenter.segment(&signal).unwrap().collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].as_slice(), Some(&signal[6..10]));
    }

    #[test]
    fn centred_frame_count_uses_floor_of_len_over_hop() {
        let segmenter = FrameSegmenter::new(2048, 512, true, PadMode::Reflect).unwrap();
        assert_eq!(segmenter.frame_count(22050), 1 + 22050 / 512);
        assert_eq!(segmenter.frame_count(5120), 11);
        assert_eq!(segmenter.frame_count(5000), 10);
        assert_eq!(segmenter.frame_count(0), 0);
    }

    #[test]
    fn reflect_padding_mirrors_without_repeating_edges() {
        let signal = ramp(5);
        let frames = segment(&signal, 4, 2, true).unwrap();
        let first = frames.clone().next().unwrap();
        assert_eq!(first.offset(), -2);
        assert!(first.as_slice().is_none());
        let values: Vec<f32> = (0..4).map(|i| first.sample(i)).collect();
        assert_eq!(values, vec![2.0, 1.0, 0.0, 1.0]);

        let last = frames.get(frames.count_total() - 1).unwrap();
        let values: Vec<f32> = (0..4).map(|i| last.sample(i)).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 3.0]);
    }

    #[test]
    fn zero_padding_fills_with_silence() {
        let signal = vec![1.0; 3];
        let segmenter = FrameSegmenter::new(4, 1, true, PadMode::Zero).unwrap();
        let first = segmenter.segment(&signal).unwrap().next().unwrap();
        let values: Vec<f32> = (0..4).map(|i| first.sample(i)).collect();
        assert_eq!(values, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn reflection_repeats_for_short_signals() {
        assert_eq!(reflect_index(-5, 3), Some(1));
        assert_eq!(reflect_index(7, 3), Some(1));
        assert_eq!(reflect_index(-3, 1), Some(0));
        assert_eq!(reflect_index(-1, 0), None);
    }

    #[test]
    fn frames_are_restartable() {
        let signal = ramp(16);
        let frames = segment(&signal, 4, 4, false).unwrap();
        let first_pass: Vec<isize> = frames.clone().map(|f| f.offset()).collect();
        let second_pass: Vec<isize> = frames.map(|f| f.offset()).collect();
        assert_eq!(first_pass, vec![0, 4, 8, 12]);
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(FrameSegmenter::new(0, 1, true, PadMode::Zero).is_err());
        assert!(FrameSegmenter::new(4, 0, true, PadMode::Zero).is_err());
        assert!(matches!(
            segment(&[0.0; 3], 4, 1, false),
            Err(VisionWavError::InvalidConfig(_))
        ));
        assert_eq!(segment(&[], 4, 1, true).unwrap().len(), 0);
    }
}
