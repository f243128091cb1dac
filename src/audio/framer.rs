//! Fixed-size framing of a raw mono sample stream (§4.3 step 2).

/// Number of single-channel input samples per frame handed to the
/// resampler.
pub const FRAME_SIZE: usize = 4096;

/// Accumulates pushed samples and yields complete [`FRAME_SIZE`] frames.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<f32>,
}

impl Framer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_SIZE * 2),
        }
    }

    /// Pushes newly captured mono samples, draining zero or more complete
    /// frames in arrival order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buf.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buf.len() >= FRAME_SIZE {
            frames.push(self.buf.drain(..FRAME_SIZE).collect());
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_partial_pushes() {
        let mut f = Framer::new();
        assert!(f.push(&vec![0.0; 2000]).is_empty());
        let frames = f.push(&vec![0.0; 2096]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_SIZE);
    }

    #[test]
    fn yields_multiple_frames_from_one_push() {
        let mut f = Framer::new();
        let frames = f.push(&vec![0.0; FRAME_SIZE * 3]);
        assert_eq!(frames.len(), 3);
    }
}
