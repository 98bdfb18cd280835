//! MPEG decode via rodio's symphonia backend.

use std::io::Cursor;

use colloquy_core::ports::{AudioDecoder, AudioError, PcmBuffer};
use rodio::Source as _;

/// Decodes whole-frame MPEG audio blobs into PCM.
#[derive(Debug, Clone, Copy, Default)]
pub struct MpegDecoder;

impl MpegDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for MpegDecoder {
    fn decode(&self, data: &[u8]) -> Result<PcmBuffer, AudioError> {
        let decoder = rodio::Decoder::new(Cursor::new(data.to_vec()))
            .map_err(|e| AudioError::Decode(e.to_string()))?;

        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let samples: Vec<f32> = decoder.convert_samples().collect();

        if samples.is_empty() {
            return Err(AudioError::Decode("no samples produced".into()));
        }

        Ok(PcmBuffer {
            samples,
            sample_rate,
            channels,
        })
    }
}
