//! MPEG audio frame extraction from a chunked byte stream.
//!
//! The server streams one continuous `audio/mpeg` bitstream, chunked at
//! arbitrary byte boundaries. Chunks are not independently decodable, so
//! the player reassembles whole frames before handing anything to the
//! decoder: scan for the sync pattern, validate the header, compute the
//! frame length from the header bits, and emit the frame once all of it
//! has arrived. Partial data stays buffered until the next feed.

use bytes::Bytes;

/// Byte length of an MPEG audio frame header.
const HEADER_LEN: usize = 4;

/// Bitrates in kbit/s for MPEG1 Layer III, indexed by the header's
/// bitrate field. Index 0 ("free") and 15 are invalid here.
const BITRATES_V1_L3: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Bitrates in kbit/s for MPEG2/2.5 Layer III.
const BITRATES_V2_L3: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

/// Sample rates in Hz indexed by [version bits][sample-rate bits].
/// Version bits: 0 = MPEG2.5, 1 = reserved, 2 = MPEG2, 3 = MPEG1.
const SAMPLE_RATES: [[u32; 3]; 4] = [
    [11_025, 12_000, 8_000],
    [0, 0, 0],
    [22_050, 24_000, 16_000],
    [44_100, 48_000, 32_000],
];

/// Reassembles whole decodable frames out of arbitrarily chunked MPEG
/// audio bytes.
///
/// Memory use is bounded by the pending tail, never by the total stream.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    tail: Vec<u8>,
}

impl FrameExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete frame now available.
    ///
    /// Invalid sync positions are skipped one byte at a time until the
    /// scanner resynchronizes; a trailing partial frame is retained for
    /// the next feed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.tail.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut cursor = 0;

        while self.tail.len() - cursor >= HEADER_LEN {
            let header: [u8; 4] = self.tail[cursor..cursor + HEADER_LEN]
                .try_into()
                .expect("slice is HEADER_LEN bytes");

            match frame_length(header) {
                Some(len) => {
                    if self.tail.len() - cursor < len {
                        // Partial frame: wait for more bytes.
                        break;
                    }
                    frames.push(Bytes::copy_from_slice(&self.tail[cursor..cursor + len]));
                    cursor += len;
                }
                None => {
                    // Not a valid header here; resynchronize.
                    cursor += 1;
                }
            }
        }

        self.tail.drain(..cursor);
        frames
    }

    /// Bytes currently buffered awaiting frame completion.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tail.len()
    }

    /// Drop any buffered partial data.
    pub fn reset(&mut self) {
        self.tail.clear();
    }
}

/// Total frame length in bytes if `header` is a valid Layer III header.
fn frame_length(header: [u8; 4]) -> Option<usize> {
    // Sync pattern: 11 set bits.
    if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
        return None;
    }

    let version = (header[1] >> 3) & 0x03;
    let layer = (header[1] >> 1) & 0x03;
    // Reserved version, or anything but Layer III.
    if version == 0b01 || layer != 0b01 {
        return None;
    }

    let bitrate_index = usize::from(header[2] >> 4);
    let sample_rate_index = usize::from((header[2] >> 2) & 0x03);
    if bitrate_index == 0 || bitrate_index == 15 || sample_rate_index == 3 {
        return None;
    }

    let mpeg1 = version == 0b11;
    let bitrate = if mpeg1 {
        BITRATES_V1_L3[bitrate_index]
    } else {
        BITRATES_V2_L3[bitrate_index]
    } * 1000;
    let sample_rate = SAMPLE_RATES[usize::from(version)][sample_rate_index];
    let padding = usize::from((header[2] >> 1) & 0x01);

    // Layer III: 1152 samples per frame for MPEG1, 576 for MPEG2/2.5.
    let samples_per_frame = if mpeg1 { 1152 } else { 576 };
    let len = samples_per_frame / 8 * bitrate as usize / sample_rate as usize + padding;
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A valid MPEG1 Layer III header: 128 kbit/s, 44.1 kHz, no padding.
    /// Frame length 144 * 128000 / 44100 = 417 bytes.
    const HEADER_128K_44100: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
    const FRAME_LEN_128K_44100: usize = 417;

    fn make_frame(fill: u8) -> Vec<u8> {
        let mut frame = vec![fill; FRAME_LEN_128K_44100];
        frame[..4].copy_from_slice(&HEADER_128K_44100);
        frame
    }

    #[test]
    fn header_length_computation() {
        assert_eq!(frame_length(HEADER_128K_44100), Some(417));
        // Padding bit adds one byte.
        assert_eq!(frame_length([0xFF, 0xFB, 0x92, 0x00]), Some(418));
        // 48 kHz: 144 * 128000 / 48000 = 384.
        assert_eq!(frame_length([0xFF, 0xFB, 0x94, 0x00]), Some(384));
    }

    #[test]
    fn rejects_invalid_headers() {
        assert_eq!(frame_length([0x00, 0xFB, 0x90, 0x00]), None); // no sync
        assert_eq!(frame_length([0xFF, 0xEB, 0x90, 0x00]), None); // reserved version
        assert_eq!(frame_length([0xFF, 0xFD, 0x90, 0x00]), None); // layer II
        assert_eq!(frame_length([0xFF, 0xFB, 0x00, 0x00]), None); // free bitrate
        assert_eq!(frame_length([0xFF, 0xFB, 0xF0, 0x00]), None); // invalid bitrate
        assert_eq!(frame_length([0xFF, 0xFB, 0x9C, 0x00]), None); // invalid sample rate
    }

    #[test]
    fn extracts_back_to_back_frames() {
        let mut extractor = FrameExtractor::new();
        let mut stream = Vec::new();
        stream.extend_from_slice(&make_frame(0x11));
        stream.extend_from_slice(&make_frame(0x22));
        stream.extend_from_slice(&make_frame(0x33));

        let frames = extractor.feed(&stream);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), FRAME_LEN_128K_44100);
        assert_eq!(frames[1][5], 0x22);
        assert_eq!(extractor.pending(), 0);
    }

    #[test]
    fn partial_frame_is_held_until_completed() {
        let mut extractor = FrameExtractor::new();
        let frame = make_frame(0x44);

        let head = extractor.feed(&frame[..100]);
        assert!(head.is_empty());
        assert_eq!(extractor.pending(), 100);

        let rest = extractor.feed(&frame[100..]);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].as_ref(), frame.as_slice());
        assert_eq!(extractor.pending(), 0);
    }

    #[test]
    fn split_feeds_match_a_single_feed() {
        let mut stream = Vec::new();
        for fill in [0x10, 0x20, 0x30, 0x40] {
            stream.extend_from_slice(&make_frame(fill));
        }

        let mut whole = FrameExtractor::new();
        let expected = whole.feed(&stream);

        // Arbitrary split sizes, including ones that straddle headers.
        let mut split = FrameExtractor::new();
        let mut collected = Vec::new();
        let mut rest = stream.as_slice();
        for size in [7usize, 131, 29, 1024] {
            let take = size.min(rest.len());
            collected.extend(split.feed(&rest[..take]));
            rest = &rest[take..];
        }
        collected.extend(split.feed(rest));

        assert_eq!(collected, expected);
        assert_eq!(split.pending(), 0);
    }

    #[test]
    fn resynchronizes_after_garbage() {
        let mut extractor = FrameExtractor::new();
        let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00];
        stream.extend_from_slice(&make_frame(0x55));

        let frames = extractor.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][5], 0x55);
    }

    #[test]
    fn tail_is_nonempty_iff_feed_ends_mid_frame() {
        let mut extractor = FrameExtractor::new();
        let frame = make_frame(0x66);

        extractor.feed(&frame);
        assert_eq!(extractor.pending(), 0);

        extractor.feed(&frame[..50]);
        assert_ne!(extractor.pending(), 0);

        extractor.reset();
        assert_eq!(extractor.pending(), 0);
    }
}
