//! Perceptual hashing for scene-cut drift detection.
//!
//! Hashes are computed over a 16x16 grid (256 bits), matching the hash size
//! used for the threshold constants below. Distance is plain Hamming
//! distance between two hashes' bit patterns.

use image::{ImageBuffer, Rgb};
use image_hasher::{HashAlg, Hasher, HasherConfig};

pub const PHASH_THRESHOLD: u32 = 51;
pub const PHASH_HASH_SIZE: u32 = 16;

/// Hex-encoded perceptual hash, stored as `video_active_state.anchor_phash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phash(Vec<u8>);

impl Phash {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() % 2 != 0 {
            return None;
        }
        let bytes: Option<Vec<u8>> = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect();
        bytes.map(Phash)
    }

    pub fn hamming_distance(&self, other: &Phash) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

fn hasher() -> Hasher {
    HasherConfig::new()
        .hash_size(PHASH_HASH_SIZE, PHASH_HASH_SIZE)
        .hash_alg(HashAlg::Gradient)
        .to_hasher()
}

/// Hash a raw RGB24 frame buffer (as produced by the video scanner).
pub fn hash_rgb24_frame(bytes: &[u8], width: u32, height: u32) -> Phash {
    let buf: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(width, height, bytes).expect("frame buffer sized for width*height*3");
    let hash = hasher().hash_image(&buf);
    Phash(hash.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let hash = Phash(vec![0xde, 0xad, 0xbe, 0xef]);
        let hex = hash.to_hex();
        assert_eq!(hex, "deadbeef");
        assert_eq!(Phash::from_hex(&hex), Some(hash));
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        let a = Phash(vec![0b0000_0000]);
        let b = Phash(vec![0b0000_0111]);
        assert_eq!(a.hamming_distance(&b), 3);
    }

    #[test]
    fn identical_hashes_have_zero_distance() {
        let a = Phash(vec![1, 2, 3]);
        assert_eq!(a.hamming_distance(&a.clone()), 0);
    }
}
