// BRIEF binary descriptors. Each bit compares two pixels at randomised
// integer offsets around the keypoint, sampled a configurable number of
// pyramid levels above the keypoint's own for blur robustness. Descriptors
// are byte-packed MSB first and compared with a byte-popcount table.

use std::io::{self, Read, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pyramid::Pyramid;

const TAG: &str = "brief";

// Minimum squared distance between the two points of a test pair.
const TEST_PAIR_MIN_DISTANCE2: i32 = 3 * 3;

/// Seed reproducing the published pair table for `n_octets=32, radius=16`.
pub const GOOD_SEED_N32_R16: u32 = 1_431_142_416;
/// Seed reproducing the published pair table for `n_octets=32, radius=24`.
pub const GOOD_SEED_N32_R24: u32 = 1_431_228_807;

const OCTET_BIT_COUNT: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).count_ones() as u8;
        i += 1;
    }
    table
};

#[derive(Debug, Clone)]
pub struct BriefExtractor {
    radius: i32,
    n_octets: usize,
    // Test pairs stored flat as [x0, y0, x1, y1, ...].
    offsets: Vec<i32>,
    // x_min, x_max, y_min, y_max over all sampled points.
    offset_limits: [i32; 4],
    pub pyr_level_offset: usize,
}

impl BriefExtractor {
    /// New extractor with `8 * n_octets` random test pairs drawn from an
    /// entropy seed. Use [`Self::new_with_seed`] for reproducible pairs.
    #[must_use]
    pub fn new(n_octets: usize, radius: i32) -> Self {
        Self::new_with_seed(n_octets, radius, rand::random())
    }

    #[must_use]
    pub fn new_with_seed(n_octets: usize, radius: i32, seed: u32) -> Self {
        if n_octets == 0 || radius <= 0 {
            fatal!(TAG, "extractor needs positive octet count and radius");
        }
        // Below radius 3 the sampling square cannot always honour the
        // minimum pair distance and the rejection loop would not finish.
        if radius < 3 {
            fatal!(TAG, "randomised pairs need a radius of at least 3, got {radius}");
        }

        let mut be = Self {
            radius,
            n_octets,
            offsets: vec![0; n_octets * 8 * 4],
            offset_limits: [0; 4],
            pyr_level_offset: 2,
        };
        be.randomize_with_seed(seed);
        be
    }

    /// Builds an extractor over a caller-provided pair table instead of
    /// randomised pairs. The table holds `8 * n_octets` pairs flattened as
    /// `[x0, y0, x1, y1, ...]`.
    #[must_use]
    pub fn with_offsets(n_octets: usize, radius: i32, offsets: &[i32]) -> Self {
        if n_octets == 0 || radius <= 0 {
            fatal!(TAG, "extractor needs positive octet count and radius");
        }

        let mut be = Self {
            radius,
            n_octets,
            offsets: vec![0; n_octets * 8 * 4],
            offset_limits: [0; 4],
            pyr_level_offset: 2,
        };
        be.set_offsets(offsets);
        be
    }

    #[must_use]
    pub const fn n_octets(&self) -> usize {
        self.n_octets
    }

    #[must_use]
    pub const fn radius(&self) -> i32 {
        self.radius
    }

    #[must_use]
    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    #[must_use]
    pub const fn offset_limits(&self) -> &[i32; 4] {
        &self.offset_limits
    }

    /// Replaces the test pairs; limits are recomputed. Pair count must stay
    /// `8 * n_octets`.
    pub fn set_offsets(&mut self, offsets: &[i32]) {
        if offsets.len() != self.n_octets * 8 * 4 {
            fatal!(
                TAG,
                "expected {} offset values, got {}",
                self.n_octets * 8 * 4,
                offsets.len()
            );
        }
        self.offsets.copy_from_slice(offsets);
        self.update_limits();
    }

    /// Redraws all test pairs from the given seed. Both points fall in
    /// `[-radius, +radius]^2`; the second is redrawn until the pair is at
    /// least 3 pixels apart.
    pub fn randomize_with_seed(&mut self, seed: u32) {
        let mut sampler = StdRng::seed_from_u64(u64::from(seed));
        let radius = self.radius;
        let mut draw = |rng: &mut StdRng| (2.0 * radius as f32 * (rng.gen::<f32>() - 0.5)) as i32;

        let n_pairs = self.n_octets * 8;
        for i in 0..n_pairs {
            let x0 = draw(&mut sampler);
            let y0 = draw(&mut sampler);

            let (mut x1, mut y1);
            loop {
                x1 = draw(&mut sampler);
                y1 = draw(&mut sampler);

                let dx = x1 - x0;
                let dy = y1 - y0;
                if dx * dx + dy * dy >= TEST_PAIR_MIN_DISTANCE2 {
                    break;
                }
            }

            self.offsets[4 * i] = x0;
            self.offsets[4 * i + 1] = y0;
            self.offsets[4 * i + 2] = x1;
            self.offsets[4 * i + 3] = y1;
        }

        self.update_limits();
    }

    /// Recomputes `offset_limits` over all sampled points.
    pub fn update_limits(&mut self) {
        let mut limits = [i32::MAX, i32::MIN, i32::MAX, i32::MIN];
        for pair in self.offsets.chunks_exact(4) {
            for &(x, y) in &[(pair[0], pair[1]), (pair[2], pair[3])] {
                limits[0] = limits[0].min(x);
                limits[1] = limits[1].max(x);
                limits[2] = limits[2].min(y);
                limits[3] = limits[3].max(y);
            }
        }
        self.offset_limits = limits;
    }

    /// A keypoint is admissible iff its sampling level exists and the whole
    /// offset box, scaled to that level, lands strictly inside it.
    #[must_use]
    pub fn check_point_pyr(&self, pyr: &Pyramid, x: i32, y: i32, level: usize) -> bool {
        let sample_level = level + self.pyr_level_offset;
        if sample_level >= pyr.n_levels() {
            return false;
        }

        let img = &pyr.level(sample_level).img;
        let scale_f = pyr.level_scale(level) / pyr.level_scale(sample_level);

        let x_min = ((x + self.offset_limits[0]) as f32 * scale_f) as i32;
        let x_max = ((x + self.offset_limits[1]) as f32 * scale_f) as i32;
        let y_min = ((y + self.offset_limits[2]) as f32 * scale_f) as i32;
        let y_max = ((y + self.offset_limits[3]) as f32 * scale_f) as i32;

        x_min >= 0 && x_max < img.width() as i32 && y_min >= 0 && y_max < img.height() as i32
    }

    /// Computes the descriptor of the keypoint at `(x, y, level)` into
    /// `desc`, which must hold `n_octets` bytes. Bits are emitted MSB first
    /// within each octet; a bit is 1 iff the first sample is brighter.
    pub fn compute_pyr(&self, pyr: &Pyramid, x: i32, y: i32, level: usize, desc: &mut [u8]) {
        if desc.len() < self.n_octets {
            fatal!(TAG, "descriptor buffer holds {} octets, need {}", desc.len(), self.n_octets);
        }

        let sample_level = level + self.pyr_level_offset;
        let img = &pyr.level(sample_level).img;
        let scale_f = pyr.level_scale(level) / pyr.level_scale(sample_level);

        let data = img.data_u8();
        let stride = img.row_stride();
        let sample = |ox: i32, oy: i32| {
            let sx = ((x + ox) as f32 * scale_f) as i32;
            let sy = ((y + oy) as f32 * scale_f) as i32;
            data[sy as usize * stride + sx as usize]
        };

        let mut pairs = self.offsets.chunks_exact(4);
        for octet in desc[..self.n_octets].iter_mut() {
            let mut byte = 0u8;
            for _ in 0..8 {
                let pair = pairs.next().expect("offsets sized to n_octets * 8 pairs");
                let i0 = sample(pair[0], pair[1]);
                let i1 = sample(pair[2], pair[3]);
                byte = (byte << 1) | u8::from(i0 > i1);
            }
            *octet = byte;
        }
    }

    /// Serialises `(n_octets, radius, offsets, pyr_level_offset)` as native
    /// endian raw binary.
    pub fn write<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        stream.write_all(&(self.n_octets as i32).to_ne_bytes())?;
        stream.write_all(&self.radius.to_ne_bytes())?;
        for v in &self.offsets {
            stream.write_all(&v.to_ne_bytes())?;
        }
        stream.write_all(&(self.pyr_level_offset as i32).to_ne_bytes())?;
        Ok(())
    }

    /// Reads back an extractor written by [`Self::write`] and recomputes
    /// the offset limits.
    pub fn read<R: Read>(stream: &mut R) -> io::Result<Self> {
        fn read_i32<R: Read>(stream: &mut R) -> io::Result<i32> {
            let mut b = [0u8; 4];
            stream.read_exact(&mut b)?;
            Ok(i32::from_ne_bytes(b))
        }

        let n_octets = read_i32(stream)? as usize;
        let radius = read_i32(stream)?;
        let mut offsets = vec![0i32; n_octets * 8 * 4];
        for v in &mut offsets {
            *v = read_i32(stream)?;
        }
        let pyr_level_offset = read_i32(stream)? as usize;

        let mut be = Self {
            radius,
            n_octets,
            offsets,
            offset_limits: [0; 4],
            pyr_level_offset,
        };
        be.update_limits();
        Ok(be)
    }
}

/// Hamming distance between two descriptors of `n_octets` bytes each, via
/// the byte popcount table with an 8-wide unrolled inner loop. The result
/// lies in `[0, 8 * n_octets]`.
#[must_use]
pub fn descriptor_distance(n_octets: usize, desc0: &[u8], desc1: &[u8]) -> u32 {
    let mut dist = 0u32;

    let mut i = 0;
    while i + 8 <= n_octets {
        dist += u32::from(OCTET_BIT_COUNT[(desc0[i] ^ desc1[i]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 1] ^ desc1[i + 1]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 2] ^ desc1[i + 2]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 3] ^ desc1[i + 3]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 4] ^ desc1[i + 4]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 5] ^ desc1[i + 5]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 6] ^ desc1[i + 6]) as usize])
            + u32::from(OCTET_BIT_COUNT[(desc0[i + 7] ^ desc1[i + 7]) as usize]);
        i += 8;
    }
    while i < n_octets {
        dist += u32::from(OCTET_BIT_COUNT[(desc0[i] ^ desc1[i]) as usize]);
        i += 1;
    }

    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use crate::mem::DataType;
    use crate::pyramid::PyramidBuilder;

    // The 4x4 artificial neighbourhood: intensity 15 at the centre pixel
    // (1, 1) with documented offsets around it.
    const TEST_W: usize = 4;
    const TEST_H: usize = 4;
    #[rustfmt::skip]
    const TEST_DATA: [i16; 16] = [
        -2,   3,  -4,   9,
         1,   0,   5,  10,
        -8,   7,  -6,  11,
       -15, -14, -13,  12,
    ];

    #[rustfmt::skip]
    const TEST_OFFSETS: [i32; 2 * 8 * 4] = [
        0, 0, -1,  0,
        0, 0, -1, -1,
        0, 0,  0, -1,
        0, 0,  1, -1,
        0, 0,  1,  0,
        0, 0,  1,  1,
        0, 0,  0,  1,
        0, 0, -1,  1,
        0, 0,  2, -1,
        0, 0,  2,  0,
        0, 0,  2,  1,
        0, 0,  2,  2,
        0, 0,  1,  2,
        0, 0,  0,  2,
        0, 0, -1,  2,
        0, 0,  0,  0,
    ];

    fn test_image() -> Image {
        let mut img = Image::new_gray(TEST_W, TEST_H, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..TEST_H {
            for x in 0..TEST_W {
                data[y * stride + x] = (15 + TEST_DATA[y * TEST_W + x]) as u8;
            }
        }
        img
    }

    #[test]
    fn artificial_neighbourhood_descriptor() {
        let mut be = BriefExtractor::with_offsets(2, 2, &TEST_OFFSETS);
        be.pyr_level_offset = 0;

        let img = test_image();
        let mut builder = PyramidBuilder::new_fast(1, 0.0);
        let pyr = builder.build0(&img);

        assert!(be.check_point_pyr(&pyr, 1, 1, 0));

        let mut desc = [0u8; 2];
        be.compute_pyr(&pyr, 1, 1, 0, &mut desc);
        assert_eq!([0x55, 0x0E], desc);
    }

    #[test]
    fn update_limits_tracks_extremes() {
        let mut be = BriefExtractor::new_with_seed(2, 16, 1);
        be.set_offsets(&TEST_OFFSETS);
        assert_eq!(&[-1, 2, -1, 2], be.offset_limits());
    }

    #[test]
    fn pair_distance_is_at_least_three_pixels() {
        let be = BriefExtractor::new_with_seed(32, 16, GOOD_SEED_N32_R16);
        for pair in be.offsets().chunks_exact(4) {
            let dx = pair[2] - pair[0];
            let dy = pair[3] - pair[1];
            assert!(dx * dx + dy * dy >= 9);
            assert!(pair.iter().all(|&v| (-16..=16).contains(&v)));
        }
    }

    #[test]
    fn seeded_randomisation_is_reproducible() {
        let a = BriefExtractor::new_with_seed(32, 16, GOOD_SEED_N32_R16);
        let b = BriefExtractor::new_with_seed(32, 16, GOOD_SEED_N32_R16);
        assert_eq!(a.offsets(), b.offsets());

        let c = BriefExtractor::new_with_seed(32, 16, GOOD_SEED_N32_R16 + 1);
        assert_ne!(a.offsets(), c.offsets());
    }

    #[test]
    fn check_point_rejects_margins_and_missing_levels() {
        let mut img = Image::new_gray(256, 256, DataType::U8);
        img.data_u8_mut().fill(128);
        let mut builder = PyramidBuilder::new_fast(5, 0.0);
        let pyr = builder.build0(&img);

        let be = BriefExtractor::new_with_seed(2, 16, 7);
        assert!(be.check_point_pyr(&pyr, 128, 128, 0));
        assert!(!be.check_point_pyr(&pyr, 0, 0, 0));
        assert!(!be.check_point_pyr(&pyr, 255, 255, 0));
        // Sampling level would be past the top of the pyramid.
        assert!(!be.check_point_pyr(&pyr, 4, 4, 4));
    }

    #[test]
    fn identical_inputs_give_identical_descriptors() {
        let mut img = Image::new_gray(128, 128, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..128 {
            for x in 0..128 {
                data[y * stride + x] = ((x * 31 + y * 17) % 251) as u8;
            }
        }
        let mut builder = PyramidBuilder::new_fast(4, 0.0);
        let pyr = builder.build0(&img);

        let be = BriefExtractor::new_with_seed(32, 16, GOOD_SEED_N32_R16);
        let mut d0 = [0u8; 32];
        let mut d1 = [0u8; 32];
        assert!(be.check_point_pyr(&pyr, 64, 64, 0));
        be.compute_pyr(&pyr, 64, 64, 0, &mut d0);
        be.compute_pyr(&pyr, 64, 64, 0, &mut d1);
        assert_eq!(d0, d1);
        assert_eq!(0, descriptor_distance(32, &d0, &d1));
    }

    #[test]
    fn hamming_distance_extremes() {
        let d0 = [0b1010_1010u8; 32];
        let d1: Vec<u8> = d0.iter().map(|b| !b).collect();
        assert_eq!(0, descriptor_distance(32, &d0, &d0));
        assert_eq!(8 * 32, descriptor_distance(32, &d0, &d1));

        // Tail loop handles octet counts that are not multiples of eight.
        assert_eq!(8 * 5, descriptor_distance(5, &d0[..5], &d1[..5]));
    }

    #[test]
    fn persistence_round_trip() {
        let be = BriefExtractor::new_with_seed(32, 24, GOOD_SEED_N32_R24);
        let mut buf = Vec::new();
        be.write(&mut buf).unwrap();

        let back = BriefExtractor::read(&mut buf.as_slice()).unwrap();
        assert_eq!(be.n_octets(), back.n_octets());
        assert_eq!(be.radius(), back.radius());
        assert_eq!(be.offsets(), back.offsets());
        assert_eq!(be.offset_limits(), back.offset_limits());
        assert_eq!(be.pyr_level_offset, back.pyr_level_offset);
    }
}
