// FAST-9 corner detection: segment test on the 16-pixel Bresenham ring of
// radius 3, binary-search scoring, and a linear-time non-maximum suppression
// sweep over raster-ordered corners.

use crate::image::Image;
use crate::keypoint::{threshold_adapt_factor, Keypoint};
use crate::pyramid::Pyramid;

// Ring offsets in the canonical Rosten/Drummond order, starting at
// (0, +3) and walking clockwise.
const RING: [(i32, i32); 16] = [
    (0, 3),
    (1, 3),
    (2, 2),
    (3, 1),
    (3, 0),
    (3, -1),
    (2, -2),
    (1, -3),
    (0, -3),
    (-1, -3),
    (-2, -2),
    (-3, -1),
    (-3, 0),
    (-3, 1),
    (-2, 2),
    (-1, 3),
];

const ARC_LENGTH: usize = 9;

fn ring_values(data: &[u8], stride: usize, x: usize, y: usize) -> [i32; 16] {
    let mut vals = [0i32; 16];
    for (v, &(dx, dy)) in vals.iter_mut().zip(&RING) {
        let idx = (y as i32 + dy) * stride as i32 + x as i32 + dx;
        *v = i32::from(data[idx as usize]);
    }
    vals
}

// Contiguous circular run of at least ARC_LENGTH set flags.
fn has_arc(flags: [bool; 16]) -> bool {
    let mut run = 0;
    for i in 0..16 + ARC_LENGTH - 1 {
        if flags[i % 16] {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn is_corner(data: &[u8], stride: usize, x: usize, y: usize, b: i32) -> bool {
    let p = i32::from(data[y * stride + x]);
    let vals = ring_values(data, stride, x, y);

    let mut bright = [false; 16];
    let mut dark = [false; 16];
    let mut n_bright = 0;
    let mut n_dark = 0;
    for i in 0..16 {
        bright[i] = vals[i] > p + b;
        dark[i] = vals[i] < p - b;
        n_bright += usize::from(bright[i]);
        n_dark += usize::from(dark[i]);
    }

    (n_bright >= ARC_LENGTH && has_arc(bright)) || (n_dark >= ARC_LENGTH && has_arc(dark))
}

/// Scans the image in raster order and returns up to `n_keys_max` pixels
/// passing the FAST-9 segment test at `threshold`. Scores are left at zero;
/// see [`score_keypoints`].
#[must_use]
pub fn detect_keypoints(n_keys_max: usize, img: &Image, threshold: i32) -> Vec<Keypoint> {
    img.assert_grayscale_u8();

    let mut keys = Vec::new();
    let (w, h) = (img.width(), img.height());
    if w < 7 || h < 7 || n_keys_max == 0 {
        return keys;
    }

    let data = img.data_u8();
    let stride = img.row_stride();
    for y in 3..h - 3 {
        for x in 3..w - 3 {
            if is_corner(data, stride, x, y, threshold) {
                keys.push(Keypoint {
                    x: x as i32,
                    y: y as i32,
                    xs: x as f32,
                    ys: y as f32,
                    level: 0,
                    scale: 1.0,
                    sigma: 0.0,
                    score: 0.0,
                    ori: 0.0,
                    id: keys.len() as u64,
                });
                if keys.len() == n_keys_max {
                    return keys;
                }
            }
        }
    }
    keys
}

/// Sets every keypoint's score to the largest threshold at which the pixel
/// still passes the segment test, found by binary search over
/// `[threshold, 255]`.
pub fn score_keypoints(keys: &mut [Keypoint], img: &Image, threshold: i32) {
    img.assert_grayscale_u8();

    let data = img.data_u8();
    let stride = img.row_stride();
    for key in keys {
        let mut bmin = threshold.clamp(0, 254);
        let mut bmax = 255;
        while bmin != bmax - 1 {
            let mid = (bmin + bmax) / 2;
            if is_corner(data, stride, key.x as usize, key.y as usize, mid) {
                bmin = mid;
            } else {
                bmax = mid;
            }
        }
        key.score = bmin as f32;
    }
}

/// Non-maximum suppression over raster-ordered corners. A corner survives
/// iff no corner in its 8-neighbourhood scores strictly higher; on equal
/// scores the first in raster order survives. Returns at most
/// `n_keys_supp_max` corners, still in raster order.
#[must_use]
pub fn suppress_keypoints(n_keys_supp_max: usize, keys: &[Keypoint]) -> Vec<Keypoint> {
    let mut out = Vec::new();
    if keys.is_empty() || n_keys_supp_max == 0 {
        return out;
    }

    // Index of the first corner of each row; raster order makes one pass
    // enough. Two cursors then track the rows above and below the current
    // corner for the vertical neighbour checks.
    let last_row = keys[keys.len() - 1].y as usize;
    let mut row_start = vec![usize::MAX; last_row + 1];
    let mut prev_row = -1;
    for (i, key) in keys.iter().enumerate() {
        if key.y != prev_row {
            row_start[key.y as usize] = i;
            prev_row = key.y;
        }
    }

    let sz = keys.len();
    let mut point_above = 0usize;
    let mut point_below = 0usize;

    'corner: for i in 0..sz {
        let pos = &keys[i];
        let score = pos.score;

        // Earlier neighbours suppress on ties, later ones only when
        // strictly greater; the first of an equal pair survives.
        if i > 0 {
            let left = &keys[i - 1];
            if left.x == pos.x - 1 && left.y == pos.y && left.score >= score {
                continue;
            }
        }
        if i < sz - 1 {
            let right = &keys[i + 1];
            if right.x == pos.x + 1 && right.y == pos.y && right.score > score {
                continue;
            }
        }

        if pos.y != 0 && row_start[pos.y as usize - 1] != usize::MAX {
            if keys[point_above].y < pos.y - 1 {
                point_above = row_start[pos.y as usize - 1];
            }
            while keys[point_above].y < pos.y && keys[point_above].x < pos.x - 1 {
                point_above += 1;
            }
            let mut j = point_above;
            while keys[j].y < pos.y && keys[j].x <= pos.x + 1 {
                if (pos.x - keys[j].x).abs() <= 1 && keys[j].score >= score {
                    continue 'corner;
                }
                j += 1;
            }
        }

        if pos.y as usize != last_row && row_start[pos.y as usize + 1] != usize::MAX && point_below < sz {
            if keys[point_below].y < pos.y + 1 {
                point_below = row_start[pos.y as usize + 1];
            }
            while point_below < sz
                && keys[point_below].y == pos.y + 1
                && keys[point_below].x < pos.x - 1
            {
                point_below += 1;
            }
            let mut j = point_below;
            while j < sz && keys[j].y == pos.y + 1 && keys[j].x <= pos.x + 1 {
                if (pos.x - keys[j].x).abs() <= 1 && keys[j].score > score {
                    continue 'corner;
                }
                j += 1;
            }
        }

        out.push(*pos);
        if out.len() == n_keys_supp_max {
            break;
        }
    }

    out
}

/// Per-level detection over a pyramid: detect, score and suppress on each
/// level, stamp `(level, scale, sigma)`, and concatenate levels in
/// ascending order. `n_key_levels` of zero means all levels.
#[must_use]
pub fn detect_keypoints_pyr(
    n_keys_supp_max: usize,
    n_keys_max: usize,
    pyr: &Pyramid,
    threshold: i32,
    n_key_levels: usize,
) -> Vec<Keypoint> {
    let n_levels = if n_key_levels == 0 {
        pyr.n_levels()
    } else {
        n_key_levels.min(pyr.n_levels())
    };

    let mut out: Vec<Keypoint> = Vec::new();
    for l in 0..n_levels {
        let budget = n_keys_supp_max - out.len();
        if budget == 0 {
            break;
        }

        let level = pyr.level(l);
        let mut raw = detect_keypoints(n_keys_max, &level.img, threshold);
        score_keypoints(&mut raw, &level.img, threshold);
        let mut supp = suppress_keypoints(budget, &raw);
        for (i, key) in supp.iter_mut().enumerate() {
            key.level = l as i32;
            key.scale = level.scale;
            key.sigma = level.sigma;
            key.id = (out.len() + i) as u64;
        }
        out.append(&mut supp);
    }
    out
}

/// FAST-9 detector with a persistent threshold that can be adapted across
/// frames to hold the corner count steady.
#[derive(Debug)]
pub struct FastDetector {
    pub threshold: i32,
    work_multiplier: usize,
}

impl Default for FastDetector {
    fn default() -> Self {
        Self::new(15)
    }
}

impl FastDetector {
    #[must_use]
    pub fn new(threshold: i32) -> Self {
        Self { threshold: threshold.clamp(0, 255), work_multiplier: 5 }
    }

    pub fn detect(&mut self, max_n_keys: usize, img: &Image) -> Vec<Keypoint> {
        let mut raw = detect_keypoints(self.work_multiplier * max_n_keys, img, self.threshold);
        score_keypoints(&mut raw, img, self.threshold);
        suppress_keypoints(max_n_keys, &raw)
    }

    pub fn detect_pyr(
        &mut self,
        max_n_keys: usize,
        pyr: &Pyramid,
        n_key_levels: usize,
    ) -> Vec<Keypoint> {
        detect_keypoints_pyr(
            max_n_keys,
            self.work_multiplier * max_n_keys,
            pyr,
            self.threshold,
            n_key_levels,
        )
    }

    /// Nudges the threshold after a detection returning `n_keys` corners so
    /// future frames drift towards `max_n_keys`.
    pub fn adapt_threshold(&mut self, n_keys: usize, max_n_keys: usize) {
        let factor = threshold_adapt_factor(n_keys, max_n_keys);
        if factor != 1.0 {
            self.threshold = ((self.threshold as f32 * factor) as i32).clamp(1, 250);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::mem::DataType;
    use crate::pyramid::PyramidBuilder;

    fn noise_image(w: usize, h: usize, seed: u64) -> Image {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut img = Image::new_gray(w, h, DataType::U8);
        for p in img.data_u8_mut() {
            *p = rng.gen();
        }
        img
    }

    // One bright square on a dark background has four unambiguous corners.
    fn square_image() -> Image {
        let mut img = Image::new_gray(32, 32, DataType::U8);
        img.data_u8_mut().fill(20);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 10..22 {
            for x in 10..22 {
                data[y * stride + x] = 220;
            }
        }
        img
    }

    #[test]
    fn detects_square_corners() {
        let img = square_image();
        let keys = detect_keypoints(1000, &img, 30);
        assert!(!keys.is_empty());
        // Every returned corner still passes the segment test.
        let data = img.data_u8();
        for key in &keys {
            assert!(is_corner(data, img.row_stride(), key.x as usize, key.y as usize, 30));
        }
    }

    #[test]
    fn scores_are_at_least_the_start_threshold() {
        let img = noise_image(64, 64, 7);
        let mut keys = detect_keypoints(1000, &img, 10);
        assert!(!keys.is_empty());
        score_keypoints(&mut keys, &img, 10);
        assert!(keys.iter().all(|k| k.score >= 10.0));
    }

    #[test]
    fn detect_emits_raster_order() {
        let img = noise_image(48, 48, 3);
        let keys = detect_keypoints(1000, &img, 5);
        for w in keys.windows(2) {
            assert!(w[0].y < w[1].y || (w[0].y == w[1].y && w[0].x < w[1].x));
        }
    }

    #[test]
    fn suppression_removes_adjacent_weaker_corners() {
        let img = noise_image(64, 64, 11);
        let mut keys = detect_keypoints(4000, &img, 5);
        score_keypoints(&mut keys, &img, 5);
        let supp = suppress_keypoints(4000, &keys);
        assert!(!supp.is_empty());
        assert!(supp.len() <= keys.len());

        for (i, a) in supp.iter().enumerate() {
            for b in &supp[i + 1..] {
                let adjacent = (a.x - b.x).abs() <= 1 && (a.y - b.y).abs() <= 1;
                if adjacent {
                    panic!("adjacent corners survived at ({},{}) and ({},{})", a.x, a.y, b.x, b.y);
                }
            }
        }
    }

    #[test]
    fn suppression_keeps_local_maxima() {
        let keys = [
            Keypoint { x: 10, y: 10, score: 50.0, ..Keypoint::default() },
            Keypoint { x: 11, y: 10, score: 60.0, ..Keypoint::default() },
            Keypoint { x: 11, y: 11, score: 55.0, ..Keypoint::default() },
        ];
        let supp = suppress_keypoints(10, &keys);
        assert_eq!(1, supp.len());
        assert_eq!(60.0, supp[0].score);
    }

    #[test]
    fn suppression_breaks_ties_towards_raster_order() {
        let keys = [
            Keypoint { x: 5, y: 5, score: 42.0, ..Keypoint::default() },
            Keypoint { x: 6, y: 5, score: 42.0, ..Keypoint::default() },
        ];
        let supp = suppress_keypoints(10, &keys);
        assert_eq!(1, supp.len());
        assert_eq!(5, supp[0].x);
    }

    #[test]
    fn detector_caps_output() {
        let img = noise_image(96, 96, 23);
        let mut det = FastDetector::new(0);
        let keys = det.detect(1000, &img);
        assert!(!keys.is_empty());
        assert!(keys.len() <= 1000);
    }

    #[test]
    fn pyramid_detection_stamps_levels() {
        let img = noise_image(128, 128, 5);
        let mut builder = PyramidBuilder::new_fast(3, 0.0);
        let pyr = builder.build0(&img);

        let mut det = FastDetector::new(10);
        let keys = det.detect_pyr(2000, &pyr, 0);
        assert!(!keys.is_empty());
        // Levels come out in ascending order with their scales attached.
        for w in keys.windows(2) {
            assert!(w[0].level <= w[1].level);
        }
        assert!(keys.iter().any(|k| k.level > 0));
        for key in &keys {
            assert_eq!(pyr.level_scale(key.level as usize), key.scale);
        }
    }

    #[test]
    fn adapt_threshold_moves_towards_target() {
        let mut det = FastDetector::new(40);
        det.adapt_threshold(4000, 1000);
        assert!(det.threshold > 40);

        let mut det = FastDetector::new(40);
        det.adapt_threshold(10, 1000);
        assert!(det.threshold < 40);
    }

    #[test]
    fn flat_image_has_no_corners() {
        let mut img = Image::new_gray(32, 32, DataType::U8);
        img.data_u8_mut().fill(99);
        assert!(detect_keypoints(100, &img, 1).is_empty());
    }
}
