// Harris corner detection over the Gaussian-windowed structure tensor. The
// derivative triple Ix^2, Iy^2, Ix*Iy is built once per frame and reused by
// the score image; peaks are 3x3 local maxima above a threshold that can be
// adapted across frames like the FAST one.

use crate::image::{self, Image};
use crate::keypoint::{threshold_adapt_factor, Keypoint};
use crate::pyramid::Pyramid;

const TAG: &str = "harris";

pub const DEFAULT_SIGMA_WIN: f32 = 1.2;
pub const DEFAULT_K: f32 = 0.06;
pub const DEFAULT_THRESHOLD: f32 = 0.000005;

/// Fills `dimg` with the Gaussian-windowed derivative triple
/// `[Ix^2, Iy^2, Ix*Iy]` of a grayscale image.
pub fn deriv_images(dimg: &mut [Image; 3], img: &Image, sigma_win: f32) {
    img.assert_grayscale();

    let (dx2, rest) = dimg.split_at_mut(1);
    let (dy2, dxy) = rest.split_at_mut(1);
    image::deriv_x(&mut dx2[0], img);
    image::deriv_y(&mut dy2[0], img);
    dxy[0].resize_like(&dx2[0]);

    let stride = dx2[0].row_stride();
    {
        let x2 = dx2[0].data_f32_mut();
        let y2 = dy2[0].data_f32_mut();
        let xy = dxy[0].data_f32_mut();
        for y in 0..img.height() {
            let row = y * stride;
            for x in 0..img.width() {
                let ix = x2[row + x];
                let iy = y2[row + x];
                xy[row + x] = ix * iy;
                x2[row + x] = ix * ix;
                y2[row + x] = iy * iy;
            }
        }
    }

    let mut scratch = image::filter_scratch_for(img.width(), img.height(), sigma_win, sigma_win);
    for d in dimg.iter_mut() {
        image::smooth_inplace(d, sigma_win, sigma_win, Some(&mut scratch));
    }
}

/// Writes the cornerness score `det - k * trace^2` of the structure tensor
/// into an f32 image of the triple's shape.
pub fn score_image(simg: &mut Image, dimg: &[Image; 3], k: f32) {
    let (w, h) = (dimg[0].width(), dimg[0].height());
    simg.resize_like(&dimg[0]);

    let stride = simg.row_stride();
    let x2 = dimg[0].data_f32();
    let y2 = dimg[1].data_f32();
    let xy = dimg[2].data_f32();
    let s = simg.data_f32_mut();
    for y in 0..h {
        let row = y * stride;
        for x in 0..w {
            let det = x2[row + x] * y2[row + x] - xy[row + x] * xy[row + x];
            let trace = x2[row + x] + y2[row + x];
            s[row + x] = det - k * trace * trace;
        }
    }
}

/// Extracts up to `n_keys_max` keypoints at 3x3 local maxima of the score
/// image with score at least `threshold`, in raster order.
#[must_use]
pub fn detect_keypoints(n_keys_max: usize, simg: &Image, threshold: f32) -> Vec<Keypoint> {
    simg.assert_grayscale();

    let mut keys = Vec::new();
    let (w, h) = (simg.width(), simg.height());
    if w < 3 || h < 3 || n_keys_max == 0 {
        return keys;
    }

    let s = simg.data_f32();
    let stride = simg.row_stride();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = s[y * stride + x];
            if c < threshold {
                continue;
            }

            let peak = c > s[(y - 1) * stride + x - 1]
                && c > s[(y - 1) * stride + x]
                && c > s[(y - 1) * stride + x + 1]
                && c > s[y * stride + x - 1]
                && c > s[y * stride + x + 1]
                && c > s[(y + 1) * stride + x - 1]
                && c > s[(y + 1) * stride + x]
                && c > s[(y + 1) * stride + x + 1];
            if !peak {
                continue;
            }

            keys.push(Keypoint {
                x: x as i32,
                y: y as i32,
                xs: x as f32,
                ys: y as f32,
                level: 0,
                scale: 1.0,
                sigma: 0.0,
                score: c,
                ori: 0.0,
                id: keys.len() as u64,
            });
            if keys.len() == n_keys_max {
                return keys;
            }
        }
    }
    keys
}

/// Harris detector holding its derivative and score buffers so repeated
/// detections on a video stream reuse allocations.
#[derive(Debug)]
pub struct HarrisDetector {
    sigma_win: f32,
    k: f32,
    threshold: f32,

    dimg: [Image; 3],
    simg: Image,
}

impl Default for HarrisDetector {
    fn default() -> Self {
        Self {
            sigma_win: DEFAULT_SIGMA_WIN,
            k: DEFAULT_K,
            threshold: DEFAULT_THRESHOLD,
            dimg: [Image::default(), Image::default(), Image::default()],
            simg: Image::default(),
        }
    }
}

impl HarrisDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sigma_win(&mut self, sigma_win: f32) {
        if sigma_win <= 0.0 {
            fatal!(TAG, "window sigma must be positive, got {sigma_win}");
        }
        self.sigma_win = sigma_win;
    }

    pub fn set_k(&mut self, k: f32) {
        self.k = k;
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detects up to `max_n_keys` corners. With `adapt_threshold` set, the
    /// threshold is nudged by the shared ratio brackets after detection.
    pub fn detect(&mut self, img: &Image, max_n_keys: usize, adapt_threshold: bool) -> Vec<Keypoint> {
        self.update_score_image(img);
        let mut keys = detect_keypoints(2 * max_n_keys, &self.simg, self.threshold);

        if adapt_threshold {
            let factor = threshold_adapt_factor(keys.len(), max_n_keys);
            self.threshold *= factor;
        }

        keys.truncate(max_n_keys);
        keys
    }

    /// Per-level Harris over a pyramid, concatenating levels in ascending
    /// order with `(level, scale, sigma)` stamped. `n_key_levels` of zero
    /// means all levels.
    pub fn detect_pyr(
        &mut self,
        pyr: &Pyramid,
        n_key_levels: usize,
        max_n_keys: usize,
        adapt_threshold: bool,
    ) -> Vec<Keypoint> {
        let n_levels = if n_key_levels == 0 {
            pyr.n_levels()
        } else {
            n_key_levels.min(pyr.n_levels())
        };

        let mut out: Vec<Keypoint> = Vec::new();
        for l in 0..n_levels {
            let budget = max_n_keys - out.len();
            if budget == 0 {
                break;
            }

            let level = pyr.level(l);
            let mut keys = self.detect(&level.img, budget, adapt_threshold);
            for (i, key) in keys.iter_mut().enumerate() {
                key.level = l as i32;
                key.scale = level.scale;
                key.sigma = level.sigma;
                key.id = (out.len() + i) as u64;
            }
            out.append(&mut keys);
        }
        out
    }

    fn update_score_image(&mut self, img: &Image) {
        deriv_images(&mut self.dimg, img, self.sigma_win);
        score_image(&mut self.simg, &self.dimg, self.k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::DataType;

    // Bright square on dark ground: strong Harris response at its corners.
    fn square_image() -> Image {
        let mut img = Image::new_gray(40, 40, DataType::U8);
        img.data_u8_mut().fill(30);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 12..28 {
            for x in 12..28 {
                data[y * stride + x] = 225;
            }
        }
        img
    }

    #[test]
    fn deriv_triple_is_nonnegative_where_squared() {
        let img = square_image();
        let mut dimg = [Image::default(), Image::default(), Image::default()];
        deriv_images(&mut dimg, &img, DEFAULT_SIGMA_WIN);

        assert!(dimg[0].data_f32().iter().all(|&v| v >= 0.0));
        assert!(dimg[1].data_f32().iter().all(|&v| v >= 0.0));
        assert_eq!(img.width(), dimg[2].width());
    }

    #[test]
    fn score_peaks_sit_on_square_corners() {
        let img = square_image();
        let mut det = HarrisDetector::new();
        let keys = det.detect(&img, 100, false);
        assert!(!keys.is_empty());

        // Each detected corner must be near one of the four square corners.
        for key in &keys {
            let near = [(12, 12), (27, 12), (12, 27), (27, 27)]
                .iter()
                .any(|&(cx, cy)| (key.x - cx).abs() <= 2 && (key.y - cy).abs() <= 2);
            assert!(near, "unexpected corner at ({}, {})", key.x, key.y);
        }
    }

    #[test]
    fn flat_image_scores_nothing() {
        let mut img = Image::new_gray(24, 24, DataType::U8);
        img.data_u8_mut().fill(120);
        let mut det = HarrisDetector::new();
        assert!(det.detect(&img, 100, false).is_empty());
    }

    #[test]
    fn keypoint_scores_match_score_image_threshold() {
        let img = square_image();
        let mut det = HarrisDetector::new();
        let keys = det.detect(&img, 100, false);
        assert!(keys.iter().all(|k| k.score >= DEFAULT_THRESHOLD));
    }

    #[test]
    fn adaptation_raises_threshold_when_overflowing() {
        let img = square_image();
        let mut det = HarrisDetector::new();
        det.set_threshold(1e-9);
        let before = det.threshold();
        // Ask for a single key; any realistic detection overshoots.
        let _ = det.detect(&img, 1, true);
        assert!(det.threshold() >= before);
    }

    #[test]
    fn pyramid_detection_ascends_levels() {
        let img = square_image();
        let mut builder = crate::pyramid::PyramidBuilder::new_fast(2, 0.0);
        let pyr = builder.build0(&img);

        let mut det = HarrisDetector::new();
        let keys = det.detect_pyr(&pyr, 0, 100, false);
        for w in keys.windows(2) {
            assert!(w[0].level <= w[1].level);
        }
    }
}
