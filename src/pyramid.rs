// Multi-scale image pyramids. A pyramid is a sequence of grayscale levels
// annotated with the linear down-sampling factor from the original image and
// the cumulative blur in original-image pixels. Builders own a reusable work
// image and filter scratch so rebuilding over video frames does not allocate.

use derive_more::Display;

use crate::image::{self, Image};
use crate::mem::DataType;

const TAG: &str = "pyramid";

/// Blur assumed to be present in the raw input image.
pub const INITIAL_SIGMA: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct Level {
    pub img: Image,
    pub scale: f32,
    pub sigma: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Pyramid {
    levels: Vec<Level>,
}

impl Pyramid {
    #[must_use]
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    #[must_use]
    pub fn level(&self, idx: usize) -> &Level {
        &self.levels[idx]
    }

    #[must_use]
    pub fn level_scale(&self, idx: usize) -> f32 {
        self.levels[idx].scale
    }

    #[must_use]
    pub fn level_sigma(&self, idx: usize) -> f32 {
        self.levels[idx].sigma
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    #[display(fmt = "fast")]
    Fast,
    #[display(fmt = "fine")]
    Fine,
    #[display(fmt = "scaled")]
    Scaled,
}

#[derive(Debug, Clone, Copy)]
pub struct PyramidInfo {
    pub n_levels: usize,
    pub n_octaves: usize,
    pub n_octave_steps: usize,
    pub scale_factor: f32,
    pub sigma0: f32,
}

#[derive(Debug)]
pub struct PyramidBuilder {
    kind: BuilderKind,
    info: PyramidInfo,
    work: Image,
    scratch: Vec<f32>,
}

impl PyramidBuilder {
    /// Fast pyramid: `n_levels` levels, each a plain 2x decimation of the
    /// previous. Scales run 1, 2, 4, ...
    #[must_use]
    pub fn new_fast(n_levels: usize, sigma0: f32) -> Self {
        if n_levels < 1 {
            fatal!(TAG, "fast pyramid needs at least one level");
        }
        Self {
            kind: BuilderKind::Fast,
            info: PyramidInfo {
                n_levels,
                n_octaves: 0,
                n_octave_steps: 0,
                scale_factor: 2.0,
                sigma0,
            },
            work: Image::default(),
            scratch: Vec::new(),
        }
    }

    /// Fine pyramid: `n_octaves * n_octave_steps` levels with cumulative
    /// blur `sigma0 * 2^(i / n_octave_steps)` at level `i`.
    #[must_use]
    pub fn new_fine(n_octaves: usize, n_octave_steps: usize, sigma0: f32) -> Self {
        if n_octaves < 1 || n_octave_steps < 1 {
            fatal!(TAG, "fine pyramid needs at least one octave and one step");
        }
        if sigma0 <= 0.0 {
            fatal!(TAG, "fine pyramid needs a positive sigma0, got {sigma0}");
        }
        Self {
            kind: BuilderKind::Fine,
            info: PyramidInfo {
                n_levels: n_octaves * n_octave_steps,
                n_octaves,
                n_octave_steps,
                scale_factor: 2.0,
                sigma0,
            },
            work: Image::default(),
            scratch: Vec::new(),
        }
    }

    /// Scaled pyramid: `n_levels` levels with inter-level scale ratio
    /// `scale_factor`, each resampled from the progressively blurred
    /// original by bilinear interpolation.
    #[must_use]
    pub fn new_scaled(n_levels: usize, scale_factor: f32, sigma0: f32) -> Self {
        if n_levels < 1 {
            fatal!(TAG, "scaled pyramid needs at least one level");
        }
        if scale_factor < 1.0 {
            fatal!(TAG, "scaled pyramid needs a scale factor >= 1, got {scale_factor}");
        }
        if sigma0 <= 0.0 {
            fatal!(TAG, "scaled pyramid needs a positive sigma0, got {sigma0}");
        }
        Self {
            kind: BuilderKind::Scaled,
            info: PyramidInfo {
                n_levels,
                n_octaves: 0,
                n_octave_steps: 0,
                scale_factor,
                sigma0,
            },
            work: Image::default(),
            scratch: Vec::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> BuilderKind {
        self.kind
    }

    #[must_use]
    pub const fn info(&self) -> &PyramidInfo {
        &self.info
    }

    /// Builds a fresh pyramid from `img`.
    #[must_use]
    pub fn build0(&mut self, img: &Image) -> Pyramid {
        let mut pyr = Pyramid::default();
        self.build(&mut pyr, img);
        pyr
    }

    /// Rebuilds `pyr` from `img`, reusing the level buffers.
    pub fn build(&mut self, pyr: &mut Pyramid, img: &Image) {
        img.assert_grayscale_u8();

        self.init_levels(pyr, img.width(), img.height());
        self.seed_level0(pyr, img);
        self.update(pyr);
    }

    /// Recomputes all levels above level 0 from level 0's current pixels.
    pub fn update(&mut self, pyr: &mut Pyramid) {
        if pyr.is_empty() {
            fatal!(TAG, "can not update an empty pyramid");
        }

        match self.kind {
            BuilderKind::Fast => self.update_fast(pyr),
            BuilderKind::Fine => self.update_fine(pyr),
            BuilderKind::Scaled => self.update_scaled(pyr),
        }
    }

    /// Sizes the level images and annotates scales and sigmas. The pixel
    /// contents are left stale until the next [`Self::update`].
    pub fn init_levels(&mut self, pyr: &mut Pyramid, width0: usize, height0: usize) {
        if width0 < 1 || height0 < 1 {
            fatal!(TAG, "can not size a pyramid from a {width0}x{height0} image");
        }

        let info = &self.info;
        pyr.levels.resize_with(info.n_levels, || Level {
            img: Image::default(),
            scale: 1.0,
            sigma: 0.0,
        });

        let mut w = width0;
        let mut h = height0;
        for i in 0..info.n_levels {
            let (lw, lh, scale, sigma) = match self.kind {
                BuilderKind::Fast => {
                    if i > 0 {
                        w /= 2;
                        h /= 2;
                    }
                    let scale = (1usize << i) as f32;
                    (w, h, scale, info.sigma0 * scale)
                }
                BuilderKind::Fine => {
                    let o = i / info.n_octave_steps;
                    if i > 0 && i % info.n_octave_steps == 0 {
                        w /= 2;
                        h /= 2;
                    }
                    let sigma = info.sigma0 * rel_exp2(i, info.n_octave_steps);
                    (w, h, (1usize << o) as f32, sigma)
                }
                BuilderKind::Scaled => {
                    let s = info.scale_factor.powi(i as i32);
                    // Same expression the bilinear resampler uses for its
                    // output shape, so rebuilds never disagree by a pixel.
                    let inv = 1.0 / s;
                    let lw = (width0 as f32 * inv) as usize;
                    let lh = (height0 as f32 * inv) as usize;
                    (lw, lh, s, info.sigma0 * s)
                }
            };

            if lw < 1 || lh < 1 {
                fatal!(TAG, "pyramid level {i} would be {lw}x{lh}, too many levels for {width0}x{height0}");
            }

            let level = &mut pyr.levels[i];
            level.img.resize(lw, lh, 0, crate::image::ImageType::Grayscale, DataType::U8);
            level.scale = scale;
            level.sigma = sigma;
        }
    }

    // Copies the source into level 0 and lifts its blur from INITIAL_SIGMA
    // up to sigma0 when sigma0 asks for more.
    fn seed_level0(&mut self, pyr: &mut Pyramid, img: &Image) {
        let level0 = &mut pyr.levels[0];
        level0.img.copy_from(img);
        let sigma0 = self.info.sigma0;
        if sigma0 > INITIAL_SIGMA {
            let s = (sigma0 * sigma0 - INITIAL_SIGMA * INITIAL_SIGMA).sqrt();
            image::smooth_inplace(&mut level0.img, s, s, Some(&mut self.scratch));
        }
    }

    fn update_fast(&mut self, pyr: &mut Pyramid) {
        for i in 1..pyr.levels.len() {
            let (lo, hi) = pyr.levels.split_at_mut(i);
            image::downsample(&mut hi[0].img, &lo[i - 1].img);
        }
    }

    fn update_fine(&mut self, pyr: &mut Pyramid) {
        let steps = self.info.n_octave_steps;
        let sigma0 = self.info.sigma0;

        for i in 1..pyr.levels.len() {
            let s = i % steps;
            let (lo, hi) = pyr.levels.split_at_mut(i);
            let prev = &lo[i - 1];
            let cur = &mut hi[0];

            if s == 0 {
                // Entering a new octave: push the previous octave's last
                // level up to a relative blur of 2*sigma0, then decimate.
                // Halving the resolution halves the blur back to sigma0.
                let prev_rel = sigma0 * rel_exp2(steps - 1, steps);
                let target = 2.0 * sigma0;
                let inc = (target * target - prev_rel * prev_rel).sqrt();
                self.work.copy_from(&prev.img);
                image::smooth_inplace(&mut self.work, inc, inc, Some(&mut self.scratch));
                image::downsample(&mut cur.img, &self.work);
            } else {
                let prev_rel = sigma0 * rel_exp2(s - 1, steps);
                let cur_rel = sigma0 * rel_exp2(s, steps);
                let inc = (cur_rel * cur_rel - prev_rel * prev_rel).sqrt();
                image::smooth(&mut cur.img, &prev.img, inc, inc, Some(&mut self.scratch));
            }
        }
    }

    fn update_scaled(&mut self, pyr: &mut Pyramid) {
        let sf = self.info.scale_factor;
        let sigma0 = self.info.sigma0;

        self.work.copy_from(&pyr.levels[0].img);
        for i in 1..pyr.levels.len() {
            // The work image stays at full resolution carrying the
            // cumulative blur of level i measured in original pixels.
            let prev = sigma0 * sf.powi(i as i32 - 1);
            let cur = sigma0 * sf.powi(i as i32);
            let inc = (cur * cur - prev * prev).sqrt();
            image::smooth_inplace(&mut self.work, inc, inc, Some(&mut self.scratch));
            image::scale(&mut pyr.levels[i].img, &self.work, 1.0 / sf.powi(i as i32));
        }
    }
}

// 2^(i / steps)
fn rel_exp2(i: usize, steps: usize) -> f32 {
    (i as f32 / steps as f32).exp2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageType;

    fn checker(w: usize, h: usize) -> Image {
        let mut img = Image::new_gray(w, h, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..h {
            for x in 0..w {
                data[y * stride + x] = if (x / 8 + y / 8) % 2 == 0 { 200 } else { 40 };
            }
        }
        img
    }

    #[test]
    fn fast_pyramid_halves_dimensions() {
        let img = checker(97, 97);
        let mut builder = PyramidBuilder::new_fast(3, 0.0);
        let pyr = builder.build0(&img);

        assert_eq!(3, pyr.n_levels());
        let dims: Vec<_> =
            pyr.levels().iter().map(|l| (l.img.width(), l.img.height())).collect();
        assert_eq!(vec![(97, 97), (48, 48), (24, 24)], dims);
        assert_eq!(1.0, pyr.level_scale(0));
        assert_eq!(2.0, pyr.level_scale(1));
        assert_eq!(4.0, pyr.level_scale(2));
    }

    #[test]
    fn fine_pyramid_shapes_follow_octaves() {
        let img = checker(64, 48);
        let mut builder = PyramidBuilder::new_fine(3, 3, 0.9);
        let pyr = builder.build0(&img);

        assert_eq!(9, pyr.n_levels());
        for i in 0..9 {
            let o = i / 3;
            assert_eq!(64 >> o, pyr.level(i).img.width());
            assert_eq!(48 >> o, pyr.level(i).img.height());
            assert_eq!((1 << o) as f32, pyr.level_scale(i));
        }
        // sigma_i = sigma0 * 2^(i/3)
        assert!((pyr.level_sigma(3) - 1.8).abs() < 1e-5);
    }

    #[test]
    fn scaled_pyramid_dims_truncate() {
        let img = checker(97, 97);
        let mut builder = PyramidBuilder::new_scaled(3, 1.2, 1.5);
        let pyr = builder.build0(&img);

        assert_eq!(97, pyr.level(0).img.width());
        assert_eq!(80, pyr.level(1).img.width());
        assert_eq!(67, pyr.level(2).img.width());
        assert!((pyr.level_scale(2) - 1.44).abs() < 1e-5);
    }

    #[test]
    fn scales_and_sigmas_are_monotonic() {
        let img = checker(128, 128);
        for builder in [
            PyramidBuilder::new_fast(4, 0.8),
            PyramidBuilder::new_fine(2, 4, 0.9),
            PyramidBuilder::new_scaled(5, 1.3, 1.1),
        ] {
            let mut builder = builder;
            let pyr = builder.build0(&img);
            for i in 1..pyr.n_levels() {
                assert!(pyr.level_scale(i) >= pyr.level_scale(i - 1));
                assert!(pyr.level_sigma(i) >= pyr.level_sigma(i - 1));
            }
        }
    }

    #[test]
    fn rebuild_reuses_level_buffers() {
        let img = checker(64, 64);
        let mut builder = PyramidBuilder::new_fast(3, 0.5);
        let mut pyr = builder.build0(&img);

        let brighter = {
            let mut b = img.clone();
            for p in b.data_u8_mut() {
                *p = p.saturating_add(20);
            }
            b
        };
        builder.build(&mut pyr, &brighter);
        assert_eq!(3, pyr.n_levels());
        assert_eq!(brighter.pixel_u8(0, 0), pyr.level(0).img.pixel_u8(0, 0));
    }

    #[test]
    fn deep_pyramid_keeps_content_flat_regions() {
        let mut img = Image::new_gray(64, 64, DataType::U8);
        img.data_u8_mut().fill(128);
        let mut builder = PyramidBuilder::new_fine(2, 2, 1.0);
        let pyr = builder.build0(&img);
        for level in pyr.levels() {
            assert!(level.img.data_u8().iter().all(|&v| (126..=130).contains(&v)));
        }
    }

    #[test]
    #[should_panic(expected = "can not size a pyramid")]
    fn zero_size_input_is_fatal() {
        let img = Image::new_gray(0, 0, DataType::U8);
        let mut builder = PyramidBuilder::new_fast(2, 0.0);
        let _ = builder.build0(&img);
    }

    #[test]
    fn builder_reports_parameters() {
        let b = PyramidBuilder::new_scaled(4, 1.25, 1.6);
        assert_eq!(BuilderKind::Scaled, b.kind());
        assert_eq!(4, b.info().n_levels);
        assert!((b.info().scale_factor - 1.25).abs() < f32::EPSILON);
    }

    #[test]
    fn levels_stay_grayscale() {
        let img = checker(40, 40);
        let mut builder = PyramidBuilder::new_fast(2, 0.0);
        let pyr = builder.build0(&img);
        assert_eq!(ImageType::Grayscale, pyr.level(1).img.typ());
    }
}
