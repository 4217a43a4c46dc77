// Affine warp processor implementing the Morel-Yu tilt/rotation/scale
// decomposition in three buffered stages: rotate by the tilt angle and blur
// along x, horizontally subsample by the tilt factor, then scale-rotate into
// the result. Forward and inverse transforms are accumulated as 2x3 maps so
// callers can project coordinates either way. Warp rows are disjoint, so the
// bilinear loops and the separable blur fan out over the rayon pool.

use rand::Rng;
use rayon::prelude::*;

use crate::filter;
use crate::image::{Image, ImageType};
use crate::mem::DataType;

const TAG: &str = "warp";

const BLUR_KERNEL_LOSS: f64 = 0.003;
const BUFFER_BORDER_SIZE: f64 = 1.0;

/// How pixels that map outside the source are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgMode {
    /// Constant colour.
    Fixed(u8),
    /// Clamp source coordinates and interpolate the edge.
    Repeat,
    /// Independent uniform random bytes.
    Noise,
}

#[derive(Debug, Clone, Copy)]
pub struct WarpParam {
    pub scale: f32,
    pub planar_angle: f32,
    pub tilt: f32,
    pub tilt_angle: f32,
}

const IDENTITY: [f64; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

// Column-major 2x3: [m00, m10, m01, m11, tx, ty].
fn transform_apply(t: &[f64; 6], p: [f64; 2]) -> [f64; 2] {
    [
        p[0] * t[0] + p[1] * t[2] + t[4],
        p[0] * t[1] + p[1] * t[3] + t[5],
    ]
}

fn transform_combine(t0: &[f64; 6], t1: &[f64; 6]) -> [f64; 6] {
    [
        t0[0] * t1[0] + t0[2] * t1[1],
        t0[1] * t1[0] + t0[3] * t1[1],
        t0[0] * t1[2] + t0[2] * t1[3],
        t0[1] * t1[2] + t0[3] * t1[3],
        t0[0] * t1[4] + t0[2] * t1[5] + t0[4],
        t0[1] * t1[4] + t0[3] * t1[5] + t0[5],
    ]
}

#[derive(Debug)]
pub struct AffineWarpProcessor {
    skew_rotation: Image,
    subsample: Image,
    result: Image,

    forward_t: [f64; 6],
    inverse_t: [f64; 6],

    bg_mode: BgMode,
    post_blur_sigma: f32,
}

impl Default for AffineWarpProcessor {
    fn default() -> Self {
        Self {
            skew_rotation: Image::default(),
            subsample: Image::default(),
            result: Image::default(),
            forward_t: IDENTITY,
            inverse_t: IDENTITY,
            bg_mode: BgMode::Noise,
            post_blur_sigma: 0.0,
        }
    }
}

impl AffineWarpProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bg_mode(&mut self, mode: BgMode) {
        self.bg_mode = mode;
    }

    pub fn set_post_blur_sigma(&mut self, sigma: f32) {
        self.post_blur_sigma = sigma;
    }

    #[must_use]
    pub const fn result(&self) -> &Image {
        &self.result
    }

    /// Accumulated source-to-result transform of the last warp.
    #[must_use]
    pub const fn forward_transform(&self) -> &[f64; 6] {
        &self.forward_t
    }

    /// Accumulated result-to-source transform of the last warp.
    #[must_use]
    pub const fn inverse_transform(&self) -> &[f64; 6] {
        &self.inverse_t
    }

    /// Runs the three-stage warp of a grayscale u8 image. The result stays
    /// owned by the processor; see [`Self::result`].
    pub fn warp(&mut self, img: &Image, param: WarpParam) {
        img.assert_grayscale_u8();
        if img.is_empty() {
            fatal!(TAG, "can not warp an empty image");
        }
        if param.tilt < 1.0 || param.scale <= 0.0 {
            fatal!(TAG, "invalid warp parameters: tilt {} scale {}", param.tilt, param.scale);
        }

        self.resize_buffers(img, param);

        compute_skew_rotation_buffer(img, &mut self.skew_rotation, param.tilt_angle, param.tilt);
        compute_subsample_buffer(
            &self.skew_rotation,
            &mut self.subsample,
            param.tilt,
            param.scale,
        );
        compute_result_buffer(
            &self.subsample,
            &mut self.result,
            param.scale,
            param.planar_angle,
            self.post_blur_sigma,
        );

        fill_warp_buffer_bg(img, &mut self.result, &self.inverse_t, self.bg_mode);
    }

    fn resize_buffers(&mut self, img: &Image, param: WarpParam) {
        self.forward_t = IDENTITY;
        self.inverse_t = IDENTITY;

        let tilt_angle = f64::from(param.tilt_angle);
        let tilt = f64::from(param.tilt);
        let scale = f64::from(param.scale);
        let planar_angle = f64::from(param.planar_angle);

        let in_dims = (img.width(), img.height());
        let in_dims = self.resize_stage(StageBuffer::SkewRotation, img, in_dims, 1.0, 1.0, tilt_angle);
        let in_dims = self.resize_stage(StageBuffer::Subsample, img, in_dims, 1.0 / tilt, 1.0, 0.0);
        let _ = self.resize_stage(StageBuffer::Result, img, in_dims, scale, scale, planar_angle);
    }

    // Sizes one stage buffer from the transformed original-image corners,
    // zeroes it, and accumulates the stage transform. Returns the stage's
    // output dimensions for the next stage.
    fn resize_stage(
        &mut self,
        which: StageBuffer,
        img: &Image,
        in_dims: (usize, usize),
        scale_x: f64,
        scale_y: f64,
        angle: f64,
    ) -> (usize, usize) {
        let out_dims = self.transformed_buffer_size(img, scale_x, scale_y, angle);

        let buffer = match which {
            StageBuffer::SkewRotation => &mut self.skew_rotation,
            StageBuffer::Subsample => &mut self.subsample,
            StageBuffer::Result => &mut self.result,
        };
        buffer.resize(out_dims.0, out_dims.1, 0, ImageType::Grayscale, DataType::U8);
        buffer.set_zero();

        let center_in = [in_dims.0 as f64 / 2.0, in_dims.1 as f64 / 2.0];
        let center_out = [out_dims.0 as f64 / 2.0, out_dims.1 as f64 / 2.0];
        self.update_forward_transform(center_in, center_out, scale_x, scale_y, angle);
        self.update_inverse_transform(center_in, center_out, scale_x, scale_y, angle);

        out_dims
    }

    // Bounding box of the original image's corners pushed through the
    // accumulated forward transform and the next stage's linear map, plus a
    // one-pixel border on every side.
    fn transformed_buffer_size(
        &self,
        img: &Image,
        scale_x: f64,
        scale_y: f64,
        angle: f64,
    ) -> (usize, usize) {
        let w = img.width() as f64;
        let h = img.height() as f64;

        let c = angle.cos();
        let s = angle.sin();
        let required_t = [scale_x * c, scale_y * s, -scale_x * s, scale_y * c, 0.0, 0.0];

        let mut x_min = f64::MAX;
        let mut x_max = f64::MIN;
        let mut y_min = f64::MAX;
        let mut y_max = f64::MIN;
        for corner in [[0.0, 0.0], [w, 0.0], [0.0, h], [w, h]] {
            let p = transform_apply(&required_t, transform_apply(&self.forward_t, corner));
            x_min = x_min.min(p[0]);
            x_max = x_max.max(p[0]);
            y_min = y_min.min(p[1]);
            y_max = y_max.max(p[1]);
        }

        let rw = x_max - x_min + 2.0 * BUFFER_BORDER_SIZE;
        let rh = y_max - y_min + 2.0 * BUFFER_BORDER_SIZE;
        (rw as usize, rh as usize)
    }

    fn update_forward_transform(
        &mut self,
        center_in: [f64; 2],
        center_out: [f64; 2],
        scale_x: f64,
        scale_y: f64,
        angle: f64,
    ) {
        let c = angle.cos();
        let s = angle.sin();

        let cx = scale_x * c;
        let sx = scale_x * s;
        let cy = scale_y * c;
        let sy = scale_y * s;
        let dx = center_out[0] - center_in[0] * cx + center_in[1] * sx;
        let dy = center_out[1] - center_in[0] * sy - center_in[1] * cy;

        let stage_t = [cx, sy, -sx, cy, dx, dy];
        self.forward_t = transform_combine(&stage_t, &self.forward_t);
    }

    fn update_inverse_transform(
        &mut self,
        center_in: [f64; 2],
        center_out: [f64; 2],
        scale_x: f64,
        scale_y: f64,
        angle: f64,
    ) {
        let c = angle.cos();
        let s = angle.sin();

        let cx = c / scale_x;
        let sx = s / scale_x;
        let cy = c / scale_y;
        let sy = s / scale_y;
        let dx = center_in[0] - center_out[0] * cx - center_out[1] * sx;
        let dy = center_in[1] + center_out[0] * sy - center_out[1] * cy;

        let stage_t = [cx, -sy, sx, cy, dx, dy];
        self.inverse_t = transform_combine(&self.inverse_t, &stage_t);
    }
}

#[derive(Clone, Copy)]
enum StageBuffer {
    SkewRotation,
    Subsample,
    Result,
}

// Per-stage inverse pixel map: out (x, y) samples in at
// (x*m[0] + y*m[2] + m[4], x*m[1] + y*m[3] + m[5]).
fn stage_inverse_map(
    center_in: (f64, f64),
    center_out: (f64, f64),
    scale_x: f64,
    scale_y: f64,
    angle: f64,
) -> [f32; 6] {
    let c = angle.cos();
    let s = angle.sin();
    let cx = c / scale_x;
    let sx = s / scale_x;
    let cy = c / scale_y;
    let sy = s / scale_y;
    let dx = center_in.0 - center_out.0 * cx - center_out.1 * sx;
    let dy = center_in.1 + center_out.0 * sy - center_out.1 * cy;
    [cx as f32, -sy as f32, sx as f32, cy as f32, dx as f32, dy as f32]
}

fn compute_skew_rotation_buffer(img: &Image, buffer: &mut Image, tilt_angle: f32, tilt: f32) {
    let t = stage_inverse_map(
        (img.width() as f64 / 2.0, img.height() as f64 / 2.0),
        (buffer.width() as f64 / 2.0, buffer.height() as f64 / 2.0),
        1.0,
        1.0,
        f64::from(tilt_angle),
    );
    warp_buffer_affine_bilinear(img, buffer, &t);

    let sigma_x = 0.8 * (tilt * tilt - 1.0).sqrt();
    blur_inplace(buffer, sigma_x, 0.0);
}

fn compute_subsample_buffer(in_buffer: &Image, out_buffer: &mut Image, tilt: f32, scale: f32) {
    let t = stage_inverse_map(
        (in_buffer.width() as f64 / 2.0, in_buffer.height() as f64 / 2.0),
        (out_buffer.width() as f64 / 2.0, out_buffer.height() as f64 / 2.0),
        1.0 / f64::from(tilt),
        1.0,
        0.0,
    );
    warp_buffer_affine_bilinear(in_buffer, out_buffer, &t);

    if scale > 1.0 {
        let sigma = 0.8 * (scale * scale - 1.0).sqrt();
        blur_inplace(out_buffer, sigma, sigma);
    }
}

fn compute_result_buffer(
    in_buffer: &Image,
    res_buffer: &mut Image,
    scale: f32,
    planar_angle: f32,
    post_blur_sigma: f32,
) {
    let t = stage_inverse_map(
        (in_buffer.width() as f64 / 2.0, in_buffer.height() as f64 / 2.0),
        (res_buffer.width() as f64 / 2.0, res_buffer.height() as f64 / 2.0),
        f64::from(scale),
        f64::from(scale),
        f64::from(planar_angle),
    );
    warp_buffer_affine_bilinear(in_buffer, res_buffer, &t);

    blur_inplace(res_buffer, post_blur_sigma, post_blur_sigma);
}

// Interior-only bilinear warp; pixels mapping outside the source keep the
// buffer's zero fill until the background pass. Rows are independent.
fn warp_buffer_affine_bilinear(in_buffer: &Image, out_buffer: &mut Image, t: &[f32; 6]) {
    let (iw, ih, is) = (in_buffer.width(), in_buffer.height(), in_buffer.row_stride());
    let in_data = in_buffer.data_u8();
    let last_x = iw as i32 - 1;
    let last_y = ih as i32 - 1;

    let (ow, oh, os) = (out_buffer.width(), out_buffer.height(), out_buffer.row_stride());
    out_buffer
        .data_u8_mut()
        .par_chunks_mut(os)
        .take(oh)
        .enumerate()
        .for_each(|(y, row)| {
            let mut xp = y as f32 * t[2] + t[4];
            let mut yp = y as f32 * t[3] + t[5];
            for dest in row[..ow].iter_mut() {
                let xpi = xp as i32;
                let ypi = yp as i32;

                if xpi >= 0 && xpi < last_x && ypi >= 0 && ypi < last_y {
                    let base = ypi as usize * is + xpi as usize;
                    let u = xp - xpi as f32;
                    let v = yp - ypi as f32;
                    let up = 1.0 - u;
                    let vp = 1.0 - v;

                    let i = vp
                        * (up * f32::from(in_data[base]) + u * f32::from(in_data[base + 1]))
                        + v * (up * f32::from(in_data[base + is])
                            + u * f32::from(in_data[base + is + 1]));
                    *dest = i.clamp(0.0, 255.0) as u8;
                }

                xp += t[0];
                yp += t[1];
            }
        });
}

// Fills the margin that the interior warp left untouched, mapping every
// result pixel back to the source with the accumulated inverse transform.
fn fill_warp_buffer_bg(image: &Image, warp_buffer: &mut Image, t: &[f64; 6], bg_mode: BgMode) {
    let last_x = image.width() as i32 - 1;
    let last_y = image.height() as i32 - 1;
    let src = image.data_u8();
    let ss = image.row_stride();

    let t = [t[0] as f32, t[1] as f32, t[2] as f32, t[3] as f32, t[4] as f32, t[5] as f32];
    let (ow, oh, os) = (warp_buffer.width(), warp_buffer.height(), warp_buffer.row_stride());
    let out = warp_buffer.data_u8_mut();
    let mut rng = rand::thread_rng();

    for y in 0..oh {
        let row = &mut out[y * os..y * os + ow];
        let mut xp = y as f32 * t[2] + t[4];
        let mut yp = y as f32 * t[3] + t[5];
        for dest in row.iter_mut() {
            let xpi = xp as i32;
            let ypi = yp as i32;

            let u = xp - xpi as f32;
            let v = yp - ypi as f32;
            let up = 1.0 - u;
            let vp = 1.0 - v;

            let mut idx = [xpi, xpi + 1];
            let mut idy = [ypi, ypi + 1];
            let mut bg = false;

            match bg_mode {
                BgMode::Fixed(color) => {
                    if idx[0] <= 0 || idx[1] >= last_x || idy[0] <= 0 || idy[1] >= last_y {
                        *dest = color;
                        xp += t[0];
                        yp += t[1];
                        continue;
                    }
                }
                BgMode::Noise => {
                    if idx[0] <= 0 || idx[1] >= last_x || idy[0] <= 0 || idy[1] >= last_y {
                        *dest = rng.gen();
                        xp += t[0];
                        yp += t[1];
                        continue;
                    }
                }
                BgMode::Repeat => {
                    if idx[0] <= 0 {
                        idx = [0, 0];
                        bg = true;
                    } else if idx[1] >= last_x {
                        idx = [last_x, last_x];
                        bg = true;
                    }
                    if idy[0] <= 0 {
                        idy = [0, 0];
                        bg = true;
                    } else if idy[1] >= last_y {
                        idy = [last_y, last_y];
                        bg = true;
                    }
                }
            }

            if bg {
                let r0 = idy[0] as usize * ss;
                let r1 = idy[1] as usize * ss;
                let i = vp
                    * (up * f32::from(src[r0 + idx[0] as usize])
                        + u * f32::from(src[r0 + idx[1] as usize]))
                    + v * (up * f32::from(src[r1 + idx[0] as usize])
                        + u * f32::from(src[r1 + idx[1] as usize]));
                *dest = i.clamp(0.0, 255.0) as u8;
            }

            xp += t[0];
            yp += t[1];
        }
    }
}

// In-place separable Gaussian blur over rows, then columns via a transposed
// scratch so the column pass is also a parallel row pass. Each worker keeps
// its own convolution scratch.
fn blur_inplace(image: &mut Image, sigma_x: f32, sigma_y: f32) {
    let (w, h, stride) = (image.width(), image.height(), image.row_stride());
    if w == 0 || h == 0 {
        return;
    }

    let nkx = filter::gaussian_kernel_min_size(sigma_x, BLUR_KERNEL_LOSS);
    if nkx > 1 {
        let nk = nkx / 2 + 1;
        let mut kernel = vec![0.0f32; nk];
        filter::gaussian_sym_kernel(nk, &mut kernel, sigma_x);

        image
            .data_u8_mut()
            .par_chunks_mut(stride)
            .take(h)
            .for_each_init(
                || filter::buffer_alloc(w, nkx / 2),
                |buffer, row| {
                    filter::copy_to_buffer1_u8(w, buffer, &row[..w], nkx / 2);
                    filter::convolve_sym(w, buffer, &kernel);
                    for (d, &v) in row[..w].iter_mut().zip(buffer.iter()) {
                        *d = v.round().clamp(0.0, 255.0) as u8;
                    }
                },
            );
    }

    let nky = filter::gaussian_kernel_min_size(sigma_y, BLUR_KERNEL_LOSS);
    if nky > 1 {
        let nk = nky / 2 + 1;
        let mut kernel = vec![0.0f32; nk];
        filter::gaussian_sym_kernel(nk, &mut kernel, sigma_y);

        // Transposed copy: column x of the image becomes row x.
        let mut transposed = vec![0u8; w * h];
        {
            let data = image.data_u8();
            transposed.par_chunks_mut(h).enumerate().for_each(|(x, col)| {
                for (y, d) in col.iter_mut().enumerate() {
                    *d = data[y * stride + x];
                }
            });
        }

        transposed.par_chunks_mut(h).for_each_init(
            || filter::buffer_alloc(h, nky / 2),
            |buffer, col| {
                filter::copy_to_buffer1_u8(h, buffer, col, nky / 2);
                filter::convolve_sym(h, buffer, &kernel);
                for (d, &v) in col.iter_mut().zip(buffer.iter()) {
                    *d = v.round().clamp(0.0, 255.0) as u8;
                }
            },
        );

        let t = &transposed;
        image
            .data_u8_mut()
            .par_chunks_mut(stride)
            .take(h)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, d) in row[..w].iter_mut().enumerate() {
                    *d = t[x * h + y];
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: usize, h: usize) -> Image {
        let mut img = Image::new_gray(w, h, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..h {
            for x in 0..w {
                data[y * stride + x] = ((x * 5 + y * 3) % 200 + 20) as u8;
            }
        }
        img
    }

    const IDENTITY_PARAM: WarpParam =
        WarpParam { scale: 1.0, planar_angle: 0.0, tilt: 1.0, tilt_angle: 0.0 };

    #[test]
    fn identity_warp_preserves_interior() {
        let img = gradient(32, 24);
        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Fixed(0));
        wp.warp(&img, IDENTITY_PARAM);

        let res = wp.result();
        // One border pixel per stage corner expansion.
        assert!(res.width() >= 32 && res.width() <= 38);
        assert!(res.height() >= 24 && res.height() <= 30);

        // Sample a handful of interior pixels through the forward map.
        let t = wp.forward_transform();
        for (x, y) in [(8, 8), (16, 12), (25, 15)] {
            let p = transform_apply(t, [f64::from(x) + 0.5, f64::from(y) + 0.5]);
            let rx = p[0] as usize;
            let ry = p[1] as usize;
            let got = res.pixel_u8(rx, ry);
            let want = img.pixel_u8(x as usize, y as usize);
            assert!(
                (i32::from(got) - i32::from(want)).abs() <= 2,
                "({x},{y}) -> ({rx},{ry}): {got} vs {want}"
            );
        }
    }

    #[test]
    fn fixed_background_fills_margin() {
        let img = gradient(20, 20);
        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Fixed(7));
        wp.warp(&img, IDENTITY_PARAM);

        let res = wp.result();
        assert_eq!(7, res.pixel_u8(0, 0));
        assert_eq!(7, res.pixel_u8(res.width() - 1, res.height() - 1));
    }

    #[test]
    fn repeat_background_extends_edges() {
        let mut img = Image::new_gray(20, 20, DataType::U8);
        img.data_u8_mut().fill(123);
        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Repeat);
        wp.warp(&img, IDENTITY_PARAM);

        let res = wp.result();
        assert_eq!(123, res.pixel_u8(0, 0));
        assert_eq!(123, res.pixel_u8(res.width() - 1, 0));
    }

    #[test]
    fn tilt_contracts_horizontally() {
        let img = gradient(64, 40);
        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Fixed(0));
        wp.warp(&img, WarpParam { scale: 1.0, planar_angle: 0.0, tilt: 2.0, tilt_angle: 0.0 });

        let res = wp.result();
        assert!(res.width() < 45, "tilt 2 should roughly halve width, got {}", res.width());
        assert!(res.height() >= 40);
    }

    #[test]
    fn quarter_rotation_swaps_extents() {
        let img = gradient(60, 20);
        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Fixed(0));
        wp.warp(
            &img,
            WarpParam {
                scale: 1.0,
                planar_angle: std::f32::consts::FRAC_PI_2,
                tilt: 1.0,
                tilt_angle: 0.0,
            },
        );

        let res = wp.result();
        assert!(res.height() > res.width());
        assert!(res.height() >= 60);
    }

    #[test]
    fn forward_and_inverse_compose_to_identity() {
        let img = gradient(48, 36);
        let mut wp = AffineWarpProcessor::new();
        wp.warp(
            &img,
            WarpParam { scale: 1.3, planar_angle: 0.4, tilt: 1.5, tilt_angle: 0.2 },
        );

        let fwd = wp.forward_transform();
        let inv = wp.inverse_transform();
        for p in [[5.0, 7.0], [20.0, 30.0], [47.0, 0.0]] {
            let q = transform_apply(inv, transform_apply(fwd, p));
            assert!((q[0] - p[0]).abs() < 1e-6);
            assert!((q[1] - p[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn noise_background_runs() {
        let img = gradient(24, 24);
        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Noise);
        wp.warp(&img, IDENTITY_PARAM);
        assert!(!wp.result().is_empty());
    }

    #[test]
    fn post_blur_smooths_result() {
        let mut img = Image::new_gray(33, 33, DataType::U8);
        {
            let stride = img.row_stride();
            let data = img.data_u8_mut();
            data[16 * stride + 16] = 255;
        }

        let mut wp = AffineWarpProcessor::new();
        wp.set_bg_mode(BgMode::Fixed(0));
        wp.set_post_blur_sigma(2.0);
        wp.warp(&img, IDENTITY_PARAM);

        // The impulse is spread out: nothing stays anywhere near 255.
        assert!(wp.result().data_u8().iter().all(|&v| v < 100));
    }
}
