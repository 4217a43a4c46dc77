// 2-D raster over a typed pixel block. Grayscale or RGBA, u8 or f32 lanes,
// row stride in elements. All pixel loops live here; the per-lane
// specialisation happens once per operation at the match boundary, never
// inside the inner loops.

use derive_more::Display;

use crate::filter;
use crate::mem::{Block, DataType};

const TAG: &str = "image";

// Truncated-kernel mass the Gaussian smoothers are allowed to lose.
const SMOOTH_KERNEL_LOSS: f64 = 0.003;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    #[display(fmt = "grayscale")]
    Grayscale,
    #[display(fmt = "rgba")]
    Rgba,
}

impl ImageType {
    #[must_use]
    pub const fn n_channels(self) -> usize {
        match self {
            Self::Grayscale => 1,
            Self::Rgba => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Image {
    width: usize,
    height: usize,
    typ: ImageType,
    row_stride: usize,
    block: Block,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            typ: ImageType::Grayscale,
            row_stride: 0,
            block: Block::new(DataType::U8),
        }
    }
}

impl Image {
    #[must_use]
    pub fn new(width: usize, height: usize, typ: ImageType, dtype: DataType) -> Self {
        let mut img = Self::default();
        img.resize(width, height, 0, typ, dtype);
        img
    }

    #[must_use]
    pub fn new_gray(width: usize, height: usize, dtype: DataType) -> Self {
        Self::new(width, height, ImageType::Grayscale, dtype)
    }

    #[must_use]
    pub fn new_rgba(width: usize, height: usize, dtype: DataType) -> Self {
        Self::new(width, height, ImageType::Rgba, dtype)
    }

    #[must_use]
    pub fn new_like(src: &Self) -> Self {
        Self::new(src.width, src.height, src.typ, src.dtype())
    }

    /// Builds an image over caller-provided u8 pixels without copying.
    #[must_use]
    pub fn wrap_u8(
        data: Vec<u8>,
        width: usize,
        height: usize,
        row_stride: usize,
        typ: ImageType,
    ) -> Self {
        let row_stride = row_stride.max(width * typ.n_channels());
        if data.len() < row_stride * height {
            fatal!(
                TAG,
                "wrapped buffer holds {} elements, {}x{} with stride {} needs {}",
                data.len(),
                width,
                height,
                row_stride,
                row_stride * height
            );
        }
        Self { width, height, typ, row_stride, block: Block::wrap_u8(data) }
    }

    /// Builds an image over caller-provided f32 pixels without copying.
    #[must_use]
    pub fn wrap_f32(
        data: Vec<f32>,
        width: usize,
        height: usize,
        row_stride: usize,
        typ: ImageType,
    ) -> Self {
        let row_stride = row_stride.max(width * typ.n_channels());
        if data.len() < row_stride * height {
            fatal!(
                TAG,
                "wrapped buffer holds {} elements, {}x{} with stride {} needs {}",
                data.len(),
                width,
                height,
                row_stride,
                row_stride * height
            );
        }
        Self { width, height, typ, row_stride, block: Block::wrap_f32(data) }
    }

    /// Copies a rectangle of `src` into a new image of the same type.
    #[must_use]
    pub fn sub_rect_of(src: &Self, tl_x: usize, tl_y: usize, width: usize, height: usize) -> Self {
        if tl_x + width > src.width || tl_y + height > src.height {
            fatal!(
                TAG,
                "sub rect {}x{}+{}+{} exceeds source {}x{}",
                width,
                height,
                tl_x,
                tl_y,
                src.width,
                src.height
            );
        }

        let n_ch = src.typ.n_channels();
        let mut out = Self::new(width, height, src.typ, src.dtype());
        for y in 0..height {
            let so = (tl_y + y) * src.row_stride + tl_x * n_ch;
            let d_o = y * out.row_stride;
            match src.dtype() {
                DataType::U8 => out.block.as_u8_mut()[d_o..d_o + width * n_ch]
                    .copy_from_slice(&src.block.as_u8()[so..so + width * n_ch]),
                DataType::F32 => out.block.as_f32_mut()[d_o..d_o + width * n_ch]
                    .copy_from_slice(&src.block.as_f32()[so..so + width * n_ch]),
            }
        }
        out
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub const fn row_stride(&self) -> usize {
        self.row_stride
    }

    #[must_use]
    pub const fn typ(&self) -> ImageType {
        self.typ
    }

    #[must_use]
    pub const fn dtype(&self) -> DataType {
        self.block.dtype()
    }

    #[must_use]
    pub const fn n_channels(&self) -> usize {
        self.typ.n_channels()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Reshapes to `(width, height, row_stride, typ, dtype)`, growing the
    /// backing block as needed. A matching shape is a no-op; a `row_stride`
    /// below the minimum is bumped to `width * channels`.
    pub fn resize(
        &mut self,
        width: usize,
        height: usize,
        row_stride: usize,
        typ: ImageType,
        dtype: DataType,
    ) {
        let row_stride = row_stride.max(width * typ.n_channels());
        if self.width == width
            && self.height == height
            && self.row_stride == row_stride
            && self.typ == typ
            && self.dtype() == dtype
        {
            return;
        }

        self.block.resize(row_stride * height, dtype);
        self.width = width;
        self.height = height;
        self.typ = typ;
        self.row_stride = row_stride;
    }

    pub fn resize_like(&mut self, src: &Self) {
        self.resize(src.width, src.height, 0, src.typ, src.dtype());
    }

    /// Drops the pixels and returns to the empty grayscale shape.
    pub fn release(&mut self) {
        self.block.release();
        self.width = 0;
        self.height = 0;
        self.typ = ImageType::Grayscale;
        self.row_stride = 0;
    }

    /// Duplicates pixel contents and shape, stride included.
    pub fn copy_from(&mut self, src: &Self) {
        self.block.copy_from(&src.block);
        self.width = src.width;
        self.height = src.height;
        self.typ = src.typ;
        self.row_stride = src.row_stride;
    }

    pub fn set_zero(&mut self) {
        self.block.set_zero();
    }

    /// Exchanges two images including their backing blocks.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    #[must_use]
    pub fn data_u8(&self) -> &[u8] {
        self.block.as_u8()
    }

    pub fn data_u8_mut(&mut self) -> &mut [u8] {
        self.block.as_u8_mut()
    }

    #[must_use]
    pub fn data_f32(&self) -> &[f32] {
        self.block.as_f32()
    }

    pub fn data_f32_mut(&mut self) -> &mut [f32] {
        self.block.as_f32_mut()
    }

    #[must_use]
    pub fn row_u8(&self, y: usize) -> &[u8] {
        let start = y * self.row_stride;
        &self.block.as_u8()[start..start + self.width * self.n_channels()]
    }

    #[must_use]
    pub fn pixel_u8(&self, x: usize, y: usize) -> u8 {
        self.block.as_u8()[y * self.row_stride + x]
    }

    /// Converts in place between grayscale and RGBA, keeping the data type.
    /// A no-op on matching types and on empty images.
    pub fn convert_type(&mut self, typ: ImageType) {
        if self.typ == typ || self.block.is_empty() {
            return;
        }

        let src = self.clone();
        self.resize(src.width, src.height, 0, typ, src.dtype());
        match (src.typ, typ) {
            (ImageType::Grayscale, ImageType::Rgba) => convert_gray_to_rgba(self, &src),
            (ImageType::Rgba, ImageType::Grayscale) => convert_rgba_to_gray(self, &src),
            _ => unreachable!("conversion between equal types handled above"),
        }
    }

    /// Bilinear sample of a grayscale u8 image with boundary clamping.
    #[must_use]
    pub fn sample_bilinear(&self, xs: f32, ys: f32) -> u8 {
        self.assert_grayscale();

        let xs = xs.clamp(0.0, (self.width - 1) as f32);
        let ys = ys.clamp(0.0, (self.height - 1) as f32);
        let xi = xs as usize;
        let yi = ys as usize;
        let dx = xs - xi as f32;
        let dy = ys - yi as f32;
        let x1 = (xi + 1).min(self.width - 1);
        let y1 = (yi + 1).min(self.height - 1);

        let data = self.block.as_u8();
        let i00 = f32::from(data[yi * self.row_stride + xi]);
        let i10 = f32::from(data[yi * self.row_stride + x1]);
        let i01 = f32::from(data[y1 * self.row_stride + xi]);
        let i11 = f32::from(data[y1 * self.row_stride + x1]);

        let v = (i00 * (1.0 - dx) + i10 * dx) * (1.0 - dy) + (i01 * (1.0 - dx) + i11 * dx) * dy;
        v.clamp(0.0, 255.0) as u8
    }

    pub(crate) fn assert_grayscale(&self) {
        if self.typ != ImageType::Grayscale {
            fatal!(TAG, "image must be grayscale, got {}", self.typ);
        }
    }

    pub(crate) fn assert_grayscale_u8(&self) {
        self.assert_grayscale();
        if self.dtype() != DataType::U8 {
            fatal!(TAG, "image must hold u8 pixels, got {}", self.dtype());
        }
    }
}

// Per-lane arithmetic for the pixel loops. u8 results are rounded and
// clamped, f32 passes through.
trait Lane: Copy + Sized {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
    fn data(img: &Image) -> &[Self];
    fn data_mut(img: &mut Image) -> &mut [Self];
}

impl Lane for u8 {
    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as Self
    }

    fn data(img: &Image) -> &[Self] {
        img.block.as_u8()
    }

    fn data_mut(img: &mut Image) -> &mut [Self] {
        img.block.as_u8_mut()
    }
}

impl Lane for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v
    }

    fn data(img: &Image) -> &[Self] {
        img.block.as_f32()
    }

    fn data_mut(img: &mut Image) -> &mut [Self] {
        img.block.as_f32_mut()
    }
}

fn convert_gray_to_rgba(dest: &mut Image, src: &Image) {
    match src.dtype() {
        DataType::U8 => {
            let s = src.block.as_u8();
            let ds = dest.row_stride;
            let d = dest.block.as_u8_mut();
            for y in 0..src.height {
                let so = y * src.row_stride;
                let d_o = y * ds;
                for x in 0..src.width {
                    let g = s[so + x];
                    d[d_o + 4 * x] = g;
                    d[d_o + 4 * x + 1] = g;
                    d[d_o + 4 * x + 2] = g;
                    d[d_o + 4 * x + 3] = 255;
                }
            }
        }
        DataType::F32 => {
            let s = src.block.as_f32();
            let ds = dest.row_stride;
            let d = dest.block.as_f32_mut();
            for y in 0..src.height {
                let so = y * src.row_stride;
                let d_o = y * ds;
                for x in 0..src.width {
                    let g = s[so + x];
                    d[d_o + 4 * x] = g;
                    d[d_o + 4 * x + 1] = g;
                    d[d_o + 4 * x + 2] = g;
                    d[d_o + 4 * x + 3] = 1.0;
                }
            }
        }
    }
}

#[must_use]
pub fn rgb_to_gray_u8(r: u8, g: u8, b: u8) -> u8 {
    let gray = f32::from(r) * 0.3 + f32::from(g) * 0.59 + f32::from(b) * 0.11;
    gray.clamp(0.0, 255.0) as u8
}

#[must_use]
pub fn rgb_to_gray_f32(r: f32, g: f32, b: f32) -> f32 {
    (r * 0.3 + g * 0.59 + b * 0.11).clamp(0.0, 1.0)
}

fn convert_rgba_to_gray(dest: &mut Image, src: &Image) {
    match src.dtype() {
        DataType::U8 => {
            let s = src.block.as_u8();
            let ds = dest.row_stride;
            let d = dest.block.as_u8_mut();
            for y in 0..src.height {
                let so = y * src.row_stride;
                let d_o = y * ds;
                for x in 0..src.width {
                    d[d_o + x] = rgb_to_gray_u8(s[so + 4 * x], s[so + 4 * x + 1], s[so + 4 * x + 2]);
                }
            }
        }
        DataType::F32 => {
            let s = src.block.as_f32();
            let ds = dest.row_stride;
            let d = dest.block.as_f32_mut();
            for y in 0..src.height {
                let so = y * src.row_stride;
                let d_o = y * ds;
                for x in 0..src.width {
                    d[d_o + x] =
                        rgb_to_gray_f32(s[so + 4 * x], s[so + 4 * x + 1], s[so + 4 * x + 2]);
                }
            }
        }
    }
}

/// Resamples a grayscale image by `scale_f`, producing a
/// `trunc(f*w) x trunc(f*h)` output by bilinear interpolation with
/// nearest-neighbour clamping at the borders.
pub fn scale(dest: &mut Image, src: &Image, scale_f: f32) {
    src.assert_grayscale();

    let dw = (src.width as f32 * scale_f) as usize;
    let dh = (src.height as f32 * scale_f) as usize;
    dest.resize(dw, dh, 0, src.typ, src.dtype());

    match src.dtype() {
        DataType::U8 => scale_lane::<u8>(dest, src, scale_f),
        DataType::F32 => scale_lane::<f32>(dest, src, scale_f),
    }
}

fn scale_lane<T: Lane>(dest: &mut Image, src: &Image, scale_f: f32) {
    let (dw, dh, ds) = (dest.width, dest.height, dest.row_stride);
    let (sw, sh, ss) = (src.width, src.height, src.row_stride);
    let inv_scale = 1.0 / scale_f;

    let s = T::data(src);
    let d = T::data_mut(dest);
    for y in 0..dh {
        let yp = y as f32 * inv_scale;
        let yi = (yp as usize).min(sh - 1);
        let dy = yp - yi as f32;
        let y1 = (yi + 1).min(sh - 1);

        for x in 0..dw {
            let xp = x as f32 * inv_scale;
            let xi = (xp as usize).min(sw - 1);
            let dx = xp - xi as f32;
            let x1 = (xi + 1).min(sw - 1);

            let i00 = s[yi * ss + xi].to_f32();
            let i10 = s[yi * ss + x1].to_f32();
            let i01 = s[y1 * ss + xi].to_f32();
            let i11 = s[y1 * ss + x1].to_f32();

            let v =
                (i00 * (1.0 - dx) + i10 * dx) * (1.0 - dy) + (i01 * (1.0 - dx) + i11 * dx) * dy;
            d[y * ds + x] = T::from_f32(v);
        }
    }
}

/// Exact 2x decimation taking the `(2x, 2y)` samples.
pub fn downsample(dest: &mut Image, src: &Image) {
    src.assert_grayscale();

    let dw = src.width / 2;
    let dh = src.height / 2;
    dest.resize(dw, dh, 0, src.typ, src.dtype());

    match src.dtype() {
        DataType::U8 => downsample_lane::<u8>(dest, src),
        DataType::F32 => downsample_lane::<f32>(dest, src),
    }
}

fn downsample_lane<T: Lane>(dest: &mut Image, src: &Image) {
    let (dw, dh, ds) = (dest.width, dest.height, dest.row_stride);
    let ss = src.row_stride;
    let s = T::data(src);
    let d = T::data_mut(dest);
    for y in 0..dh {
        for x in 0..dw {
            d[y * ds + x] = s[2 * y * ss + 2 * x];
        }
    }
}

// [1, 6, 11, 6, 1] / 25 with mirrored 3-tap variants at the two borders.
const AA_NORM: f32 = 1.0 / 25.0;

/// Anti-aliased 2x decimation along x. Height is unchanged.
pub fn downsample_aa_x(dest: &mut Image, src: &Image) {
    src.assert_grayscale();

    dest.resize(src.width / 2, src.height, 0, src.typ, src.dtype());
    if dest.width < 2 {
        fatal!(TAG, "aa decimation needs a source at least 4 wide, got {}", src.width);
    }

    match src.dtype() {
        DataType::U8 => downsample_aa_x_lane::<u8>(dest, src),
        DataType::F32 => downsample_aa_x_lane::<f32>(dest, src),
    }
}

fn downsample_aa_x_lane<T: Lane>(dest: &mut Image, src: &Image) {
    let (dw, dh, ds) = (dest.width, dest.height, dest.row_stride);
    let (sw, ss) = (src.width, src.row_stride);
    let s = T::data(src);
    let d = T::data_mut(dest);

    for y in 0..dh {
        let sr = &s[y * ss..y * ss + sw];
        let dr = &mut d[y * ds..y * ds + dw];

        dr[0] = T::from_f32(
            (2.0 * sr[2].to_f32() + 12.0 * sr[1].to_f32() + 11.0 * sr[0].to_f32()) * AA_NORM,
        );
        for x in 1..dw - 1 {
            let sum = sr[2 * x - 2].to_f32()
                + sr[2 * x + 2].to_f32()
                + 6.0 * (sr[2 * x - 1].to_f32() + sr[2 * x + 1].to_f32())
                + 11.0 * sr[2 * x].to_f32();
            dr[x] = T::from_f32(sum * AA_NORM);
        }
        let tw = 2 * dw;
        let last = if tw == sw {
            (sr[tw - 4].to_f32()
                + 6.0 * (sr[tw - 3].to_f32() + sr[tw - 1].to_f32())
                + 12.0 * sr[tw - 2].to_f32())
                * AA_NORM
        } else {
            (sr[tw - 4].to_f32()
                + sr[tw].to_f32()
                + 6.0 * (sr[tw - 3].to_f32() + sr[tw - 1].to_f32())
                + 11.0 * sr[tw - 2].to_f32())
                * AA_NORM
        };
        dr[dw - 1] = T::from_f32(last);
    }
}

/// Anti-aliased 2x decimation along y. Width is unchanged.
pub fn downsample_aa_y(dest: &mut Image, src: &Image) {
    src.assert_grayscale();

    dest.resize(src.width, src.height / 2, 0, src.typ, src.dtype());
    if dest.height < 2 {
        fatal!(TAG, "aa decimation needs a source at least 4 tall, got {}", src.height);
    }

    match src.dtype() {
        DataType::U8 => downsample_aa_y_lane::<u8>(dest, src),
        DataType::F32 => downsample_aa_y_lane::<f32>(dest, src),
    }
}

fn downsample_aa_y_lane<T: Lane>(dest: &mut Image, src: &Image) {
    let (dw, dh, ds) = (dest.width, dest.height, dest.row_stride);
    let (sh, ss) = (src.height, src.row_stride);
    let s = T::data(src);
    let d = T::data_mut(dest);

    for x in 0..dw {
        d[x] = T::from_f32(
            (2.0 * s[2 * ss + x].to_f32() + 12.0 * s[ss + x].to_f32() + 11.0 * s[x].to_f32())
                * AA_NORM,
        );
        for y in 1..dh - 1 {
            let sum = s[(2 * y - 2) * ss + x].to_f32()
                + s[(2 * y + 2) * ss + x].to_f32()
                + 6.0 * (s[(2 * y - 1) * ss + x].to_f32() + s[(2 * y + 1) * ss + x].to_f32())
                + 11.0 * s[2 * y * ss + x].to_f32();
            d[y * ds + x] = T::from_f32(sum * AA_NORM);
        }
        let th = 2 * dh;
        let last = if th == sh {
            (s[(th - 4) * ss + x].to_f32()
                + 6.0 * (s[(th - 3) * ss + x].to_f32() + s[(th - 1) * ss + x].to_f32())
                + 12.0 * s[(th - 2) * ss + x].to_f32())
                * AA_NORM
        } else {
            (s[(th - 4) * ss + x].to_f32()
                + s[th * ss + x].to_f32()
                + 6.0 * (s[(th - 3) * ss + x].to_f32() + s[(th - 1) * ss + x].to_f32())
                + 11.0 * s[(th - 2) * ss + x].to_f32())
                * AA_NORM
        };
        d[(dh - 1) * ds + x] = T::from_f32(last);
    }
}

/// Ensures the caller scratch (or a fresh one) can hold one row or column
/// plus mirrored borders for the given sigmas.
pub fn filter_scratch_for(width: usize, height: usize, sigma_x: f32, sigma_y: f32) -> Vec<f32> {
    let nkx = filter::gaussian_kernel_min_size(sigma_x, SMOOTH_KERNEL_LOSS);
    let nky = filter::gaussian_kernel_min_size(sigma_y, SMOOTH_KERNEL_LOSS);
    let nk_max = nkx.max(nky);
    filter::buffer_alloc(width.max(height), nk_max / 2)
}

/// Separable Gaussian smoothing with mirrored borders. The output has the
/// source's shape. For u8 images intermediate accumulation happens in f32
/// and the result is rounded and clamped. `scratch` is reused when provided
/// and grown as needed; `None` allocates one for this call.
pub fn smooth(
    dest: &mut Image,
    src: &Image,
    sigma_x: f32,
    sigma_y: f32,
    scratch: Option<&mut Vec<f32>>,
) {
    src.assert_grayscale();

    dest.resize(src.width, src.height, 0, src.typ, src.dtype());

    let mut local;
    let buffer = match scratch {
        Some(b) => b,
        None => {
            local = Vec::new();
            &mut local
        }
    };

    let nkx = filter::gaussian_kernel_min_size(sigma_x, SMOOTH_KERNEL_LOSS);
    let nky = filter::gaussian_kernel_min_size(sigma_y, SMOOTH_KERNEL_LOSS);
    let nk_max = nkx.max(nky);
    let needed = src.width.max(src.height) + 2 * (nk_max / 2);
    if buffer.len() < needed {
        buffer.resize(needed, 0.0);
    }
    let mut kernel = vec![0.0f32; nk_max / 2 + 1];

    // x direction: src rows into dest rows.
    let nk = nkx / 2 + 1;
    filter::gaussian_sym_kernel(nk, &mut kernel, sigma_x);
    for y in 0..src.height {
        match src.dtype() {
            DataType::U8 => {
                filter::copy_to_buffer1_u8(src.width, buffer, src.row_u8(y), nkx / 2);
            }
            DataType::F32 => {
                let start = y * src.row_stride;
                filter::copy_to_buffer1_f32(
                    src.width,
                    buffer,
                    &src.data_f32()[start..start + src.width],
                    nkx / 2,
                );
            }
        }
        filter::convolve_sym(src.width, buffer, &kernel[..nk]);
        write_row(dest, y, &buffer[..src.width]);
    }

    // y direction: dest columns in place.
    let nk = nky / 2 + 1;
    filter::gaussian_sym_kernel(nk, &mut kernel, sigma_y);
    smooth_columns(dest, buffer, &kernel[..nk], nky / 2);
}

/// In-place variant of [`smooth`].
pub fn smooth_inplace(
    img: &mut Image,
    sigma_x: f32,
    sigma_y: f32,
    scratch: Option<&mut Vec<f32>>,
) {
    img.assert_grayscale();

    let mut local;
    let buffer = match scratch {
        Some(b) => b,
        None => {
            local = Vec::new();
            &mut local
        }
    };

    let nkx = filter::gaussian_kernel_min_size(sigma_x, SMOOTH_KERNEL_LOSS);
    let nky = filter::gaussian_kernel_min_size(sigma_y, SMOOTH_KERNEL_LOSS);
    let nk_max = nkx.max(nky);
    let needed = img.width.max(img.height) + 2 * (nk_max / 2);
    if buffer.len() < needed {
        buffer.resize(needed, 0.0);
    }
    let mut kernel = vec![0.0f32; nk_max / 2 + 1];

    let nk = nkx / 2 + 1;
    filter::gaussian_sym_kernel(nk, &mut kernel, sigma_x);
    for y in 0..img.height {
        match img.dtype() {
            DataType::U8 => filter::copy_to_buffer1_u8(img.width, buffer, img.row_u8(y), nkx / 2),
            DataType::F32 => {
                let start = y * img.row_stride;
                filter::copy_to_buffer1_f32(
                    img.width,
                    buffer,
                    &img.data_f32()[start..start + img.width],
                    nkx / 2,
                );
            }
        }
        filter::convolve_sym(img.width, buffer, &kernel[..nk]);
        write_row(img, y, &buffer[..img.width]);
    }

    let nk = nky / 2 + 1;
    filter::gaussian_sym_kernel(nk, &mut kernel, sigma_y);
    smooth_columns(img, buffer, &kernel[..nk], nky / 2);
}

fn write_row(img: &mut Image, y: usize, values: &[f32]) {
    let start = y * img.row_stride;
    match img.dtype() {
        DataType::U8 => {
            let row = &mut img.block.as_u8_mut()[start..start + values.len()];
            for (d, &v) in row.iter_mut().zip(values) {
                *d = u8::from_f32(v);
            }
        }
        DataType::F32 => {
            img.block.as_f32_mut()[start..start + values.len()].copy_from_slice(values);
        }
    }
}

fn smooth_columns(img: &mut Image, buffer: &mut [f32], kernel: &[f32], n_border: usize) {
    let (w, h, stride) = (img.width, img.height, img.row_stride);
    for x in 0..w {
        match img.dtype() {
            DataType::U8 => {
                filter::copy_to_buffer_u8(h, buffer, &img.block.as_u8()[x..], stride, n_border);
            }
            DataType::F32 => {
                filter::copy_to_buffer_f32(h, buffer, &img.block.as_f32()[x..], stride, n_border);
            }
        }
        filter::convolve_sym(h, buffer, kernel);
        match img.dtype() {
            DataType::U8 => {
                let data = img.block.as_u8_mut();
                for y in 0..h {
                    data[y * stride + x] = u8::from_f32(buffer[y]);
                }
            }
            DataType::F32 => {
                let data = img.block.as_f32_mut();
                for y in 0..h {
                    data[y * stride + x] = buffer[y];
                }
            }
        }
    }
}

/// Centred-difference x derivative into an f32 image. Borders are zero;
/// u8 sources are additionally normalised by 255.
pub fn deriv_x(dest: &mut Image, src: &Image) {
    src.assert_grayscale();

    dest.resize(src.width, src.height, 0, src.typ, DataType::F32);
    dest.set_zero();
    if src.width < 3 || src.height < 3 {
        return;
    }

    let divisor = match src.dtype() {
        DataType::U8 => 2.0 * 255.0,
        DataType::F32 => 2.0,
    };
    let ds = dest.row_stride;
    let ss = src.row_stride;
    match src.dtype() {
        DataType::U8 => {
            let s = src.data_u8();
            let d = dest.data_f32_mut();
            for y in 1..src.height - 1 {
                for x in 1..src.width - 1 {
                    d[y * ds + x] =
                        (f32::from(s[y * ss + x + 1]) - f32::from(s[y * ss + x - 1])) / divisor;
                }
            }
        }
        DataType::F32 => {
            let s = src.data_f32();
            let d = dest.data_f32_mut();
            for y in 1..src.height - 1 {
                for x in 1..src.width - 1 {
                    d[y * ds + x] = (s[y * ss + x + 1] - s[y * ss + x - 1]) / divisor;
                }
            }
        }
    }
}

/// Centred-difference y derivative into an f32 image. Borders are zero;
/// u8 sources are additionally normalised by 255.
pub fn deriv_y(dest: &mut Image, src: &Image) {
    src.assert_grayscale();

    dest.resize(src.width, src.height, 0, src.typ, DataType::F32);
    dest.set_zero();
    if src.width < 3 || src.height < 3 {
        return;
    }

    let divisor = match src.dtype() {
        DataType::U8 => 2.0 * 255.0,
        DataType::F32 => 2.0,
    };
    let ds = dest.row_stride;
    let ss = src.row_stride;
    match src.dtype() {
        DataType::U8 => {
            let s = src.data_u8();
            let d = dest.data_f32_mut();
            for y in 1..src.height - 1 {
                for x in 1..src.width - 1 {
                    d[y * ds + x] =
                        (f32::from(s[(y + 1) * ss + x]) - f32::from(s[(y - 1) * ss + x])) / divisor;
                }
            }
        }
        DataType::F32 => {
            let s = src.data_f32();
            let d = dest.data_f32_mut();
            for y in 1..src.height - 1 {
                for x in 1..src.width - 1 {
                    d[y * ds + x] = (s[(y + 1) * ss + x] - s[(y - 1) * ss + x]) / divisor;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_gray(w: usize, h: usize) -> Image {
        let mut img = Image::new_gray(w, h, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..h {
            for x in 0..w {
                data[y * stride + x] = ((x * 7 + y * 13) % 256) as u8;
            }
        }
        img
    }

    #[test]
    fn new_zero_size_is_legal() {
        let img = Image::new_gray(0, 0, DataType::U8);
        assert!(img.is_empty());
        assert_eq!(0, img.row_stride());
    }

    #[test]
    fn resize_matching_shape_is_noop() {
        let mut img = gradient_gray(8, 8);
        let before = img.pixel_u8(3, 3);
        img.resize(8, 8, 0, ImageType::Grayscale, DataType::U8);
        assert_eq!(before, img.pixel_u8(3, 3));
    }

    #[test]
    fn copy_preserves_pixels_and_stride() {
        let src = gradient_gray(9, 5);
        let mut dest = Image::default();
        dest.copy_from(&src);
        assert_eq!(src.row_stride(), dest.row_stride());
        assert_eq!(src.data_u8(), dest.data_u8());
    }

    #[test]
    fn swap_exchanges_everything() {
        let mut a = gradient_gray(4, 4);
        let mut b = Image::new_rgba(2, 2, DataType::U8);
        a.swap(&mut b);
        assert_eq!(ImageType::Rgba, a.typ());
        assert_eq!(4, b.width());
    }

    #[test]
    fn wrap_keeps_stride() {
        let img = Image::wrap_u8(vec![5; 60], 10, 6, 10, ImageType::Grayscale);
        assert_eq!(10, img.row_stride());
        assert_eq!(5, img.pixel_u8(9, 5));
    }

    #[test]
    fn sub_rect_copies_pixels() {
        let src = gradient_gray(10, 10);
        let sub = Image::sub_rect_of(&src, 2, 3, 4, 5);
        assert_eq!((4, 5), (sub.width(), sub.height()));
        assert_eq!(src.pixel_u8(2, 3), sub.pixel_u8(0, 0));
        assert_eq!(src.pixel_u8(5, 7), sub.pixel_u8(3, 4));
    }

    #[test]
    fn gray_to_rgba_broadcasts_and_sets_alpha() {
        let mut img = gradient_gray(3, 3);
        let g = img.pixel_u8(1, 2);
        img.convert_type(ImageType::Rgba);
        let row = img.row_u8(2);
        assert_eq!([g, g, g, 255], row[4..8]);
    }

    #[test]
    fn rgba_to_gray_uses_fixed_weights() {
        let mut img = Image::new_rgba(1, 1, DataType::U8);
        img.data_u8_mut().copy_from_slice(&[100, 200, 50, 255]);
        img.convert_type(ImageType::Grayscale);
        // 0.3*100 + 0.59*200 + 0.11*50 = 153.5 -> truncated clamp
        assert_eq!(153, img.pixel_u8(0, 0));
    }

    #[test]
    fn downsample_halves_dimensions() {
        let src = gradient_gray(97, 53);
        let mut dest = Image::default();
        downsample(&mut dest, &src);
        assert_eq!((48, 26), (dest.width(), dest.height()));
        assert_eq!(src.pixel_u8(10, 8), dest.pixel_u8(5, 4));
    }

    #[test]
    fn downsample_aa_decimates_one_axis() {
        let src = gradient_gray(64, 32);
        let mut dx = Image::default();
        downsample_aa_x(&mut dx, &src);
        assert_eq!((32, 32), (dx.width(), dx.height()));

        let mut dy = Image::default();
        downsample_aa_y(&mut dy, &src);
        assert_eq!((64, 16), (dy.width(), dy.height()));
    }

    #[test]
    fn aa_kernel_preserves_flat_regions() {
        let mut src = Image::new_gray(16, 4, DataType::U8);
        src.data_u8_mut().fill(77);
        let mut dest = Image::default();
        downsample_aa_x(&mut dest, &src);
        assert!(dest.data_u8().iter().all(|&v| v == 77));
    }

    #[test]
    fn scale_truncates_target_dims() {
        let src = gradient_gray(10, 10);
        let mut dest = Image::default();
        scale(&mut dest, &src, 1.5);
        assert_eq!((15, 15), (dest.width(), dest.height()));

        scale(&mut dest, &src, 0.5);
        assert_eq!((5, 5), (dest.width(), dest.height()));
    }

    #[test]
    fn smooth_zero_sigma_is_noop() {
        let src = gradient_gray(12, 9);
        let mut dest = Image::default();
        smooth(&mut dest, &src, 0.0, 0.0, None);
        for y in 0..9 {
            assert_eq!(src.row_u8(y), dest.row_u8(y));
        }
    }

    #[test]
    fn smooth_compositions_compose_in_quadrature() {
        let mut src = Image::new_gray(41, 41, DataType::F32);
        {
            let stride = src.row_stride();
            let data = src.data_f32_mut();
            data[20 * stride + 20] = 1.0;
        }

        let mut once = Image::default();
        smooth(&mut once, &src, 1.5, 1.5, None);
        let mut twice = Image::default();
        smooth(&mut twice, &once, 2.0, 2.0, None);

        let mut direct = Image::default();
        smooth(&mut direct, &src, 2.5, 2.5, None);

        let stride = direct.row_stride();
        for y in 15..26 {
            for x in 15..26 {
                let a = twice.data_f32()[y * stride + x];
                let b = direct.data_f32()[y * stride + x];
                assert!((a - b).abs() < 2e-3, "({x},{y}): {a} vs {b}");
            }
        }
    }

    #[test]
    fn deriv_is_zero_on_borders_and_centred_inside() {
        let mut src = Image::new_gray(5, 5, DataType::F32);
        {
            let stride = src.row_stride();
            let data = src.data_f32_mut();
            for y in 0..5 {
                for x in 0..5 {
                    data[y * stride + x] = x as f32;
                }
            }
        }

        let mut dx = Image::default();
        deriv_x(&mut dx, &src);
        let stride = dx.row_stride();
        assert_eq!(0.0, dx.data_f32()[0]);
        // (x+1) - (x-1) over 2 on a unit ramp.
        assert_eq!(1.0, dx.data_f32()[2 * stride + 2]);

        let mut dy = Image::default();
        deriv_y(&mut dy, &src);
        assert_eq!(0.0, dy.data_f32()[2 * dy.row_stride() + 2]);
    }

    #[test]
    fn bilinear_sample_clamps_at_borders() {
        let src = gradient_gray(6, 6);
        assert_eq!(src.pixel_u8(0, 0), src.sample_bilinear(-1.0, -1.0));
        assert_eq!(src.pixel_u8(5, 5), src.sample_bilinear(10.0, 10.0));
        let mid = src.sample_bilinear(2.5, 2.5);
        assert!(mid > 0);
    }
}
