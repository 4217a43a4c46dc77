// Image file I/O. Loading sniffs the format from the first four magic
// bytes; saving dispatches on the filename extension. The binary PNM codec
// lives here; JPEG, PNG and ASCII PNM are delegated to the `image` crate.
// Loaders either complete the decode or leave the target image untouched.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use ::image::codecs::jpeg::JpegEncoder;
use ::image::codecs::png::PngEncoder;
use ::image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};

use crate::image::{rgb_to_gray_u8, Image, ImageType};
use crate::mem::DataType;
use crate::{Error, Result};

const TAG: &str = "image-io";

const JPEG_SAVE_QUALITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    PnmBinary,
    PnmAscii,
    Jpeg,
    Png,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    AsIs,
    Grayscale,
    Rgba,
}

/// Detects the file format from the first four bytes.
pub fn format_from_header(path: &Path) -> Result<FileFormat> {
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Ok(FileFormat::Unknown);
    }
    Ok(sniff_format(&bytes[..4]))
}

fn sniff_format(magic: &[u8]) -> FileFormat {
    match magic {
        [b'P', b'4'..=b'6', ..] => FileFormat::PnmBinary,
        [b'P', b'1'..=b'3', ..] => FileFormat::PnmAscii,
        [0xFF, 0xD8, ..] => FileFormat::Jpeg,
        [0x89, 0x50, 0x4E, 0x47] => FileFormat::Png,
        _ => FileFormat::Unknown,
    }
}

/// Picks the save format from the filename extension.
#[must_use]
pub fn format_from_filename(path: &Path) -> FileFormat {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileFormat::Unknown;
    };
    match ext.to_ascii_lowercase().as_str() {
        "pgm" | "ppm" | "pnm" => FileFormat::PnmBinary,
        "jpg" | "jpeg" => FileFormat::Jpeg,
        "png" => FileFormat::Png,
        _ => FileFormat::Unknown,
    }
}

/// Loads an image, detecting the format from the file header. `mode`
/// selects the target type; `AsIs` keeps the file's own channel layout.
pub fn load(img: &mut Image, path: &Path, mode: LoadMode) -> Result<()> {
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Err(Error::Format(format!("{} is too short to be an image", path.display())));
    }

    match sniff_format(&bytes[..4]) {
        FileFormat::PnmBinary => load_pnm_bytes(img, &bytes, mode),
        FileFormat::PnmAscii => load_via_codec(img, &bytes, ImageFormat::Pnm, mode),
        FileFormat::Jpeg => load_via_codec(img, &bytes, ImageFormat::Jpeg, mode),
        FileFormat::Png => load_via_codec(img, &bytes, ImageFormat::Png, mode),
        FileFormat::Unknown => {
            Err(Error::Format(format!("unknown image format in {}", path.display())))
        }
    }
}

/// Saves an image, dispatching on the filename extension. An unknown
/// extension falls back to binary PNM with a warning.
pub fn save(img: &Image, path: &Path) -> Result<()> {
    match format_from_filename(path) {
        FileFormat::Jpeg => save_jpeg(img, path),
        FileFormat::Png => save_png(img, path),
        FileFormat::PnmBinary => save_pnm(img, path),
        _ => {
            warn!(
                "unknown/unsupported save format, saving {} as binary PNM",
                path.display()
            );
            save_pnm(img, path)
        }
    }
}

/// [`load`] upgraded to the fatal channel.
pub fn xload(img: &mut Image, path: &Path, mode: LoadMode) {
    if let Err(e) = load(img, path, mode) {
        fatal!(TAG, "Error loading image from {}: {e}", path.display());
    }
}

/// [`save`] upgraded to the fatal channel.
pub fn xsave(img: &Image, path: &Path) {
    if let Err(e) = save(img, path) {
        fatal!(TAG, "Error saving image to {}: {e}", path.display());
    }
}

fn target_type(mode: LoadMode, file_type: ImageType) -> ImageType {
    match mode {
        LoadMode::Grayscale => ImageType::Grayscale,
        LoadMode::Rgba => ImageType::Rgba,
        LoadMode::AsIs => file_type,
    }
}

// ---------------------------------------------------------------- PNM ----

fn save_pnm(img: &Image, path: &Path) -> Result<()> {
    if img.dtype() != DataType::U8 {
        return Err(Error::Format("PNM output supports u8 images only".to_string()));
    }

    let mut out = BufWriter::new(File::create(path)?);
    match img.typ() {
        ImageType::Grayscale => {
            write!(out, "P5\n{} {} 255\n", img.width(), img.height())?;
            for y in 0..img.height() {
                out.write_all(img.row_u8(y))?;
            }
        }
        ImageType::Rgba => {
            // A is dropped on save; loading back fills it with 255.
            write!(out, "P6\n{} {}\n255\n", img.width(), img.height())?;
            for y in 0..img.height() {
                for rgba in img.row_u8(y).chunks_exact(4) {
                    out.write_all(&rgba[..3])?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

struct PnmHeader {
    typ: ImageType,
    width: usize,
    height: usize,
    data_start: usize,
}

fn parse_pnm_header(bytes: &[u8]) -> Result<PnmHeader> {
    let typ = match bytes[1] {
        b'5' => ImageType::Grayscale,
        b'6' => ImageType::Rgba,
        c => {
            return Err(Error::Format(format!(
                "unsupported binary PNM variant P{}",
                char::from(c)
            )))
        }
    };

    // Three whitespace-separated fields (width, height, maxval) follow the
    // magic, with '#' comment lines allowed in between.
    let mut fields = [0usize; 3];
    let mut n_fields = 0;
    let mut pos = 2;
    while n_fields < 3 {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b'#' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }

        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == start {
            return Err(Error::Format("could not read PNM attributes".to_string()));
        }
        let text = std::str::from_utf8(&bytes[start..pos])
            .expect("ascii digits are valid utf-8");
        fields[n_fields] = text
            .parse()
            .map_err(|_| Error::Format("PNM attribute out of range".to_string()))?;
        n_fields += 1;
    }

    if fields[2] != 255 {
        return Err(Error::Format(format!("unsupported PNM maxval {}", fields[2])));
    }

    // A single whitespace byte separates the header from the pixel data.
    if pos >= bytes.len() || !bytes[pos].is_ascii_whitespace() {
        return Err(Error::Format("PNM header is not followed by pixel data".to_string()));
    }

    Ok(PnmHeader { typ, width: fields[0], height: fields[1], data_start: pos + 1 })
}

fn load_pnm_bytes(img: &mut Image, bytes: &[u8], mode: LoadMode) -> Result<()> {
    let header = parse_pnm_header(bytes)?;
    let (w, h) = (header.width, header.height);

    let n_ch_file = match header.typ {
        ImageType::Grayscale => 1,
        ImageType::Rgba => 3,
    };
    let data = &bytes[header.data_start..];
    if data.len() < w * h * n_ch_file {
        return Err(Error::Format("PNM pixel data is truncated".to_string()));
    }

    let typ = target_type(mode, header.typ);
    img.resize(w, h, 0, typ, DataType::U8);

    let stride = img.row_stride();
    let dest = img.data_u8_mut();
    match (header.typ, typ) {
        (ImageType::Grayscale, ImageType::Grayscale) => {
            for y in 0..h {
                dest[y * stride..y * stride + w].copy_from_slice(&data[y * w..(y + 1) * w]);
            }
        }
        (ImageType::Grayscale, ImageType::Rgba) => {
            for y in 0..h {
                for x in 0..w {
                    let g = data[y * w + x];
                    let o = y * stride + 4 * x;
                    dest[o] = g;
                    dest[o + 1] = g;
                    dest[o + 2] = g;
                    dest[o + 3] = 255;
                }
            }
        }
        (ImageType::Rgba, ImageType::Grayscale) => {
            for y in 0..h {
                for x in 0..w {
                    let p = &data[(y * w + x) * 3..(y * w + x) * 3 + 3];
                    dest[y * stride + x] = rgb_to_gray_u8(p[0], p[1], p[2]);
                }
            }
        }
        (ImageType::Rgba, ImageType::Rgba) => {
            for y in 0..h {
                for x in 0..w {
                    let p = &data[(y * w + x) * 3..(y * w + x) * 3 + 3];
                    let o = y * stride + 4 * x;
                    dest[o] = p[0];
                    dest[o + 1] = p[1];
                    dest[o + 2] = p[2];
                    dest[o + 3] = 255;
                }
            }
        }
    }

    Ok(())
}

// ------------------------------------------------- codec delegation ----

fn load_via_codec(
    img: &mut Image,
    bytes: &[u8],
    format: ImageFormat,
    mode: LoadMode,
) -> Result<()> {
    let decoded = ImageReader::with_format(Cursor::new(bytes), format).decode()?;

    let file_type = if decoded.color().channel_count() <= 2 {
        ImageType::Grayscale
    } else {
        ImageType::Rgba
    };

    match target_type(mode, file_type) {
        ImageType::Grayscale => {
            let gray = decoded.to_luma8();
            let (w, h) = (gray.width() as usize, gray.height() as usize);
            img.resize(w, h, 0, ImageType::Grayscale, DataType::U8);
            let stride = img.row_stride();
            let dest = img.data_u8_mut();
            let src = gray.as_raw();
            for y in 0..h {
                dest[y * stride..y * stride + w].copy_from_slice(&src[y * w..(y + 1) * w]);
            }
        }
        ImageType::Rgba => {
            let rgba = decoded.to_rgba8();
            let (w, h) = (rgba.width() as usize, rgba.height() as usize);
            img.resize(w, h, 0, ImageType::Rgba, DataType::U8);
            let stride = img.row_stride();
            let dest = img.data_u8_mut();
            let src = rgba.as_raw();
            for y in 0..h {
                dest[y * stride..y * stride + 4 * w]
                    .copy_from_slice(&src[y * 4 * w..(y + 1) * 4 * w]);
            }
        }
    }

    Ok(())
}

// Packs the (possibly strided) pixel rows into one contiguous buffer with
// the channel count the codec wants.
fn packed_pixels(img: &Image, drop_alpha: bool) -> Vec<u8> {
    let (w, h) = (img.width(), img.height());
    match img.typ() {
        ImageType::Grayscale => {
            let mut buf = Vec::with_capacity(w * h);
            for y in 0..h {
                buf.extend_from_slice(img.row_u8(y));
            }
            buf
        }
        ImageType::Rgba => {
            let n_ch = if drop_alpha { 3 } else { 4 };
            let mut buf = Vec::with_capacity(w * h * n_ch);
            for y in 0..h {
                for rgba in img.row_u8(y).chunks_exact(4) {
                    buf.extend_from_slice(&rgba[..n_ch]);
                }
            }
            buf
        }
    }
}

fn save_jpeg(img: &Image, path: &Path) -> Result<()> {
    if img.dtype() != DataType::U8 {
        return Err(Error::Format("JPEG output supports u8 images only".to_string()));
    }

    let out = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(out, JPEG_SAVE_QUALITY);

    let (w, h) = (img.width() as u32, img.height() as u32);
    match img.typ() {
        ImageType::Grayscale => {
            encoder.write_image(&packed_pixels(img, false), w, h, ExtendedColorType::L8)?;
        }
        ImageType::Rgba => {
            encoder.write_image(&packed_pixels(img, true), w, h, ExtendedColorType::Rgb8)?;
        }
    }
    Ok(())
}

fn save_png(img: &Image, path: &Path) -> Result<()> {
    if img.dtype() != DataType::U8 {
        return Err(Error::Format("PNG output supports u8 images only".to_string()));
    }

    let out = BufWriter::new(File::create(path)?);
    let encoder = PngEncoder::new(out);

    let (w, h) = (img.width() as u32, img.height() as u32);
    match img.typ() {
        ImageType::Grayscale => {
            encoder.write_image(&packed_pixels(img, false), w, h, ExtendedColorType::L8)?;
        }
        ImageType::Rgba => {
            encoder.write_image(&packed_pixels(img, false), w, h, ExtendedColorType::Rgba8)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn gradient_gray(w: usize, h: usize) -> Image {
        let mut img = Image::new_gray(w, h, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..h {
            for x in 0..w {
                data[y * stride + x] = ((x * 11 + y * 29) % 256) as u8;
            }
        }
        img
    }

    fn gradient_rgba(w: usize, h: usize) -> Image {
        let mut img = Image::new_rgba(w, h, DataType::U8);
        let stride = img.row_stride();
        let data = img.data_u8_mut();
        for y in 0..h {
            for x in 0..w {
                let o = y * stride + 4 * x;
                data[o] = (x * 13 % 256) as u8;
                data[o + 1] = (y * 17 % 256) as u8;
                data[o + 2] = ((x + y) * 7 % 256) as u8;
                data[o + 3] = 255;
            }
        }
        img
    }

    fn pixels_equal(a: &Image, b: &Image) -> bool {
        if a.width() != b.width() || a.height() != b.height() || a.typ() != b.typ() {
            return false;
        }
        (0..a.height()).all(|y| a.row_u8(y) == b.row_u8(y))
    }

    #[test]
    fn pgm_round_trip_gray() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gray.pgm");

        let img = gradient_gray(31, 17);
        save(&img, &path).unwrap();
        assert_eq!(FileFormat::PnmBinary, format_from_header(&path).unwrap());

        let mut back = Image::default();
        load(&mut back, &path, LoadMode::AsIs).unwrap();
        assert!(pixels_equal(&img, &back));
    }

    #[test]
    fn ppm_round_trip_rgba_sets_opaque_alpha() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("color.ppm");

        let img = gradient_rgba(13, 9);
        save(&img, &path).unwrap();

        let mut back = Image::default();
        load(&mut back, &path, LoadMode::AsIs).unwrap();
        assert!(pixels_equal(&img, &back));
        assert!(back.row_u8(0).chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn png_round_trip_both_types() {
        let dir = TempDir::new().unwrap();

        for img in [gradient_gray(20, 20), gradient_rgba(20, 20)] {
            let path = dir.path().join("img.png");
            save(&img, &path).unwrap();
            assert_eq!(FileFormat::Png, format_from_header(&path).unwrap());

            let mut back = Image::default();
            load(&mut back, &path, LoadMode::AsIs).unwrap();
            assert!(pixels_equal(&img, &back));
        }
    }

    #[test]
    fn jpeg_round_trip_is_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.jpg");

        let mut img = Image::new_gray(32, 32, DataType::U8);
        img.data_u8_mut().fill(128);
        save(&img, &path).unwrap();
        assert_eq!(FileFormat::Jpeg, format_from_header(&path).unwrap());

        let mut back = Image::default();
        load(&mut back, &path, LoadMode::AsIs).unwrap();
        assert_eq!(img.width(), back.width());
        // Lossy codec: flat gray should survive nearly unchanged.
        assert!(back
            .data_u8()
            .iter()
            .all(|&v| (i32::from(v) - 128).abs() <= 3));
    }

    #[test]
    fn load_mode_forces_channel_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("color.ppm");
        save(&gradient_rgba(8, 8), &path).unwrap();

        let mut gray = Image::default();
        load(&mut gray, &path, LoadMode::Grayscale).unwrap();
        assert_eq!(ImageType::Grayscale, gray.typ());

        let path = dir.path().join("gray.pgm");
        save(&gradient_gray(8, 8), &path).unwrap();
        let mut rgba = Image::default();
        load(&mut rgba, &path, LoadMode::Rgba).unwrap();
        assert_eq!(ImageType::Rgba, rgba.typ());
        assert!(rgba.row_u8(0).chunks_exact(4).all(|p| p[0] == p[1] && p[1] == p[2]));
    }

    #[test]
    fn pnm_comments_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.pgm");
        let mut bytes = b"P5\n# a comment\n2 2 255\n".to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        fs::write(&path, bytes).unwrap();

        let mut img = Image::default();
        load(&mut img, &path, LoadMode::AsIs).unwrap();
        assert_eq!((2, 2), (img.width(), img.height()));
        assert_eq!(4, img.pixel_u8(1, 1));
    }

    #[test]
    fn failed_load_leaves_image_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pgm");
        fs::write(&path, b"P5\n9 9 255\nxx").unwrap();

        let mut img = gradient_gray(4, 4);
        let before = img.clone();
        assert!(load(&mut img, &path, LoadMode::AsIs).is_err());
        assert!(pixels_equal(&before, &img));
    }

    #[test]
    fn missing_file_is_recoverable() {
        let mut img = Image::default();
        let err = load(&mut img, Path::new("/nonexistent/img.png"), LoadMode::AsIs);
        assert!(matches!(err, Err(Error::Io(_))));
    }

    #[test]
    #[should_panic(expected = "Error loading image")]
    fn xload_upgrades_to_fatal() {
        let mut img = Image::default();
        xload(&mut img, Path::new("/nonexistent/img.png"), LoadMode::AsIs);
    }

    #[test]
    fn extension_dispatch() {
        assert_eq!(FileFormat::PnmBinary, format_from_filename(Path::new("a.pgm")));
        assert_eq!(FileFormat::PnmBinary, format_from_filename(Path::new("a.PPM")));
        assert_eq!(FileFormat::Jpeg, format_from_filename(Path::new("a.jpeg")));
        assert_eq!(FileFormat::Png, format_from_filename(Path::new("a.png")));
        assert_eq!(FileFormat::Unknown, format_from_filename(Path::new("a.webp")));
    }
}
