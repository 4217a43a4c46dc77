// Detector output record. Integer coordinates are level-local pixels, the
// sub-pixel refinements sit beside them, and the projections below map both
// back into original-image coordinates through the level scale.

use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Keypoint {
    pub x: i32,
    pub y: i32,

    pub xs: f32,
    pub ys: f32,

    pub level: i32,
    pub scale: f32,
    pub sigma: f32,

    pub score: f32,
    /// Orientation in radians.
    pub ori: f32,

    pub id: u64,
}

impl Keypoint {
    #[must_use]
    pub fn x0(&self) -> i32 {
        (self.x as f32 * self.scale) as i32
    }

    #[must_use]
    pub fn y0(&self) -> i32 {
        (self.y as f32 * self.scale) as i32
    }

    #[must_use]
    pub fn xs0(&self) -> f32 {
        self.xs * self.scale
    }

    #[must_use]
    pub fn ys0(&self) -> f32 {
        self.ys * self.scale
    }
}

/// Writes keypoints as raw binary records: every field in declaration order
/// using native endianness.
pub fn write_keypoints<W: Write>(keys: &[Keypoint], stream: &mut W) -> io::Result<()> {
    for key in keys {
        stream.write_all(&key.x.to_ne_bytes())?;
        stream.write_all(&key.y.to_ne_bytes())?;
        stream.write_all(&key.xs.to_ne_bytes())?;
        stream.write_all(&key.ys.to_ne_bytes())?;
        stream.write_all(&key.level.to_ne_bytes())?;
        stream.write_all(&key.scale.to_ne_bytes())?;
        stream.write_all(&key.sigma.to_ne_bytes())?;
        stream.write_all(&key.score.to_ne_bytes())?;
        stream.write_all(&key.ori.to_ne_bytes())?;
        stream.write_all(&key.id.to_ne_bytes())?;
    }
    Ok(())
}

/// Reads back `n` keypoint records written by [`write_keypoints`].
pub fn read_keypoints<R: Read>(n: usize, stream: &mut R) -> io::Result<Vec<Keypoint>> {
    fn read_i32<R: Read>(stream: &mut R) -> io::Result<i32> {
        let mut b = [0u8; 4];
        stream.read_exact(&mut b)?;
        Ok(i32::from_ne_bytes(b))
    }
    fn read_f32<R: Read>(stream: &mut R) -> io::Result<f32> {
        let mut b = [0u8; 4];
        stream.read_exact(&mut b)?;
        Ok(f32::from_ne_bytes(b))
    }
    fn read_u64<R: Read>(stream: &mut R) -> io::Result<u64> {
        let mut b = [0u8; 8];
        stream.read_exact(&mut b)?;
        Ok(u64::from_ne_bytes(b))
    }

    let mut keys = Vec::with_capacity(n);
    for _ in 0..n {
        keys.push(Keypoint {
            x: read_i32(stream)?,
            y: read_i32(stream)?,
            xs: read_f32(stream)?,
            ys: read_f32(stream)?,
            level: read_i32(stream)?,
            scale: read_f32(stream)?,
            sigma: read_f32(stream)?,
            score: read_f32(stream)?,
            ori: read_f32(stream)?,
            id: read_u64(stream)?,
        });
    }
    Ok(keys)
}

/// Multiplier nudging a detector threshold so that the keypoint count drifts
/// towards `max_n_keys` across frames. Shared by the FAST and Harris
/// detectors.
#[must_use]
pub fn threshold_adapt_factor(n_keys: usize, max_n_keys: usize) -> f32 {
    let n = n_keys as f32;
    let max = max_n_keys as f32;

    if n > 1.7 * max {
        4.0
    } else if n > 1.4 * max {
        1.9
    } else if n > 1.1 * max {
        1.2
    } else if n > max {
        1.02
    } else if n < 0.5 * max {
        0.25
    } else if n < 0.9 * max {
        0.6
    } else if n < 0.95 * max {
        0.9
    } else if n < 0.99 * max {
        0.97
    } else {
        1.0
    }
}
