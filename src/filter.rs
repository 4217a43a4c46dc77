// Symmetric 1-D filtering primitives shared by image smoothing, the pyramid
// builders and the warp processor. Kernels are stored center-first: kernel[0]
// is the center tap, kernel[i] the weight at offset +/-i.

/// Smallest odd kernel size whose truncated Gaussian tails lose at most
/// `loss` of the total mass. A non-positive sigma degenerates to size 1,
/// which makes the convolution a no-op.
#[must_use]
pub fn gaussian_kernel_min_size(sigma: f32, loss: f64) -> usize {
    if sigma <= 0.0 {
        return 1;
    }

    let sigma = f64::from(sigma);
    let mut k = 1_usize;
    while gaussian_tail_mass(k as f64, sigma) > loss {
        k += 1;
    }
    2 * k + 1
}

// Mass of N(0, sigma) outside [-k, k].
fn gaussian_tail_mass(k: f64, sigma: f64) -> f64 {
    erfc(k / (sigma * std::f64::consts::SQRT_2))
}

// Abramowitz & Stegun 7.1.26, |error| < 1.5e-7. Plenty for kernel sizing.
fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.3275911 * x.abs());
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let e = poly * (-x * x).exp();
    if x >= 0.0 { e } else { 2.0 - e }
}

/// Fills `kernel[..n_k]` with the symmetric half of a normalised Gaussian.
pub fn gaussian_sym_kernel(n_k: usize, kernel: &mut [f32], sigma: f32) {
    assert!(n_k >= 1 && kernel.len() >= n_k);

    if sigma <= 0.0 {
        kernel[0] = 1.0;
        for k in &mut kernel[1..n_k] {
            *k = 0.0;
        }
        return;
    }

    let denom = 2.0 * sigma * sigma;
    for (i, k) in kernel[..n_k].iter_mut().enumerate() {
        let x = i as f32;
        *k = (-x * x / denom).exp();
    }

    let sum = kernel[0] + 2.0 * kernel[1..n_k].iter().sum::<f32>();
    for k in &mut kernel[..n_k] {
        *k /= sum;
    }
}

/// Convolves `buffer` with a symmetric kernel in place. The buffer must hold
/// `n + 2 * (kernel.len() - 1)` samples with the signal starting at offset
/// `kernel.len() - 1`; results land in `buffer[..n]`.
pub fn convolve_sym(n: usize, buffer: &mut [f32], kernel: &[f32]) {
    let n_border = kernel.len() - 1;
    debug_assert!(buffer.len() >= n + 2 * n_border);

    for i in 0..n {
        let center = i + n_border;
        let mut sum = kernel[0] * buffer[center];
        for (j, &k) in kernel.iter().enumerate().skip(1) {
            sum += k * (buffer[center - j] + buffer[center + j]);
        }
        buffer[i] = sum;
    }
}

/// Allocates a convolution scratch able to hold one row or column of up to
/// `max_dim` samples plus `n_border` mirrored samples on each side.
#[must_use]
pub fn buffer_alloc(max_dim: usize, n_border: usize) -> Vec<f32> {
    vec![0.0; max_dim + 2 * n_border]
}

// Index of the mirrored sample for border offset i (0 is the first sample
// past the edge). Mirrors about the edge pixel without repeating it.
#[inline]
fn mirror(i: usize, n: usize) -> usize {
    (i + 1).min(n - 1)
}

/// Copies a contiguous row into the scratch with mirrored borders.
pub fn copy_to_buffer1_u8(n: usize, buffer: &mut [f32], row: &[u8], n_border: usize) {
    assert!(n >= 1);
    for i in 0..n {
        buffer[n_border + i] = f32::from(row[i]);
    }
    for i in 0..n_border {
        buffer[n_border - 1 - i] = f32::from(row[mirror(i, n)]);
        buffer[n_border + n + i] = f32::from(row[n - 1 - mirror(i, n)]);
    }
}

/// Copies a strided column into the scratch with mirrored borders.
pub fn copy_to_buffer_u8(n: usize, buffer: &mut [f32], data: &[u8], stride: usize, n_border: usize) {
    assert!(n >= 1);
    for i in 0..n {
        buffer[n_border + i] = f32::from(data[i * stride]);
    }
    for i in 0..n_border {
        buffer[n_border - 1 - i] = f32::from(data[mirror(i, n) * stride]);
        buffer[n_border + n + i] = f32::from(data[(n - 1 - mirror(i, n)) * stride]);
    }
}

/// Copies a contiguous f32 row into the scratch with mirrored borders.
pub fn copy_to_buffer1_f32(n: usize, buffer: &mut [f32], row: &[f32], n_border: usize) {
    assert!(n >= 1);
    buffer[n_border..n_border + n].copy_from_slice(&row[..n]);
    for i in 0..n_border {
        buffer[n_border - 1 - i] = row[mirror(i, n)];
        buffer[n_border + n + i] = row[n - 1 - mirror(i, n)];
    }
}

/// Copies a strided f32 column into the scratch with mirrored borders.
pub fn copy_to_buffer_f32(
    n: usize,
    buffer: &mut [f32],
    data: &[f32],
    stride: usize,
    n_border: usize,
) {
    assert!(n >= 1);
    for i in 0..n {
        buffer[n_border + i] = data[i * stride];
    }
    for i in 0..n_border {
        buffer[n_border - 1 - i] = data[mirror(i, n) * stride];
        buffer[n_border + n + i] = data[(n - 1 - mirror(i, n)) * stride];
    }
}
