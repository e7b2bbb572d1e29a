//! Image preprocessing for small printed dates on identity documents.
//!
//! General-purpose OCR engines do poorly on short, high-contrast numeric
//! strings over textured card backgrounds. The pipeline below is the usual
//! enhancement chain for that case, each step an independent pure function
//! so steps can be reordered or disabled through `PreprocessConfig`:
//!
//! 1. Validate bytes (size bounds), check header dimensions, decode
//! 2. Fix EXIF orientation
//! 3. Grayscale
//! 4. Upscale (bicubic, capped)
//! 5. CLAHE
//! 6. Median filter
//! 7. Sharpen
//! 8. Morphological close (optional)
//! 9. Adaptive Gaussian threshold
//! 10. Region mask (optional)
//! 11. Encode PNG

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, Luma};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ExtractionError;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input image size (in bytes) before rejecting.
/// Chat attachments and phone photos stay well below this.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024; // 20 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Decoded pixel budget, checked against the header before decoding.
const MAX_IMAGE_PIXELS: u64 = 40_000_000;

/// 3x3 sharpening kernel; sums to 1 so flat regions keep their level.
const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Laplacian variance below this = blurry.
const BLUR_THRESHOLD: f32 = 100.0;

/// RMS contrast below this = near-uniform image.
const CONTRAST_THRESHOLD: f32 = 25.0;

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Contrast-limited adaptive histogram equalization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClaheConfig {
    /// Histogram clip limit, as a multiple of the uniform bin height.
    pub clip_limit: f32,
    /// Tiles per side.
    pub tile_grid: u32,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tile_grid: 8,
        }
    }
}

/// Local Gaussian-weighted threshold parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveThresholdConfig {
    /// Neighbourhood size in pixels; forced odd.
    pub block_size: u32,
    /// Constant subtracted from the weighted mean.
    pub c: f32,
}

impl Default for AdaptiveThresholdConfig {
    fn default() -> Self {
        Self {
            block_size: 11,
            c: 2.0,
        }
    }
}

/// Blanks a band of the crop known to hold no digits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionMask {
    /// Fraction of rows, from the top, painted white (0.0-1.0).
    pub top_fraction: f32,
}

impl RegionMask {
    /// Date-of-birth crops carry their label in the top 40%.
    pub fn birth_date_label() -> Self {
        Self { top_fraction: 0.4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub scale_factor: f32,
    /// Longest edge allowed after upscaling; larger inputs are scaled down instead.
    pub max_output_dimension: u32,
    pub clahe: Option<ClaheConfig>,
    /// Median window side; 0 or 1 disables the filter.
    pub median_size: u32,
    pub sharpen: bool,
    /// Rectangular close kernel side, if any.
    pub close_kernel: Option<u32>,
    pub threshold: Option<AdaptiveThresholdConfig>,
    pub mask: Option<RegionMask>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::id_card()
    }
}

impl PreprocessConfig {
    /// Full enhancement chain for photos of ID cards.
    pub fn id_card() -> Self {
        Self {
            scale_factor: 2.5,
            max_output_dimension: 4000,
            clahe: Some(ClaheConfig::default()),
            median_size: 3,
            sharpen: true,
            close_kernel: None,
            threshold: Some(AdaptiveThresholdConfig::default()),
            mask: None,
        }
    }

    /// Lighter chain for single-line engines: upscale, close, threshold.
    pub fn single_line() -> Self {
        Self {
            clahe: None,
            median_size: 0,
            sharpen: false,
            close_kernel: Some(5),
            ..Self::id_card()
        }
    }

    pub fn with_mask(mut self, mask: RegionMask) -> Self {
        self.mask = Some(mask);
        self
    }
}

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Fixes image orientation from EXIF metadata.
///
/// Phone photos embed rotation in EXIF tag 0x0112; without correction a
/// portrait shot of a card reaches the OCR engine sideways.
pub trait OrientationCorrector: Send + Sync {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage;
}

/// Prepares an uploaded image for text recognition.
///
/// Pure image-to-image transform with no I/O.
pub trait ImagePreprocessor: Send + Sync {
    /// Input: raw image bytes (PNG, JPEG, TIFF, BMP, WebP).
    /// Output: binarized grayscale PNG ready for recognition.
    fn preprocess(&self, image_bytes: &[u8]) -> Result<PreparedImage, ExtractionError>;
}

// ═══════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════

/// Issues spotted on the input image. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessWarning {
    BlankImage,
    DarkImage,
    BlurryImage,
    PoorContrast,
}

#[derive(Debug)]
pub struct PreparedImage {
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub warnings: Vec<PreprocessWarning>,
}

// ═══════════════════════════════════════════════════════════
// DocumentPreprocessor
// ═══════════════════════════════════════════════════════════

pub struct DocumentPreprocessor {
    orientation: Box<dyn OrientationCorrector>,
    config: PreprocessConfig,
}

impl DocumentPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            orientation: Box::new(ExifOrientationCorrector),
            config,
        }
    }

    pub fn with_orientation(mut self, orientation: Box<dyn OrientationCorrector>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Run the enhancement chain on an already-decoded grayscale image.
    pub fn enhance(&self, gray: &GrayImage) -> GrayImage {
        let cfg = &self.config;
        let mut img = upscale(gray, cfg.scale_factor, cfg.max_output_dimension);

        if let Some(clahe) = cfg.clahe {
            img = equalize_clahe(&img, clahe.clip_limit, clahe.tile_grid);
        }
        if cfg.median_size > 1 {
            img = median_filter(&img, cfg.median_size);
        }
        if cfg.sharpen {
            img = convolve3x3(&img, &SHARPEN_KERNEL);
        }
        if let Some(size) = cfg.close_kernel {
            img = morph_close(&img, size);
        }
        if let Some(t) = cfg.threshold {
            img = adaptive_gaussian_threshold(&img, t.block_size, t.c);
        }
        if let Some(mask) = cfg.mask {
            mask_top_region(&mut img, mask.top_fraction);
        }
        img
    }
}

impl Default for DocumentPreprocessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::default())
    }
}

impl ImagePreprocessor for DocumentPreprocessor {
    fn preprocess(&self, image_bytes: &[u8]) -> Result<PreparedImage, ExtractionError> {
        validate_image_bytes(image_bytes)?;
        read_dimensions(image_bytes)?;

        let img = image::load_from_memory(image_bytes).map_err(|e| {
            ExtractionError::ImageProcessing(format!("Failed to decode image: {e}"))
        })?;
        let (orig_w, orig_h) = img.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(ExtractionError::ImageProcessing("Image has no pixels".into()));
        }

        let gray = self.orientation.correct(image_bytes, img).to_luma8();
        let warnings = assess_quality(&gray);

        let processed = self.enhance(&gray);
        let (width, height) = processed.dimensions();
        let png_bytes = encode_png(processed)?;

        debug!(
            original = format!("{orig_w}x{orig_h}"),
            output = format!("{width}x{height}"),
            png_size = png_bytes.len(),
            warnings = ?warnings,
            "Image preprocessed for recognition"
        );

        Ok(PreparedImage {
            png_bytes,
            width,
            height,
            original_width: orig_w,
            original_height: orig_h,
            warnings,
        })
    }
}

// ── Orientation ──────────────────────────────────────────

/// EXIF orientation values:
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub struct ExifOrientationCorrector;

impl OrientationCorrector for ExifOrientationCorrector {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        apply_orientation(image, read_exif_orientation(raw_bytes))
    }
}

/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|f| f.value.get_uint(0))
        })
        .unwrap_or(1)
}

pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Leaves the image as decoded. For inputs already upright (screenshots, scans).
pub struct NoOpOrientationCorrector;

impl OrientationCorrector for NoOpOrientationCorrector {
    fn correct(&self, _raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        image
    }
}

// ═══════════════════════════════════════════════════════════
// Enhancement steps (pure, reusable)
// ═══════════════════════════════════════════════════════════

/// Scale by `factor` with a cubic filter, never letting the longest edge
/// exceed `max_output_dimension`. Oversized inputs come out smaller.
pub fn upscale(img: &GrayImage, factor: f32, max_output_dimension: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let requested = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
    let cap = max_output_dimension.max(1) as f32 / w.max(h) as f32;
    let scale = requested.min(cap);

    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    if (new_w, new_h) == (w, h) {
        return img.clone();
    }

    if scale < requested {
        debug!(
            from = format!("{w}x{h}"),
            to = format!("{new_w}x{new_h}"),
            "Scale capped by max output dimension"
        );
    }

    image::imageops::resize(img, new_w, new_h, FilterType::CatmullRom)
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into `tile_grid` x `tile_grid` tiles. Each tile gets
/// its own equalization map from a clipped histogram (excess redistributed
/// evenly), and every pixel blends the maps of its four nearest tile centres.
pub fn equalize_clahe(img: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let grid_x = tile_grid.clamp(1, w);
    let grid_y = tile_grid.clamp(1, h);
    let raw = img.as_raw();

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((grid_x * grid_y) as usize);
    for ty in 0..grid_y {
        let (y0, y1) = (ty * h / grid_y, (ty + 1) * h / grid_y);
        for tx in 0..grid_x {
            let (x0, x1) = (tx * w / grid_x, (tx + 1) * w / grid_x);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                let row = (y * w) as usize;
                for x in x0..x1 {
                    hist[raw[row + x as usize] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts.push(clipped_equalization_lut(&mut hist, area, clip_limit));
        }
    }

    let tile_w = w as f32 / grid_x as f32;
    let tile_h = h as f32 / grid_y as f32;

    GrayImage::from_fn(w, h, |x, y| {
        let (tx0, tx1, ax) = neighbour_tiles(x, tile_w, grid_x);
        let (ty0, ty1, ay) = neighbour_tiles(y, tile_h, grid_y);
        let v = raw[(y * w + x) as usize] as usize;

        let lut = |tx: u32, ty: u32| luts[(ty * grid_x + tx) as usize][v] as f32;
        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Clip `hist` at `clip_limit` times the mean bin height, spread the excess
/// over all bins, then build the cumulative mapping.
fn clipped_equalization_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let per_bin = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += per_bin + u32::from(i < remainder);
        }
    }

    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Tiles whose centres bracket `pos`, plus the blend weight of the second.
fn neighbour_tiles(pos: u32, tile_size: f32, grid: u32) -> (u32, u32, f32) {
    let g = (pos as f32 + 0.5) / tile_size - 0.5;
    let last = grid - 1;
    let t0 = (g.floor().max(0.0) as u32).min(last);
    let t1 = (t0 + 1).min(last);
    let a = if t1 == t0 { 0.0 } else { (g - t0 as f32).clamp(0.0, 1.0) };
    (t0, t1, a)
}

/// Median over a `size` x `size` window, borders replicated.
pub fn median_filter(img: &GrayImage, size: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if size < 2 || w == 0 || h == 0 {
        return img.clone();
    }

    let r = (size / 2) as i64;
    let raw = img.as_raw();
    let mut window: Vec<u8> = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);

    GrayImage::from_fn(w, h, |x, y| {
        window.clear();
        for dy in -r..=r {
            let sy = clamp_coord(y as i64 + dy, h);
            for dx in -r..=r {
                let sx = clamp_coord(x as i64 + dx, w);
                window.push(raw[(sy * w + sx) as usize]);
            }
        }
        let mid = window.len() / 2;
        let (_, median, _) = window.select_nth_unstable(mid);
        Luma([*median])
    })
}

/// 3x3 convolution, borders replicated, result clamped to 0-255.
pub fn convolve3x3(img: &GrayImage, kernel: &[f32; 9]) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let raw = img.as_raw();

    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0.0f32;
        for ky in 0..3i64 {
            let sy = clamp_coord(y as i64 + ky - 1, h);
            for kx in 0..3i64 {
                let sx = clamp_coord(x as i64 + kx - 1, w);
                acc += raw[(sy * w + sx) as usize] as f32 * kernel[(ky * 3 + kx) as usize];
            }
        }
        Luma([acc.round().clamp(0.0, 255.0) as u8])
    })
}

/// Morphological close (dilate, then erode) with a square kernel.
/// Fills thin light gaps inside strokes on a light background.
pub fn morph_close(img: &GrayImage, size: u32) -> GrayImage {
    if size < 2 {
        return img.clone();
    }
    let dilated = rank_filter(img, size, u8::max);
    rank_filter(&dilated, size, u8::min)
}

/// Separable square min/max filter.
fn rank_filter(img: &GrayImage, size: u32, pick: fn(u8, u8) -> u8) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let r = (size / 2) as i64;
    let raw = img.as_raw();

    let mut horizontal = vec![0u8; raw.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = raw[(y * w + x) as usize];
            for dx in -r..=r {
                let sx = clamp_coord(x as i64 + dx, w);
                acc = pick(acc, raw[(y * w + sx) as usize]);
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = horizontal[(y * w + x) as usize];
        for dy in -r..=r {
            let sy = clamp_coord(y as i64 + dy, h);
            acc = pick(acc, horizontal[(sy * w + x) as usize]);
        }
        Luma([acc])
    })
}

/// Binarize against a Gaussian-weighted local mean: a pixel turns white when
/// it is brighter than `mean - c`, black otherwise.
///
/// Sigma follows the usual block-size rule `0.3 * ((block - 1) / 2 - 1) + 0.8`.
pub fn adaptive_gaussian_threshold(img: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let block = (block_size.max(3)) | 1;
    let radius = (block / 2) as i64;
    let sigma = 0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let kernel = gaussian_kernel(radius, sigma);
    let raw = img.as_raw();

    let mut horizontal = vec![0f32; raw.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (i, k) in kernel.iter().enumerate() {
                let sx = clamp_coord(x as i64 + i as i64 - radius, w);
                acc += raw[(y * w + sx) as usize] as f32 * k;
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let mut mean = 0.0f32;
        for (i, k) in kernel.iter().enumerate() {
            let sy = clamp_coord(y as i64 + i as i64 - radius, h);
            mean += horizontal[(sy * w + x) as usize] * k;
        }
        let v = raw[(y * w + x) as usize] as f32;
        Luma([if v > mean - c { 255 } else { 0 }])
    })
}

fn gaussian_kernel(radius: i64, sigma: f32) -> Vec<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|v| v / sum).collect()
}

/// Paint the top `fraction` of rows white.
pub fn mask_top_region(img: &mut GrayImage, fraction: f32) {
    let (w, h) = img.dimensions();
    let rows = ((h as f32 * fraction.clamp(0.0, 1.0)).round() as u32).min(h);
    for y in 0..rows {
        for x in 0..w {
            img.put_pixel(x, y, Luma([255]));
        }
    }
}

fn clamp_coord(v: i64, len: u32) -> u32 {
    v.clamp(0, len as i64 - 1) as u32
}

// ═══════════════════════════════════════════════════════════
// Quality analysis
// ═══════════════════════════════════════════════════════════

/// Blank / dark / blurry / low-contrast checks on the decoded input.
pub fn assess_quality(gray: &GrayImage) -> Vec<PreprocessWarning> {
    let mut warnings = Vec::new();
    let total = gray.as_raw().len();
    if total == 0 {
        return warnings;
    }

    let ratio = |pred: fn(u8) -> bool| {
        gray.as_raw().iter().filter(|&&v| pred(v)).count() as f32 / total as f32
    };
    let blank = ratio(|v| v > 240) > 0.95;
    let dark = ratio(|v| v < 15) > 0.80;

    if blank {
        warnings.push(PreprocessWarning::BlankImage);
    }
    if dark {
        warnings.push(PreprocessWarning::DarkImage);
    }
    if !blank && compute_laplacian_variance(gray) < BLUR_THRESHOLD {
        warnings.push(PreprocessWarning::BlurryImage);
    }
    if !blank && !dark && compute_contrast_score(gray) < CONTRAST_THRESHOLD {
        warnings.push(PreprocessWarning::PoorContrast);
    }
    warnings
}

/// Variance of the 4-neighbour Laplacian; higher = sharper.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let raw = img.as_raw();
    let at = |x: u32, y: u32| raw[(y * w + x) as usize] as f64;

    let (mut sum, mut sum_sq, mut n) = (0.0f64, 0.0f64, 0u64);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1;
        }
    }
    let mean = sum / n as f64;
    ((sum_sq / n as f64) - mean * mean).max(0.0) as f32
}

/// RMS contrast: standard deviation of intensities.
pub fn compute_contrast_score(img: &GrayImage) -> f32 {
    let raw = img.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let n = raw.len() as f64;
    let (sum, sum_sq) = raw.iter().fold((0.0f64, 0.0f64), |(s, sq), &v| {
        let v = v as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0).sqrt() as f32
}

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

/// Rejects input that is clearly too small or too large before decoding.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), ExtractionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ExtractionError::ImageProcessing(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ExtractionError::ImageProcessing(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Header-only read of the image size, rejecting anything over the pixel budget.
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), ExtractionError> {
    let (width, height) = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ExtractionError::ImageProcessing(format!("Failed to read image header: {e}")))?
        .into_dimensions()
        .map_err(|e| ExtractionError::ImageProcessing(format!("Failed to read image header: {e}")))?;
    check_pixel_budget(width, height)?;
    Ok((width, height))
}

pub fn check_pixel_budget(width: u32, height: u32) -> Result<(), ExtractionError> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > MAX_IMAGE_PIXELS {
        return Err(ExtractionError::ImageProcessing(format!(
            "Image is {width}x{height}, over the {MAX_IMAGE_PIXELS} pixel limit"
        )));
    }
    Ok(())
}

pub fn encode_png(img: GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Mock implementations (testing)
// ═══════════════════════════════════════════════════════════

/// Returns a small white PNG without touching the input, or fails on demand.
pub struct MockImagePreprocessor {
    fail: bool,
}

impl MockImagePreprocessor {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for MockImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePreprocessor for MockImagePreprocessor {
    fn preprocess(&self, _image_bytes: &[u8]) -> Result<PreparedImage, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::ImageProcessing(
                "Mock preprocessing failure".into(),
            ));
        }

        let side = 16;
        let png_bytes = encode_png(GrayImage::from_pixel(side, side, Luma([255])))?;
        Ok(PreparedImage {
            png_bytes,
            width: side,
            height: side,
            original_width: side,
            original_height: side,
            warnings: vec![],
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
