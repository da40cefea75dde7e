//! # Image Converter
//!
//! Converts raster images in-process with the `image` crate.
//!
//! ## Pipeline (checkpoints):
//! 1. **Input validation**: the input exists and is not empty
//! 2. **Format validation**: input decodable, output format known
//! 3. **Path preparation**: output directory created
//! 4. **Conversion**: decode, transform, encode into a temporary file next to the output
//! 5. **Output validation**: the written file re-opens as an image
//! 6. **Integrity check**: the re-opened dimensions match the expected ones
//!
//! A failed checkpoint aborts the conversion with `OutputValidationFailed` (5-6) or
//! the matching error of the earlier steps. The temporary file is only renamed over
//! the output once step 4 succeeds.
//!
//! ## Decoding:
//! - JPEG, PNG, BMP, TIFF, WebP, GIF and ICO are decoded in-process
//! - HEIC/HEIF go through `heif-convert` (or `magick`) into a temporary PNG first
//! - PSD and SVG go through `magick` the same way; a PSD contributes its flattened composite
//! - RAW camera formats are not decodable
//!
//! ## Transformations (in order):
//! resize → max_size → rotate → flip → enhancements → blur → grayscale
//!
//! ## Encoding:
//! - JPEG uses the configured quality; alpha is flattened onto white for JPEG and BMP
//! - WebP is encoded losslessly, the quality setting does not apply
//! - ICO holds 16, 32, 48 and 64 px square icons
//! - An animated GIF or WebP converted to GIF keeps every frame and loops forever;
//!   other outputs keep the first frame
//!
//! Decoding and encoding are CPU-bound and run on the blocking thread pool.

use async_trait::async_trait;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPDecoder;
use image::{
    AnimationDecoder, DynamicImage, ExtendedColorType, Frame, GenericImageView, ImageFormat, ImageReader, Rgba,
    RgbImage, RgbaImage,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};

use super::{ensure_written, run_blocking, Converter, MediaInfo};
use crate::args;
use crate::category::{extension_of, FileCategory};
use crate::error::ConvertError;
use crate::options::{ConversionOptions, ImageOptions, ResizeMode};
use crate::tools::{Tool, ToolContext};
use crate::utils::path_arg;

const OUTPUT_FORMATS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "gif", "ico"];

/// Inputs the enabled codecs can decode
const DECODABLE_INPUTS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "gif", "ico"];

/// Inputs decoded by an external tool, with the tools tried in order
const EXTERNAL_DECODERS: &[(&str, &[Tool])] = &[
    ("heic", &[Tool::HeifConvert, Tool::Magick]),
    ("heif", &[Tool::HeifConvert, Tool::Magick]),
    ("psd", &[Tool::Magick]),
    ("svg", &[Tool::Magick]),
];

const ICO_SIZES: &[u32] = &[16, 32, 48, 64];

/// Image handle backed by the `image` crate
pub struct ImageConverter {
    tools: ToolContext,
}

impl ImageConverter {
    pub fn new(tools: ToolContext) -> Result<Self, ConvertError> {
        if tools.timeouts.probe_secs == 0 || tools.timeouts.image_secs == 0 {
            return Err(ConvertError::invalid_options("image tool timeouts must be greater than 0"));
        }
        if !tools.tools.is_available(Tool::Exiftool) {
            debug!("exiftool not found, image metadata will not be preserved");
        }
        Ok(Self { tools })
    }

    /// `None` for natively decodable inputs, otherwise the first available decoder tool
    fn external_decoder(&self, ext: &str) -> Result<Option<Tool>, ConvertError> {
        if DECODABLE_INPUTS.contains(&ext) {
            return Ok(None);
        }
        let (_, candidates) = EXTERNAL_DECODERS
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .ok_or_else(|| ConvertError::UnsupportedFormat(format!("cannot decode .{} images", ext)))?;

        match candidates.iter().copied().find(|tool| self.tools.tools.is_available(*tool)) {
            Some(tool) => Ok(Some(tool)),
            None => {
                let names: Vec<_> = candidates.iter().map(Tool::name).collect();
                Err(ConvertError::ExternalToolUnavailable(names.join(" or ")))
            }
        }
    }

    /// Decode `input` with `tool` into `decoded.png` inside `work`
    async fn decode_to_png(&self, tool: Tool, input: &Path, work: &Path) -> Result<PathBuf, ConvertError> {
        let program = self.tools.require(tool)?;
        let decoded = work.join("decoded.png");

        let args = match tool {
            // [0] selects the composite layer of a PSD
            Tool::Magick => args![format!("{}[0]", path_arg(input)), path_arg(&decoded)],
            _ => args![path_arg(input), path_arg(&decoded)],
        };
        self.tools
            .runner
            .run_checked(program, &args, self.tools.timeouts.image())
            .await?;
        ensure_written(&decoded).await?;

        debug!("Decoded {} with {}", input.display(), tool.name());
        Ok(decoded)
    }

    /// Copy EXIF/XMP/IPTC from `source` onto `target`; failures only warn
    async fn preserve_metadata(&self, source: &Path, target: &Path) {
        let Some(exiftool) = self.tools.tools.get(Tool::Exiftool) else {
            return;
        };

        let args = args![
            "-tagsFromFile",
            path_arg(source),
            "-all:all",
            "-overwrite_original",
            path_arg(target)
        ];

        match self.tools.runner.run_checked(exiftool, &args, self.tools.timeouts.probe()).await {
            Ok(_) => debug!("Preserved metadata for {}", target.display()),
            Err(e) => warn!("Failed to preserve metadata for {}: {}", source.display(), e),
        }
    }
}

#[async_trait]
impl Converter for ImageConverter {
    fn name(&self) -> &str {
        "image"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Image
    }

    fn supported_formats(&self) -> &[&'static str] {
        OUTPUT_FORMATS
    }

    async fn convert(&self, input: &Path, output: &Path, options: &ConversionOptions) -> Result<(), ConvertError> {
        let image_options = options.image.clone();
        image_options.validate()?;

        // Checkpoints 1-2
        let input_len = tokio::fs::metadata(input)
            .await
            .map_err(|_| ConvertError::InputMissing(input.to_path_buf()))?
            .len();
        if input_len == 0 {
            return Err(ConvertError::UnsupportedFormat(format!("{} is empty", input.display())));
        }

        let decoder = self.external_decoder(&extension_of(input))?;
        let output_ext = extension_of(output);
        let format = output_format(&output_ext)?;

        // Checkpoint 3
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&parent).await?;

        // Checkpoint 4; `work` holds an externally decoded source until encoding is done
        let work = decoder
            .map(|_| tempfile::Builder::new().prefix(".fileforge-").tempdir_in(&parent))
            .transpose()?;
        let source = match (decoder, &work) {
            (Some(tool), Some(work)) => self.decode_to_png(tool, input, work.path()).await?,
            _ => input.to_path_buf(),
        };

        let options_owned = image_options.clone();
        let staged = run_blocking(move || encode_to_temp(&source, &parent, format, &options_owned)).await?;
        let expected = staged.dimensions;
        staged
            .file
            .persist(output)
            .map_err(|e| ConvertError::Io(e.error))?;

        if image_options.preserve_metadata && matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Tiff | ImageFormat::WebP) {
            self.preserve_metadata(input, output).await;
        }

        // Checkpoints 5-6
        if image_options.verify_output {
            let output_owned = output.to_path_buf();
            run_blocking(move || verify_output(&output_owned, expected)).await?;
        }

        debug!(
            "Converted {} -> {} ({}x{})",
            input.display(),
            output.display(),
            expected.0,
            expected.1
        );
        Ok(())
    }

    async fn info(&self, path: &Path) -> Result<MediaInfo, ConvertError> {
        let mut info = MediaInfo::basic(path, FileCategory::Image).await?;
        let ext = extension_of(path);

        let details = match self.external_decoder(&ext)? {
            Some(tool) => {
                let work = TempDir::new()?;
                let decoded = self.decode_to_png(tool, path, work.path()).await?;
                let mut details = run_blocking(move || read_image_details(&decoded)).await?;
                details.format = ext;
                details
            }
            None => {
                let path_owned = path.to_path_buf();
                run_blocking(move || read_image_details(&path_owned)).await?
            }
        };

        info.format = details.format;
        info.width = Some(details.width);
        info.height = Some(details.height);
        info.color_mode = Some(details.color_mode);
        info.has_transparency = Some(details.has_transparency);
        info.animated = Some(details.animated);
        Ok(info)
    }
}

fn output_format(ext: &str) -> Result<ImageFormat, ConvertError> {
    if !OUTPUT_FORMATS.contains(&ext) {
        return Err(ConvertError::UnsupportedFormat(format!("image output .{}", ext)));
    }
    ImageFormat::from_extension(ext).ok_or_else(|| ConvertError::UnsupportedFormat(format!("image output .{}", ext)))
}

struct StagedOutput {
    file: NamedTempFile,
    dimensions: (u32, u32),
}

fn encode_to_temp(
    input: &Path,
    dir: &Path,
    format: ImageFormat,
    options: &ImageOptions,
) -> Result<StagedOutput, ConvertError> {
    let reader = ImageReader::open(input)?.with_guessed_format()?;
    let file = NamedTempFile::new_in(dir)?;

    if format == ImageFormat::Gif {
        if let Some(frames) = animation_frames(input, reader.format())? {
            let dimensions = write_animated_gif(frames, &file, options)?;
            return Ok(StagedOutput { file, dimensions });
        }
    }

    let img = transform(reader.decode()?, options);
    let mut dimensions = img.dimensions();
    {
        let mut writer = BufWriter::new(file.as_file());
        match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(flatten_alpha(&img));
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, options.quality))?;
            }
            ImageFormat::Bmp => {
                DynamicImage::ImageRgb8(flatten_alpha(&img)).write_to(&mut writer, format)?;
            }
            ImageFormat::WebP => {
                debug!("WebP output is lossless, quality {} ignored", options.quality);
                DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut writer, format)?;
            }
            ImageFormat::Ico => {
                dimensions = write_icon(&img, &mut writer, options)?;
            }
            ImageFormat::Gif => {
                DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut writer, format)?;
            }
            _ => img.write_to(&mut writer, format)?,
        }
        writer.flush()?;
    }

    Ok(StagedOutput { file, dimensions })
}

/// Every frame of an animated GIF or WebP, `None` for still images
fn animation_frames(input: &Path, format: Option<ImageFormat>) -> Result<Option<Vec<Frame>>, ConvertError> {
    let frames = match format {
        Some(ImageFormat::Gif) => GifDecoder::new(BufReader::new(File::open(input)?))?
            .into_frames()
            .collect_frames()?,
        Some(ImageFormat::WebP) => {
            let decoder = WebPDecoder::new(BufReader::new(File::open(input)?))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            decoder.into_frames().collect_frames()?
        }
        _ => return Ok(None),
    };
    Ok((frames.len() > 1).then_some(frames))
}

/// Transform each frame, keep its delay, and loop forever. Returns the frame size.
fn write_animated_gif(frames: Vec<Frame>, file: &NamedTempFile, options: &ImageOptions) -> Result<(u32, u32), ConvertError> {
    let count = frames.len();
    let mut dimensions = (0, 0);
    let mut transformed = Vec::with_capacity(count);
    for frame in frames {
        let delay = frame.delay();
        let img = transform(DynamicImage::ImageRgba8(frame.into_buffer()), options);
        if transformed.is_empty() {
            dimensions = img.dimensions();
        }
        transformed.push(Frame::from_parts(img.to_rgba8(), 0, 0, delay));
    }

    let mut writer = BufWriter::new(file.as_file());
    {
        // The trailer is written when the encoder drops
        let mut encoder = GifEncoder::new(&mut writer);
        encoder.set_repeat(Repeat::Infinite)?;
        encoder.encode_frames(transformed)?;
    }
    writer.flush()?;

    debug!("Encoded animated GIF with {} frames", count);
    Ok(dimensions)
}

/// One square RGBA entry per `ICO_SIZES`, the image centred on a transparent canvas.
/// Returns the size of the largest entry, the one decoders pick.
fn write_icon<W: Write>(img: &DynamicImage, writer: W, options: &ImageOptions) -> Result<(u32, u32), ConvertError> {
    let filter = options.resize_filter.filter_type();
    let mut entries = Vec::with_capacity(ICO_SIZES.len());

    for &size in ICO_SIZES {
        let fitted = img.resize(size, size, filter).to_rgba8();
        let mut canvas = RgbaImage::new(size, size);
        let x = (size - fitted.width()) / 2;
        let y = (size - fitted.height()) / 2;
        image::imageops::overlay(&mut canvas, &fitted, x as i64, y as i64);

        entries.push(IcoFrame::as_png(canvas.as_raw(), size, size, ExtendedColorType::Rgba8)?);
    }

    IcoEncoder::new(writer).encode_images(&entries)?;
    let largest = ICO_SIZES.iter().copied().max().unwrap_or_default();
    Ok((largest, largest))
}

/// Apply every requested transformation
fn transform(mut img: DynamicImage, options: &ImageOptions) -> DynamicImage {
    let filter = options.resize_filter.filter_type();

    if let Some(size) = options.resize {
        img = match options.resize_mode {
            ResizeMode::Fit => img.resize(size.width, size.height, filter),
            ResizeMode::Fill => img.resize_to_fill(size.width, size.height, filter),
            ResizeMode::Stretch => img.resize_exact(size.width, size.height, filter),
        };
    }

    if let Some(max) = options.max_size {
        if img.width() > max || img.height() > max {
            img = img.resize(max, max, filter);
        }
    }

    if let Some(degrees) = options.rotate {
        img = match degrees.rem_euclid(360) {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            _ => img,
        };
    }

    if options.flip_horizontal {
        img = img.fliph();
    }
    if options.flip_vertical {
        img = img.flipv();
    }

    img = enhance(img, options);

    if let Some(sigma) = options.blur.filter(|s| *s > 0.0) {
        img = img.blur(sigma);
    }

    if options.grayscale {
        img = img.grayscale();
    }

    img
}

/// Brightness, contrast, saturation and sharpness factors; 1.0 is the identity
fn enhance(img: DynamicImage, options: &ImageOptions) -> DynamicImage {
    let is_identity = |f: Option<f32>| f.map_or(true, |v| (v - 1.0).abs() < f32::EPSILON);
    let mut img = img;

    if !(is_identity(options.enhance_brightness)
        && is_identity(options.enhance_contrast)
        && is_identity(options.enhance_saturation))
    {
        let mut rgba = img.to_rgba8();

        if let Some(factor) = options.enhance_brightness {
            for Rgba([r, g, b, _]) in rgba.pixels_mut() {
                for c in [r, g, b] {
                    *c = clamp_channel(*c as f32 * factor);
                }
            }
        }

        if let Some(factor) = options.enhance_contrast {
            let count = (rgba.width() as f64 * rgba.height() as f64).max(1.0);
            let mean = (rgba.pixels().map(|p| luma(p) as f64).sum::<f64>() / count) as f32;
            for Rgba([r, g, b, _]) in rgba.pixels_mut() {
                for c in [r, g, b] {
                    *c = clamp_channel(mean + factor * (*c as f32 - mean));
                }
            }
        }

        if let Some(factor) = options.enhance_saturation {
            for pixel in rgba.pixels_mut() {
                let gray = luma(pixel);
                let Rgba([r, g, b, _]) = pixel;
                for c in [r, g, b] {
                    *c = clamp_channel(gray + factor * (*c as f32 - gray));
                }
            }
        }

        img = DynamicImage::ImageRgba8(rgba);
    }

    if let Some(factor) = options.enhance_sharpness.filter(|f| !is_identity(Some(*f))) {
        img = if factor > 1.0 {
            img.unsharpen(factor - 1.0, 1)
        } else {
            img.blur((1.0 - factor) * 2.0)
        };
    }

    img
}

fn luma(pixel: &Rgba<u8>) -> f32 {
    let Rgba([r, g, b, _]) = *pixel;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Composite onto a white background
fn flatten_alpha(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| clamp_channel(c as f32 * alpha + 255.0 * (1.0 - alpha));
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

fn verify_output(output: &Path, expected: (u32, u32)) -> Result<(), ConvertError> {
    let len = std::fs::metadata(output)
        .map_err(|e| ConvertError::OutputValidationFailed(format!("{} not written: {}", output.display(), e)))?
        .len();
    if len == 0 {
        return Err(ConvertError::OutputValidationFailed(format!("{} is empty", output.display())));
    }

    let reopened = image::open(output)
        .map_err(|e| ConvertError::OutputValidationFailed(format!("{} does not open: {}", output.display(), e)))?;

    if reopened.dimensions() != expected {
        return Err(ConvertError::OutputValidationFailed(format!(
            "pixel count mismatch: expected {}x{}, got {}x{}",
            expected.0,
            expected.1,
            reopened.width(),
            reopened.height()
        )));
    }
    Ok(())
}

struct ImageDetails {
    format: String,
    width: u32,
    height: u32,
    color_mode: String,
    has_transparency: bool,
    animated: bool,
}

fn read_image_details(path: &Path) -> Result<ImageDetails, ConvertError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| ConvertError::UnsupportedFormat(format!("unrecognised image {}", path.display())))?;
    let img = reader.decode()?;

    let animated = match format {
        ImageFormat::Gif => GifDecoder::new(BufReader::new(File::open(path)?))?
            .into_frames()
            .take(2)
            .count()
            > 1,
        ImageFormat::WebP => WebPDecoder::new(BufReader::new(File::open(path)?))?.has_animation(),
        _ => false,
    };

    Ok(ImageDetails {
        format: format.extensions_str().first().copied().unwrap_or("unknown").to_string(),
        width: img.width(),
        height: img.height(),
        color_mode: format!("{:?}", img.color()),
        has_transparency: img.color().has_alpha(),
        animated,
    })
}
