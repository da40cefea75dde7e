//! # Document Converter
//!
//! Converts documents and runs the named PDF operations.
//!
//! ## Routing:
//! - **PDF input**: text and HTML are extracted in-process with `lopdf`; PDF output
//!   keeps the selected pages; office formats go through LibreOffice
//! - **PDF output**: plain text, Markdown and CSV are laid out in-process; office,
//!   HTML and RTF inputs go through LibreOffice
//! - **Anything else**: `pandoc` when present, otherwise LibreOffice
//!
//! An encrypted input PDF is decrypted with `qpdf` using `DocumentOptions::password`,
//! and `ocr` runs `ocrmypdf` on it before anything else.
//!
//! ## Named operations (`DocumentOperations`):
//! merge, split, compress, encrypt, decrypt, watermark, ocr
//!
//! Page manipulation, compression and watermarking are done with `lopdf`; merging,
//! encryption and decryption with `qpdf`.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use super::{ensure_written, run_blocking, Converter, MediaInfo};
use crate::args;
use crate::category::{extension_of, FileCategory};
use crate::error::ConvertError;
use crate::options::{CompressionLevel, ConversionOptions, DocumentOptions, PageRange};
use crate::tools::{Tool, ToolContext};
use crate::utils::path_arg;

const OUTPUT_FORMATS: &[&str] = &["pdf", "docx", "xlsx", "pptx", "odt", "txt", "html", "rtf", "csv", "md"];

/// Outputs LibreOffice can produce from a PDF
const PDF_OFFICE_OUTPUTS: &[&str] = &["docx", "xlsx", "pptx", "odt", "rtf"];

/// Inputs laid out as plain text when converted to PDF
const PLAIN_TEXT_INPUTS: &[&str] = &["txt", "md", "csv"];

/// US Letter, used when a page has no readable MediaBox
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

const TEXT_FONT_SIZE: f32 = 12.0;
const TEXT_MARGIN: f32 = 72.0;

const WATERMARK_FONT: &[u8] = b"FWm";
const WATERMARK_STATE: &[u8] = b"GsWm";

/// Sizes before and after `DocumentOperations::compress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressionReport {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl CompressionReport {
    /// Percentage saved, negative when the file grew
    pub fn savings_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_bytes as f64 / self.original_bytes as f64) * 100.0
    }
}

/// PDF operations beyond format conversion
#[derive(Debug, Clone)]
pub struct DocumentOperations {
    ctx: ToolContext,
}

impl DocumentOperations {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    /// Concatenate `inputs` in order into `output`
    pub async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConvertError> {
        if inputs.is_empty() {
            return Err(ConvertError::invalid_options("merge needs at least one input PDF"));
        }
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(ConvertError::InputMissing(missing.clone()));
        }
        let qpdf = self.ctx.require(Tool::Qpdf)?;
        prepare_parent(output).await?;

        let mut args = args!["--empty", "--pages"];
        args.extend(inputs.iter().map(|p| path_arg(p)));
        args.extend(args!["--", path_arg(output)]);

        self.ctx.runner.run_checked(qpdf, &args, self.ctx.timeouts.document()).await?;
        info!("Merged {} PDFs into {}", inputs.len(), output.display());
        ensure_written(output).await
    }

    /// One PDF per selected page, named `{stem}_page_{n}.pdf`
    pub async fn split(
        &self,
        input: &Path,
        output_dir: &Path,
        pages: Option<&PageRange>,
    ) -> Result<Vec<PathBuf>, ConvertError> {
        require_file(input)?;
        tokio::fs::create_dir_all(output_dir).await?;

        let input = input.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let pages = pages.cloned();
        run_blocking(move || split_pdf(&input, &output_dir, pages.as_ref())).await
    }

    pub async fn compress(
        &self,
        input: &Path,
        output: &Path,
        level: CompressionLevel,
    ) -> Result<CompressionReport, ConvertError> {
        require_file(input)?;
        prepare_parent(output).await?;

        let input = input.to_path_buf();
        let output = output.to_path_buf();
        run_blocking(move || compress_pdf(&input, &output, level)).await
    }

    /// AES-256 encryption; the owner password defaults to the user password
    pub async fn encrypt(
        &self,
        input: &Path,
        output: &Path,
        user_password: &str,
        owner_password: Option<&str>,
    ) -> Result<(), ConvertError> {
        if user_password.is_empty() {
            return Err(ConvertError::invalid_options("user password must not be empty"));
        }
        require_file(input)?;
        let qpdf = self.ctx.require(Tool::Qpdf)?;
        prepare_parent(output).await?;

        let owner_password = owner_password.unwrap_or(user_password);
        let args = args![
            "--encrypt",
            user_password,
            owner_password,
            "256",
            "--",
            path_arg(input),
            path_arg(output)
        ];
        self.ctx.runner.run_checked(qpdf, &args, self.ctx.timeouts.document()).await?;
        ensure_written(output).await
    }

    pub async fn decrypt(&self, input: &Path, output: &Path, password: &str) -> Result<(), ConvertError> {
        require_file(input)?;
        let qpdf = self.ctx.require(Tool::Qpdf)?;
        prepare_parent(output).await?;

        let args = args!["--decrypt", format!("--password={}", password), path_arg(input), path_arg(output)];
        self.ctx.runner.run_checked(qpdf, &args, self.ctx.timeouts.document()).await?;
        ensure_written(output).await
    }

    /// Stamp `text` across the centre of every page
    pub async fn watermark(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        options: &DocumentOptions,
    ) -> Result<(), ConvertError> {
        if text.trim().is_empty() {
            return Err(ConvertError::invalid_options("watermark text must not be empty"));
        }
        options.validate()?;
        require_file(input)?;
        prepare_parent(output).await?;

        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let text = text.to_string();
        let options = options.clone();
        run_blocking(move || {
            let mut doc = load_pdf(&input)?;
            stamp_watermark(&mut doc, &text, &options)?;
            save_pdf(&mut doc, &output)
        })
        .await
    }

    /// Add a text layer to a scanned PDF; pages that already have text are left alone
    pub async fn ocr(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        require_file(input)?;
        let ocrmypdf = self.ctx.require(Tool::Ocrmypdf)?;
        prepare_parent(output).await?;

        let args = args!["--skip-text", path_arg(input), path_arg(output)];
        self.ctx.runner.run_checked(ocrmypdf, &args, self.ctx.timeouts.document()).await?;
        ensure_written(output).await
    }
}

/// Document handle
pub struct DocumentConverter {
    ctx: ToolContext,
    ops: DocumentOperations,
}

impl DocumentConverter {
    pub fn new(ctx: ToolContext) -> Result<Self, ConvertError> {
        if ctx.timeouts.document_secs == 0 {
            return Err(ConvertError::invalid_options("document timeout must be greater than 0"));
        }

        for tool in [Tool::Soffice, Tool::Pandoc, Tool::Qpdf] {
            if !ctx.tools.is_available(tool) {
                debug!("{} not found, {} unavailable", tool.name(), tool.purpose());
            }
        }

        Ok(Self {
            ops: DocumentOperations::new(ctx.clone()),
            ctx,
        })
    }

    pub fn operations(&self) -> &DocumentOperations {
        &self.ops
    }

    /// Decrypt and OCR an input PDF into `work` as requested
    async fn prepare_pdf(&self, input: &Path, options: &DocumentOptions, work: &Path) -> Result<PathBuf, ConvertError> {
        let mut source = input.to_path_buf();

        if let Some(ref password) = options.password {
            let decrypted = work.join("decrypted.pdf");
            self.ops.decrypt(&source, &decrypted, password).await?;
            source = decrypted;
        }
        if options.ocr {
            let searchable = work.join("ocr.pdf");
            self.ops.ocr(&source, &searchable).await?;
            source = searchable;
        }

        Ok(source)
    }

    async fn convert_from_pdf(
        &self,
        input: &Path,
        output: &Path,
        format: &str,
        options: &DocumentOptions,
    ) -> Result<(), ConvertError> {
        if PDF_OFFICE_OUTPUTS.contains(&format) {
            return self.libreoffice(input, output, format).await;
        }
        if !matches!(format, "txt" | "html" | "pdf") {
            return Err(ConvertError::UnsupportedFormat(format!("pdf to {}", format)));
        }

        let work = work_dir(output)?;
        let source = self.prepare_pdf(input, options, work.path()).await?;
        let output = output.to_path_buf();
        let format = format.to_string();
        let pages = options.pages.clone();

        run_blocking(move || {
            let mut doc = load_pdf(&source)?;
            if doc.is_encrypted() {
                return Err(ConvertError::invalid_options(format!(
                    "{} is encrypted, a password is required",
                    source.display()
                )));
            }
            let selected = selected_pages(&doc, pages.as_ref())?;

            match format.as_str() {
                "txt" => std::fs::write(&output, pdf_to_text(&doc, &selected))?,
                "html" => std::fs::write(&output, pdf_to_html(&doc, &selected))?,
                _ => {
                    keep_pages(&mut doc, &selected);
                    save_pdf(&mut doc, &output)?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn convert_to_pdf(&self, input: &Path, output: &Path, input_format: &str) -> Result<(), ConvertError> {
        if !PLAIN_TEXT_INPUTS.contains(&input_format) {
            return self.libreoffice(input, output, "pdf").await;
        }

        let text = tokio::fs::read(input).await?;
        let text = String::from_utf8_lossy(&text).into_owned();
        let output = output.to_path_buf();
        run_blocking(move || {
            let mut doc = layout_text(&text, TEXT_FONT_SIZE)?;
            save_pdf(&mut doc, &output)
        })
        .await
    }

    /// `soffice --convert-to` into a private directory, then moved onto `output`
    async fn libreoffice(&self, input: &Path, output: &Path, format: &str) -> Result<(), ConvertError> {
        let soffice = self.ctx.require(Tool::Soffice)?;
        let work = work_dir(output)?;
        let profile = work.path().join("profile");

        // Separate profiles let several conversions run at once
        let args = args![
            "--headless",
            format!("-env:UserInstallation=file://{}", path_arg(&profile)),
            "--convert-to",
            format,
            "--outdir",
            path_arg(work.path()),
            path_arg(input)
        ];
        self.ctx.runner.run_checked(soffice, &args, self.ctx.timeouts.document()).await?;

        let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let produced = work.path().join(format!("{}.{}", stem, format));
        if !produced.is_file() {
            return Err(ConvertError::OutputValidationFailed(format!(
                "LibreOffice wrote no {} file for {}",
                format,
                input.display()
            )));
        }

        tokio::fs::rename(&produced, output).await?;
        ensure_written(output).await
    }

    async fn pandoc(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        let pandoc = self.ctx.require(Tool::Pandoc)?;
        let args = args![path_arg(input), "-o", path_arg(output)];
        self.ctx.runner.run_checked(pandoc, &args, self.ctx.timeouts.document()).await?;
        ensure_written(output).await
    }
}

#[async_trait]
impl Converter for DocumentConverter {
    fn name(&self) -> &str {
        "document"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Document
    }

    fn supported_formats(&self) -> &[&'static str] {
        OUTPUT_FORMATS
    }

    async fn convert(&self, input: &Path, output: &Path, options: &ConversionOptions) -> Result<(), ConvertError> {
        let input_format = extension_of(input);
        let format = extension_of(output);
        if !OUTPUT_FORMATS.contains(&format.as_str()) {
            return Err(ConvertError::UnsupportedFormat(format!("document output .{}", format)));
        }
        options.document.validate()?;
        debug!("Converting document {} -> {}", input.display(), output.display());

        if input_format == "pdf" {
            self.convert_from_pdf(input, output, &format, &options.document).await
        } else if format == "pdf" {
            self.convert_to_pdf(input, output, &input_format).await
        } else if self.ctx.tools.is_available(Tool::Pandoc) {
            self.pandoc(input, output).await
        } else if self.ctx.tools.is_available(Tool::Soffice) {
            self.libreoffice(input, output, &format).await
        } else {
            Err(ConvertError::ExternalToolUnavailable("pandoc or soffice".to_string()))
        }
    }

    async fn info(&self, path: &Path) -> Result<MediaInfo, ConvertError> {
        let mut info = MediaInfo::basic(path, FileCategory::Document).await?;
        if info.format != "pdf" {
            return Ok(info);
        }

        let owned = path.to_path_buf();
        let (pages, encrypted) = run_blocking(move || {
            let doc = load_pdf(&owned)?;
            Ok((doc.get_pages().len(), doc.is_encrypted()))
        })
        .await?;
        info.page_count = Some(pages);
        info.encrypted = Some(encrypted);
        Ok(info)
    }
}

fn require_file(path: &Path) -> Result<(), ConvertError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConvertError::InputMissing(path.to_path_buf()))
    }
}

async fn prepare_parent(output: &Path) -> Result<(), ConvertError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Scratch directory next to `output`, removed on drop
fn work_dir(output: &Path) -> Result<TempDir, ConvertError> {
    let parent = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Ok(tempfile::Builder::new().prefix(".fileforge-").tempdir_in(parent)?)
}

fn load_pdf(path: &Path) -> Result<Document, ConvertError> {
    Ok(Document::load(path)?)
}

fn save_pdf(doc: &mut Document, path: &Path) -> Result<(), ConvertError> {
    doc.save(path).map_err(lopdf::Error::from)?;
    Ok(())
}

/// Selected page numbers, every page when no range is given
fn selected_pages(doc: &Document, range: Option<&PageRange>) -> Result<Vec<u32>, ConvertError> {
    let count = doc.get_pages().len() as u32;
    let pages = match range {
        Some(range) => range.resolve(count),
        None => (1..=count).collect(),
    };
    if pages.is_empty() {
        return Err(ConvertError::invalid_options(format!("no pages selected out of {}", count)));
    }
    Ok(pages)
}

/// Delete every page not in `keep`
fn keep_pages(doc: &mut Document, keep: &[u32]) {
    let count = doc.get_pages().len() as u32;
    let drop: Vec<u32> = (1..=count).filter(|page| !keep.contains(page)).collect();
    if !drop.is_empty() {
        doc.delete_pages(&drop);
        doc.prune_objects();
    }
}

fn pdf_to_text(doc: &Document, pages: &[u32]) -> String {
    pages
        .iter()
        .map(|&page| {
            let text = doc.extract_text(&[page]).unwrap_or_default();
            format!("--- Page {} ---\n{}\n", page, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn pdf_to_html(doc: &Document, pages: &[u32]) -> String {
    let mut html = vec!["<html><head><title>PDF Conversion</title></head><body>".to_string()];
    for &page in pages {
        let text = doc.extract_text(&[page]).unwrap_or_default();
        html.push(format!(
            "<div class='page' id='page-{}'><pre>{}</pre></div>",
            page,
            escape_html(&text)
        ));
    }
    html.push("</body></html>".to_string());
    html.join("\n")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn split_pdf(input: &Path, output_dir: &Path, range: Option<&PageRange>) -> Result<Vec<PathBuf>, ConvertError> {
    let doc = load_pdf(input)?;
    let pages = selected_pages(&doc, range)?;
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "document".into());

    let mut written = Vec::with_capacity(pages.len());
    for page in pages {
        let mut part = doc.clone();
        keep_pages(&mut part, &[page]);
        let path = output_dir.join(format!("{}_page_{}.pdf", stem, page));
        save_pdf(&mut part, &path)?;
        written.push(path);
    }

    info!("Split {} into {} files", input.display(), written.len());
    Ok(written)
}

fn compress_pdf(input: &Path, output: &Path, level: CompressionLevel) -> Result<CompressionReport, ConvertError> {
    let original_bytes = std::fs::metadata(input)?.len();
    let mut doc = load_pdf(input)?;

    if level != CompressionLevel::Low {
        doc.prune_objects();
        doc.delete_zero_length_streams();
    }
    if level == CompressionLevel::High {
        doc.renumber_objects();
    }
    doc.compress();
    save_pdf(&mut doc, output)?;

    Ok(CompressionReport {
        original_bytes,
        compressed_bytes: std::fs::metadata(output)?.len(),
    })
}

/// Lay plain text out on Letter pages in Courier; a form feed starts a new page
fn layout_text(text: &str, font_size: f32) -> Result<Document, ConvertError> {
    let (width, height) = DEFAULT_PAGE_SIZE;
    let leading = font_size + 2.0;
    let columns = ((width - 2.0 * TEXT_MARGIN) / (font_size * 0.6)).max(1.0) as usize;
    let rows = ((height - 2.0 * TEXT_MARGIN) / leading).max(1.0) as usize;

    let mut pages: Vec<Vec<String>> = Vec::new();
    for block in text.split('\x0c') {
        let mut lines = Vec::new();
        for line in block.lines() {
            lines.extend(wrap_line(&line.replace('\t', "    "), columns));
        }
        if lines.is_empty() {
            lines.push(String::new());
        }
        pages.extend(lines.chunks(rows).map(<[String]>::to_vec));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for lines in &pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), font_size.into()]),
            Operation::new("TL", vec![leading.into()]),
            Operation::new("Td", vec![TEXT_MARGIN.into(), (height - TEXT_MARGIN).into()]),
        ];
        for line in lines {
            operations.push(Operation::new("Tj", vec![Object::string_literal(pdf_text(line))]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }.encode()?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    Ok(doc)
}

fn wrap_line(line: &str, columns: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(columns).map(|chunk| chunk.iter().collect()).collect()
}

/// Text the standard fonts can show; anything outside ASCII becomes `?`
fn pdf_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
        .collect()
}

/// Look `key` up on the page, then on its ancestors
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok();
    while let Some(dict) = node {
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        node = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .ok()
            .and_then(|parent| doc.get_dictionary(parent).ok());
    }
    None
}

/// Follow a reference to a dictionary, or clone a direct one
fn resolve_dictionary(doc: &Document, object: Option<&Object>) -> Dictionary {
    match object {
        Some(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_else(|_| Dictionary::new()),
        Some(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    }
}

fn page_size(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    if let Some(Object::Array(values)) = inherited(doc, page_id, b"MediaBox") {
        let corners: Vec<f32> = values.iter().filter_map(|v| v.as_float().ok()).collect();
        if let [x0, y0, x1, y1] = corners[..] {
            return ((x1 - x0).abs(), (y1 - y0).abs());
        }
    }
    DEFAULT_PAGE_SIZE
}

fn add_resource(doc: &Document, resources: &mut Dictionary, group: &[u8], name: &[u8], id: ObjectId) {
    let mut entries = resolve_dictionary(doc, resources.get(group).ok());
    entries.set(name.to_vec(), Object::Reference(id));
    resources.set(group.to_vec(), Object::Dictionary(entries));
}

fn stamp_watermark(doc: &mut Document, text: &str, options: &DocumentOptions) -> Result<(), ConvertError> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let state_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => options.opacity,
        "CA" => options.opacity,
    });
    // Isolates the page's own graphics state from the stamp
    let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in page_ids {
        let (width, height) = page_size(doc, page_id);
        let stamp = watermark_content(text, options, width, height)?;
        let stamp_id = doc.add_object(Stream::new(dictionary! {}, stamp));

        let mut resources = resolve_dictionary(doc, inherited(doc, page_id, b"Resources"));
        add_resource(doc, &mut resources, b"Font", WATERMARK_FONT, font_id);
        add_resource(doc, &mut resources, b"ExtGState", WATERMARK_STATE, state_id);

        let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
        let mut contents = vec![Object::Reference(save_id)];
        match page.get(b"Contents") {
            Ok(Object::Array(existing)) => contents.extend(existing.iter().cloned()),
            Ok(existing) => contents.push(existing.clone()),
            Err(_) => {}
        }
        contents.push(Object::Reference(stamp_id));

        page.set("Resources", resources);
        page.set("Contents", contents);
    }

    Ok(())
}

/// Closes the page's state, then draws `text` rotated about the page centre in grey
fn watermark_content(text: &str, options: &DocumentOptions, width: f32, height: f32) -> Result<Vec<u8>, ConvertError> {
    let size = options.font_size;
    let (sin, cos) = options.rotation.to_radians().sin_cos();
    // Helvetica averages about half an em per glyph
    let half_width = text.chars().count() as f32 * size * 0.25;
    let half_height = size * 0.35;
    let x = width / 2.0 - (cos * half_width - sin * half_height);
    let y = height / 2.0 - (sin * half_width + cos * half_height);

    let operations = vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(WATERMARK_STATE.to_vec())]),
        Operation::new("g", vec![0.5_f32.into()]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(WATERMARK_FONT.to_vec()), size.into()]),
        Operation::new(
            "Tm",
            vec![cos.into(), sin.into(), (-sin).into(), cos.into(), x.into(), y.into()],
        ),
        Operation::new("Tj", vec![Object::string_literal(pdf_text(text))]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ];
    Ok(Content { operations }.encode()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolTimeouts;
    use crate::error::ErrorKind;
    use crate::testing::RecordingRunner;
    use crate::tools::ResolvedTools;
    use std::sync::Arc;

    fn context(tools: ResolvedTools, runner: Arc<RecordingRunner>) -> ToolContext {
        ToolContext::new(tools, runner, ToolTimeouts::default())
    }

    fn converter() -> DocumentConverter {
        DocumentConverter::new(context(ResolvedTools::none(), Arc::new(RecordingRunner::new()))).unwrap()
    }

    /// A PDF with one page per form-feed separated block
    fn write_pdf(path: &Path, pages: &[&str]) {
        let mut doc = layout_text(&pages.join("\x0c"), TEXT_FONT_SIZE).unwrap();
        save_pdf(&mut doc, path).unwrap();
    }

    fn page_count(path: &Path) -> usize {
        Document::load(path).unwrap().get_pages().len()
    }

    #[tokio::test]
    async fn test_text_to_pdf_and_back() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("notes.txt");
        let pdf = dir.path().join("notes.pdf");
        let back = dir.path().join("back.txt");
        std::fs::write(&txt, "Hello world\nsecond line").unwrap();

        let converter = converter();
        let options = ConversionOptions::default();
        converter.convert(&txt, &pdf, &options).await.unwrap();
        assert_eq!(page_count(&pdf), 1);

        converter.convert(&pdf, &back, &options).await.unwrap();
        let text = std::fs::read_to_string(&back).unwrap();
        assert!(text.starts_with("--- Page 1 ---\n"));
        assert!(text.contains("Hello world"));
    }

    #[test]
    fn test_long_text_spans_pages() {
        let text: String = (0..120).map(|i| format!("line {}\n", i)).collect();
        let doc = layout_text(&text, TEXT_FONT_SIZE).unwrap();
        // 46 lines fit on a Letter page at 12pt
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_wrap_line() {
        assert_eq!(wrap_line("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(wrap_line("", 4), vec![""]);
    }

    #[tokio::test]
    async fn test_pdf_page_selection() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        write_pdf(&input, &["one", "two", "three"]);

        let mut options = ConversionOptions::default();
        options.document.pages = Some("2-3,9".parse().unwrap());
        converter().convert(&input, &output, &options).await.unwrap();

        assert_eq!(page_count(&output), 2);
    }

    #[tokio::test]
    async fn test_pdf_to_html_selected_pages() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.html");
        write_pdf(&input, &["alpha", "beta"]);

        let mut options = ConversionOptions::default();
        options.document.pages = Some("2".parse().unwrap());
        converter().convert(&input, &output, &options).await.unwrap();

        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.starts_with("<html><head><title>PDF Conversion</title></head><body>"));
        assert!(html.contains("id='page-2'"));
        assert!(!html.contains("id='page-1'"));
        assert!(html.ends_with("</body></html>"));
    }

    #[tokio::test]
    async fn test_range_outside_document_selects_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        write_pdf(&input, &["only"]);

        let mut options = ConversionOptions::default();
        options.document.pages = Some("5-6".parse().unwrap());
        let err = converter()
            .convert(&input, &dir.path().join("out.txt"), &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    }

    #[tokio::test]
    async fn test_office_conversion_needs_libreoffice() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("report.docx");
        std::fs::write(&input, b"PK").unwrap();

        let err = converter()
            .convert(&input, &dir.path().join("report.pdf"), &ConversionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolUnavailable);

        let err = converter()
            .convert(&input, &dir.path().join("report.odt"), &ConversionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolUnavailable);
    }

    #[tokio::test]
    async fn test_pandoc_preferred_between_markup_formats() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("readme.md");
        let output = dir.path().join("readme.docx");
        std::fs::write(&input, "# Title").unwrap();

        let runner = Arc::new(RecordingRunner::new().writing_output());
        let tools = ResolvedTools::none()
            .with(Tool::Pandoc, "/usr/bin/pandoc")
            .with(Tool::Soffice, "/usr/bin/soffice");
        let converter = DocumentConverter::new(context(tools, runner.clone())).unwrap();
        converter.convert(&input, &output, &ConversionOptions::default()).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, PathBuf::from("/usr/bin/pandoc"));
        assert_eq!(calls[0].args, vec![path_arg(&input), "-o".to_string(), path_arg(&output)]);
    }

    #[tokio::test]
    async fn test_pdf_to_csv_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        write_pdf(&input, &["x"]);

        let err = converter()
            .convert(&input, &dir.path().join("out.csv"), &ConversionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn test_password_decrypts_with_qpdf_first() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("locked.pdf");
        write_pdf(&input, &["secret"]);

        let runner = Arc::new(RecordingRunner::new().failing("invalid password"));
        let tools = ResolvedTools::none().with(Tool::Qpdf, "/usr/bin/qpdf");
        let converter = DocumentConverter::new(context(tools, runner.clone())).unwrap();

        let mut options = ConversionOptions::default();
        options.document.password = Some("hunter2".into());
        let err = converter
            .convert(&input, &dir.path().join("out.txt"), &options)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalToolFailed);
        let calls = runner.calls();
        assert_eq!(calls[0].args[0], "--decrypt");
        assert_eq!(calls[0].args[1], "--password=hunter2");
    }

    #[tokio::test]
    async fn test_split() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("book.pdf");
        write_pdf(&input, &["a", "b", "c"]);

        let ops = converter().operations().clone();
        let parts = ops.split(&input, &dir.path().join("parts"), None).await.unwrap();

        assert_eq!(parts.len(), 3);
        assert!(parts[2].ends_with("parts/book_page_3.pdf"));
        for part in &parts {
            assert_eq!(page_count(part), 1);
        }
    }

    #[tokio::test]
    async fn test_compress_keeps_pages() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("big.pdf");
        let output = dir.path().join("small.pdf");
        write_pdf(&input, &["a", "b"]);

        let ops = converter().operations().clone();
        for level in [CompressionLevel::Low, CompressionLevel::Medium, CompressionLevel::High] {
            let report = ops.compress(&input, &output, level).await.unwrap();
            assert!(report.original_bytes > 0);
            assert!(report.compressed_bytes > 0);
            assert_eq!(page_count(&output), 2);
        }
    }

    #[tokio::test]
    async fn test_watermark_stamps_every_page() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        write_pdf(&input, &["first", "second"]);

        let ops = converter().operations().clone();
        ops.watermark(&input, &output, "DRAFT", &DocumentOptions::default())
            .await
            .unwrap();

        let doc = Document::load(&output).unwrap();
        for (number, page_id) in doc.get_pages() {
            let page = doc.get_dictionary(page_id).unwrap();
            let contents = page.get(b"Contents").unwrap().as_array().unwrap();
            assert_eq!(contents.len(), 3);

            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
            assert!(fonts.has(b"F1"));
            assert!(fonts.has(WATERMARK_FONT));

            assert!(doc.extract_text(&[number]).unwrap().contains("DRAFT"));
        }
    }

    #[tokio::test]
    async fn test_watermark_rejects_bad_opacity() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        write_pdf(&input, &["x"]);

        let options = DocumentOptions {
            opacity: 1.5,
            ..Default::default()
        };
        let err = converter()
            .operations()
            .watermark(&input, &dir.path().join("out.pdf"), "DRAFT", &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    }

    #[tokio::test]
    async fn test_merge_and_encrypt_use_qpdf() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        write_pdf(&a, &["a"]);
        write_pdf(&b, &["b"]);
        let merged = dir.path().join("out/merged.pdf");
        let locked = dir.path().join("out/locked.pdf");

        let runner = Arc::new(RecordingRunner::new().writing_output());
        let tools = ResolvedTools::none().with(Tool::Qpdf, "/usr/bin/qpdf");
        let ops = DocumentOperations::new(context(tools, runner.clone()));

        ops.merge(&[a.clone(), b.clone()], &merged).await.unwrap();
        ops.encrypt(&a, &locked, "user", None).await.unwrap();

        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            vec!["--empty".to_string(), "--pages".into(), path_arg(&a), path_arg(&b), "--".into(), path_arg(&merged)]
        );
        assert_eq!(&calls[1].args[..4], &["--encrypt", "user", "user", "256"]);
    }

    #[tokio::test]
    async fn test_operations_without_qpdf() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        write_pdf(&a, &["a"]);

        let runner = Arc::new(RecordingRunner::new());
        let ops = DocumentOperations::new(context(ResolvedTools::none(), runner.clone()));

        let err = ops.merge(&[a.clone()], &dir.path().join("m.pdf")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolUnavailable);
        let err = ops.merge(&[], &dir.path().join("m.pdf")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
        let err = ops.encrypt(&a, &dir.path().join("e.pdf"), "", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_info_counts_pages() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        write_pdf(&input, &["a", "b", "c"]);

        let info = converter().info(&input).await.unwrap();
        assert_eq!(info.format, "pdf");
        assert_eq!(info.page_count, Some(3));
        assert_eq!(info.encrypted, Some(false));
    }

    #[test]
    fn test_compression_report() {
        let report = CompressionReport {
            original_bytes: 200,
            compressed_bytes: 150,
        };
        assert_eq!(report.savings_percent(), 25.0);
    }
}
