//! End-to-end tests of the conversion engine with real image files and stub handles.

use image::{ImageFormat, RgbImage, Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use fileforge::config::ToolTimeouts;
use fileforge::testing::{RecordingRunner, StubBehavior, StubConverter};
use fileforge::tools::{ResolvedTools, ToolContext};
use fileforge::{
    BatchRequest, BatchState, Config, ConversionEngine, ConversionOptions, ConverterRegistry, ErrorKind,
    FileCategory,
};

fn offline_context() -> ToolContext {
    ToolContext::new(ResolvedTools::none(), Arc::new(RecordingRunner::new()), ToolTimeouts::default())
}

fn standard_engine() -> ConversionEngine {
    ConversionEngine::with_context(Config::default(), offline_context())
}

fn stub_engine(stubs: Vec<StubConverter>) -> ConversionEngine {
    let mut registry = ConverterRegistry::new();
    for stub in stubs {
        registry.register(Arc::new(stub));
    }
    ConversionEngine::from_parts(Config::default(), offline_context(), Arc::new(registry))
}

fn write_png(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
    img.save(path).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_png_to_jpg_mirrors_tree() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_png(&src.path().join("one.png"), 32, 16);
    write_png(&src.path().join("two.png"), 16, 16);
    write_png(&src.path().join("nested/three.png"), 8, 24);

    let engine = standard_engine();
    let mut options = ConversionOptions::default();
    options.image.quality = 85;

    let request = BatchRequest::new(src.path(), dest.path())
        .pattern("*.png")
        .output_format(Some("jpg"))
        .options(options)
        .workers(2);
    let summary = engine.convert_batch(request).await.unwrap();

    assert_eq!((summary.total, summary.successful, summary.failed), (3, 3, 0));
    for (name, dims) in [("one.jpg", (32, 16)), ("two.jpg", (16, 16)), ("nested/three.jpg", (8, 24))] {
        let output = dest.path().join(name);
        let reader = image::ImageReader::open(&output).unwrap().with_guessed_format().unwrap();
        assert_eq!(reader.format(), Some(ImageFormat::Jpeg));
        let decoded = reader.decode().unwrap();
        assert_eq!((decoded.width(), decoded.height()), dims, "{}", name);
    }
}

#[tokio::test]
async fn convert_single_transparent_png_to_jpg() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("logo.png");
    RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])).save(&input).unwrap();

    let engine = standard_engine();
    let output = dir.path().join("out/logo.jpg");
    assert!(engine.convert_single(&input, &output, &ConversionOptions::default()).await);

    let decoded = image::open(&output).unwrap().to_rgb8();
    let pixel = decoded.get_pixel(0, 0).0;
    assert!(pixel.iter().all(|&c| c > 240), "expected white, got {:?}", pixel);
}

#[tokio::test]
async fn convert_single_reports_failures() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("photo.png");
    write_png(&input, 4, 4);
    let engine = standard_engine();
    let options = ConversionOptions::default();

    let result = engine.convert_file(&input, &dir.path().join("photo.mp3"), &options).await;
    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::UnsupportedFormat));

    let result = engine
        .convert_file(&dir.path().join("missing.png"), &dir.path().join("missing.jpg"), &options)
        .await;
    assert_eq!(result.error, Some(ErrorKind::InputMissing));

    // Audio without ffmpeg fails fast
    let song = dir.path().join("song.wav");
    std::fs::write(&song, b"RIFF").unwrap();
    let result = engine.convert_file(&song, &dir.path().join("song.mp3"), &options).await;
    assert_eq!(result.error, Some(ErrorKind::ExternalToolUnavailable));
}

#[tokio::test]
async fn supported_conversions_omit_archives() {
    let engine = standard_engine();
    let conversions = engine.get_supported_conversions();

    let categories: Vec<_> = conversions.keys().copied().collect();
    assert_eq!(
        categories,
        vec![FileCategory::Image, FileCategory::Document, FileCategory::Audio, FileCategory::Video]
    );
    assert!(conversions[&FileCategory::Image].contains(&"webp".to_string()));
    assert!(conversions[&FileCategory::Document].contains(&"docx".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mixed_batch_counts_failures() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    for name in ["a.png", "b.png", "c.wav", "d.xyz"] {
        std::fs::write(src.path().join(name), b"data").unwrap();
    }

    let engine = stub_engine(vec![
        StubConverter::new(FileCategory::Image, &["png"]),
        StubConverter::new(FileCategory::Audio, &["wav"]).with_behavior(StubBehavior::Fail("bad header".into())),
    ]);

    let summary = engine
        .convert_batch(BatchRequest::new(src.path(), dest.path()))
        .await
        .unwrap();

    assert_eq!((summary.total, summary.successful, summary.failed), (4, 2, 2));
    let mut kinds: Vec<_> = summary.failures().filter_map(|r| r.error).collect();
    kinds.sort_by_key(|k| k.to_string());
    assert_eq!(kinds, vec![ErrorKind::ExternalToolFailed, ErrorKind::UnsupportedFormat]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handle_does_not_abort_batch() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    for name in ["a.png", "b.png", "c.wav"] {
        std::fs::write(src.path().join(name), b"data").unwrap();
    }

    let engine = stub_engine(vec![
        StubConverter::new(FileCategory::Image, &["png"]),
        StubConverter::new(FileCategory::Audio, &["wav"]).with_behavior(StubBehavior::Panic("decoder crashed".into())),
    ]);

    let summary = engine
        .convert_batch(BatchRequest::new(src.path(), dest.path()).workers(3))
        .await
        .unwrap();

    assert_eq!((summary.total, summary.successful, summary.failed), (3, 2, 1));
    let failure = summary.failures().next().unwrap();
    assert_eq!(failure.error, Some(ErrorKind::JobPanicked));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_batch_can_be_cancelled() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    for i in 0..6 {
        std::fs::write(src.path().join(format!("{}.png", i)), b"data").unwrap();
    }

    let stub = StubConverter::new(FileCategory::Image, &["png"]).with_delay(Duration::from_millis(50));
    let engine = stub_engine(vec![stub]);

    let mut handle = engine
        .spawn_batch(BatchRequest::new(src.path(), dest.path()).workers(1))
        .unwrap();
    let control = handle.control();

    let first = handle.progress().recv().await.unwrap();
    assert_eq!(first.completed, 1);
    control.cancel();

    while handle.progress().recv().await.is_some() {}
    let summary = handle.join().await.unwrap();

    assert!(summary.total < 6);
    assert_eq!(summary.total, summary.results.len());
    assert_eq!(control.state(), BatchState::Cancelled);
}
