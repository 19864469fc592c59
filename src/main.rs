use anyhow::{Context, Result};
use backscreen::capture::{CaptureSource, WebcamCapture};
use backscreen::debug::{DebugFlags, FrameDumper};
use backscreen::output::{OutputSink, V4L2Output};
use backscreen::segmentation::{self, AdapterConfig, ProfileOptions, SegmentationPipeline};
use clap::{Parser, ValueEnum};
use image::{imageops, RgbImage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DebugView {
    /// Composited frame
    OutputFrame,
    /// Frame resized to model resolution, before normalization
    ResizedInput,
    /// Raw model-resolution mask
    ModelOutput,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to the segmentation model (ONNX file)
    #[arg(long)]
    model: PathBuf,

    /// Model family: deeplabv3, bodypix_resnet or bodypix_mobilenet
    #[arg(long, default_value = "bodypix_mobilenet")]
    model_type: String,

    /// Inference threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Replacement background image
    #[arg(long)]
    background: PathBuf,

    /// Run inference on the GPU (CUDA execution provider)
    #[arg(long)]
    gpu: bool,

    /// DeepLabV3 class index treated as person
    #[arg(long, default_value_t = 15)]
    person_class: usize,

    /// BodyPix person probability threshold
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    /// Intermediate buffers to dump for inspection
    #[arg(long, value_enum, value_delimiter = ',')]
    show: Vec<DebugView>,

    /// Directory debug buffers are written to
    #[arg(long, default_value = "debug-frames")]
    debug_dir: PathBuf,
}

impl Args {
    fn debug_flags(&self) -> DebugFlags {
        DebugFlags {
            show_output_frame: self.show.contains(&DebugView::OutputFrame),
            show_resized_input: self.show.contains(&DebugView::ResizedInput),
            show_model_output: self.show.contains(&DebugView::ModelOutput),
        }
    }

    fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            threads: self.threads,
            gpu: self.gpu,
            profile: ProfileOptions {
                person_class: self.person_class,
                threshold: self.threshold,
                ..Default::default()
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backscreen starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    tracing::info!("Loading segmentation model from {}", args.model.display());
    let mut pipeline =
        segmentation::create_pipeline(&args.model, &args.model_type, &args.adapter_config())
            .context("Failed to load segmentation model")?;
    tracing::info!("Segmentation model loaded successfully");

    let flags = args.debug_flags();
    if flags.any() {
        let dumper = FrameDumper::new(&args.debug_dir, flags)?;
        pipeline = pipeline.with_debug_tap(Box::new(dumper));
    }

    let background = image::open(&args.background)
        .with_context(|| format!("Failed to load background {}", args.background.display()))?
        .to_rgb8();

    let mut capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
        args.fps,
    )
    .context("Failed to initialize webcam capture")?;

    let mut output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        }) {
            tracing::warn!("Failed to install Ctrl+C handler: {err}");
        }
    }

    run_pipeline(
        &mut capture,
        &mut output,
        &mut pipeline,
        background,
        args.fps,
        &running,
    )?;

    tracing::info!("Shutting down");
    Ok(())
}

/// Keep `background` at the frame size, rescaling only when the camera changes size
fn fit_background<'a>(
    background: &RgbImage,
    fitted: &'a mut Option<RgbImage>,
    size: (u32, u32),
) -> &'a RgbImage {
    if fitted.as_ref().map(RgbImage::dimensions) != Some(size) {
        tracing::info!("Scaling background to {}x{}", size.0, size.1);
        *fitted = None;
    }
    fitted.get_or_insert_with(|| {
        if background.dimensions() == size {
            background.clone()
        } else {
            imageops::resize(background, size.0, size.1, imageops::FilterType::Triangle)
        }
    })
}

fn run_pipeline<C, O>(
    capture: &mut C,
    output: &mut O,
    pipeline: &mut SegmentationPipeline,
    background: RgbImage,
    target_fps: u32,
    running: &AtomicBool,
) -> Result<u64>
where
    C: CaptureSource,
    O: OutputSink,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut fitted: Option<RgbImage> = None;
    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_segment_time = Duration::ZERO;
    let mut total_inference_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!("Starting main pipeline loop");
    tracing::info!("Press Ctrl+C to stop");

    while running.load(Ordering::Relaxed) {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let mut frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        let replacement = fit_background(&background, &mut fitted, frame.dimensions());

        let segment_start = Instant::now();
        pipeline
            .process(&mut frame, replacement)
            .context("Failed to segment frame")?;
        total_segment_time += segment_start.elapsed();
        total_inference_time += pipeline.last_inference_time();

        let output_start = Instant::now();
        output
            .write_frame(&frame)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        if frame_count % 30 == 0 {
            let avg_ms = |total: Duration| total.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_capture_ms = avg_ms(total_capture_time);
            let avg_segment_ms = avg_ms(total_segment_time);
            let avg_inference_ms = avg_ms(total_inference_time);
            let avg_output_ms = avg_ms(total_output_time);
            let total_ms = avg_capture_ms + avg_segment_ms + avg_output_ms;

            tracing::info!(
                "Frame {}: capture={:.1}ms, segment={:.1}ms (inference={:.1}ms), output={:.1}ms, total={:.1}ms, fps={:.1}",
                frame_count,
                avg_capture_ms,
                avg_segment_ms,
                avg_inference_ms,
                avg_output_ms,
                total_ms,
                1000.0 / total_ms
            );
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    tracing::info!("Stopped after {} frames", frame_count);
    Ok(frame_count)
}
