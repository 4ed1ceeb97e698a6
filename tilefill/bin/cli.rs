use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use tilefill::types::scene::{EncodedScene, SceneEncoder};
use tilefill::{Dispatcher, DispatcherOptions, FrameInputs, WgpuDevice};

/// Render a demo scene with the tile pipeline and write it as a PNG.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output image
    #[arg(short, long, default_value = "image.png")]
    output: PathBuf,

    /// Target width in pixels
    #[arg(short, long, default_value = "512")]
    width: u32,

    /// Target height in pixels
    #[arg(long, default_value = "512")]
    height: u32,

    #[arg(short, long, value_enum, default_value_t = Demo::Rects)]
    scene: Demo,

    /// How long to wait for the GPU, in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Demo {
    /// Overlapping translucent rectangles
    Rects,
    /// A self-intersecting star, filled with the nonzero rule
    Star,
}

fn build_scene(demo: Demo, width: u32, height: u32) -> EncodedScene {
    let (w, h) = (width as f32, height as f32);
    let mut encoder = SceneEncoder::new();
    match demo {
        Demo::Rects => {
            encoder.fill_rect(0.1 * w, 0.1 * h, 0.6 * w, 0.6 * h, 0xd0_30_30_ff);
            encoder.fill_rect(0.3 * w, 0.3 * h, 0.8 * w, 0.8 * h, 0x30_60_d0_a0);
            encoder.fill_rect(0.45 * w, 0.05 * h, 0.55 * w, 0.95 * h, 0x20_a0_40_80);
        }
        Demo::Star => {
            let (cx, cy) = (0.5 * w, 0.5 * h);
            let r = 0.45 * w.min(h);
            let points: Vec<[f32; 2]> = (0..5)
                .map(|i| {
                    let a = std::f32::consts::TAU * (i * 2) as f32 / 5.0 - std::f32::consts::FRAC_PI_2;
                    [cx + r * a.cos(), cy + r * a.sin()]
                })
                .collect();
            encoder.fill_polygon(&points, 0xe0_b0_20_ff);
        }
    }
    encoder.finish(width, height, 0xff_ff_ff_ff)
}

fn write_png(
    path: &PathBuf,
    width: u32,
    height: u32,
    pixels: &[u32],
) -> Result<(), Box<dyn std::error::Error>> {
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    let data: Vec<u8> = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
    writer.write_image_data(&data)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
    let args = Args::parse();

    let scene = build_scene(args.scene, args.width, args.height);
    tracing::info!(
        "{:?}: {} paths, {} lines",
        args.scene,
        scene.paths.len(),
        scene.lines.len()
    );

    let device = WgpuDevice::headless()?;
    let options = DispatcherOptions {
        wait_timeout: Duration::from_millis(args.timeout_ms),
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(device, options);
    dispatcher.init()?;

    let inputs = FrameInputs::from(&scene);
    let mut buffers = dispatcher.allocate_buffers(&scene.config, &inputs.sizing())?;
    let result = dispatcher
        .dispatch(&buffers, inputs)
        .and_then(|_| dispatcher.read_output(&buffers));
    dispatcher.destroy_buffers(&mut buffers);
    dispatcher.close();

    let pixels = result?;
    write_png(&args.output, args.width, args.height, &pixels)?;
    tracing::info!("wrote {}", args.output.display());
    Ok(())
}
