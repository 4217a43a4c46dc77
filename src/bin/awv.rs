// Thin demo shim around the library: load an image, build a pyramid, run a
// corner detector, optionally attach BRIEF descriptors, and write the
// keypoints out raw or as JSON.

#[macro_use]
extern crate log;

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use once_cell::sync::Lazy;

use aw_vision::brief::BriefExtractor;
use aw_vision::fast::FastDetector;
use aw_vision::harris::HarrisDetector;
use aw_vision::image::Image;
use aw_vision::image_io::{self, LoadMode};
use aw_vision::json;
use aw_vision::keypoint::{write_keypoints, Keypoint};
use aw_vision::pyramid::PyramidBuilder;

static START: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Detector {
    Fast,
    Harris,
}

#[derive(Debug, Parser)]
#[command(name = "awv", about = "Detect keypoints and compute descriptors on an image.")]
struct Opt {
    /// Input image (pnm, png or jpeg).
    #[arg(value_parser)]
    input: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Detector::Fast)]
    /// Corner detector to run.
    detector: Detector,

    #[arg(short, long, default_value_t = 15)]
    /// FAST intensity threshold in [0, 255].
    threshold: i32,

    #[arg(short = 'l', long, default_value_t = 3)]
    /// Number of fast-pyramid levels.
    levels: usize,

    #[arg(short, long, default_value_t = 1000)]
    /// Keypoint budget after non-maximum suppression.
    max_keys: usize,

    #[arg(long)]
    /// Compute BRIEF descriptors for admissible keypoints.
    brief: bool,

    #[arg(long, default_value_t = 32)]
    /// BRIEF descriptor length in octets.
    octets: usize,

    #[arg(long, default_value_t = 16)]
    /// BRIEF sampling radius.
    radius: i32,

    #[arg(short, long)]
    /// Write keypoints as raw binary records to this file.
    output: Option<PathBuf>,

    #[arg(long)]
    /// Print keypoints as JSON to stdout.
    json: bool,
}

fn init_logging() {
    Lazy::force(&START);

    env_logger::Builder::from_default_env()
        .format(|f, record| {
            let dur = START.elapsed();
            writeln!(
                f,
                " {:04}.{:03} {} > {}",
                dur.as_secs(),
                dur.subsec_millis(),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn main() {
    init_logging();

    let opt = Opt::parse();
    if catch_unwind(AssertUnwindSafe(|| run(&opt))).is_err() {
        // Fatal diagnostics have already been logged by the panic path.
        process::exit(-99);
    }
}

fn run(opt: &Opt) {
    let mut img = Image::default();
    image_io::xload(&mut img, &opt.input, LoadMode::Grayscale);
    info!("loaded {} ({}x{})", opt.input.display(), img.width(), img.height());

    let mut builder = PyramidBuilder::new_fast(opt.levels, 0.0);
    let pyr = builder.build0(&img);

    let keys = match opt.detector {
        Detector::Fast => {
            let mut det = FastDetector::new(opt.threshold);
            det.detect_pyr(opt.max_keys, &pyr, 0)
        }
        Detector::Harris => {
            let mut det = HarrisDetector::new();
            det.detect_pyr(&pyr, 0, opt.max_keys, false)
        }
    };
    info!("{} keypoints from {} levels", keys.len(), pyr.n_levels());

    if opt.brief {
        describe(&pyr, &keys, opt);
    }

    if let Some(path) = &opt.output {
        let mut out = BufWriter::new(File::create(path).unwrap_or_else(|e| {
            error!("could not create {}: {e}", path.display());
            process::exit(1);
        }));
        write_keypoints(&keys, &mut out).expect("writing keypoint records");
        out.flush().expect("flushing keypoint records");
        info!("wrote {} records to {}", keys.len(), path.display());
    }

    if opt.json {
        println!("{}", json::keypoints_to_json(&keys).to_string_pretty(2));
    }
}

fn describe(pyr: &aw_vision::pyramid::Pyramid, keys: &[Keypoint], opt: &Opt) {
    let be = BriefExtractor::new_with_seed(
        opt.octets,
        opt.radius,
        aw_vision::brief::GOOD_SEED_N32_R16,
    );

    let mut desc = vec![0u8; opt.octets];
    let mut n_described = 0usize;
    let mut preview = String::new();
    for key in keys {
        if !be.check_point_pyr(pyr, key.x, key.y, key.level as usize) {
            continue;
        }
        be.compute_pyr(pyr, key.x, key.y, key.level as usize, &mut desc);
        n_described += 1;

        if n_described == 1 {
            for octet in &desc {
                write!(preview, "{octet:02x}").expect("writing to a String can not fail");
            }
        }
    }

    info!("described {n_described}/{} keypoints", keys.len());
    if !preview.is_empty() {
        debug!("first descriptor: {preview}");
    }
}
