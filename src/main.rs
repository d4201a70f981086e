use clap::Parser;
use envbake::{filter_environment, logger, Distribution, FilterRequestBuilder, Result, TargetFormat};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "envbake",
    version,
    about = "Prefilters environment maps for image based lighting"
)]
struct Cli {
    /// Equirectangular panorama image or KTX2 cubemap
    input: PathBuf,

    /// Output KTX2 cubemap path
    #[arg(short, long, default_value = "output.ktx2")]
    output: PathBuf,

    /// Write the BRDF lookup table to this PNG path
    #[arg(long)]
    lut: Option<PathBuf>,

    /// Filtering distribution (none, lambertian, ggx, charlie)
    #[arg(short, long, default_value = "ggx")]
    distribution: Distribution,

    /// Serialized pixel format (rgba8, rgba16f, rgba32f, rgb9e5)
    #[arg(short = 'f', long, default_value = "rgba16f")]
    target_format: TargetFormat,

    /// Cubemap face size, derived from the input when zero
    #[arg(short, long, default_value_t = 0)]
    resolution: u32,

    /// Mip level count, derived from the resolution when zero
    #[arg(short, long, default_value_t = 0)]
    mip_count: u32,

    /// Samples per texel
    #[arg(short, long, default_value_t = 1024)]
    sample_count: u32,

    /// Level-of-detail bias applied when sampling the source cubemap
    #[arg(long, default_value_t = 0.0)]
    lod_bias: f32,

    /// Enable the validation layer and debug labels
    #[arg(long)]
    debug: bool,
}

fn run(cli: Cli) -> Result<()> {
    logger::create_logger()?;
    let request = FilterRequestBuilder::default()
        .input(cli.input)
        .output_cubemap(cli.output)
        .output_lut(cli.lut)
        .distribution(cli.distribution)
        .target_format(cli.target_format)
        .resolution(cli.resolution)
        .mip_count(cli.mip_count)
        .sample_count(cli.sample_count)
        .lod_bias(cli.lod_bias)
        .debug(cli.debug)
        .build()?;
    filter_environment(&request)
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {}", error);
        std::process::exit(error.exit_code());
    }
}
