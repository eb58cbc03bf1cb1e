//! kernelfx command line driver.
//!
//! ```text
//! kernelfx render --config scene.json --out renders/
//! kernelfx params
//! kernelfx defaults > scene.json
//! kernelfx pixel renders/zbuffer.exr 320 180
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use kernelfx::prelude::*;
use kernelfx::raster::{id_colour, velocity_match};
use kernelfx::{motion, procedural};

#[derive(Parser)]
#[command(name = "kernelfx", version, about = "Per-pixel compositing kernels")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every kernel for a scene to EXR files
    Render {
        /// Scene preset (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output directory
        #[arg(short, long, default_value = "renders")]
        out: PathBuf,
        /// Override the particle move frame
        #[arg(short, long)]
        frame: Option<i32>,
    },
    /// Print every kernel's parameter table
    Params,
    /// Print the default scene preset as JSON
    Defaults,
    /// Print one pixel of an image
    Pixel {
        image: PathBuf,
        x: i32,
        y: i32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose > 0 {
        logger.filter_level(log_level(cli.verbose));
    }
    logger.init();

    match cli.command {
        Commands::Render { config, out, frame } => {
            let mut scene = match config {
                Some(path) => SceneConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SceneConfig::default(),
            };
            if let Some(frame) = frame {
                scene.motion.frame = frame;
            }
            render_scene(&scene, &out)
        }
        Commands::Params => {
            print_params::<CameraParams>("Camera");
            print_params::<RasterParams>("Particle Renderer");
            print_params::<IdColourParams>("ID To Colour");
            print_params::<VelocityMatchParams>("Velocity Match");
            print_params::<MoveParams>("Particle Move");
            print_params::<BeamParams>("Beam");
            print_params::<LinesParams>("Lines");
            print_params::<VoronoiParams>("Voronoi Noise");
            print_params::<CloudConfig>("Particle Cloud");
            Ok(())
        }
        Commands::Defaults => {
            println!("{}", SceneConfig::default().to_json()?);
            Ok(())
        }
        Commands::Pixel { image, x, y } => {
            let loaded = Image::open(&image).with_context(|| format!("opening {}", image.display()))?;
            let value = loaded.try_get(IVec2::new(x, y))?;
            println!("({}, {}) = [{}, {}, {}, {}]", x, y, value.x, value.y, value.z, value.w);
            Ok(())
        }
    }
}

/// Log level for a `-v` count; 0 keeps the `RUST_LOG` default.
fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn print_params<P: KernelParams>(title: &str) {
    println!("{}", title);
    for info in P::PARAMS {
        println!("  {:<16} {}", info.field, info.label);
    }
    println!();
}

fn render_scene(scene: &SceneConfig, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let dst = scene.destination();
    let ctx = ProjectionContext::new(&scene.camera)?;

    let mut cloud = scene.cloud.generate();
    let current = cloud.positions.clone();
    cloud.positions = motion::run(&scene.motion, &current)?;
    if let Some(bounds) = ParticleBounds::of(&cloud.positions) {
        log::info!(
            "particle bounds {:?}..{:?}, centre {:?}",
            bounds.min,
            bounds.max,
            bounds.centre()
        );
    }

    let frame = render_frame(&ctx, &scene.raster, &cloud.inputs(), dst)?;
    save(&frame.zbuffer.to_image(), out, "zbuffer")?;
    save(&frame.colour, out, "composite")?;

    let ids = frame.ids.to_image();
    save(&ids, out, "single_pixel")?;
    save(&id_colour::run(&scene.id_colour, &ids, Some(&cloud.colours))?, out, "id_colour")?;

    // Match this frame's slots against the next frame by slot id.
    let mut next_motion = scene.motion.clone();
    next_motion.frame += 1;
    let next_positions = motion::run(&next_motion, &current)?;
    let matched = velocity_match::run(
        &scene.velocity_match,
        &tag_slots(&cloud.positions),
        &Image::row(tag_slots(&next_positions).into_pixels()),
    );
    save(&matched, out, "velocity_match")?;

    let beam = procedural::beam::Beam::new(&scene.beam);
    save(&render(&beam, dst), out, "beam")?;
    let lines = procedural::lines::Lines::new(&scene.lines)?;
    save(&render(&lines, dst), out, "lines")?;
    let voronoi = procedural::voronoi::Voronoi::new(&scene.voronoi)?;
    save(&render(&voronoi, dst), out, "voronoi")?;

    log::info!("rendered {}x{} into {}", dst.width, dst.height, out.display());
    Ok(())
}

/// Replace alpha with `slot + 1` for live particles, 0 otherwise.
fn tag_slots(positions: &Image) -> Image {
    let extent = positions.extent();
    Image::from_fn(extent, |pos| {
        let p = positions.at(pos);
        let id = extent.index(pos).map_or(0.0, |i| (i + 1) as f32);
        p.truncate().extend(if p.w > 0.0 { id } else { 0.0 })
    })
}

fn save(image: &Image, out: &Path, name: &str) -> Result<()> {
    let path = out.join(format!("{}.exr", name));
    image.save(&path).with_context(|| format!("writing {}", path.display()))?;
    log::debug!("wrote {}", path.display());
    Ok(())
}
