use anyhow::{bail, Context, Result};
use bag_tools::{
    is_bag, is_hdf5, BagFile, BboxFormat, BboxWriter, Hdf5Store, RasterFormat, RasterWriter,
    TrackListWriter,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Common {
    /// Input BAG file
    #[arg(value_name = "BAG_FILE")]
    bag_file: PathBuf,

    /// Increase output verbosity
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export the bounding box as a vector file
    Bbox {
        #[command(flatten)]
        common: Common,

        /// One of: gjs, gml, kml, shp
        #[arg(short, long, default_value = "kml")]
        format: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export the elevation layer as a raster
    Elevation(RasterArgs),

    /// Export the uncertainty layer as a raster
    Uncertainty(RasterArgs),

    /// Export the sounding density layer as a raster
    Density(RasterArgs),

    /// Extract the XML metadata
    Metadata {
        #[command(flatten)]
        common: Common,

        /// One of: xml
        #[arg(short, long, default_value = "xml")]
        format: String,

        /// Output XML file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export the tracking list as CSV
    Tracklist {
        #[command(flatten)]
        common: Common,

        /// One of: csv
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Add a header line with the field names
        #[arg(long)]
        header: bool,
    },

    /// Validate the embedded metadata
    Validate {
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args, Debug)]
struct RasterArgs {
    #[command(flatten)]
    common: Common,

    /// One of: ascii, geotiff, xyz
    #[arg(short, long, default_value = "geotiff")]
    format: String,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reproject to this EPSG code
    #[arg(long)]
    epsg: Option<u32>,
}

impl Command {
    fn common(&self) -> &Common {
        match self {
            Command::Bbox { common, .. }
            | Command::Metadata { common, .. }
            | Command::Tracklist { common, .. }
            | Command::Validate { common } => common,
            Command::Elevation(args) | Command::Uncertainty(args) | Command::Density(args) => {
                &args.common
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.command.common().verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn open_bag(path: &Path) -> Result<BagFile<Hdf5Store>> {
    debug!("input: {}", path.display());
    if !path.exists() {
        bail!("the input file does not exist: {}", path.display());
    }
    if !is_hdf5(path) {
        bail!("the input file is not an HDF5 file: {}", path.display());
    }
    if !is_bag(path) {
        bail!("the input file does not seem a BAG file: {}", path.display());
    }
    BagFile::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn run(command: Command) -> Result<()> {
    let start_time = std::time::Instant::now();

    match command {
        Command::Bbox {
            common,
            format,
            output,
        } => {
            let Some(format) = BboxFormat::from_tag(&format) else {
                bail!(
                    "unknown format {format}, expected one of: {}",
                    BboxFormat::TAGS.join(", ")
                );
            };
            let mut bag = open_bag(&common.bag_file)?;
            let meta = bag
                .populate_metadata()
                .context("issue in metadata population")?;
            let title = common
                .bag_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            BboxWriter::new(format)
                .with_title(title)
                .write(meta, output.as_deref())
                .context("issue in output creation")?;
        }
        Command::Elevation(args) => export_layer(args, "elevation")?,
        Command::Uncertainty(args) => export_layer(args, "uncertainty")?,
        Command::Density(args) => export_layer(args, "density")?,
        Command::Metadata {
            common,
            format,
            output,
        } => {
            if format != "xml" {
                bail!("unknown format {format}, expected: xml");
            }
            let bag = open_bag(&common.bag_file)?;
            bag.extract_metadata(output.as_deref())?;
        }
        Command::Tracklist {
            common,
            format,
            output,
            header,
        } => {
            if format != "csv" {
                bail!("unknown format {format}, expected: csv");
            }
            let bag = open_bag(&common.bag_file)?;
            let entries = bag
                .tracking_list()
                .context("issue in tracking-list recovery")?;
            let mut writer = TrackListWriter::new();
            if header {
                writer = writer.with_header(bag.tracking_list_fields());
            }
            writer
                .write(&entries, output.as_deref())
                .context("issue in output creation")?;
        }
        Command::Validate { common } => {
            let mut bag = open_bag(&common.bag_file)?;
            println!("{}", bag.validation_info()?);
        }
    }

    info!("done in {:?}", start_time.elapsed());
    Ok(())
}

fn export_layer(args: RasterArgs, layer: &str) -> Result<()> {
    let Some(format) = RasterFormat::from_tag(&args.format) else {
        bail!(
            "unknown format {}, expected one of: {}",
            args.format,
            RasterFormat::TAGS.join(", ")
        );
    };
    let mut bag = open_bag(&args.common.bag_file)?;
    let meta = bag
        .populate_metadata()
        .context("issue in metadata population")?
        .clone();

    let grid = match layer {
        "elevation" => bag.elevation(false, None),
        "uncertainty" => bag.uncertainty(false, None),
        _ => bag.density(false, None),
    }
    .with_context(|| format!("issue in {layer} population"))?;

    RasterWriter::new(format)
        .with_epsg(args.epsg)
        .write(&grid, &meta, layer, args.output.as_deref())
        .context("issue in output creation")?;
    Ok(())
}
