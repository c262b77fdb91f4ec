use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use phototrips::config::Config;
use phototrips::processor::{ClusteringParams, MergeParams, TripCriteria};
use phototrips::store::Library;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "phototrips",
    version,
    about = "Group a photo library into sessions and trips"
)]
struct Cli {
    /// Library directory holding the pipeline's JSON documents
    #[arg(long, global = true, value_name = "DIR", env = "PHOTOTRIPS_LIBRARY")]
    library: Option<PathBuf>,

    /// Config file (default: PHOTOTRIPS_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import photo records and resolve them into devices
    Discover {
        /// JSON array or JSON Lines file of photo records
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        /// Ignore photos taken before this date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        start_date: Option<NaiveDate>,
        /// Ignore photos taken after this date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        end_date: Option<NaiveDate>,
    },

    /// Assign photographer names to devices
    LabelDevices {
        /// Also prompt for devices that already have a label
        #[arg(long, conflicts_with = "device")]
        all: bool,
        /// Label a single device without prompting
        #[arg(long, value_name = "ID", requires = "photographer")]
        device: Option<String>,
        /// Photographer name for `--device`
        #[arg(long, value_name = "NAME", requires = "device")]
        photographer: Option<String>,
    },

    /// Infer locations for photos without GPS data
    InferLocations {
        /// Minimum confidence for a stored inference (0.0-1.0)
        #[arg(long, value_name = "F")]
        min_confidence: Option<f64>,
    },

    /// Cluster located photos into photo sessions
    DetectSessions(SessionArgs),

    /// Manage home locations
    Homes {
        #[command(subcommand)]
        command: HomesCmd,
    },

    /// Segment sessions into trips away from home
    DetectTrips(TripArgs),

    /// Inspect and edit detected trips
    Trips {
        #[command(subcommand)]
        command: TripsCmd,
    },

    /// Show how photos are categorised
    Analyze,

    /// Export home locations and device labels to seed files
    ExportSeeds {
        #[arg(long, value_name = "DIR", default_value = "seeds")]
        dir: PathBuf,
    },

    /// Restore home locations and device labels from seed files
    ImportSeeds {
        #[arg(long, value_name = "DIR", default_value = "seeds")]
        dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Maximum hours between consecutive photos
    #[arg(long, value_name = "HOURS")]
    max_time_gap: Option<f64>,
    /// Maximum km between consecutive photos
    #[arg(long, value_name = "KM")]
    max_distance: Option<f64>,
    /// Minimum photos for a session
    #[arg(long, value_name = "N")]
    min_photos: Option<usize>,
    /// Ignore inferred locations below this confidence
    #[arg(long, value_name = "F")]
    min_confidence: Option<f64>,
    /// Merge overlapping sessions from different photographers
    #[arg(long)]
    merge: bool,
    /// Hours between sessions for merging
    #[arg(long, value_name = "HOURS")]
    merge_time_gap: Option<f64>,
    /// Km between session centres for merging
    #[arg(long, value_name = "KM")]
    merge_distance: Option<f64>,
}

impl SessionArgs {
    fn apply(&self, params: &mut ClusteringParams, merge: &mut MergeParams) {
        override_with(&mut params.max_time_gap_hours, self.max_time_gap);
        override_with(&mut params.max_distance_km, self.max_distance);
        override_with(&mut params.min_photos_per_session, self.min_photos);
        override_with(&mut params.min_confidence, self.min_confidence);
        merge.enabled |= self.merge;
        override_with(&mut merge.max_time_gap_hours, self.merge_time_gap);
        override_with(&mut merge.max_distance_km, self.merge_distance);
    }
}

#[derive(Args, Debug)]
struct TripArgs {
    /// Minimum km from home for a session to count as away
    #[arg(long, value_name = "KM")]
    min_distance: Option<f64>,
    /// Maximum hours between sessions of one trip
    #[arg(long, value_name = "HOURS")]
    max_session_gap: Option<f64>,
    /// Minimum trip duration in hours
    #[arg(long, value_name = "HOURS")]
    min_duration: Option<f64>,
    /// Minimum sessions per trip
    #[arg(long, value_name = "N")]
    min_sessions: Option<usize>,
    /// Maximum hours at home before a trip ends
    #[arg(long, value_name = "HOURS")]
    max_home_stay: Option<f64>,
    /// Force a trip split at midnight starting this date; repeatable
    #[arg(long = "split-date", value_name = "DATE")]
    split_dates: Vec<NaiveDate>,
}

impl TripArgs {
    fn apply(&self, criteria: &mut TripCriteria) {
        override_with(&mut criteria.min_distance_from_home_km, self.min_distance);
        override_with(&mut criteria.max_session_gap_hours, self.max_session_gap);
        override_with(&mut criteria.min_duration_hours, self.min_duration);
        override_with(&mut criteria.min_sessions, self.min_sessions);
        override_with(&mut criteria.max_home_stay_hours, self.max_home_stay);
        if !self.split_dates.is_empty() {
            criteria.split_dates = self.split_dates.clone();
        }
        criteria.split_dates.sort();
        criteria.split_dates.dedup();
    }
}

#[derive(Subcommand, Debug)]
enum HomesCmd {
    /// Add a home location
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in km
        #[arg(long, value_name = "KM", default_value_t = 1.0)]
        radius: f64,
    },
    /// List home locations
    List,
    /// Remove a home location
    Remove {
        #[arg(long)]
        id: u64,
    },
}

#[derive(Subcommand, Debug)]
enum TripsCmd {
    /// List stored trips
    List,
    /// Rename a trip or change whether it is excluded
    Edit {
        #[arg(long)]
        id: u64,
        /// New name; kept when trips are detected again
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "include")]
        exclude: bool,
        #[arg(long)]
        include: bool,
    },
}

fn override_with<T: Copy>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = match (verbose, quiet) {
        (true, _) => "debug",
        (_, true) => "warn",
        _ => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let library_dir = cli.library.clone().unwrap_or_else(|| config.library_dir());
    let library = Library::open(&library_dir)
        .with_context(|| format!("Failed to open library {}", library_dir.display()))?;

    match cli.command {
        Commands::Discover {
            input,
            start_date,
            end_date,
        } => commands::discover(&library, &input, start_date, end_date)?,

        Commands::LabelDevices {
            all,
            device,
            photographer,
        } => match (device, photographer) {
            (Some(device), Some(photographer)) => {
                commands::label_device(&library, &device, &photographer)?
            }
            _ => commands::label_devices_interactive(&library, all)?,
        },

        Commands::InferLocations { min_confidence } => {
            override_with(&mut config.inference.min_confidence, min_confidence);
            config.validate().context("Invalid inference parameters")?;
            commands::infer(&library, &config.inference)?
        }

        Commands::DetectSessions(args) => {
            args.apply(&mut config.sessions, &mut config.merge);
            config.validate().context("Invalid session parameters")?;
            commands::sessions(&library, &config.sessions, &config.merge)?
        }

        Commands::Homes { command } => match command {
            HomesCmd::Add {
                name,
                lat,
                lon,
                radius,
            } => commands::add_home(&library, &name, lat, lon, radius)?,
            HomesCmd::List => commands::list_homes(&library)?,
            HomesCmd::Remove { id } => commands::remove_home(&library, id)?,
        },

        Commands::DetectTrips(args) => {
            args.apply(&mut config.trips);
            config.validate().context("Invalid trip parameters")?;
            commands::trips(&library, &config.trips)?
        }

        Commands::Trips { command } => match command {
            TripsCmd::List => commands::list_trips(&library)?,
            TripsCmd::Edit {
                id,
                name,
                exclude,
                include,
            } => {
                let excluded = match (exclude, include) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                commands::edit_trip(&library, id, name, excluded)?
            }
        },

        Commands::Analyze => commands::analyze(&library)?,

        Commands::ExportSeeds { dir } => commands::export_seeds(&library, &dir)?,
        Commands::ImportSeeds { dir } => commands::import_seeds(&library, &dir)?,
    }

    Ok(())
}
