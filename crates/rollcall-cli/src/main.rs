use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_models::{FaceEncoder, ModelPaths};
use rollcall_store::SqliteRosterStore;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

mod encode;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance enrollment and encoding CLI")]
struct Cli {
    /// Directory containing the ONNX model files
    #[arg(long, global = true, env = "ROLLCALL_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Path to the SQLite roster database
    #[arg(long = "db", global = true, env = "ROLLCALL_DB_PATH")]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a student to the roster
    AddStudent {
        #[arg(short, long)]
        name: String,
    },
    /// Enroll a face encoding for a student from an image
    Enroll {
        #[arg(short, long)]
        student_id: i64,
        /// Image containing the student's face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List students and how many encodings each has
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the base64 face encoding of an image
    Encode {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Serve single-image encoding over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,
        #[arg(long, default_value_t = 5001)]
        port: u16,
    },
    /// List V4L2 video devices
    Devices,
}

impl Cli {
    fn model_paths(&self) -> ModelPaths {
        let dir = self
            .model_dir
            .clone()
            .unwrap_or_else(rollcall_models::default_model_dir);
        ModelPaths::in_dir(&dir)
    }

    fn store(&self) -> SqliteRosterStore {
        let path = self
            .db_path
            .clone()
            .unwrap_or_else(|| rollcall_models::default_data_dir().join("attendance.db"));
        SqliteRosterStore::new(path)
    }
}

fn load_encoder(paths: &ModelPaths) -> Result<FaceEncoder> {
    FaceEncoder::load(&paths.scrfd, &paths.arcface).context("loading face encoder")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::AddStudent { name } => {
            let id = cli.store().add_student(name)?;
            println!("Added student {id}: {name}");
        }
        Commands::Enroll { student_id, image } => {
            enroll(&cli, *student_id, image)?;
        }
        Commands::List { json } => {
            let census = cli.store().encoding_census()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&census)?);
            } else if census.is_empty() {
                println!("No students enrolled");
            } else {
                println!("{:<6} {:<24} {:<8} AUXILIARY", "ID", "NAME", "PRIMARY");
                for row in &census {
                    println!(
                        "{:<6} {:<24} {:<8} {}",
                        row.student_id,
                        row.name,
                        if row.has_primary { "yes" } else { "no" },
                        row.auxiliary_count
                    );
                }
            }
        }
        Commands::Encode { image } => {
            let mut encoder = load_encoder(&cli.model_paths())?;
            let result = encode::encode_image(&mut encoder, image);
            let (_, body) = encode::response_body(&result);
            println!("{body}");
            if result.is_err() {
                std::process::exit(1);
            }
        }
        Commands::Serve { bind, port } => {
            let encoder = load_encoder(&cli.model_paths())?;
            encode::serve(encoder, SocketAddr::new(*bind, *port)).await?;
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No video devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn enroll(cli: &Cli, student_id: i64, image: &Path) -> Result<()> {
    let frame = rollcall_models::load_image_frame(image)
        .with_context(|| format!("reading {}", image.display()))?;
    let mut encoder = load_encoder(&cli.model_paths())?;
    let embedding = rollcall_core::enroll::encode_single(&mut encoder, &frame)?;

    let added = cli.store().add_encoding(student_id, &embedding)?;
    println!(
        "Stored encoding {} for student {student_id} ({} dims)",
        added.encoding_id,
        embedding.dimension()
    );
    if added.backfilled_primary {
        println!("Student had no primary encoding; this one is now primary");
    }
    Ok(())
}
