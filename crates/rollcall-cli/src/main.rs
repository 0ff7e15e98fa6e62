use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{EmbeddingStore, MatchConfig, Metric, RepresentativeMode};
use rollcall_io::{
    enroll_directory, match_scene, run_attendance, Config, Gallery, ManifestBackend, ReportRow,
    RunSettings,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance from face embeddings")]
struct Cli {
    /// Config file (default: $ROLLCALL_CONFIG or ~/.config/rollcall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MatchOptions {
    /// Comparison metric: cosine or euclidean
    #[arg(long)]
    metric: Option<Metric>,
    /// Match threshold (default depends on the metric)
    #[arg(long)]
    threshold: Option<f32>,
    /// How an identity is represented: per-reference or mean
    #[arg(long)]
    mode: Option<RepresentativeMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll every identity under the enrollment directory and save the gallery
    Enroll {
        /// Enrollment directory (one subdirectory per student)
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        gallery: Option<PathBuf>,
    },
    /// Take attendance from one or more scene manifests
    Run {
        #[arg(required = true)]
        scenes: Vec<PathBuf>,
        #[arg(long)]
        roster: Option<PathBuf>,
        #[arg(long)]
        gallery: Option<PathBuf>,
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Also write a per-face match report
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        matching: MatchOptions,
    },
    /// Match the faces of one scene without touching the ledger
    Match {
        scene: PathBuf,
        #[arg(long)]
        gallery: Option<PathBuf>,
        #[command(flatten)]
        matching: MatchOptions,
    },
    /// List enrolled identities
    List {
        #[arg(long)]
        gallery: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Ask the daemon to take attendance from a scene manifest
    Trigger { scene: PathBuf },
}

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and `AttendanceProxyBlocking`.
#[zbus::proxy(
    interface = "io.rollcall.Attendance1",
    default_service = "io.rollcall.Attendance1",
    default_path = "/io/rollcall/Attendance1"
)]
trait Attendance {
    async fn take_attendance(&self, scene: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Command-line flags win over the config file and environment.
fn resolve_matching(base: MatchConfig, opts: &MatchOptions) -> Result<MatchConfig> {
    let mut matching = match opts.metric {
        // A new metric invalidates the configured threshold.
        Some(metric) if metric != base.metric => MatchConfig {
            representative_mode: base.representative_mode,
            ..MatchConfig::for_metric(metric)
        },
        _ => base,
    };
    if let Some(threshold) = opts.threshold {
        if !threshold.is_finite() {
            bail!("threshold must be a finite number, got {threshold}");
        }
        matching.threshold = threshold;
    }
    if let Some(mode) = opts.mode {
        matching.representative_mode = mode;
    }
    Ok(matching)
}

fn load_store(gallery: &Path) -> Result<EmbeddingStore> {
    if !gallery.exists() {
        bail!(
            "no gallery at {}; run `rollcall enroll` first",
            gallery.display()
        );
    }
    let store = Gallery::open(gallery)?.load()?;
    if store.is_empty() {
        tracing::warn!(gallery = %gallery.display(), "gallery is empty; every face will be Unknown");
    }
    Ok(store)
}

fn print_rows(rows: &[ReportRow]) {
    for row in rows {
        let score = match (row.score, row.metric) {
            (Some(score), Some(kind)) => format!("{kind} {score:.4}"),
            _ => "no embedding".to_string(),
        };
        let b = &row.bbox;
        println!(
            "  {} #{:<3} at ({}, {}) {}x{}  {:<16} {}",
            row.scene, row.face, b.x, b.y, b.width, b.height, row.identity, score
        );
    }
}

/// `RUST_LOG` when set and valid; otherwise warnings, so that run warnings
/// reach the terminal without any setup.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Enroll { dir, gallery } => {
            let dir = dir.unwrap_or_else(|| config.enroll_dir.clone());
            let gallery = gallery.unwrap_or_else(|| config.gallery_path.clone());
            println!("Enrolling from {}", dir.display());

            let (store, summary) = enroll_directory(&dir, &mut ManifestBackend)?;
            let written = Gallery::open(&gallery)?.save(&store)?;
            println!(
                "Enrolled {} identities ({written} embeddings) into {}",
                summary.identities,
                gallery.display()
            );
            if summary.skipped_images > 0 {
                println!("Skipped {} reference images", summary.skipped_images);
            }
            for identity in &summary.dropped {
                println!("Dropped {identity}: no usable reference image");
            }
        }
        Commands::Run {
            scenes,
            roster,
            gallery,
            ledger,
            report,
            matching,
        } => {
            let store = load_store(gallery.as_deref().unwrap_or(&config.gallery_path))?;
            let mut settings = RunSettings::from(&config);
            settings.matching = resolve_matching(config.matching, &matching)?;
            if let Some(roster) = roster {
                settings.roster_path = roster;
            }
            if let Some(ledger) = ledger {
                settings.ledger_path = ledger;
            }
            if report.is_some() {
                settings.report_path = report;
            }

            let now = chrono::Local::now().naive_local();
            let outcome = run_attendance(&mut ManifestBackend, &store, &settings, &scenes, now)?;

            for record in &outcome.reconciliation.records {
                println!("{:<16} {:<24} {}", record.key, record.name, record.status);
            }
            let s = &outcome.summary;
            println!(
                "{} present, {} absent ({} faces, {} unknown, {} without embedding)",
                s.present, s.absent, s.faces, s.unknown_faces, s.no_embedding
            );
            println!("Ledger written to {}", s.ledger.display());
        }
        Commands::Match {
            scene,
            gallery,
            matching,
        } => {
            let store = load_store(gallery.as_deref().unwrap_or(&config.gallery_path))?;
            let matching = resolve_matching(config.matching, &matching)?;
            println!(
                "Matching {} ({}, threshold {}, {})",
                scene.display(),
                matching.metric,
                matching.threshold,
                matching.representative_mode
            );

            let report = match_scene(&mut ManifestBackend, &store, &matching, &scene)?;
            let name = scene.display().to_string();
            let rows = ReportRow::from_scene(&name, &report);
            if rows.is_empty() {
                println!("No faces in scene");
            }
            print_rows(&rows);
        }
        Commands::List { gallery } => {
            let gallery = gallery.unwrap_or_else(|| config.gallery_path.clone());
            if !gallery.exists() {
                println!("No identities enrolled");
                return Ok(());
            }
            let identities = Gallery::open(&gallery)?.identities()?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for (identity, references) in identities {
                println!("{identity:<16} {references} reference(s)");
            }
        }
        Commands::Status => {
            let conn = zbus::Connection::session().await?;
            let proxy = AttendanceProxy::new(&conn).await?;
            let status = proxy
                .status()
                .await
                .context("rollcalld: not connected")?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Trigger { scene } => {
            // The daemon resolves paths against its own working directory.
            let scene = std::fs::canonicalize(&scene)
                .with_context(|| format!("cannot resolve {}", scene.display()))?;
            let conn = zbus::Connection::session().await?;
            let proxy = AttendanceProxy::new(&conn).await?;
            let summary = proxy.take_attendance(&scene.to_string_lossy()).await?;
            let value: serde_json::Value = serde_json::from_str(&summary)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
