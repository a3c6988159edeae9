use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use compare_studio::core::compositor::{
    composite, ImageSource, NativeFooterPolicy, RenderReport, SlotImage, SlotOutcome,
};
use compare_studio::config::default_path;
use compare_studio::core::detector::{
    detect_native_footer, is_tall_aspect, measure_native_footer_height, PresenceCheck,
};
use compare_studio::core::footer::FooterBackground;
use compare_studio::core::lens::{iso_label, lens_label, shutter_label};
use compare_studio::core::metadata::{CaptureMetadata, ExifMetadataProvider, MetadataProvider};
use compare_studio::services::embedding::EmbeddingResponse;
use compare_studio::services::scanner::{ScanError, ScanProgress, ScannedImage};
use compare_studio::services::{
    EmbeddingBatch, EmbeddingWorker, PerceptualEmbeddingProvider, ScannerService,
};
use compare_studio::session::{LogLevel, Session};
use compare_studio::StudioConfig;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use image::GenericImageView;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "compare-studio",
    version,
    about = "Group photos into scenes and compose side-by-side device comparisons"
)]
struct Cli {
    /// Config file (default: `<config_dir>/compare-studio/config.json`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory, embed every image and list its scenes
    Scenes {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Cosine similarity above which two images share a scene
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Composite two images side by side and export the result
    Compare {
        #[arg(long, value_name = "FILE")]
        left: PathBuf,
        #[arg(long, value_name = "FILE")]
        right: PathBuf,
        #[command(flatten)]
        render: RenderArgs,
    },

    /// Cluster a directory and compare the first two images of a scene
    Pair {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Scene number as listed by `scenes` (default: first scene with a pair)
        #[arg(long, conflicts_with = "interactive")]
        scene: Option<usize>,
        /// Pick the scene from a menu
        #[arg(long)]
        interactive: bool,
        #[arg(long)]
        threshold: Option<f32>,
        #[command(flatten)]
        render: RenderArgs,
    },

    /// Print normalized metadata and native footer checks for one image
    Inspect {
        #[arg(short, long, value_name = "FILE")]
        path: PathBuf,
    },

    /// Print the effective config
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

/// Overrides for the config's render settings.
#[derive(Args, Debug)]
struct RenderArgs {
    /// Synthesized footer background
    #[arg(long, value_name = "white|black")]
    footer: Option<FooterBackground>,
    /// What to do with a caption band already in the photo
    #[arg(long, value_name = "crop|keep|prefer-native")]
    native_footer: Option<NativeFooterPolicy>,
    /// How `prefer-native` decides a band is present
    #[arg(long, value_name = "pixel|aspect-ratio")]
    presence_check: Option<PresenceCheck>,
    /// Directory to export into
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
    /// JPEG quality (1-100)
    #[arg(long)]
    quality: Option<u8>,
}

impl RenderArgs {
    fn apply(self, config: &mut StudioConfig) {
        if let Some(footer) = self.footer {
            config.footer_background = footer;
        }
        if let Some(policy) = self.native_footer {
            config.native_footer = policy;
        }
        if let Some(check) = self.presence_check {
            config.presence_check = check;
        }
        if let Some(out) = self.out {
            config.output_dir = out;
        }
        if let Some(quality) = self.quality {
            config.jpeg_quality = quality;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = StudioConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Scenes { path, threshold } => {
            if let Some(threshold) = threshold {
                config.cluster_threshold = threshold;
            }
            config.validate()?;

            println!("▶ Grouping scenes in: {}", path.display());
            let session = build_session(&path, &config).await?;
            print_scenes(&session);
        }

        Commands::Compare {
            left,
            right,
            render,
        } => {
            render.apply(&mut config);
            config.validate()?;

            let provider = metadata_provider(&config);
            let left_meta = provider.extract_path(&left);
            let right_meta = provider.extract_path(&right);
            export_comparison(&config, (left, left_meta), (right, right_meta)).await?;
        }

        Commands::Pair {
            path,
            scene,
            interactive,
            threshold,
            render,
        } => {
            if let Some(threshold) = threshold {
                config.cluster_threshold = threshold;
            }
            render.apply(&mut config);
            config.validate()?;

            println!("▶ Pairing scenes in: {}", path.display());
            let mut session = build_session(&path, &config).await?;
            print_scenes(&session);

            let group_index = choose_group(&session, scene, interactive)?;
            let (left_id, right_id) = session
                .compare_pair(group_index)
                .context("Selected scene has fewer than two images")?;

            let record = |id: &str| -> Result<(PathBuf, CaptureMetadata)> {
                let image = session
                    .image(id)
                    .with_context(|| format!("Image {id} left the session"))?;
                Ok((image.path.clone(), image.metadata.clone()))
            };
            let (left, right) = (record(&left_id)?, record(&right_id)?);
            println!("\n🏆 {} vs {}", left.0.display(), right.0.display());
            export_comparison(&config, left, right).await?;
        }

        Commands::Inspect { path } => inspect(&path, &config)?,

        Commands::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if write {
                let path = cli
                    .config
                    .clone()
                    .or_else(default_path)
                    .context("No config directory on this platform")?;
                config
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("✅ Wrote {}", path.display());
            }
        }
    }

    Ok(())
}

fn metadata_provider(config: &StudioConfig) -> ExifMetadataProvider {
    ExifMetadataProvider::new().with_device_models(config.device_models.clone())
}

/// Scan `dir`, embed every new image and group the results into scenes.
async fn build_session(dir: &Path, config: &StudioConfig) -> Result<Session> {
    let mut session = Session::with_threshold(config.cluster_threshold);

    let scanned = scan_directory(dir, config).await?;
    let ids = session.add_images(scanned);
    if ids.is_empty() {
        return Ok(session);
    }

    embed_all(&mut session, &ids, config).await?;
    benchmark("clustering", || session.apply_scenes());
    Ok(session)
}

async fn scan_directory(dir: &Path, config: &StudioConfig) -> Result<Vec<ScannedImage>> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
    let scanner = ScannerService::with_extensions(&config.accepted_extensions)
        .with_exclude_patterns(&config.exclude_patterns)?
        .with_progress_sender(progress_tx);
    let finished = Arc::new(AtomicBool::new(false));
    cancel_on_interrupt(scanner.get_cancellation_token(), finished.clone());

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let progress_bar = bar.clone();
    let progress_forwarder = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            progress_bar.set_length(progress.total_files as u64);
            progress_bar.set_position(progress.files_processed as u64);
            progress_bar.set_message(progress.current_file);
        }
    });

    let provider = metadata_provider(config);
    let root = dir.to_path_buf();
    // The scanner owns the progress sender; dropping it here ends the forwarder.
    let result = tokio::task::spawn_blocking(move || {
        benchmark("scanning and reading metadata", || {
            scanner.scan_paths(&[root], &provider)
        })
    })
    .await?;
    finished.store(true, Ordering::Relaxed);
    let _ = progress_forwarder.await;

    let scanned = match result {
        Ok(scanned) => scanned,
        Err(ScanError::Cancelled) => {
            bar.abandon_with_message("Scan cancelled");
            bail!("Scan of {} was cancelled", dir.display());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to scan {}", dir.display())),
    };

    bar.finish_with_message(format!("Found {} image(s)", scanned.len()));
    Ok(scanned)
}

/// The first Ctrl-C stops a running scan. Once the scan is over, or on a
/// second Ctrl-C, the process exits.
fn cancel_on_interrupt(token: Arc<AtomicBool>, finished: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if finished.load(Ordering::Relaxed) || token.swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
            log::warn!("Interrupted, cancelling scan");
        }
    });
}

async fn embed_all(session: &mut Session, ids: &[String], config: &StudioConfig) -> Result<()> {
    let mut worker = EmbeddingWorker::spawn(PerceptualEmbeddingProvider::new(
        config.embedding_hash_size,
    ))
    .context("Failed to start embedding worker")?;

    session.log("Loading embedding model...", LogLevel::Info);
    worker.init()?;

    let mut batch = EmbeddingBatch::new();
    for id in ids {
        let Some(image) = session.image(id) else {
            continue;
        };
        batch.track(id.clone());
        worker.embed(id.clone(), image.path.clone())?;
    }

    let bar = ProgressBar::new(batch.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let start = Instant::now();
    worker
        .complete_batch(&mut batch, |response| match response {
            EmbeddingResponse::Ready => session.log("Embedding model ready.", LogLevel::Success),
            EmbeddingResponse::Progress { message } => {
                bar.set_message(message.clone());
                session.log(message, LogLevel::Info);
            }
            EmbeddingResponse::Embedding { id, vector } => {
                session.set_embedding(&id, vector);
                bar.inc(1);
            }
            EmbeddingResponse::Error { id, message } => {
                if id.is_some() {
                    bar.inc(1);
                }
                session.log_error("Embedding failed", message);
            }
        })
        .await?;
    bar.finish_with_message("Embeddings complete");
    println!("⏱ embedding took {:.2?}", start.elapsed());

    worker.terminate();
    Ok(())
}

fn print_scenes(session: &Session) {
    let groups = session.scene_groups();
    if groups.is_empty() {
        println!("No images found.");
        return;
    }

    println!(
        "Found {} group(s) at similarity > {}:",
        groups.len(),
        session.threshold()
    );
    for group in &groups {
        println!("\n✨ {} ({} image(s))", group.label, group.items.len());
        for image in &group.items {
            println!(
                "   ▶ {}  [{} · {}]",
                image.path.display(),
                image.metadata.model,
                lens_label(image.metadata.focal_length_mm)
            );
        }
    }
}

/// Resolve which scene group to compare.
fn choose_group(session: &Session, scene: Option<usize>, interactive: bool) -> Result<usize> {
    let groups = session.scene_groups();
    let candidates: Vec<usize> = groups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.scene_id.is_some() && g.items.len() >= 2)
        .map(|(i, _)| i)
        .collect();

    if candidates.is_empty() {
        bail!("No scene has at least two images to compare");
    }

    if interactive {
        let labels: Vec<String> = candidates
            .iter()
            .map(|&i| format!("{} ({} images)", groups[i].label, groups[i].items.len()))
            .collect();
        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Pick a scene to compare")
            .items(&labels)
            .default(0)
            .interact()?;
        return Ok(candidates[choice]);
    }

    match scene {
        Some(number) => {
            let index = number.checked_sub(1).context("Scene numbers start at 1")?;
            let group = groups
                .get(index)
                .with_context(|| format!("No scene {number}; found {} group(s)", groups.len()))?;
            if !candidates.contains(&index) {
                bail!("{} has fewer than two images", group.label);
            }
            Ok(index)
        }
        None => Ok(candidates[0]),
    }
}

async fn export_comparison(
    config: &StudioConfig,
    left: (PathBuf, CaptureMetadata),
    right: (PathBuf, CaptureMetadata),
) -> Result<PathBuf> {
    let options = config.composite_options();
    let output_dir = config.output_dir.clone();
    let quality = config.jpeg_quality;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Compositing…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let (path, report) = tokio::task::spawn_blocking(move || -> Result<(PathBuf, RenderReport)> {
        let (left_path, left_meta) = left;
        let (right_path, right_meta) = right;
        let left_source = ImageSource::Path(left_path);
        let right_source = ImageSource::Path(right_path);

        let (canvas, report) = benchmark("compositing", || {
            composite(
                SlotImage::new(&left_source, &left_meta),
                SlotImage::new(&right_source, &right_meta),
                &options,
            )
        });
        let path = canvas
            .export(&output_dir, &left_meta.model, &right_meta.model, quality)
            .with_context(|| format!("Failed to export into {}", output_dir.display()))?;
        Ok((path, report))
    })
    .await
    .context("Compositing task failed")??;

    spinner.finish_with_message("Composite complete");

    for (side, outcome) in [("Left", &report.left), ("Right", &report.right)] {
        match outcome {
            SlotOutcome::Placeholder { message } => {
                eprintln!("⚠️  {side} image could not be decoded: {message}");
            }
            SlotOutcome::Rendered {
                native_footer_px, ..
            } if *native_footer_px > 0 => {
                println!("   ✂️  {side}: cropped {native_footer_px}px native footer");
            }
            SlotOutcome::Rendered { .. } => {}
        }
    }

    println!("✅ Saved comparison to {}", path.display());
    Ok(path)
}

fn inspect(path: &Path, config: &StudioConfig) -> Result<()> {
    let meta = metadata_provider(config).extract_path(path);
    let image = ImageSource::Path(path.to_path_buf())
        .decode()
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    let (width, height) = image.dimensions();

    let or_dash = |value: &str| {
        if value.is_empty() {
            "—".to_string()
        } else {
            value.to_string()
        }
    };

    println!("🗂️  {}", path.display());
    println!("     size:      {}x{}", width, height);
    println!("     make:      {}", or_dash(&meta.make));
    println!("     model:     {}", meta.model);
    println!("     lens:      {}", lens_label(meta.focal_length_mm));
    println!("     aperture:  {}", meta.aperture);
    println!("     shutter:   {}", shutter_label(meta.shutter_seconds));
    println!("     iso:       {}", iso_label(meta.iso));
    println!("     captured:  {}", meta.captured_at.to_rfc3339());
    println!("     native footer (metadata):     {:?}", meta.has_native_footer);
    println!("     native footer (pixel check):  {}", detect_native_footer(&image));
    println!("     native footer (aspect ratio): {}", is_tall_aspect(width, height));
    println!("     native footer height:         {}px", measure_native_footer_height(&image));
    Ok(())
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
