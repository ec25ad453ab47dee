use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use choreo_core::storage::{AutoSaveManager, FileStorage, FormationRecord, create_autosave_manager};
use choreo_core::{
    EditorConfig, ExportFormat, ExportOptions, Formation, export_formation, positions_at_time,
};
use clap::{Parser, Subcommand, ValueEnum};
use pollster::block_on;

#[derive(Parser, Debug)]
#[command(name = "choreo", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize a formation file.
    Inspect(InspectArgs),
    /// Print every performer's position at one instant.
    Sample(SampleArgs),
    /// Write a time-sampled export.
    Export(ExportArgs),
    /// Save a formation into the formation store.
    Save(SaveArgs),
    /// List formations in the formation store.
    List(ListArgs),
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Formation JSON (a bare formation or a saved record).
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct SampleArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Time in milliseconds.
    #[arg(long)]
    time: f64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Parser, Debug)]
struct ExportArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output path. Defaults to the input name with the format's extension.
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FormatArg::Json)]
    format: FormatArg,

    /// Sampling interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval: u64,

    /// Leave raw keyframes out of JSON exports.
    #[arg(long, default_value_t = false)]
    no_keyframes: bool,
}

#[derive(Parser, Debug)]
struct SaveArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Project to file the saved record under.
    #[arg(long)]
    project: Option<String>,

    /// Store directory. Defaults to the platform data directory.
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Store directory. Defaults to the platform data directory.
    #[arg(long)]
    store: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Inspect(args) => cmd_inspect(args),
        Command::Sample(args) => cmd_sample(args),
        Command::Export(args) => cmd_export(args),
        Command::Save(args) => cmd_save(args),
        Command::List(args) => cmd_list(args),
    }
}

fn open_store(dir: Option<PathBuf>) -> anyhow::Result<AutoSaveManager> {
    let interval = EditorConfig::load_or_default().autosave_interval();
    let manager = match dir {
        Some(dir) => {
            let storage = FileStorage::new(dir.clone())
                .with_context(|| format!("open store '{}'", dir.display()))?;
            AutoSaveManager::new(Arc::new(storage)).with_interval(interval)
        }
        None => create_autosave_manager(interval).context("open default store")?,
    };
    Ok(manager)
}

fn load_formation(path: &Path) -> anyhow::Result<Formation> {
    let json = std::fs::read_to_string(path).with_context(|| format!("read '{}'", path.display()))?;
    if let Ok(record) = FormationRecord::from_json(&json) {
        return Ok(record.formation);
    }
    let mut formation =
        Formation::from_json(&json).with_context(|| format!("parse formation '{}'", path.display()))?;
    formation.sort_keyframes();
    formation.prune_dangling_positions();
    log::debug!("Loaded formation {} from {}", formation.id, path.display());
    Ok(formation)
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let formation = load_formation(&args.in_path)?;

    println!("{} ({})", formation.name, formation.id);
    println!(
        "stage {}x{}, grid {}",
        formation.stage_width, formation.stage_height, formation.grid_size
    );
    println!("duration {}ms", formation.duration_ms());
    println!("performers: {}", formation.performers.len());
    for performer in &formation.performers {
        println!("  {:<8} {} {}", performer.label, performer.name, performer.color);
    }
    println!("keyframes: {}", formation.keyframes.len());
    for keyframe in &formation.keyframes {
        let transition = keyframe.transition.unwrap_or_default();
        println!(
            "  {:>8}ms {:<12} {} placed",
            keyframe.timestamp,
            transition.as_str(),
            keyframe.positions.len()
        );
    }
    if let Some(track) = &formation.audio_track {
        println!("audio: {} ({}ms)", track.filename, track.duration_ms);
    }
    Ok(())
}

fn cmd_sample(args: SampleArgs) -> anyhow::Result<()> {
    let formation = load_formation(&args.in_path)?;
    let positions = positions_at_time(&formation, args.time);

    let rows: Vec<serde_json::Value> = formation
        .performers
        .iter()
        .filter_map(|performer| {
            let position = positions.get(performer.id())?;
            Some(serde_json::json!({
                "performer_id": performer.id(),
                "name": performer.name,
                "x": position.x,
                "y": position.y,
                "rotation": position.rotation,
            }))
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let formation = load_formation(&args.in_path)?;
    let options = ExportOptions {
        format: args.format.into(),
        sample_interval_ms: args.interval,
        include_keyframes: !args.no_keyframes,
    };
    let bytes = export_formation(&formation, &options).context("export formation")?;

    let out = args
        .out
        .unwrap_or_else(|| args.in_path.with_extension(format!("export.{}", options.format.extension())));
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(&out, bytes).with_context(|| format!("write '{}'", out.display()))?;

    eprintln!("wrote {}", out.display());
    Ok(())
}

fn cmd_save(args: SaveArgs) -> anyhow::Result<()> {
    let formation = load_formation(&args.in_path)?;
    let mut manager = open_store(args.store)?;
    manager.set_project_id(args.project);
    block_on(manager.save(&formation)).with_context(|| format!("save formation {}", formation.id))?;

    eprintln!("saved {} ({})", formation.name, formation.id);
    Ok(())
}

fn cmd_list(args: ListArgs) -> anyhow::Result<()> {
    let manager = open_store(args.store)?;
    for id in block_on(manager.list_formations()).context("list formations")? {
        println!("{id}");
    }
    Ok(())
}
