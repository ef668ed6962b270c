use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::{error, info};

use ferrite_brainseg::inference::output_grid;
use ferrite_brainseg::inference::overlay::{render_overlay, save_overlay};
use ferrite_brainseg::{
    ClassifierKind, JsonPatchSource, Modality, NetworkConfig, Prediction, PredictionKind, Result,
    Segmenter, Slice,
};

#[derive(Parser)]
#[command(author, version, about = "Two-pathway CNN brain tumor segmentation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a classifier with the two-phase protocol and save it
    Train(TrainArgs),
    /// Segment one or more slice images with a saved model
    Predict(PredictArgs),
    /// Print patch sizes and output grids for a configuration
    Describe(DescribeArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Network configuration (JSON); defaults apply when omitted
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Patch set with the natural class distribution (JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    natural: PathBuf,

    /// Patch set with the uniform class distribution (JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    uniform: PathBuf,

    /// Train the two-block cascade instead of a single block
    #[arg(long)]
    cascade: bool,

    /// Model name; writes NAME.json and NAME.hdf5
    #[arg(long, default_value = "brainseg")]
    save: String,
}

#[derive(Args)]
struct PredictArgs {
    /// Saved model name (NAME.json + NAME.hdf5)
    #[arg(long)]
    model: String,

    /// Slice images holding five stacked planes
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    slices: Vec<PathBuf>,

    /// Network configuration (JSON) for batch size
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Emit the probability volume instead of the class map
    #[arg(long)]
    probabilities: bool,

    /// Write predictions as JSON (one file per slice, index appended when several)
    #[arg(long, value_hint = ValueHint::FilePath)]
    out: Option<PathBuf>,

    /// Write a color overlay PNG (index appended when several slices)
    #[arg(long, value_hint = ValueHint::FilePath)]
    overlay: Option<PathBuf>,

    /// Background modality for the overlay
    #[arg(long, value_enum, default_value_t = ModalityArg::T1c)]
    modality: ModalityArg,
}

#[derive(Args)]
struct DescribeArgs {
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Slice height in pixels
    #[arg(long, default_value_t = ferrite_brainseg::inference::slice::SLICE_HEIGHT)]
    height: usize,

    /// Slice width in pixels
    #[arg(long, default_value_t = ferrite_brainseg::inference::slice::SLICE_WIDTH)]
    width: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModalityArg {
    Flair,
    T1,
    T1c,
    T2,
}

impl From<ModalityArg> for Modality {
    fn from(arg: ModalityArg) -> Modality {
        match arg {
            ModalityArg::Flair => Modality::Flair,
            ModalityArg::T1 => Modality::T1,
            ModalityArg::T1c => Modality::T1c,
            ModalityArg::T2 => Modality::T2,
        }
    }
}

fn main() -> ExitCode {
    ferrite_brainseg::logging::init_tracing();
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Train(args) => train(args),
        Command::Predict(args) => predict(args),
        Command::Describe(args) => describe(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>, cascade: bool) -> Result<NetworkConfig> {
    match path {
        Some(p) => NetworkConfig::load_json(p),
        None if cascade => Ok(NetworkConfig::cascade_default()),
        None => Ok(NetworkConfig::default()),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.cascade)?;
    let kind = if args.cascade { ClassifierKind::Cascade } else { ClassifierKind::Single };
    let mut segmenter = Segmenter::new(kind, config)?;

    let mut source = JsonPatchSource { natural_path: args.natural, uniform_path: args.uniform };
    let request = segmenter.patch_request(Vec::new(), PathBuf::from("."));
    let phases = segmenter.fit_from_source(&mut source, &request)?;
    for record in &phases {
        if let Some(last) = record.history.last() {
            info!(
                stage = record.stage,
                phase = ?record.phase,
                epochs = record.history.epochs.len(),
                loss = last.monitored_loss(),
                "phase summary"
            );
        }
    }
    segmenter.save(&args.save)
}

fn numbered(path: &Path, index: usize, total: usize) -> PathBuf {
    if total == 1 {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("prediction");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let name = if ext.is_empty() { format!("{stem}_{index}") } else { format!("{stem}_{index}.{ext}") };
    path.with_file_name(name)
}

fn predict(args: PredictArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), false)?;
    let mut segmenter = Segmenter::load(&args.model, config)?;
    let kind = if args.probabilities { PredictionKind::Probabilities } else { PredictionKind::ClassMap };
    let total = args.slices.len();

    for (i, path) in args.slices.iter().enumerate() {
        let slice = Slice::load(path)?;
        let prediction = segmenter.predict_slice(&slice, kind)?;
        if let Some(out) = &args.out {
            let out = numbered(out, i, total);
            let writer = BufWriter::new(File::create(&out)?);
            match &prediction {
                Prediction::Probabilities(volume) => serde_json::to_writer(writer, volume)?,
                Prediction::ClassMap(map) => serde_json::to_writer(writer, map)?,
            }
            info!(slice = %path.display(), out = %out.display(), "prediction written");
        }
        let map = prediction.into_class_map();
        if let Some(overlay) = &args.overlay {
            let background = slice.background(args.modality.into());
            let image = render_overlay(&map, &background, slice.height(), slice.width())?;
            save_overlay(&image, &numbered(overlay, i, total))?;
        }
        if args.out.is_none() && args.overlay.is_none() {
            println!("{}: {:?}", path.display(), map.class_counts(segmenter.classifier().n_classes()));
        }
    }
    Ok(())
}

fn describe(args: DescribeArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), false)?;
    config.validate()?;
    let spec = &config.architecture;
    let narrow = spec.receptive_field();
    let wide = narrow + spec.shrinkage();
    println!("shrinkage per block: {}", spec.shrinkage());
    println!("narrow patch:        {narrow}x{narrow}");
    println!("wide patch:          {wide}x{wide}");
    let (rows, cols) = output_grid(args.height, args.width, narrow)?;
    println!("single-stage grid:   {rows}x{cols}");
    let (rows, cols) = output_grid(args.height, args.width, wide)?;
    println!("cascade grid:        {rows}x{cols}");
    Ok(())
}
