use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cane_pol::data::calibration::synthetic_absorbance;
use cane_pol::data::loader::write_parquet;
use cane_pol::data::model::{RawSample, ReplayDataset};
use cane_pol::engine::source::generate;
use cane_pol::{CalibrationArtifact, CalibrationModel};

/// Write a demo calibration artifact and a labelled replay dataset.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Directory to write calibration.json and replay.parquet into
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Pol of the calibration reference spectrum
    #[arg(long, default_value_t = 14.5)]
    reference_pol: f64,

    /// Number of replay samples
    #[arg(long, default_value_t = 60)]
    samples: usize,

    /// Scanner noise on the replay samples (percent of range)
    #[arg(long, default_value_t = 0.5)]
    noise_level: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let artifact = CalibrationArtifact::synthetic(args.reference_pol)?;
    // Refuse to write anything the server would reject.
    let model = CalibrationModel::from_artifact(artifact.clone())?;

    let calibration_path = args.out_dir.join("calibration.json");
    artifact
        .save(&calibration_path)
        .with_context(|| format!("writing {}", calibration_path.display()))?;

    let grid = model.wavelengths().as_slice();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let samples: Vec<RawSample> = (0..args.samples)
        .map(|_| {
            let pol: f64 = rng.random_range(11.0..17.0);
            let clean = synthetic_absorbance(grid, pol);
            RawSample {
                wavelengths: grid.to_vec(),
                absorbance: generate(&clean, args.noise_level, &mut rng),
                pol: Some((pol * 100.0).round() / 100.0),
                metadata: BTreeMap::new(),
            }
        })
        .collect();
    let dataset = ReplayDataset::from_samples(samples)?;

    let replay_path = args.out_dir.join("replay.parquet");
    write_parquet(&replay_path, &dataset)?;

    println!(
        "Wrote {} ({} wavelengths, reference Pol {}) and {} replay samples to {}",
        calibration_path.display(),
        grid.len(),
        args.reference_pol,
        dataset.len(),
        replay_path.display()
    );
    Ok(())
}
