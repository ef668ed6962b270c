use rand::rngs::StdRng;
use tracing::info;

use crate::data::dataset::{PatchSet, TrainingSet};
use crate::error::{configuration, Result};
use crate::network::classifier::{Classifier, ClassifierKind};
use crate::optim::freeze::{CompiledModel, FreezeScope};
use crate::train::loop_fn::{train_loop, FitHistory};
use crate::train::train_config::NetworkConfig;

/// The two fits every stage goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// All trainable layers, uniform class distribution.
    Uniform,
    /// Output layer only, natural class distribution.
    Natural,
}

/// One completed fit.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    /// `"single"`, `"cascade/first"` or `"cascade"`.
    pub stage: &'static str,
    pub phase: Phase,
    /// Patches fitted in this phase before the validation split.
    pub samples: usize,
    pub history: FitHistory,
}

#[derive(Debug, Clone)]
pub struct PhasedTraining {
    pub model: CompiledModel,
    pub phases: Vec<PhaseRecord>,
}

/// Trains `classifier` with the two-phase protocol.
///
/// A single block runs phase A on the uniform set, is frozen all-but-output,
/// then runs phase B on the natural set.  A cascade first puts its first block
/// through the same protocol on narrow patches, freezes it entirely, and then
/// runs the protocol on the full cascade.
///
/// Every layer is made trainable again first, so flags left over from an
/// earlier fit do not shrink phase A.
///
/// Both sets are shuffled once with `rng` before anything is fitted.  A
/// cascade without wide patches fails with a configuration error before any
/// fitting or checkpointing.
pub fn train_phased(
    mut classifier: Classifier,
    mut data: TrainingSet,
    config: &NetworkConfig,
    rng: &mut StdRng,
) -> Result<PhasedTraining> {
    config.validate()?;
    if classifier.kind() == ClassifierKind::Cascade && !data.has_wide() {
        return Err(configuration(
            "cascade training needs wide patches in both the natural and uniform sets",
        ));
    }
    data.validate(classifier.n_classes())?;
    if data.natural.is_empty() || data.uniform.is_empty() {
        return Err(configuration("both the natural and the uniform patch sets must be non-empty"));
    }
    data.shuffle(rng);
    classifier.layers_mut().into_iter().for_each(|layer| layer.trainable = true);

    let mut phases = Vec::new();
    let model = match classifier {
        Classifier::Single(block) => run_phases(
            "single",
            CompiledModel::compile(Classifier::Single(block), config.sgd()),
            &data,
            config,
            rng,
            &mut phases,
        )?,
        Classifier::Cascade { first, second } => {
            let first_stage = run_phases(
                "cascade/first",
                CompiledModel::compile(Classifier::Single(first), config.sgd()),
                &data,
                config,
                rng,
                &mut phases,
            )?;
            let Classifier::Single(first) = first_stage.freeze(FreezeScope::All).into_classifier() else {
                return Err(configuration("first cascade stage did not train as a single block"));
            };
            run_phases(
                "cascade",
                CompiledModel::compile(Classifier::Cascade { first, second }, config.sgd()),
                &data,
                config,
                rng,
                &mut phases,
            )?
        }
    };
    Ok(PhasedTraining { model, phases })
}

fn run_phases(
    stage: &'static str,
    mut model: CompiledModel,
    data: &TrainingSet,
    config: &NetworkConfig,
    rng: &mut StdRng,
    records: &mut Vec<PhaseRecord>,
) -> Result<CompiledModel> {
    let fit = |model: &mut CompiledModel, set: &PatchSet, phase: Phase, rng: &mut StdRng| -> Result<PhaseRecord> {
        info!(stage, ?phase, samples = set.len(), "phase started");
        let history = train_loop(model, set, &config.train_config(), rng)?;
        info!(
            stage,
            ?phase,
            epochs = history.epochs.len(),
            stopped_early = history.stopped_early,
            "phase finished"
        );
        Ok(PhaseRecord { stage, phase, samples: set.len(), history })
    };

    records.push(fit(&mut model, &data.uniform, Phase::Uniform, &mut *rng)?);
    let mut model = model.freeze(FreezeScope::AllButOutput);
    records.push(fit(&mut model, &data.natural, Phase::Natural, &mut *rng)?);
    Ok(model)
}
