mod common;

use ferrite_brainseg::inference::slice::{SLICE_HEIGHT, SLICE_WIDTH};
use ferrite_brainseg::{
    BlockSpec, ClassifierKind, PatchInput, Prediction, PredictionKind, Segmenter, SegError, Tensor3,
};
use tempfile::tempdir;

use common::{blob_slice, quick_config, small_spec};

#[test]
fn full_slice_single_stage_map_and_probabilities() {
    let mut seg = Segmenter::new(ClassifierKind::Single, quick_config()).unwrap();
    let slice = blob_slice(SLICE_HEIGHT, SLICE_WIDTH, (90, 130), 0.2);
    let r = small_spec().receptive_field();

    let Prediction::Probabilities(volume) = seg.predict_slice(&slice, PredictionKind::Probabilities).unwrap() else {
        panic!("asked for probabilities");
    };
    let (rows, cols) = (SLICE_HEIGHT - r + 1, SLICE_WIDTH - r + 1);
    assert_eq!(volume.shape(), (5, rows, cols));
    let plane = rows * cols;
    for p in (0..plane).step_by(97) {
        let sum: f64 = (0..5).map(|c| volume.data[c * plane + p]).sum();
        assert!((sum - 1.0).abs() < 1e-9, "pixel {p} sums to {sum}");
    }

    let map = Prediction::Probabilities(volume).into_class_map();
    assert_eq!((map.rows, map.cols), (rows, cols));
}

#[test]
fn default_architecture_dimensions() {
    let spec = BlockSpec::default();
    assert_eq!(spec.shrinkage(), 32);
    assert_eq!(spec.receptive_field(), 33);
    let wide = spec.receptive_field() + spec.shrinkage();
    assert_eq!(wide, 65);
    assert_eq!(
        ferrite_brainseg::inference::output_grid(SLICE_HEIGHT, SLICE_WIDTH, 33).unwrap(),
        (184, 128)
    );
    assert_eq!(
        ferrite_brainseg::inference::output_grid(SLICE_HEIGHT, SLICE_WIDTH, wide).unwrap(),
        (152, 96)
    );
}

#[test]
fn zero_patch_gives_a_probability_vector() {
    let config = ferrite_brainseg::NetworkConfig { checkpoint_dir: None, ..Default::default() };
    let seg = Segmenter::new(ClassifierKind::Single, config).unwrap();
    let mut classifier = seg.classifier().clone();
    let probs = classifier
        .predict(PatchInput { narrow: &Tensor3::zeros(4, 33, 33), wide: None })
        .unwrap();
    assert_eq!(probs.len(), 5);
    assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));

    let mut cascade = Segmenter::new(ClassifierKind::Cascade, quick_config()).unwrap();
    let slice = blob_slice(20, 20, (0, 0), 0.0);
    let map = cascade.segment(&slice).unwrap();
    let wide = small_spec().receptive_field() + small_spec().shrinkage();
    assert_eq!((map.rows, map.cols), (20 - wide + 1, 20 - wide + 1));
}

#[test]
fn saved_model_predicts_identically_after_loading() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("cascade").to_string_lossy().into_owned();
    let mut seg = Segmenter::new(ClassifierKind::Cascade, quick_config()).unwrap();
    let slice = blob_slice(30, 28, (10, 18), 0.3);
    let before = seg.predict_slice(&slice, PredictionKind::Probabilities).unwrap();

    seg.save(&name).unwrap();
    assert!(dir.path().join("cascade.json").exists());
    assert!(dir.path().join("cascade.hdf5").exists());

    let mut loaded = Segmenter::load(&name, quick_config()).unwrap();
    assert_eq!(loaded.kind(), ClassifierKind::Cascade);
    assert!(loaded.classifier().layers().iter().all(|l| l.trainable));
    let after = loaded.predict_slice(&slice, PredictionKind::Probabilities).unwrap();
    assert_eq!(before, after);
}

#[test]
fn loading_a_missing_model_reports_the_file() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("absent").to_string_lossy().into_owned();
    match Segmenter::load(&name, quick_config()) {
        Err(SegError::MissingArtifact(path)) => assert!(path.ends_with("absent.json")),
        other => panic!("expected a missing artifact, got {other:?}"),
    }
}
