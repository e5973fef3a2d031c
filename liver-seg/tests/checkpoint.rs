use liver_seg::prelude::*;
use ndarray::{arr1, Array2};

fn model() -> TinySegNet {
    TinySegNet::new(TinySegNetConfig::default()).unwrap()
}

#[test]
fn test_partial_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = ParamSet::new();
    params.insert("head.bias", arr1(&[0.25f32, -0.25]).into_dyn());
    params.insert("aux.weight", arr1(&[1.0f32]).into_dyn());
    let ckpt = Checkpoint {
        tag: DATASET_TAG.to_owned(),
        iteration: 10,
        dice: 0.9,
        params,
    };
    let path = ckpt.save_to(dir.path()).unwrap();

    let mut net = model();
    let weight_before = net.params().get("head.weight").cloned();
    let report = load_weights(&mut net, &path).unwrap();
    assert_eq!(report.loaded, vec!["head.bias".to_string()]);
    assert_eq!(report.unexpected, vec!["aux.weight".to_string()]);
    assert_eq!(report.missing, vec!["head.weight".to_string()]);
    assert_eq!(net.params().get("head.weight").cloned(), weight_before);
    assert_eq!(
        net.params().get("head.bias").unwrap(),
        &arr1(&[0.25f32, -0.25]).into_dyn()
    );
}

#[test]
fn test_mismatched_checkpoint_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let three = TinySegNet::new(TinySegNetConfig {
        num_classes: 3,
        ..TinySegNetConfig::default()
    })
    .unwrap();
    let path = Checkpoint::capture(&three, "t", 1, 0.1)
        .save_to(dir.path())
        .unwrap();

    let mut net = model();
    let before = net.params().clone();
    assert!(matches!(
        load_weights(&mut net, &path),
        Err(SegError::CheckpointMismatch { .. })
    ));
    assert_eq!(net.params(), &before);

    assert!(matches!(
        load_weights(&mut net, dir.path().join("missing.bin")),
        Err(SegError::NotFound(_))
    ));
}

#[test]
fn test_unrelated_checkpoint_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = ParamSet::new();
    params.insert("encoder.conv1", Array2::<f32>::zeros((2, 2)).into_dyn());
    let path = Checkpoint {
        tag: "other".into(),
        iteration: 0,
        dice: 0.0,
        params,
    }
    .save_to(dir.path())
    .unwrap();
    assert!(matches!(
        load_weights(&mut model(), &path),
        Err(SegError::Config(_))
    ));
}
