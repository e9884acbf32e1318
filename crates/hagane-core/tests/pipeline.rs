mod common;

use std::fs;

use common::{CheckpointSpec, Family, LABELS, Workspace};
use hagane_core::onnx::{Dim, declared_dims};
use hagane_core::{HaganeError, InputName, PARITY_FILES, Pipeline, Stage};
use onnx_protobuf::ModelProto;
use protobuf::Message;

fn read_model(path: &std::path::Path) -> ModelProto {
    ModelProto::parse_from_bytes(&fs::read(path).unwrap()).unwrap()
}

fn input_names(model: &ModelProto) -> Vec<String> {
    model.graph.input.iter().map(|i| i.name.clone()).collect()
}

#[test]
fn distilbert_bundle_with_two_inputs() {
    let workspace = Workspace::new(
        &CheckpointSpec::new(Family::DistilBert).inputs(&["input_ids", "attention_mask"]),
    );
    let config = workspace.config();
    let summary = Pipeline::new(config.clone()).run().unwrap();

    assert_eq!(
        summary.inputs,
        vec![InputName::InputIds, InputName::AttentionMask]
    );
    assert_eq!(summary.axes.len(), 3);

    let artifact = config.artifact_path();
    assert!(artifact.is_file());
    let model = read_model(&artifact);
    assert_eq!(input_names(&model), vec!["input_ids", "attention_mask"]);
    assert_eq!(model.graph.output[0].name, "logits");
    assert_eq!(
        declared_dims(&model.graph.output[0]),
        vec![
            Dim::Symbolic("batch".into()),
            Dim::Symbolic("sequence".into()),
            Dim::Fixed(LABELS.len() as i64)
        ]
    );
    assert_eq!(summary.report.opset, 17);

    assert_eq!(
        summary.parity.copied,
        vec!["tokenizer.json", "vocab.txt", "config.json", "tokenizer_config.json"]
    );
    assert_eq!(summary.parity.skipped, vec!["special_tokens_map.json"]);
    for name in &summary.parity.copied {
        assert_eq!(
            fs::read(workspace.source().join(name)).unwrap(),
            fs::read(config.output_dir.join(name)).unwrap(),
            "{name} differs from the checkpoint copy"
        );
    }
    assert!(!config.output_dir.join("special_tokens_map.json").exists());
}

#[test]
fn bert_bundle_with_all_inputs() {
    let workspace = Workspace::new(&CheckpointSpec::new(Family::Bert).inputs(&[
        "input_ids",
        "token_type_ids",
        "attention_mask",
    ]));
    let summary = Pipeline::new(workspace.config()).run().unwrap();

    assert_eq!(summary.inputs, InputName::ALL.to_vec());
    assert_eq!(summary.axes.len(), 4);
    let model = read_model(&summary.artifact.path);
    assert_eq!(
        input_names(&model),
        vec!["input_ids", "attention_mask", "token_type_ids"]
    );
    let metadata: Vec<(&str, &str)> = model
        .metadata_props
        .iter()
        .map(|p| (p.key.as_str(), p.value.as_str()))
        .collect();
    assert!(metadata.contains(&("model_type", "bert")));
    assert!(metadata.contains(&("id2label", r#"{"0":"O","1":"B-PII","2":"I-PII"}"#)));
}

#[test]
fn bert_defaults_to_three_inputs_without_tokenizer_config() {
    let workspace = Workspace::new(&CheckpointSpec::new(Family::Bert));
    let summary = Pipeline::new(workspace.config()).run().unwrap();
    assert_eq!(summary.inputs.len(), 3);
    assert!(summary.parity.skipped.contains(&"tokenizer_config.json"));
}

#[test]
fn tanh_gelu_checkpoint_exports() {
    let workspace = Workspace::new(
        &CheckpointSpec::new(Family::Bert)
            .inputs(&["input_ids", "attention_mask"])
            .activation("geluapproximate"),
    );
    let summary = Pipeline::new(workspace.config()).run().unwrap();
    let model = read_model(&summary.artifact.path);
    assert!(model.graph.node.iter().any(|n| n.op_type == "Tanh"));
}

#[test]
fn missing_checkpoint_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let config = hagane_core::ExportConfig::anchored_at(root.path());
    let err = Pipeline::new(config.clone()).run().unwrap_err();

    assert!(matches!(err, HaganeError::Load { .. }));
    assert_eq!(err.stage(), Stage::Loading);
    assert!(!config.output_dir.exists());
}

#[test]
fn unrecognized_inputs_stop_before_export() {
    let workspace = Workspace::new(
        &CheckpointSpec::new(Family::DistilBert).inputs(&["special_tokens_mask"]),
    );
    let config = workspace.config();
    let err = Pipeline::new(config.clone()).run().unwrap_err();

    match err {
        HaganeError::NoValidInputs { ref produced } => {
            assert_eq!(produced, &vec!["special_tokens_mask".to_string()]);
        }
        other => panic!("expected NoValidInputs, got {other:?}"),
    }
    assert!(!config.artifact_path().exists());
}

#[test]
fn sample_length_below_special_tokens_fails_while_resolving() {
    let workspace = Workspace::new(
        &CheckpointSpec::new(Family::Bert).inputs(&["input_ids", "attention_mask"]),
    );
    let config = workspace.config().with_max_length(1);
    let err = Pipeline::new(config.clone()).run().unwrap_err();

    assert!(matches!(err, HaganeError::Sample(_)), "{err}");
    assert_eq!(err.stage(), Stage::Resolving);
    assert!(!config.output_dir.exists());
}

#[test]
fn folding_bakes_weight_transposes() {
    let spec = CheckpointSpec::new(Family::DistilBert).inputs(&["input_ids", "attention_mask"]);
    let folded = Workspace::new(&spec);
    let unfolded = Workspace::new(&spec);

    let with = Pipeline::new(folded.config()).run().unwrap();
    let without = Pipeline::new(unfolded.config().with_constant_folding(false))
        .run()
        .unwrap();

    assert!(with.artifact.folding.unwrap().folded_nodes > 0);
    assert!(without.artifact.folding.is_none());
    assert!(with.report.nodes < without.report.nodes);

    let model = read_model(&with.artifact.path);
    let initializers: Vec<&str> = model
        .graph
        .initializer
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    for node in model.graph.node.iter().filter(|n| n.op_type == "Transpose") {
        assert!(
            !initializers.contains(&node.input[0].as_str()),
            "{} still transposes an initializer",
            node.name
        );
    }
}

#[test]
fn reruns_are_byte_identical() {
    let workspace = Workspace::new(
        &CheckpointSpec::new(Family::DistilBert).inputs(&["input_ids", "attention_mask"]),
    );
    let config = workspace.config();

    Pipeline::new(config.clone()).run().unwrap();
    let first = fs::read(config.artifact_path()).unwrap();
    Pipeline::new(config.clone()).run().unwrap();
    let second = fs::read(config.artifact_path()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn bundle_contains_only_artifact_and_present_parity_files() {
    let mut spec = CheckpointSpec::new(Family::DistilBert).inputs(&["input_ids"]);
    spec.write_vocab = false;
    let workspace = Workspace::new(&spec);
    let config = workspace.config();
    let summary = Pipeline::new(config.clone()).run().unwrap();

    let mut present: Vec<String> = fs::read_dir(&config.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    present.sort();

    let mut expected: Vec<String> = summary.parity.copied.iter().map(|s| s.to_string()).collect();
    expected.push(config.artifact_name.clone());
    expected.sort();
    assert_eq!(present, expected);
    assert_eq!(
        summary.parity.copied.len() + summary.parity.skipped.len(),
        PARITY_FILES.len()
    );
}
