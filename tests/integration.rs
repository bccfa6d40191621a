//! End-to-end tests for kg-align.
//!
//! These write a small DBP15k-style directory, load it, train a few epochs
//! with bootstrapping and checkpointing, and evaluate the restored model.

use std::fmt::Write as _;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;

use kg_align::checkpoint::Checkpoint;
use kg_align::config::TrainConfig;
use kg_align::error::{AlignError, DataError};
use kg_align::eval::{EvalReport, evaluate};
use kg_align::kg::CrossGraph;
use kg_align::kg::adjacency::EdgeWeighting;
use kg_align::kg::load::load_cross_graph;
use kg_align::model::{AlignModel, GatNet};
use kg_align::train::Trainer;

/// Two rings of `n` entities with "next" and "skip" relations. Target
/// external ids are offset and listed in reverse order.
fn write_dataset(dir: &Path, n: usize) {
    let mut ent1 = String::new();
    let mut ent2 = String::new();
    let mut triples1 = String::new();
    let mut triples2 = String::new();
    let mut refs = String::new();
    for i in 0..n {
        writeln!(ent1, "{i}\thttp://zh.dbpedia.org/resource/e{i}").unwrap();
        writeln!(ent2, "{}\thttp://dbpedia.org/resource/e{}", 1000 + n - 1 - i, n - 1 - i).unwrap();
        writeln!(refs, "{i}\t{}", 1000 + i).unwrap();
    }
    for i in 0..n {
        let (next, skip) = ((i + 1) % n, (i + 3) % n);
        writeln!(triples1, "{i}\t500\t{next}").unwrap();
        writeln!(triples1, "{i}\t501\t{skip}").unwrap();
        writeln!(triples2, "{}\t600\t{}", 1000 + i, 1000 + next).unwrap();
        writeln!(triples2, "{}\t601\t{}", 1000 + i, 1000 + skip).unwrap();
    }
    std::fs::write(dir.join("ent_ids_1"), ent1).unwrap();
    std::fs::write(dir.join("ent_ids_2"), ent2).unwrap();
    std::fs::write(dir.join("rel_ids_1"), "500\tnext\n501\tskip\n").unwrap();
    std::fs::write(dir.join("rel_ids_2"), "600\tnext\n601\tskip\n").unwrap();
    std::fs::write(dir.join("triples_1"), triples1).unwrap();
    std::fs::write(dir.join("triples_2"), triples2).unwrap();
    std::fs::write(dir.join("ref_ent_ids"), refs).unwrap();
    std::fs::write(dir.join("ref_rel_ids"), "500\t600\n501\t601\n").unwrap();
}

fn small_config(output: &Path) -> TrainConfig {
    TrainConfig {
        dim: 16,
        nheads: 2,
        num_layer: 2,
        epochs: 6,
        batch_size: 8,
        nn_num: 3,
        nn_interval: 2,
        bootstrap_interval: 3,
        bootstrap_threshold: 0.0,
        eval_interval: 3,
        learning_rate: 0.02,
        num_workers: 2,
        train_ratio: 0.5,
        seed: 11,
        run_name: "it".into(),
        output_dir: Some(output.to_path_buf()),
        ..Default::default()
    }
}

fn evaluate_test_pairs(model: &GatNet, data: &CrossGraph, config: &TrainConfig) -> EvalReport {
    let sr: Vec<usize> = data.test_pairs.iter().map(|p| p.0).collect();
    let tg: Vec<usize> = data.test_pairs.iter().map(|p| p.1).collect();
    evaluate(&model.predict(&sr, &tg).unwrap(), &config.top_k)
}

#[test]
fn loads_dbp15k_layout() {
    let dir = tempfile::TempDir::new().unwrap();
    write_dataset(dir.path(), 12);
    let data = load_cross_graph(dir.path(), 0.5, 1).unwrap();
    assert_eq!(data.source.num_entities(), 12);
    assert_eq!(data.target.num_relations(), 2);
    assert_eq!(data.source.triples().len(), 24);
    assert_eq!(data.train_pairs.len(), 6);
    assert_eq!(data.test_pairs.len(), 6);
    assert_eq!(data.relation_pairs.len(), 2);

    // Same seed, same split.
    let again = load_cross_graph(dir.path(), 0.5, 1).unwrap();
    assert_eq!(again.train_pairs, data.train_pairs);
}

#[test]
fn train_checkpoint_and_evaluate() {
    let data_dir = tempfile::TempDir::new().unwrap();
    let out_dir = tempfile::TempDir::new().unwrap();
    write_dataset(data_dir.path(), 16);
    let config = small_config(out_dir.path());

    let data = load_cross_graph(data_dir.path(), config.train_ratio, config.seed).unwrap();
    let mut trainer = Trainer::new(config.clone(), data).unwrap();
    let summary = trainer.train().unwrap();
    assert_eq!(summary.epochs, 6);
    assert!(summary.final_loss.total.is_finite());

    let trained = summary.report.expect("test pairs were evaluated");
    let checkpoint = summary.checkpoint.expect("output_dir set");
    assert!(checkpoint.exists());

    // Restore into a fresh model and reproduce the final evaluation.
    let data = load_cross_graph(data_dir.path(), config.train_ratio, config.seed).unwrap();
    let ckpt = Checkpoint::load(&checkpoint).unwrap();
    assert_eq!(ckpt.epoch, 6);
    let mut model = GatNet::new(&data, &ckpt.config, &mut StdRng::seed_from_u64(99)).unwrap();
    ckpt.restore(&data, &mut model).unwrap();
    assert_eq!(evaluate_test_pairs(&model, &data, &config), trained);

    let metrics = std::fs::read_to_string(out_dir.path().join("it/metrics.jsonl")).unwrap();
    assert!(metrics.lines().count() >= 6);
    assert!(metrics.contains("\"kind\":\"bootstrap\""));
    let saved = TrainConfig::load(&out_dir.path().join("it/config.toml")).unwrap();
    assert_eq!(saved, config);
}

#[test]
fn completed_graphs_survive_checkpoint_restore() {
    let data_dir = tempfile::TempDir::new().unwrap();
    let out_dir = tempfile::TempDir::new().unwrap();
    write_dataset(data_dir.path(), 16);
    // The target only keeps its "next" ring; completion brings "skip" back
    // for seeded entities.
    let mut next_only = String::new();
    for i in 0..16 {
        writeln!(next_only, "{}\t600\t{}", 1000 + i, 1000 + (i + 1) % 16).unwrap();
    }
    std::fs::write(data_dir.path().join("triples_2"), next_only).unwrap();

    let config = TrainConfig {
        graph_completion: true,
        train_ratio: 0.75,
        bootstrap_interval: 0,
        ..small_config(out_dir.path())
    };
    let data = load_cross_graph(data_dir.path(), config.train_ratio, config.seed).unwrap();
    assert_eq!(data.target.triples().len(), 16);
    let mut trainer = Trainer::new(config.clone(), data).unwrap();
    // 12 of 16 entities are seeded, so at most 8 of the 16 skip triples can
    // touch an unseeded one.
    let trained_triples = trainer.data().target.triples().len();
    assert!(trained_triples >= 24, "{trained_triples}");
    let summary = trainer.train().unwrap();
    let trained = summary.report.expect("test pairs were evaluated");

    let ckpt = Checkpoint::load(&summary.checkpoint.unwrap()).unwrap();
    assert_eq!(ckpt.sizes.triples_tg, trained_triples);

    // Restoring onto the raw graphs is rejected instead of silently
    // encoding a different adjacency.
    let raw = load_cross_graph(data_dir.path(), config.train_ratio, config.seed).unwrap();
    let mut plain = GatNet::new(&raw, &ckpt.config, &mut StdRng::seed_from_u64(0)).unwrap();
    let err = ckpt.restore(&raw, &mut plain).unwrap_err();
    assert!(matches!(AlignError::from(err), AlignError::Checkpoint(_)));

    let mut data = raw;
    let model = ckpt.restore_model(&mut data).unwrap();
    assert_eq!(data.target.triples().len(), trained_triples);
    assert_eq!(evaluate_test_pairs(&model, &data, &config), trained);
}

#[test]
fn functionality_weighting_without_self_loops_trains() {
    let data_dir = tempfile::TempDir::new().unwrap();
    let out_dir = tempfile::TempDir::new().unwrap();
    write_dataset(data_dir.path(), 12);
    let config = TrainConfig {
        edge_weighting: EdgeWeighting::Functionality,
        self_loops: false,
        epochs: 4,
        eval_interval: 2,
        ..small_config(out_dir.path())
    };
    let data = load_cross_graph(data_dir.path(), config.train_ratio, config.seed).unwrap();
    let summary = Trainer::new(config.clone(), data).unwrap().train().unwrap();
    assert!(summary.final_loss.total.is_finite());

    let mut data = load_cross_graph(data_dir.path(), config.train_ratio, config.seed).unwrap();
    let ckpt = Checkpoint::load(&summary.checkpoint.unwrap()).unwrap();
    let model = ckpt.restore_model(&mut data).unwrap();
    assert_eq!(evaluate_test_pairs(&model, &data, &config), summary.report.unwrap());
}

#[test]
fn malformed_triples_report_file_and_line() {
    let dir = tempfile::TempDir::new().unwrap();
    write_dataset(dir.path(), 6);
    std::fs::write(dir.path().join("triples_1"), "0\t500\t1\n0\t500\n").unwrap();
    let err = load_cross_graph(dir.path(), 0.5, 1).unwrap_err();
    match err {
        DataError::Parse { path, line, .. } => {
            assert!(path.ends_with("triples_1"));
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn checkpoint_against_other_data_set_fails() {
    let small = tempfile::TempDir::new().unwrap();
    let large = tempfile::TempDir::new().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    write_dataset(small.path(), 8);
    write_dataset(large.path(), 10);
    let config = TrainConfig {
        epochs: 1,
        bootstrap_interval: 0,
        ..small_config(out.path())
    };

    let data = load_cross_graph(small.path(), 0.5, config.seed).unwrap();
    let path = Trainer::new(config.clone(), data)
        .unwrap()
        .train()
        .unwrap()
        .checkpoint
        .unwrap();

    let other = load_cross_graph(large.path(), 0.5, config.seed).unwrap();
    let mut model = GatNet::new(&other, &config, &mut StdRng::seed_from_u64(0)).unwrap();
    let err = Checkpoint::load(&path).unwrap().restore(&other, &mut model).unwrap_err();
    assert!(matches!(AlignError::from(err), AlignError::Checkpoint(_)));
}
