//! Training loop.
//!
//! Each epoch shuffles the training pairs (seeds plus current pseudo-labels)
//! and the triples of both graphs, splits them into `batch_size` batches and
//! takes one optimiser step per batch on a full-graph forward pass. Between
//! epochs the trainer refreshes nearest-neighbour negatives, runs bootstrap
//! rounds and evaluates on the held-out pairs, as scheduled by the config.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::autograd::Tape;
use crate::checkpoint::Checkpoint;
use crate::config::TrainConfig;
use crate::error::{AlignResult, CheckpointError, ModelError};
use crate::eval::{EvalReport, evaluate};
use crate::kg::{CrossGraph, Pair, Triple};
use crate::loss::{BatchNegatives, alignment_loss, transe_loss};
use crate::model::{AlignModel, Candidates, GatNet};
use crate::optim::Optimizer;

/// Losses of one step or the mean over an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LossStats {
    pub total: f32,
    pub align: f32,
    pub transe: f32,
}

/// Outcome of [`Trainer::train`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub epochs: usize,
    pub final_loss: LossStats,
    /// Last evaluation, `None` without test pairs.
    pub report: Option<EvalReport>,
    pub pseudo_pairs: usize,
    pub checkpoint: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MetricRecord<'a> {
    Epoch {
        epoch: usize,
        loss: f32,
        align: f32,
        transe: f32,
    },
    Eval {
        epoch: usize,
        report: &'a EvalReport,
    },
    Bootstrap {
        epoch: usize,
        entities: usize,
        relations: usize,
    },
}

/// Append-only JSON-lines metric file.
struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    fn write(&self, record: &MetricRecord<'_>) -> AlignResult<()> {
        let line = serde_json::to_string(record).map_err(|e| CheckpointError::Serialization {
            message: format!("failed to encode metrics: {e}"),
        })?;
        let io_err = |e| CheckpointError::Io {
            path: self.path.display().to_string(),
            source: e,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        Ok(())
    }
}

/// `k` entities of `0..n` other than `exclude`, drawn uniformly.
fn random_negatives(rng: &mut StdRng, n: usize, exclude: usize, k: usize) -> Vec<usize> {
    if n < 2 {
        return Vec::new();
    }
    (0..k)
        .map(|_| {
            let pick = rng.gen_range(0..n - 1);
            if pick >= exclude { pick + 1 } else { pick }
        })
        .collect()
}

/// Replace the head or the tail of every triple by a random entity.
fn corrupt(rng: &mut StdRng, triples: &[Triple], num_entities: usize) -> Vec<Triple> {
    triples
        .iter()
        .map(|t| {
            let mut c = *t;
            if rng.gen_bool(0.5) {
                c.head = rng.gen_range(0..num_entities);
            } else {
                c.tail = rng.gen_range(0..num_entities);
            }
            c
        })
        .collect()
}

/// Chunk `b` of `items` split into `num_batches` near-equal parts.
fn batch_slice<T>(items: &[T], num_batches: usize, b: usize) -> &[T] {
    let size = items.len().div_ceil(num_batches.max(1)).max(1);
    items.chunks(size).nth(b).unwrap_or_default()
}

pub struct Trainer {
    config: TrainConfig,
    data: CrossGraph,
    model: GatNet,
    optimizer: Optimizer,
    rng: StdRng,
    nn_sr: HashMap<usize, Vec<usize>>,
    nn_tg: HashMap<usize, Vec<usize>>,
    pseudo_pairs: Vec<Pair>,
    metrics: Option<MetricsLog>,
    epoch: usize,
}

impl Trainer {
    /// Validate `config`, optionally complete the graphs and build the model.
    pub fn new(config: TrainConfig, mut data: CrossGraph) -> AlignResult<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = GatNet::for_run(&mut data, &config, &mut rng)?;
        let optimizer = Optimizer::new(config.optimizer, config.learning_rate, config.l2_penalty);

        let metrics = match config.run_dir() {
            Some(dir) => {
                std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::Io {
                    path: dir.display().to_string(),
                    source: e,
                })?;
                config.save(&dir.join("config.toml"))?;
                Some(MetricsLog {
                    path: dir.join("metrics.jsonl"),
                })
            }
            None => None,
        };

        tracing::info!(
            run = %config.run_name,
            params = model.params().num_weights(),
            optimizer = %config.optimizer,
            "trainer ready"
        );
        Ok(Self {
            config,
            data,
            model,
            optimizer,
            rng,
            nn_sr: HashMap::new(),
            nn_tg: HashMap::new(),
            pseudo_pairs: Vec::new(),
            metrics,
            epoch: 0,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn data(&self) -> &CrossGraph {
        &self.data
    }

    pub fn model(&self) -> &GatNet {
        &self.model
    }

    /// Epochs completed so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn pseudo_pairs(&self) -> &[Pair] {
        &self.pseudo_pairs
    }

    /// Seeds followed by the current pseudo-labels.
    pub fn training_pairs(&self) -> Vec<Pair> {
        let mut pairs = self.data.train_pairs.clone();
        pairs.extend_from_slice(&self.pseudo_pairs);
        pairs
    }

    fn record(&self, record: MetricRecord<'_>) -> AlignResult<()> {
        match &self.metrics {
            Some(log) => log.write(&record),
            None => Ok(()),
        }
    }

    /// Run `config.epochs` epochs, then evaluate and checkpoint.
    pub fn train(&mut self) -> AlignResult<TrainSummary> {
        let mut last = LossStats::default();
        let mut report = None;
        for _ in 0..self.config.epochs {
            last = self.train_epoch()?;
            let epoch = self.epoch;
            let due = |interval: usize| interval > 0 && epoch % interval == 0;

            if due(self.config.nn_interval) && self.config.nn_num > 0 {
                self.refresh_negatives()?;
            }
            if due(self.config.bootstrap_interval) {
                self.bootstrap_round()?;
            }
            if due(self.config.eval_interval) && !self.data.test_pairs.is_empty() {
                report = Some(self.evaluate()?);
            }
        }

        let evaluated_last = self.config.eval_interval > 0 && self.epoch % self.config.eval_interval == 0;
        if !self.data.test_pairs.is_empty() && (report.is_none() || !evaluated_last) {
            report = Some(self.evaluate()?);
        }
        let checkpoint = self.save_checkpoint()?;
        Ok(TrainSummary {
            epochs: self.epoch,
            final_loss: last,
            report,
            pseudo_pairs: self.pseudo_pairs.len(),
            checkpoint,
        })
    }

    /// One pass over the training pairs; returns the mean batch losses.
    pub fn train_epoch(&mut self) -> AlignResult<LossStats> {
        self.epoch += 1;
        let mut pairs = self.training_pairs();
        let mut triples_sr = self.data.source.triples().to_vec();
        let mut triples_tg = self.data.target.triples().to_vec();
        if self.config.shuffle {
            pairs.shuffle(&mut self.rng);
            triples_sr.shuffle(&mut self.rng);
            triples_tg.shuffle(&mut self.rng);
        }

        let num_batches = pairs.len().div_ceil(self.config.batch_size).max(1);
        let mut sum = LossStats::default();
        for b in 0..num_batches {
            let step = self.train_step(
                batch_slice(&pairs, num_batches, b),
                batch_slice(&triples_sr, num_batches, b),
                batch_slice(&triples_tg, num_batches, b),
            )?;
            sum.total += step.total;
            sum.align += step.align;
            sum.transe += step.transe;
        }
        let n = num_batches as f32;
        let mean = LossStats {
            total: sum.total / n,
            align: sum.align / n,
            transe: sum.transe / n,
        };
        if !mean.total.is_finite() {
            return Err(ModelError::Diverged {
                epoch: self.epoch,
                loss: mean.total,
            }
            .into());
        }
        tracing::info!(
            epoch = self.epoch,
            loss = mean.total,
            align = mean.align,
            transe = mean.transe,
            "epoch finished"
        );
        self.record(MetricRecord::Epoch {
            epoch: self.epoch,
            loss: mean.total,
            align: mean.align,
            transe: mean.transe,
        })?;
        Ok(mean)
    }

    /// Hard negatives when known, random entities otherwise.
    fn batch_negatives(&mut self, pairs: &[Pair]) -> BatchNegatives {
        let k = self.config.nn_num;
        let (n_sr, n_tg) = (self.data.source.num_entities(), self.data.target.num_entities());
        let mut negatives = BatchNegatives::default();
        for &(s, t) in pairs {
            let sr = match self.nn_sr.get(&s) {
                Some(nns) => nns.clone(),
                None => random_negatives(&mut self.rng, n_sr, s, k),
            };
            let tg = match self.nn_tg.get(&t) {
                Some(nns) => nns.clone(),
                None => random_negatives(&mut self.rng, n_tg, t, k),
            };
            negatives.source.push(sr);
            negatives.target.push(tg);
        }
        negatives
    }

    /// Forward, backward and one optimiser update on a batch.
    pub fn train_step(
        &mut self,
        pairs: &[Pair],
        triples_sr: &[Triple],
        triples_tg: &[Triple],
    ) -> AlignResult<LossStats> {
        let negatives = self.batch_negatives(pairs);
        let corrupted = self.config.corrupt.then(|| {
            (
                corrupt(&mut self.rng, triples_sr, self.data.source.num_entities()),
                corrupt(&mut self.rng, triples_tg, self.data.target.num_entities()),
            )
        });
        let sr_data: Vec<usize> = pairs.iter().map(|p| p.0).collect();
        let tg_data: Vec<usize> = pairs.iter().map(|p| p.1).collect();

        let mut tape = Tape::new();
        let bound = self.model.params().bind(&mut tape);
        let dropout_rng = (self.config.dropout > 0.0).then_some(&mut self.rng);
        let f = self.model.forward(
            &mut tape,
            &bound,
            &sr_data,
            &tg_data,
            triples_sr,
            triples_tg,
            dropout_rng,
        )?;

        let align = alignment_loss(
            &mut tape,
            f.out_sr,
            f.out_tg,
            f.sr_repr,
            f.tg_repr,
            pairs,
            &negatives,
            self.config.gamma,
        )?;
        let corrupted_score = match &corrupted {
            Some((c_sr, c_tg)) => {
                let s = self.model.trans_e(&mut tape, f.out_sr, f.rel_sr, c_sr)?;
                let t = self.model.trans_e(&mut tape, f.out_tg, f.rel_tg, c_tg)?;
                Some(tape.concat_rows(s, t)?)
            }
            None => None,
        };
        let transe = transe_loss(&mut tape, f.transe_score, corrupted_score, self.config.gamma)?;
        let weighted = tape.scale(transe, self.config.beta);
        let total = tape.add(align, weighted)?;

        let stats = LossStats {
            total: tape.value(total).item(),
            align: tape.value(align).item(),
            transe: tape.value(transe).item(),
        };
        let mut grads = tape.backward(total)?;
        let grads = bound.collect(&mut grads);
        self.optimizer.step(self.model.params_mut(), grads)?;
        Ok(stats)
    }

    /// Recompute nearest-neighbour negatives for every training entity.
    pub fn refresh_negatives(&mut self) -> AlignResult<()> {
        let pairs = self.training_pairs();
        let unique = |it: &mut dyn Iterator<Item = usize>| {
            let mut ids: Vec<usize> = it.collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let sr_data = unique(&mut pairs.iter().map(|p| p.0));
        let tg_data = unique(&mut pairs.iter().map(|p| p.1));
        let (sr_nns, tg_nns) = self
            .model
            .negative_sample(&sr_data, &tg_data, self.config.nn_num)?;
        self.nn_sr = sr_data.into_iter().zip(sr_nns).collect();
        self.nn_tg = tg_data.into_iter().zip(tg_nns).collect();
        tracing::debug!(
            epoch = self.epoch,
            sr = self.nn_sr.len(),
            tg = self.nn_tg.len(),
            "refreshed nearest-neighbour negatives"
        );
        Ok(())
    }

    /// Replace the pseudo-labels by a fresh matching over entities not covered
    /// by seeds. Relation matches are reported but not trained on.
    pub fn bootstrap_round(&mut self) -> AlignResult<()> {
        let seeded_sr: HashSet<usize> = self.data.train_pairs.iter().map(|p| p.0).collect();
        let seeded_tg: HashSet<usize> = self.data.train_pairs.iter().map(|p| p.1).collect();
        let ent_sr: Vec<usize> = (0..self.data.source.num_entities())
            .filter(|e| !seeded_sr.contains(e))
            .collect();
        let ent_tg: Vec<usize> = (0..self.data.target.num_entities())
            .filter(|e| !seeded_tg.contains(e))
            .collect();
        let rel_seeded_sr: HashSet<usize> = self.data.relation_pairs.iter().map(|p| p.0).collect();
        let rel_seeded_tg: HashSet<usize> = self.data.relation_pairs.iter().map(|p| p.1).collect();
        let rel_sr: Vec<usize> = (0..self.data.source.num_relations())
            .filter(|r| !rel_seeded_sr.contains(r))
            .collect();
        let rel_tg: Vec<usize> = (0..self.data.target.num_relations())
            .filter(|r| !rel_seeded_tg.contains(r))
            .collect();

        let found = self.model.bootstrap(
            Candidates {
                source: &ent_sr,
                target: &ent_tg,
            },
            Candidates {
                source: &rel_sr,
                target: &rel_tg,
            },
            self.config.bootstrap_threshold,
        )?;
        self.pseudo_pairs = found.entities.iter().map(|p| p.pair).collect();
        tracing::info!(
            epoch = self.epoch,
            entities = found.entities.len(),
            relations = found.relations.len(),
            "bootstrap round"
        );
        self.record(MetricRecord::Bootstrap {
            epoch: self.epoch,
            entities: found.entities.len(),
            relations: found.relations.len(),
        })
    }

    /// Hits@k and MRR on the held-out pairs.
    pub fn evaluate(&self) -> AlignResult<EvalReport> {
        let sr_data: Vec<usize> = self.data.test_pairs.iter().map(|p| p.0).collect();
        let tg_data: Vec<usize> = self.data.test_pairs.iter().map(|p| p.1).collect();
        let dist = self.model.predict(&sr_data, &tg_data)?;
        let report = evaluate(&dist, &self.config.top_k);
        tracing::info!(
            epoch = self.epoch,
            hits1 = report.sr_to_tg.hits_at(1),
            mrr = report.sr_to_tg.mrr,
            "evaluation"
        );
        for line in report.to_string().lines() {
            tracing::info!("{line}");
        }
        self.record(MetricRecord::Eval {
            epoch: self.epoch,
            report: &report,
        })?;
        Ok(report)
    }

    /// Write `model.bin` into the run directory, if there is one.
    pub fn save_checkpoint(&self) -> AlignResult<Option<PathBuf>> {
        let Some(dir) = self.config.run_dir() else {
            return Ok(None);
        };
        let path = dir.join("model.bin");
        Checkpoint::new(&self.config, &self.data, &self.model, self.epoch).save(&path)?;
        Ok(Some(path))
    }
}
