mod common;

use common::{uniform_segment, FixedModel};
use multippo::prelude::*;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Records every reported step
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(u64, StepStats)>>>);

impl StatsReporter for Recorder {
    fn report(&self, step: u64, stats: &StepStats) {
        self.0.lock().unwrap().push((step, stats.clone()));
    }
}

/// In-memory sink for the JSON-lines reporter
#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn policy() -> MultiAgentPpoPolicy<FixedModel, ActionDistKind> {
    let config = PpoConfig::default().with_discount(0.99, 0.95);
    let mut model = FixedModel::new(3, 2, 0.5);
    model.logit = 2.0;
    MultiAgentPpoPolicy::new(config, model, ActionDistKind::multi_categorical(vec![2; 3])).unwrap()
}

#[test]
fn test_kl_coefficient_carries_across_steps() {
    let mut policy = policy();
    let segment = uniform_segment(3, &[1.0, 0.0, 0.0, 1.0], &[false, false, false, true], 0.5);
    let batch = policy.postprocess_trajectory(&segment).unwrap();

    let first = policy.learn_on_batch(&batch).unwrap();
    assert_eq!(first.stats.cur_kl_coeff, 0.2);
    assert!(first.loss.stats.kl > 0.02);

    let second = policy.learn_on_batch(&batch).unwrap();
    assert_eq!(second.stats.cur_kl_coeff, first.kl_coeff);
    assert!(second.kl_coeff > first.kl_coeff);
    // Same batch, larger penalty
    assert!(second.loss.total_loss > first.loss.total_loss);
}

#[test]
fn test_steps_are_reported() {
    let mut policy = policy();
    let recorder = Recorder::default();
    let buffer = Buffer::default();
    let reporters: Vec<Box<dyn StatsReporter>> = vec![
        Box::new(recorder.clone()),
        Box::new(JsonLinesReporter::from_writer(buffer.clone())),
        Box::new(ConsoleReporter::new("test")),
    ];

    let segment = uniform_segment(3, &[1.0, 1.0], &[false, true], 0.0);
    for step in 0..3u64 {
        policy.on_global_var_update(step * 100);
        let batch = policy.postprocess_trajectory(&segment).unwrap();
        policy.learn_on_batch(&batch).unwrap().report(&reporters, step);
    }
    reporters.flush().unwrap();

    let records = recorder.0.lock().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].0, 2);
    assert_eq!(records[2].1.reward_fallbacks, 3);
    assert_eq!(records[1].1.cur_kl_coeff, records[0].1.cur_kl_coeff * 1.5);
    assert_eq!(policy.global_timestep(), 200);

    let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2]["step"], 2);
    let kl = lines[2]["kl"].as_f64().unwrap();
    assert!((kl - records[2].1.loss.kl).abs() < 1e-12);
    assert_eq!(lines[0]["cur_kl_coeff"], 0.2);
}

#[test]
fn test_loss_matches_free_function() {
    let policy = policy();
    let segment = uniform_segment(3, &[1.0, 2.0, 3.0], &[false, false, true], 0.1);
    let batch = policy.postprocess_trajectory(&segment).unwrap();

    let via_policy = policy.loss(&batch).unwrap();
    let output = policy.model().forward(&ModelInput::from_batch(&batch)).unwrap();
    let direct = ppo_surrogate_loss(
        policy.config(),
        policy.family(),
        &batch,
        &output,
        policy.coefficients(),
        false,
    )
    .unwrap();
    assert_eq!(via_policy.total_loss, direct.total_loss);
    assert_eq!(via_policy.stats, direct.stats);
}
