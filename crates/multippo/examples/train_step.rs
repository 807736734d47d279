//! Postprocess synthetic rollouts of three agents and run training steps.
//!
//! Usage: `cargo run --example train_step -- [config.json] [metrics.jsonl]`

use anyhow::Result;
use multippo::prelude::*;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const OBS_DIM: usize = 4;
const CHOICES: usize = 3;

/// Linear logits and values over the observation
struct LinearModel {
    policy: Array2<f32>,
    value: Array2<f32>,
}

impl LinearModel {
    fn new(agents: usize, rng: &mut StdRng) -> Self {
        Self {
            policy: Array2::from_shape_fn((OBS_DIM, agents * CHOICES), |_| rng.gen_range(-0.5..0.5)),
            value: Array2::from_shape_fn((OBS_DIM, agents), |_| rng.gen_range(-0.5..0.5)),
        }
    }
}

impl Model for LinearModel {
    fn forward(&self, input: &ModelInput<'_>) -> multippo::Result<ModelOutput> {
        Ok(ModelOutput {
            dist_inputs: input.obs.dot(&self.policy),
            state_out: Vec::new(),
            values: input.obs.dot(&self.value),
        })
    }
}

fn rollout(
    policy: &MultiAgentPpoPolicy<LinearModel, ActionDistKind>,
    rng: &mut StdRng,
    steps: usize,
) -> Result<TrajectorySegment> {
    let agents = policy.config().num_agents;
    let obs = Array2::from_shape_fn((steps, OBS_DIM), |_| rng.gen_range(-1.0..1.0));
    let out = policy.model().forward(&ModelInput {
        obs: obs.view(),
        state_in: Vec::new(),
        seq_lens: None,
        is_training: false,
    })?;
    let dist = policy.family().construct(out.dist_inputs.view())?;

    let actions = Array2::from_shape_fn((steps, agents), |_| rng.gen_range(0..CHOICES) as f32);
    let logp = dist.logp(actions.view())?;
    let per_agent: Vec<Vec<f32>> = (0..steps)
        .map(|t| (0..agents).map(|i| if actions[[t, i]] == 0.0 { 1.0 } else { 0.0 }).collect())
        .collect();
    let rewards = Array1::from_shape_fn(steps, |t| per_agent[t].iter().sum());
    let infos = per_agent
        .iter()
        .map(|r| serde_json::json!({ "rewards": r }))
        .collect();
    let mut dones = vec![false; steps];
    if rng.gen_bool(0.5) {
        dones[steps - 1] = true;
    }

    Ok(
        TrajectorySegment::new(obs, actions, out.dist_inputs, logp, out.values, rewards, dones)
            .with_infos(infos),
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) if path != "-" => PpoConfig::from_json_file(path)?,
        _ => PpoConfig::default().with_discount(0.99, 0.95),
    };
    let mut reporters: Vec<Box<dyn StatsReporter>> = vec![Box::new(ConsoleReporter::new("train"))];
    if let Some(path) = args.next() {
        reporters.push(Box::new(JsonLinesReporter::create(path)?));
    }
    let mut rng = StdRng::seed_from_u64(0);
    let model = LinearModel::new(config.num_agents, &mut rng);
    let family = ActionDistKind::multi_categorical(vec![CHOICES; config.num_agents]);
    let mut policy = MultiAgentPpoPolicy::new(config, model, family)?;

    let mut timestep = 0u64;
    for iteration in 0..5u64 {
        let batches = (0..4)
            .map(|_| {
                let segment = rollout(&policy, &mut rng, 32)?;
                Ok(policy.postprocess_trajectory(&segment)?)
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = TrainingBatch::concat(&batches)?;
        timestep += batch.len() as u64;
        policy.on_global_var_update(timestep);

        let step = policy.learn_on_batch(&batch)?;
        step.report(&reporters, iteration);
        tracing::info!(iteration, next_kl_coeff = step.kl_coeff, "Adapted KL coefficient");
    }
    reporters.flush()?;
    Ok(())
}
