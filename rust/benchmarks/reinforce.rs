use criterion::{criterion_group, criterion_main, BatchSize, Criterion, PlottingBackend};
use tch::{nn::VarStore, Device};

const MAX_EPISODE_COUNT: usize = 2_000;
const EVAL_INTERVAL: usize = 50;

const TARGET_AVG_RETURN: f64 = 195.0;

fn reinforce_cpu(c: &mut Criterion) {
    use pg_utils::{env, logging, reinforce::Reinforce};

    logging::init();

    c.bench_function("REINFORCE/CPU", |b| {
        b.iter_batched(
            || {
                Reinforce::builder()
                    .vs(VarStore::new(Device::Cpu))
                    .env(env::CartPole::new())
                    .fc_layers(&[128])
                    .gamma(0.99)
                    .learning_rate(1e-3)
                    .entropy_coef(0.01)
                    .clip_norm(1.0)
                    .build()
                    .expect("valid REINFORCE configuration")
            },
            |mut reinforce| {
                for i in 0..(MAX_EPISODE_COUNT / EVAL_INTERVAL) {
                    reinforce.train(EVAL_INTERVAL).expect("training step");

                    let avg_return = reinforce.evaluate_avg_return().expect("evaluation");

                    if avg_return >= TARGET_AVG_RETURN {
                        break;
                    }

                    assert!(
                        (i + 1) * EVAL_INTERVAL != MAX_EPISODE_COUNT,
                        "Failed to reach target average return"
                    );
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .plotting_backend(PlottingBackend::None);
    targets = reinforce_cpu
}
criterion_main!(benches);
