use criterion::{criterion_group, criterion_main, BatchSize, Criterion, PlottingBackend};
use tch::{nn::VarStore, Device};

const MAX_STEP_COUNT: usize = 200_000;
const EVAL_INTERVAL: usize = 5_000;

const TARGET_AVG_RETURN: f64 = 195.0;

fn a2c_cpu(c: &mut Criterion) {
    use pg_utils::{a2c::A2C, env, logging};

    logging::init();

    c.bench_function("A2C/CPU", |b| {
        b.iter_batched(
            || {
                let device = Device::Cpu;

                A2C::builder()
                    .policy_vs(VarStore::new(device))
                    .value_vs(VarStore::new(device))
                    .env(env::CartPole::new())
                    .fc_layers(&[128])
                    .gamma(0.99)
                    .learning_rate(5e-4)
                    .build()
                    .expect("valid A2C configuration")
            },
            |mut a2c| {
                for i in 0..(MAX_STEP_COUNT / EVAL_INTERVAL) {
                    a2c.train(EVAL_INTERVAL).expect("training step");

                    let avg_return = a2c.evaluate_avg_return().expect("evaluation");

                    if avg_return >= TARGET_AVG_RETURN {
                        break;
                    }

                    assert!(
                        (i + 1) * EVAL_INTERVAL != MAX_STEP_COUNT,
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
    targets = a2c_cpu
}
criterion_main!(benches);
