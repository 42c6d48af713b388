use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kmcox::{kaplan_meier, log_rank_test, CoxModel, GroupSurvival, SurvivalData};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn generate_synthetic_data(n_samples: usize, n_features: usize) -> SurvivalData {
    let mut rng = StdRng::seed_from_u64(42);

    let mut covariates_vec = Vec::with_capacity(n_samples * n_features);
    for _ in 0..(n_samples * n_features) {
        covariates_vec.push(rng.gen_range(-2.0..2.0));
    }
    let covariates = Array2::from_shape_vec((n_samples, n_features), covariates_vec).unwrap();

    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);

    let true_coefficients = Array1::from(vec![0.5, -0.3, 0.2]);

    for i in 0..n_samples {
        let n_coef = n_features.min(3);
        let linear_pred: f64 = covariates
            .row(i)
            .slice(ndarray::s![0..n_coef])
            .dot(&true_coefficients.slice(ndarray::s![0..n_coef]));

        let hazard = linear_pred.exp();
        let time = (-rng.r#gen::<f64>().ln() / (0.1 * hazard)).max(0.1);
        let censoring_time = rng.gen_range(1.0..8.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    let names = (0..n_features).map(|i| format!("x{}", i)).collect();
    SurvivalData::new(times, events, covariates, names).unwrap()
}

fn benchmark_cox_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("cox_fitting");

    for &n_samples in [50, 100, 200, 500].iter() {
        for &n_features in [2, 5, 10].iter() {
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{}x{}", n_samples, n_features)),
                &(n_samples, n_features),
                |b, &(n_samples, n_features)| {
                    let data = generate_synthetic_data(n_samples, n_features);
                    b.iter(|| {
                        let model = CoxModel::new()
                            .with_max_iterations(100)
                            .with_tolerance(1e-6);
                        model.fit(black_box(&data)).unwrap();
                    });
                },
            );
        }
    }
    group.finish();
}

fn benchmark_kaplan_meier(c: &mut Criterion) {
    let mut group = c.benchmark_group("kaplan_meier");

    for &n_samples in [100, 1000, 10000].iter() {
        let data = generate_synthetic_data(n_samples, 2);
        let times = data.times().to_vec();
        let events = data.events().to_vec();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_samples", n_samples)),
            &n_samples,
            |b, _| {
                b.iter(|| {
                    kaplan_meier(black_box(&times), black_box(&events)).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn benchmark_log_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_rank");

    for &n_per_group in [100, 500, 2000].iter() {
        let a_data = generate_synthetic_data(n_per_group, 2);
        let b_data = generate_synthetic_data(n_per_group, 2);
        let a = GroupSurvival::new("a", a_data.times().to_vec(), a_data.events().to_vec());
        let b_group = GroupSurvival::new("b", b_data.times().to_vec(), b_data.events().to_vec());
        let groups = vec![a, b_group];

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_per_group", n_per_group)),
            &n_per_group,
            |b, _| {
                b.iter(|| {
                    log_rank_test(black_box(&groups)).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn benchmark_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    let train_data = generate_synthetic_data(200, 5);
    let fit = CoxModel::new().fit(&train_data).unwrap();

    for &n_samples in [50, 100, 500].iter() {
        let test_data = generate_synthetic_data(n_samples, 5);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_risk_scores", n_samples)),
            &n_samples,
            |b, _| {
                b.iter(|| {
                    fit.relative_risk(black_box(test_data.covariates())).unwrap();
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_curves", n_samples)),
            &n_samples,
            |b, _| {
                b.iter(|| {
                    fit.predict_survival(black_box(test_data.covariates())).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn benchmark_concordance(c: &mut Criterion) {
    let mut group = c.benchmark_group("concordance");

    let data = generate_synthetic_data(300, 5);
    let fit = CoxModel::new().fit(&data).unwrap();

    group.bench_function("harrell_c_300", |b| {
        b.iter(|| {
            fit.concordance(black_box(&data)).unwrap();
        });
    });

    group.finish();
}

fn benchmark_large_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_scale");
    group.sample_size(10);

    let large_data = generate_synthetic_data(2000, 5);
    group.bench_function("2000_samples_5_features", |b| {
        b.iter(|| {
            let model = CoxModel::new()
                .with_max_iterations(50)
                .with_tolerance(1e-6);
            model.fit(black_box(&large_data)).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_cox_fitting,
    benchmark_kaplan_meier,
    benchmark_log_rank,
    benchmark_prediction,
    benchmark_concordance,
    benchmark_large_scale
);

criterion_main!(benches);
