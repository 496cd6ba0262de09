//! Claim extraction and validation throughput on realistic responses.

use criterion::{criterion_group, criterion_main, Criterion};

use wellness_memory_core::config::ValidatorConfig;
use wellness_memory_core::validation::NumericValidator;

const RESPONSE: &str = "This week you finished 5 workouts over 228 minutes, \
    covering 21.4 km and burning roughly 1850 kcal. Average heart rate held \
    at 147 bpm with a peak of 176 bpm on Thursday's intervals, and your \
    resting heart rate dropped to 58 bpm. Daily steps averaged 9400.";

fn tool_outputs() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({
            "workouts": 5,
            "total_minutes": 228,
            "distance": "21.4 km",
            "calories": "1850 kcal",
        }),
        serde_json::json!({
            "average_hr": "147 bpm",
            "peak_hr": "176 bpm",
            "resting_hr": "58 bpm",
            "avg_steps": 9400,
        }),
    ]
}

fn bench_extract(c: &mut Criterion) {
    let validator = NumericValidator::new(ValidatorConfig::default());
    c.bench_function("extract_claims", |b| {
        b.iter(|| validator.extract(std::hint::black_box(RESPONSE)));
    });
}

fn bench_validate(c: &mut Criterion) {
    let validator = NumericValidator::new(ValidatorConfig::default());
    let outputs = tool_outputs();
    c.bench_function("validate_response", |b| {
        b.iter(|| validator.validate(std::hint::black_box(RESPONSE), std::hint::black_box(&outputs)));
    });
}

criterion_group!(benches, bench_extract, bench_validate);
criterion_main!(benches);
