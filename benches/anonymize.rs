/// Anonymizer and classifier benchmarks
///
/// Measures masking cost for typical form payloads and message classification.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use medscore_guard::error::{ErrorClassifier, Failure};
use medscore_guard::logging::{Anonymizer, MaskingRule};
use serde_json::{json, Value};

fn form_payload(fields: usize) -> Value {
    let mut map = serde_json::Map::new();
    for i in 0..fields {
        let (key, value) = match i % 4 {
            0 => (format!("patient_name_{}", i), json!("John Doe")),
            1 => (format!("email_{}", i), json!("john.doe@example.org")),
            2 => (format!("score_{}", i), json!(i)),
            _ => (format!("history_{}", i), json!({"systolic": 120, "diastolic": 80})),
        };
        map.insert(key, value);
    }
    Value::Object(map)
}

fn bench_anonymize(c: &mut Criterion) {
    let mut group = c.benchmark_group("anonymize");
    let anonymizer = Anonymizer::default().with_default_rule(MaskingRule::keep_last(2));

    for fields in [4usize, 32, 256] {
        let payload = form_payload(fields);
        group.throughput(Throughput::Elements(fields as u64));

        group.bench_with_input(BenchmarkId::new("flat_form", fields), &payload, |b, payload| {
            b.iter(|| anonymizer.anonymize(black_box(payload)));
        });
    }

    let nested = json!({
        "patient": {"name": "Jane Roe", "dob": "1970-01-01", "contacts": [{"phone": "555-0100"}]},
        "inputs": {"age": 67, "urea": 8.1, "respiratory_rate": 31},
        "result": {"score": 3, "risk": "high"}
    });
    group.bench_function("nested_calculation", |b| {
        b.iter(|| anonymizer.anonymize(black_box(&nested)));
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let classifier = ErrorClassifier::new();

    let cases = [
        ("code", Failure::new("lookup failed").with_code("ENOTFOUND")),
        ("message", Failure::new("Request timed out after 30s")),
        ("unknown", Failure::new("Something odd happened")),
    ];

    for (name, failure) in cases.iter() {
        group.bench_with_input(BenchmarkId::new("failure", name), failure, |b, failure| {
            b.iter(|| classifier.classify(black_box(failure)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_anonymize, bench_classify);
criterion_main!(benches);
