use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hyper::Request;
use switchyard::config::{OneOrMany, Rule};
use switchyard::rules::{Router, Step};

fn create_rule(id: usize, regex: bool) -> Rule {
    let pattern = if regex {
        format!(r"api\.test(:\d+)?/v\d+/endpoint{id}\b")
    } else {
        format!("api.test/v1/endpoint{id}/")
    };
    Rule {
        condition: OneOrMany::One(pattern),
        test: None,
        actions: OneOrMany::One(format!("proxy(http://127.0.0.1:{})", 9000 + id)),
    }
}

fn create_router(count: usize, regex: bool) -> Router {
    let rules: Vec<Rule> = (0..count).map(|i| create_rule(i, regex)).collect();
    Router::from_rules(&rules).unwrap()
}

fn request(path: &str) -> Request<()> {
    Request::builder()
        .uri(path)
        .header("host", "api.test")
        .body(())
        .unwrap()
}

fn bench_first_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_match");

    for rule_count in [10, 100, 1000].iter() {
        let router = create_router(*rule_count, false);
        let first = request("/v1/endpoint0/");
        let last = request(&format!("/v1/endpoint{}/", rule_count - 1));
        let none = request("/not/found");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("match_first", rule_count), rule_count, |b, _| {
            b.iter(|| router.match_request(black_box(&first)))
        });
        group.bench_with_input(BenchmarkId::new("match_last", rule_count), rule_count, |b, _| {
            b.iter(|| router.match_request(black_box(&last)))
        });
        group.bench_with_input(BenchmarkId::new("match_none", rule_count), rule_count, |b, _| {
            b.iter(|| router.match_request(black_box(&none)))
        });
    }

    group.finish();
}

fn bench_regex_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("regex_match");

    for rule_count in [10, 100].iter() {
        let router = create_router(*rule_count, true);
        let req = request(&format!("/v2/endpoint{}", rule_count / 2));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("regex_middle", rule_count), rule_count, |b, _| {
            b.iter(|| router.match_request(black_box(&req)))
        });
    }

    group.finish();
}

fn bench_step_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_parse");

    group.bench_function("balancing", |b| {
        b.iter(|| {
            Step::parse(black_box(
                "balancing(http://10.0.0.1:80, http://10.0.0.2:80, http://10.0.0.3:80)",
            ))
        })
    });
    group.bench_function("json", |b| {
        b.iter(|| Step::parse(black_box(r#"json({"success":true,"items":[1,2,3]})"#)))
    });

    group.finish();
}

criterion_group!(benches, bench_first_match, bench_regex_match, bench_step_parse);
criterion_main!(benches);
