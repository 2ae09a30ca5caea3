// Command sanitization benchmarks (Criterion)
//
// Measures argv construction for typical scanner templates, with and
// without chain variables.
//
// Usage:
//   cargo bench --bench sanitize

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scanrig_orchestrator::resolve::{ChainValue, ChainVariables};
use scanrig_orchestrator::tools::{validate_command_safety, CommandRequest, CommandSanitizer};
use std::collections::BTreeMap;
use std::hint::black_box;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn bench_sanitize_command(c: &mut Criterion) {
    let sanitizer = CommandSanitizer::new();
    let args = strings(&[
        "dir",
        "-u",
        "https://{{target}}/",
        "-w",
        "{{wordlist}}",
        "-t",
        "{{threads}}",
    ]);
    let preset = strings(&["-q", "--no-error"]);
    let mut variables = BTreeMap::new();
    variables.insert("threads".to_string(), "50".to_string());
    let empty = ChainVariables::new();

    c.bench_function("sanitize_gobuster", |b| {
        b.iter(|| {
            let request = CommandRequest {
                tool: "gobuster",
                args: &args,
                target: "https://example.com:8443/app",
                wordlist: Some("/usr/share/wordlists/common.txt"),
                preset_args: &preset,
                variables: &variables,
                chain_variables: &empty,
            };
            black_box(sanitizer.sanitize_command(black_box(&request)))
        });
    });
}

fn bench_chain_substitution(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_substitution");
    let sanitizer = CommandSanitizer::new();
    let variables = BTreeMap::new();

    for domains in [1usize, 5, 10] {
        let mut chain = ChainVariables::new();
        for i in 1..=domains {
            chain.insert(
                &format!("domain_{}", i),
                ChainValue::Text(format!("sub{}.example.com", i)),
            );
        }
        let args: Vec<String> = (1..=domains)
            .map(|i| format!("{{{{chain.domain_{}}}}}", i))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(domains), &domains, |b, _| {
            b.iter(|| {
                let request = CommandRequest {
                    tool: "nmap",
                    args: &args,
                    target: "10.0.0.1",
                    wordlist: None,
                    preset_args: &[],
                    variables: &variables,
                    chain_variables: &chain,
                };
                black_box(sanitizer.sanitize_command(&request))
            });
        });
    }

    group.finish();
}

fn bench_safety_gate(c: &mut Criterion) {
    let command = strings(&["nmap", "-sV", "-p", "1-1000", "--open", "10.0.0.1"]);
    c.bench_function("validate_command_safety", |b| {
        b.iter(|| black_box(validate_command_safety(black_box(&command))));
    });
}

criterion_group!(
    benches,
    bench_sanitize_command,
    bench_chain_substitution,
    bench_safety_gate
);
criterion_main!(benches);
