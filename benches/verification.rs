use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uuid::Uuid;

use deepthink::domain::models::SourceType;
use deepthink::services::evidence_gatherer::{rerank, RetrievedSnippet};
use deepthink::services::verifier::{select_winner, CandidateVerdict};

fn verdicts(count: u32) -> Vec<CandidateVerdict> {
    (0..count)
        .map(|i| CandidateVerdict {
            candidate_pass_id: Uuid::new_v4(),
            candidate_index: i,
            deterministic_passed: i % 3 != 0,
            failed_checks: Vec::new(),
            score: f64::from((i * 37) % 100) / 100.0,
            judgment_skipped: false,
            judge_reasoning: None,
        })
        .collect()
}

fn snippets(count: usize) -> Vec<RetrievedSnippet> {
    (0..count)
        .map(|i| RetrievedSnippet {
            source_id: "bench".to_string(),
            source_type: SourceType::File,
            uri: format!("file://doc{}.md", i),
            // every fourth snippet repeats an earlier one
            text: format!(
                "Snippet {} about ownership, borrowing and lifetimes in systems code.",
                if i % 4 == 0 { 0 } else { i }
            ),
            location: None,
        })
        .collect()
}

fn bench_select_winner(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_winner");
    for count in [3u32, 16, 64] {
        let input = verdicts(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| select_winner(black_box(input), false))
        });
    }
    group.finish();
}

fn bench_rerank(c: &mut Criterion) {
    let goal = "How do borrowing rules interact with lifetimes?";
    let mut group = c.benchmark_group("rerank");
    for count in [16usize, 128, 1024] {
        let input = snippets(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| rerank(black_box(goal), black_box(input), 8))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_winner, bench_rerank);
criterion_main!(benches);
