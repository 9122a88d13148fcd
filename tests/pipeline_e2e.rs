use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use peerrank::gateway::{JudgeEndpoint, OpenAiCompatAdapter, ProviderCapabilities};
use peerrank::pipeline::{
    run_bradley_terry, run_direct, run_multi_agent, JobSettings, NoopProgressSink, ProgressSink,
    RankingJobInput,
};
use peerrank::prompts::{ItemMetadata, RankingItem, RankingType};
use peerrank::registry::PromptOverrides;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Judge that ranks every item it sees by a quality keyword planted in the
/// item content: BEST > GOOD > WEAK > WORST. Deterministic across calls, so
/// pairwise and whole-set judgments agree with each other.
#[derive(Clone, Copy)]
struct KeywordJudge;

fn quality(content: &str) -> i32 {
    if content.contains("BEST") {
        4
    } else if content.contains("GOOD") {
        3
    } else if content.contains("WEAK") {
        2
    } else {
        1
    }
}

/// Pull (id, content) pairs out of the user prompt's `<item>` blocks.
fn parse_items(user_content: &str) -> Vec<(String, String)> {
    let mut items = Vec::new();
    let mut rest = user_content;
    while let Some(start) = rest.find("<item>") {
        let after = &rest[start + "<item>".len()..];
        let Some(end) = after.find("</item>") else {
            break;
        };
        let block = &after[..end];
        let id = block
            .lines()
            .find_map(|l| l.strip_prefix("id: "))
            .unwrap_or("")
            .trim()
            .to_string();
        items.push((id, block.to_string()));
        rest = &after[end..];
    }
    items
}

impl Respond for KeywordJudge {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let parsed: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let user_content = parsed["messages"]
            .as_array()
            .and_then(|msgs| {
                msgs.iter()
                    .find(|m| m["role"] == "user")
                    .and_then(|m| m["content"].as_str())
            })
            .unwrap_or("")
            .to_string();

        // Items with a "poison" id simulate a provider-side failure.
        let mut items = parse_items(&user_content);
        if items.iter().any(|(id, _)| id == "poison") {
            return ResponseTemplate::new(500).set_body_string("upstream error");
        }

        items.sort_by_key(|(_, block)| -quality(block));
        let ranking: Vec<&str> = items.iter().map(|(id, _)| id.as_str()).collect();
        let content = json!({
            "reason": "ranked by observed quality",
            "ranking": ranking
        })
        .to_string();

        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": content },
                "finish_reason": "stop"
            }]
        }))
    }
}

struct CountingSink {
    calls: AtomicUsize,
    last_total: AtomicUsize,
}

impl CountingSink {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last_total: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProgressSink for CountingSink {
    async fn on_progress(&self, _completed: usize, total: usize) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_total.store(total, Ordering::SeqCst);
    }
}

fn item(id: &str, content: &str) -> RankingItem {
    RankingItem {
        id: id.to_string(),
        content: content.to_string(),
        metadata: ItemMetadata::default(),
    }
}

fn judge_endpoint(server: &MockServer, id: &str) -> JudgeEndpoint {
    JudgeEndpoint {
        id: id.to_string(),
        name: format!("judge-{id}"),
        base_url: server.uri(),
        model: "test-model".to_string(),
        api_key: "sk-test".to_string(),
        capabilities: ProviderCapabilities::detect(&server.uri()),
    }
}

fn input(items: Vec<RankingItem>) -> RankingJobInput {
    RankingJobInput {
        ranking_type: RankingType::Submission,
        items,
        custom_instruction: None,
        prompt_overrides: PromptOverrides::default(),
    }
}

async fn start_judge() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(KeywordJudge)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn direct_mode_ranks_all_items_in_one_call() {
    let server = start_judge().await;
    let adapter = OpenAiCompatAdapter::new();
    let endpoint = judge_endpoint(&server, "j1");
    let sink = CountingSink::new();

    let outcome = run_direct(
        &adapter,
        &endpoint,
        &input(vec![
            item("a", "a WEAK submission"),
            item("b", "the BEST submission"),
            item("c", "a GOOD submission"),
        ]),
        &JobSettings::default(),
        &sink,
    )
    .await
    .unwrap();

    assert_eq!(outcome.ranking, vec!["b", "c", "a"]);
    assert!(!outcome.reason.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.last_total.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bradley_terry_three_items_runs_full_round_robin() {
    let server = start_judge().await;
    let adapter = OpenAiCompatAdapter::new();
    let endpoint = judge_endpoint(&server, "j1");
    let sink = CountingSink::new();

    let outcome = run_bradley_terry(
        &adapter,
        &endpoint,
        &input(vec![
            item("a", "the BEST work"),
            item("b", "a GOOD effort"),
            item("c", "a WEAK attempt"),
        ]),
        3,
        &JobSettings::default(),
        &sink,
    )
    .await
    .unwrap();

    // n=3 stays on the full round-robin branch: exactly C(3,2) calls.
    assert_eq!(outcome.comparisons.len(), 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    assert_eq!(sink.last_total.load(Ordering::SeqCst), 3);

    assert_eq!(outcome.ranking, vec!["a", "b", "c"]);
    assert_eq!(outcome.failed_comparisons, 0);
    assert!(outcome.low_confidence.is_empty());
    assert!(outcome.comparisons.iter().all(|c| c.winner.is_some()));
    assert!(outcome.log_strengths["a"] > outcome.log_strengths["b"]);
    assert!(outcome.log_strengths["b"] > outcome.log_strengths["c"]);
}

#[tokio::test]
async fn bradley_terry_survives_failed_comparisons() {
    let server = start_judge().await;
    let adapter = OpenAiCompatAdapter::new();
    let endpoint = judge_endpoint(&server, "j1");

    let outcome = run_bradley_terry(
        &adapter,
        &endpoint,
        &input(vec![
            item("a", "the BEST work"),
            item("b", "a GOOD effort"),
            item("c", "a WEAK attempt"),
            item("poison", "never judged"),
        ]),
        3,
        &JobSettings::default(),
        &NoopProgressSink,
    )
    .await
    .unwrap();

    // Every pair touching the poison item errors out; the rest survive.
    assert_eq!(outcome.comparisons.len(), 6);
    assert_eq!(outcome.failed_comparisons, 3);
    assert_eq!(outcome.low_confidence, vec!["poison".to_string()]);

    // Full permutation of the input set regardless of failures.
    let mut got = outcome.ranking.clone();
    got.sort();
    assert_eq!(got, vec!["a", "b", "c", "poison"]);

    // The judged items keep their relative order.
    let pos = |id: &str| outcome.ranking.iter().position(|x| x == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("b") < pos("c"));
}

#[tokio::test]
async fn bradley_terry_large_set_bounds_call_count() {
    let server = start_judge().await;
    let adapter = OpenAiCompatAdapter::new();
    let endpoint = judge_endpoint(&server, "j1");

    let items: Vec<RankingItem> = (0..12)
        .map(|i| item(&format!("s{i}"), &format!("submission number {i}")))
        .collect();

    let outcome = run_bradley_terry(
        &adapter,
        &endpoint,
        &input(items),
        3,
        &JobSettings::default(),
        &NoopProgressSink,
    )
    .await
    .unwrap();

    // ceil(12 * 3 / 2) = 18, well under C(12,2) = 66.
    assert_eq!(outcome.comparisons.len(), 18);
    assert_eq!(server.received_requests().await.unwrap().len(), 18);
    assert_eq!(outcome.ranking.len(), 12);
}

#[tokio::test]
async fn multi_agent_two_judges_two_rounds() {
    let server = start_judge().await;
    let adapter = OpenAiCompatAdapter::new();
    let endpoints = vec![judge_endpoint(&server, "j1"), judge_endpoint(&server, "j2")];
    let sink = CountingSink::new();

    let outcome = run_multi_agent(
        &adapter,
        &endpoints,
        &input(vec![
            item("a", "a WEAK essay"),
            item("b", "the BEST essay"),
            item("c", "a GOOD essay"),
        ]),
        &JobSettings::default(),
        &sink,
    )
    .await
    .unwrap();

    assert_eq!(outcome.ranking, vec!["b", "c", "a"]);
    assert_eq!(outcome.round_one.len(), 2);
    assert_eq!(outcome.round_two.len(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
    assert_eq!(sink.last_total.load(Ordering::SeqCst), 4);

    // Round-two prompts must carry the peers' round-one verdicts.
    let requests = server.received_requests().await.unwrap();
    let debate_requests = requests
        .iter()
        .filter(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap_or_default();
            body["messages"]
                .as_array()
                .and_then(|m| m.iter().find(|msg| msg["role"] == "user"))
                .and_then(|m| m["content"].as_str())
                .is_some_and(|c| c.contains("<peer_verdict>"))
        })
        .count();
    assert_eq!(debate_requests, 2);
}

#[tokio::test]
async fn multi_agent_all_judges_failing_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let adapter = OpenAiCompatAdapter::new();
    let endpoints = vec![judge_endpoint(&server, "j1"), judge_endpoint(&server, "j2")];

    let err = run_multi_agent(
        &adapter,
        &endpoints,
        &input(vec![item("a", "x"), item("b", "y")]),
        &JobSettings::default(),
        &NoopProgressSink,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        peerrank::pipeline::PipelineError::AllJudgesFailed(_)
    ));
}

#[tokio::test]
async fn direct_mode_with_short_timeout_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let adapter = OpenAiCompatAdapter::new();
    let endpoint = judge_endpoint(&server, "j1");
    let settings = JobSettings {
        call_timeout: Duration::from_millis(50),
        ..Default::default()
    };

    let err = run_direct(
        &adapter,
        &endpoint,
        &input(vec![item("a", "x")]),
        &settings,
        &NoopProgressSink,
    )
    .await
    .unwrap_err();

    match err {
        peerrank::pipeline::PipelineError::Gateway(g) => assert_eq!(g.code(), "AI_TIMEOUT"),
        other => panic!("expected gateway timeout, got {other:?}"),
    }
}
