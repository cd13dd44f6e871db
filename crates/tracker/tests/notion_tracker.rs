use autopilot_core::{TaskField, TaskId, TaskStatus, TaskUpdate};
use serde_json::{json, Value};
use tracker::{NotionTracker, TaskTracker, TrackerError};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page(id: &str, status: &str, extra: Value) -> Value {
    let mut properties = json!({
        "标题": { "title": [{ "plain_text": format!("Task {}", id) }] },
        "描述/复现步骤": { "rich_text": [{ "plain_text": "context" }] },
        "状态": { "status": { "name": status } },
        "Last Transition": { "date": { "start": "2026-03-01T10:00:00+00:00" } }
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    json!({ "id": id, "properties": properties })
}

async fn tracker(server: &MockServer) -> NotionTracker {
    NotionTracker::new("secret", "db1").with_base_url(server.uri())
}

#[tokio::test]
async fn list_tasks_follows_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/databases/db1/query"))
        .and(body_partial_json(json!({ "start_cursor": "c2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [page("p-2", "待处理", json!({}))],
            "has_more": false,
            "next_cursor": null
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/databases/db1/query"))
        .and(header("Notion-Version", "2022-06-28"))
        .and(body_partial_json(json!({
            "filter": { "property": "状态", "status": { "equals": "待处理" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [page("p-1", "待处理", json!({}))],
            "has_more": true,
            "next_cursor": "c2"
        })))
        .mount(&server)
        .await;

    let refs = tracker(&server)
        .await
        .list_tasks(TaskStatus::Pending)
        .await
        .unwrap();

    let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p-1", "p-2"]);
}

#[tokio::test]
async fn write_fields_appends_to_existing_text() {
    let server = MockServer::start().await;
    let existing = page(
        "p-1",
        "测试中",
        json!({ "PR": { "rich_text": [{ "plain_text": "## PR\nhttps://github.com/o/r/pull/1\n" }] } }),
    );

    Mock::given(method("GET"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(existing))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/pages/p-1"))
        .and(body_partial_json(json!({
            "properties": {
                "状态": { "status": { "name": "待测试" } },
                "Test Report": { "rich_text": [{ "text": { "content": "## Tests\n- Result: passed\n" } }] }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let update = TaskUpdate::new()
        .status(TaskStatus::AwaitingTestStatus)
        .append(TaskField::TestReport, "Tests", "- Result: passed");

    tracker(&server)
        .await
        .write_fields(&TaskId::new("p-1"), &update)
        .await
        .unwrap();
}

#[tokio::test]
async fn claim_verifies_token_after_write() {
    let server = MockServer::start().await;
    let tracker = tracker(&server).await;

    Mock::given(method("GET"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("p-1", "待处理", json!({}))))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .mount(&server)
        .await;

    // Another agent's token landed last.
    Mock::given(method("GET"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            "p-1",
            "起草中",
            json!({ "Claim": { "rich_text": [{ "plain_text": "other-run" }] } }),
        )))
        .mount(&server)
        .await;

    let observed = autopilot_core::TaskRef {
        id: TaskId::new("p-1"),
        status: TaskStatus::Pending,
        last_transition_at: "2026-03-01T10:00:00Z".parse().unwrap(),
    };

    let won = tracker
        .claim(&observed, TaskStatus::Drafting, "my-run")
        .await
        .unwrap();
    assert!(!won);
}

#[tokio::test]
async fn claim_skips_write_when_status_moved() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pages/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("p-1", "起草中", json!({}))))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let observed = autopilot_core::TaskRef {
        id: TaskId::new("p-1"),
        status: TaskStatus::Pending,
        last_transition_at: "2026-03-01T10:00:00Z".parse().unwrap(),
    };

    let won = tracker(&server)
        .await
        .claim(&observed, TaskStatus::Drafting, "my-run")
        .await
        .unwrap();
    assert!(!won);
}

#[tokio::test]
async fn api_errors_are_classified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pages/slow"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "message": "service unavailable" })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pages/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tracker = tracker(&server).await;

    let err = tracker.read_task(&TaskId::new("slow")).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("service unavailable"));

    let err = tracker.read_task(&TaskId::new("missing")).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)));
    assert!(!err.is_transient());
}
