//! HTTP-level tests for the REST client against a local mock server.

use dai_api_contract::*;
use dai_client_api::{ClientApiError, TaskApi};
use dai_rest_client::{RestClient, RestClientError};
use futures::StreamExt;
use mockito::Matcher;
use serde_json::json;

const RUN_BODY: &str = "event: MESSAGE_START\n\n\
event: MESSAGE_CHUNK\ndata: {\"type\":\"text\",\"content\":\"Hel\"}\n\n\
event: MESSAGE_CHUNK\ndata: {\"type\":\"text\",\"content\":\"lo\"}\n\n\
event: MESSAGE_END\n\n\
event: TASK_DONE\n\n";

#[tokio::test]
async fn test_resume_task_streams_frames_in_order() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tasks/resume/7")
        .match_header("accept", "text/event-stream")
        .match_body(Matcher::Json(json!({"message": {"role": "user", "content": "hi"}})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(RUN_BODY)
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    let outbound = Outbound::from(Message::user("hi"));
    let frames: Vec<_> = client
        .resume_task(7, Some(&outbound))
        .await
        .unwrap()
        .collect()
        .await;

    let names: Vec<String> = frames
        .into_iter()
        .map(|frame| frame.unwrap().event)
        .collect();
    assert_eq!(
        names,
        vec![
            "MESSAGE_START",
            "MESSAGE_CHUNK",
            "MESSAGE_CHUNK",
            "MESSAGE_END",
            "TASK_DONE"
        ]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_resume_without_input_sends_null_message() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tasks/resume/3")
        .match_body(Matcher::Json(json!({"message": null})))
        .with_status(200)
        .with_body("event: TASK_DONE\n\n")
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    let frames: Vec<_> = TaskApi::resume_task(&client, 3, None)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(frames, vec![Ok(SseFrame::new("TASK_DONE", ""))]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_success_uses_error_field() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/tasks/resume/1")
        .with_status(409)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"task is already running"}"#)
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    let err = TaskApi::resume_task(&client, 1, None).await.err().unwrap();
    assert_eq!(
        err,
        ClientApiError::Server("task is already running".to_string())
    );
}

#[tokio::test]
async fn test_non_success_falls_back_to_status_text() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/tasks/resume/1")
        .with_status(500)
        .with_body("<html>oops</html>")
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    match client.resume_task(1, None).await {
        Err(RestClientError::ServerError { status, message }) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(message, "Internal Server Error");
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_answer_tool_posts_answer() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tasks/answer/9")
        .match_body(Matcher::Json(
            json!({"tool_call_id": "c1", "answer": "blue"}),
        ))
        .with_status(200)
        .with_body("event: TASK_DONE\n\n")
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    let frames: Vec<_> = client
        .answer_tool(9, "c1", &json!("blue"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(frames.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_and_list_tasks() {
    let mut server = mockito::Server::new_async().await;
    let task = json!({
        "id": 4,
        "title": "Investigate flaky test",
        "type": "agent",
        "agent_id": 2,
        "workspace_id": 1,
        "messages": [
            {"role": "user", "content": "why does it fail?"},
            {"role": "assistant", "content": "Looking.", "reasoning_content": null, "tool_calls": null}
        ]
    });
    server
        .mock("GET", "/tasks/4")
        .with_status(200)
        .with_body(task.to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/tasks")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("workspace_id".into(), "1".into()),
            Matcher::UrlEncoded("page".into(), "2".into()),
            Matcher::UrlEncoded("per_page".into(), "15".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({"items": [task], "total": 16, "page": 2, "per_page": 15, "total_pages": 2})
                .to_string(),
        )
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();

    let fetched = client.fetch_task(4).await.unwrap();
    assert_eq!(fetched.task_type, TaskType::Agent);
    assert_eq!(fetched.messages.len(), 2);

    let page = client.list_tasks(1, 2, 15).await.unwrap();
    assert_eq!(page.total, 16);
    assert_eq!(page.items[0].id, 4);
}

#[tokio::test]
async fn test_pause_and_delete_accept_empty_bodies() {
    let mut server = mockito::Server::new_async().await;
    let pause = server
        .mock("POST", "/tasks/pause/5")
        .with_status(200)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/tasks/5")
        .with_status(204)
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    client.pause_task(5).await.unwrap();
    client.delete_task(5).await.unwrap();

    pause.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn test_invalid_requests_never_reach_the_server() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/tasks/")
        .expect(0)
        .create_async()
        .await;

    let client = RestClient::from_url(&server.url()).unwrap();
    let request = TaskCreate {
        title: String::new(),
        task_type: TaskType::Orchestration,
        agent_id: 1,
        workspace_id: 1,
        messages: vec![],
    };
    let err = TaskApi::create_task(&client, &request).await.unwrap_err();
    assert!(matches!(err, ClientApiError::InvalidRequest(_)));

    let blank = Outbound::from(Message::user(""));
    assert!(matches!(
        client.resume_task(1, Some(&blank)).await,
        Err(RestClientError::ApiContract(_))
    ));

    create.assert_async().await;
}
