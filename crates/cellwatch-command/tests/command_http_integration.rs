use std::time::Duration;

use cellwatch_command::{
    extract_output, CommandClient, CommandClientConfig, CommandError, CommandOutcome,
    CommandStatus,
};
use httpmock::prelude::*;
use serde_json::json;

fn client_for(server: &MockServer) -> CommandClient {
    CommandClient::new(CommandClientConfig {
        api_base: server.base_url(),
        ..CommandClientConfig::default()
    })
    .expect("command client should be created")
}

#[tokio::test]
async fn integration_send_normalizes_prefix_and_requests_server_side_wait() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("command", "AT+CFUN=1,1")
            .query_param("wait", "1")
            .query_param("timeout", "30");
        then.status(200).json_body(json!({
            "command_id": "c-1",
            "response": {
                "status": "success",
                "raw_output": "AT+CFUN=1,1\nOK",
                "completion_time": "2026-10-14T08:00:00Z",
                "duration_ms": 1840
            }
        }));
    });

    let outcome = client_for(&server)
        .send_command("+CFUN=1,1")
        .await
        .expect("command should succeed");

    mock.assert();
    let result = outcome.into_completed().expect("completed result");
    assert_eq!(result.status, CommandStatus::Success);
    assert_eq!(result.duration_ms, 1840);
    assert_eq!(
        result.completion_time.as_deref(),
        Some("2026-10-14T08:00:00Z")
    );
}

#[tokio::test]
async fn functional_success_output_is_extracted_without_echo_or_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("command", "AT+CSQ");
        then.status(200).json_body(json!({
            "response": {
                "status": "success",
                "raw_output": "AT+CSQ\n+CSQ: 20,99\n\nOK",
                "duration_ms": 35
            }
        }));
    });

    let outcome = client_for(&server)
        .send("AT+CSQ", true, 10)
        .await
        .expect("command should succeed");
    let result = outcome.completed().expect("completed result");
    assert_eq!(extract_output(&result.raw_output), "+CSQ: 20,99");
}

#[tokio::test]
async fn functional_endpoint_reported_timeout_rejects_with_timeout_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("wait", "1");
        then.status(200).json_body(json!({
            "response": { "status": "timeout", "raw_output": "" }
        }));
    });

    let error = client_for(&server)
        .send("+COPS=?", true, 60)
        .await
        .expect_err("timeout should reject");
    assert_eq!(error.status(), CommandStatus::Timeout);
    assert!(matches!(
        error,
        CommandError::DeviceTimeout {
            timeout_seconds: 60,
            ..
        }
    ));
}

#[tokio::test]
async fn functional_device_rejection_is_an_error_not_a_timeout() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/cgi-bin/at_queue");
        then.status(200).json_body(json!({
            "response": { "status": "error", "raw_output": "AT+CPIN?\n+CME ERROR: 10\nERROR" }
        }));
    });

    let error = client_for(&server)
        .send_command("+CPIN?")
        .await
        .expect_err("rejection");
    assert_eq!(error.status(), CommandStatus::Error);
    assert!(error.to_string().contains("+CME ERROR: 10"));
}

#[tokio::test]
async fn functional_top_level_error_field_rejects_the_call() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/cgi-bin/at_queue");
        then.status(200)
            .json_body(json!({ "status": "error", "error": "queue is full" }));
    });

    let error = client_for(&server)
        .send_command("+CSQ")
        .await
        .expect_err("queue error");
    assert!(matches!(
        error,
        CommandError::Rejected { ref message, .. } if message == "queue is full"
    ));
}

#[tokio::test]
async fn integration_http_failure_and_malformed_payload_are_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("command", "AT+QTEMP");
        then.status(502).body("bad gateway");
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("command", "AT+QENG");
        then.status(200).body("<html>not json</html>");
    });

    let client = client_for(&server);
    let http_error = client.send_command("+QTEMP").await.expect_err("502");
    assert!(matches!(
        http_error,
        CommandError::HttpStatus { status: 502, .. }
    ));
    let malformed = client.send_command("+QENG").await.expect_err("html");
    assert!(matches!(malformed, CommandError::MalformedPayload(_)));
    assert_eq!(malformed.status(), CommandStatus::Error);
}

#[tokio::test]
async fn regression_client_deadline_bounds_a_hung_transport() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/cgi-bin/at_queue");
        then.status(200)
            .delay(Duration::from_secs(4))
            .json_body(json!({ "response": { "status": "success", "raw_output": "OK" } }));
    });

    let client = CommandClient::new(CommandClientConfig {
        api_base: server.base_url(),
        request_grace: Duration::ZERO,
        ..CommandClientConfig::default()
    })
    .expect("client");

    let started = std::time::Instant::now();
    let error = client
        .send("+CFUN=1,1", true, 1)
        .await
        .expect_err("deadline should elapse");
    assert!(matches!(error, CommandError::DeadlineElapsed { seconds: 1 }));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn integration_fire_and_forget_returns_queue_receipt_then_fetches_result() {
    let server = MockServer::start();
    let queue = server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_queue")
            .query_param("command", "AT+QPOWD")
            .query_param_missing("wait");
        then.status(200).json_body(json!({
            "status": "queued",
            "command": { "id": 77, "text": "AT+QPOWD", "timestamp": 1760428800 }
        }));
    });
    let result = server.mock(|when, then| {
        when.method(GET)
            .path("/cgi-bin/at_result")
            .query_param("command_id", "77");
        then.status(200).json_body(json!({
            "response": {
                "status": "success",
                "raw_output": "AT+QPOWD\nPOWERED DOWN",
                "duration_ms": 900
            }
        }));
    });

    let client = client_for(&server);
    let outcome = client
        .send("+QPOWD", false, 30)
        .await
        .expect("queue receipt");
    let CommandOutcome::Queued(queued) = outcome else {
        panic!("expected queued outcome");
    };
    assert_eq!(queued.command_id, "77");
    assert_eq!(queued.timestamp.as_deref(), Some("1760428800"));
    queue.assert();

    let fetched = client
        .fetch_result(&queued.command_id)
        .await
        .expect("fetch")
        .expect("completed");
    result.assert();
    assert_eq!(fetched.output("AT"), "POWERED DOWN");
}

#[tokio::test]
async fn functional_fetch_result_reports_pending_as_none() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/cgi-bin/at_result");
        then.status(200)
            .json_body(json!({ "command_id": "5", "status": "pending" }));
    });

    let pending = client_for(&server)
        .fetch_result("5")
        .await
        .expect("pending fetch");
    assert!(pending.is_none());
}
