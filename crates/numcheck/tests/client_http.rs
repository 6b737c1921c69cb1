mod harness;

use harness::{unreachable_base_url, MockService, Reply};
use numcheck::{Candidate, Classification, NumberChecker, TwoChatClient, VerifyError};
use reqwest::Url;
use serde_json::json;

const SOURCE: &str = "+10000000000";

fn client(base_url: &str) -> TwoChatClient {
    TwoChatClient::new(
        reqwest::Client::new(),
        Url::parse(base_url).unwrap(),
        SOURCE,
        "test-key",
    )
}

fn candidate(number: &str) -> Candidate {
    Candidate::new(number).unwrap()
}

#[tokio::test]
async fn successful_lookup_sends_credential_and_parses_payload() {
    let service = MockService::start(vec![(
        "+15551234567",
        Reply::json(
            200,
            json!({
                "success": true,
                "on_whatsapp": true,
                "number": {"iso_country_code": "US", "region": "CA"},
                "whatsapp_info": {"is_business": false, "verified_name": null}
            }),
        ),
    )]);

    let result = client(&service.base_url)
        .check(&candidate("+15551234567"))
        .await
        .unwrap();

    assert_eq!(result.on_whatsapp, Some(true));
    assert_eq!(result.number_info, Some(json!({"iso_country_code": "US", "region": "CA"})));
    assert!(result.whatsapp_info.is_some());

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(
        requests[0].path,
        "/open/whatsapp/check-number/+10000000000/+15551234567"
    );
    assert_eq!(requests[0].api_key.as_deref(), Some("test-key"));
}

#[tokio::test]
async fn fatal_statuses_are_classified_fatal() {
    let service = MockService::start(vec![
        ("+1401", Reply::json(401, json!({"message": "invalid api key"}))),
        ("+1402", Reply::json(402, json!({"message": "no credits"}))),
        ("+1404", Reply::json(404, json!({"message": "unknown source"}))),
    ]);
    let client = client(&service.base_url);

    for (number, expected) in [("+1401", 401), ("+1402", 402), ("+1404", 404)] {
        let err = client.check(&candidate(number)).await.unwrap_err();
        assert_eq!(err.classification(), Classification::Fatal);
        match err {
            VerifyError::Service { status, body, .. } => {
                assert_eq!(status, expected);
                assert!(body.contains("message"));
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn server_error_is_transient() {
    let service = MockService::start(vec![(
        "+15550000",
        Reply::json(500, json!({"error": "boom"})),
    )]);

    let err = client(&service.base_url)
        .check(&candidate("+15550000"))
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Service { status: 500, .. }));
    assert_eq!(err.classification(), Classification::Transient);
}

#[tokio::test]
async fn malformed_body_is_transient_payload_error() {
    let service = MockService::start(vec![(
        "+15550000",
        Reply {
            status: 200,
            body: "<html>not json</html>".to_string(),
        },
    )]);

    let err = client(&service.base_url)
        .check(&candidate("+15550000"))
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Payload(_)));
    assert_eq!(err.classification(), Classification::Transient);
}

#[tokio::test]
async fn connection_refused_is_transient_network_error() {
    let err = client(&unreachable_base_url())
        .check(&candidate("+15550000"))
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Network(_)));
    assert_eq!(err.classification(), Classification::Transient);
}
