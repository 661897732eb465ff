mod common;

use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{Harness, REFRESH_PATH, mount_refresh, mount_refresh_delayed};
use session_core::dispatch::{ApiRequest, DispatchError, REQUEST_ID_HEADER, RequestContext};
use session_core::session::{ReauthReason, SessionState};

#[tokio::test]
async fn test_single_401_renews_and_retries_once() {
    let h = Harness::logged_in("A2", "R2").await;
    Mock::given(method("GET"))
        .and(path("/api/pipelines"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, "R2", "A3", "R3", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/pipelines"))
        .and(header("authorization", "Bearer A3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pipelines": ["p1"]})))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut ctx = RequestContext::new();
    let response = h
        .session
        .dispatcher
        .send(&ApiRequest::get("/api/pipelines"), &mut ctx)
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["pipelines"][0], "p1");
    assert_eq!(ctx.retries_used(), 1);

    let token = h.session.manager.acquire(&RequestContext::new()).await.unwrap();
    assert_eq!(token, "A3");
}

#[tokio::test]
async fn test_second_401_is_terminal_without_third_attempt() {
    let h = Harness::logged_in("A2", "R2").await;
    Mock::given(method("GET"))
        .and(path("/api/pipelines"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, "R2", "A3", "R3", 1).await;

    let mut ctx = RequestContext::new();
    let err = h
        .session
        .dispatcher
        .send(&ApiRequest::get("/api/pipelines"), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::AuthRequired(ReauthReason::Rejected));
    assert_eq!(ctx.retries_used(), 1);

    // The session is now errored, so the next call fails without any traffic.
    assert_eq!(h.session.manager.state(), SessionState::Errored);
    let err = h
        .session
        .dispatcher
        .send(&ApiRequest::get("/api/pipelines"), &mut RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::AuthRequired(ReauthReason::Rejected));
    assert_eq!(
        h.session.guard.redirect_for("/pipelines").as_deref(),
        Some("/login?next=%2Fpipelines&reason=rejected")
    );
}

#[tokio::test]
async fn test_spent_context_gets_no_second_renewal() {
    let h = Harness::logged_in("A2", "R2").await;
    Mock::given(method("GET"))
        .and(path("/api/documents"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, "R2", "A3", "R3", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/documents"))
        .and(header("authorization", "Bearer A3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pipelines"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut ctx = RequestContext::new();
    let dispatcher = &h.session.dispatcher;
    assert!(dispatcher.send(&ApiRequest::get("/api/documents"), &mut ctx).await.is_ok());
    assert_eq!(ctx.retries_used(), 1);

    // Same context, retry already spent: the 401 is terminal straight away.
    let err = dispatcher
        .send(&ApiRequest::get("/api/pipelines"), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::AuthRequired(ReauthReason::Rejected));
}

#[tokio::test]
async fn test_upstream_errors_pass_through_without_retry() {
    let h = Harness::logged_in("A1", "R1").await;
    Mock::given(method("POST"))
        .and(path("/api/documents"))
        .respond_with(ResponseTemplate::new(422).set_body_string("title is required"))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let request = ApiRequest::post("/api/documents").json(&json!({})).unwrap();
    let err = h
        .session
        .dispatcher
        .send(&request, &mut RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::Upstream {
            status: 422,
            body: "title is required".into()
        }
    );
    assert_eq!(h.session.manager.state(), SessionState::Fresh);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_renewal() {
    let h = Harness::logged_in("A1", "R1").await;
    Mock::given(method("GET"))
        .and(path("/api/chat/history"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(4)
        .mount(&h.server)
        .await;
    mount_refresh_delayed(&h.server, "R1", "A2", "R2", 1, Duration::from_millis(100)).await;
    Mock::given(method("GET"))
        .and(path("/api/chat/history"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(4)
        .mount(&h.server)
        .await;

    let request = ApiRequest::get("/api/chat/history");
    let sends = (0..4).map(|_| {
        let dispatcher = h.session.dispatcher.clone();
        let request = request.clone();
        async move {
            let mut ctx = RequestContext::new();
            dispatcher.send(&request, &mut ctx).await.map(|r| r.status().as_u16())
        }
    });
    for result in join_all(sends).await {
        assert_eq!(result.unwrap(), 200);
    }
}

#[tokio::test]
async fn test_retry_reuses_request_id_and_body() {
    let h = Harness::logged_in("A1", "R1").await;
    Mock::given(method("POST"))
        .and(path("/api/search"))
        .and(header_exists(REQUEST_ID_HEADER))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, "R1", "A2", "R2", 1).await;
    Mock::given(method("POST"))
        .and(path("/api/search"))
        .and(body_json(json!({"query": "invoices"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": 3})))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut ctx = RequestContext::new();
    let request = ApiRequest::post("/api/search").json(&json!({"query": "invoices"})).unwrap();
    let response = h.session.dispatcher.send(&request, &mut ctx).await.unwrap();
    assert_eq!(response.request_id(), ctx.request_id());

    let received = h.server.received_requests().await.unwrap();
    let ids: Vec<String> = received
        .iter()
        .filter(|r| r.url.path() == "/api/search")
        .map(|r| r.headers[REQUEST_ID_HEADER].to_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ctx.request_id().to_string());
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_cancelled_send() {
    let h = Harness::logged_in("A1", "R1").await;
    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&h.server)
        .await;

    let token = CancellationToken::new();
    let mut ctx = RequestContext::new().with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = h
        .session
        .dispatcher
        .send(&ApiRequest::get("/api/slow"), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::Cancelled);
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_path_leaving_origin_is_refused() {
    let h = Harness::logged_in("A1", "R1").await;
    let err = h
        .session
        .dispatcher
        .send(&ApiRequest::get("//attacker.example/steal"), &mut RequestContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidRequest(_)));
}
