use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    Router,
};
use dispatch::{memory::MemoryDatabase, server::Server};
use serde_json::{json, Value};
use tower::ServiceExt;
use web::{app, WebState};

fn router() -> Router {
    app(WebState::new(Server::new(MemoryDatabase::new())))
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn stand(router: &Router, name: &str) -> i64 {
    let (status, stand) = send(
        router,
        "POST",
        "/api/v1/stands",
        Some(json!({ "name": name, "location": "forecourt" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    stand["id"].as_i64().unwrap()
}

async fn driver(router: &Router, stand: i64) -> i64 {
    let (status, driver) = send(
        router,
        "POST",
        "/api/v1/drivers",
        Some(json!({ "name": "Jo", "phone": "0431", "standId": stand })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    driver["id"].as_i64().unwrap()
}

async fn join(router: &Router, stand: i64, driver: i64) -> (StatusCode, Value) {
    send(
        router,
        "POST",
        &format!("/api/v1/stands/{}/queue", stand),
        Some(json!({ "driverId": driver })),
    )
    .await
}

async fn user(router: &Router) -> i64 {
    let (status, user) = send(
        router,
        "POST",
        "/api/v1/users",
        Some(json!({ "name": "Rider", "email": "rider@example.org" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    user["id"].as_i64().unwrap()
}

#[tokio::test]
async fn ping() {
    let (status, body) = send(&router(), "GET", "/api/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong!");
}

#[tokio::test]
async fn ride_takes_the_longest_waiting_driver() {
    let router = router();
    let stand = stand(&router, "Central Station").await;
    let first = driver(&router, stand).await;
    let second = driver(&router, stand).await;
    assert_eq!(join(&router, stand, first).await.0, StatusCode::OK);
    assert_eq!(join(&router, stand, second).await.0, StatusCode::OK);

    let (status, queue) = send(&router, "GET", &format!("/api/v1/stands/{}/queue", stand), None).await;
    assert_eq!(status, StatusCode::OK);
    let waiting = queue["data"].as_array().unwrap();
    assert_eq!(waiting.len(), 2);
    assert_eq!(waiting[0]["driverId"], first);
    assert_eq!(waiting[0]["status"], "waiting");

    let user = user(&router).await;
    let (status, ride) = send(
        &router,
        "POST",
        "/api/v1/rides",
        Some(json!({
            "userId": user,
            "startLocation": "Central Station",
            "endLocation": "Harbour",
            "standId": stand,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ride["status"], "accepted");
    assert_eq!(ride["driverId"], first);
    let links = ride["links"].as_array().unwrap();
    assert!(links.iter().any(|link| {
        link["rel"] == "driver"
            && link["href"] == format!("http://localhost/api/v1/drivers/{}", first)
    }));

    let (_, queue) = send(&router, "GET", &format!("/api/v1/stands/{}/queue", stand), None).await;
    let waiting = queue["data"].as_array().unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0]["driverId"], second);
}

#[tokio::test]
async fn queue_membership_errors() {
    let router = router();
    let home = stand(&router, "home").await;
    let other = stand(&router, "other").await;
    let driver = driver(&router, home).await;

    let (status, body) = join(&router, other, driver).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["httpMethod"], "POST");
    assert_eq!(join(&router, 404, driver).await.0, StatusCode::NOT_FOUND);
    assert_eq!(join(&router, home, 404).await.0, StatusCode::NOT_FOUND);

    let leave = format!("/api/v1/drivers/{}/queue", driver);
    assert_eq!(send(&router, "DELETE", &leave, None).await.0, StatusCode::NOT_FOUND);

    let (status, first) = join(&router, home, driver).await;
    assert_eq!(status, StatusCode::OK);
    let (_, again) = join(&router, home, driver).await;
    assert_eq!(first["id"], again["id"]);

    let (status, left) = send(&router, "DELETE", &leave, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(left["status"], "left");

    let next = format!("/api/v1/stands/{}/queue/next", home);
    assert_eq!(send(&router, "POST", &next, None).await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn pending_ride_is_assigned_on_request() {
    let router = router();
    let stand = stand(&router, "harbour").await;
    let user = user(&router).await;
    let (status, ride) = send(
        &router,
        "POST",
        "/api/v1/rides",
        Some(json!({
            "userId": user,
            "startLocation": "a",
            "endLocation": "b",
            "standId": stand,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ride["status"], "pending");
    assert!(ride.get("driverId").is_none());

    let assign = format!("/api/v1/rides/{}/assign", ride["id"]);
    let request = json!({ "standId": stand });
    let (status, _) = send(&router, "POST", &assign, Some(request.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let driver = driver(&router, stand).await;
    join(&router, stand, driver).await;
    let (status, assigned) = send(&router, "POST", &assign, Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["driverId"], driver);

    let (status, _) = send(&router, "POST", &assign, Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn finished_rides_can_not_be_reopened() {
    let router = router();
    let user = user(&router).await;
    let (_, ride) = send(
        &router,
        "POST",
        "/api/v1/rides",
        Some(json!({ "userId": user, "startLocation": "a", "endLocation": "b" })),
    )
    .await;
    let uri = format!("/api/v1/rides/{}", ride["id"]);

    let (status, done) = send(&router, "PUT", &uri, Some(json!({ "status": "completed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");

    let (status, _) = send(&router, "PUT", &uri, Some(json!({ "status": "pending" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_records_and_routes() {
    let router = router();
    assert_eq!(
        send(&router, "GET", "/api/v1/stands/9", None).await.0,
        StatusCode::NOT_FOUND
    );
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/rides",
        Some(json!({ "userId": 9, "startLocation": "a", "endLocation": "b" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["requestedUri"], "/api/v1/rides");

    let (status, body) = send(&router, "GET", "/api/v1/taxis", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Not Found");
}

#[tokio::test]
async fn lists_are_paginated() {
    let router = router();
    for name in ["a", "b", "c"] {
        stand(&router, name).await;
    }
    let (status, page) = send(&router, "GET", "/api/v1/stands?offset=1&limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
    assert_eq!(page["data"][0]["name"], "b");
    assert_eq!(page["pagination"]["offset"], 1);
}

#[tokio::test]
async fn availability_is_set_explicitly() {
    let router = router();
    let stand = stand(&router, "s").await;
    let driver = driver(&router, stand).await;
    let (status, updated) = send(
        &router,
        "PUT",
        &format!("/api/v1/drivers/{}/availability", driver),
        Some(json!({ "isAvailable": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["isAvailable"], true);
}

#[tokio::test]
async fn schemas_are_served() {
    let router = router();
    let (status, schema) = send(&router, "GET", "/api/v1/rides/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["title"], "Ride");

    let (status, example) =
        send(&router, "GET", "/api/v1/stands/schema?exampleData=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(example["examples"].is_array());
}
