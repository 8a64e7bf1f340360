mod common;

use axum::{
    body::Bytes,
    http::{header, HeaderValue, StatusCode},
};
use serde_json::{json, Value};
use studymate::Subscription;
use uuid::Uuid;

use common::{card_json, create_cards, register, session_cookie, spawn_app, spawn_app_with, UNREACHABLE_PROVIDER};

// Auth

#[tokio::test]
async fn test_register_sets_http_only_cookie() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "name": "Ada", "email": "Ada@Example.com", "password": "secret123" }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let set_cookie = response.header(header::SET_COOKIE);
    let set_cookie = set_cookie.to_str().unwrap();
    assert!(set_cookie.starts_with("auth-token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Max-Age=604800"));

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["email"], "ada@example.com");
    assert!(body["data"]["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_register_validation_and_duplicates() {
    let app = spawn_app().await;

    let missing = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "email": "a@b.co", "password": "secret123" }))
        .await;
    missing.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = missing.json();
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());

    let short = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "name": "A", "email": "a@b.co", "password": "123" }))
        .await;
    short.assert_status(StatusCode::BAD_REQUEST);

    register(&app.server, "dup@example.com").await;
    let duplicate = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "name": "Again", "email": "DUP@example.com", "password": "secret123" }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_me_logout() {
    let app = spawn_app().await;
    register(&app.server, "flow@example.com").await;

    let wrong = app
        .server
        .post("/api/auth/login")
        .json(&json!({ "email": "flow@example.com", "password": "nope-nope" }))
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);

    let login = app
        .server
        .post("/api/auth/login")
        .json(&json!({ "email": "flow@example.com", "password": "secret123", "rememberMe": true }))
        .await;
    login.assert_status_ok();
    let remembered = login.header(header::SET_COOKIE);
    assert!(remembered.to_str().unwrap().contains("Max-Age=2592000"));
    let cookie = session_cookie(&login);

    let me = app
        .server
        .get("/api/auth/me")
        .add_header(header::COOKIE, cookie)
        .await;
    me.assert_status_ok();
    let body: Value = me.json();
    assert_eq!(body["data"]["user"]["email"], "flow@example.com");
    assert_eq!(body["data"]["user"]["subscription"], "free");

    let logout = app.server.post("/api/auth/logout").await;
    logout.assert_status_ok();
    assert!(logout.header(header::SET_COOKIE).to_str().unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = spawn_app().await;

    app.server.get("/api/auth/me").await.assert_status(StatusCode::UNAUTHORIZED);
    app.server.get("/api/cards").await.assert_status(StatusCode::UNAUTHORIZED);
    app.server.post("/api/quiz/start").await.assert_status(StatusCode::UNAUTHORIZED);

    let forged = app
        .server
        .get("/api/cards")
        .add_header(header::COOKIE, HeaderValue::from_static("auth-token=not-a-jwt"))
        .await;
    forged.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = forged.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["data"], Value::Null);
    assert_eq!(body["error"], "Invalid or expired session");

    let missing: Value = app.server.get("/api/auth/me").await.json();
    assert_eq!(missing["error"], "Not signed in");
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = spawn_app().await;
    register(&app.server, "reset@example.com").await;

    let unknown = app
        .server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "ghost@example.com" }))
        .await;
    unknown.assert_status_ok();
    assert!(app.mailer.sent.lock().unwrap().is_empty());

    app.server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "reset@example.com" }))
        .await
        .assert_status_ok();
    let token = app.mailer.last_token().expect("reset mail should be sent");

    app.server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": "bogus", "password": "newsecret" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": token, "password": "newsecret" }))
        .await
        .assert_status_ok();

    app.server
        .post("/api/auth/login")
        .json(&json!({ "email": "reset@example.com", "password": "newsecret" }))
        .await
        .assert_status_ok();

    // Tokens are single use
    app.server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": token, "password": "another1" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// Cards

#[tokio::test]
async fn test_card_crud() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "crud@example.com").await;
    let ids = create_cards(&app.server, &cookie, &["Borrowing"]).await;
    let id = &ids[0];

    let get = app
        .server
        .get(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, cookie.clone())
        .await;
    get.assert_status_ok();
    let body: Value = get.json();
    assert_eq!(body["data"]["title"], "Borrowing");
    assert_eq!(body["data"]["reviewCount"], 0);
    assert_eq!(body["data"]["isFavorite"], false);

    let update = app
        .server
        .put(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "title": "Borrowing rules", "content": "One mutable or many shared", "difficulty": "hard" }))
        .await;
    update.assert_status_ok();
    let body: Value = update.json();
    assert_eq!(body["data"]["title"], "Borrowing rules");
    assert_eq!(body["data"]["difficulty"], "hard");
    assert_eq!(body["data"]["tags"], json!([]));
    assert_eq!(body["data"]["question"], "");

    let invalid = app
        .server
        .put(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "title": "", "content": "x" }))
        .await;
    invalid.assert_status(StatusCode::BAD_REQUEST);

    app.server
        .delete(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, cookie.clone())
        .await
        .assert_status_ok();
    app.server
        .get(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, cookie.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_requires_cards_and_fields() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "fields@example.com").await;

    app.server
        .post("/api/cards")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cards": [] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/api/cards")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cards": [card_json("ok"), { "title": "no content" }] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Nothing from the rejected batch was written
    let list = app
        .server
        .get("/api/cards")
        .add_header(header::COOKIE, cookie)
        .await;
    let body: Value = list.json();
    assert_eq!(body["data"]["pagination"]["totalCount"], 0);
}

#[tokio::test]
async fn test_cards_are_isolated_between_users() {
    let app = spawn_app().await;
    let (alice, _) = register(&app.server, "alice@example.com").await;
    let (bob, _) = register(&app.server, "bob@example.com").await;
    let ids = create_cards(&app.server, &alice, &["Alice's card"]).await;
    let id = &ids[0];

    app.server
        .get(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, bob.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .put(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, bob.clone())
        .json(&card_json("hijacked"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .delete(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, bob.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .post("/api/cards/favorites")
        .add_header(header::COOKIE, bob.clone())
        .json(&json!({ "cardId": id }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let bobs: Value = app
        .server
        .get("/api/cards")
        .add_header(header::COOKIE, bob)
        .await
        .json();
    assert_eq!(bobs["data"]["cards"], json!([]));

    let alices: Value = app
        .server
        .get(&format!("/api/cards/{}", id))
        .add_header(header::COOKIE, alice)
        .await
        .json();
    assert_eq!(alices["data"]["title"], "Alice's card");
}

#[tokio::test]
async fn test_free_tier_quota_rejects_whole_batch() {
    let app = spawn_app_with(UNREACHABLE_PROVIDER, 3).await;
    let (cookie, user) = register(&app.server, "quota@example.com").await;
    create_cards(&app.server, &cookie, &["a", "b"]).await;

    let over = app
        .server
        .post("/api/cards")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cards": [card_json("c"), card_json("d")] }))
        .await;
    over.assert_status(StatusCode::FORBIDDEN);

    let list: Value = app
        .server
        .get("/api/cards")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    assert_eq!(list["data"]["pagination"]["totalCount"], 2);

    // Pro accounts are unlimited
    let user_id = Uuid::parse_str(user["id"].as_str().unwrap()).unwrap();
    app.db.set_subscription(user_id, Subscription::Pro).await.unwrap();
    create_cards(&app.server, &cookie, &["c", "d", "e"]).await;
}

#[tokio::test]
async fn test_favorites_toggle_and_list() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "fav@example.com").await;
    let ids = create_cards(&app.server, &cookie, &["one", "two"]).await;

    app.server
        .post("/api/cards/favorites")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let toggled: Value = app
        .server
        .post("/api/cards/favorites")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cardId": ids[0] }))
        .await
        .json();
    assert_eq!(toggled["data"]["isFavorite"], true);

    let favorites: Value = app
        .server
        .get("/api/cards/favorites")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    assert_eq!(favorites["data"]["pagination"]["totalCount"], 1);
    assert_eq!(favorites["data"]["cards"][0]["id"], ids[0].as_str());

    let explicit: Value = app
        .server
        .post("/api/cards/favorites")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cardId": ids[0], "isFavorite": true }))
        .await
        .json();
    assert_eq!(explicit["data"]["isFavorite"], true);

    let flipped: Value = app
        .server
        .post("/api/cards/favorites")
        .add_header(header::COOKIE, cookie)
        .json(&json!({ "cardId": ids[0] }))
        .await
        .json();
    assert_eq!(flipped["data"]["isFavorite"], false);
}

#[tokio::test]
async fn test_search_sort_and_pagination() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "page@example.com").await;
    let titles: Vec<String> = (1..=12).map(|i| format!("Card {:02}", i)).collect();
    let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    create_cards(&app.server, &cookie, &refs).await;

    let page2: Value = app
        .server
        .get("/api/cards")
        .add_query_param("page", 2)
        .add_query_param("pageSize", 5)
        .add_query_param("sortBy", "title")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    let pagination = &page2["data"]["pagination"];
    assert_eq!(pagination["totalCount"], 12);
    assert_eq!(pagination["totalPages"], 3);
    assert_eq!(pagination["hasNextPage"], true);
    assert_eq!(pagination["hasPrevPage"], true);
    assert_eq!(page2["data"]["cards"][0]["title"], "Card 06");

    let beyond: Value = app
        .server
        .get("/api/cards")
        .add_query_param("page", 9)
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    assert_eq!(beyond["data"]["cards"], json!([]));
    assert_eq!(beyond["data"]["pagination"]["totalCount"], 12);

    let search: Value = app
        .server
        .get("/api/cards")
        .add_query_param("search", "card 07")
        .add_header(header::COOKIE, cookie)
        .await
        .json();
    assert_eq!(search["data"]["pagination"]["totalCount"], 1);
    assert_eq!(search["data"]["cards"][0]["title"], "Card 07");
}

// Quiz and streak

#[tokio::test]
async fn test_quiz_start_requires_cards() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "quiz@example.com").await;

    app.server
        .post("/api/quiz/start")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let titles: Vec<String> = (0..12).map(|i| format!("q{}", i)).collect();
    let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    create_cards(&app.server, &cookie, &refs).await;

    let quiz: Value = app
        .server
        .post("/api/quiz/start")
        .add_header(header::COOKIE, cookie)
        .await
        .json();
    let data = &quiz["data"];
    assert!(data["id"].as_str().unwrap().starts_with("quiz_"));
    assert_eq!(data["totalQuestions"], 10);
    let questions = data["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 10);
    assert_eq!(questions[0]["questionNumber"], 1);
    assert_eq!(questions[9]["questionNumber"], 10);
    assert_eq!(questions[0]["userAnswer"], "");
    assert!(questions[0]["standardAnswer"].as_str().unwrap().ends_with("explained"));
}

#[tokio::test]
async fn test_quiz_analyze_rejects_missing_questions() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "analyze@example.com").await;

    app.server
        .post("/api/quiz/analyze")
        .add_header(header::COOKIE, cookie)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_bodies_use_error_envelope() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "envelope@example.com").await;

    let cards = app
        .server
        .post("/api/cards")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cards": "nope" }))
        .await;
    cards.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = cards.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["data"], Value::Null);
    assert!(body["error"].as_str().unwrap().contains("cards"));

    let questions = app
        .server
        .post("/api/quiz/analyze")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "questions": "nope" }))
        .await;
    questions.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = questions.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["data"], Value::Null);
    assert!(body["error"].as_str().unwrap().contains("questions"));

    let not_json = app
        .server
        .post("/api/auth/login")
        .content_type("application/json")
        .bytes(Bytes::from_static(b"{\"email\": "))
        .await;
    not_json.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = not_json.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_truncated_upload_field_is_rejected() {
    let app = spawn_app().await;

    // The customTags part never reaches its closing boundary
    let body = "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"customTags\"\r\n\r\n[\"rust\", \"ex";
    let response = app
        .server
        .post("/api/generate-cards-from-file")
        .content_type("multipart/form-data; boundary=XBOUNDARY")
        .bytes(Bytes::from_static(body.as_bytes()))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("customTags"));
}

#[tokio::test]
async fn test_streak_endpoints() {
    let app = spawn_app().await;
    let (cookie, _) = register(&app.server, "streak@example.com").await;

    let first: Value = app
        .server
        .post("/api/user/streak")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    assert_eq!(first["data"], json!({ "consecutiveDays": 1, "isNewDay": true }));

    let again: Value = app
        .server
        .post("/api/user/streak")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    assert_eq!(again["data"], json!({ "consecutiveDays": 1, "isNewDay": false }));

    let status: Value = app
        .server
        .get("/api/user/streak")
        .add_header(header::COOKIE, cookie.clone())
        .await
        .json();
    assert_eq!(status["data"]["consecutiveDays"], 1);
    assert!(status["data"]["lastActiveDate"].is_string());

    create_cards(&app.server, &cookie, &["today"]).await;
    let stats: Value = app
        .server
        .get("/api/stats/streak")
        .add_header(header::COOKIE, cookie)
        .await
        .json();
    assert_eq!(stats["data"]["streak"], 1);
    assert_eq!(stats["data"]["todayActivities"], 1);
    assert_eq!(stats["data"]["totalActivities"], 1);
}
