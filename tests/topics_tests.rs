mod common;

use axum::http::StatusCode;
use pulsar_relay::auth::models::Permission;
use pulsar_relay::store::MessageLog;
use serde_json::json;

// ============================================================================
// create / get / list
// ============================================================================

#[tokio::test]
async fn create_topic_makes_caller_owner() {
    let state = common::test_state();
    let (alice, token) =
        common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let app = common::create_test_app(state);

    let (status, body) = common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &token,
        json!({ "topic_name": "orders", "is_public": false, "description": "order events" }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["topic_name"], "orders");
    assert_eq!(body["owner_id"], alice.user_id.to_string());
    assert_eq!(body["is_public"], false);
    // The owner sees the (empty) ACL.
    assert!(body["allowed_user_ids"].is_array());

    // Ownership is reflected on the user record.
    let (_, me) = common::get_authed(app, "/auth/me", &token).await;
    assert!(me["owned_topics"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "orders"));
}

#[tokio::test]
async fn create_topic_rejects_duplicate_name() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let app = common::create_test_app(state);

    let (status, _) = common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &token,
        json!({ "topic_name": "orders" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = common::post_json_authed(
        app,
        "/api/v1/topics",
        &token,
        json!({ "topic_name": "orders" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn create_topic_requires_write_permission() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "reader", &[Permission::Read]).await;
    let app = common::create_test_app(state);

    let (status, _) = common::post_json_authed(
        app,
        "/api/v1/topics",
        &token,
        json!({ "topic_name": "orders" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_topic_validates_name() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let app = common::create_test_app(state);

    for bad in ["bad name", "bad.name", ""] {
        let (status, _) = common::post_json_authed(
            app.clone(),
            "/api/v1/topics",
            &token,
            json!({ "topic_name": bad }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "name: {bad:?}");
    }
}

#[tokio::test]
async fn get_topic_enforces_read_access() {
    let state = common::test_state();
    let (_, owner_token) =
        common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let (_, stranger_token) = common::seed_user(&state, "bob", &[Permission::Read]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &owner_token,
        json!({ "topic_name": "private" }),
    )
    .await;

    let (status, body) =
        common::get_authed(app.clone(), "/api/v1/topics/private", &owner_token).await;
    assert_eq!(status, StatusCode::OK);
    // Owner sees the ACL...
    assert!(body["allowed_user_ids"].is_array());

    let (status, _) = common::get_authed(app.clone(), "/api/v1/topics/private", &stranger_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = common::get_authed(app, "/api/v1/topics/ghost", &owner_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn public_topic_is_readable_by_anyone_but_acl_stays_hidden() {
    let state = common::test_state();
    let (_, owner_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let (_, stranger_token) = common::seed_user(&state, "bob", &[Permission::Read]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &owner_token,
        json!({ "topic_name": "announcements", "is_public": true }),
    )
    .await;

    let (status, body) =
        common::get_authed(app, "/api/v1/topics/announcements", &stranger_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_public"], true);
    assert!(body.get("allowed_user_ids").is_none());
}

#[tokio::test]
async fn list_topics_returns_owned_and_granted() {
    let state = common::test_state();
    let (_, alice_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let (bob, bob_token) =
        common::seed_user(&state, "bob", &[Permission::Read, Permission::Write]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &alice_token,
        json!({ "topic_name": "shared" }),
    )
    .await;
    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &bob_token,
        json!({ "topic_name": "bobs-own" }),
    )
    .await;
    common::post_json_authed(
        app.clone(),
        "/api/v1/topics/shared/permissions",
        &alice_token,
        json!({ "user_id": bob.user_id }),
    )
    .await;

    let (status, body) = common::get_authed(app, "/api/v1/topics", &bob_token).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["topic_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bobs-own", "shared"]);
}

// ============================================================================
// update / delete
// ============================================================================

#[tokio::test]
async fn owner_updates_topic_metadata() {
    let state = common::test_state();
    let (_, owner_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let (_, stranger_token) = common::seed_user(&state, "bob", &[Permission::Write]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &owner_token,
        json!({ "topic_name": "orders" }),
    )
    .await;

    let (status, _) = common::put_json_authed(
        app.clone(),
        "/api/v1/topics/orders",
        &stranger_token,
        json!({ "is_public": true }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = common::put_json_authed(
        app,
        "/api/v1/topics/orders",
        &owner_token,
        json!({ "is_public": true, "description": "now public" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_public"], true);
    assert_eq!(body["description"], "now public");
}

#[tokio::test]
async fn delete_topic_cascades_to_messages_and_ownership() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let app = common::create_test_app(state.clone());

    common::publish(app.clone(), &token, "doomed", json!({ "n": 1 })).await;
    common::publish(app.clone(), &token, "doomed", json!({ "n": 2 })).await;

    let (status, _) = common::delete_authed(app.clone(), "/api/v1/topics/doomed", &token).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Reads now fail with NotFound.
    let (status, _) = common::get_authed(app.clone(), "/api/v1/topics/doomed", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) =
        common::get_authed(app.clone(), "/api/v1/topics/doomed/messages", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The log was discarded and ownership removed.
    assert_eq!(state.log.len("doomed").await.unwrap(), 0);
    let (_, me) = common::get_authed(app, "/auth/me", &token).await;
    assert!(me["owned_topics"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delete_requires_owner_or_admin() {
    let state = common::test_state();
    let (_, owner_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let (_, stranger_token) = common::seed_user(&state, "bob", &[Permission::Write]).await;
    let (_, admin_token) = common::seed_user(&state, "root", &[Permission::Admin]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &owner_token,
        json!({ "topic_name": "orders" }),
    )
    .await;

    let (status, _) =
        common::delete_authed(app.clone(), "/api/v1/topics/orders", &stranger_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = common::delete_authed(app, "/api/v1/topics/orders", &admin_token).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// ============================================================================
// permissions
// ============================================================================

#[tokio::test]
async fn grant_and_revoke_topic_access() {
    let state = common::test_state();
    let (_, owner_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let (bob, bob_token) = common::seed_user(&state, "bob", &[Permission::Read]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &owner_token,
        json!({ "topic_name": "private" }),
    )
    .await;

    // Before the grant, bob is locked out.
    let (status, _) = common::get_authed(app.clone(), "/api/v1/topics/private", &bob_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Grant by username.
    let (status, body) = common::post_json_authed(
        app.clone(),
        "/api/v1/topics/private/permissions",
        &owner_token,
        json!({ "username": "bob" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["username"], "bob");
    assert_eq!(body["topic_name"], "private");

    let (status, _) = common::get_authed(app.clone(), "/api/v1/topics/private", &bob_token).await;
    assert_eq!(status, StatusCode::OK);

    // Duplicate grant is a 400.
    let (status, _) = common::post_json_authed(
        app.clone(),
        "/api/v1/topics/private/permissions",
        &owner_token,
        json!({ "user_id": bob.user_id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The grant shows in the permission list.
    let (status, perms) = common::get_authed(
        app.clone(),
        "/api/v1/topics/private/permissions",
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(perms.as_array().unwrap().len(), 1);

    // Revoke and verify access is gone.
    let (status, _) = common::delete_authed(
        app.clone(),
        &format!("/api/v1/topics/private/permissions/{}", bob.user_id),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = common::get_authed(app.clone(), "/api/v1/topics/private", &bob_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Revoking again is a 404.
    let (status, _) = common::delete_authed(
        app,
        &format!("/api/v1/topics/private/permissions/{}", bob.user_id),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn grant_requires_target_and_owner() {
    let state = common::test_state();
    let (_, owner_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let (_, stranger_token) = common::seed_user(&state, "bob", &[Permission::Write]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &owner_token,
        json!({ "topic_name": "private" }),
    )
    .await;

    // Neither user_id nor username provided.
    let (status, _) = common::post_json_authed(
        app.clone(),
        "/api/v1/topics/private/permissions",
        &owner_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown target user.
    let (status, _) = common::post_json_authed(
        app.clone(),
        "/api/v1/topics/private/permissions",
        &owner_token,
        json!({ "username": "ghost" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Non-owner cannot grant.
    let (status, _) = common::post_json_authed(
        app,
        "/api/v1/topics/private/permissions",
        &stranger_token,
        json!({ "username": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// message history pagination
// ============================================================================

#[tokio::test]
async fn descending_cursor_pagination_walks_backward() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let app = common::create_test_app(state);

    for n in 0..10 {
        common::publish(app.clone(), &token, "t2", json!({ "id": n })).await;
    }

    // Newest three: 9, 8, 7.
    let (status, body) = common::get_authed(
        app.clone(),
        "/api/v1/topics/t2/messages?limit=3&order=desc",
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["payload"]["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![9, 8, 7]);
    assert_eq!(body["total"], 3);
    assert_eq!(body["order"], "desc");

    // next_cursor points at the last returned message (id 7).
    let next_cursor = body["next_cursor"].as_str().unwrap().to_string();
    let (status, body) = common::get_authed(
        app,
        &format!("/api/v1/topics/t2/messages?limit=3&order=desc&cursor={next_cursor}"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["payload"]["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![6, 5, 4]);
    assert_eq!(body["cursor"], next_cursor);
}

#[tokio::test]
async fn ascending_cursor_pagination_walks_forward() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let app = common::create_test_app(state);

    for n in 0..6 {
        common::publish(app.clone(), &token, "t2", json!({ "id": n })).await;
    }

    let (status, body) = common::get_authed(
        app.clone(),
        "/api/v1/topics/t2/messages?limit=2&order=asc",
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["payload"]["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1]);

    let cursor = body["next_cursor"].as_str().unwrap().to_string();
    let (_, body) = common::get_authed(
        app,
        &format!("/api/v1/topics/t2/messages?limit=2&order=asc&cursor={cursor}"),
        &token,
    )
    .await;
    let ids: Vec<i64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["payload"]["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3]);
}

#[tokio::test]
async fn message_history_validates_query_params() {
    let state = common::test_state();
    let (_, token) = common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let app = common::create_test_app(state);

    common::publish(app.clone(), &token, "t2", json!({ "id": 0 })).await;

    let (status, _) = common::get_authed(
        app.clone(),
        "/api/v1/topics/t2/messages?order=sideways",
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        common::get_authed(app.clone(), "/api/v1/topics/t2/messages?limit=0", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Limit caps at 100 rather than erroring.
    let (status, body) =
        common::get_authed(app, "/api/v1/topics/t2/messages?limit=500", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 100);
}

#[tokio::test]
async fn message_history_requires_read_access() {
    let state = common::test_state();
    let (_, owner_token) =
        common::seed_user(&state, "alice", &[Permission::Read, Permission::Write]).await;
    let (_, stranger_token) = common::seed_user(&state, "bob", &[Permission::Read]).await;
    let app = common::create_test_app(state);

    common::publish(app.clone(), &owner_token, "private", json!({ "n": 1 })).await;

    let (status, _) = common::get_authed(
        app,
        "/api/v1/topics/private/messages",
        &stranger_token,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// stats
// ============================================================================

#[tokio::test]
async fn topic_stats_is_admin_only() {
    let state = common::test_state();
    let (_, admin_token) = common::seed_user(&state, "root", &[Permission::Admin]).await;
    let (_, writer_token) = common::seed_user(&state, "alice", &[Permission::Write]).await;
    let app = common::create_test_app(state);

    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &writer_token,
        json!({ "topic_name": "public1", "is_public": true }),
    )
    .await;
    common::post_json_authed(
        app.clone(),
        "/api/v1/topics",
        &writer_token,
        json!({ "topic_name": "private1" }),
    )
    .await;

    let (status, _) = common::get_authed(app.clone(), "/api/v1/topics/stats", &writer_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = common::get_authed(app, "/api/v1/topics/stats", &admin_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_topics"], 2);
    assert_eq!(body["public_topics"], 1);
    assert_eq!(body["private_topics"], 1);
}
