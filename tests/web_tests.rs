use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use hyper::{Method, StatusCode};
use keywords_reply::images::ImageStore;
use keywords_reply::store::{self, EntryKind, EntryStore};
use keywords_reply::web::auth::{CsrfStore, LoginRateLimiter, PasswordFile, SessionStore};
use keywords_reply::web::router::{route_request, AdminState};
use std::time::Duration;
use tempfile::TempDir;

const PASSWORD: &str = "correct-horse-battery";

fn admin_state(dir: &TempDir) -> AdminState {
    let password = PasswordFile::new(dir.path().join("admin_password.hash"));
    password.set_password(PASSWORD).unwrap();
    AdminState {
        store: store::shared(EntryStore::empty(dir.path().join("keywords.json"))),
        images: ImageStore::new(dir.path().join("images")).unwrap(),
        sessions: SessionStore::new(Duration::from_secs(3600)),
        csrf: CsrfStore::new(),
        limiter: LoginRateLimiter::new(),
        password,
    }
}

fn headers(cookie: Option<&str>, content_type: Option<&str>) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(cookie) = cookie {
        map.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
    }
    if let Some(ct) = content_type {
        map.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
    }
    map
}

fn form(fields: &[(&str, &str)]) -> Vec<u8> {
    serde_urlencoded::to_string(fields).unwrap().into_bytes()
}

fn login(state: &AdminState, client_ip: &str) -> String {
    let token = state.csrf.issue();
    let body = form(&[("csrf_token", &token), ("password", PASSWORD)]);
    let response = route_request(
        state,
        &Method::POST,
        "/login",
        &headers(None, Some("application/x-www-form-urlencoded")),
        &body,
        client_ip,
    );
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers().get(SET_COOKIE).expect("session cookie");
    cookie
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

#[test]
fn test_unauthenticated_requests_redirect_to_login() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);

    for path in ["/", "/keywords", "/detects", "/images", "/api/images/x.png"] {
        let response = route_request(&state, &Method::GET, path, &headers(None, None), &[], "1.2.3.4");
        assert_eq!(response.status(), StatusCode::FOUND, "path {}", path);
        assert_eq!(
            response.headers().get(LOCATION).unwrap().to_str().unwrap(),
            "/login"
        );
    }

    // The login page itself is reachable
    let response = route_request(&state, &Method::GET, "/login", &headers(None, None), &[], "1.2.3.4");
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_login_logout_flow() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);

    let cookie = login(&state, "10.1.1.1");

    let response = route_request(
        &state,
        &Method::GET,
        "/keywords",
        &headers(Some(&cookie), None),
        &[],
        "10.1.1.1",
    );
    assert_eq!(response.status(), StatusCode::OK);

    let response = route_request(
        &state,
        &Method::GET,
        "/logout",
        &headers(Some(&cookie), None),
        &[],
        "10.1.1.1",
    );
    assert_eq!(response.status(), StatusCode::FOUND);

    // The session is gone
    let response = route_request(
        &state,
        &Method::GET,
        "/keywords",
        &headers(Some(&cookie), None),
        &[],
        "10.1.1.1",
    );
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[test]
fn test_wrong_password_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);

    let token = state.csrf.issue();
    let body = form(&[("csrf_token", &token), ("password", "nope")]);
    let response = route_request(
        &state,
        &Method::POST,
        "/login",
        &headers(None, Some("application/x-www-form-urlencoded")),
        &body,
        "10.1.1.2",
    );
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[test]
fn test_login_with_invalid_csrf_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);

    let body = form(&[("csrf_token", "bogus"), ("password", PASSWORD)]);
    let response = route_request(
        &state,
        &Method::POST,
        "/login",
        &headers(None, Some("application/x-www-form-urlencoded")),
        &body,
        "10.1.1.3",
    );
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// The sixth attempt inside the window gets a 429 even with the correct
/// password; the rate limit is per client address
#[test]
fn test_login_rate_limit() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);

    for _ in 0..5 {
        let token = state.csrf.issue();
        let body = form(&[("csrf_token", &token), ("password", "wrong")]);
        let response = route_request(
            &state,
            &Method::POST,
            "/login",
            &headers(None, Some("application/x-www-form-urlencoded")),
            &body,
            "10.9.9.9",
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let token = state.csrf.issue();
    let body = form(&[("csrf_token", &token), ("password", PASSWORD)]);
    let response = route_request(
        &state,
        &Method::POST,
        "/login",
        &headers(None, Some("application/x-www-form-urlencoded")),
        &body,
        "10.9.9.9",
    );
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different client is unaffected
    let cookie = login(&state, "10.9.9.10");
    assert!(cookie.starts_with("session_id="));
}

#[test]
fn test_entry_add_edit_delete_via_api() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.2.2.2");
    let form_headers = headers(Some(&cookie), Some("application/x-www-form-urlencoded"));

    // add
    let token = state.csrf.issue();
    let body = form(&[
        ("csrf_token", &token),
        ("action", "add"),
        ("keyword", "menu"),
        ("reply_text", "soup of the day"),
        ("mode", "whitelist"),
        ("groups", "100,200"),
    ]);
    let response = route_request(&state, &Method::POST, "/api/keywords", &form_headers, &body, "10.2.2.2");
    assert_eq!(response.status(), StatusCode::FOUND);
    {
        let store = state.store.read();
        let entries = store.entries(EntryKind::CommandTriggered);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].keyword, "menu");
        assert_eq!(entries[0].groups, vec!["100".to_string(), "200".to_string()]);
    }
    // Write-through persistence
    assert!(dir.path().join("keywords.json").is_file());

    // add again with the same keyword appends a reply variant
    let token = state.csrf.issue();
    let body = form(&[
        ("csrf_token", &token),
        ("action", "add"),
        ("keyword", "menu"),
        ("reply_text", "fish on fridays"),
    ]);
    route_request(&state, &Method::POST, "/api/keywords", &form_headers, &body, "10.2.2.2");
    assert_eq!(
        state.store.read().entries(EntryKind::CommandTriggered)[0]
            .replies
            .len(),
        2
    );

    // edit rewrites keyword and the first variant
    let token = state.csrf.issue();
    let body = form(&[
        ("csrf_token", &token),
        ("action", "edit"),
        ("idx", "0"),
        ("keyword", "lunch"),
        ("reply_text", "stew"),
        ("mode", "blacklist"),
        ("groups", "300"),
    ]);
    route_request(&state, &Method::POST, "/api/keywords", &form_headers, &body, "10.2.2.2");
    {
        let store = state.store.read();
        let entry = &store.entries(EntryKind::CommandTriggered)[0];
        assert_eq!(entry.keyword, "lunch");
        assert_eq!(entry.replies[0].text, "stew");
        assert_eq!(entry.groups, vec!["300".to_string()]);
    }

    // delete
    let token = state.csrf.issue();
    let body = form(&[("csrf_token", &token), ("action", "delete"), ("idx", "0")]);
    route_request(&state, &Method::POST, "/api/keywords", &form_headers, &body, "10.2.2.2");
    assert!(state
        .store
        .read()
        .entries(EntryKind::CommandTriggered)
        .is_empty());
}

/// An invalid CSRF token silently drops the mutation and redirects back
#[test]
fn test_mutation_with_invalid_csrf_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.3.3.3");

    let body = form(&[
        ("csrf_token", "forged"),
        ("action", "add"),
        ("keyword", "menu"),
        ("reply_text", "soup"),
    ]);
    let response = route_request(
        &state,
        &Method::POST,
        "/api/keywords",
        &headers(Some(&cookie), Some("application/x-www-form-urlencoded")),
        &body,
        "10.3.3.3",
    );
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(LOCATION).unwrap().to_str().unwrap(),
        "/keywords"
    );
    assert!(state
        .store
        .read()
        .entries(EntryKind::CommandTriggered)
        .is_empty());
}

/// Denylisted regex patterns are rejected with the store unchanged
#[test]
fn test_unsafe_regex_rejected_via_api() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.4.4.4");
    let form_headers = headers(Some(&cookie), Some("application/x-www-form-urlencoded"));

    let overlong = "p".repeat(101);
    for pattern in ["(a+)+", "x**", "(?:group)", overlong.as_str()] {
        let token = state.csrf.issue();
        let body = form(&[
            ("csrf_token", &token),
            ("action", "add"),
            ("keyword", pattern),
            ("is_regex", "on"),
            ("reply_text", "boom"),
        ]);
        let response =
            route_request(&state, &Method::POST, "/api/detects", &form_headers, &body, "10.4.4.4");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(
            state.store.read().entries(EntryKind::AutoDetect).is_empty(),
            "pattern {:?} must not be stored",
            pattern
        );
    }
}

/// Empty replies never reach the store
#[test]
fn test_empty_reply_rejected_via_api() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.5.5.5");

    let token = state.csrf.issue();
    let body = form(&[
        ("csrf_token", &token),
        ("action", "add"),
        ("keyword", "menu"),
        ("reply_text", ""),
        ("reply_images", ""),
    ]);
    route_request(
        &state,
        &Method::POST,
        "/api/keywords",
        &headers(Some(&cookie), Some("application/x-www-form-urlencoded")),
        &body,
        "10.5.5.5",
    );
    assert!(state
        .store
        .read()
        .entries(EntryKind::CommandTriggered)
        .is_empty());
}

fn multipart_body(boundary: &str, csrf: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"csrf_token\"\r\n\r\n",
    );
    body.extend_from_slice(csrf.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

#[test]
fn test_image_upload_serve_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.6.6.6");

    let boundary = "----formboundary7";
    let token = state.csrf.issue();
    let body = multipart_body(boundary, &token, "photo.png", b"fake-png-bytes");
    let response = route_request(
        &state,
        &Method::POST,
        "/api/images",
        &headers(
            Some(&cookie),
            Some(&format!("multipart/form-data; boundary={}", boundary)),
        ),
        &body,
        "10.6.6.6",
    );
    assert_eq!(response.status(), StatusCode::FOUND);

    let listed = state.images.list().unwrap();
    assert_eq!(listed.len(), 1);
    let stored = listed[0].filename.clone();
    assert!(stored.ends_with(".png"));

    // Serving works for the stored name
    let response = route_request(
        &state,
        &Method::GET,
        &format!("/api/images/{}", stored),
        &headers(Some(&cookie), None),
        &[],
        "10.6.6.6",
    );
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap(),
        "image/png"
    );

    // Delete through the urlencoded path
    let token = state.csrf.issue();
    let body = form(&[
        ("csrf_token", &token),
        ("action", "delete"),
        ("filename", &stored),
    ]);
    route_request(
        &state,
        &Method::POST,
        "/api/images",
        &headers(Some(&cookie), Some("application/x-www-form-urlencoded")),
        &body,
        "10.6.6.6",
    );
    assert!(state.images.list().unwrap().is_empty());
}

/// Upload without a valid CSRF part stores nothing
#[test]
fn test_image_upload_requires_csrf() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.7.7.7");

    let boundary = "----formboundary8";
    let body = multipart_body(boundary, "forged-token", "photo.png", b"fake-png-bytes");
    route_request(
        &state,
        &Method::POST,
        "/api/images",
        &headers(
            Some(&cookie),
            Some(&format!("multipart/form-data; boundary={}", boundary)),
        ),
        &body,
        "10.7.7.7",
    );
    assert!(state.images.list().unwrap().is_empty());
}

/// Path traversal on the serving endpoint is rejected independently of any
/// upload-side checks
#[test]
fn test_image_serving_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.8.8.8");

    for path in [
        "/api/images/../../evil.png",
        "/api/images/..%2Fevil.png",
        "/api/images/..",
    ] {
        let response = route_request(
            &state,
            &Method::GET,
            path,
            &headers(Some(&cookie), None),
            &[],
            "10.8.8.8",
        );
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "path {}", path);
    }

    // A safe but missing name is a plain 404
    let response = route_request(
        &state,
        &Method::GET,
        "/api/images/missing.png",
        &headers(Some(&cookie), None),
        &[],
        "10.8.8.8",
    );
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_unknown_path_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = admin_state(&dir);
    let cookie = login(&state, "10.10.10.10");

    let response = route_request(
        &state,
        &Method::GET,
        "/no-such-page",
        &headers(Some(&cookie), None),
        &[],
        "10.10.10.10",
    );
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
