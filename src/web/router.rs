//! # Admin Request Router
//!
//! Dispatches one parsed HTTP request against the admin console state:
//! authentication, CRUD over the entry store, and image management.
//! The router is a plain function over [`AdminState`] so integration
//! tests can drive it without opening sockets.
//!
//! Security posture mirrors the console's design: login is rate limited
//! per client address before anything else is inspected; mutating
//! endpoints require a valid CSRF token and redirect silently back to the
//! list view whether or not the mutation was applied; image serving
//! rejects any filename with a path separator or parent-directory token.

use crate::images::ImageStore;
use crate::observability::record_admin_request;
use crate::store::{AccessMode, Entry, EntryKind, ImageRef, ReplyVariant, SharedStore};
use crate::validation::{check_pattern_safety, validate_reply};
use crate::web::auth::{CsrfStore, LoginRateLimiter, PasswordFile, SessionStore};
use crate::web::multipart::{boundary_from_content_type, MultipartParser};
use crate::web::pages;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Response, StatusCode};
use std::collections::HashMap;
use tracing::{info, warn};

/// Shared state behind the admin console
pub struct AdminState {
    pub store: SharedStore,
    pub images: ImageStore,
    pub sessions: SessionStore,
    pub csrf: CsrfStore,
    pub limiter: LoginRateLimiter,
    pub password: PasswordFile,
}

/// Response type produced by the router
pub type AdminResponse = Response<Full<Bytes>>;

const SESSION_COOKIE: &str = "session_id";

fn base_response(status: StatusCode, content_type: &str, body: Bytes) -> AdminResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static("text/plain")),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

fn html_response(status: StatusCode, body: String) -> AdminResponse {
    base_response(status, "text/html; charset=utf-8", Bytes::from(body))
}

fn text_response(status: StatusCode, body: &'static str) -> AdminResponse {
    base_response(status, "text/plain; charset=utf-8", Bytes::from_static(body.as_bytes()))
}

fn redirect(location: &str) -> AdminResponse {
    let mut response = base_response(StatusCode::FOUND, "text/plain", Bytes::new());
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// Decode an application/x-www-form-urlencoded body
fn parse_form(body: &[u8]) -> HashMap<String, String> {
    serde_urlencoded::from_bytes(body).unwrap_or_default()
}

/// Split a request path into its clean path and decoded query parameters
fn split_query(path: &str) -> (&str, HashMap<String, String>) {
    match path.split_once('?') {
        Some((clean, query)) => (clean, serde_urlencoded::from_str(query).unwrap_or_default()),
        None => (path, HashMap::new()),
    }
}

/// Extract the session id from the Cookie header
fn session_from_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    for item in cookie.split(';') {
        let item = item.trim();
        if let Some(value) = item.strip_prefix(SESSION_COOKIE) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Route one request. `path` includes the raw query string; `body` is the
/// fully collected request body.
pub fn route_request(
    state: &AdminState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    client_ip: &str,
) -> AdminResponse {
    // Expired tokens are swept once per request
    state.csrf.sweep_expired();

    let (clean_path, query) = split_query(path);

    let session_id = session_from_cookie(headers);
    let logged_in = session_id
        .as_deref()
        .map(|id| state.sessions.verify(id))
        .unwrap_or(false);

    // Public routes
    if clean_path == "/login" {
        let response = if *method == Method::GET {
            html_response(StatusCode::OK, pages::render_login(None, &state.csrf.issue()))
        } else if *method == Method::POST {
            handle_login(state, body, client_ip)
        } else {
            redirect("/login")
        };
        record_admin_request("login", response.status().as_u16());
        return response;
    }

    if !logged_in {
        record_admin_request("unauthenticated", StatusCode::FOUND.as_u16());
        return redirect("/login");
    }

    let response = match clean_path {
        "/logout" => {
            if let Some(id) = session_id.as_deref() {
                state.sessions.delete(id);
            }
            redirect("/login")
        }
        "/" => {
            let (keywords, detects) = {
                let store = state.store.read();
                (
                    store.entries(EntryKind::CommandTriggered).len(),
                    store.entries(EntryKind::AutoDetect).len(),
                )
            };
            let images = state.images.list().map(|l| l.len()).unwrap_or(0);
            html_response(StatusCode::OK, pages::render_dashboard(keywords, detects, images))
        }
        "/keywords" => render_entry_page(state, EntryKind::CommandTriggered, &query),
        "/detects" => render_entry_page(state, EntryKind::AutoDetect, &query),
        "/images" => {
            let images = state.images.list().unwrap_or_default();
            html_response(StatusCode::OK, pages::render_images(&images, &state.csrf.issue()))
        }
        "/api/keywords" => handle_entries_api(state, EntryKind::CommandTriggered, method, body),
        "/api/detects" => handle_entries_api(state, EntryKind::AutoDetect, method, body),
        "/api/images" => handle_images_api(state, method, headers, body),
        _ => {
            if let Some(filename) = clean_path.strip_prefix("/api/images/") {
                serve_image(state, filename)
            } else {
                text_response(StatusCode::NOT_FOUND, "Not Found")
            }
        }
    };

    record_admin_request(path_group(clean_path), response.status().as_u16());
    response
}

fn path_group(clean_path: &str) -> &'static str {
    if clean_path.starts_with("/api/images") {
        "api_images"
    } else if clean_path.starts_with("/api/") {
        "api_entries"
    } else {
        "pages"
    }
}

fn render_entry_page(
    state: &AdminState,
    kind: EntryKind,
    query: &HashMap<String, String>,
) -> AdminResponse {
    let (title, api_path, page_path, with_regex) = match kind {
        EntryKind::CommandTriggered => ("Keywords", "/api/keywords", "/keywords", false),
        EntryKind::AutoDetect => ("Detect words", "/api/detects", "/detects", true),
    };
    let store = state.store.read();
    let html = pages::render_entries(
        title,
        api_path,
        page_path,
        with_regex,
        store.entries(kind),
        query.get("action").map(String::as_str),
        query.get("idx").and_then(|i| i.parse().ok()),
        query.get("search").map(String::as_str),
        &state.csrf.issue(),
    );
    html_response(StatusCode::OK, html)
}

fn handle_login(state: &AdminState, body: &[u8], client_ip: &str) -> AdminResponse {
    // Rate limit before anything else, including CSRF
    if !state.limiter.check(client_ip) {
        let html = pages::render_login(
            Some("Too many login attempts, try again in five minutes"),
            &state.csrf.issue(),
        );
        return html_response(StatusCode::TOO_MANY_REQUESTS, html);
    }

    let form = parse_form(body);
    let csrf_token = form.get("csrf_token").map(String::as_str).unwrap_or("");
    if !state.csrf.verify(csrf_token) {
        let html = pages::render_login(
            Some("Security check failed, reload the page and retry"),
            &state.csrf.issue(),
        );
        return html_response(StatusCode::FORBIDDEN, html);
    }

    let password = form.get("password").map(String::as_str).unwrap_or("");
    if state.password.verify(password) {
        let session_id = state.sessions.create();
        info!(client_ip = %client_ip, "Admin login succeeded");

        let (keywords, detects) = {
            let store = state.store.read();
            (
                store.entries(EntryKind::CommandTriggered).len(),
                store.entries(EntryKind::AutoDetect).len(),
            )
        };
        let images = state.images.list().map(|l| l.len()).unwrap_or(0);
        let mut response = html_response(
            StatusCode::OK,
            pages::render_dashboard(keywords, detects, images),
        );
        let cookie = format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}",
            SESSION_COOKIE,
            session_id,
            state.sessions.timeout().as_secs()
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        response
    } else {
        warn!(client_ip = %client_ip, "Admin login failed");
        let html = pages::render_login(Some("Wrong password"), &state.csrf.issue());
        html_response(StatusCode::UNAUTHORIZED, html)
    }
}

/// Build a reply variant from the form's `reply_text`/`reply_images`
/// fields. Stored-image names pass the traversal guard or are dropped.
fn variant_from_form(form: &HashMap<String, String>) -> ReplyVariant {
    let text = form
        .get("reply_text")
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let images = form
        .get("reply_images")
        .map(String::as_str)
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && ImageStore::is_safe_filename(name))
        .map(|name| ImageRef::Local {
            path: name.to_string(),
        })
        .collect();
    ReplyVariant { text, images }
}

fn groups_from_form(form: &HashMap<String, String>) -> Vec<String> {
    form.get("groups")
        .map(String::as_str)
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(|g| g.to_string())
        .collect()
}

fn mode_from_form(form: &HashMap<String, String>) -> AccessMode {
    match form.get("mode").map(String::as_str) {
        Some("blacklist") => AccessMode::Blacklist,
        _ => AccessMode::Whitelist,
    }
}

/// Entry CRUD shared by `/api/keywords` and `/api/detects`.
///
/// Every outcome redirects back to the list view; validation failures are
/// logged but not surfaced to the operator.
fn handle_entries_api(
    state: &AdminState,
    kind: EntryKind,
    method: &Method,
    body: &[u8],
) -> AdminResponse {
    let back = match kind {
        EntryKind::CommandTriggered => "/keywords",
        EntryKind::AutoDetect => "/detects",
    };
    if *method != Method::POST {
        return redirect(back);
    }

    let form = parse_form(body);
    if !state
        .csrf
        .verify(form.get("csrf_token").map(String::as_str).unwrap_or(""))
    {
        warn!(kind = kind.label(), "Entry mutation rejected: invalid CSRF token");
        return redirect(back);
    }

    let action = form.get("action").map(String::as_str).unwrap_or("");
    match action {
        "add" => {
            let keyword = form.get("keyword").map(|k| k.trim()).unwrap_or("");
            if keyword.is_empty() {
                return redirect(back);
            }
            let is_regex = form.get("is_regex").map(String::as_str) == Some("on");
            if is_regex {
                if let Err(e) = check_pattern_safety(keyword) {
                    warn!(keyword = %keyword, error = %e, "Rejected unsafe pattern from console");
                    return redirect(back);
                }
            }
            let variant = variant_from_form(&form);
            if let Err(e) = validate_reply(&variant) {
                warn!(keyword = %keyword, error = %e, "Rejected empty reply from console");
                return redirect(back);
            }

            let mut store = state.store.write();
            match store.find_by_keyword(kind, keyword) {
                Some(idx) => {
                    store.entries_mut(kind)[idx].replies.push(variant);
                }
                None => {
                    let mut entry = Entry::new(keyword, is_regex, variant);
                    entry.mode = mode_from_form(&form);
                    entry.groups = groups_from_form(&form);
                    store.add_entry(kind, entry);
                }
            }
            store.save();
            info!(kind = kind.label(), keyword = %keyword, "Entry added from console");
        }
        "edit" => {
            let idx: usize = match form.get("idx").and_then(|i| i.parse().ok()) {
                Some(i) => i,
                None => return redirect(back),
            };
            let keyword = form.get("keyword").map(|k| k.trim()).unwrap_or("");
            if keyword.is_empty() {
                return redirect(back);
            }
            let is_regex = form.get("is_regex").map(String::as_str) == Some("on");
            if is_regex {
                if let Err(e) = check_pattern_safety(keyword) {
                    warn!(keyword = %keyword, error = %e, "Rejected unsafe pattern from console");
                    return redirect(back);
                }
            }
            let variant = variant_from_form(&form);
            if let Err(e) = validate_reply(&variant) {
                warn!(keyword = %keyword, error = %e, "Rejected empty reply from console");
                return redirect(back);
            }

            let mut store = state.store.write();
            let mut edited = false;
            if let Some(entry) = store.entries_mut(kind).get_mut(idx) {
                entry.keyword = keyword.to_string();
                entry.is_regex = is_regex;
                entry.mode = mode_from_form(&form);
                entry.groups = groups_from_form(&form);
                // The console edits the first reply variant
                if entry.replies.is_empty() {
                    entry.replies.push(variant);
                } else {
                    entry.replies[0] = variant;
                }
                edited = true;
            }
            if edited {
                store.save();
                info!(kind = kind.label(), keyword = %keyword, "Entry edited from console");
            }
        }
        "delete" => {
            let idx: usize = match form.get("idx").and_then(|i| i.parse().ok()) {
                Some(i) => i,
                None => return redirect(back),
            };
            let mut store = state.store.write();
            if let Some(removed) = store.remove_entry(kind, idx) {
                store.save();
                info!(kind = kind.label(), keyword = %removed.keyword, "Entry deleted from console");
            }
        }
        _ => {}
    }

    redirect(back)
}

fn handle_images_api(
    state: &AdminState,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> AdminResponse {
    if *method != Method::POST {
        return redirect("/images");
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.contains("multipart/form-data") {
        return handle_image_upload(state, content_type, body);
    }

    let form = parse_form(body);
    if !state
        .csrf
        .verify(form.get("csrf_token").map(String::as_str).unwrap_or(""))
    {
        return redirect("/images");
    }

    if form.get("action").map(String::as_str) == Some("delete") {
        if let Some(filename) = form.get("filename") {
            if let Err(e) = state.images.delete(filename) {
                warn!(filename = %filename, error = %e, "Image delete failed");
            }
        }
    }

    redirect("/images")
}

fn handle_image_upload(state: &AdminState, content_type: &str, body: &[u8]) -> AdminResponse {
    let Some(boundary) = boundary_from_content_type(content_type) else {
        return redirect("/images");
    };

    let mut csrf_valid = false;
    let mut upload: Option<(String, Vec<u8>)> = None;

    let mut parser = MultipartParser::new(body, &boundary);
    while let Some(part) = parser.next_part() {
        match (part.name.as_deref(), part.filename.as_deref()) {
            (Some("csrf_token"), _) => {
                if state.csrf.verify(part.text().trim()) {
                    csrf_valid = true;
                }
            }
            (Some("image"), Some(filename)) => {
                upload = Some((filename.to_string(), part.data));
            }
            _ => {}
        }
    }

    if !csrf_valid {
        warn!("Image upload rejected: invalid CSRF token");
        return redirect("/images");
    }

    if let Some((filename, data)) = upload {
        match state.images.store_bytes(&filename, &data) {
            Ok(stored) => info!(original = %filename, stored = %stored, "Image uploaded"),
            Err(e) => warn!(original = %filename, error = %e, "Image upload failed"),
        }
    }

    redirect("/images")
}

fn serve_image(state: &AdminState, filename: &str) -> AdminResponse {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return text_response(StatusCode::FORBIDDEN, "Forbidden");
    }
    match state.images.read(filename) {
        Ok(bytes) => base_response(
            StatusCode::OK,
            ImageStore::mime_type(filename),
            Bytes::from(bytes),
        ),
        Err(_) => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}
