#![cfg(test)]

use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::{Client, LocalResponse};
use serde_json::{json, Value};
use std::path::Path;

use crate::config::{AppConfig, Environment};
use crate::security::token::TokenService;
use crate::store::{JsonStore, Store};

const PASSWORD: &str = "correct horse battery";
const SECRET: &str = "integration-secret";

/// PNG signature plus a few bytes of junk; enough for the magic check.
const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];

fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        data_dir: dir.join("data"),
        public_dir: dir.join("public"),
        admin_username: Some("admin".into()),
        admin_password: Some(PASSWORD.into()),
        session_secret: Some(SECRET.into()),
        ..AppConfig::default()
    }
}

fn client_with(config: AppConfig) -> Client {
    Client::tracked(crate::build(config)).expect("valid rocket instance")
}

fn json_of(response: LocalResponse<'_>) -> Value {
    response.into_json::<Value>().expect("json body")
}

fn login(client: &Client) {
    let response = client
        .post("/api/auth")
        .header(ContentType::JSON)
        .body(json!({"username": "admin", "password": PASSWORD}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
}

fn create(client: &Client, body: Value) -> Value {
    let response = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Created);
    json_of(response)["data"].clone()
}

fn sample_body(title: &str) -> Value {
    json!({
        "title": title,
        "description": "Regional revenue with drill-through by product line",
        "tool": "Power BI",
        "tags": ["Sales", "DAX"],
    })
}

fn multipart(parts: &[(&str, &str, &[u8])]) -> (ContentType, Vec<u8>) {
    let boundary = "chartfolio-test-boundary";
    let mut body = Vec::new();
    for (filename, mime, bytes) in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                filename, mime
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    let ct = ContentType::new("multipart", "form-data").with_params(("boundary", boundary));
    (ct, body)
}

// ── Auth ────────────────────────────────────────────────

#[test]
fn login_sets_session_cookie() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));

    let bad = client
        .post("/api/auth")
        .header(ContentType::JSON)
        .body(json!({"username": "admin", "password": "nope"}).to_string())
        .dispatch();
    assert_eq!(bad.status(), Status::Unauthorized);
    let body = json_of(bad);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("UNAUTHORIZED"));
    assert!(body["requestId"].is_string());

    let ok = client
        .post("/api/auth")
        .header(ContentType::JSON)
        .body(json!({"username": "admin", "password": PASSWORD}).to_string())
        .dispatch();
    assert_eq!(ok.status(), Status::Ok);
    let cookie = ok.cookies().get("admin_token").expect("session cookie").clone();
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(ok.headers().get_one("Cache-Control"), Some("no-store, no-cache, must-revalidate"));

    let status = json_of(client.get("/api/auth").dispatch());
    assert_eq!(status["data"]["authenticated"], json!(true));
    assert_eq!(status["data"]["csrfToken"].as_str().map(str::len), Some(32));

    let out = client.delete("/api/auth").dispatch();
    assert_eq!(out.status(), Status::Ok);
    let status = json_of(client.get("/api/auth").dispatch());
    assert_eq!(status["data"]["authenticated"], json!(false));
}

#[test]
fn login_body_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    let response = client
        .post("/api/auth")
        .header(ContentType::JSON)
        .body(json!({"username": "admin"}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(json_of(response)["error"]["code"], json!("VALIDATION_ERROR"));
}

#[test]
fn bearer_token_authenticates() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    let token = TokenService::new(Some(SECRET.into()), 3600, "development")
        .issue("admin")
        .unwrap();
    let response = client
        .get("/api/projects/trash")
        .header(Header::new("Authorization", format!("Bearer {}", token)))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);

    let foreign = TokenService::new(Some(SECRET.into()), 3600, "production")
        .issue("admin")
        .unwrap();
    let response = client
        .get("/api/projects/trash")
        .header(Header::new("Authorization", format!("Bearer {}", foreign)))
        .dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
}

#[test]
fn mutations_require_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    let response = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(sample_body("Nope").to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
    let body = json_of(response);
    assert_eq!(body["error"]["code"], json!("UNAUTHORIZED"));
}

// ── Projects ────────────────────────────────────────────

#[test]
fn project_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);

    let project = create(&client, sample_body("Revenue Overview"));
    let id = project["id"].as_str().unwrap().to_string();
    assert_eq!(project["status"], json!("draft"));

    // drafts are hidden from anonymous readers
    let anon = Client::tracked(crate::build(test_config(dir.path()))).unwrap();
    let listed = json_of(anon.get("/api/projects").dispatch());
    assert_eq!(listed["meta"]["total"], json!(0));
    assert_eq!(anon.get(format!("/api/projects/{}", id)).dispatch().status(), Status::NotFound);

    // publish
    let response = client
        .put(format!("/api/projects/{}", id))
        .header(ContentType::JSON)
        .body(json!({"status": "published"}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let updated = json_of(response)["data"].clone();
    assert_eq!(updated["history"].as_array().unwrap().len(), 1);
    assert_eq!(anon.get(format!("/api/projects/{}", id)).dispatch().status(), Status::Ok);

    // history + rollback
    let history = json_of(client.get(format!("/api/projects/{}/history", id)).dispatch());
    let hid = history["data"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(history["data"][0]["changes"]["status"]["from"], json!("draft"));
    let rolled = client
        .post(format!("/api/projects/{}/rollback/{}", id, hid))
        .dispatch();
    assert_eq!(rolled.status(), Status::Ok);
    let rolled = json_of(rolled)["data"].clone();
    assert_eq!(rolled["status"], json!("draft"));
    assert_eq!(rolled["history"].as_array().unwrap().len(), 2);

    // duplicate
    let dup = client.post(format!("/api/projects/{}/duplicate", id)).dispatch();
    assert_eq!(dup.status(), Status::Created);
    let dup = json_of(dup)["data"].clone();
    assert_eq!(dup["title"], json!("Revenue Overview (Copy)"));
    assert_eq!(dup["history"], json!([]));
    assert_ne!(dup["id"], json!(id));

    // soft delete, trash, restore
    assert_eq!(client.delete(format!("/api/projects/{}", id)).dispatch().status(), Status::Ok);
    assert_eq!(client.get(format!("/api/projects/{}", id)).dispatch().status(), Status::NotFound);
    let trash = json_of(client.get("/api/projects/trash").dispatch());
    assert_eq!(trash["data"].as_array().unwrap().len(), 1);
    assert_eq!(
        client.post(format!("/api/projects/{}/restore", id)).dispatch().status(),
        Status::Ok
    );
    assert_eq!(client.get(format!("/api/projects/{}", id)).dispatch().status(), Status::Ok);

    // purge
    let purged = client
        .delete(format!("/api/projects/{}?permanent=true", id))
        .dispatch();
    assert_eq!(purged.status(), Status::Ok);
    let admin_list = json_of(client.get("/api/projects").dispatch());
    assert_eq!(admin_list["meta"]["total"], json!(1));

    // activity recorded newest first
    let activity = json_of(client.get("/api/activity").dispatch());
    let actions: Vec<&str> = activity["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert_eq!(actions[0], "PURGE");
    assert!(actions.contains(&"CREATE"));
    assert!(actions.contains(&"ROLLBACK"));
    assert!(actions.contains(&"LOGIN"));
}

#[test]
fn invalid_bodies_and_ids() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);

    let response = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(json!({"title": "Short", "description": "tiny", "tool": "Looker"}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);
    let body = json_of(response);
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"description"));
    assert!(fields.contains(&"tool"));

    assert_eq!(client.get("/api/projects/not-an-id").dispatch().status(), Status::BadRequest);
    assert_eq!(
        client
            .get("/api/projects/3f2b8c1e-9a4d-4e6f-8b7a-1c2d3e4f5a6b")
            .dispatch()
            .status(),
        Status::NotFound
    );
    assert_eq!(client.get("/api/projects?limit=500").dispatch().status(), Status::BadRequest);
}

#[test]
fn reorder_counts_changes() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);
    let a = create(&client, sample_body("Alpha dashboard"));
    let b = create(&client, sample_body("Bravo dashboard"));

    let response = client
        .put("/api/projects/reorder")
        .header(ContentType::JSON)
        .body(json!([{"id": a["id"], "order": 9}, {"id": b["id"], "order": b["order"]}]).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let body = json_of(response);
    assert_eq!(body["data"]["count"], json!(2));
    assert_eq!(body["data"]["changed"], json!(1));

    let response = client
        .put("/api/projects/reorder")
        .header(ContentType::JSON)
        .body(json!([{"order": 1}]).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);
}

#[test]
fn listing_supports_etags() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);
    create(&client, json!({
        "title": "Published one",
        "description": "Visible to everybody on the site",
        "tool": "Excel",
        "status": "published",
    }));

    let first = client.get("/api/projects").dispatch();
    assert_eq!(first.status(), Status::Ok);
    let tag = first.headers().get_one("ETag").unwrap().to_string();
    assert!(tag.starts_with("W/\""));

    let second = client
        .get("/api/projects")
        .header(Header::new("If-None-Match", tag.clone()))
        .dispatch();
    assert_eq!(second.status(), Status::NotModified);
    assert_eq!(second.headers().get_one("ETag"), Some(tag.as_str()));

    let tags = json_of(client.get("/api/tags").dispatch());
    assert_eq!(tags["data"], json!([]));
}

#[test]
fn idempotency_key_replays_create() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);

    let send = || {
        client
            .post("/api/projects")
            .header(ContentType::JSON)
            .header(Header::new("Idempotency-Key", "2b0b7c55-create"))
            .body(sample_body("Once only").to_string())
            .dispatch()
    };
    let first = send();
    assert_eq!(first.status(), Status::Created);
    let first_id = json_of(first)["data"]["id"].clone();

    let second = send();
    assert_eq!(second.status(), Status::Created);
    assert_eq!(second.headers().get_one("Idempotent-Replayed"), Some("true"));
    assert_eq!(json_of(second)["data"]["id"], first_id);

    let store = JsonStore::new(dir.path().join("data"), dir.path().join("public"), true);
    assert_eq!(store.project_list(false).len(), 1);
}

// ── Environment guards ──────────────────────────────────

#[test]
fn production_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        environment: Environment::Production,
        ..test_config(dir.path())
    };
    let client = client_with(config);
    let token = TokenService::new(Some(SECRET.into()), 3600, "production")
        .issue("admin")
        .unwrap();
    let bearer = Header::new("Authorization", format!("Bearer {}", token));

    let response = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .header(bearer.clone())
        .body(sample_body("Blocked").to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Forbidden);
    assert_eq!(json_of(response)["error"]["code"], json!("READ_ONLY"));

    let response = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .header(bearer)
        .header(Header::new("Origin", "https://evil.example"))
        .header(Header::new("Host", "folio.example"))
        .body(sample_body("Blocked").to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Forbidden);
    let body = json_of(response);
    assert_eq!(body["error"]["code"], json!("FORBIDDEN"));
    assert_eq!(body["error"]["message"], json!("Invalid request origin"));

    let response = client.get("/api/health").dispatch();
    assert!(response.headers().get_one("Strict-Transport-Security").is_some());
}

#[test]
fn auth_attempts_are_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.rate_limit.auth = 2;
    let client = client_with(config);

    let attempt = || {
        client
            .post("/api/auth")
            .header(ContentType::JSON)
            .body(json!({"username": "admin", "password": "wrong"}).to_string())
            .dispatch()
    };
    let first = attempt();
    assert_eq!(first.status(), Status::Unauthorized);
    assert_eq!(first.headers().get_one("X-RateLimit-Remaining"), Some("1"));
    assert_eq!(attempt().status(), Status::Unauthorized);

    let blocked = attempt();
    assert_eq!(blocked.status(), Status::TooManyRequests);
    assert_eq!(blocked.headers().get_one("X-RateLimit-Remaining"), Some("0"));
    let retry: u64 = blocked.headers().get_one("Retry-After").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry));
    let body = json_of(blocked);
    assert_eq!(body["error"], json!("Too many requests"));
    assert_eq!(body["retryAfter"], json!(retry));

    // other categories keep their own budget
    assert_eq!(client.get("/api/auth").dispatch().status(), Status::Ok);
}

#[test]
fn throttled_route_is_not_public() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    let response = client.get("/api/__throttled").dispatch();
    assert_eq!(response.status(), Status::NotFound);
    assert!(response.headers().get_one("Retry-After").is_none());
    assert_eq!(json_of(response)["error"]["code"], json!("NOT_FOUND"));
}

#[test]
fn zero_auth_budget_refuses_every_login() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.rate_limit.auth = 0;
    let client = client_with(config);
    let response = client
        .post("/api/auth")
        .header(ContentType::JSON)
        .body(json!({"username": "admin", "password": PASSWORD}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::TooManyRequests);
    assert!(response.cookies().get("admin_token").is_none());
}

// ── Uploads and media ───────────────────────────────────

#[test]
fn upload_then_media_usage() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let public = config.public_dir.clone();
    let client = client_with(config);
    login(&client);

    let (ct, body) = multipart(&[("Sales Chart.png", "image/png", PNG_BYTES)]);
    let response = client.post("/api/upload").header(ct).body(body).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let data = json_of(response)["data"].clone();
    let path = data["images"][0].as_str().unwrap().to_string();
    assert!(path.starts_with("/uploads/images/"));
    assert!(path.ends_with("-Sales_Chart.png"));
    assert!(public.join(path.trim_start_matches('/')).is_file());

    let project = create(&client, json!({
        "title": "Chart gallery",
        "description": "Uses the uploaded chart image",
        "tool": "Tableau",
        "images": [&path],
    }));

    let media = json_of(client.get("/api/media").dispatch());
    let entry = media["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["path"] == json!(&path))
        .cloned()
        .unwrap();
    assert_eq!(entry["isUsed"], json!(true));
    assert_eq!(entry["usage"][0], project["id"]);

    let refused = client
        .delete("/api/media")
        .header(ContentType::JSON)
        .body(json!({"filePath": &path}).to_string())
        .dispatch();
    assert_eq!(refused.status(), Status::Conflict);

    client
        .put(format!("/api/projects/{}", project["id"].as_str().unwrap()))
        .header(ContentType::JSON)
        .body(json!({"images": []}).to_string())
        .dispatch();
    let deleted = client
        .delete("/api/media")
        .header(ContentType::JSON)
        .body(json!({"filePath": &path}).to_string())
        .dispatch();
    assert_eq!(deleted.status(), Status::Ok);
    assert!(!public.join(path.trim_start_matches('/')).exists());
}

#[test]
fn upload_rejects_spoofed_and_wrong_content_types() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);

    let (ct, body) = multipart(&[("fake.png", "image/png", b"GIF89a-not-a-png")]);
    let response = client.post("/api/upload").header(ct).body(body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
    let body = json_of(response);
    assert_eq!(body["error"]["code"], json!("UPLOAD_ERROR"));
    assert_eq!(body["error"]["details"]["errors"][0]["file"], json!("fake.png"));

    let response = client
        .post("/api/upload")
        .header(ContentType::JSON)
        .body("{}")
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(
        json_of(response)["error"]["message"],
        json!("Content-Type must be multipart/form-data")
    );
}

// ── Config, metrics, backup, health ─────────────────────

#[test]
fn config_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    login(&client);
    create(&client, json!({
        "title": "Finance model",
        "description": "Scenario planning workbook with macros",
        "tool": "Excel",
        "status": "published",
        "pdf": "/uploads/pdfs/model.pdf",
    }));

    let metrics = json_of(client.get("/api/metrics").dispatch());
    assert_eq!(metrics["data"]["totalProjects"], json!(1));
    assert_eq!(metrics["data"]["excel"], json!(1));
    assert_eq!(metrics["data"]["totalPdfs"], json!(1));

    let response = client
        .put("/api/config")
        .header(ContentType::JSON)
        .body(json!({"experience": 7, "hero": {"headline": "Charts that talk"}}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let config = json_of(client.get("/api/config").dispatch());
    assert_eq!(config["data"]["hero"]["headline"], json!("Charts that talk"));

    let metrics = json_of(client.get("/api/metrics").dispatch());
    assert_eq!(metrics["data"]["experienceYears"], json!(7));

    let response = client
        .put("/api/config")
        .header(ContentType::JSON)
        .body(json!({"profile": {"email": "not-an-email"}}).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);

    let backup = client.get("/api/backup").dispatch();
    assert_eq!(backup.status(), Status::Ok);
    assert!(backup
        .headers()
        .get_one("Content-Disposition")
        .unwrap()
        .starts_with("attachment;"));
    let backup = json_of(backup);
    assert_eq!(backup["data"]["projects"].as_array().unwrap().len(), 1);
    assert_eq!(backup["data"]["config"]["experience"], json!(7));
}

#[test]
fn health_and_security_headers() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    let response = client
        .get("/api/health")
        .header(Header::new("X-Request-Id", "req-123"))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.headers().get_one("X-Frame-Options"), Some("DENY"));
    assert_eq!(response.headers().get_one("X-Content-Type-Options"), Some("nosniff"));
    assert!(response.headers().get_one("Content-Security-Policy").is_some());
    assert!(response.headers().get_one("Strict-Transport-Security").is_none());
    assert_eq!(response.headers().get_one("X-Request-Id"), Some("req-123"));
    let body = json_of(response);
    assert_eq!(body["server"], json!("online"));
    assert_eq!(body["checks"]["uploads"]["status"], json!("healthy"));
}

#[test]
fn unknown_routes_use_the_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with(test_config(dir.path()));
    let response = client.get("/api/does-not-exist").dispatch();
    assert_eq!(response.status(), Status::NotFound);
    let body = json_of(response);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));
}

#[test]
fn samples_are_seeded_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        seed_samples: true,
        ..test_config(dir.path())
    };
    let client = client_with(config);
    let listed = json_of(client.get("/api/projects").dispatch());
    // the Excel sample is a draft
    assert_eq!(listed["meta"]["total"], json!(2));
    let tags = json_of(client.get("/api/tags").dispatch());
    assert!(tags["data"].as_array().unwrap().contains(&json!("DAX")));
}
