use std::fs;
use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use relay_hub::auth::VERIFIED_CN_HEADER;
use relay_hub::config::Config;
use relay_hub::config_path::{ConfigPathStore, RELAYS_DIR_NAME};
use relay_hub::relays::RelayRegistry;
use relay_hub::server::{AppState, build_app};
use relay_hub::tasks::{TasksRepository, TasksSettings};
use relay_hub::types::RelayId;

const SITE_CN: &str = "prod";
const RELAY: &str = "relay-1";

struct TestApp {
    site: TempDir,
    app: Router,
}

impl TestApp {
    fn new(max_number_of_tasks: usize) -> Self {
        let site = TempDir::new().unwrap();
        let mut config = Config::default();
        config.site.site_cn = SITE_CN.to_string();

        let relays = RelayRegistry::from_ids([RelayId::new(RELAY).unwrap()]);
        let tasks = TasksRepository::in_memory(TasksSettings {
            max_number_of_tasks,
            ..TasksSettings::default()
        });
        let state = AppState::new(ConfigPathStore::new(site.path()), relays, tasks, &config);
        Self {
            site,
            app: build_app(state, 30),
        }
    }

    fn publish_relay_config(&self) -> u64 {
        let store = ConfigPathStore::new(self.site.path());
        let (published, ()) = store
            .publish(|creation| -> anyhow::Result<()> {
                let dir = creation.path_created().join(RELAYS_DIR_NAME).join(RELAY);
                fs::create_dir_all(&dir)?;
                fs::write(dir.join("relay.cfg"), "interval = 60\n")?;
                Ok(())
            })
            .unwrap();
        published.serial()
    }

    async fn send(
        &self,
        from: [u8; 4],
        cn: Option<&str>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cn) = cn {
            builder = builder.header(VERIFIED_CN_HEADER, cn);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let mut request = builder.body(body).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((from, 40000))));

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    async fn as_site(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(LOCALHOST, Some(SITE_CN), method, uri, body).await
    }
}

const LOCALHOST: [u8; 4] = [127, 0, 0, 1];

fn adhoc() -> Value {
    json!({"spec": {"type": "fetch_ad_hoc", "payload": "fetch"}})
}

fn tasks_uri() -> String {
    format!("/api/v1/relays/{RELAY}/tasks")
}

#[tokio::test]
async fn health_endpoints() {
    let app = TestApp::new(3);
    let (status, body) = app.send(LOCALHOST, None, Method::GET, "/livez", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));

    let (status, _) = app.send(LOCALHOST, None, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send(LOCALHOST, None, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "relay-hub");
}

#[tokio::test]
async fn task_limit_is_reported_and_finishing_frees_a_slot() {
    let app = TestApp::new(3);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (status, body) = app.as_site(Method::POST, &tasks_uri(), Some(adhoc())).await;
        assert_eq!(status, StatusCode::OK);
        ids.push(body["task_id"].as_str().unwrap().to_string());
    }

    let (status, body) = app.as_site(Method::POST, &tasks_uri(), Some(adhoc())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({"detail": "The maximum number of tasks 3 has been reached"})
    );

    let (status, body) = app
        .send(
            LOCALHOST,
            Some(RELAY),
            Method::PATCH,
            &format!("{}/{}", tasks_uri(), ids[0]),
            Some(json!({"result_type": "OK", "result_payload": "done"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");

    let (status, _) = app.as_site(Method::POST, &tasks_uri(), Some(adhoc())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send(LOCALHOST, Some(RELAY), Method::GET, &tasks_uri(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tasks"].as_array().unwrap().len(), 4);

    let (_, body) = app
        .send(LOCALHOST, Some(RELAY), Method::GET, &format!("{}?status=PENDING", tasks_uri()), None)
        .await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn second_update_conflicts() {
    let app = TestApp::new(3);
    let (_, body) = app.as_site(Method::POST, &tasks_uri(), Some(adhoc())).await;
    let uri = format!("{}/{}", tasks_uri(), body["task_id"].as_str().unwrap());

    let update = json!({"result_type": "FAILED"});
    let (status, _) = app.send(LOCALHOST, Some(RELAY), Method::PATCH, &uri, Some(update.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.send(LOCALHOST, Some(RELAY), Method::PATCH, &uri, Some(update)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("already finished"));
}

#[tokio::test]
async fn site_cn_must_match() {
    let app = TestApp::new(3);
    for cn in [None, Some(""), Some("other-site")] {
        let (status, body) = app
            .send(LOCALHOST, cn, Method::POST, &tasks_uri(), Some(adhoc()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(
            body["detail"]
                .as_str()
                .unwrap()
                .contains("does not match local site CN")
        );
    }
}

#[tokio::test]
async fn remote_origin_is_rejected_even_with_correct_cn() {
    let app = TestApp::new(3);
    let (status, body) = app
        .send([192, 168, 1, 100], Some(SITE_CN), Method::POST, &tasks_uri(), Some(adhoc()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["detail"],
        "Request must originate from localhost, got 192.168.1.100"
    );
}

#[tokio::test]
async fn relay_reads_only_its_own_queue() {
    let app = TestApp::new(3);
    let (status, _) = app
        .send(LOCALHOST, Some("relay-2"), Method::GET, &tasks_uri(), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.as_site(Method::GET, &tasks_uri(), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_and_invalid_relays() {
    let app = TestApp::new(3);
    let (status, body) = app
        .as_site(Method::POST, "/api/v1/relays/ghost/tasks", Some(adhoc()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Relay ghost not found");

    let (status, _) = app
        .as_site(Method::POST, "/api/v1/relays/bad%20id/tasks", Some(adhoc()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(LOCALHOST, Some(RELAY), Method::GET, &format!("{}/missing", tasks_uri()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_relay_then_queue_tasks() {
    let app = TestApp::new(3);
    let (status, body) = app
        .as_site(Method::POST, "/api/v1/relays", Some(json!({"alias": "dc-west"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let relay_id = body["relay_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .as_site(Method::POST, &format!("/api/v1/relays/{relay_id}/tasks"), Some(adhoc()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .as_site(Method::POST, "/api/v1/relays", Some(json!({"relay_id": RELAY})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn config_tasks_are_created_once_per_serial() {
    let app = TestApp::new(3);

    let (status, body) = app.as_site(Method::POST, "/api/v1/relays/config-tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["tasks"].as_array().unwrap().is_empty());

    let serial = app.publish_relay_config();
    let (_, body) = app.as_site(Method::POST, "/api/v1/relays/config-tasks", None).await;
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["spec"]["type"], "relay_config");
    assert_eq!(tasks[0]["spec"]["serial"], serial);
    assert_eq!(tasks[0]["status"], "PENDING");

    let (status, body) = app
        .as_site(Method::POST, &format!("/api/v1/relays/{RELAY}/config-tasks"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}
