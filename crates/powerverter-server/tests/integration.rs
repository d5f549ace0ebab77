// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerverter.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use powerverter_core::memory::{InMemoryDeviceStore, LocalTimeSource, ManualClock};
use powerverter_core::{
    Clock, DeviceStateStore, ExecutionPriority, ExecutionRequest, RunRequest, TimeSource, is_due,
};
use powerverter_server::api;
use powerverter_server::config::{AuthSettings, ServerConfig};
use powerverter_server::db::Database;
use powerverter_server::engine::Engine;
use powerverter_types::{Schedule, TriggeredBy};

const TEST_SECRET: &str = "test-secret-for-integration-tests";
const SYSTEM: &str = "sys-1";

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Monday 2025-01-06 09:05:10 UTC
fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 9, 5, 10).unwrap()
}

fn test_config() -> ServerConfig {
    ServerConfig {
        auth: AuthSettings {
            shared_secret: TEST_SECRET.to_owned(),
        },
        ..ServerConfig::default()
    }
}

struct TestServer {
    port: u16,
    engine: Arc<Engine>,
    db: Arc<Database>,
    device: Arc<InMemoryDeviceStore>,
    clock: Arc<ManualClock>,
    client: reqwest::Client,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir.path().join("powerverter.db");
        let db = Arc::new(
            Database::open(db_path.to_str().expect("utf-8 path")).expect("Failed to open database"),
        );

        let clock = Arc::new(ManualClock::new(monday_morning()));
        let device = Arc::new(InMemoryDeviceStore::new());
        let local: Arc<dyn Clock> = clock.clone();
        let time_source: Arc<dyn TimeSource> = Arc::new(LocalTimeSource::new(local.clone()));
        let device_store: Arc<dyn DeviceStateStore> = device.clone();

        let engine = Arc::new(Engine::with_backends(
            Arc::new(test_config()),
            Arc::clone(&db),
            device_store,
            time_source,
            local,
        ));
        engine.clock.sync().await;

        let app = api::router(Arc::clone(&engine));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let port = listener.local_addr().expect("No local addr").port();

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Test server error");
        });

        Self {
            port,
            engine,
            db,
            device,
            clock,
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request")
    }

    async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(TEST_SECRET)
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request")
    }

    async fn create_schedule(&self, trigger_time: &str, days: &[&str]) -> Value {
        let response = self
            .post(
                &format!("/api/systems/{SYSTEM}/schedules"),
                &json!({
                    "trigger_time": trigger_time,
                    "days_of_week": days,
                    "target_state": true,
                }),
            )
            .await;
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    /// Insert bypassing API validation, as legacy rows would be
    fn insert_raw(&self, id: &str, trigger_time: &str) {
        self.db
            .insert_schedule(&Schedule {
                id: id.to_owned(),
                system_id: SYSTEM.to_owned(),
                trigger_time: trigger_time.to_owned(),
                days_of_week: vec!["Monday".to_owned()],
                target_state: false,
                is_active: true,
                updated_at: None,
            })
            .unwrap();
    }

    fn count(&self, schedule_id: &str, action: &str) -> usize {
        self.actions(schedule_id)
            .iter()
            .filter(|a| a.as_str() == action)
            .count()
    }

    fn actions(&self, schedule_id: &str) -> Vec<String> {
        self.db
            .query_trigger_records(
                SYSTEM,
                Some(schedule_id),
                monday_morning() - chrono::Duration::hours(1),
            )
            .unwrap()
            .into_iter()
            .map(|r| r.action.as_str().to_owned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_and_time() {
    let server = TestServer::start().await;

    let response = server.get("/api/health").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["clock"]["is_synced"], true);

    let body: Value = server.get("/api/time").await.json().await.unwrap();
    assert_eq!(body["timezone"], "UTC");
    assert_eq!(body["estimated"], false);
    let time: DateTime<Utc> = serde_json::from_value(body["time"].clone()).unwrap();
    assert_eq!(time, monday_morning());
}

#[tokio::test]
async fn test_mutations_require_bearer_token() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url(&format!("/api/systems/{SYSTEM}/schedules")))
        .json(&json!({
            "trigger_time": "09:05",
            "days_of_week": ["Monday"],
            "target_state": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .post(server.url("/api/schedule-runner"))
        .bearer_auth("wrong-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    assert!(server.db.list_schedules(SYSTEM, false).unwrap().is_empty());
}

#[tokio::test]
async fn test_create_schedule_normalizes_and_validates() {
    let server = TestServer::start().await;

    let created = server.create_schedule("9:5", &["Monday", "Friday"]).await;
    assert_eq!(created["trigger_time"], "09:05");
    assert_eq!(created["is_active"], true);

    let response = server
        .post(
            &format!("/api/systems/{SYSTEM}/schedules"),
            &json!({
                "trigger_time": "25:00",
                "days_of_week": ["Funday"],
                "state": false,
            }),
        )
        .await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    let reasons: Vec<&str> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["reason"].as_str().unwrap())
        .collect();
    assert_eq!(reasons, ["invalid_time_format", "invalid_day_format"]);

    let listed: Value = server
        .get(&format!("/api/systems/{SYSTEM}/schedules"))
        .await
        .json()
        .await
        .unwrap();
    let schedules = listed["schedules"].as_array().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0]["due"]["due"], true);
    assert_eq!(schedules[0]["due"]["seconds_to_next"], -10);
}

#[tokio::test]
async fn test_validation_report_and_normalize() {
    let server = TestServer::start().await;
    server.insert_raw("loose", "7:30");
    server.insert_raw("broken", "31:00");
    server.create_schedule("18:45", &["Sunday"]).await;

    let report: Value = server
        .get(&format!("/api/systems/{SYSTEM}/schedules/validation"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["total"], 3);
    assert_eq!(report["valid"], 1);
    assert_eq!(report["invalid"], 2);

    let response = server.post("/api/schedules/loose/normalize", &json!({})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["before"], "7:30");
    assert_eq!(body["after"], "07:30");
    assert_eq!(body["changed"], true);
    assert_eq!(
        server.db.get_schedule("loose").unwrap().unwrap().trigger_time,
        "07:30"
    );

    let response = server.post("/api/schedules/broken/normalize", &json!({})).await;
    assert_eq!(response.status(), 422);

    let response = server.post("/api/schedules/missing/normalize", &json!({})).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_execute_now_applies_once() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:05", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();

    let response = server
        .post(&format!("/api/schedules/{id}/execute"), &json!({}))
        .await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["attempts"], 1);
    assert_eq!(outcome["verified"], true);
    assert_eq!(outcome["duplicate"], false);

    let blob = server.device.blob(SYSTEM).unwrap();
    assert_eq!(blob["power"], 1);
    assert_eq!(blob["lastUserPower"], format!("manual:{id}"));

    // Same due window: suppressed without touching the device
    let outcome: Value = server
        .post(&format!("/api/schedules/{id}/execute"), &json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["attempts"], 0);
    assert_eq!(outcome["duplicate"], true);
    assert_eq!(server.device.write_count(), 1);

    assert_eq!(
        server.actions(&id),
        [
            "execution_attempted",
            "execution_succeeded",
            "duplicate_suppressed"
        ]
    );

    let records: Value = server
        .get(&format!("/api/systems/{SYSTEM}/trigger-records?limit=2"))
        .await
        .json()
        .await
        .unwrap();
    let records = records["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["action"], "duplicate_suppressed");
}

#[tokio::test]
async fn test_runner_executes_then_reports_already_handled() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:05", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();
    server.create_schedule("21:00", &["Monday"]).await;

    let response = server.post("/api/schedule-runner", &json!({})).await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["schedules_checked"], 2);
    assert_eq!(report["executed"], 1);
    assert_eq!(report["reference_time"]["formatted_hhmm"], "09:05");
    assert_eq!(report["reference_time"]["weekday"], "Monday");

    let verdict_of = |report: &Value, id: &str| {
        report["results"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["schedule_id"] == id)
            .map(|r| r["verdict"].as_str().unwrap().to_owned())
            .unwrap()
    };
    assert_eq!(verdict_of(&report, &id), "executed");

    server.clock.advance(chrono::Duration::seconds(30));
    let report: Value = server
        .post("/api/schedule-runner", &json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["executed"], 0);
    assert_eq!(verdict_of(&report, &id), "already_handled");
    assert_eq!(server.device.write_count(), 1);
}

#[tokio::test]
async fn test_runner_test_mode_and_diagnostics() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:05", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();

    let report: Value = server
        .post(
            "/api/schedule-runner",
            &json!({ "system_id": SYSTEM, "test_mode": true }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["test_mode"], true);
    assert_eq!(report["results"][0]["verdict"], "would_execute");
    assert_eq!(server.device.write_count(), 0);
    assert!(!server.actions(&id).contains(&"execution_attempted".to_owned()));

    let report: Value = server
        .post(
            "/api/schedule-runner",
            &json!({ "diagnostics_only": true, "at": "2025-01-08T23:59:00Z" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["estimated"], true);
    assert_eq!(report["reference_time"]["weekday"], "Wednesday");
    assert_eq!(report["reference_time"]["hours_utc"], 23);
    assert_eq!(report["skew_description"], "in sync with the server");
}

#[tokio::test]
async fn test_deactivated_schedule_is_skipped_by_runner() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:05", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();

    let response = server
        .post(&format!("/api/schedules/{id}/active"), &json!({ "is_active": false }))
        .await;
    assert_eq!(response.status(), 200);

    let report: Value = server
        .post("/api/schedule-runner", &json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["schedules_checked"], 0);
    assert!(server.device.blob(SYSTEM).is_none());

    let response = server
        .post("/api/schedules/missing/active", &json!({ "is_active": true }))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_runners_actuate_once() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:05", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();

    let first = {
        let engine = Arc::clone(&server.engine);
        tokio::spawn(async move { engine.runner.run_once(&RunRequest::default()).await })
    };
    let second = {
        let engine = Arc::clone(&server.engine);
        tokio::spawn(async move { engine.runner.run_once(&RunRequest::default()).await })
    };
    let (first, second) = tokio::join!(first, second);
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();

    assert_eq!(first.executed + second.executed, 1);
    assert_eq!(server.device.write_count(), 1);
    assert_eq!(server.count(&id, "execution_succeeded"), 1);
    assert_eq!(server.count(&id, "execution_failed"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runner_racing_watcher_actuates_once() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:05", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();

    let schedule = server.db.get_schedule(&id).unwrap().unwrap();
    let check = is_due(&schedule, &server.engine.clock.reference_instant());
    assert!(check.due);
    let target = check.target.unwrap();

    let runner = {
        let engine = Arc::clone(&server.engine);
        tokio::spawn(async move { engine.runner.run_once(&RunRequest::default()).await })
    };
    let watcher = {
        let engine = Arc::clone(&server.engine);
        tokio::spawn(async move {
            engine
                .coordinator
                .execute(ExecutionRequest {
                    schedule,
                    target,
                    triggered_by: TriggeredBy::Watcher,
                    priority: ExecutionPriority::Normal,
                })
                .await
        })
    };
    let (runner, watcher) = tokio::join!(runner, watcher);
    runner.unwrap().unwrap();
    assert!(watcher.unwrap().success);

    assert_eq!(server.device.write_count(), 1);
    assert_eq!(server.count(&id, "execution_succeeded"), 1);
}

#[tokio::test]
async fn test_watcher_follows_schedule_edits() {
    let server = TestServer::start().await;
    let created = server.create_schedule("09:07", &["Monday"]).await;
    let id = created["id"].as_str().unwrap().to_owned();

    let mut supervisor = server.engine.supervisor();
    let schedules = server.db.list_all_active_schedules().unwrap();
    let summary = supervisor.reconcile(&schedules).await;
    assert_eq!(summary.started, [id.clone()]);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Moved to the evening before the supervisor's next refresh
    assert!(server.db.update_trigger_time(&id, "18:00").unwrap());
    server
        .clock
        .set(Utc.with_ymd_and_hms(2025, 1, 6, 9, 7, 0).unwrap());
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(server.device.write_count(), 0);
    assert_eq!(server.count(&id, "execution_attempted"), 0);
    supervisor.shutdown().await;
}
