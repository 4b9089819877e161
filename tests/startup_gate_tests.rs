// tests/startup_gate_tests.rs
//
// End-to-end boots against local listeners: a TCP socket stands in for the
// database and an in-memory journal stands in for Postgres, so the ordering
// guarantees are exercised over real sockets without external services.

use async_trait::async_trait;
use bootgate::config::{BackoffConfig, ProbeConfig};
use bootgate::health::ServiceHealth;
use bootgate::metrics::MetricsRegistry;
use bootgate::migrate::{
    AppliedMigration, MigrateError, Migration, MigrationRunner, MigrationStore,
};
use bootgate::probe::{ProbeReport, ReadinessProber, TcpProbe};
use bootgate::server::{AppHandler, AppState, ServerBuilder};
use bootgate::startup::StartupGate;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

fn fast_probe_config() -> ProbeConfig {
    ProbeConfig {
        max_attempts: Some(50),
        deadline_secs: None,
        backoff: BackoffConfig {
            base_ms: 10,
            max_ms: 40,
            jitter: false,
        },
    }
}

fn sample_migrations() -> Vec<Migration> {
    vec![
        Migration::new(1, "create_users", "CREATE TABLE users ();"),
        Migration::new(2, "create_recipes", "CREATE TABLE recipes ();"),
    ]
}

/// Journal shared between store instances, like a database that outlives
/// process restarts.
#[derive(Clone, Default)]
struct SharedJournal {
    rows: Arc<Mutex<Vec<AppliedMigration>>>,
}

struct RecordingStore {
    journal: SharedJournal,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MigrationStore for RecordingStore {
    async fn ensure_journal(&mut self) -> Result<(), MigrateError> {
        Ok(())
    }

    async fn list_applied(&mut self) -> Result<Vec<AppliedMigration>, MigrateError> {
        Ok(self.journal.rows.lock().unwrap().clone())
    }

    async fn apply(&mut self, migration: &Migration) -> Result<(), MigrateError> {
        self.executed.lock().unwrap().push(migration.label());
        self.journal.rows.lock().unwrap().push(AppliedMigration {
            version: migration.version,
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
        });
        Ok(())
    }
}

#[tokio::test]
async fn full_boot_probes_migrates_then_serves() {
    // A live TCP listener stands in for the database.
    let db = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let db_addr = db.local_addr().unwrap();

    // App listener bound up front so the test knows the URL.
    let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app_addr = app.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_health_tx, health_rx) = watch::channel(ServiceHealth::Healthy);
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let executed = Arc::new(Mutex::new(Vec::new()));

    let gate_task = tokio::spawn({
        let order_probe = order.clone();
        let order_migrate = order.clone();
        let order_serve = order.clone();
        let executed = executed.clone();
        async move {
            let prober = ReadinessProber::new(fast_probe_config(), None);
            let db_probe = TcpProbe::new(db_addr.to_string(), Duration::from_millis(200));
            let runner = MigrationRunner::new(sample_migrations(), None);
            let store = RecordingStore {
                journal: SharedJournal::default(),
                executed,
            };

            let state = Arc::new(AppState {
                started_at: Utc::now(),
                registry: MetricsRegistry::new().unwrap(),
                db_health: health_rx,
            });
            let builder = ServerBuilder::new(app_addr).with_handler(AppHandler::new(state));

            StartupGate::new(None)
                .run(
                    move || async move {
                        order_probe.lock().unwrap().push("probe");
                        prober.wait_until_ready(&db_probe).await
                    },
                    move || async move {
                        order_migrate.lock().unwrap().push("migrate");
                        let mut store = store;
                        runner.run(&mut store).await
                    },
                    move |_report| async move {
                        order_serve.lock().unwrap().push("serve");
                        builder.serve_on(app, shutdown_rx).await
                    },
                )
                .await
        }
    });

    // The app answering proves probe and migrations already finished.
    let client = reqwest::Client::new();
    let url = format!("http://{app_addr}/healthz");
    let mut reachable = false;
    for _ in 0..100 {
        if let Ok(response) = client.get(&url).send().await {
            if response.status().is_success() {
                reachable = true;
                break;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(reachable, "application never came up");

    assert_eq!(*order.lock().unwrap(), vec!["probe", "migrate", "serve"]);
    assert_eq!(
        *executed.lock().unwrap(),
        vec!["0001_create_users", "0002_create_recipes"]
    );

    shutdown_tx.send(true).unwrap();
    let report = timeout(Duration::from_secs(2), gate_task)
        .await
        .expect("gate did not shut down")
        .unwrap()
        .unwrap();
    assert_eq!(report.migrations_applied, 2);
    assert!(report.probe_attempts >= 1);
}

#[tokio::test]
async fn second_boot_applies_nothing_new() {
    let journal = SharedJournal::default();

    let first = {
        let mut store = RecordingStore {
            journal: journal.clone(),
            executed: Arc::default(),
        };
        MigrationRunner::new(sample_migrations(), None)
            .run(&mut store)
            .await
            .unwrap()
    };
    assert_eq!(first.applied.len(), 2);
    assert_eq!(first.previously_applied, 0);

    // Same journal, fresh process.
    let second = {
        let mut store = RecordingStore {
            journal: journal.clone(),
            executed: Arc::default(),
        };
        MigrationRunner::new(sample_migrations(), None)
            .run(&mut store)
            .await
            .unwrap()
    };
    assert!(second.applied.is_empty());
    assert_eq!(second.previously_applied, 2);
}

#[tokio::test]
async fn failed_migration_keeps_the_server_down() {
    let served = Arc::new(Mutex::new(false));

    let result = StartupGate::new(None)
        .run(
            || async {
                Ok(ProbeReport {
                    target: "db:5432".to_string(),
                    attempts: 1,
                    elapsed: Duration::from_millis(2),
                    last_error: None,
                })
            },
            || async {
                Err(MigrateError::Apply {
                    version: 1,
                    name: "create_users".to_string(),
                    reason: "permission denied for schema public".to_string(),
                })
            },
            {
                let served = served.clone();
                move |_report| async move {
                    *served.lock().unwrap() = true;
                    Ok(())
                }
            },
        )
        .await;

    assert!(result.is_err());
    assert!(!*served.lock().unwrap());
}

#[tokio::test]
async fn prober_retries_until_the_port_opens() {
    // Reserve an ephemeral port, release it, bring the real listener up late.
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = placeholder.local_addr().unwrap();
    drop(placeholder);

    tokio::spawn(async move {
        sleep(Duration::from_millis(150)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        drop(listener);
    });

    let prober = ReadinessProber::new(fast_probe_config(), None);
    let probe = TcpProbe::new(addr.to_string(), Duration::from_millis(200));

    let report = timeout(Duration::from_secs(3), prober.wait_until_ready(&probe))
        .await
        .expect("prober never succeeded")
        .unwrap();
    assert!(report.attempts >= 2, "attempts: {}", report.attempts);
    assert!(report.last_error.is_some());
}

#[tokio::test]
async fn endpoints_reflect_database_health_over_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (health_tx, health_rx) = watch::channel(ServiceHealth::Healthy);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(AppState {
        started_at: Utc::now(),
        registry: MetricsRegistry::new().unwrap(),
        db_health: health_rx,
    });
    let server = tokio::spawn(
        ServerBuilder::new(addr)
            .with_handler(AppHandler::new(state))
            .serve_on(listener, shutdown_rx),
    );

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let response = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    health_tx.send(ServiceHealth::Unhealthy).unwrap();
    let response = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 503);

    health_tx.send(ServiceHealth::Healthy).unwrap();
    let response = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert!(
        text.contains("bootgate_http_requests_total"),
        "metrics body: {text}"
    );

    let response = client.get(format!("{base}/admin")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
}
