//! QuizBank API Server binary.

use std::sync::Arc;

use quizbank_api::{router, AppState};
use quizbank_engine::{
    security_event_writer_task, AuditConfig, QuizBankService, SecurityAuditSink,
};
use quizbank_storage::{BankBackend, LocalSqliteBackend};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("QUIZBANK_DB_PATH").unwrap_or_else(|_| "quizbank.db".to_string());
    tracing::info!("Using question-bank store at: {}", db_path);

    let backend = LocalSqliteBackend::new(&db_path);
    if !backend.exists().unwrap_or(false) {
        tracing::warn!("store does not exist, initializing new database");
        backend.initialize().expect("Failed to initialize store");
    }
    let backend: Arc<dyn BankBackend> = Arc::new(backend);

    // Security audit sink: handle for the engine, writer task in background
    let audit_config = AuditConfig::default();
    let (audit_sink, audit_receiver) = SecurityAuditSink::new(&audit_config);
    tokio::spawn(security_event_writer_task(
        audit_receiver,
        Arc::clone(&backend),
        audit_config,
    ));

    let state = AppState {
        service: QuizBankService::new(backend, audit_sink),
    };
    let app = router(state);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .expect("PORT must be a valid number");

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("QuizBank API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
