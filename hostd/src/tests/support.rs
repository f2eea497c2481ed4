//! Shared construction helpers for daemon tests

use crate::database::TaskDatabase;
use crate::executor::CommandExecutor;
use crate::orchestrator::OrchestrationState;
use crate::rebootflag::RebootFlag;
use shared::config::OrchestrationSection;
use shared::tasks::NewTask;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// A scratch task database in a temp directory. Keep the TempDir alive for
/// the duration of the test.
pub async fn test_database() -> (Arc<Mutex<TaskDatabase>>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut db = TaskDatabase::new(temp_dir.path(), 5).unwrap();
    db.initialize().await.unwrap();
    (Arc::new(Mutex::new(db)), temp_dir)
}

/// An executor without pfexec and with a long slow-command threshold, so
/// test logs stay quiet.
pub fn test_executor() -> CommandExecutor {
    CommandExecutor::new(300_000, 60_000, false)
}

pub fn test_orchestration() -> Arc<OrchestrationState> {
    Arc::new(OrchestrationState::new(OrchestrationSection::default()))
}

pub fn test_reboot_flag(temp_dir: &TempDir) -> RebootFlag {
    RebootFlag::new(temp_dir.path().join("reboot-required"))
}

/// A pending task row with the given operation and priority.
pub fn new_task(operation: &str, priority: i32) -> NewTask {
    NewTask {
        operation: operation.to_string(),
        zone_name: None,
        priority,
        depends_on: None,
        metadata: None,
        created_by: "api".to_string(),
    }
}

/// A TCP listener that accepts connections and never answers. Download
/// tasks pointed at it stay in flight until the test ends.
pub async fn hanging_http_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut connections = Vec::new();
        loop {
            match listener.accept().await {
                Ok((socket, _)) => connections.push(socket),
                Err(_) => break,
            }
        }
    });
    (format!("http://{}/artifact", addr), handle)
}

/// Metadata for an artifact download task against the hanging server.
pub fn hanging_download_metadata(url: &str, temp_dir: &TempDir, name: &str) -> String {
    serde_json::json!({
        "url": url,
        "destination_path": temp_dir.path().join(name).to_str().unwrap(),
    })
    .to_string()
}
