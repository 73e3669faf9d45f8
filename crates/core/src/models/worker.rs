use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trainq_errors::QueueError;
use uuid::Uuid;

use super::JsonMap;

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub status: WorkerStatus,
    pub capabilities: JsonMap,
    pub current_job_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Busy => "BUSY",
            WorkerStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(WorkerStatus::Idle),
            "BUSY" => Ok(WorkerStatus::Busy),
            "OFFLINE" => Ok(WorkerStatus::Offline),
            _ => Err(QueueError::serialization(format!("未知的Worker状态: {s}"))),
        }
    }
}

impl_sqlx_text_enum!(WorkerStatus);

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerRegistration {
    pub hostname: String,
    pub address: String,
    pub capabilities: JsonMap,
}

impl Worker {
    /// 根据注册请求创建新的Worker，分配新的标识
    pub fn new(registration: WorkerRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            hostname: registration.hostname,
            address: registration.address,
            status: WorkerStatus::Idle,
            capabilities: registration.capabilities,
            current_job_id: None,
            last_heartbeat: now,
            registered_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> WorkerRegistration {
        WorkerRegistration {
            hostname: "gpu-node-01".to_string(),
            address: "10.0.0.5".to_string(),
            capabilities: JsonMap::new(),
        }
    }

    #[test]
    fn test_new_worker_is_idle() {
        let worker = Worker::new(registration());
        assert_eq!(worker.status, WorkerStatus::Idle);
        assert!(worker.current_job_id.is_none());
        assert_eq!(worker.last_heartbeat, worker.registered_at);
    }

    #[test]
    fn test_each_registration_gets_fresh_id() {
        let a = Worker::new(registration());
        let b = Worker::new(registration());
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("worker-"));
    }

    #[test]
    fn test_worker_status_parse() {
        assert_eq!("BUSY".parse::<WorkerStatus>().unwrap(), WorkerStatus::Busy);
        assert_eq!(WorkerStatus::Offline.to_string(), "OFFLINE");
        assert!("ALIVE".parse::<WorkerStatus>().is_err());
    }
}
