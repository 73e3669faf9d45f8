use crate::*;

#[test]
fn test_queue_error_display() {
    let error = QueueError::JobNotFound {
        id: "job-1".to_string(),
    };
    assert_eq!(error.to_string(), "任务未找到: job-1");

    let error = QueueError::WorkerNotFound {
        id: "worker-1".to_string(),
    };
    assert_eq!(error.to_string(), "Worker未找到: worker-1");

    let error = QueueError::invalid_transition("COMPLETED", "PENDING");
    assert_eq!(error.to_string(), "非法的状态转换: COMPLETED -> PENDING");

    let error = QueueError::Serialization("unknown dtype".to_string());
    assert_eq!(error.to_string(), "序列化错误: unknown dtype");

    let error = QueueError::StoreUnavailable("connection refused".to_string());
    assert_eq!(error.to_string(), "队列存储不可用: connection refused");
}

#[test]
fn test_queue_error_creation_methods() {
    assert!(matches!(
        QueueError::job_not_found("a"),
        QueueError::JobNotFound { .. }
    ));
    assert!(matches!(
        QueueError::task_not_found("t"),
        QueueError::TaskNotFound { .. }
    ));
    assert!(matches!(
        QueueError::validation("bad"),
        QueueError::Validation(_)
    ));
    assert!(matches!(
        QueueError::config_error("missing url"),
        QueueError::Configuration(_)
    ));
    assert!(matches!(
        QueueError::handler_failed("boom"),
        QueueError::HandlerFailed(_)
    ));
}

#[test]
fn test_is_retryable() {
    assert!(QueueError::store_unavailable("timeout").is_retryable());
    assert!(QueueError::Database(sqlx::Error::PoolTimedOut).is_retryable());

    assert!(!QueueError::job_not_found("a").is_retryable());
    assert!(!QueueError::serialization("bad").is_retryable());
    assert!(!QueueError::handler_failed("boom").is_retryable());
}

#[test]
fn test_is_fatal() {
    assert!(QueueError::config_error("missing url").is_fatal());
    assert!(QueueError::Internal("bug".to_string()).is_fatal());
    assert!(!QueueError::store_unavailable("blip").is_fatal());
    assert!(!QueueError::handler_failed("boom").is_fatal());
}

#[test]
fn test_user_message() {
    assert_eq!(
        QueueError::store_unavailable("x").user_message(),
        "队列暂时不可用，请稍后重试"
    );
    assert_eq!(
        QueueError::job_not_found("x").user_message(),
        "请求的任务不存在"
    );
    assert_eq!(
        QueueError::handler_failed("x").user_message(),
        "系统繁忙，请稍后重试"
    );
}

#[test]
fn test_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let error: QueueError = json_err.into();
    assert!(matches!(error, QueueError::Serialization(_)));

    let error: QueueError = anyhow::anyhow!("boom").into();
    assert!(matches!(error, QueueError::Internal(_)));
}
