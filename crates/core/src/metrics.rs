//! 队列指标
//!
//! 通过 `metrics` 门面记录，未安装导出器时这些调用为空操作。

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

pub const JOBS_SUBMITTED_TOTAL: &str = "trainq_jobs_submitted_total";
pub const JOBS_CLAIMED_TOTAL: &str = "trainq_jobs_claimed_total";
pub const CLAIM_RACES_LOST_TOTAL: &str = "trainq_claim_races_lost_total";
pub const JOBS_FINISHED_TOTAL: &str = "trainq_jobs_finished_total";
pub const JOBS_RECOVERED_TOTAL: &str = "trainq_jobs_recovered_total";
pub const HEARTBEAT_FAILURES_TOTAL: &str = "trainq_heartbeat_failures_total";
pub const ACTIVE_WORKERS: &str = "trainq_active_workers";
pub const GRADIENTS_SUBMITTED_TOTAL: &str = "trainq_gradients_submitted_total";
pub const JOB_HANDLER_DURATION: &str = "trainq_job_handler_duration_seconds";

/// 向已安装的导出器登记指标说明
pub fn describe_metrics() {
    describe_counter!(JOBS_SUBMITTED_TOTAL, "提交的Job数");
    describe_counter!(JOBS_CLAIMED_TOTAL, "成功领取的Job数");
    describe_counter!(CLAIM_RACES_LOST_TOTAL, "领取竞争失败次数");
    describe_counter!(JOBS_FINISHED_TOTAL, "进入终态的Job数");
    describe_counter!(JOBS_RECOVERED_TOTAL, "从失联Worker回收的Job数");
    describe_counter!(HEARTBEAT_FAILURES_TOTAL, "心跳写入失败次数");
    describe_gauge!(ACTIVE_WORKERS, "最近一次查询时的活跃Worker数");
    describe_counter!(GRADIENTS_SUBMITTED_TOTAL, "提交的梯度分片数");
    describe_histogram!(JOB_HANDLER_DURATION, Unit::Seconds, "Job处理器执行耗时");
}

pub fn record_jobs_submitted(job_type: &str, count: u64) {
    counter!(JOBS_SUBMITTED_TOTAL, "job_type" => job_type.to_string()).increment(count);
}

pub fn record_job_claimed(job_type: &str) {
    counter!(JOBS_CLAIMED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub fn record_claim_race_lost() {
    counter!(CLAIM_RACES_LOST_TOTAL).increment(1);
}

pub fn record_job_finished(status: &str) {
    counter!(JOBS_FINISHED_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn record_jobs_recovered(count: u64) {
    counter!(JOBS_RECOVERED_TOTAL).increment(count);
}

pub fn record_heartbeat_failure() {
    counter!(HEARTBEAT_FAILURES_TOTAL).increment(1);
}

pub fn set_active_workers(count: usize) {
    gauge!(ACTIVE_WORKERS).set(count as f64);
}

pub fn record_gradient_submitted(layer_name: &str) {
    counter!(GRADIENTS_SUBMITTED_TOTAL, "layer" => layer_name.to_string()).increment(1);
}

pub fn record_handler_duration(job_type: &str, seconds: f64) {
    histogram!(JOB_HANDLER_DURATION, "job_type" => job_type.to_string()).record(seconds);
}
