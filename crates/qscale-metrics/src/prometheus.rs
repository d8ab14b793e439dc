//! Prometheus text exposition format.
//!
//! Renders the two loop statuses into the Prometheus text exposition
//! format for scraping by a Prometheus server or compatible agent.

use qscale_core::{AlarmState, PoolStatus, ScalingStatus};

/// Render the scaling and instance pool statuses into Prometheus text format.
pub fn render_prometheus(scaling: &ScalingStatus, pool: &PoolStatus) -> String {
    let mut out = String::new();
    let queue = escape_label(&scaling.queue_id);
    let service = escape_label(&scaling.service_id);
    let pool_id = escape_label(&pool.pool_id);

    out.push_str("# HELP qscale_backlog_depth Last sampled queue backlog depth.\n");
    out.push_str("# TYPE qscale_backlog_depth gauge\n");
    if let Some(sample) = scaling.last_sample {
        out.push_str(&format!(
            "qscale_backlog_depth{{queue=\"{queue}\"}} {:.2}\n",
            sample.depth
        ));
    }

    out.push_str("# HELP qscale_alarm_state Current alarm state (1 for the active state).\n");
    out.push_str("# TYPE qscale_alarm_state gauge\n");
    for state in [AlarmState::Ok, AlarmState::Alarm, AlarmState::InsufficientData] {
        out.push_str(&format!(
            "qscale_alarm_state{{queue=\"{queue}\",state=\"{}\"}} {}\n",
            state.label(),
            u8::from(scaling.alarm_state == state)
        ));
    }

    out.push_str("# HELP qscale_desired_tasks Last applied desired task count.\n");
    out.push_str("# TYPE qscale_desired_tasks gauge\n");
    if let Some(count) = scaling.desired_task_count {
        out.push_str(&format!(
            "qscale_desired_tasks{{service=\"{service}\"}} {count}\n"
        ));
    }

    out.push_str("# HELP qscale_suppressed_decisions_total Decisions dropped by cooldown.\n");
    out.push_str("# TYPE qscale_suppressed_decisions_total counter\n");
    out.push_str(&format!(
        "qscale_suppressed_decisions_total{{queue=\"{queue}\"}} {}\n",
        scaling.suppressed_decisions
    ));

    out.push_str("# HELP qscale_missing_samples_total Backlog reads that produced no sample.\n");
    out.push_str("# TYPE qscale_missing_samples_total counter\n");
    out.push_str(&format!(
        "qscale_missing_samples_total{{queue=\"{queue}\"}} {}\n",
        scaling.missing_samples
    ));

    out.push_str("# HELP qscale_task_demand Last observed scheduled task demand.\n");
    out.push_str("# TYPE qscale_task_demand gauge\n");
    if let Some(demand) = pool.last_demand {
        out.push_str(&format!(
            "qscale_task_demand{{pool=\"{pool_id}\"}} {demand:.2}\n"
        ));
    }

    out.push_str("# HELP qscale_required_instances Instance count required by current demand.\n");
    out.push_str("# TYPE qscale_required_instances gauge\n");
    if let Some(required) = pool.required_instances {
        out.push_str(&format!(
            "qscale_required_instances{{pool=\"{pool_id}\"}} {required}\n"
        ));
    }

    out.push_str("# HELP qscale_pool_size Instance pool size last applied or observed.\n");
    out.push_str("# TYPE qscale_pool_size gauge\n");
    if let Some(size) = pool.pool_size {
        out.push_str(&format!("qscale_pool_size{{pool=\"{pool_id}\"}} {size}\n"));
    }

    out.push_str("# HELP qscale_stale_demand_reads_total Demand reads that failed.\n");
    out.push_str("# TYPE qscale_stale_demand_reads_total counter\n");
    out.push_str(&format!(
        "qscale_stale_demand_reads_total{{pool=\"{pool_id}\"}} {}\n",
        pool.stale_demand_reads
    ));

    out.push_str("# HELP qscale_apply_failures Consecutive failed capacity changes.\n");
    out.push_str("# TYPE qscale_apply_failures gauge\n");
    out.push_str(&format!(
        "qscale_apply_failures{{loop=\"tasks\"}} {}\n",
        scaling.consecutive_apply_failures
    ));
    out.push_str(&format!(
        "qscale_apply_failures{{loop=\"instances\"}} {}\n",
        pool.consecutive_apply_failures
    ));

    out.push_str("# HELP qscale_degraded Whether a loop is degraded (1) or healthy (0).\n");
    out.push_str("# TYPE qscale_degraded gauge\n");
    out.push_str(&format!(
        "qscale_degraded{{loop=\"tasks\"}} {}\n",
        u8::from(scaling.degraded)
    ));
    out.push_str(&format!(
        "qscale_degraded{{loop=\"instances\"}} {}\n",
        u8::from(pool.degraded)
    ));

    out
}

/// Escape a label value per the text exposition format.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
