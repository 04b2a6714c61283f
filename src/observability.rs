use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings written.
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: booking requests turned down. Labels: reason, stage.
pub const BOOKINGS_REJECTED_TOTAL: &str = "roombook_bookings_rejected_total";

/// Counter: stored bookings found empty or outside their resource's hours.
pub const DATA_INTEGRITY_VIOLATIONS_TOTAL: &str = "roombook_data_integrity_violations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "roombook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the Prometheus exporter. No-op if `addr` is None.
pub fn init(addr: Option<SocketAddr>) -> Result<(), BuildError> {
    let Some(addr) = addr else { return Ok(()) };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertResource { .. } => "insert_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::DisableResource { .. } => "disable_resource",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::DeactivateBooking { .. } => "deactivate_booking",
        Command::SelectResources => "select_resources",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
    }
}
