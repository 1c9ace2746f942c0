/*!
 * Terminal tables for the CLI
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::time::Duration;

use crate::config::WaypointConfig;

fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| {
            Cell::new(label)
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold)
        })
        .collect()
}

/// Human-friendly duration: `500ms`, `30s`, `5m`, `2h`
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 || millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// One row per configured dependency with its effective guard settings
pub fn dependency_table(config: &WaypointConfig) -> Table {
    let mut table = create_table();
    table.set_header(header(&[
        "Dependency",
        "Probe",
        "Rate limit",
        "Retries",
        "Breaker",
        "Concurrency",
    ]));

    for dependency in &config.dependencies {
        let settings = dependency.guard_settings(&config.defaults);
        let probe = match &dependency.probe_url {
            Some(url) => Cell::new(url),
            None => Cell::new("none").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&dependency.name)
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
            probe,
            Cell::new(format!(
                "{} / {}",
                settings.rate_limit.max_requests,
                format_duration(settings.rate_limit.window)
            )),
            Cell::new(format!(
                "{} from {}",
                settings.retry.max_retries,
                format_duration(settings.retry.initial_delay)
            )),
            Cell::new(format!(
                "{} fails, {} reset",
                settings.breaker.failure_threshold,
                format_duration(settings.breaker.reset_timeout)
            )),
            Cell::new(settings.queue.concurrency),
        ]);
    }

    table
}

/// Key monitoring thresholds
pub fn sentinel_table(config: &WaypointConfig) -> Table {
    let watchdog = &config.watchdog;
    let business = &config.business;
    let approval = &config.approval;

    let notification = match (&config.notification.telegram, config.notification.log) {
        (Some(_), true) => "telegram + log",
        (Some(_), false) => "telegram",
        (None, true) => "log",
        (None, false) => "none",
    };

    let rows = [
        ("Pulse interval", format_duration(watchdog.pulse_interval)),
        (
            "Latency degraded / critical",
            format!(
                "{} / {}",
                format_duration(watchdog.latency_threshold),
                format_duration(watchdog.critical_latency)
            ),
        ),
        ("Error threshold", watchdog.error_threshold.to_string()),
        (
            "Maintenance timeout",
            format_duration(watchdog.maintenance_timeout),
        ),
        ("Business check", format_duration(business.check_interval)),
        (
            "No search / no booking",
            format!(
                "{} / {}",
                format_duration(business.no_search_after),
                format_duration(business.no_booking_after)
            ),
        ),
        ("Watched dependency", business.watched_dependency.clone()),
        (
            "Approval auto-execute",
            format_duration(approval.auto_execute_after),
        ),
        ("Notifications", notification.to_string()),
    ];

    let mut table = create_table();
    table.set_header(header(&["Setting", "Value"]));
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key).fg(Color::Cyan), Cell::new(value)]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DependencyConfig;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }

    #[test]
    fn test_dependency_table_lists_each_dependency() {
        let config = WaypointConfig {
            dependencies: vec![DependencyConfig {
                name: "supplier".into(),
                probe_url: Some("https://supplier.example/health".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let rendered = dependency_table(&config).to_string();
        assert!(rendered.contains("supplier"));
        assert!(rendered.contains("60 / 1m"));
        assert!(rendered.contains("3 from 1s"));
    }

    #[test]
    fn test_sentinel_table_defaults() {
        let rendered = sentinel_table(&WaypointConfig::default()).to_string();
        assert!(rendered.contains("5m"));
        assert!(rendered.contains("15m"));
        assert!(rendered.contains("log"));
    }
}
