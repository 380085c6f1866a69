//! Basic example wiring the kernel into a dictation app's hot paths.
//!
//! Builds a kernel from TOML settings, then drives each component the way
//! the app would: admission before transcription, retried history saves,
//! timed operations, grouped errors and the alert they can raise.

use dictation_guard::infrastructure::telemetry;
use dictation_guard::{ErrorReport, Kernel, KernelConfig, Severity};
use std::io;
use std::time::Duration;

const SETTINGS: &str = r#"
[[rate_limits]]
resource = "transcription"
capacity = 3
period_ms = 60000

[recovery]
max_retries = 2
io_delay_step_ms = 50

[[alerts.rules]]
id = "transcription-flood"
name = "Transcription flood"
event_type = "rate_limit_exceeded"
severity = "medium"
cooldown_minutes = 5
condition = { kind = "count_in_window", count = 2, window_minutes = 1 }

[telemetry]
level = "info"
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = KernelConfig::from_toml_str(SETTINGS)?;
    telemetry::init(&config.telemetry)?;
    let kernel = Kernel::builder().with_config(config).build()?;

    println!("=== Admission ===");
    // Capacity 3: the fourth and fifth requests are denied and feed the alert rule
    for i in 1..=5 {
        let allowed = kernel.rate_limiter().try_consume("transcription");
        println!("transcription request {i}: allowed = {allowed}");
    }
    println!(
        "next token in {:?}",
        kernel.rate_limiter().time_until_next_token("transcription")
    );

    println!("\n=== Recovery ===");
    let mut attempts = 0;
    let saved = kernel.recovery().execute_io_blocking("save_history", || {
        attempts += 1;
        if attempts < 3 {
            Err(io::Error::new(io::ErrorKind::TimedOut, "disk busy"))
        } else {
            Ok(attempts)
        }
    });
    println!("history saved after {} attempts", saved?);

    println!("\n=== Baselines ===");
    for _ in 0..11 {
        kernel
            .baselines()
            .record_operation("transcription", Duration::from_millis(120));
    }
    let anomalous = kernel
        .baselines()
        .record_operation("transcription", Duration::from_millis(900));
    println!("900ms transcription anomalous = {anomalous}");

    println!("\n=== Error grouping ===");
    for _ in 0..10 {
        kernel.errors().report(
            ErrorReport::new("InjectError", "target window closed"),
            Some("injection"),
            Some(Severity::Medium),
        );
    }
    for group in kernel.errors().groups() {
        println!("{} x{} ({})", group.message, group.occurrences, group.fingerprint);
    }

    println!("\n=== Alerts ===");
    for alert in kernel.alerts().alerts() {
        println!("[{}] {}: {}", alert.severity, alert.rule_name, alert.description);
    }

    let report = kernel.health_report();
    println!("\nHealth: {:?}", report.status);
    println!("Metrics: {:#?}", report.metrics);
    Ok(())
}
