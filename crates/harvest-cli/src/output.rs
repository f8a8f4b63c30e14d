use crate::error::CliError;
use harvest_core::{broker::Delivery, models::Checkpoint};
use harvest_sync::{buffer::DrainReport, reconciler::CommitReport};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Serialize)]
pub struct QueueDepths<'a> {
    pub staging_queue: &'a str,
    pub staging: u64,
    pub main_queue: &'a str,
    pub main: u64,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_checkpoint(checkpoint: &Checkpoint) -> Result<(), CliError> {
    let timestamp = checkpoint
        .timestamp
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "never written".to_string());

    println!("{:<16} {}", "Status", checkpoint.status);
    println!("{:<16} {}", "Timestamp", timestamp);
    for (key, value) in &checkpoint.extra {
        println!("{:<16} {}", key, serde_json::to_string(value)?);
    }
    Ok(())
}

pub fn print_commit(report: &CommitReport) {
    println!("{:<16} {}", "Committed at", report.committed_at.to_rfc3339());
    println!("{:<16} {}", "Staged", report.staged);
    match (report.drain, report.main_queue_depth) {
        (Some(drain), Some(depth)) => {
            print_drain(&drain);
            println!("{:<16} {}", "Main queue", depth);
        }
        _ => println!("{:<16} skipped, nothing staged", "Drain"),
    }
}

pub fn print_drain(report: &DrainReport) {
    println!("{:<16} {}", "Forwarded", report.forwarded);
    println!("{:<16} {}", "Discarded", report.discarded);
}

pub fn print_depths(depths: &QueueDepths<'_>) {
    println!("{:<16} {}", depths.staging_queue, depths.staging);
    println!("{:<16} {}", depths.main_queue, depths.main);
}

pub fn print_messages(messages: &[Delivery]) {
    if messages.is_empty() {
        println!("(empty)");
        return;
    }

    for delivery in messages {
        let timestamp = delivery
            .properties
            .timestamp
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{:<8} {:<34} {}",
            delivery.tag,
            timestamp,
            render_payload(&delivery.payload)
        );
    }
}

/// UTF-8 payloads verbatim, anything else as hex.
fn render_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => payload.iter().fold(String::from("0x"), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        }),
    }
}
