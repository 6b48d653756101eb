use crate::announcement::AnnouncementOutcome;
use crate::detect::DetectionResult;
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Write an entry to `audit.log` in `dir`
pub fn log(dir: &Path, entry: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let log_path = dir.join("audit.log");

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        entry
    )?;
    Ok(())
}

/// Record a settled announcement with the failures it recovered from
pub fn log_outcome(dir: &Path, outcome: &AnnouncementOutcome) -> Result<()> {
    let mut entry = format!("ANNOUNCE {} | TIER {}", outcome.endpoint_id, outcome.tier);
    if let Some(voice) = &outcome.voice_id {
        entry.push_str(&format!(" | VOICE {}", voice));
        if outcome.using_fallback_language {
            entry.push_str(" (fallback language)");
        }
    }
    if let Some(error) = &outcome.error {
        entry.push_str(&format!(" | ERROR {:?}", error));
    }
    for failure in &outcome.failures {
        entry.push_str(&format!(
            " | {} {}: {}",
            failure.tier, failure.kind, failure.detail
        ));
    }
    log(dir, &entry)
}

/// Record one auto-detection run
pub fn log_detection(dir: &Path, address: &str, port: u16, result: &DetectionResult) -> Result<()> {
    let winner = result.kind.map(|k| k.id()).unwrap_or("none");
    let answered: Vec<&str> = result
        .attempts
        .iter()
        .filter(|a| a.ok)
        .map(|a| a.kind.id())
        .collect();
    log(
        dir,
        &format!(
            "DETECT {}:{} | WINNER {} | OK [{}] | {} attempts",
            address,
            port,
            winner,
            answered.join(", "),
            result.attempts.len()
        ),
    )
}
