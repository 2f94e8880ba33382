use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio::time::sleep;

/// Reads the `Retry-After` header as a number of seconds.
///
/// Both forms allowed by RFC 9110 are accepted: delay-seconds (`120`) and an
/// HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`). A date in the past yields zero.
/// Returns `None` when the header is absent or unparsable.
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let remaining = (at - Utc::now()).num_milliseconds().max(0) as u64;
    // Round up so we never wake before the server's deadline
    Some(remaining.div_ceil(1000))
}

/// Sleeps `total_secs` seconds while printing a one-line countdown on stdout.
pub async fn countdown(total_secs: u64) {
    println!();
    println!("{}", format!("Retrying in {total_secs} s").bright_yellow());

    for remaining in (1..=total_secs).rev() {
        print!("\r{remaining:3} seconds remaining.");
        // The line has no newline; a failed flush only delays the redraw
        io::stdout().flush().ok();
        sleep(Duration::from_secs(1)).await;
    }

    println!();
}
