//! The template commit body.
//!
//! Every wrapper commit and the metadata commit share one envelope: the
//! bytes of a commit object after its `tree`/`parent` lines. Wrapper ids are
//! therefore a pure function of the encrypted payload graph, which is what
//! makes re-encryption deterministic. The serialization below must match
//! git's own byte-for-byte; a divergence changes every wrapper id.

use git2::Time;

/// Render an identity line body: `Name <email> 1234567890 +0000`.
fn format_ident(name: &str, email: &str, time: &Time) -> String {
    let sign = if time.offset_minutes() < 0 { '-' } else { '+' };
    let offset = time.offset_minutes().abs();
    format!(
        "{} <{}> {} {}{:02}{:02}",
        name,
        email,
        time.seconds(),
        sign,
        offset / 60,
        offset % 60
    )
}

/// Build the template body: author and committer lines, a blank separator,
/// and the message. Multiple message paragraphs join with blank lines, like
/// repeated `-m` flags.
pub fn build(name: &str, email: &str, time: &Time, messages: &[String]) -> String {
    let ident = format_ident(name, email, time);
    let mut message = messages.join("\n\n");
    if messages.is_empty() {
        message = "incrypt".to_string();
    }
    format!("author {ident}\ncommitter {ident}\n\n{message}\n")
}

/// Parse a `-d` style date: `<epoch> <±HHMM>` or a bare epoch (UTC).
pub fn parse_date(date: &str) -> Option<Time> {
    let mut parts = date.split_whitespace();
    let seconds: i64 = parts.next()?.parse().ok()?;
    let offset = match parts.next() {
        None => 0,
        Some(zone) => {
            let sign = match zone.as_bytes().first()? {
                b'+' => 1,
                b'-' => -1,
                _ => return None,
            };
            let digits = &zone[1..];
            if digits.len() != 4 {
                return None;
            }
            let hours: i32 = digits[..2].parse().ok()?;
            let minutes: i32 = digits[2..].parse().ok()?;
            sign * (hours * 60 + minutes)
        }
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Time::new(seconds, offset))
}
