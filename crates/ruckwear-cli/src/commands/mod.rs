pub mod config;
pub mod history;
pub mod session;
pub mod stats;
pub mod sync;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use ruckwear_core::record::{DateRange, SessionTag, TagKind};

/// `--since` / `--until` flags shared by history and stats.
#[derive(Args, Debug, Default)]
pub struct RangeArgs {
    /// Earliest start, as YYYY-MM-DD or RFC 3339
    #[arg(long)]
    pub since: Option<String>,
    /// Latest start, as YYYY-MM-DD (whole day included) or RFC 3339
    #[arg(long)]
    pub until: Option<String>,
}

impl RangeArgs {
    pub fn to_range(&self) -> Result<Option<DateRange>, String> {
        if self.since.is_none() && self.until.is_none() {
            return Ok(None);
        }
        Ok(Some(DateRange {
            from: self.since.as_deref().map(|s| parse_bound(s, false)).transpose()?,
            until: self.until.as_deref().map(|s| parse_bound(s, true)).transpose()?,
        }))
    }
}

/// A bare date covers the whole day: midnight for a lower bound, the last
/// second for an upper one.
fn parse_bound(input: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{input}', expected YYYY-MM-DD or RFC 3339"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| "invalid time of day".to_string())?;
    Ok(date.and_time(time).and_utc())
}

/// `--program` / `--challenge` pair; at most one may be given.
#[derive(Args, Debug)]
pub struct TagArgs {
    #[arg(long, conflicts_with = "challenge")]
    pub program: Option<String>,
    #[arg(long)]
    pub challenge: Option<String>,
}

impl TagArgs {
    /// The chosen kind and collection id.
    pub fn collection(&self) -> Result<(TagKind, &str), String> {
        match (&self.program, &self.challenge) {
            (Some(id), None) => Ok((TagKind::Program, id)),
            (None, Some(id)) => Ok((TagKind::Challenge, id)),
            _ => Err("pass exactly one of --program or --challenge".into()),
        }
    }

    /// Parse `ID:DAY` into a session tag, if either flag was given.
    pub fn session_tag(&self) -> Result<Option<SessionTag>, String> {
        if self.program.is_none() && self.challenge.is_none() {
            return Ok(None);
        }
        let (kind, raw) = self.collection()?;
        let (id, day) = raw
            .rsplit_once(':')
            .ok_or_else(|| format!("expected ID:DAY, got '{raw}'"))?;
        let day: u32 = day
            .parse()
            .map_err(|_| format!("invalid day '{day}' in '{raw}'"))?;
        if id.is_empty() {
            return Err(format!("missing collection id in '{raw}'"));
        }
        Ok(Some(SessionTag {
            kind,
            collection_id: id.to_string(),
            day,
        }))
    }
}
