//! Heuristic parser for FTP `LIST` output
//!
//! The protocol does not define a format for detailed directory listings. Servers in practice
//! emit one of two shapes (examples from <http://cr.yp.to/ftpparse.html>):
//!
//! ```text
//! -rw-r--r--   1 root     other        531 Jan 29 03:26 README
//! dr-xr-xr-x   2 root     other        512 Apr  8  1994 etc
//! lrwxrwxrwx   1 root     other          7 Jan 25 00:17 bin -> usr/bin
//! ```
//!
//! ```text
//! 04-27-00  09:09PM       <DIR>          licensed
//! 04-14-00  03:47PM                  589 readme.htm
//! ```
//!
//! A batch of lines is classified once by [`ListingStyle::detect`]: the lines are scanned in
//! order and the first one that looks like either style decides for the whole batch. Mixed
//! batches are not supported; a header line that happens to match the other style wins if it
//! comes first.
//!
//! # Timestamps
//!
//! Listings carry no timezone and Unix-style lines drop either the year or the time of day.
//! Times are taken as UTC. A `Mon DD HH:MM` timestamp is placed in the current year, or the
//! previous one when that would put it more than a day in the future (the convention `ls`
//! uses when printing it). When a timestamp cannot be parsed at all the caller decides: fail
//! with [`Error::UnparseableTimestamp`] or substitute the current time.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};

use crate::entry::{self, Attributes, Entry, EntryKind};
use crate::error::Error;

static UNIX_STYLE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[d\-](?:[r\-][w\-][x\-]){3}").expect("valid unix listing pattern")
});
static WINDOWS_STYLE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"[0-9][0-9]-[0-9][0-9]-[0-9][0-9]").expect("valid windows listing pattern")
});

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStyle {
    Unix,
    Windows,
}

impl ListingStyle {
    /// Pick the parsing strategy for a whole batch from the first line that matches either style.
    pub fn detect<S: AsRef<str>>(lines: &[S]) -> Result<Self, Error> {
        for line in lines {
            let line = line.as_ref();
            if UNIX_STYLE.is_match(line) {
                return Ok(ListingStyle::Unix);
            }
            if WINDOWS_STYLE.is_match(line) {
                return Ok(ListingStyle::Windows);
            }
        }
        Err(Error::UnrecognizedListingFormat {
            line: lines
                .first()
                .map(|line| line.as_ref().to_string())
                .unwrap_or_default(),
        })
    }

    /// Parse one line listed from `base_path`. Returns `None` for the `.` and `..` entries.
    pub fn parse_line(
        self,
        line: &str,
        base_path: &str,
        tolerate_date_errors: bool,
    ) -> Result<Option<Entry>, Error> {
        match self {
            ListingStyle::Unix => parse_unix_line(line, base_path, tolerate_date_errors),
            ListingStyle::Windows => parse_windows_line(line, base_path, tolerate_date_errors),
        }
    }
}

/// Raw lines returned by one "list directory" call, relative to `base_path`.
#[derive(Debug, Clone)]
pub struct ListingBatch {
    pub base_path: String,
    pub lines: Vec<String>,
}

impl ListingBatch {
    pub fn new(base_path: &str, lines: Vec<String>) -> Self {
        Self {
            base_path: base_path.to_string(),
            lines,
        }
    }

    pub fn parse(&self, tolerate_date_errors: bool) -> Result<Vec<Entry>, Error> {
        parse_listing(&self.lines, &self.base_path, tolerate_date_errors)
    }
}

/// Parse a complete listing. Blank lines are ignored; an empty listing yields no entries
/// without running format detection.
pub fn parse_listing<S: AsRef<str>>(
    lines: &[S],
    base_path: &str,
    tolerate_date_errors: bool,
) -> Result<Vec<Entry>, Error> {
    let lines: Vec<&str> = lines
        .iter()
        .map(|line| line.as_ref().trim_end_matches(['\r', '\n']))
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    let style = ListingStyle::detect(&lines)?;
    tracing::trace!("listing of {:?} detected as {:?}", base_path, style);
    let mut entries = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(entry) = style.parse_line(line, base_path, tolerate_date_errors)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Split on runs of blanks into at most `max` fields; the last field keeps the rest of the line
/// including any embedded blanks.
fn split_fields(line: &str, max: usize) -> Vec<&str> {
    let mut fields = Vec::with_capacity(max);
    let mut rest = line.trim_start_matches(is_blank);
    while !rest.is_empty() {
        if fields.len() + 1 == max {
            fields.push(rest);
            break;
        }
        let end = rest.find(is_blank).unwrap_or(rest.len());
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start_matches(is_blank);
    }
    fields
}

fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}

fn resolve_timestamp(
    parsed: Option<DateTime<Utc>>,
    fragment: String,
    line: &str,
    tolerate_date_errors: bool,
) -> Result<DateTime<Utc>, Error> {
    match parsed {
        Some(timestamp) => Ok(timestamp),
        None if tolerate_date_errors => {
            tracing::debug!(
                "cannot parse {:?} from {:?} as a date, using current time",
                fragment,
                line
            );
            Ok(Utc::now())
        }
        None => Err(Error::UnparseableTimestamp {
            fragment,
            line: line.to_string(),
        }),
    }
}

fn malformed(line: &str, reason: impl Into<String>) -> Error {
    Error::MalformedListingLine {
        line: line.to_string(),
        reason: reason.into(),
    }
}

fn parse_windows_line(
    line: &str,
    base_path: &str,
    tolerate_date_errors: bool,
) -> Result<Option<Entry>, Error> {
    let fields = split_fields(line, 4);
    if fields.len() < 4 {
        return Err(malformed(line, "expected date, time, size and name"));
    }
    let (date, time, size_or_dir, name) = (fields[0], fields[1], fields[2], fields[3]);
    if is_dot_entry(name) {
        return Ok(None);
    }
    let last_modified = resolve_timestamp(
        parse_windows_timestamp(date, time),
        format!("{date} {time}"),
        line,
        tolerate_date_errors,
    )?;
    let full_path = entry::join(base_path, name);
    let kind = if size_or_dir.eq_ignore_ascii_case("<DIR>") {
        EntryKind::Directory
    } else {
        let size = size_or_dir
            .parse::<u64>()
            .map_err(|err| malformed(line, format!("invalid size {size_or_dir:?}: {err}")))?;
        EntryKind::File { size }
    };
    Ok(Some(Entry {
        full_path,
        last_modified,
        kind,
        attributes: Attributes::default(),
    }))
}

fn parse_unix_line(
    line: &str,
    base_path: &str,
    tolerate_date_errors: bool,
) -> Result<Option<Entry>, Error> {
    let fields = split_fields(line, 9);
    if fields.len() < 9 {
        return Err(malformed(
            line,
            "expected permissions, links, owner, group, size, date and name",
        ));
    }
    let permissions = fields[0];
    let name = fields[8];
    let link_name = name.split_once(" -> ").map_or(name, |(link, _)| link);
    if is_dot_entry(name) || is_dot_entry(link_name) {
        return Ok(None);
    }
    let (month, day, time_or_year) = (fields[5], fields[6], fields[7]);
    let last_modified = resolve_timestamp(
        parse_unix_timestamp(month, day, time_or_year, Utc::now()),
        format!("{month} {day} {time_or_year}"),
        line,
        tolerate_date_errors,
    )?;
    let attributes = Attributes {
        hidden: name.starts_with('.'),
        read_only: !permissions.contains('w'),
    };
    let mut full_path = entry::join(base_path, name);
    if permissions.starts_with('l')
        && let Some((_, target)) = name.split_once(" -> ")
    {
        full_path = entry::join(base_path, target);
    }
    let kind = if permissions.starts_with('d') {
        EntryKind::Directory
    } else {
        let size = fields[4]
            .parse::<u64>()
            .map_err(|err| malformed(line, format!("invalid size {:?}: {err}", fields[4])))?;
        EntryKind::File { size }
    };
    Ok(Some(Entry {
        full_path,
        last_modified,
        kind,
        attributes,
    }))
}

fn parse_clock(time: &str) -> Option<(u32, u32)> {
    let (hour, minute) = time.split_once(':')?;
    Some((hour.parse().ok()?, minute.parse().ok()?))
}

/// `MM-DD-YY` or `MM-DD-YYYY` followed by `hh:mmAM`/`hh:mmPM` or 24-hour `HH:MM`.
fn parse_windows_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let mut parts = date.split('-');
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let year_token = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let year: i32 = year_token.parse().ok()?;
    let year = match year_token.len() {
        2 if year < 70 => 2000 + year,
        2 => 1900 + year,
        4 => year,
        _ => return None,
    };
    let upper = time.to_ascii_uppercase();
    let (clock, meridiem) = if let Some(clock) = upper.strip_suffix("AM") {
        (clock, Some(false))
    } else if let Some(clock) = upper.strip_suffix("PM") {
        (clock, Some(true))
    } else {
        (upper.as_str(), None)
    };
    let (hour, minute) = parse_clock(clock)?;
    let hour = match meridiem {
        None => hour,
        Some(_) if !(1..=12).contains(&hour) => return None,
        Some(false) => hour % 12,
        Some(true) => hour % 12 + 12,
    };
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(naive.and_utc())
}

fn parse_month(month: &str) -> Option<u32> {
    let month = month.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|name| *name == month)
        .and_then(|idx| u32::try_from(idx + 1).ok())
}

/// `Mon DD YYYY` or `Mon DD HH:MM`; the latter is resolved against `now`.
fn parse_unix_timestamp(
    month: &str,
    day: &str,
    time_or_year: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let month = parse_month(month)?;
    let day: u32 = day.parse().ok()?;
    if let Some((hour, minute)) = parse_clock(time_or_year) {
        let in_year = |year: i32| {
            NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| date.and_hms_opt(hour, minute, 0))
                .map(|naive| naive.and_utc())
        };
        return match in_year(now.year()) {
            Some(timestamp) if timestamp <= now + TimeDelta::days(1) => Some(timestamp),
            _ => in_year(now.year() - 1),
        };
    }
    let year: i32 = time_or_year.parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some(naive.and_utc())
}
