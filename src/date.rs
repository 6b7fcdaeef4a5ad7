use std::fmt;
use std::str::FromStr;
use time::{Date, Month};

/// Simple "YYYY-MM" period with ordering; one archive covers exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct YearMonth {
    pub year: u16,
    pub month: u8, // 1..=12
}

impl YearMonth {
    pub fn new(year: u16, month: u8) -> Self {
        assert!((1..=12).contains(&month), "Month must be 1..=12");
        Self { year, month }
    }

    /// Checked constructor for values coming from filenames or CSV input.
    pub fn try_new(year: u16, month: u8) -> Option<Self> {
        if (1..=12).contains(&month) { Some(Self { year, month }) } else { None }
    }

    pub fn next(self) -> Option<Self> {
        if self.month < 12 {
            Some(Self { year: self.year, month: self.month + 1 })
        } else if self.year < u16::MAX {
            Some(Self { year: self.year + 1, month: 1 })
        } else {
            None
        }
    }

    /// Epoch seconds of the first second of this month, UTC.
    pub fn start_epoch(self) -> i64 {
        first_second(self.year as i32, self.month)
    }

    /// Inclusive `[start, end]` epoch window covering the whole month in UTC.
    /// `end` is one second before the first second of the following month.
    pub fn utc_window(self) -> (i64, i64) {
        let start = self.start_epoch();
        let next_start = match self.next() {
            Some(n) => n.start_epoch(),
            None => first_second(self.year as i32 + 1, 1),
        };
        (start, next_start - 1)
    }

    /// `comment_count_YYYY_MM`, the companion month-total table name.
    pub fn table_suffix(self) -> String {
        format!("{:04}_{:02}", self.year, self.month)
    }
}

fn first_second(year: i32, month: u8) -> i64 {
    // month is validated by every constructor, so this only fails for absurd years
    let month = Month::try_from(month).unwrap_or(Month::January);
    match Date::from_calendar_date(year, month, 1) {
        Ok(d) => d.midnight().assume_utc().unix_timestamp(),
        Err(_) => i64::MAX,
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s.trim().split_once('-').ok_or("expected YYYY-MM")?;
        let year: u16 = y.parse().map_err(|_| "invalid year")?;
        let month: u8 = m.parse().map_err(|_| "invalid month")?;
        Self::try_new(year, month).ok_or_else(|| "month must be 01..12".into())
    }
}
