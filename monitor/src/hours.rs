use anyhow::bail;
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Deserializer};

/// Exchange session window. Live cycles only run while it is open.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TradingHours {
    /// When false the market is treated as always open.
    pub enabled: bool,
    pub utc_offset_hours: i32,
    #[serde(deserialize_with = "de_hhmm")]
    pub open: NaiveTime,
    #[serde(deserialize_with = "de_hhmm")]
    pub close: NaiveTime,
    pub days: Vec<Weekday>,
}

impl Default for TradingHours {
    /// Moscow Exchange main session.
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_hours: 3,
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(18, 45, 0).unwrap_or_default(),
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
        }
    }
}

impl TradingHours {
    pub fn always_open() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(offset) = FixedOffset::east_opt(self.utc_offset_hours * 3_600) else {
            return false;
        };

        let local = now.with_timezone(&offset);
        if !self.days.contains(&local.weekday()) {
            return false;
        }

        let t = local.time();
        t >= self.open && t <= self.close
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            bail!("trading_hours.utc_offset_hours out of range");
        }
        if self.enabled && self.open >= self.close {
            bail!("trading_hours.open must be before close");
        }
        Ok(())
    }
}

fn de_hhmm<'de, D>(de: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(de)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(serde::de::Error::custom)
}
