use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    /// In the catalog, outside the active set; promoted when an active source is replaced.
    Standby,
    Cooldown,
    Replaced,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Standby => "standby",
            SourceStatus::Cooldown => "cooldown",
            SourceStatus::Replaced => "replaced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SourceStatus::Active),
            "standby" => Some(SourceStatus::Standby),
            "cooldown" => Some(SourceStatus::Cooldown),
            "replaced" => Some(SourceStatus::Replaced),
            _ => None,
        }
    }
}

/// Reliability record of one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub endpoint: String,
    /// Smoothed success rate in [0, 1].
    pub reliability: f64,
    pub consecutive_failures: u32,
    pub probation_failures: u32,
    pub last_success_ms: Option<u64>,
    pub cooldown_until_ms: u64,
    pub status: SourceStatus,
}

impl Source {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, prior: f64) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            reliability: prior.clamp(0.0, 1.0),
            consecutive_failures: 0,
            probation_failures: 0,
            last_success_ms: None,
            cooldown_until_ms: 0,
            status: SourceStatus::Standby,
        }
    }

    /// May be polled at `now_ms`: active, or cooling down with the cooldown expired.
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        match self.status {
            SourceStatus::Active => true,
            SourceStatus::Cooldown => now_ms >= self.cooldown_until_ms,
            SourceStatus::Standby | SourceStatus::Replaced => false,
        }
    }

    /// `score = alpha * outcome + (1 - alpha) * score`, clamped to [0, 1].
    pub fn record_outcome(&mut self, success: bool, alpha: f64) {
        let outcome = if success { 1.0 } else { 0.0 };
        let next = alpha * outcome + (1.0 - alpha) * self.reliability;
        self.reliability = if next.is_finite() {
            next.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_moves_towards_outcome() {
        let mut s = Source::new("a", "x", 0.5);
        s.record_outcome(true, 0.2);
        assert!((s.reliability - 0.6).abs() < 1e-12);
        s.record_outcome(false, 0.2);
        assert!((s.reliability - 0.48).abs() < 1e-12);
    }

    #[test]
    fn prior_is_clamped() {
        assert_eq!(Source::new("a", "x", 1.7).reliability, 1.0);
        assert_eq!(Source::new("a", "x", -0.1).reliability, 0.0);
    }

    #[test]
    fn cooldown_eligibility_follows_clock() {
        let mut s = Source::new("a", "x", 0.5);
        assert!(!s.is_eligible(0));

        s.status = SourceStatus::Cooldown;
        s.cooldown_until_ms = 1_000;
        assert!(!s.is_eligible(999));
        assert!(s.is_eligible(1_000));
    }

    #[test]
    fn status_round_trips_through_str() {
        for st in [
            SourceStatus::Active,
            SourceStatus::Standby,
            SourceStatus::Cooldown,
            SourceStatus::Replaced,
        ] {
            assert_eq!(SourceStatus::parse(st.as_str()), Some(st));
        }
    }
}
