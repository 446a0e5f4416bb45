use crate::schedule::model::ScheduleId;

/// Key families living in the shared store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyNamespace {
    /// Versioned campaign-level spend counter.
    SpentTotalV1,
    /// Versioned ad-set-level spend counter, reset daily.
    SpentDailyV1,
    /// Pre-migration JSON record holding both counters.
    LegacySpentBudgets,
    /// Cached candidate schedule.
    CandidateV1,
}

impl KeyNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyNamespace::SpentTotalV1 => "spentTotalBudget_v1:schedule:",
            KeyNamespace::SpentDailyV1 => "spentDailyBudget_v1:schedule:",
            KeyNamespace::LegacySpentBudgets => "spentBudgets:schedule:",
            KeyNamespace::CandidateV1 => "candidate:schedule:",
        }
    }

    pub fn key(&self, id: ScheduleId) -> String {
        format!("{}{id}", self.prefix())
    }

    /// Schedule id encoded in `key`, if it belongs to this namespace.
    pub fn parse_id(&self, key: &str) -> Option<ScheduleId> {
        key.strip_prefix(self.prefix())?.parse().ok()
    }
}
