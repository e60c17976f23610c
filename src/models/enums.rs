use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
///
/// Variants are declared in ascending order, so the derived `Ord` ranks
/// severity-like enums (urgency, priority, risk) from mildest to most severe.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(EncounterStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Closed => "closed",
});

str_enum!(Urgency {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

str_enum!(Channel {
    Web => "web",
    Ussd => "ussd",
    Sms => "sms",
    Whatsapp => "whatsapp",
    Ivr => "ivr",
});

str_enum!(RiskCode {
    LowRisk => "low_risk",
    FeverGeneral => "fever_general",
    MalariaSuspect => "malaria_suspect",
    Emergency => "emergency",
});

str_enum!(CallbackPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

str_enum!(CallbackStatus {
    Queued => "queued",
    InProgress => "in_progress",
    Done => "done",
    Failed => "failed",
});

str_enum!(FailureReason {
    Unreachable => "unreachable",
    Unsuccessful => "unsuccessful",
    Abandoned => "abandoned",
});

str_enum!(CompletionKind {
    Reached => "reached",
    Unreachable => "unreachable",
    Unsuccessful => "unsuccessful",
});

str_enum!(AgeGroup {
    Under5 => "<5",
    Age5To17 => "5-17",
    Age18To49 => "18-49",
    Age50Plus => "50+",
});

str_enum!(ProviderRole {
    Doctor => "doctor",
    Nurse => "nurse",
    Chw => "chw",
    Admin => "admin",
});

impl EncounterStatus {
    /// Whether a provider may move an encounter from `self` to `next`.
    pub fn can_transition_to(self, next: EncounterStatus) -> bool {
        use EncounterStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Pending, InProgress) | (InProgress, Completed) | (InProgress, Pending) => true,
            (a, b) => a == b,
        }
    }
}

impl Channel {
    /// Feature-phone channels where the patient has no synchronous path to a
    /// provider and must be called back.
    pub fn is_low_bandwidth(self) -> bool {
        matches!(self, Channel::Ussd | Channel::Sms | Channel::Ivr)
    }
}

impl RiskCode {
    pub fn advice(self) -> &'static str {
        match self {
            RiskCode::Emergency => "Emergency: nearest clinic now.",
            RiskCode::MalariaSuspect => "Possible malaria: visit PHC soon.",
            RiskCode::FeverGeneral => "Monitor; visit PHC if persists.",
            RiskCode::LowRisk => "Low risk. Rest and monitor.",
        }
    }
}

impl CallbackPriority {
    pub fn from_urgency(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Critical => CallbackPriority::Urgent,
            Urgency::High => CallbackPriority::High,
            Urgency::Medium => CallbackPriority::Medium,
            Urgency::Low => CallbackPriority::Low,
        }
    }
}

impl CallbackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallbackStatus::Done | CallbackStatus::Failed)
    }

    /// Queued or in progress: the encounter still has open follow-up work.
    pub fn is_unresolved(self) -> bool {
        !self.is_terminal()
    }

    /// States in which a provider id must be recorded.
    pub fn holds_provider(self) -> bool {
        !matches!(self, CallbackStatus::Queued)
    }
}

impl CompletionKind {
    pub fn terminal_status(self) -> (CallbackStatus, Option<FailureReason>) {
        match self {
            CompletionKind::Reached => (CallbackStatus::Done, None),
            CompletionKind::Unreachable => {
                (CallbackStatus::Failed, Some(FailureReason::Unreachable))
            }
            CompletionKind::Unsuccessful => {
                (CallbackStatus::Failed, Some(FailureReason::Unsuccessful))
            }
        }
    }
}

impl AgeGroup {
    pub fn from_age(age: u8) -> Self {
        match age {
            0..=4 => AgeGroup::Under5,
            5..=17 => AgeGroup::Age5To17,
            18..=49 => AgeGroup::Age18To49,
            _ => AgeGroup::Age50Plus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn callback_status_round_trip() {
        for (variant, s) in [
            (CallbackStatus::Queued, "queued"),
            (CallbackStatus::InProgress, "in_progress"),
            (CallbackStatus::Done, "done"),
            (CallbackStatus::Failed, "failed"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(CallbackStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn age_group_uses_menu_labels() {
        assert_eq!(AgeGroup::Under5.as_str(), "<5");
        assert_eq!(AgeGroup::from_str("50+").unwrap(), AgeGroup::Age50Plus);
        let json = serde_json::to_string(&AgeGroup::Age5To17).unwrap();
        assert_eq!(json, "\"5-17\"");
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&CallbackStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let risk: RiskCode = serde_json::from_str("\"malaria_suspect\"").unwrap();
        assert_eq!(risk, RiskCode::MalariaSuspect);
    }

    #[test]
    fn priority_ordering_is_by_severity() {
        assert!(CallbackPriority::Urgent > CallbackPriority::High);
        assert!(CallbackPriority::High > CallbackPriority::Medium);
        assert!(CallbackPriority::Medium > CallbackPriority::Low);
        assert!(Urgency::Critical > Urgency::High);
        assert!(RiskCode::Emergency > RiskCode::MalariaSuspect);
        assert!(RiskCode::FeverGeneral > RiskCode::LowRisk);
    }

    #[test]
    fn priority_follows_urgency() {
        assert_eq!(CallbackPriority::from_urgency(Urgency::Critical), CallbackPriority::Urgent);
        assert_eq!(CallbackPriority::from_urgency(Urgency::High), CallbackPriority::High);
        assert_eq!(CallbackPriority::from_urgency(Urgency::Medium), CallbackPriority::Medium);
        assert_eq!(CallbackPriority::from_urgency(Urgency::Low), CallbackPriority::Low);
    }

    #[test]
    fn encounter_status_transitions() {
        use EncounterStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn low_bandwidth_channels() {
        assert!(Channel::Ussd.is_low_bandwidth());
        assert!(Channel::Sms.is_low_bandwidth());
        assert!(!Channel::Web.is_low_bandwidth());
        assert!(!Channel::Whatsapp.is_low_bandwidth());
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(CallbackPriority::from_str("critical").is_err());
        assert!(Channel::from_str("fax").is_err());
        assert!(Urgency::from_str("").is_err());
    }
}
