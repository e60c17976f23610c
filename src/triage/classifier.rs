use serde::Serialize;

use super::rules::{duration_days, DANGER_RULES, FEVER, MILD, SEVERE_HEADACHE};
use crate::models::enums::{AgeGroup, CallbackPriority, RiskCode, Urgency};
use crate::models::TriageSubmission;

/// Fever lasting at least this many days is escalated.
const PROLONGED_FEVER_DAYS: u32 = 3;

/// Advice shown when no automated risk call could be made.
const UNCLASSIFIED_ADVICE: &str = "A health worker will review your case.";

/// Outcome of classifying one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub urgency: Urgency,
    pub risk_code: Option<RiskCode>,
    pub advice: &'static str,
    /// Names of every rule that fired, in evaluation order.
    pub matched_rules: Vec<&'static str>,
}

impl Assessment {
    pub fn callback_priority(&self) -> CallbackPriority {
        CallbackPriority::from_urgency(self.urgency)
    }
}

/// Running maximum over every rule that matched.
struct Verdict {
    urgency: Option<Urgency>,
    risk: Option<RiskCode>,
    matched: Vec<&'static str>,
}

impl Verdict {
    fn new() -> Self {
        Self {
            urgency: None,
            risk: None,
            matched: Vec::new(),
        }
    }

    fn hit(&mut self, name: &'static str, urgency: Urgency, risk: RiskCode) {
        self.urgency = self.urgency.max(Some(urgency));
        self.risk = self.risk.max(Some(risk));
        self.matched.push(name);
    }
}

/// Classify a validated submission.
///
/// Every rule is evaluated independently and the result is the maximum
/// severity across all matches, so more symptoms can only raise urgency.
/// Low-bandwidth channels are floored at medium because the patient has
/// no other way to reach a provider.
pub fn classify(submission: &TriageSubmission) -> Assessment {
    let text = narrative(submission);
    let flags = submission.symptom_flags.unwrap_or_default();
    let mut verdict = Verdict::new();

    let danger_flag = flags.danger_sign;
    if danger_flag {
        verdict.hit("danger_sign", Urgency::Critical, RiskCode::Emergency);
    }
    for rule in DANGER_RULES.iter() {
        if rule.regex.is_match(&text) {
            verdict.hit(rule.name, rule.urgency, rule.risk);
        }
    }

    let fever = flags.fever || FEVER.regex.is_match(&text);
    if fever {
        verdict.hit(FEVER.name, FEVER.urgency, FEVER.risk);

        if flags.severe_headache || SEVERE_HEADACHE.is_match(&text) {
            verdict.hit("fever_with_severe_headache", Urgency::High, RiskCode::MalariaSuspect);
        }
        if submission.effective_age_group() == Some(AgeGroup::Under5) {
            verdict.hit("fever_under_five", Urgency::High, RiskCode::MalariaSuspect);
        }
        let prolonged = submission
            .duration
            .as_deref()
            .and_then(duration_days)
            .or_else(|| duration_days(&text))
            .is_some_and(|days| days >= PROLONGED_FEVER_DAYS);
        if prolonged {
            verdict.hit("prolonged_fever", Urgency::High, RiskCode::MalariaSuspect);
        }
    }

    if flags.cough || flags.severe_headache {
        verdict.hit("reported_symptoms", Urgency::Low, RiskCode::LowRisk);
    }
    if MILD.regex.is_match(&text) {
        verdict.hit(MILD.name, MILD.urgency, MILD.risk);
    }

    // Structured menu answers are evidence even when every answer was "no".
    if verdict.risk.is_none() && submission.symptom_flags.is_some() {
        verdict.risk = Some(RiskCode::LowRisk);
    }

    let mut urgency = verdict.urgency.unwrap_or(Urgency::Low);
    if submission.channel.is_low_bandwidth() && urgency < Urgency::Medium {
        urgency = Urgency::Medium;
        verdict.matched.push("low_bandwidth_channel");
    }

    Assessment {
        urgency,
        risk_code: verdict.risk,
        advice: verdict.risk.map(RiskCode::advice).unwrap_or(UNCLASSIFIED_ADVICE),
        matched_rules: verdict.matched,
    }
}

/// Whether this case must be turned into live callback work.
///
/// High-risk cases always are. Low-bandwidth channels are unless the
/// patient declined; any channel is when the patient asked for one.
pub fn requires_callback(submission: &TriageSubmission, assessment: &Assessment) -> bool {
    if assessment.urgency >= Urgency::High {
        return true;
    }
    match submission.callback_requested {
        Some(requested) => requested,
        None => submission.channel.is_low_bandwidth(),
    }
}

fn narrative(submission: &TriageSubmission) -> String {
    match &submission.symptoms {
        Some(symptoms) => format!("{}\n{}", submission.chief_complaint, symptoms),
        None => submission.chief_complaint.clone(),
    }
}
