use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::enums::{AgeGroup, Channel};

/// Oldest plausible patient age accepted at intake.
const MAX_PATIENT_AGE: u8 = 130;

/// Structured yes/no answers from the feature-phone symptom menu.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomFlags {
    #[serde(default)]
    pub fever: bool,
    #[serde(default)]
    pub severe_headache: bool,
    #[serde(default)]
    pub danger_sign: bool,
    #[serde(default)]
    pub cough: bool,
}

/// Submission as handed over by a gateway or the web form. Every field is
/// optional on the wire so that missing data surfaces as a validation
/// error instead of a decoding failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionRequest {
    pub channel: Option<String>,
    pub chief_complaint: Option<String>,
    pub patient_name: Option<String>,
    pub msisdn: Option<String>,
    pub patient_age: Option<u8>,
    pub age_group: Option<String>,
    pub patient_gender: Option<String>,
    pub symptoms: Option<String>,
    pub duration: Option<String>,
    pub medical_history: Option<String>,
    pub symptom_flags: Option<SymptomFlags>,
    pub consent: Option<bool>,
    pub callback_requested: Option<bool>,
}

/// A submission that passed intake validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageSubmission {
    pub channel: Channel,
    pub chief_complaint: String,
    pub patient_name: Option<String>,
    /// Raw caller number. Hashed before anything is persisted.
    pub msisdn: Option<String>,
    pub patient_age: Option<u8>,
    pub age_group: Option<AgeGroup>,
    pub patient_gender: Option<String>,
    pub symptoms: Option<String>,
    pub duration: Option<String>,
    pub medical_history: Option<String>,
    pub symptom_flags: Option<SymptomFlags>,
    pub consent: Option<bool>,
    pub callback_requested: Option<bool>,
}

impl TriageSubmission {
    /// Minimal submission for a channel and complaint. Optional fields start empty.
    pub fn new(channel: Channel, chief_complaint: impl Into<String>) -> Self {
        Self {
            channel,
            chief_complaint: chief_complaint.into(),
            patient_name: None,
            msisdn: None,
            patient_age: None,
            age_group: None,
            patient_gender: None,
            symptoms: None,
            duration: None,
            medical_history: None,
            symptom_flags: None,
            consent: None,
            callback_requested: None,
        }
    }

    /// Age group as reported, or derived from the exact age.
    pub fn effective_age_group(&self) -> Option<AgeGroup> {
        self.age_group.or(self.patient_age.map(AgeGroup::from_age))
    }
}

impl TryFrom<SubmissionRequest> for TriageSubmission {
    type Error = String;

    fn try_from(req: SubmissionRequest) -> Result<Self, Self::Error> {
        let channel = match non_blank(req.channel) {
            Some(raw) => Channel::from_str(&raw.to_ascii_lowercase())
                .map_err(|_| format!("Unknown channel: {raw}"))?,
            None => return Err("channel is required".into()),
        };
        let chief_complaint =
            non_blank(req.chief_complaint).ok_or("chief_complaint is required")?;

        if let Some(age) = req.patient_age {
            if age > MAX_PATIENT_AGE {
                return Err(format!("patient_age out of range: {age}"));
            }
        }
        let age_group = match non_blank(req.age_group) {
            Some(raw) => Some(
                AgeGroup::from_str(&raw).map_err(|_| format!("Unknown age_group: {raw}"))?,
            ),
            None => None,
        };
        let msisdn = match non_blank(req.msisdn) {
            Some(raw) => Some(normalize_msisdn(&raw)?),
            None => None,
        };

        Ok(TriageSubmission {
            patient_name: non_blank(req.patient_name),
            msisdn,
            patient_age: req.patient_age,
            age_group,
            patient_gender: non_blank(req.patient_gender),
            symptoms: non_blank(req.symptoms),
            duration: non_blank(req.duration),
            medical_history: non_blank(req.medical_history),
            symptom_flags: req.symptom_flags,
            consent: req.consent,
            callback_requested: req.callback_requested,
            ..TriageSubmission::new(channel, chief_complaint)
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Strip formatting from a phone number and check it looks like an E.164 MSISDN.
pub fn normalize_msisdn(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("msisdn is not a valid phone number".into());
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SubmissionRequest {
        SubmissionRequest {
            channel: Some("USSD".into()),
            chief_complaint: Some("  high fever ".into()),
            msisdn: Some("+234 803-123-4567".into()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_request_is_normalized() {
        let sub = TriageSubmission::try_from(request()).unwrap();
        assert_eq!(sub.channel, Channel::Ussd);
        assert_eq!(sub.chief_complaint, "high fever");
        assert_eq!(sub.msisdn.as_deref(), Some("+2348031234567"));
    }

    #[test]
    fn missing_complaint_is_rejected() {
        let mut req = request();
        req.chief_complaint = Some("   ".into());
        let err = TriageSubmission::try_from(req).unwrap_err();
        assert!(err.contains("chief_complaint"));
    }

    #[test]
    fn missing_or_unknown_channel_is_rejected() {
        let mut req = request();
        req.channel = None;
        assert!(TriageSubmission::try_from(req).is_err());

        let mut req = request();
        req.channel = Some("fax".into());
        assert!(TriageSubmission::try_from(req).unwrap_err().contains("fax"));
    }

    #[test]
    fn bad_msisdn_is_rejected() {
        let mut req = request();
        req.msisdn = Some("12ab".into());
        assert!(TriageSubmission::try_from(req).is_err());
    }

    #[test]
    fn age_group_derived_from_age() {
        let mut sub = TriageSubmission::new(Channel::Web, "fever");
        sub.patient_age = Some(3);
        assert_eq!(sub.effective_age_group(), Some(AgeGroup::Under5));
        sub.age_group = Some(AgeGroup::Age18To49);
        assert_eq!(sub.effective_age_group(), Some(AgeGroup::Age18To49));
    }
}
