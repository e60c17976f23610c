use std::sync::LazyLock;

use regex::Regex;

use crate::models::enums::{RiskCode, Urgency};

/// A compiled symptom pattern with the severity it implies on its own.
pub(crate) struct KeywordRule {
    pub name: &'static str,
    pub regex: Regex,
    pub urgency: Urgency,
    pub risk: RiskCode,
}

/// Danger signs: any one of these is an emergency regardless of anything else.
pub(crate) static DANGER_RULES: LazyLock<Vec<KeywordRule>> = LazyLock::new(|| {
    vec![
        danger("convulsions", r"(?i)\b(?:convuls\w*|seizures?|fits|fitting)\b"),
        danger("unconscious", r"(?i)\b(?:unconscious\w*|unresponsive|coma|fainted|collapsed?)\b"),
        danger(
            "breathing_difficulty",
            r"(?i)\b(?:not\s+breathing|difficult(?:y)?\s+(?:in\s+)?breathing|can(?:not|'t)\s+breathe|short(?:ness)?\s+of\s+breath|gasping)\b",
        ),
        danger("chest_pain", r"(?i)\bchest\s+pains?\b"),
        danger(
            "severe_bleeding",
            r"(?i)\b(?:(?:severe|heavy|serious)\s+bleeding|vomiting\s+blood|blood\s+in\s+(?:vomit|stool))\b",
        ),
        danger("stiff_neck", r"(?i)\bstiff\s+neck\b"),
        danger(
            "unable_to_drink",
            r"(?i)\b(?:can(?:not|'t)|unable\s+to)\s+(?:drink|feed|breastfeed|eat)\b",
        ),
    ]
});

pub(crate) static FEVER: LazyLock<KeywordRule> = LazyLock::new(|| KeywordRule {
    name: "fever",
    regex: compile(
        r"(?i)\b(?:fevers?|feverish|high\s+temperature|hot\s+body|body\s+(?:is\s+)?hot|chills|pyrexia)\b",
    ),
    urgency: Urgency::Medium,
    risk: RiskCode::FeverGeneral,
});

pub(crate) static SEVERE_HEADACHE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:severe|bad|terrible|intense|strong|splitting)\s+head\s?aches?\b")
});

/// Mild complaints that still deserve a low-risk code when nothing worse matches.
pub(crate) static MILD: LazyLock<KeywordRule> = LazyLock::new(|| KeywordRule {
    name: "mild_symptoms",
    regex: compile(
        r"(?i)\b(?:cough\w*|catarrh|sore\s+throat|runny\s+nose|rash|itch\w*|body\s+aches?|head\s?aches?|tired\w*|weak\w*)\b",
    ),
    urgency: Urgency::Low,
    risk: RiskCode::LowRisk,
});

static DURATION_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(\d{1,3})\s*(days?|d|weeks?|wks?|months?)\b")
});

static DURATION_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:a|one|two|three|several|few|many)\s+(days|weeks?|months?)\b")
});

fn danger(name: &'static str, pattern: &str) -> KeywordRule {
    KeywordRule {
        name,
        regex: compile(pattern),
        urgency: Urgency::Critical,
        risk: RiskCode::Emergency,
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Invalid triage regex pattern")
}

/// Longest reported duration in days, if the text mentions one.
pub(crate) fn duration_days(text: &str) -> Option<u32> {
    let numeric = DURATION_NUMERIC.captures_iter(text).filter_map(|cap| {
        let n: u32 = cap[1].parse().ok()?;
        Some(n.saturating_mul(unit_days(&cap[2])))
    });
    let worded = DURATION_WORDS.captures_iter(text).map(|cap| {
        // "a week" and "several days" both read as at least the unit's span
        // or, for days, a handful of them.
        if cap[1].to_ascii_lowercase().starts_with("day") {
            3
        } else {
            unit_days(&cap[1])
        }
    });
    numeric.chain(worded).max()
}

fn unit_days(unit: &str) -> u32 {
    match unit.to_ascii_lowercase().chars().next() {
        Some('w') => 7,
        Some('m') => 30,
        _ => 1,
    }
}
