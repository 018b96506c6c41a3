use garde::Validate;
use serde::{Deserialize, Serialize};

/// Findings below this confidence are not worth showing as alternatives.
const ALTERNATIVE_THRESHOLD: f64 = 0.01;

/// Structured outcome of analyzing one plant image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AnalysisResult {
    /// Plant or crop identified in the image
    #[garde(length(min = 1, max = 200))]
    pub subject: String,

    #[garde(length(min = 1), dive)]
    pub findings: Vec<Finding>,
}

/// One candidate diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Finding {
    #[garde(length(min = 1, max = 200))]
    pub label: String,

    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    #[garde(skip)]
    pub remedy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Moderate,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence >= 0.7 {
            ConfidenceBand::High
        } else if confidence >= 0.5 {
            ConfidenceBand::Moderate
        } else {
            ConfidenceBand::Low
        }
    }
}

impl Finding {
    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::of(self.confidence)
    }

    /// Confidence as a percentage with one decimal, e.g. "95.0%".
    pub fn confidence_percent(&self) -> String {
        format!("{:.1}%", self.confidence * 100.0)
    }
}

impl AnalysisResult {
    /// The most likely diagnosis. Ties go to the earliest finding.
    pub fn primary(&self) -> Option<&Finding> {
        self.findings.iter().fold(None, |best: Option<&Finding>, f| match best {
            Some(b) if b.confidence >= f.confidence => Some(b),
            _ => Some(f),
        })
    }

    /// Remaining findings that are still plausible, in their original order.
    pub fn alternatives(&self) -> Vec<&Finding> {
        let Some(primary) = self.primary() else {
            return Vec::new();
        };
        self.findings
            .iter()
            .filter(|f| !std::ptr::eq(*f, primary) && f.confidence > ALTERNATIVE_THRESHOLD)
            .collect()
    }
}
