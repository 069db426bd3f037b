// =============================================================================
// Decision Envelope — Auditable record of every fusion decision
// =============================================================================
//
// Every evaluation flows through three phases and the aggregator.  The
// envelope captures the status of each phase, the detailed phase output and
// either the aggregation result or the explicit reason no aggregation was
// possible, so that every decision can be audited after the fact.
//
// A failed aggregation always carries `HOLD` and an `error`; it is never
// presented as a computed composite.
// =============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use crate::network::NetworkSignal;
use crate::pattern::PatternSignal;
use crate::regime::{MarketRegime, RegimeSignal};
use crate::signals::AggregationResult;
use crate::types::{Action, PhaseOutcome};

/// Detailed output of the built-in phases that computed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foundation: Option<RegimeSignal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSignal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternSignal>,
}

/// Complete auditable record of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct FusionDecision {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    /// Asset the decision pertains to.
    pub target: String,

    /// Regime the aggregator weighted under.
    pub regime: MarketRegime,

    /// Final action; `HOLD` when aggregation failed.
    pub action: Action,

    /// Status of every phase that took part, built-in and external.
    pub phases: BTreeMap<String, PhaseOutcome>,

    pub details: PhaseDetails,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationResult>,

    /// Why no aggregation was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// ISO 8601 timestamp of when this decision was created.
    pub created_at: String,
}

impl FusionDecision {
    /// Decision backed by an aggregation result.
    pub fn decided(
        target: impl Into<String>,
        phases: BTreeMap<String, PhaseOutcome>,
        details: PhaseDetails,
        aggregation: AggregationResult,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target: target.into(),
            regime: aggregation.regime,
            action: aggregation.action,
            phases,
            details,
            aggregation: Some(aggregation),
            error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Decision where aggregation was not possible.
    pub fn failed(
        target: impl Into<String>,
        regime: MarketRegime,
        phases: BTreeMap<String, PhaseOutcome>,
        details: PhaseDetails,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target: target.into(),
            regime,
            action: Action::Hold,
            phases,
            details,
            aggregation: None,
            error: Some(error.into()),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_decided(&self) -> bool {
        self.aggregation.is_some()
    }

    /// Phases that could not be computed.
    pub fn skipped_phases(&self) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|(_, o)| matches!(o, PhaseOutcome::NotComputable { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_decision_holds_and_serialises_error() {
        let phases = BTreeMap::from([(
            "foundation".to_string(),
            PhaseOutcome::NotComputable {
                reason: "short".into(),
            },
        )]);
        let d = FusionDecision::failed(
            "VCB",
            MarketRegime::Unknown,
            phases,
            PhaseDetails::default(),
            "No valid signals",
        );
        assert!(!d.is_decided());
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.skipped_phases(), vec!["foundation"]);

        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["error"], "No valid signals");
        assert_eq!(json["action"], "HOLD");
        assert_eq!(json["phases"]["foundation"]["status"], "NOT_COMPUTABLE");
        assert!(json.get("aggregation").is_none());
        assert!(uuid::Uuid::parse_str(&d.id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&d.created_at).is_ok());
    }
}
