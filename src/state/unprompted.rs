//! Unprompted rolls.
//!
//! Physical results nobody asked for are posted as a finished roll of
//! their own, e.g. `2d20 + 1d100`.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregation::RollGroups;

/// One die term of a finished roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieTerm {
    pub number: usize,
    pub faces: u32,
    pub results: Vec<u32>,
}

/// A pre-evaluated roll for the host's chat/record system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRecord {
    pub formula: String,
    pub terms: Vec<DieTerm>,
    pub total: u32,
    pub rolled_at: DateTime<Utc>,
}

impl RollRecord {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "class": "Roll",
            "evaluated": true,
            "formula": self.formula,
            "total": self.total,
            "terms": self.terms.iter().map(|t| serde_json::json!({
                "class": "Die",
                "evaluated": true,
                "number": t.number,
                "faces": t.faces,
                "results": t.results.iter().map(|r| serde_json::json!({
                    "active": true,
                    "result": r,
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// Build a roll from leftover groups, largest dice first.
///
/// Returns `None` when no group holds a result with a face count.
pub fn synthesize(groups: &RollGroups) -> Option<RollRecord> {
    let mut terms: Vec<DieTerm> = groups
        .iter()
        .filter(|g| !g.results.is_empty())
        .filter_map(|g| {
            Some(DieTerm {
                number: g.results.len(),
                faces: g.denomination.faces()?,
                results: g.results.clone(),
            })
        })
        .collect();
    if terms.is_empty() {
        return None;
    }
    terms.sort_by_key(|t| Reverse(t.faces));

    let formula = terms
        .iter()
        .map(|t| format!("{}d{}", t.number, t.faces))
        .collect::<Vec<_>>()
        .join(" + ");
    let total = terms.iter().flat_map(|t| t.results.iter()).sum();

    Some(RollRecord {
        formula,
        terms,
        total,
        rolled_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::denomination::Denomination;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_largest_first() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D6, 3);
        groups.push(Denomination::D20, 17);
        groups.push(Denomination::D100, 42);
        groups.push(Denomination::D20, 2);

        let record = synthesize(&groups).unwrap();
        assert_eq!(record.formula, "1d100 + 2d20 + 1d6");
        assert_eq!(record.terms[1].results, vec![17, 2]);
        assert_eq!(record.total, 64);
    }

    #[test]
    fn test_empty_groups() {
        assert!(synthesize(&RollGroups::default()).is_none());
    }

    #[test]
    fn test_to_json() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D8, 5);
        let json = synthesize(&groups).unwrap().to_json();
        assert_eq!(json["formula"], "1d8");
        assert_eq!(json["terms"][0]["faces"], 8);
        assert_eq!(json["terms"][0]["results"][0]["result"], 5);
    }
}
