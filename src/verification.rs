// =============================================================================
// VERIFICATION MODULE
// =============================================================================
// Before an outbound pick-list is committed every selected unit has to be
// scanned once. The selection is fixed for the step; scans only accumulate.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FlowError;
use crate::flow::Direction;
use crate::intake::normalize_scanned_code;
use crate::models::{OutboundPickSlot, ScannedVerificationEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    selected: Vec<OutboundPickSlot>,
    entries: Vec<ScannedVerificationEntry>,
}

impl Verification {
    pub fn new(selected: Vec<OutboundPickSlot>) -> Self {
        Self {
            selected,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ScannedVerificationEntry] {
        &self.entries
    }

    /// Codes of the selected slots, in pick-list order
    pub fn selected_codes(&self) -> Vec<String> {
        self.selected
            .iter()
            .map(|slot| slot.assortment_code.clone())
            .collect()
    }

    /// Records one scan or manual entry.
    ///
    /// Input is cleaned like any outbound scan, so scanner prefixes and group
    /// separators do not hide a matching code.
    pub fn record(
        &mut self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<ScannedVerificationEntry, FlowError> {
        let code = normalize_scanned_code(raw, Direction::Outbound)?;

        let slot = self
            .selected
            .iter()
            .find(|slot| slot.assortment_code == code)
            .ok_or_else(|| FlowError::UnrelatedCode(code.clone()))?;

        if self.is_scanned(&code) {
            return Err(FlowError::DuplicateScan(code));
        }

        let entry = ScannedVerificationEntry {
            assortment_code: slot.assortment_code.clone(),
            rack_marker: slot.rack_marker.clone(),
            position_x: slot.position_x,
            position_y: slot.position_y,
            scanned_at: now,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn is_scanned(&self, code: &str) -> bool {
        self.entries.iter().any(|e| e.assortment_code == code)
    }

    /// Every selected code has been scanned at least once
    pub fn is_complete(&self) -> bool {
        self.selected
            .iter()
            .all(|slot| self.is_scanned(&slot.assortment_code))
    }

    pub fn remaining(&self) -> usize {
        self.selected
            .iter()
            .filter(|slot| !self.is_scanned(&slot.assortment_code))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn slot(id: i64, code: &str) -> OutboundPickSlot {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        OutboundPickSlot {
            assortment_id: id,
            assortment_code: code.to_string(),
            rack_marker: format!("R{id}"),
            position_x: id,
            position_y: 0,
            created_at: created,
            expires_at: created + chrono::Duration::days(30),
        }
    }

    #[test]
    fn completion_is_set_containment() {
        let now = Utc::now();
        let mut verification =
            Verification::new(vec![slot(1, "A"), slot(2, "B"), slot(3, "C")]);

        verification.record("A", now).unwrap();
        verification.record("B", now).unwrap();
        assert!(!verification.is_complete());
        assert_eq!(verification.remaining(), 1);

        verification.record("C", now).unwrap();
        assert!(verification.is_complete());

        let before = verification.clone();
        assert_eq!(
            verification.record("A", now).map(|_| ()),
            Err(FlowError::DuplicateScan("A".to_string()))
        );
        assert_eq!(verification, before);
    }

    #[test]
    fn scan_order_does_not_matter() {
        let now = Utc::now();
        let mut verification = Verification::new(vec![slot(1, "A"), slot(2, "B")]);

        verification.record("B", now).unwrap();
        verification.record(" A ", now).unwrap();
        assert!(verification.is_complete());
    }

    #[test]
    fn entries_copy_slot_location() {
        let now = Utc::now();
        let mut verification = Verification::new(vec![slot(7, "Q")]);

        let entry = verification.record("Q", now).unwrap();
        assert_eq!(entry.rack_marker, "R7");
        assert_eq!(entry.position_x, 7);
        assert_eq!(entry.scanned_at, now);
    }

    #[test]
    fn bad_input_leaves_state_alone() {
        let now = Utc::now();
        let mut verification = Verification::new(vec![slot(1, "A")]);

        assert_eq!(
            verification.record("  ", now).map(|_| ()),
            Err(FlowError::EmptyCode)
        );
        assert_eq!(
            verification.record("Z", now).map(|_| ()),
            Err(FlowError::UnrelatedCode("Z".to_string()))
        );
        assert!(verification.entries().is_empty());
    }

    #[test]
    fn scanner_decorations_are_stripped_before_matching() {
        let now = Utc::now();
        let mut verification = Verification::new(vec![slot(1, "A"), slot(2, "B")]);

        let entry = verification.record("]C1A", now).unwrap();
        assert_eq!(entry.assortment_code, "A");

        verification.record("B\u{1d}", now).unwrap();
        assert!(verification.is_complete());

        // Same unit again, this time with the group separator
        assert_eq!(
            verification.record("A\u{1d}", now).map(|_| ()),
            Err(FlowError::DuplicateScan("A".to_string()))
        );
        assert_eq!(
            verification.record("]C1", now).map(|_| ()),
            Err(FlowError::EmptyCode)
        );
    }
}
