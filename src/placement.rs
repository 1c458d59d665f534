// =============================================================================
// PLACEMENT MODULE
// =============================================================================
// Client-side working copy of an inbound placement plan.
//
// Rows are seeded from the planner's placements, plus one blank row for each
// unit the planner could not place. The operator edits rack and position,
// adds or removes rows, and the draft is only sent when every row is valid.
// =============================================================================

use serde::Serialize;

use crate::error::FlowError;
use crate::models::{PlacementPlan, PlacementTarget};

/// Rack id of a row nobody has filled in yet
pub const UNSET_RACK: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditablePlacement {
    /// Opaque, unique within one draft
    pub local_id: u64,
    pub rack_id: i64,
    pub position_x: i64,
    pub position_y: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack_label: Option<String>,
}

impl EditablePlacement {
    fn blank(local_id: u64) -> Self {
        Self {
            local_id,
            rack_id: UNSET_RACK,
            position_x: 0,
            position_y: 0,
            rack_label: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.rack_id >= 0 && self.position_x >= 0 && self.position_y >= 0
    }
}

/// Edit applied to one row
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementEdit {
    pub rack_id: i64,
    pub position_x: i64,
    pub position_y: i64,
    pub rack_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDraft {
    rows: Vec<EditablePlacement>,
    #[serde(skip)]
    next_id: u64,
}

impl PlacementDraft {
    /// Seeds rows from a plan.
    ///
    /// Always yields `max(1, placements + remaining)` rows.
    pub fn seed(plan: &PlacementPlan) -> Self {
        let mut draft = Self {
            rows: Vec::with_capacity(plan.placements.len() + plan.remaining_quantity as usize),
            next_id: 1,
        };

        for location in &plan.placements {
            let local_id = draft.take_id();
            draft.rows.push(EditablePlacement {
                local_id,
                rack_id: location.rack_id,
                position_x: location.position_x,
                position_y: location.position_y,
                rack_label: location.rack_marker.clone(),
            });
        }

        for _ in 0..plan.remaining_quantity {
            draft.push_blank();
        }

        if draft.rows.is_empty() {
            draft.push_blank();
        }

        draft
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push_blank(&mut self) -> u64 {
        let id = self.take_id();
        self.rows.push(EditablePlacement::blank(id));
        id
    }

    pub fn rows(&self) -> &[EditablePlacement] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Appends a blank row and returns its id
    pub fn add(&mut self) -> u64 {
        self.push_blank()
    }

    /// Removes a row. The last remaining row is kept.
    pub fn remove(&mut self, local_id: u64) -> Result<(), FlowError> {
        let index = self.index_of(local_id)?;
        if self.rows.len() > 1 {
            self.rows.remove(index);
        }
        Ok(())
    }

    pub fn update(&mut self, local_id: u64, edit: PlacementEdit) -> Result<(), FlowError> {
        let index = self.index_of(local_id)?;
        let row = &mut self.rows[index];
        row.rack_id = edit.rack_id;
        row.position_x = edit.position_x;
        row.position_y = edit.position_y;
        row.rack_label = edit.rack_label;
        Ok(())
    }

    fn index_of(&self, local_id: u64) -> Result<usize, FlowError> {
        self.rows
            .iter()
            .position(|row| row.local_id == local_id)
            .ok_or(FlowError::UnknownPlacement(local_id))
    }

    pub fn is_valid(&self) -> bool {
        self.rows.iter().all(EditablePlacement::is_valid)
    }

    /// Placements for the execute request, or an error while a row is incomplete
    pub fn targets(&self) -> Result<Vec<PlacementTarget>, FlowError> {
        if !self.is_valid() {
            return Err(FlowError::IncompletePlacements);
        }
        Ok(self
            .rows
            .iter()
            .map(|row| PlacementTarget {
                rack_id: row.rack_id,
                position_x: row.position_x,
                position_y: row.position_y,
            })
            .collect())
    }
}
