// =============================================================================
// MODELS MODULE
// =============================================================================
// This module defines the data structures used throughout the service.
//
// Two families live here:
// - Backend payloads: what the warehouse API returns and accepts.
//   The backend speaks camelCase JSON, hence rename_all on every struct.
// - Service payloads: health checks, flow session creation, error bodies.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// CATALOG ITEM
// =============================================================================
/// Catalog item definition returned by a code lookup.
///
/// A snapshot: it is fetched again for every new scan or selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanItem {
    pub id: i64,

    /// Code printed on the item label (what the scanner reads)
    pub code: String,

    pub name: String,

    #[serde(default)]
    pub photo_url: Option<String>,

    /// Allowed storage temperature range, °C
    pub min_temp: f64,
    pub max_temp: f64,

    /// Weight in kg
    pub weight: f64,

    /// Physical dimensions in mm
    pub width: f64,
    pub height: f64,
    pub depth: f64,

    #[serde(default)]
    pub comment: Option<String>,

    /// Shelf life in days
    pub expiration_days: u32,

    pub is_dangerous: bool,
}

// =============================================================================
// INBOUND PLANNING
// =============================================================================

/// Request body for `POST /api/inventory/inbound-operation/plan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundPlanRequest {
    pub item_id: i64,
    pub quantity: u32,
    pub warehouse_id: i64,
    pub reserve: bool,
}

/// One slot the planner assigned to an inbound unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementLocation {
    pub rack_id: i64,

    #[serde(default)]
    pub rack_marker: Option<String>,

    pub position_x: i64,
    pub position_y: i64,
}

/// Result of planning N inbound units into a warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementPlan {
    pub requested_quantity: u32,
    pub allocated_quantity: u32,

    /// Units the planner could not place; they need manual placements
    pub remaining_quantity: u32,

    #[serde(default)]
    pub placements: Vec<PlacementLocation>,

    #[serde(default)]
    pub reserved: bool,

    #[serde(default)]
    pub reserved_until: Option<DateTime<Utc>>,

    #[serde(default)]
    pub reserved_count: u32,
}

impl PlacementPlan {
    /// Checks the planner's bookkeeping.
    ///
    /// `allocated + remaining == requested` and there are never more
    /// placements than allocated units.
    pub fn validate(&self) -> Result<(), String> {
        let accounted = self.allocated_quantity as u64 + self.remaining_quantity as u64;
        if accounted != self.requested_quantity as u64 {
            return Err(format!(
                "allocated {} + remaining {} != requested {}",
                self.allocated_quantity, self.remaining_quantity, self.requested_quantity
            ));
        }
        if self.placements.len() as u64 > self.allocated_quantity as u64 {
            return Err(format!(
                "{} placements for {} allocated units",
                self.placements.len(),
                self.allocated_quantity
            ));
        }
        Ok(())
    }
}

/// One placement in the inbound execute request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementTarget {
    pub rack_id: i64,
    pub position_x: i64,
    pub position_y: i64,
}

/// Request body for `POST /api/inventory/inbound-operation/execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundExecuteRequest {
    /// Item code
    pub code: String,
    pub placements: Vec<PlacementTarget>,
}

// =============================================================================
// OUTBOUND PLANNING
// =============================================================================

/// Request body for `POST /api/inventory/outbound-operation/plan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPlanRequest {
    pub item_id: i64,
    pub quantity: u32,
}

/// A removable assortment offered by the outbound planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPickSlot {
    pub assortment_id: i64,
    pub assortment_code: String,
    pub rack_marker: String,
    pub position_x: i64,
    pub position_y: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Pick plan for removing N units of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPlan {
    pub item_name: String,
    pub requested_quantity: u32,
    pub available_quantity: u32,

    /// Units past expiry that are still counted as available
    #[serde(default)]
    pub expired_quantity: u32,

    #[serde(default)]
    pub warning: Option<String>,

    /// Ordered by the planner's preference
    #[serde(default)]
    pub pick_slots: Vec<OutboundPickSlot>,
}

/// Request body for `POST /api/inventory/outbound-operation/check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCheckRequest {
    pub code: String,
}

/// Where an assortment sits and since when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssortmentDescriptor {
    pub code: String,
    pub rack_marker: String,
    pub position_x: i64,
    pub position_y: i64,
    pub created_at: DateTime<Utc>,
}

/// FIFO compliance probe result for one assortment code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCheckResult {
    pub requested_assortment: AssortmentDescriptor,
    pub fifo_compliant: bool,

    #[serde(default)]
    pub warning: Option<String>,

    /// Strictly older stock that should have been taken first
    #[serde(default)]
    pub older_assortments: Vec<AssortmentDescriptor>,
}

/// One entry of `assortments` in the outbound execute request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssortmentRef {
    pub code: String,
}

/// Request body for `POST /api/inventory/outbound-operation/execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundExecuteRequest {
    pub assortments: Vec<AssortmentRef>,
    pub skip_fifo: bool,
}

impl OutboundExecuteRequest {
    pub fn new(codes: &[String], skip_fifo: bool) -> Self {
        Self {
            assortments: codes
                .iter()
                .map(|code| AssortmentRef { code: code.clone() })
                .collect(),
            skip_fifo,
        }
    }
}

/// Per-assortment outcome of an outbound commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundOperationRecord {
    pub item_name: String,
    pub rack_marker: String,
    pub position_x: i64,
    pub position_y: i64,
    pub fifo_compliant: bool,
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
}

/// Commit confirmation for an outbound operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundExecuteResult {
    pub issued_count: u32,

    #[serde(default)]
    pub operations: Vec<OutboundOperationRecord>,
}

// =============================================================================
// VERIFICATION
// =============================================================================

/// One physical confirmation during outbound verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedVerificationEntry {
    pub assortment_code: String,
    pub rack_marker: String,
    pub position_x: i64,
    pub position_y: i64,
    pub scanned_at: DateTime<Utc>,
}

// =============================================================================
// ITEM IDENTIFICATION
// =============================================================================

/// A catalog item that resembles the uploaded photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationCandidate {
    pub item_id: i64,
    pub code: String,
    pub name: String,

    #[serde(default)]
    pub photo_url: Option<String>,

    /// 0.0 ..= 1.0
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationResult {
    pub identification_id: String,

    #[serde(default)]
    pub candidates: Vec<IdentificationCandidate>,
}

/// Request body for `POST /api/items/identify/mismatch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchReport {
    pub identification_id: String,
    pub rejected_item_id: i64,
}

/// Error body returned by the warehouse backend
#[derive(Debug, Clone, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// FLOW SESSION API
// =============================================================================

/// Request body for `POST /api/v1/flows`
///
/// # Example JSON
/// ```json
/// { "direction": "inbound", "warehouseId": 3 }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowRequest {
    pub direction: crate::flow::Direction,

    #[serde(default)]
    pub warehouse_id: Option<i64>,

    /// False while the session provider is still resolving the warehouse
    #[serde(default = "default_warehouse_loaded")]
    pub warehouse_loaded: bool,
}

fn default_warehouse_loaded() -> bool {
    true
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

/// Simple health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Detailed readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

/// Individual dependency health checks
#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub warehouse_api: bool,

    /// None when no Redis is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<bool>,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create an error response with details
    pub fn with_details(
        error: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }
}
