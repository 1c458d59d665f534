// =============================================================================
// FLOW MODULE
// =============================================================================
// The inbound/outbound operation flow as an explicit state machine.
//
//   inbound:  choose-method → {select-item | camera | manual-input}
//             → select-quantity → locations → success
//   outbound: choose-method → select-item → select-quantity → pick-list
//             → scan-verification → [fifo-warning] → success
//             choose-method → {camera | manual-input} → [fifo-warning] → success
//
// The controller does no IO. `handle` applies a user event and may return a
// `Dispatch`: a backend request the caller must perform. The caller feeds the
// outcome back through `complete`, tagged with the dispatch's generation.
// Cancel and reset bump the generation, so a reply that arrives after the
// user moved on is dropped instead of overwriting unrelated state.
//
// Each step is an enum variant carrying only the data that step needs.
// Forward moves push the previous step onto a resume stack; cancel pops it.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ApiErrorCode, FlowError};
use crate::intake::normalize_scanned_code;
use crate::metrics;
use crate::models::{
    AssortmentDescriptor, InboundExecuteRequest, InboundPlanRequest, OutboundCheckResult,
    OutboundExecuteRequest, OutboundExecuteResult, OutboundPlan, OutboundPlanRequest,
    PlacementPlan, ScanItem,
};
use crate::placement::{PlacementDraft, PlacementEdit};
use crate::scanner::ScanDebouncer;
use crate::verification::Verification;

// =============================================================================
// VOCABULARY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntakeMethod {
    SelectItem,
    Camera,
    ManualInput,
}

/// Warehouse the session provider resolved for the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WarehouseContext {
    Loading,
    Selected { warehouse_id: i64 },
    Unselected,
}

impl WarehouseContext {
    pub fn from_selection(warehouse_id: Option<i64>) -> Self {
        match warehouse_id {
            Some(warehouse_id) => Self::Selected { warehouse_id },
            None => Self::Unselected,
        }
    }

    fn warehouse_id(&self) -> Result<i64, FlowError> {
        match self {
            Self::Loading => Err(FlowError::ContextNotReady),
            Self::Unselected => Err(FlowError::NoWarehouseSelected),
            Self::Selected { warehouse_id } => Ok(*warehouse_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSource {
    DirectScan,
    PickList,
}

/// Assortment codes about to be issued
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCandidate {
    pub codes: Vec<String>,
    pub source: CandidateSource,
}

impl OutboundCandidate {
    /// The code the FIFO probe runs against
    pub fn probe_code(&self) -> &str {
        // Candidates are built from a normalized code or a non-empty selection
        self.codes.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Outcome {
    Inbound { item_name: String, placed: usize },
    Outbound { result: OutboundExecuteResult, skip_fifo: bool },
}

// =============================================================================
// STATES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FlowState {
    ChooseMethod,
    SelectItem,
    Camera {
        /// Older units offered after a FIFO violation
        suggestions: Vec<AssortmentDescriptor>,
    },
    ManualInput,
    SelectQuantity {
        item: ScanItem,
        quantity: Option<u32>,
        reserve: bool,
    },
    Locations {
        item: ScanItem,
        plan: PlacementPlan,
        draft: PlacementDraft,
    },
    PickList {
        item: ScanItem,
        quantity: u32,
        plan: OutboundPlan,
        /// Assortment ids, in plan order
        selected: Vec<i64>,
    },
    ScanVerification {
        item: ScanItem,
        plan: OutboundPlan,
        verification: Verification,
    },
    FifoWarning {
        candidate: OutboundCandidate,
        check: OutboundCheckResult,
    },
    Success {
        outcome: Outcome,
    },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::ChooseMethod => "choose-method",
            FlowState::SelectItem => "select-item",
            FlowState::Camera { .. } => "camera",
            FlowState::ManualInput => "manual-input",
            FlowState::SelectQuantity { .. } => "select-quantity",
            FlowState::Locations { .. } => "locations",
            FlowState::PickList { .. } => "pick-list",
            FlowState::ScanVerification { .. } => "scan-verification",
            FlowState::FifoWarning { .. } => "fifo-warning",
            FlowState::Success { .. } => "success",
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// User input posted to a flow session.
///
/// # Example JSON
/// ```json
/// { "type": "set-quantity", "quantity": 5, "reserve": true }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FlowEvent {
    ChooseMethod {
        method: IntakeMethod,
    },
    SelectItem {
        item: ScanItem,
    },
    /// A read from the camera decoder
    Scanned {
        code: String,
    },
    /// A typed code
    SubmitCode {
        code: String,
    },
    SetQuantity {
        quantity: u32,
        #[serde(default)]
        reserve: bool,
    },
    AddPlacement,
    RemovePlacement {
        local_id: u64,
    },
    UpdatePlacement {
        local_id: u64,
        rack_id: i64,
        position_x: i64,
        position_y: i64,
        #[serde(default)]
        rack_label: Option<String>,
    },
    ConfirmPlacements,
    ToggleSlot {
        assortment_id: i64,
    },
    ConfirmPickList,
    VerifyCode {
        code: String,
    },
    ConfirmVerification,
    TakeCompliant,
    SkipFifo,
    WarehouseContext {
        #[serde(default)]
        warehouse_id: Option<i64>,
    },
    Retry,
    Cancel,
    Reset,
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::ChooseMethod { .. } => "choose-method",
            FlowEvent::SelectItem { .. } => "select-item",
            FlowEvent::Scanned { .. } => "scanned",
            FlowEvent::SubmitCode { .. } => "submit-code",
            FlowEvent::SetQuantity { .. } => "set-quantity",
            FlowEvent::AddPlacement => "add-placement",
            FlowEvent::RemovePlacement { .. } => "remove-placement",
            FlowEvent::UpdatePlacement { .. } => "update-placement",
            FlowEvent::ConfirmPlacements => "confirm-placements",
            FlowEvent::ToggleSlot { .. } => "toggle-slot",
            FlowEvent::ConfirmPickList => "confirm-pick-list",
            FlowEvent::VerifyCode { .. } => "verify-code",
            FlowEvent::ConfirmVerification => "confirm-verification",
            FlowEvent::TakeCompliant => "take-compliant",
            FlowEvent::SkipFifo => "skip-fifo",
            FlowEvent::WarehouseContext { .. } => "warehouse-context",
            FlowEvent::Retry => "retry",
            FlowEvent::Cancel => "cancel",
            FlowEvent::Reset => "reset",
        }
    }
}

// =============================================================================
// COMMANDS & REPLIES
// =============================================================================

/// Backend work requested by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LookupItem { code: String },
    PlanInbound(InboundPlanRequest),
    PlanOutbound(OutboundPlanRequest),
    CheckOutbound { candidate: OutboundCandidate },
    ExecuteInbound(InboundExecuteRequest),
    ExecuteOutbound(OutboundExecuteRequest),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LookupItem { .. } => "lookup-item",
            Command::PlanInbound(_) => "plan-inbound",
            Command::PlanOutbound(_) => "plan-outbound",
            Command::CheckOutbound { .. } => "check-outbound",
            Command::ExecuteInbound(_) => "execute-inbound",
            Command::ExecuteOutbound(_) => "execute-outbound",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub generation: u64,
    pub command: Command,
}

/// Outcome of a `Command`
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Item(Result<ScanItem, FlowError>),
    InboundPlan(Result<PlacementPlan, FlowError>),
    OutboundPlan(Result<OutboundPlan, FlowError>),
    Check(Result<OutboundCheckResult, FlowError>),
    InboundExecuted(Result<(), FlowError>),
    OutboundExecuted(Result<OutboundExecuteResult, FlowError>),
}

fn invalid(step: &'static str, event: &'static str) -> FlowError {
    FlowError::InvalidTransition { step, event }
}

// =============================================================================
// CONTROLLER
// =============================================================================

#[derive(Debug, Clone)]
pub struct FlowController {
    direction: Direction,
    state: FlowState,
    resume: Vec<FlowState>,
    warehouse: WarehouseContext,
    debouncer: ScanDebouncer,
    generation: u64,
    pending: Option<Dispatch>,
    last_failed: Option<Command>,
    error: Option<FlowError>,
}

impl FlowController {
    pub fn new(direction: Direction, warehouse: WarehouseContext, debouncer: ScanDebouncer) -> Self {
        Self {
            direction,
            state: FlowState::ChooseMethod,
            resume: Vec::new(),
            warehouse,
            debouncer,
            generation: 0,
            pending: None,
            last_failed: None,
            error: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn error(&self) -> Option<&FlowError> {
        self.error.as_ref()
    }

    pub fn warehouse(&self) -> WarehouseContext {
        self.warehouse
    }

    /// A request is in flight; triggering controls are disabled
    pub fn is_submitting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn can_retry(&self) -> bool {
        self.last_failed.is_some() && !self.is_submitting()
    }

    /// Whether the confirm control of the current step is enabled
    pub fn can_confirm(&self) -> bool {
        if self.is_submitting() {
            return false;
        }
        match &self.state {
            FlowState::Locations { draft, .. } => draft.is_valid(),
            FlowState::PickList { selected, .. } => !selected.is_empty(),
            FlowState::ScanVerification { verification, .. } => verification.is_complete(),
            FlowState::FifoWarning { .. } => true,
            _ => false,
        }
    }

    /// Non-blocking warnings for the current step
    pub fn notices(&self) -> Vec<String> {
        let mut notices = Vec::new();
        match &self.state {
            FlowState::Camera { suggestions } if !suggestions.is_empty() => {
                let places: Vec<String> = suggestions
                    .iter()
                    .map(|s| format!("{} ({}, {})", s.rack_marker, s.position_x, s.position_y))
                    .collect();
                notices.push(format!("Scan one of the older units: {}", places.join(", ")));
            }
            FlowState::Locations { plan, .. } => {
                if let (true, Some(until)) = (plan.reserved, plan.reserved_until) {
                    notices.push(format!(
                        "{} positions reserved until {}",
                        plan.reserved_count,
                        until.to_rfc3339()
                    ));
                }
                if plan.remaining_quantity > 0 {
                    notices.push(format!(
                        "{} units could not be placed automatically",
                        plan.remaining_quantity
                    ));
                }
            }
            FlowState::PickList { plan, .. } | FlowState::ScanVerification { plan, .. } => {
                if let Some(warning) = &plan.warning {
                    notices.push(warning.clone());
                }
                if plan.expired_quantity > 0 {
                    notices.push(format!(
                        "{} of the available units are past their expiry date",
                        plan.expired_quantity
                    ));
                }
            }
            FlowState::FifoWarning { check, .. } => {
                if let Some(warning) = &check.warning {
                    notices.push(warning.clone());
                }
            }
            _ => {}
        }
        notices
    }

    // -------------------------------------------------------------------------
    // EVENTS
    // -------------------------------------------------------------------------

    /// Applies a user event.
    ///
    /// Errors that belong to the step land in the error slot as well;
    /// protocol violations (wrong step, busy) leave the session untouched.
    pub fn handle(
        &mut self,
        event: FlowEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<Dispatch>, FlowError> {
        match event {
            FlowEvent::Reset => {
                self.reset();
                return Ok(None);
            }
            FlowEvent::Cancel => {
                self.cancel();
                return Ok(None);
            }
            FlowEvent::WarehouseContext { warehouse_id } => {
                self.warehouse = WarehouseContext::from_selection(warehouse_id);
                return Ok(None);
            }
            FlowEvent::Scanned { .. } if self.is_submitting() => {
                // The decoder keeps reporting while a request runs
                debug!(step = self.state.name(), "Dropping camera read while busy");
                return Ok(None);
            }
            _ => {}
        }

        if self.is_submitting() {
            return Err(FlowError::Busy);
        }

        let result = self.apply(event, now);
        match &result {
            Ok(_) => self.error = None,
            Err(err) if err.is_protocol_violation() => {}
            Err(err) => self.error = Some(err.clone()),
        }
        result
    }

    fn apply(&mut self, event: FlowEvent, now: DateTime<Utc>) -> Result<Option<Dispatch>, FlowError> {
        let step = self.state.name();
        let event_name = event.name();

        match event {
            FlowEvent::ChooseMethod { method } => {
                if !matches!(self.state, FlowState::ChooseMethod) {
                    return Err(invalid(step, event_name));
                }
                let next = match method {
                    IntakeMethod::SelectItem => FlowState::SelectItem,
                    IntakeMethod::Camera => {
                        self.debouncer.restart();
                        FlowState::Camera {
                            suggestions: Vec::new(),
                        }
                    }
                    IntakeMethod::ManualInput => FlowState::ManualInput,
                };
                self.advance(next);
                Ok(None)
            }

            FlowEvent::SelectItem { item } => {
                if !matches!(self.state, FlowState::SelectItem) {
                    return Err(invalid(step, event_name));
                }
                self.advance(FlowState::SelectQuantity {
                    item,
                    quantity: None,
                    reserve: false,
                });
                Ok(None)
            }

            FlowEvent::Scanned { code } => match self.state {
                FlowState::Camera { .. } => {
                    if !self.debouncer.accept(&code, now, true) {
                        return Ok(None);
                    }
                    let result = self.intake(&code);
                    if result.is_err() {
                        // Nothing was sent; keep the camera reading
                        self.debouncer.restart();
                    }
                    result
                }
                FlowState::ScanVerification { .. } => {
                    if !self.debouncer.accept(&code, now, false) {
                        return Ok(None);
                    }
                    self.verify(&code, now)
                }
                _ => Err(invalid(step, event_name)),
            },

            FlowEvent::SubmitCode { code } => {
                if !matches!(self.state, FlowState::ManualInput) {
                    return Err(invalid(step, event_name));
                }
                self.intake(&code)
            }

            FlowEvent::SetQuantity { quantity, reserve } => {
                let item_id = match &mut self.state {
                    FlowState::SelectQuantity {
                        item,
                        quantity: chosen,
                        reserve: reserve_slot,
                    } => {
                        if quantity == 0 {
                            return Err(FlowError::InvalidQuantity);
                        }
                        *chosen = Some(quantity);
                        *reserve_slot = reserve;
                        item.id
                    }
                    _ => return Err(invalid(step, event_name)),
                };

                let command = match self.direction {
                    Direction::Inbound => Command::PlanInbound(InboundPlanRequest {
                        item_id,
                        quantity,
                        warehouse_id: self.warehouse.warehouse_id()?,
                        reserve,
                    }),
                    Direction::Outbound => {
                        Command::PlanOutbound(OutboundPlanRequest { item_id, quantity })
                    }
                };
                Ok(Some(self.dispatch(command)))
            }

            FlowEvent::AddPlacement => match &mut self.state {
                FlowState::Locations { draft, .. } => {
                    draft.add();
                    Ok(None)
                }
                _ => Err(invalid(step, event_name)),
            },

            FlowEvent::RemovePlacement { local_id } => match &mut self.state {
                FlowState::Locations { draft, .. } => {
                    draft.remove(local_id)?;
                    Ok(None)
                }
                _ => Err(invalid(step, event_name)),
            },

            FlowEvent::UpdatePlacement {
                local_id,
                rack_id,
                position_x,
                position_y,
                rack_label,
            } => match &mut self.state {
                FlowState::Locations { draft, .. } => {
                    draft.update(
                        local_id,
                        PlacementEdit {
                            rack_id,
                            position_x,
                            position_y,
                            rack_label,
                        },
                    )?;
                    Ok(None)
                }
                _ => Err(invalid(step, event_name)),
            },

            FlowEvent::ConfirmPlacements => {
                let request = match &self.state {
                    FlowState::Locations { item, draft, .. } => InboundExecuteRequest {
                        code: item.code.clone(),
                        placements: draft.targets()?,
                    },
                    _ => return Err(invalid(step, event_name)),
                };
                Ok(Some(self.dispatch(Command::ExecuteInbound(request))))
            }

            FlowEvent::ToggleSlot { assortment_id } => match &mut self.state {
                FlowState::PickList { plan, selected, .. } => {
                    if !plan.pick_slots.iter().any(|s| s.assortment_id == assortment_id) {
                        return Err(FlowError::UnknownSlot(assortment_id));
                    }
                    let was_selected = selected.contains(&assortment_id);
                    let toggled: Vec<i64> = plan
                        .pick_slots
                        .iter()
                        .map(|s| s.assortment_id)
                        .filter(|id| {
                            if *id == assortment_id {
                                !was_selected
                            } else {
                                selected.contains(id)
                            }
                        })
                        .collect();
                    *selected = toggled;
                    Ok(None)
                }
                _ => Err(invalid(step, event_name)),
            },

            FlowEvent::ConfirmPickList => {
                let next = match &self.state {
                    FlowState::PickList {
                        item,
                        plan,
                        selected,
                        ..
                    } => {
                        if selected.is_empty() {
                            return Err(FlowError::EmptySelection);
                        }
                        let slots = plan
                            .pick_slots
                            .iter()
                            .filter(|s| selected.contains(&s.assortment_id))
                            .cloned()
                            .collect();
                        FlowState::ScanVerification {
                            item: item.clone(),
                            plan: plan.clone(),
                            verification: Verification::new(slots),
                        }
                    }
                    _ => return Err(invalid(step, event_name)),
                };
                self.debouncer.restart();
                self.advance(next);
                Ok(None)
            }

            FlowEvent::VerifyCode { code } => {
                if !matches!(self.state, FlowState::ScanVerification { .. }) {
                    return Err(invalid(step, event_name));
                }
                self.verify(&code, now)
            }

            FlowEvent::ConfirmVerification => {
                let candidate = match &self.state {
                    FlowState::ScanVerification { verification, .. } => {
                        if !verification.is_complete() {
                            return Err(FlowError::VerificationIncomplete);
                        }
                        OutboundCandidate {
                            codes: verification.selected_codes(),
                            source: CandidateSource::PickList,
                        }
                    }
                    _ => return Err(invalid(step, event_name)),
                };
                Ok(Some(self.dispatch(Command::CheckOutbound { candidate })))
            }

            FlowEvent::TakeCompliant => {
                let older = match &self.state {
                    FlowState::FifoWarning { check, .. } => check.older_assortments.clone(),
                    _ => return Err(invalid(step, event_name)),
                };
                if older.is_empty() {
                    // Nothing older left to offer
                    self.reset();
                } else {
                    self.resume.clear();
                    self.resume.push(FlowState::ChooseMethod);
                    self.debouncer.restart();
                    self.replace(FlowState::Camera { suggestions: older });
                }
                Ok(None)
            }

            FlowEvent::SkipFifo => {
                let candidate = match &self.state {
                    FlowState::FifoWarning { candidate, check } => {
                        warn!(
                            direction = self.direction.as_str(),
                            codes = ?candidate.codes,
                            requested = %check.requested_assortment.code,
                            older = check.older_assortments.len(),
                            "FIFO override requested"
                        );
                        candidate.clone()
                    }
                    _ => return Err(invalid(step, event_name)),
                };
                let request = OutboundExecuteRequest::new(&candidate.codes, true);
                Ok(Some(self.dispatch(Command::ExecuteOutbound(request))))
            }

            FlowEvent::Retry => {
                let command = self.last_failed.clone().ok_or(FlowError::NothingToRetry)?;
                info!(command = command.name(), step, "Retrying request");
                Ok(Some(self.dispatch(command)))
            }

            // Handled before apply
            FlowEvent::Reset | FlowEvent::Cancel | FlowEvent::WarehouseContext { .. } => Ok(None),
        }
    }

    /// Scanned or typed code in the camera / manual-input steps
    fn intake(&mut self, raw: &str) -> Result<Option<Dispatch>, FlowError> {
        let code = normalize_scanned_code(raw, self.direction)?;
        let command = match self.direction {
            Direction::Inbound => Command::LookupItem { code },
            Direction::Outbound => Command::CheckOutbound {
                candidate: OutboundCandidate {
                    codes: vec![code],
                    source: CandidateSource::DirectScan,
                },
            },
        };
        Ok(Some(self.dispatch(command)))
    }

    fn verify(&mut self, code: &str, now: DateTime<Utc>) -> Result<Option<Dispatch>, FlowError> {
        if let FlowState::ScanVerification { verification, .. } = &mut self.state {
            let verified = verification.record(code, now)?.assortment_code;
            debug!(
                code = %verified,
                remaining = verification.remaining(),
                "Pick-list unit verified"
            );
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // REPLIES
    // -------------------------------------------------------------------------

    /// Feeds back the outcome of a dispatch.
    ///
    /// Replies for anything but the pending generation are dropped. May return
    /// a follow-up dispatch (a compliant FIFO check goes straight to execute).
    pub fn complete(&mut self, generation: u64, reply: Reply) -> Option<Dispatch> {
        let is_current = matches!(&self.pending, Some(p) if p.generation == generation);
        if !is_current {
            debug!(
                generation,
                current = self.generation,
                step = self.state.name(),
                "Dropping stale reply"
            );
            return None;
        }
        let command = self.pending.take()?.command;

        match (command, reply) {
            (Command::LookupItem { .. }, Reply::Item(Ok(item))) => {
                self.advance(FlowState::SelectQuantity {
                    item,
                    quantity: None,
                    reserve: false,
                });
                None
            }
            (Command::LookupItem { code }, Reply::Item(Err(err))) => {
                let not_found = matches!(
                    &err,
                    FlowError::ItemNotFound(_)
                        | FlowError::Api {
                            code: ApiErrorCode::ItemNotFound,
                            ..
                        }
                );
                if not_found {
                    self.lookup_failed(FlowError::ItemNotFound(code));
                } else {
                    self.fail(Command::LookupItem { code }, err);
                }
                None
            }

            (Command::PlanInbound(request), Reply::InboundPlan(Ok(plan))) => {
                if let Err(reason) = plan.validate() {
                    warn!(%reason, "Rejecting inconsistent placement plan");
                    self.fail(Command::PlanInbound(request), FlowError::InconsistentPlan(reason));
                    return None;
                }
                match &self.state {
                    FlowState::SelectQuantity { item, .. } => {
                        let draft = PlacementDraft::seed(&plan);
                        let item = item.clone();
                        self.advance(FlowState::Locations { item, plan, draft });
                    }
                    other => warn!(step = other.name(), "Placement plan arrived outside quantity step"),
                }
                None
            }

            (Command::PlanOutbound(request), Reply::OutboundPlan(Ok(plan))) => {
                match &self.state {
                    FlowState::SelectQuantity { item, .. } => {
                        let selected = plan
                            .pick_slots
                            .iter()
                            .take(request.quantity as usize)
                            .map(|s| s.assortment_id)
                            .collect();
                        let item = item.clone();
                        self.advance(FlowState::PickList {
                            item,
                            quantity: request.quantity,
                            plan,
                            selected,
                        });
                    }
                    other => warn!(step = other.name(), "Pick plan arrived outside quantity step"),
                }
                None
            }

            (Command::CheckOutbound { candidate }, Reply::Check(Ok(check))) => {
                if check.fifo_compliant {
                    let request = OutboundExecuteRequest::new(&candidate.codes, false);
                    return Some(self.dispatch(Command::ExecuteOutbound(request)));
                }
                info!(
                    code = %candidate.probe_code(),
                    older = check.older_assortments.len(),
                    "FIFO violation"
                );
                self.advance(FlowState::FifoWarning { candidate, check });
                None
            }

            (Command::CheckOutbound { candidate }, Reply::Check(Err(err))) => {
                let not_found = matches!(
                    &err,
                    FlowError::Api {
                        code: ApiErrorCode::AssortmentNotFound,
                        ..
                    }
                );
                // Pick-list codes come from the plan; keep the verified list for retry
                if not_found && candidate.source == CandidateSource::DirectScan {
                    self.lookup_failed(err);
                } else {
                    self.fail(Command::CheckOutbound { candidate }, err);
                }
                None
            }

            (Command::ExecuteInbound(request), Reply::InboundExecuted(Ok(()))) => {
                let item_name = match &self.state {
                    FlowState::Locations { item, .. } => item.name.clone(),
                    _ => String::new(),
                };
                self.finish(Outcome::Inbound {
                    item_name,
                    placed: request.placements.len(),
                });
                None
            }

            (Command::ExecuteOutbound(request), Reply::OutboundExecuted(Ok(result))) => {
                self.finish(Outcome::Outbound {
                    result,
                    skip_fifo: request.skip_fifo,
                });
                None
            }

            (command, Reply::InboundPlan(Err(err)))
            | (command, Reply::OutboundPlan(Err(err)))
            | (command, Reply::InboundExecuted(Err(err)))
            | (command, Reply::OutboundExecuted(Err(err))) => {
                self.fail(command, err);
                None
            }

            (command, reply) => {
                warn!(command = command.name(), ?reply, "Reply does not match pending request");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // TRANSITIONS
    // -------------------------------------------------------------------------

    fn dispatch(&mut self, command: Command) -> Dispatch {
        self.generation += 1;
        self.last_failed = None;
        let dispatch = Dispatch {
            generation: self.generation,
            command,
        };
        self.pending = Some(dispatch.clone());
        dispatch
    }

    /// Moves forward; the current step becomes the resume point
    fn advance(&mut self, next: FlowState) {
        let previous = std::mem::replace(&mut self.state, next);
        self.log_transition(previous.name());
        self.resume.push(previous);
        self.last_failed = None;
    }

    /// Moves without leaving a resume point
    fn replace(&mut self, next: FlowState) {
        let previous = std::mem::replace(&mut self.state, next);
        self.log_transition(previous.name());
        self.last_failed = None;
    }

    fn log_transition(&self, from: &'static str) {
        debug!(
            direction = self.direction.as_str(),
            from,
            to = self.state.name(),
            "Flow transition"
        );
        metrics::record_flow_transition(self.direction.as_str(), from, self.state.name());
    }

    /// Stays on the current step with the error shown and the request kept for retry
    fn fail(&mut self, command: Command, err: FlowError) {
        warn!(
            command = command.name(),
            step = self.state.name(),
            error = %err,
            "Flow request failed"
        );
        if matches!(self.state, FlowState::Camera { .. }) {
            self.debouncer.restart();
        }
        self.last_failed = Some(command);
        self.error = Some(err);
    }

    /// Scanned code is unknown: camera re-opens, manual input goes back to
    /// method choice. Nothing is kept for retry.
    fn lookup_failed(&mut self, err: FlowError) {
        info!(step = self.state.name(), error = %err, "Code lookup failed");
        if matches!(self.state, FlowState::Camera { .. }) {
            self.debouncer.restart();
        } else {
            let previous = self.resume.pop().unwrap_or(FlowState::ChooseMethod);
            self.replace(previous);
        }
        self.error = Some(err);
    }

    fn finish(&mut self, outcome: Outcome) {
        match &outcome {
            Outcome::Inbound { item_name, placed } => {
                info!(item = %item_name, placed, "Inbound operation committed");
                metrics::record_operation(Direction::Inbound.as_str(), false);
            }
            Outcome::Outbound { result, skip_fifo } => {
                info!(
                    issued = result.issued_count,
                    skip_fifo, "Outbound operation committed"
                );
                metrics::record_operation(Direction::Outbound.as_str(), *skip_fifo);
                if *skip_fifo {
                    metrics::record_fifo_override();
                }
            }
        }
        self.resume.clear();
        self.replace(FlowState::Success { outcome });
    }

    /// Back to the enclosing step. Any in-flight reply is orphaned.
    fn cancel(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.error = None;
        let previous = self.resume.pop().unwrap_or(FlowState::ChooseMethod);
        if matches!(previous, FlowState::Camera { .. }) {
            self.debouncer.restart();
        }
        self.replace(previous);
    }

    /// Drops every piece of working state
    fn reset(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.error = None;
        self.resume.clear();
        self.debouncer.restart();
        self.replace(FlowState::ChooseMethod);
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutboundOperationRecord, OutboundPickSlot, PlacementLocation};
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn item() -> ScanItem {
        ScanItem {
            id: 42,
            code: "ITEM-42".to_string(),
            name: "Yoghurt 500g".to_string(),
            photo_url: None,
            min_temp: 2.0,
            max_temp: 6.0,
            weight: 0.5,
            width: 80.0,
            height: 120.0,
            depth: 80.0,
            comment: None,
            expiration_days: 21,
            is_dangerous: false,
        }
    }

    fn controller(direction: Direction) -> FlowController {
        FlowController::new(
            direction,
            WarehouseContext::Selected { warehouse_id: 3 },
            ScanDebouncer::new(Duration::from_millis(500), true),
        )
    }

    fn placement_plan(placed: usize, remaining: u32) -> PlacementPlan {
        PlacementPlan {
            requested_quantity: placed as u32 + remaining,
            allocated_quantity: placed as u32,
            remaining_quantity: remaining,
            placements: (0..placed)
                .map(|i| PlacementLocation {
                    rack_id: 5,
                    rack_marker: Some("R5".to_string()),
                    position_x: i as i64,
                    position_y: 1,
                })
                .collect(),
            reserved: false,
            reserved_until: None,
            reserved_count: 0,
        }
    }

    fn slot(id: i64, code: &str) -> OutboundPickSlot {
        OutboundPickSlot {
            assortment_id: id,
            assortment_code: code.to_string(),
            rack_marker: format!("R{id}"),
            position_x: id,
            position_y: 0,
            created_at: t0(),
            expires_at: t0() + chrono::Duration::days(10),
        }
    }

    fn pick_plan(slots: Vec<OutboundPickSlot>) -> OutboundPlan {
        OutboundPlan {
            item_name: "Yoghurt 500g".to_string(),
            requested_quantity: 2,
            available_quantity: slots.len() as u32,
            expired_quantity: 0,
            warning: None,
            pick_slots: slots,
        }
    }

    fn descriptor(code: &str) -> AssortmentDescriptor {
        AssortmentDescriptor {
            code: code.to_string(),
            rack_marker: "R1".to_string(),
            position_x: 0,
            position_y: 0,
            created_at: t0(),
        }
    }

    fn check(code: &str, compliant: bool, older: &[&str]) -> OutboundCheckResult {
        OutboundCheckResult {
            requested_assortment: descriptor(code),
            fifo_compliant: compliant,
            warning: (!compliant).then(|| "Older units exist".to_string()),
            older_assortments: older.iter().map(|c| descriptor(c)).collect(),
        }
    }

    fn executed(codes: &[String]) -> OutboundExecuteResult {
        OutboundExecuteResult {
            issued_count: codes.len() as u32,
            operations: codes
                .iter()
                .map(|_| OutboundOperationRecord {
                    item_name: "Yoghurt 500g".to_string(),
                    rack_marker: "R1".to_string(),
                    position_x: 0,
                    position_y: 0,
                    fifo_compliant: true,
                    issued_by: "jdoe".to_string(),
                    issued_at: t0(),
                })
                .collect(),
        }
    }

    fn send(flow: &mut FlowController, event: FlowEvent) -> Option<Dispatch> {
        flow.handle(event, t0()).expect("event rejected")
    }

    /// Drives an outbound controller to the select-quantity step via select-item
    fn outbound_at_quantity() -> FlowController {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::SelectItem });
        send(&mut flow, FlowEvent::SelectItem { item: item() });
        flow
    }

    // -------------------------------------------------------------------------
    // Scenario A: inbound, full auto-placement
    // -------------------------------------------------------------------------
    #[test]
    fn inbound_full_auto_placement_commits_first_try() {
        let mut flow = controller(Direction::Inbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });

        let lookup = send(&mut flow, FlowEvent::Scanned { code: " ITEM-42 ".into() }).unwrap();
        assert_eq!(lookup.command, Command::LookupItem { code: "ITEM-42".into() });
        assert!(flow.complete(lookup.generation, Reply::Item(Ok(item()))).is_none());
        assert_eq!(flow.state().name(), "select-quantity");

        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 3, reserve: false }).unwrap();
        assert_eq!(
            plan.command,
            Command::PlanInbound(InboundPlanRequest {
                item_id: 42,
                quantity: 3,
                warehouse_id: 3,
                reserve: false
            })
        );
        flow.complete(plan.generation, Reply::InboundPlan(Ok(placement_plan(3, 0))));

        match flow.state() {
            FlowState::Locations { draft, .. } => {
                assert_eq!(draft.len(), 3);
                assert!(draft.is_valid());
            }
            other => panic!("unexpected step {}", other.name()),
        }
        assert!(flow.can_confirm());

        let execute = send(&mut flow, FlowEvent::ConfirmPlacements).unwrap();
        match &execute.command {
            Command::ExecuteInbound(request) => {
                assert_eq!(request.code, "ITEM-42");
                assert_eq!(request.placements.len(), 3);
            }
            other => panic!("unexpected command {}", other.name()),
        }
        flow.complete(execute.generation, Reply::InboundExecuted(Ok(())));

        assert_eq!(
            flow.state(),
            &FlowState::Success {
                outcome: Outcome::Inbound {
                    item_name: "Yoghurt 500g".into(),
                    placed: 3
                }
            }
        );
    }

    // -------------------------------------------------------------------------
    // Scenario B: inbound, partial placement
    // -------------------------------------------------------------------------
    #[test]
    fn inbound_partial_placement_requires_blank_rows() {
        let mut flow = controller(Direction::Inbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::SelectItem });
        send(&mut flow, FlowEvent::SelectItem { item: item() });
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 5, reserve: true }).unwrap();
        flow.complete(plan.generation, Reply::InboundPlan(Ok(placement_plan(2, 3))));

        let blanks: Vec<u64> = match flow.state() {
            FlowState::Locations { draft, .. } => {
                assert_eq!(draft.len(), 5);
                draft.rows().iter().filter(|r| r.rack_id == -1).map(|r| r.local_id).collect()
            }
            other => panic!("unexpected step {}", other.name()),
        };
        assert_eq!(blanks.len(), 3);
        assert!(!flow.can_confirm());

        let err = flow.handle(FlowEvent::ConfirmPlacements, t0()).unwrap_err();
        assert_eq!(err, FlowError::IncompletePlacements);
        assert_eq!(flow.error(), Some(&FlowError::IncompletePlacements));

        for (i, local_id) in blanks.into_iter().enumerate() {
            send(
                &mut flow,
                FlowEvent::UpdatePlacement {
                    local_id,
                    rack_id: 9,
                    position_x: i as i64,
                    position_y: 0,
                    rack_label: Some("R9".into()),
                },
            );
        }
        assert!(flow.can_confirm());
        assert!(flow.error().is_none());
        assert!(send(&mut flow, FlowEvent::ConfirmPlacements).is_some());
    }

    // -------------------------------------------------------------------------
    // Scenario C: outbound, compliant single scan
    // -------------------------------------------------------------------------
    #[test]
    fn outbound_compliant_scan_executes_immediately() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });

        let probe = send(&mut flow, FlowEvent::Scanned { code: "K".into() }).unwrap();
        let execute = flow
            .complete(probe.generation, Reply::Check(Ok(check("K", true, &[]))))
            .expect("execute follows a compliant check");
        assert_eq!(
            execute.command,
            Command::ExecuteOutbound(OutboundExecuteRequest::new(&["K".to_string()], false))
        );

        flow.complete(execute.generation, Reply::OutboundExecuted(Ok(executed(&["K".into()]))));
        match flow.state() {
            FlowState::Success {
                outcome: Outcome::Outbound { result, skip_fifo },
            } => {
                assert_eq!(result.issued_count, 1);
                assert!(!skip_fifo);
            }
            other => panic!("unexpected step {}", other.name()),
        }
    }

    // -------------------------------------------------------------------------
    // Scenario D: outbound, FIFO violation, take the compliant unit
    // -------------------------------------------------------------------------
    #[test]
    fn outbound_violation_then_compliant_alternative() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });

        let probe = send(&mut flow, FlowEvent::Scanned { code: "K".into() }).unwrap();
        assert!(flow
            .complete(probe.generation, Reply::Check(Ok(check("K", false, &["OLD"]))))
            .is_none());
        assert_eq!(flow.state().name(), "fifo-warning");
        assert_eq!(flow.notices(), vec!["Older units exist".to_string()]);

        send(&mut flow, FlowEvent::TakeCompliant);
        match flow.state() {
            FlowState::Camera { suggestions } => assert_eq!(suggestions[0].code, "OLD"),
            other => panic!("unexpected step {}", other.name()),
        }

        let probe = send(&mut flow, FlowEvent::Scanned { code: "OLD".into() }).unwrap();
        let execute = flow
            .complete(probe.generation, Reply::Check(Ok(check("OLD", true, &[]))))
            .unwrap();
        assert_eq!(
            execute.command,
            Command::ExecuteOutbound(OutboundExecuteRequest::new(&["OLD".to_string()], false))
        );
        flow.complete(execute.generation, Reply::OutboundExecuted(Ok(executed(&["OLD".into()]))));
        assert_eq!(flow.state().name(), "success");
    }

    #[test]
    fn take_compliant_without_alternatives_resets() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::ManualInput });
        let probe = send(&mut flow, FlowEvent::SubmitCode { code: "K".into() }).unwrap();
        flow.complete(probe.generation, Reply::Check(Ok(check("K", false, &[]))));

        send(&mut flow, FlowEvent::TakeCompliant);
        assert_eq!(flow.state(), &FlowState::ChooseMethod);
        // Nothing left to go back to
        send(&mut flow, FlowEvent::Cancel);
        assert_eq!(flow.state(), &FlowState::ChooseMethod);
    }

    // -------------------------------------------------------------------------
    // Scenario E: outbound pick-list, verification, skip FIFO
    // -------------------------------------------------------------------------
    #[test]
    fn outbound_pick_list_verified_then_fifo_skipped() {
        let mut flow = outbound_at_quantity();
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 2, reserve: false }).unwrap();
        assert_eq!(
            plan.command,
            Command::PlanOutbound(OutboundPlanRequest { item_id: 42, quantity: 2 })
        );
        flow.complete(
            plan.generation,
            Reply::OutboundPlan(Ok(pick_plan(vec![slot(1, "A"), slot(2, "B"), slot(3, "C")]))),
        );

        match flow.state() {
            FlowState::PickList { selected, .. } => assert_eq!(selected, &vec![1, 2]),
            other => panic!("unexpected step {}", other.name()),
        }

        send(&mut flow, FlowEvent::ConfirmPickList);
        assert_eq!(flow.state().name(), "scan-verification");
        assert!(!flow.can_confirm());
        assert_eq!(
            flow.handle(FlowEvent::ConfirmVerification, t0()),
            Err(FlowError::VerificationIncomplete)
        );

        send(&mut flow, FlowEvent::Scanned { code: "A".into() });
        assert_eq!(
            flow.handle(FlowEvent::VerifyCode { code: "C".into() }, t0()),
            Err(FlowError::UnrelatedCode("C".into()))
        );
        send(&mut flow, FlowEvent::VerifyCode { code: "B".into() });
        assert!(flow.can_confirm());

        let probe = send(&mut flow, FlowEvent::ConfirmVerification).unwrap();
        match &probe.command {
            Command::CheckOutbound { candidate } => {
                assert_eq!(candidate.probe_code(), "A");
                assert_eq!(candidate.codes, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("unexpected command {}", other.name()),
        }
        flow.complete(probe.generation, Reply::Check(Ok(check("A", false, &["Z"]))));
        assert_eq!(flow.state().name(), "fifo-warning");

        let execute = send(&mut flow, FlowEvent::SkipFifo).unwrap();
        let codes = vec!["A".to_string(), "B".to_string()];
        assert_eq!(
            execute.command,
            Command::ExecuteOutbound(OutboundExecuteRequest::new(&codes, true))
        );
        flow.complete(execute.generation, Reply::OutboundExecuted(Ok(executed(&codes))));
        match flow.state() {
            FlowState::Success {
                outcome: Outcome::Outbound { skip_fifo, result },
            } => {
                assert!(*skip_fifo);
                assert_eq!(result.issued_count, 2);
            }
            other => panic!("unexpected step {}", other.name()),
        }
    }

    #[test]
    fn pick_list_toggle_keeps_plan_order() {
        let mut flow = outbound_at_quantity();
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 1, reserve: false }).unwrap();
        let mut plan_body = pick_plan(vec![slot(1, "A"), slot(2, "B"), slot(3, "C")]);
        plan_body.expired_quantity = 1;
        flow.complete(plan.generation, Reply::OutboundPlan(Ok(plan_body)));

        send(&mut flow, FlowEvent::ToggleSlot { assortment_id: 3 });
        send(&mut flow, FlowEvent::ToggleSlot { assortment_id: 2 });
        send(&mut flow, FlowEvent::ToggleSlot { assortment_id: 1 });
        match flow.state() {
            FlowState::PickList { selected, .. } => assert_eq!(selected, &vec![2, 3]),
            other => panic!("unexpected step {}", other.name()),
        }
        assert_eq!(
            flow.handle(FlowEvent::ToggleSlot { assortment_id: 99 }, t0()),
            Err(FlowError::UnknownSlot(99))
        );
        assert!(flow.notices().iter().any(|n| n.contains("past their expiry")));

        send(&mut flow, FlowEvent::ToggleSlot { assortment_id: 2 });
        send(&mut flow, FlowEvent::ToggleSlot { assortment_id: 3 });
        assert!(!flow.can_confirm());
        assert_eq!(
            flow.handle(FlowEvent::ConfirmPickList, t0()),
            Err(FlowError::EmptySelection)
        );
    }

    // -------------------------------------------------------------------------
    // Error return discipline
    // -------------------------------------------------------------------------
    #[test]
    fn plan_failure_keeps_quantity_and_retry_resends_same_request() {
        let mut flow = outbound_at_quantity();
        let first = send(&mut flow, FlowEvent::SetQuantity { quantity: 4, reserve: false }).unwrap();
        flow.complete(first.generation, Reply::OutboundPlan(Err(FlowError::Transport("down".into()))));

        match flow.state() {
            FlowState::SelectQuantity { quantity, .. } => assert_eq!(*quantity, Some(4)),
            other => panic!("unexpected step {}", other.name()),
        }
        assert!(flow.can_retry());
        assert_eq!(flow.error(), Some(&FlowError::Transport("down".into())));

        let second = send(&mut flow, FlowEvent::Retry).unwrap();
        assert_eq!(second.command, first.command);
        assert!(second.generation > first.generation);
        assert!(flow.error().is_none());
    }

    #[test]
    fn execute_failure_preserves_verification_for_resubmission() {
        let mut flow = outbound_at_quantity();
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 1, reserve: false }).unwrap();
        flow.complete(plan.generation, Reply::OutboundPlan(Ok(pick_plan(vec![slot(1, "A")]))));
        send(&mut flow, FlowEvent::ConfirmPickList);
        send(&mut flow, FlowEvent::VerifyCode { code: "A".into() });

        let probe = send(&mut flow, FlowEvent::ConfirmVerification).unwrap();
        let execute = flow
            .complete(probe.generation, Reply::Check(Ok(check("A", true, &[]))))
            .unwrap();
        let conflict = FlowError::Api {
            code: ApiErrorCode::OutboundFifoViolation,
            message: "changed".into(),
        };
        flow.complete(execute.generation, Reply::OutboundExecuted(Err(conflict.clone())));

        match flow.state() {
            FlowState::ScanVerification { verification, .. } => assert!(verification.is_complete()),
            other => panic!("unexpected step {}", other.name()),
        }
        assert_eq!(flow.error(), Some(&conflict));
        let again = send(&mut flow, FlowEvent::Retry).unwrap();
        assert_eq!(again.command, execute.command);
    }

    #[test]
    fn fifo_override_is_counted_when_committed() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            let mut flow = controller(Direction::Outbound);
            send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::ManualInput });
            let probe = send(&mut flow, FlowEvent::SubmitCode { code: "K".into() }).unwrap();
            flow.complete(probe.generation, Reply::Check(Ok(check("K", false, &["OLD"]))));

            let execute = send(&mut flow, FlowEvent::SkipFifo).unwrap();
            flow.complete(
                execute.generation,
                Reply::OutboundExecuted(Err(FlowError::Transport("timeout".into()))),
            );
            assert!(!handle.render().contains("flow_fifo_overrides_total"));

            let again = send(&mut flow, FlowEvent::Retry).unwrap();
            flow.complete(again.generation, Reply::OutboundExecuted(Ok(executed(&["K".into()]))));
            assert_eq!(flow.state().name(), "success");
        });

        assert!(handle.render().contains("flow_fifo_overrides_total 1"));
    }

    #[test]
    fn manual_lookup_miss_returns_to_method_choice() {
        let mut flow = controller(Direction::Inbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::ManualInput });
        let lookup = send(&mut flow, FlowEvent::SubmitCode { code: "NOPE".into() }).unwrap();
        flow.complete(
            lookup.generation,
            Reply::Item(Err(FlowError::Api {
                code: ApiErrorCode::ItemNotFound,
                message: String::new(),
            })),
        );

        assert_eq!(flow.state(), &FlowState::ChooseMethod);
        assert_eq!(flow.error(), Some(&FlowError::ItemNotFound("NOPE".into())));
        assert!(!flow.can_retry());
    }

    #[test]
    fn camera_lookup_miss_reopens_camera() {
        let mut flow = controller(Direction::Inbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });
        let lookup = send(&mut flow, FlowEvent::Scanned { code: "NOPE".into() }).unwrap();
        flow.complete(lookup.generation, Reply::Item(Err(FlowError::ItemNotFound("NOPE".into()))));

        assert_eq!(flow.state().name(), "camera");
        // stream restarted: the same label can be read again right away
        assert!(send(&mut flow, FlowEvent::Scanned { code: "NOPE".into() }).is_some());
    }

    fn assortment_not_found() -> FlowError {
        FlowError::Api {
            code: ApiErrorCode::AssortmentNotFound,
            message: "no such unit".into(),
        }
    }

    #[test]
    fn manual_unknown_assortment_returns_to_method_choice() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::ManualInput });
        let probe = send(&mut flow, FlowEvent::SubmitCode { code: "NOPE".into() }).unwrap();
        flow.complete(probe.generation, Reply::Check(Err(assortment_not_found())));

        assert_eq!(flow.state(), &FlowState::ChooseMethod);
        assert_eq!(flow.error(), Some(&assortment_not_found()));
        assert!(!flow.can_retry());
        assert_eq!(flow.handle(FlowEvent::Retry, t0()), Err(FlowError::NothingToRetry));
    }

    #[test]
    fn camera_unknown_assortment_reopens_camera() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });
        let probe = send(&mut flow, FlowEvent::Scanned { code: "NOPE".into() }).unwrap();
        flow.complete(probe.generation, Reply::Check(Err(assortment_not_found())));

        assert_eq!(flow.state().name(), "camera");
        assert!(!flow.can_retry());
        assert!(send(&mut flow, FlowEvent::Scanned { code: "NOPE".into() }).is_some());
    }

    #[test]
    fn check_transport_failure_stays_retryable() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::ManualInput });
        let probe = send(&mut flow, FlowEvent::SubmitCode { code: "K".into() }).unwrap();
        flow.complete(probe.generation, Reply::Check(Err(FlowError::Transport("timeout".into()))));

        assert_eq!(flow.state(), &FlowState::ManualInput);
        assert!(flow.can_retry());
        assert_eq!(send(&mut flow, FlowEvent::Retry).unwrap().command, probe.command);
    }

    #[test]
    fn verification_accepts_decorated_scanner_output() {
        let mut flow = outbound_at_quantity();
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 2, reserve: false }).unwrap();
        flow.complete(
            plan.generation,
            Reply::OutboundPlan(Ok(pick_plan(vec![slot(1, "A"), slot(2, "B")]))),
        );
        send(&mut flow, FlowEvent::ConfirmPickList);

        send(&mut flow, FlowEvent::Scanned { code: "]C1A".into() });
        send(&mut flow, FlowEvent::VerifyCode { code: "B\u{1d}".into() });
        assert!(flow.can_confirm());

        match send(&mut flow, FlowEvent::ConfirmVerification).unwrap().command {
            Command::CheckOutbound { candidate } => {
                assert_eq!(candidate.codes, vec!["A".to_string(), "B".to_string()])
            }
            other => panic!("unexpected command {}", other.name()),
        }
    }

    #[test]
    fn planning_needs_a_warehouse() {
        let mut flow = FlowController::new(
            Direction::Inbound,
            WarehouseContext::Loading,
            ScanDebouncer::new(Duration::from_millis(500), true),
        );
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::SelectItem });
        send(&mut flow, FlowEvent::SelectItem { item: item() });

        let set = FlowEvent::SetQuantity { quantity: 1, reserve: false };
        assert_eq!(flow.handle(set.clone(), t0()), Err(FlowError::ContextNotReady));

        send(&mut flow, FlowEvent::WarehouseContext { warehouse_id: None });
        assert_eq!(flow.handle(set.clone(), t0()), Err(FlowError::NoWarehouseSelected));
        assert_eq!(flow.state().name(), "select-quantity");

        send(&mut flow, FlowEvent::WarehouseContext { warehouse_id: Some(8) });
        match flow.handle(set, t0()).unwrap().unwrap().command {
            Command::PlanInbound(request) => assert_eq!(request.warehouse_id, 8),
            other => panic!("unexpected command {}", other.name()),
        }
    }

    #[test]
    fn zero_quantity_is_an_input_error() {
        let mut flow = outbound_at_quantity();
        assert_eq!(
            flow.handle(FlowEvent::SetQuantity { quantity: 0, reserve: false }, t0()),
            Err(FlowError::InvalidQuantity)
        );
        assert!(!flow.is_submitting());
    }

    #[test]
    fn inconsistent_plan_is_rejected() {
        let mut flow = controller(Direction::Inbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::SelectItem });
        send(&mut flow, FlowEvent::SelectItem { item: item() });
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 3, reserve: false }).unwrap();

        let mut bad = placement_plan(2, 0);
        bad.requested_quantity = 3;
        flow.complete(plan.generation, Reply::InboundPlan(Ok(bad)));

        assert_eq!(flow.state().name(), "select-quantity");
        assert!(matches!(flow.error(), Some(FlowError::InconsistentPlan(_))));
        assert!(flow.can_retry());
    }

    // -------------------------------------------------------------------------
    // Generations, busy gate, cancel/reset
    // -------------------------------------------------------------------------
    #[test]
    fn stale_reply_after_cancel_is_dropped() {
        let mut flow = outbound_at_quantity();
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 2, reserve: false }).unwrap();

        send(&mut flow, FlowEvent::Cancel);
        assert_eq!(flow.state(), &FlowState::SelectItem);
        assert!(!flow.is_submitting());

        let follow_up = flow.complete(
            plan.generation,
            Reply::OutboundPlan(Ok(pick_plan(vec![slot(1, "A")]))),
        );
        assert!(follow_up.is_none());
        assert_eq!(flow.state(), &FlowState::SelectItem);
    }

    #[test]
    fn stale_reply_after_reset_and_new_flow_is_dropped() {
        let mut flow = outbound_at_quantity();
        let old = send(&mut flow, FlowEvent::SetQuantity { quantity: 2, reserve: false }).unwrap();

        send(&mut flow, FlowEvent::Reset);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });
        let probe = send(&mut flow, FlowEvent::Scanned { code: "K".into() }).unwrap();

        flow.complete(old.generation, Reply::OutboundPlan(Ok(pick_plan(vec![slot(1, "A")]))));
        assert_eq!(flow.state().name(), "camera");
        assert!(flow.is_submitting());

        assert!(flow
            .complete(probe.generation, Reply::Check(Ok(check("K", true, &[]))))
            .is_some());
    }

    #[test]
    fn events_are_refused_while_a_request_is_in_flight() {
        let mut flow = outbound_at_quantity();
        send(&mut flow, FlowEvent::SetQuantity { quantity: 2, reserve: false });

        assert_eq!(
            flow.handle(FlowEvent::SetQuantity { quantity: 2, reserve: false }, t0()),
            Err(FlowError::Busy)
        );
        assert!(flow.error().is_none());
        assert!(!flow.can_confirm());
    }

    #[test]
    fn cancel_walks_back_one_step_and_reset_clears_everything() {
        let mut flow = outbound_at_quantity();
        let plan = send(&mut flow, FlowEvent::SetQuantity { quantity: 1, reserve: false }).unwrap();
        flow.complete(plan.generation, Reply::OutboundPlan(Ok(pick_plan(vec![slot(1, "A")]))));
        send(&mut flow, FlowEvent::ConfirmPickList);

        send(&mut flow, FlowEvent::Cancel);
        assert_eq!(flow.state().name(), "pick-list");
        send(&mut flow, FlowEvent::Cancel);
        match flow.state() {
            FlowState::SelectQuantity { quantity, .. } => assert_eq!(*quantity, Some(1)),
            other => panic!("unexpected step {}", other.name()),
        }

        send(&mut flow, FlowEvent::Reset);
        assert_eq!(flow.state(), &FlowState::ChooseMethod);
        assert!(flow.error().is_none());
        assert!(!flow.can_retry());
        send(&mut flow, FlowEvent::Cancel);
        assert_eq!(flow.state(), &FlowState::ChooseMethod);
    }

    #[test]
    fn new_intake_mid_flow_requires_reset() {
        let mut flow = outbound_at_quantity();
        assert_eq!(
            flow.handle(FlowEvent::ChooseMethod { method: IntakeMethod::Camera }, t0()),
            Err(FlowError::InvalidTransition {
                step: "select-quantity",
                event: "choose-method"
            })
        );
        assert!(flow.error().is_none());
        assert_eq!(flow.handle(FlowEvent::Retry, t0()), Err(FlowError::NothingToRetry));
    }

    #[test]
    fn repeated_camera_reads_are_ignored() {
        let mut flow = FlowController::new(
            Direction::Outbound,
            WarehouseContext::Unselected,
            ScanDebouncer::new(Duration::from_millis(500), false),
        );
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });
        let probe = send(&mut flow, FlowEvent::Scanned { code: "K".into() }).unwrap();
        // busy: decoder reads are swallowed, not refused
        assert_eq!(flow.handle(FlowEvent::Scanned { code: "K".into() }, t0()), Ok(None));

        flow.complete(probe.generation, Reply::Check(Err(FlowError::Transport("x".into()))));
        assert_eq!(flow.state().name(), "camera");
        assert!(send(&mut flow, FlowEvent::Scanned { code: "K".into() }).is_some());
    }

    #[test]
    fn camera_read_of_empty_payload_keeps_camera_open() {
        let mut flow = controller(Direction::Outbound);
        send(&mut flow, FlowEvent::ChooseMethod { method: IntakeMethod::Camera });

        assert_eq!(
            flow.handle(FlowEvent::Scanned { code: "]C1\u{1d}".into() }, t0()),
            Err(FlowError::EmptyCode)
        );
        assert_eq!(flow.error(), Some(&FlowError::EmptyCode));
        assert!(send(&mut flow, FlowEvent::Scanned { code: "]C1K\u{1d}7".into() }).is_some());
    }

    #[test]
    fn state_serializes_with_step_tag() {
        let flow = outbound_at_quantity();
        let json = serde_json::to_value(flow.state()).unwrap();
        assert_eq!(json["step"], "select-quantity");
        assert_eq!(json["item"]["code"], "ITEM-42");
        assert!(json["quantity"].is_null());

        let event: FlowEvent =
            serde_json::from_str(r#"{"type":"update-placement","localId":3,"rackId":1,"positionX":2,"positionY":0}"#)
                .unwrap();
        assert_eq!(event.name(), "update-placement");
    }
}
