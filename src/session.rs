// =============================================================================
// SESSION MODULE
// =============================================================================
// Hosts flow controllers for the UI and performs their backend requests.
//
// One session per operator flow, keyed by UUID. The controller lock is held
// only while an event or a reply is applied, never across a backend call:
// a `cancel` posted while a request is in flight goes through, and the late
// reply is then dropped by the controller's generation check.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::WarehouseApi;
use crate::cache::ItemCache;
use crate::error::{AppError, AppResult, ErrorView, FlowError};
use crate::flow::{
    Command, Direction, FlowController, FlowEvent, FlowState, Reply, WarehouseContext,
};
use crate::metrics;
use crate::models::{CreateFlowRequest, ScanItem};
use crate::scanner::ScanDebouncer;

// =============================================================================
// SESSION
// =============================================================================
pub struct FlowSession {
    id: Uuid,
    controller: FlowController,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FlowSession {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn view(&self) -> FlowView {
        let flow = &self.controller;
        FlowView {
            id: self.id,
            direction: flow.direction(),
            warehouse: flow.warehouse(),
            state: flow.state().clone(),
            error: flow.error().map(ErrorView::from),
            is_submitting: flow.is_submitting(),
            can_confirm: flow.can_confirm(),
            can_retry: flow.can_retry(),
            notices: flow.notices(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What the UI renders for a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowView {
    pub id: Uuid,
    pub direction: Direction,
    pub warehouse: WarehouseContext,
    pub state: FlowState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,

    pub is_submitting: bool,
    pub can_confirm: bool,
    pub can_retry: bool,
    pub notices: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// STORE
// =============================================================================
type SharedSession = Arc<Mutex<FlowSession>>;

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, session: FlowSession) -> SharedSession {
        let id = session.id;
        let shared = Arc::new(Mutex::new(session));
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, shared.clone());
        metrics::set_active_sessions(sessions.len());
        shared
    }

    async fn get(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id).is_some();
        metrics::set_active_sessions(sessions.len());
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions untouched for longer than `max_idle`.
    ///
    /// Sessions locked by a running request are kept.
    pub async fn sweep_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> usize {
        let max_idle =
            chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::days(365));

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(guard) => now - guard.updated_at < max_idle,
            Err(_) => true,
        });
        metrics::set_active_sessions(sessions.len());
        before - sessions.len()
    }
}

/// Periodically sweeps idle sessions
pub fn spawn_sweeper(store: SessionStore, max_idle: Duration) -> JoinHandle<()> {
    let period = max_idle.clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = store.sweep_idle(max_idle, Utc::now()).await;
            if removed > 0 {
                let remaining = store.len().await;
                info!(removed, remaining, "Swept idle flow sessions");
            }
        }
    })
}

// =============================================================================
// RUNNER
// =============================================================================
#[derive(Clone)]
pub struct FlowRunner {
    api: Arc<dyn WarehouseApi>,
    cache: ItemCache,
    store: SessionStore,
    scan_delay: Duration,
    stop_on_scan: bool,
}

impl FlowRunner {
    pub fn new(
        api: Arc<dyn WarehouseApi>,
        cache: ItemCache,
        store: SessionStore,
        scan_delay: Duration,
        stop_on_scan: bool,
    ) -> Self {
        Self {
            api,
            cache,
            store,
            scan_delay,
            stop_on_scan,
        }
    }

    pub fn api(&self) -> &Arc<dyn WarehouseApi> {
        &self.api
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    pub async fn create(&self, request: CreateFlowRequest) -> FlowView {
        let warehouse = if request.warehouse_loaded {
            WarehouseContext::from_selection(request.warehouse_id)
        } else {
            WarehouseContext::Loading
        };
        let now = Utc::now();
        let session = FlowSession {
            id: Uuid::new_v4(),
            controller: FlowController::new(
                request.direction,
                warehouse,
                ScanDebouncer::new(self.scan_delay, self.stop_on_scan),
            ),
            created_at: now,
            updated_at: now,
        };

        info!(
            session = %session.id,
            direction = request.direction.as_str(),
            warehouse = ?warehouse,
            "Flow session created"
        );
        let view = session.view();
        self.store.insert(session).await;
        view
    }

    async fn session(&self, id: Uuid) -> AppResult<SharedSession> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Flow session not found: {id}")))
    }

    pub async fn view(&self, id: Uuid) -> AppResult<FlowView> {
        let session = self.session(id).await?;
        let guard = session.lock().await;
        Ok(guard.view())
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        if self.store.remove(id).await {
            info!(session = %id, "Flow session closed");
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Flow session not found: {id}")))
        }
    }

    /// Applies an event and runs any requests it triggers to completion.
    ///
    /// Errors the step reports are part of the returned view. Only protocol
    /// violations come back as `AppError::Flow`.
    pub async fn dispatch_event(&self, id: Uuid, event: FlowEvent) -> AppResult<FlowView> {
        let session = self.session(id).await?;

        let mut next = {
            let mut guard = session.lock().await;
            guard.touch();
            let step = guard.controller.state().name();
            debug!(session = %id, event = event.name(), step, "Flow event");

            match guard.controller.handle(event, Utc::now()) {
                Ok(dispatch) => dispatch,
                Err(err) if err.is_protocol_violation() => return Err(AppError::Flow(err)),
                Err(_) => return Ok(guard.view()),
            }
        };

        while let Some(dispatch) = next {
            let reply = self.perform(&dispatch.command).await;
            let mut guard = session.lock().await;
            guard.touch();
            next = guard.controller.complete(dispatch.generation, reply);
        }

        let guard = session.lock().await;
        Ok(guard.view())
    }

    /// Executes one backend request
    async fn perform(&self, command: &Command) -> Reply {
        match command {
            Command::LookupItem { code } => Reply::Item(self.lookup(code).await),

            Command::PlanInbound(request) => {
                Reply::InboundPlan(self.api.plan_inbound(request).await.map_err(FlowError::from))
            }

            Command::PlanOutbound(request) => {
                Reply::OutboundPlan(self.api.plan_outbound(request).await.map_err(FlowError::from))
            }

            Command::CheckOutbound { candidate } => Reply::Check(
                self.api
                    .check_outbound(candidate.probe_code())
                    .await
                    .map_err(FlowError::from),
            ),

            Command::ExecuteInbound(request) => {
                let result = self.api.execute_inbound(request).await.map_err(FlowError::from);
                if result.is_ok() {
                    self.cache.invalidate().await;
                }
                Reply::InboundExecuted(result)
            }

            Command::ExecuteOutbound(request) => {
                let result = self.api.execute_outbound(request).await.map_err(FlowError::from);
                if result.is_ok() {
                    self.cache.invalidate().await;
                }
                Reply::OutboundExecuted(result)
            }
        }
    }

    /// Item lookup through the cache
    async fn lookup(&self, code: &str) -> Result<ScanItem, FlowError> {
        if let Some(item) = self.cache.get(code).await {
            return Ok(item);
        }
        let item = self.api.get_item_by_code(code).await?;
        self.cache.set(code, &item).await;
        Ok(item)
    }
}
