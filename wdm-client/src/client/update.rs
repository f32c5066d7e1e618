//! Update sub-system: pushing local changes to the publisher.
//!
//! Paths marked updated wait in the pending set until flushed. While the
//! subscription is established they are moved to the in-progress set,
//! encoded into payloads under the size budget and sent, one payload in
//! flight at a time. Every path ends with one `UpdateComplete`, except
//! engine-private paths, which are reported only when they fail.

use std::collections::HashMap;
use wdm_core::{
    form_payload, BatchError, ClientState, ElementSource, ExponentialBackoff, FailureKind, PathFlags,
    PathRecord, PendingSetState, RequestType, ResubscribeAttempt, ResubscribePolicy, UpdateSets,
    DEFAULT_MAX_UPDATE_SIZE,
};
use wdm_types::status::{wdm, PROFILE_WDM};
use wdm_types::{
    DataVersion, ExchangeId, Message, PropertyDictionaryKey, PropertyPathHandle, StatusReport,
    TraitDataHandle, TraitPath,
};

use super::SubscriptionClient;
use crate::catalog::CatalogRef;
use crate::config::ClientSection;
use crate::error::ClientError;
use crate::event::InEventParam;
use crate::mutex::{UpdateGuard, UpdateMutexRef};
use crate::timer::TimerKind;

/// Update bookkeeping for one updatable trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdatableTraitContext {
    pub(crate) handle: TraitDataHandle,
    /// Conditionality of the trait's outstanding changes.
    conditional: Option<bool>,
    /// Version conditional payloads are made against.
    update_required_version: Option<DataVersion>,
    /// Sink version when the current payloads were formed.
    update_start_version: Option<DataVersion>,
    potential_data_loss: bool,
}

impl UpdatableTraitContext {
    fn new(handle: TraitDataHandle) -> Self {
        Self {
            handle,
            conditional: None,
            update_required_version: None,
            update_start_version: None,
            potential_data_loss: false,
        }
    }

    fn end_cycle(&mut self) {
        self.conditional = None;
        self.update_required_version = None;
        self.update_start_version = None;
    }

    fn clear_potential_data_loss(&mut self) {
        self.potential_data_loss = false;
    }
}

pub(super) fn collect_updatable_traits(
    catalog: &CatalogRef,
    max: usize,
) -> Result<Vec<UpdatableTraitContext>, ClientError> {
    let mut traits = Vec::new();
    catalog.for_each(&mut |handle, sink| {
        if sink.is_updatable() {
            traits.push(UpdatableTraitContext::new(handle));
        }
    });
    if traits.len() > max {
        return Err(ClientError::ResourceExhausted(format!(
            "{} updatable traits, limit {}",
            traits.len(),
            max
        )));
    }
    Ok(traits)
}

/// What the payload in flight carried.
#[derive(Debug)]
struct InFlight {
    element_paths: Vec<TraitPath>,
    completed: Vec<TraitPath>,
}

type Failure = (ClientError, Option<StatusReport>);

pub(super) struct UpdateState {
    sets: UpdateSets,
    traits: Vec<UpdatableTraitContext>,
    configured_max_update_size: usize,
    max_update_size: usize,
    retries_suspended: bool,
    retry_scheduled: bool,
    retry_count: u32,
    // set once something was moved to in-progress; NoMorePendingUpdates
    // closes the cycle
    cycle_active: bool,
    pub(super) exchange: Option<ExchangeId>,
    in_flight: Option<InFlight>,
    mutex: Option<UpdateMutexRef>,
    backoff: ExponentialBackoff,
}

impl UpdateState {
    pub(super) fn new(options: &ClientSection, backoff: ExponentialBackoff) -> Self {
        Self {
            sets: UpdateSets::new(options.path_set_capacity),
            traits: Vec::new(),
            configured_max_update_size: options.max_update_size,
            max_update_size: options.max_update_size,
            retries_suspended: false,
            retry_scheduled: false,
            retry_count: 0,
            cycle_active: false,
            exchange: None,
            in_flight: None,
            mutex: None,
            backoff,
        }
    }

    pub(super) fn init(&mut self, traits: Vec<UpdatableTraitContext>, mutex: Option<UpdateMutexRef>) {
        self.traits = traits;
        self.mutex = mutex;
    }

    pub(super) fn reset(&mut self) {
        self.sets.clear();
        self.traits.clear();
        self.max_update_size = self.configured_max_update_size;
        self.retries_suspended = false;
        self.retry_scheduled = false;
        self.retry_count = 0;
        self.cycle_active = false;
        self.exchange = None;
        self.in_flight = None;
        self.mutex = None;
    }

    fn trait_index(&self, handle: TraitDataHandle) -> Option<usize> {
        self.traits.iter().position(|ctx| ctx.handle == handle)
    }

    fn guard(&self) -> UpdateGuard {
        UpdateGuard::acquire(self.mutex.as_ref())
    }
}

/// Reads update values from the sinks.
struct CatalogSource<'a> {
    catalog: &'a CatalogRef,
    traits: &'a [UpdatableTraitContext],
}

impl CatalogSource<'_> {
    fn sink(&self, path: &TraitPath) -> Result<crate::catalog::SinkRef, BatchError> {
        self.catalog
            .sink(path.trait_handle)
            .ok_or_else(|| BatchError::Sink {
                path: *path,
                reason: "no sink for trait".into(),
            })
    }
}

impl ElementSource for CatalogSource<'_> {
    fn read_leaf(
        &self,
        path: &TraitPath,
        excluded: &[PropertyPathHandle],
    ) -> Result<Vec<u8>, BatchError> {
        self.sink(path)?
            .read_leaf(path.property, excluded)
            .map_err(|e| BatchError::Sink {
                path: *path,
                reason: e.to_string(),
            })
    }

    fn dictionary_keys(&self, path: &TraitPath) -> Result<Vec<PropertyDictionaryKey>, BatchError> {
        self.sink(path)?
            .dictionary_keys(path.property)
            .map_err(|e| BatchError::Sink {
                path: *path,
                reason: e.to_string(),
            })
    }

    fn required_version(&self, trait_handle: TraitDataHandle) -> Option<DataVersion> {
        self.traits
            .iter()
            .find(|ctx| ctx.handle == trait_handle)
            .and_then(|ctx| ctx.update_required_version)
    }
}

/// Whether a rejected update is worth sending again.
fn will_retry_update(status: &StatusReport) -> bool {
    status.is_transient()
}

fn is_version_mismatch(status: &StatusReport) -> bool {
    status.profile_id == PROFILE_WDM && status.status_code == wdm::VERSION_MISMATCH
}

impl SubscriptionClient {
    // =========================================================================
    // Application calls
    // =========================================================================

    /// Take the application's update lock.
    pub fn lock_update_mutex(&self) {
        if let Some(mutex) = &self.update.mutex {
            mutex.lock();
        }
    }

    /// Release the application's update lock.
    pub fn unlock_update_mutex(&self) {
        if let Some(mutex) = &self.update.mutex {
            mutex.unlock();
        }
    }

    /// Mark a property changed locally. Nothing is sent until
    /// [`flush_update`](Self::flush_update).
    ///
    /// A conditional change is applied by the publisher only if the trait
    /// still has the version the local copy had when the first conditional
    /// change was made.
    ///
    /// # Errors
    ///
    /// `NotUpdatable` for traits without an updatable sink,
    /// `InconsistentConditionality` when mixing conditional and
    /// unconditional changes on one trait, `ResourceExhausted` when the
    /// pending set is full, and `InvalidState` for a conditional change to a
    /// trait whose version is not known.
    pub fn set_updated(
        &mut self,
        trait_handle: TraitDataHandle,
        property: PropertyPathHandle,
        conditional: bool,
    ) -> Result<(), ClientError> {
        let _guard = self.update.guard();
        if matches!(self.state, ClientState::Free | ClientState::Aborting) {
            return Err(ClientError::InvalidState("client not initialized"));
        }
        let index = self
            .update
            .trait_index(trait_handle)
            .ok_or(ClientError::NotUpdatable(trait_handle))?;
        let sink = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.sink(trait_handle))
            .ok_or(ClientError::NotUpdatable(trait_handle))?;

        let required = if conditional {
            let required = self.update.traits[index]
                .update_required_version
                .or(sink.version())
                .ok_or(ClientError::InvalidState(
                    "conditional update needs a known trait version",
                ))?;
            Some(required)
        } else {
            None
        };

        let path = TraitPath::new(trait_handle, property);
        self.update
            .sets
            .add_pending_path(path, Some(sink.schema()), conditional)?;
        let ctx = &mut self.update.traits[index];
        ctx.conditional = Some(conditional);
        if required.is_some() {
            ctx.update_required_version = required;
        }
        tracing::debug!("client[{}] {} marked updated", self.id, path);
        Ok(())
    }

    /// Send the pending changes.
    ///
    /// Clears a previous [`suspend_update_retries`](Self::suspend_update_retries).
    /// While a retry is scheduled the changes join it, unless `force` is set,
    /// which cancels the wait. Before the subscription is established the
    /// changes are sent once it is.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the client is not initialized.
    pub fn flush_update(&mut self, force: bool) -> Result<(), ClientError> {
        let _guard = self.update.guard();
        if matches!(self.state, ClientState::Free | ClientState::Aborting) {
            return Err(ClientError::InvalidState("client not initialized"));
        }
        self.update.retries_suspended = false;
        self.update.sets.mark_ready();
        if self.update.retry_scheduled {
            if !force {
                return Ok(());
            }
            self.cancel_update_retry();
        }
        self.form_and_send_update();
        Ok(())
    }

    /// Drop every pending and in-progress change without reporting it.
    pub fn discard_updates(&mut self) {
        let _guard = self.update.guard();
        self.take_update_exchange(true);
        self.cancel_update_retry();
        self.update.sets.clear();
        for ctx in &mut self.update.traits {
            ctx.end_cycle();
            ctx.clear_potential_data_loss();
        }
        self.update.retry_count = 0;
        self.update.cycle_active = false;
    }

    /// Stop scheduling update retries until the next flush.
    pub fn suspend_update_retries(&mut self) {
        let _guard = self.update.guard();
        self.update.retries_suspended = true;
        self.cancel_update_retry();
    }

    /// Set the payload budget in bytes; 0 selects the default.
    ///
    /// # Errors
    ///
    /// `ConfigurationInvalid` above the default budget.
    pub fn set_max_update_size(&mut self, size: usize) -> Result<(), ClientError> {
        if size > DEFAULT_MAX_UPDATE_SIZE {
            return Err(ClientError::ConfigurationInvalid(format!(
                "update size {} above {}",
                size, DEFAULT_MAX_UPDATE_SIZE
            )));
        }
        self.update.max_update_size = size;
        Ok(())
    }

    /// Payload budget in bytes.
    pub fn max_update_size(&self) -> usize {
        wdm_core::effective_max_update_size(self.update.max_update_size)
    }

    /// Check whether changes wait to be sent or are being sent.
    pub fn is_update_pending_or_in_progress(&self) -> bool {
        self.update.sets.pending_state() != PendingSetState::Empty
            || !self.update.sets.in_progress().is_empty()
    }

    /// Paths waiting to be sent, oldest first.
    pub fn pending_paths(&self) -> Vec<TraitPath> {
        self.update.sets.pending().paths()
    }

    /// Paths being sent, oldest first.
    pub fn in_progress_paths(&self) -> Vec<TraitPath> {
        self.update.sets.in_progress().paths()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    pub(super) fn form_and_send_update(&mut self) {
        let _guard = self.update.guard();
        let epoch = self.epoch;
        loop {
            if self.update.sets.is_in_flight()
                || self.update.retry_scheduled
                || !self.state.is_established()
            {
                return;
            }
            if self.update.sets.in_progress().is_empty() {
                if self.update.sets.pending_state() != PendingSetState::Ready {
                    if self.update.sets.is_empty() {
                        self.finish_update_cycle();
                    }
                    return;
                }
                if let Err(e) = self.update.sets.move_pending_to_in_progress() {
                    tracing::warn!("client[{}] cannot start update: {}", self.id, e);
                    return;
                }
                self.update.cycle_active = true;
                self.set_update_start_versions();
            }

            let Some(catalog) = self.catalog.clone() else {
                return;
            };
            let source = CatalogSource {
                catalog: &catalog,
                traits: &self.update.traits,
            };
            let max = self.update.max_update_size;
            let (in_progress, context) = self.update.sets.batch_parts();
            let formed = form_payload(in_progress, context, &source, max);

            let payload = match formed {
                Ok(payload) => payload,
                Err(e) => {
                    // nothing in progress can be encoded; give up on all of it
                    let error = ClientError::from(e);
                    let records = self.update.sets.in_progress_mut().drain_where(|_| true);
                    self.update.sets.context_mut().rewind();
                    for record in records {
                        self.report_update(record.path, Err(error.clone()), None, false);
                        if self.epoch != epoch {
                            return;
                        }
                    }
                    continue;
                }
            };

            for (record, error) in payload.rejected.iter() {
                self.report_update(record.path, Err(error.clone().into()), None, false);
                if self.epoch != epoch {
                    return;
                }
            }
            if payload.is_empty() {
                self.purge_failed_pending_paths(&HashMap::new());
                if self.epoch != epoch || !self.update.sets.in_progress().is_empty() {
                    return;
                }
                continue;
            }

            self.send_update_payload(payload);
            return;
        }
    }

    fn send_update_payload(&mut self, payload: wdm_core::Payload) {
        let (exchange, timeout) = match self.open_exchange() {
            Ok(opened) => opened,
            Err(e) => {
                self.on_update_no_response(e);
                return;
            }
        };
        tracing::debug!(
            "client[{}] sending update {} with {} element(s)",
            self.id,
            payload.request.update_request_index,
            payload.request.elements.len()
        );
        self.update.exchange = Some(exchange);
        self.update.sets.set_in_flight(true);
        self.update.in_flight = Some(InFlight {
            element_paths: payload.element_paths,
            completed: payload.completed,
        });
        let message = Message::UpdateRequest(payload.request);
        if let Err(e) = self.send_on(exchange, &message, true, timeout) {
            self.on_update_no_response(e);
        }
    }

    fn set_update_start_versions(&mut self) {
        let Some(catalog) = self.catalog.clone() else {
            return;
        };
        for ctx in &mut self.update.traits {
            if self.update.sets.in_progress().has_trait(ctx.handle) {
                ctx.update_start_version = catalog.sink(ctx.handle).and_then(|sink| sink.version());
            }
        }
    }

    // =========================================================================
    // Outcomes
    // =========================================================================

    pub(super) fn on_update_response(&mut self, message: Message) {
        let _guard = self.update.guard();
        let Some(in_flight) = self.take_update_exchange(false) else {
            return;
        };
        let count = in_flight.element_paths.len();
        let outcomes: Vec<(StatusReport, Option<DataVersion>)> = match message {
            Message::UpdateResponse(response) if response.statuses.len() == count => response
                .statuses
                .into_iter()
                .zip(response.versions.into_iter().chain(std::iter::repeat(None)))
                .collect(),
            Message::StatusReport(status) => vec![(status, None); count],
            other => {
                let error = ClientError::MalformedMessage(format!(
                    "unexpected {:?} answering an update",
                    other.message_type()
                ));
                self.on_update_no_response(error);
                return;
            }
        };

        let epoch = self.epoch;
        let mut failures: HashMap<TraitPath, Failure> = HashMap::new();
        let mut retry = false;
        let mut any_success = false;
        for (path, (status, version)) in in_flight.element_paths.iter().zip(outcomes) {
            if status.is_success() {
                any_success = true;
                let completed = in_flight.completed.contains(path);
                self.on_update_element_success(*path, version, completed);
            } else if will_retry_update(&status) {
                retry = true;
                if !self.is_private(path) {
                    let error = ClientError::PeerRejected {
                        status: status.clone(),
                    };
                    self.report_update(*path, Err(error), Some(status), true);
                }
            } else if is_version_mismatch(&status) {
                self.mark_failed_pending_paths(path.trait_handle, version);
                failures.insert(
                    *path,
                    (ClientError::VersionMismatch(path.trait_handle), Some(status)),
                );
            } else {
                self.update.sets.mark_in_progress_failed(path);
                let error = ClientError::PeerRejected {
                    status: status.clone(),
                };
                failures.insert(*path, (error, Some(status)));
            }
            if self.epoch != epoch {
                return;
            }
        }

        self.purge_failed_pending_paths(&failures);
        if self.epoch != epoch {
            return;
        }
        if retry {
            self.retry_update(FailureKind::PeerRejected);
        } else {
            if any_success {
                self.update.retry_count = 0;
            }
            self.form_and_send_update();
        }
    }

    fn on_update_element_success(
        &mut self,
        path: TraitPath,
        version: Option<DataVersion>,
        completed: bool,
    ) {
        if let Some(version) = version {
            self.apply_update_version(path.trait_handle, version);
        }
        if !completed {
            // more chunks of this dictionary follow
            return;
        }
        let Some(record) = self.update.sets.acknowledge(&path) else {
            return;
        };
        let result = if record.flags.contains(PathFlags::POTENTIAL_DATA_LOSS) {
            Err(ClientError::PotentialDataLoss)
        } else {
            Ok(())
        };
        if result.is_ok() && record.flags.contains(PathFlags::PRIVATE) {
            return;
        }
        self.report_update(path, result, Some(StatusReport::success()), false);
    }

    fn apply_update_version(&mut self, trait_handle: TraitDataHandle, version: DataVersion) {
        let Some(index) = self.update.trait_index(trait_handle) else {
            return;
        };
        let Some(sink) = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.sink(trait_handle))
        else {
            return;
        };
        let ctx = &mut self.update.traits[index];
        if sink.version() == ctx.update_start_version {
            sink.set_version(version);
        } else {
            // a notification moved the trait on while the update was out
            ctx.potential_data_loss = true;
        }
        ctx.update_start_version = Some(version);
        if ctx.conditional == Some(true) {
            ctx.update_required_version = Some(version);
        }
    }

    /// The update exchange failed or timed out. Everything in progress goes
    /// back to pending and a retry is scheduled.
    pub(super) fn on_update_no_response(&mut self, reason: ClientError) {
        let _guard = self.update.guard();
        self.take_update_exchange(true);
        tracing::warn!("client[{}] update not answered: {}", self.id, reason);

        let epoch = self.epoch;
        let paths: Vec<TraitPath> = self
            .update
            .sets
            .in_progress()
            .iter()
            .filter(|record| !record.flags.contains(PathFlags::PRIVATE))
            .map(|record| record.path)
            .collect();
        for path in paths {
            self.report_update(path, Err(reason.clone()), None, true);
            if self.epoch != epoch {
                return;
            }
        }
        self.retry_update(reason.failure_kind());
    }

    fn retry_update(&mut self, kind: FailureKind) {
        if !self.restore_in_progress() {
            return;
        }
        self.start_update_retry_timer(kind);
    }

    /// Move in-progress records back to pending. When they no longer fit,
    /// they are given up on. Returns false if a callback ended the
    /// subscription.
    fn restore_in_progress(&mut self) -> bool {
        let Err(e) = self.update.sets.move_in_progress_to_pending() else {
            return true;
        };
        let error = ClientError::from(e);
        let records = self.update.sets.in_progress_mut().drain_where(|_| true);
        self.update.sets.context_mut().rewind();
        let epoch = self.epoch;
        for record in records {
            self.report_update(record.path, Err(error.clone()), None, false);
            if self.epoch != epoch {
                return false;
            }
        }
        true
    }

    fn start_update_retry_timer(&mut self, kind: FailureKind) {
        if self.update.retries_suspended {
            tracing::debug!("client[{}] update retries suspended", self.id);
            return;
        }
        let attempt = ResubscribeAttempt {
            reason: kind,
            retry_count: self.update.retry_count,
            request_type: RequestType::Update,
        };
        let interval = match self.policy.as_mut() {
            Some(policy) => policy.next_interval(&attempt),
            None => self.update.backoff.next_interval(&attempt),
        };
        self.update.retry_count = self.update.retry_count.saturating_add(1);
        self.update.retry_scheduled = true;
        self.timers.start(TimerKind::UpdateRetry, interval);
        tracing::debug!("client[{}] update retry in {:?}", self.id, interval);
    }

    fn cancel_update_retry(&mut self) {
        if self.update.retry_scheduled {
            self.update.retry_scheduled = false;
            self.timers.cancel(TimerKind::UpdateRetry);
        }
    }

    pub(super) fn on_update_retry_timer(&mut self) {
        let _guard = self.update.guard();
        if !self.update.retry_scheduled {
            return;
        }
        self.update.retry_scheduled = false;
        self.form_and_send_update();
    }

    /// Close or abort the update exchange. Returns what was in flight.
    fn take_update_exchange(&mut self, abort: bool) -> Option<InFlight> {
        if let Some(exchange) = self.update.exchange.take() {
            self.end_exchange(exchange, abort);
        }
        self.update.sets.set_in_flight(false);
        self.update.in_flight.take()
    }

    /// The subscription is going to be retried: keep every change for the
    /// next subscription.
    pub(super) fn requeue_updates(&mut self) {
        let _guard = self.update.guard();
        self.take_update_exchange(true);
        self.cancel_update_retry();
        self.restore_in_progress();
    }

    /// The subscription ended for good: every change fails with `reason`.
    pub(super) fn abort_updates(&mut self, reason: ClientError) {
        let _guard = self.update.guard();
        self.take_update_exchange(true);
        self.cancel_update_retry();
        let records = self.update.sets.drain_all();
        if records.is_empty() && !self.update.cycle_active {
            return;
        }
        self.update.cycle_active = true;
        let epoch = self.epoch;
        for record in records {
            self.report_update(record.path, Err(reason.clone()), None, false);
            if self.epoch != epoch {
                return;
            }
        }
        self.finish_update_cycle();
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Report and remove every `FAILED` record. Failures not listed in
    /// `failures` are version conflicts. Returns how many were removed.
    fn purge_failed_pending_paths(&mut self, failures: &HashMap<TraitPath, Failure>) -> usize {
        let failed = self.update.sets.take_failed();
        let count = failed.len();
        let epoch = self.epoch;
        for record in failed {
            let (error, status) = failures
                .get(&record.path)
                .cloned()
                .unwrap_or((ClientError::VersionMismatch(record.path.trait_handle), None));
            self.report_update(record.path, Err(error), status, false);
            if self.epoch != epoch {
                break;
            }
        }
        count
    }

    /// A conditional update of the trait lost against a newer version. Every
    /// outstanding change to it fails; when the peer named a version other
    /// than ours, the local copy is stale.
    fn mark_failed_pending_paths(
        &mut self,
        trait_handle: TraitDataHandle,
        latest_version: Option<DataVersion>,
    ) {
        let marked = self.update.sets.mark_failed(trait_handle);
        tracing::warn!(
            "client[{}] version conflict on trait {}, {} path(s) failed",
            self.id,
            trait_handle,
            marked
        );
        let Some(index) = self.update.trait_index(trait_handle) else {
            return;
        };
        let local = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.sink(trait_handle))
            .and_then(|sink| sink.version());
        let ctx = &mut self.update.traits[index];
        ctx.update_required_version = None;
        if latest_version.is_some() && latest_version != local {
            ctx.potential_data_loss = true;
        }
    }

    /// Flag outstanding changes that a notified path overlaps. Returns
    /// whether any was flagged.
    pub(super) fn filter_notified_path(&mut self, path: &TraitPath) -> bool {
        let _guard = self.update.guard();
        if !self.update.sets.has_trait(path.trait_handle) {
            return false;
        }
        let flagged = self.update.sets.flag_potential_data_loss(path);
        if flagged {
            tracing::warn!(
                "client[{}] notification for {} overlaps a local change",
                self.id,
                path
            );
            if let Some(index) = self.update.trait_index(path.trait_handle) {
                self.update.traits[index].potential_data_loss = true;
            }
        }
        flagged
    }

    /// Forget the version of every trait that may have lost data, and
    /// resubscribe to refetch it. Returns whether any trait was affected.
    pub fn check_for_sinks_with_data_loss(&mut self) -> bool {
        let Some(catalog) = self.catalog.clone() else {
            return false;
        };
        let mut found = false;
        for ctx in self.update.traits.iter_mut().filter(|ctx| ctx.potential_data_loss) {
            if let Some(sink) = catalog.sink(ctx.handle) {
                sink.clear_version();
            }
            ctx.clear_potential_data_loss();
            found = true;
        }
        if found && self.state.is_in_progress_or_established() {
            self.handle_subscription_terminated(Some(ClientError::PotentialDataLoss), None);
        }
        found
    }

    fn finish_update_cycle(&mut self) {
        if !self.update.cycle_active {
            return;
        }
        self.update.cycle_active = false;
        self.update.retry_count = 0;
        for ctx in &mut self.update.traits {
            ctx.end_cycle();
        }
        let epoch = self.epoch;
        self.notify(InEventParam::NoMorePendingUpdates);
        if self.epoch == epoch {
            self.check_for_sinks_with_data_loss();
        }
    }

    fn is_private(&self, path: &TraitPath) -> bool {
        self.update
            .sets
            .in_progress()
            .iter()
            .chain(self.update.sets.pending().iter())
            .find(|record| record.path == *path)
            .is_some_and(|record: &PathRecord| record.flags.contains(PathFlags::PRIVATE))
    }

    fn report_update(
        &mut self,
        path: TraitPath,
        result: Result<(), ClientError>,
        status: Option<StatusReport>,
        will_retry: bool,
    ) {
        match &result {
            Ok(()) => tracing::debug!("client[{}] update of {} accepted", self.id, path),
            Err(e) => tracing::warn!(
                "client[{}] update of {} failed{}: {}",
                self.id,
                path,
                if will_retry { ", will retry" } else { "" },
                e
            ),
        }
        self.notify(InEventParam::UpdateComplete {
            path,
            result,
            status,
            will_retry,
        });
    }
}
