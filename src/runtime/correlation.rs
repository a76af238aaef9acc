//! Registry of parked catch events and thrown messages, and the matching between them.
//!
//! Ties are always broken by lowest id: messages are delivered in id order and each one goes to
//! the lowest-id compatible waiting event that has not been claimed by an earlier message.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, ErrorContext, Result};
use crate::model::Timestamp;
use crate::model::event::{MAX_CORRELATIONS, MessageInstance, WaitingEvent, WaitingEventKind};
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::store::{
    CoupleStore, Direction, Entity, Filter, OrderBy, QueryOptions, Repository, delete_matching,
    list_all,
};

/// A thrown message and a waiting message event it can be delivered to.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEventCouple {
    pub message_instance_id: u64,
    pub waiting_event_id: u64,
    /// Start-event subscriptions survive the match.
    pub keep_waiting_event: bool,
}

fn by_id() -> Vec<OrderBy> {
    vec![OrderBy {
        field: "id".to_string(),
        direction: Direction::Asc,
    }]
}

fn waiting_context(event: &WaitingEvent) -> ErrorContext {
    let mut context = ErrorContext::default();
    context.process_definition_id = Some(event.process_definition_id);
    context.process_instance_id = event.process_instance_id;
    context.flow_node_instance_id = event.flow_node_instance_id;
    context
}

#[derive(Clone)]
pub struct EventCorrelationEngine {
    waiting_events: Arc<dyn Repository<WaitingEvent>>,
    message_instances: Arc<dyn Repository<MessageInstance>>,
    couples: Arc<dyn CoupleStore>,
    notifier: ChangeNotifier,
    page_size: usize,
}

impl EventCorrelationEngine {
    pub fn new(
        waiting_events: Arc<dyn Repository<WaitingEvent>>,
        message_instances: Arc<dyn Repository<MessageInstance>>,
        couples: Arc<dyn CoupleStore>,
        notifier: ChangeNotifier,
        page_size: usize,
    ) -> Self {
        Self {
            waiting_events,
            message_instances,
            couples,
            notifier,
            page_size,
        }
    }

    pub async fn create_waiting_event(&self, event: WaitingEvent) -> Result<WaitingEvent> {
        if let WaitingEventKind::Message { correlations, .. } = &event.kind
            && correlations.len() > MAX_CORRELATIONS
        {
            return Err(EngineError::InvalidOperation(format!(
                "a waiting message event carries at most {} correlations, got {}",
                MAX_CORRELATIONS,
                correlations.len()
            )));
        }
        let context = waiting_context(&event);
        let event = self
            .waiting_events
            .insert(event)
            .await
            .map_err(EngineError::creation(WaitingEvent::KIND, context))?;
        debug!(
            waiting_event_id = event.id,
            kind = event.kind.as_str(),
            flow_node_instance_id = ?event.flow_node_instance_id,
            "Waiting event created"
        );
        self.notifier.notify(ChangeKind::Created, &event);
        Ok(event)
    }

    pub async fn create_message_instance(&self, message: MessageInstance) -> Result<MessageInstance> {
        if message.correlations.len() > MAX_CORRELATIONS {
            return Err(EngineError::InvalidOperation(format!(
                "a message carries at most {} correlations, got {}",
                MAX_CORRELATIONS,
                message.correlations.len()
            )));
        }
        let mut context = ErrorContext::default();
        context.process_instance_id = message.thrown_by_process_instance_id;
        let message = self
            .message_instances
            .insert(message)
            .await
            .map_err(EngineError::creation(MessageInstance::KIND, context))?;
        debug!(message_instance_id = message.id, name = %message.message_name, "Message thrown");
        self.notifier.notify(ChangeKind::Created, &message);
        Ok(message)
    }

    pub async fn get_waiting_event(&self, id: u64) -> Result<WaitingEvent> {
        self.waiting_events
            .get(id)
            .await
            .map_err(EngineError::read(WaitingEvent::KIND))?
            .ok_or(EngineError::not_found(WaitingEvent::KIND, id))
    }

    pub async fn search_waiting_events(&self, options: &QueryOptions) -> Result<Vec<WaitingEvent>> {
        self.waiting_events
            .list(options)
            .await
            .map_err(EngineError::search(WaitingEvent::KIND))
    }

    pub async fn get_message_instance(&self, id: u64) -> Result<MessageInstance> {
        self.message_instances
            .get(id)
            .await
            .map_err(EngineError::read(MessageInstance::KIND))?
            .ok_or(EngineError::not_found(MessageInstance::KIND, id))
    }

    pub async fn search_message_instances(&self, options: &QueryOptions) -> Result<Vec<MessageInstance>> {
        self.message_instances
            .list(options)
            .await
            .map_err(EngineError::search(MessageInstance::KIND))
    }

    /// Compatible (thrown, waiting) pairs among the rows not already being handled.
    pub async fn get_message_event_couples(&self) -> Result<Vec<MessageEventCouple>> {
        let messages = list_all(
            self.message_instances.as_ref(),
            &Filter::new().eq("in_progress", false),
            &by_id(),
            self.page_size,
        )
        .await
        .map_err(EngineError::search(MessageInstance::KIND))?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let waiting = list_all(
            self.waiting_events.as_ref(),
            &Filter::new().eq("kind", "message").eq("in_progress", false),
            &by_id(),
            self.page_size,
        )
        .await
        .map_err(EngineError::search(WaitingEvent::KIND))?;

        let mut claimed = vec![false; waiting.len()];
        let mut couples = Vec::new();
        for message in &messages {
            let candidate = waiting
                .iter()
                .enumerate()
                .find(|(i, w)| (!claimed[*i] || w.is_start_subscription()) && message.matches(w));
            if let Some((i, w)) = candidate {
                claimed[i] = true;
                couples.push(MessageEventCouple {
                    message_instance_id: message.id,
                    waiting_event_id: w.id,
                    keep_waiting_event: w.is_start_subscription(),
                });
            }
        }
        Ok(couples)
    }

    /// Deletes both sides of the couple in one step. `None` means another worker consumed one
    /// of them first.
    pub async fn consume_couple(
        &self,
        couple: &MessageEventCouple,
    ) -> Result<Option<(MessageInstance, WaitingEvent)>> {
        let consumed = self
            .couples
            .consume_couple(
                couple.message_instance_id,
                couple.waiting_event_id,
                couple.keep_waiting_event,
            )
            .await
            .map_err(EngineError::deletion(MessageInstance::KIND, ErrorContext::default()))?;
        if let Some((message, waiting)) = &consumed {
            self.notifier.notify(ChangeKind::Deleted, message);
            if !couple.keep_waiting_event {
                self.notifier.notify(ChangeKind::Deleted, waiting);
            }
        }
        Ok(consumed)
    }

    /// Matches and consumes every deliverable message.
    pub async fn correlate_messages(&self) -> Result<Vec<(MessageInstance, WaitingEvent)>> {
        let couples = self.get_message_event_couples().await?;
        let mut delivered = Vec::with_capacity(couples.len());
        for couple in &couples {
            match self.consume_couple(couple).await? {
                Some(pair) => delivered.push(pair),
                None => warn!(
                    message_instance_id = couple.message_instance_id,
                    waiting_event_id = couple.waiting_event_id,
                    "Couple already consumed by another worker"
                ),
            }
        }
        if !delivered.is_empty() {
            info!(delivered = delivered.len(), "Messages correlated");
        }
        Ok(delivered)
    }

    /// The boundary error catch for an error thrown by `activity_id`.
    ///
    /// An exact code match wins over the code-less catch-all. More than one candidate at the
    /// winning level is an ambiguous configuration.
    pub async fn find_boundary_error(
        &self,
        activity_id: u64,
        error_code: Option<&str>,
    ) -> Result<Option<WaitingEvent>> {
        let candidates = list_all(
            self.waiting_events.as_ref(),
            &Filter::new()
                .eq("kind", "error")
                .eq("related_activity_instance_id", activity_id),
            &by_id(),
            self.page_size,
        )
        .await
        .map_err(EngineError::search(WaitingEvent::KIND))?;

        let with_code = |code: Option<&str>| -> Vec<&WaitingEvent> {
            candidates
                .iter()
                .filter(|w| match &w.kind {
                    WaitingEventKind::Error { error_code, .. } => error_code.as_deref() == code,
                    _ => false,
                })
                .collect()
        };

        let mut levels = Vec::with_capacity(2);
        if error_code.is_some() {
            levels.push(error_code);
        }
        levels.push(None);
        for level in levels {
            let matches = with_code(level);
            match matches.len() {
                0 => continue,
                1 => return Ok(Some(matches[0].clone())),
                n => {
                    return Err(EngineError::AmbiguousConfiguration(format!(
                        "{} boundary error events catch {} on activity instance {}",
                        n,
                        level.unwrap_or("every error"),
                        activity_id
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Triggers every waiting signal event named `signal_name`. Start-event subscriptions are
    /// reported but kept.
    pub async fn throw_signal(&self, signal_name: &str) -> Result<Vec<WaitingEvent>> {
        let waiting = list_all(
            self.waiting_events.as_ref(),
            &Filter::new()
                .eq("kind", "signal")
                .eq("name", signal_name)
                .eq("in_progress", false),
            &by_id(),
            self.page_size,
        )
        .await
        .map_err(EngineError::search(WaitingEvent::KIND))?;
        let mut triggered = Vec::with_capacity(waiting.len());
        for event in waiting {
            if self.consume_waiting_event(&event).await? {
                triggered.push(event);
            }
        }
        info!(signal = signal_name, triggered = triggered.len(), "Signal thrown");
        Ok(triggered)
    }

    /// Timer events due at or before `now`, earliest first.
    pub async fn get_due_timers(&self, now: Timestamp, options: &QueryOptions) -> Result<Vec<WaitingEvent>> {
        let options = options
            .clone()
            .filter(
                Filter::new()
                    .eq("kind", "timer")
                    .eq("in_progress", false)
                    .le("due_date", now),
            )
            .order_by("due_date", Direction::Asc);
        self.search_waiting_events(&options).await
    }

    /// Fires one timer. A timer that is already gone (fired elsewhere or its flow node ended)
    /// yields `None`.
    pub async fn trigger_timer(&self, waiting_event_id: u64) -> Result<Option<WaitingEvent>> {
        let Some(event) = self
            .waiting_events
            .get(waiting_event_id)
            .await
            .map_err(EngineError::read(WaitingEvent::KIND))?
        else {
            return Ok(None);
        };
        if !matches!(event.kind, WaitingEventKind::Timer { .. }) {
            return Err(EngineError::InvalidOperation(format!(
                "waiting event {} is a {} event, not a timer",
                waiting_event_id,
                event.kind.as_str()
            )));
        }
        if self.consume_waiting_event(&event).await? {
            debug!(waiting_event_id, "Timer triggered");
            Ok(Some(event))
        } else {
            Ok(None)
        }
    }

    /// Removes a triggered event unless it is a standing start subscription. Returns false if
    /// another worker removed it first.
    async fn consume_waiting_event(&self, event: &WaitingEvent) -> Result<bool> {
        if event.is_start_subscription() {
            return Ok(true);
        }
        let removed = self
            .waiting_events
            .delete(event.id)
            .await
            .map_err(EngineError::deletion(WaitingEvent::KIND, waiting_context(event)))?;
        if removed {
            self.notifier.notify(ChangeKind::Deleted, event);
        } else {
            warn!(waiting_event_id = event.id, "Waiting event already consumed");
        }
        Ok(removed)
    }

    pub async fn get_in_progress_message_instances(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<MessageInstance>> {
        let options = options.clone().filter(Filter::new().eq("in_progress", true));
        self.search_message_instances(&options).await
    }

    pub async fn get_in_progress_waiting_message_events(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<WaitingEvent>> {
        let options = options
            .clone()
            .filter(Filter::new().eq("kind", "message").eq("in_progress", true));
        self.search_waiting_events(&options).await
    }

    pub async fn set_message_in_progress(&self, id: u64, in_progress: bool) -> Result<MessageInstance> {
        let mut message = self.get_message_instance(id).await?;
        message.in_progress = in_progress;
        let mut context = ErrorContext::default();
        context.process_instance_id = message.thrown_by_process_instance_id;
        let updated = self
            .message_instances
            .update(&message)
            .await
            .map_err(EngineError::modification(MessageInstance::KIND, context))?;
        if !updated {
            return Err(EngineError::not_found(MessageInstance::KIND, id));
        }
        self.notifier.notify(ChangeKind::Updated, &message);
        Ok(message)
    }

    pub async fn set_waiting_event_in_progress(&self, id: u64, in_progress: bool) -> Result<WaitingEvent> {
        let mut event = self.get_waiting_event(id).await?;
        event.in_progress = in_progress;
        let updated = self
            .waiting_events
            .update(&event)
            .await
            .map_err(EngineError::modification(WaitingEvent::KIND, waiting_context(&event)))?;
        if !updated {
            return Err(EngineError::not_found(WaitingEvent::KIND, id));
        }
        self.notifier.notify(ChangeKind::Updated, &event);
        Ok(event)
    }

    /// Clears the in-progress flag of every message instance. Run by recovery at startup.
    pub async fn reset_in_progress_message_instances(&self) -> Result<usize> {
        let stuck = list_all(
            self.message_instances.as_ref(),
            &Filter::new().eq("in_progress", true),
            &by_id(),
            self.page_size,
        )
        .await
        .map_err(EngineError::search(MessageInstance::KIND))?;
        for message in &stuck {
            self.set_message_in_progress(message.id, false).await?;
        }
        if !stuck.is_empty() {
            warn!(count = stuck.len(), "Reset in-progress message instances");
        }
        Ok(stuck.len())
    }

    /// Clears the in-progress flag of every waiting message event. Run by recovery at startup.
    pub async fn reset_in_progress_waiting_events(&self) -> Result<usize> {
        let stuck = list_all(
            self.waiting_events.as_ref(),
            &Filter::new().eq("kind", "message").eq("in_progress", true),
            &by_id(),
            self.page_size,
        )
        .await
        .map_err(EngineError::search(WaitingEvent::KIND))?;
        for event in &stuck {
            self.set_waiting_event_in_progress(event.id, false).await?;
        }
        if !stuck.is_empty() {
            warn!(count = stuck.len(), "Reset in-progress waiting message events");
        }
        Ok(stuck.len())
    }

    /// Removes every waiting event owned by a flow node.
    pub async fn delete_waiting_events(&self, flow_node_instance_id: u64) -> Result<usize> {
        delete_matching(
            self.waiting_events.as_ref(),
            &Filter::new().eq("flow_node_instance_id", flow_node_instance_id),
            self.page_size,
        )
        .await
        .map_err(EngineError::deletion(
            WaitingEvent::KIND,
            ErrorContext::default().flow_node_instance(flow_node_instance_id),
        ))
    }

    /// Removes every waiting event of a process instance.
    pub async fn delete_process_waiting_events(&self, process_instance_id: u64) -> Result<usize> {
        delete_matching(
            self.waiting_events.as_ref(),
            &Filter::new().eq("process_instance_id", process_instance_id),
            self.page_size,
        )
        .await
        .map_err(EngineError::deletion(
            WaitingEvent::KIND,
            ErrorContext::default().process_instance(process_instance_id),
        ))
    }

    /// Removes the undelivered messages thrown by a process instance.
    pub async fn delete_thrown_messages(&self, process_instance_id: u64) -> Result<usize> {
        delete_matching(
            self.message_instances.as_ref(),
            &Filter::new().eq("thrown_by_process_instance_id", process_instance_id),
            self.page_size,
        )
        .await
        .map_err(EngineError::deletion(
            MessageInstance::KIND,
            ErrorContext::default().process_instance(process_instance_id),
        ))
    }
}
