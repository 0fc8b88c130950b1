//! Forwarding dispatcher. Classify, resolve, then notify/forward/confirm per
//! destination with failures isolated to the destination they hit.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info};

use crate::config::DispatchConfig;
use crate::error::{DeliveryError, DispatchError, RuleError};
use crate::forwarding::notice::{Notice, build_notice, confirmation};
use crate::forwarding::rules::RuleEngine;
use crate::model::{AccountId, ChatId};
use crate::relay::RelaySender;
use crate::session::event::InboundEvent;
use crate::session::transport::{EventForwarder, EventHandler, SessionContext};
use crate::store::RuleSource;

/// What happened at one destination.
#[derive(Debug)]
pub enum DestinationOutcome {
    /// Notification sent; nothing to forward.
    Notified,
    /// Notification, forward, and confirmation all sent.
    Forwarded,
    Failed(DeliveryError),
}

impl DestinationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of dispatching one event.
#[derive(Debug)]
pub struct DispatchReport {
    pub account_id: AccountId,
    pub message_id: i64,
    pub destinations: BTreeSet<ChatId>,
    /// No rule matched, so the event went to the account itself.
    pub fell_back_to_self: bool,
    pub skipped_rules: Vec<RuleError>,
    pub should_forward: bool,
    pub outcomes: Vec<(ChatId, DestinationOutcome)>,
}

impl DispatchReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }

    pub fn outcome(&self, destination: ChatId) -> Option<&DestinationOutcome> {
        self.outcomes
            .iter()
            .find(|(d, _)| *d == destination)
            .map(|(_, o)| o)
    }
}

/// The event handler attached to every session.
pub struct ForwardingDispatcher {
    rules: Arc<dyn RuleSource>,
    relay: Arc<dyn RelaySender>,
    config: DispatchConfig,
}

impl ForwardingDispatcher {
    pub fn new(rules: Arc<dyn RuleSource>, relay: Arc<dyn RelaySender>, config: DispatchConfig) -> Self {
        Self {
            rules,
            relay,
            config,
        }
    }

    /// Handle one event to completion. Only a failed rule fetch fails the
    /// whole call; per-destination failures land in the report.
    pub async fn dispatch(
        &self,
        ctx: SessionContext<'_>,
        event: &InboundEvent,
    ) -> Result<DispatchReport, DispatchError> {
        let account_id = ctx.account_id;
        let notice = build_notice(event);

        let records = self
            .rules
            .rules_for(account_id)
            .await
            .map_err(|source| DispatchError::RuleFetch { account_id, source })?;
        let resolution = RuleEngine::resolve_destinations(account_id, event.origin(), &records);

        let fell_back_to_self = resolution.destinations.is_empty();
        let destinations = if fell_back_to_self {
            info!(
                account_id,
                message_id = event.message_id,
                "No rule matched, delivering to the account itself"
            );
            BTreeSet::from([account_id])
        } else {
            resolution.destinations
        };

        let notice = &notice;
        let outcomes = join_all(destinations.iter().map(|&destination| async move {
            let outcome = match self
                .deliver(ctx.forwarder, event, notice, destination)
                .await
            {
                Ok(outcome) => {
                    info!(
                        account_id,
                        message_id = event.message_id,
                        destination,
                        outcome = ?outcome,
                        "Delivered"
                    );
                    outcome
                }
                Err(e) => {
                    error!(
                        account_id,
                        message_id = event.message_id,
                        destination,
                        error = %e,
                        "Delivery failed"
                    );
                    DestinationOutcome::Failed(e)
                }
            };
            (destination, outcome)
        }))
        .await;

        Ok(DispatchReport {
            account_id,
            message_id: event.message_id,
            destinations,
            fell_back_to_self,
            skipped_rules: resolution.skipped,
            should_forward: notice.should_forward,
            outcomes,
        })
    }

    /// Notify, then (if forwardable) forward to the relay identity and
    /// confirm. Strictly in that order.
    async fn deliver(
        &self,
        forwarder: &dyn EventForwarder,
        event: &InboundEvent,
        notice: &Notice,
        destination: ChatId,
    ) -> Result<DestinationOutcome, DeliveryError> {
        self.bounded(
            destination,
            "notification",
            self.relay
                .send_text(destination, &notice.text, notice.button.as_ref()),
        )
        .await?
        .map_err(|source| DeliveryError::Notify {
            destination,
            source,
        })?;

        if !notice.should_forward {
            return Ok(DestinationOutcome::Notified);
        }

        self.bounded(
            destination,
            "forward",
            forwarder.forward_event(event, self.relay.identity()),
        )
        .await?
        .map_err(|source| DeliveryError::Forward {
            destination,
            source,
        })?;

        self.bounded(
            destination,
            "confirmation",
            self.relay.send_text(
                destination,
                &confirmation(notice.kind),
                notice.button.as_ref(),
            ),
        )
        .await?
        .map_err(|source| DeliveryError::Confirm {
            destination,
            source,
        })?;

        Ok(DestinationOutcome::Forwarded)
    }

    async fn bounded<T>(
        &self,
        destination: ChatId,
        step: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, DeliveryError> {
        tokio::time::timeout(self.config.send_timeout, fut)
            .await
            .map_err(|_| DeliveryError::Timeout {
                destination,
                step,
                timeout: self.config.send_timeout,
            })
    }
}

#[async_trait]
impl EventHandler for ForwardingDispatcher {
    async fn on_event(&self, ctx: SessionContext<'_>, event: InboundEvent) {
        match self.dispatch(ctx, &event).await {
            Ok(report) => info!(
                account_id = report.account_id,
                message_id = report.message_id,
                destinations = report.destinations.len(),
                failures = report.failures(),
                fell_back_to_self = report.fell_back_to_self,
                "Event dispatched"
            ),
            Err(e) => error!(
                account_id = ctx.account_id,
                message_id = event.message_id,
                error = %e,
                "Event dropped"
            ),
        }
    }
}
