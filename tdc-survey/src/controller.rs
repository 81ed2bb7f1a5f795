//! Page controller: runs transitions against the store
//!
//! A transition's effects run in order, each under the retry policy. The
//! session moves on only when every effect succeeds, so a failed write
//! leaves the participant where they were, free to resubmit. Effects that
//! did succeed are marked on the session first, and a resubmit skips them.
//!
//! Appends are not idempotent. They are retried only on errors that prove
//! the request never reached the store; a timeout or 5xx after sending is
//! reported as is.

use std::sync::Arc;
use tdc_common::config::CounterUpdate;
use tracing::{info, warn};

use crate::design::QuestionBank;
use crate::error::SurveyResult;
use crate::flow::{transition, Effect, Event};
use crate::session::Session;
use crate::store::{with_retry, with_retry_if, RetryPolicy, StoreError, SurveyStore, Table};

pub struct SurveyController {
    store: Arc<dyn SurveyStore>,
    retry: RetryPolicy,
    counter_update: CounterUpdate,
}

impl SurveyController {
    pub fn new(store: Arc<dyn SurveyStore>, retry: RetryPolicy, counter_update: CounterUpdate) -> Self {
        Self {
            store,
            retry,
            counter_update,
        }
    }

    pub fn store(&self) -> &Arc<dyn SurveyStore> {
        &self.store
    }

    pub fn counter_update(&self) -> CounterUpdate {
        self.counter_update
    }

    /// Create a session for a new participant from the shared counter
    ///
    /// An empty or non-numeric counter cell is a configuration error and is
    /// never retried.
    pub async fn open_session(&self, ticket_price: f64, trip_duration: u32) -> SurveyResult<Session> {
        let store = &self.store;
        let counter = with_retry("read counter", &self.retry, move || store.read_counter()).await?;

        let session = Session::new(counter, ticket_price, trip_duration, tdc_common::time::now());
        info!(
            counter,
            group_id = session.group_id(),
            travel_context = session.travel_context,
            "Participant session created"
        );
        Ok(session)
    }

    /// Transition `session` by `event` and perform the resulting writes
    ///
    /// On success `session` holds the next state and the inline notice, if
    /// any, is returned. On failure `session` keeps its page and only
    /// records the writes that completed.
    pub async fn apply(
        &self,
        session: &mut Session,
        event: Event,
        bank: &QuestionBank,
    ) -> SurveyResult<Option<String>> {
        let t = transition(session, event, bank, tdc_common::time::now())?;
        for effect in &t.effects {
            self.execute(effect).await?;
            effect.mark_done(session);
        }
        *session = t.session;
        Ok(t.notice)
    }

    async fn execute(&self, effect: &Effect) -> SurveyResult<()> {
        let store = &self.store;
        match effect {
            Effect::AppendResponses(rows) => {
                with_retry_if("append responses", &self.retry, StoreError::is_unsent, move || {
                    store.append_rows(Table::Responses, rows.clone())
                })
                .await?;
            }
            Effect::AppendDemographics(row) => {
                with_retry_if("append demographics", &self.retry, StoreError::is_unsent, move || {
                    store.append_rows(Table::Demographics, vec![row.clone()])
                })
                .await?;
            }
            Effect::AdvanceCounter { observed } => {
                let value = self.advance_counter(*observed).await?;
                info!(counter = value, mode = %self.counter_update, "Participant counter advanced");
            }
        }
        Ok(())
    }

    async fn advance_counter(&self, observed: u64) -> SurveyResult<u64> {
        let store = &self.store;
        match self.counter_update {
            CounterUpdate::ReadModifyWrite => {
                // Nothing stops another session writing between these two calls
                let current =
                    with_retry("read counter", &self.retry, move || store.read_counter()).await?;
                if current != observed {
                    warn!(observed, current, "Counter moved since this session started");
                }
                let next = current + 1;
                with_retry("write counter", &self.retry, move || store.write_counter(next)).await?;
                Ok(next)
            }
            CounterUpdate::Atomic => {
                let next = with_retry_if(
                    "increment counter",
                    &self.retry,
                    StoreError::is_unsent,
                    move || store.increment_counter(),
                )
                .await?;
                Ok(next)
            }
        }
    }
}
