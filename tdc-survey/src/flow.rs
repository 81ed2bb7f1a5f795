//! Page state machine
//!
//! `transition` is pure: it takes the current session and an event and
//! returns the next session plus the store writes that must succeed before
//! the next session may replace the current one. Executing those writes is
//! the controller's job.
//!
//! ```text
//! Start --StartSurvey--> Survey --Next(last)--> Demographics --Submit--> End
//!                        ^    |
//!                        +----+ Next / Back
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tdc_common::time::{elapsed_minutes, format_local};
use thiserror::Error;
use tracing::{debug, info};

use crate::design::QuestionBank;
use crate::session::{Choice, ComprehensionAnswers, Page, Session};
use crate::store::Row;

pub const AGE_OPTIONS: [&str; 7] = [
    "Prefer not to say",
    "18–29",
    "30–39",
    "40–49",
    "50–59",
    "60–69",
    "70+",
];

pub const GENDER_OPTIONS: [&str; 4] = ["Prefer not to say", "Female", "Male", "Diverse"];

/// Used for both the train and the subway frequency questions
pub const FREQUENCY_OPTIONS: [&str; 6] = [
    "Prefer not to say",
    "None",
    "Daily",
    "Weekly",
    "Monthly",
    "Yearly",
];

pub const MOBILITY_OPTIONS: [&str; 6] = [
    "Prefer not to say",
    "0 - No problems",
    "1 - Minor limitations",
    "2 - Moderate limitations",
    "3 - Severe limitations",
    "4 - Unstable / Handicapped",
];

/// Submitted demographics form
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DemographicsForm {
    pub age: String,
    pub gender: String,
    pub travel_frequency: String,
    pub ubahn_frequency: String,
    pub mobility: String,
    pub comment: String,
}

impl Default for DemographicsForm {
    fn default() -> Self {
        Self {
            age: AGE_OPTIONS[0].to_string(),
            gender: GENDER_OPTIONS[0].to_string(),
            travel_frequency: FREQUENCY_OPTIONS[0].to_string(),
            ubahn_frequency: FREQUENCY_OPTIONS[0].to_string(),
            mobility: MOBILITY_OPTIONS[0].to_string(),
            comment: String::new(),
        }
    }
}

impl DemographicsForm {
    fn validate(&self) -> Result<(), FlowError> {
        let fields: [(&str, &str, &[&str]); 5] = [
            ("age", self.age.as_str(), &AGE_OPTIONS[..]),
            ("gender", self.gender.as_str(), &GENDER_OPTIONS[..]),
            ("travel frequency", self.travel_frequency.as_str(), &FREQUENCY_OPTIONS[..]),
            ("subway frequency", self.ubahn_frequency.as_str(), &FREQUENCY_OPTIONS[..]),
            ("mobility", self.mobility.as_str(), &MOBILITY_OPTIONS[..]),
        ];

        for (field, value, options) in fields {
            if !options.contains(&value) {
                return Err(FlowError::Validation(format!(
                    "Please choose one of the listed options for {}.",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Participant actions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConfirmComprehension(ComprehensionAnswers),
    StartSurvey,
    Next { choice: Choice },
    Back,
    SubmitDemographics(DemographicsForm),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConfirmComprehension(_) => "confirm_comprehension",
            Event::StartSurvey => "start_survey",
            Event::Next { .. } => "next",
            Event::Back => "back",
            Event::SubmitDemographics(_) => "submit_demographics",
        }
    }
}

/// Store writes requested by a transition, executed in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// One row per question, in question order
    AppendResponses(Vec<Row>),
    AppendDemographics(Row),
    /// Advance the shared counter; `observed` is the value read at session start
    AdvanceCounter { observed: u64 },
}

impl Effect {
    /// Record on `session` that this write went through
    ///
    /// Applied to the pre-transition session as each write succeeds, so a
    /// failure further down the list does not make a resubmit repeat it.
    pub fn mark_done(&self, session: &mut Session) {
        match self {
            Effect::AppendResponses(_) => session.responses_submitted = true,
            Effect::AppendDemographics(_) => session.demographics_appended = true,
            Effect::AdvanceCounter { .. } => {}
        }
    }
}

/// Result of a successful transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session: Session,
    pub effects: Vec<Effect>,
    /// Recoverable rejection to show inline; the session still advances
    pub notice: Option<String>,
}

impl Transition {
    fn to(session: Session) -> Self {
        Self {
            session,
            effects: Vec::new(),
            notice: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Bad input the participant can correct
    #[error("{0}")]
    Validation(String),

    #[error("Action '{event}' is not available on the {page} page")]
    InvalidTransition { page: Page, event: &'static str },

    #[error("Questions without an answer: {missing:?}")]
    IncompleteResponses { missing: Vec<usize> },
}

pub const WRONG_CONTEXT_MESSAGE: &str =
    "One or more answers are incorrect. Please read the instructions above again carefully.";

/// Apply `event` to `session`
pub fn transition(
    session: &Session,
    event: Event,
    bank: &QuestionBank,
    now: DateTime<Utc>,
) -> Result<Transition, FlowError> {
    let invalid = |event: &Event| FlowError::InvalidTransition {
        page: session.page,
        event: event.name(),
    };

    debug!(
        counter = session.counter,
        page = %session.page,
        event = event.name(),
        "Applying event"
    );

    let mut next = session.clone();
    match (session.page, event) {
        (Page::Start, Event::ConfirmComprehension(answers)) => {
            next.allow_start = answers.context == session.travel_context;
            next.comprehension = Some(answers);
            let mut t = Transition::to(next);
            if !t.session.allow_start {
                t.notice = Some(WRONG_CONTEXT_MESSAGE.to_string());
            }
            Ok(t)
        }

        (Page::Start, Event::StartSurvey) => {
            if !session.allow_start {
                return Err(FlowError::Validation(
                    "Please answer the questions above correctly before starting.".to_string(),
                ));
            }
            next.page = Page::Survey;
            next.current_idx = 0;
            info!(counter = session.counter, "Survey started");
            Ok(Transition::to(next))
        }

        (Page::Survey, Event::Next { choice }) => {
            let idx = session.current_idx;
            next.responses.insert(idx, choice);

            if idx + 1 < bank.len() {
                next.current_idx = idx + 1;
                return Ok(Transition::to(next));
            }

            let missing: Vec<usize> = (0..bank.len())
                .filter(|i| !next.responses.contains_key(i))
                .collect();
            if !missing.is_empty() {
                return Err(FlowError::IncompleteResponses { missing });
            }

            let effects = if session.responses_submitted {
                Vec::new()
            } else {
                vec![Effect::AppendResponses(response_rows(&next, bank))]
            };
            next.responses_submitted = true;
            next.page = Page::Demographics;
            Ok(Transition {
                session: next,
                effects,
                notice: None,
            })
        }

        (Page::Survey, Event::Back) => {
            next.current_idx = session.current_idx.saturating_sub(1);
            Ok(Transition::to(next))
        }

        (Page::Demographics, Event::SubmitDemographics(form)) => {
            if session.demographics_submitted {
                return Ok(Transition::to(next));
            }
            let mut effects = Vec::with_capacity(2);
            if session.demographics_appended {
                debug!(counter = session.counter, "Demographics row already stored, retrying counter step");
            } else {
                form.validate()?;
                effects.push(Effect::AppendDemographics(demographics_row(session, &form, now)));
            }
            effects.push(Effect::AdvanceCounter {
                observed: session.counter,
            });

            next.demographics_appended = true;
            next.demographics_submitted = true;
            next.page = Page::End;
            next.ended_at = Some(now);
            Ok(Transition {
                session: next,
                effects,
                notice: None,
            })
        }

        (_, event) => Err(invalid(&event)),
    }
}

/// One Responses row per question: participant, constants, choice, raw row
pub fn response_rows(session: &Session, bank: &QuestionBank) -> Vec<Row> {
    bank.tasks()
        .iter()
        .map(|task| {
            let mut row = vec![
                session.counter.to_string(),
                session.ticket_price.to_string(),
                session.trip_duration.to_string(),
                (task.index + 1).to_string(),
                session.displayed_choice(task.index).label().to_string(),
            ];
            row.extend(task.raw.iter().cloned());
            row
        })
        .collect()
}

pub fn demographics_row(session: &Session, form: &DemographicsForm, now: DateTime<Utc>) -> Row {
    vec![
        session.counter.to_string(),
        form.age.clone(),
        form.gender.clone(),
        form.travel_frequency.clone(),
        form.ubahn_frequency.clone(),
        form.mobility.clone(),
        form.comment.clone(),
        elapsed_minutes(session.started_at, now).to_string(),
        format_local(session.started_at),
        format_local(now),
    ]
}
