//! Survey page handlers
//!
//! `GET /` renders whatever page the participant's session is on. A visit
//! without a cookie only gets a cookie and a redirect; the session, and its
//! counter read, are created when the browser comes back with that cookie.
//! Each form POST turns into one `Event`; on success the handler redirects
//! back to `/` (post/redirect/get), so a browser refresh never re-posts a
//! form.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::render::{self, Notice};
use crate::design::Side;
use crate::error::{SurveyError, SurveyResult};
use crate::flow::{DemographicsForm, Event};
use crate::session::{
    session_cookie, session_id_from_headers, Choice, ComprehensionAnswers, Page, Session,
    SessionHandle,
};
use crate::AppState;

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/start/confirm", post(confirm_comprehension))
        .route("/start/begin", post(begin_survey))
        .route("/survey", post(survey_step))
        .route("/demographics", post(submit_demographics))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurveyAction {
    Back,
    Next,
}

#[derive(Debug, Deserialize)]
pub struct SurveyStepForm {
    #[serde(default)]
    pub choice: Option<String>,
    pub action: SurveyAction,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    /// Set on the redirect that hands out a new cookie
    #[serde(default)]
    pub fresh: Option<String>,
}

/// GET /
pub async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IndexQuery>,
) -> Response {
    let Some(id) = session_id_from_headers(&headers) else {
        if query.fresh.is_some() {
            debug!("Cookie missing after redirect");
            return html_response(StatusCode::OK, Ok(render::cookies_required_page()));
        }
        let mut response = Redirect::to("/?fresh=1").into_response();
        if let Ok(cookie) = session_cookie(Uuid::new_v4()).parse() {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        return response;
    };

    let handle = match state.sessions.get(id).await {
        Some(handle) => handle,
        None => {
            let session = match state
                .controller
                .open_session(state.config.ticket_price, state.config.trip_duration)
                .await
            {
                Ok(session) => session,
                Err(err) => return err.into_response(),
            };
            info!(session = %id, "New participant");
            state.sessions.insert(id, session).await
        }
    };

    let session = handle.lock().await;
    html_response(StatusCode::OK, render_page(&state, &session, None, None).await)
}

/// POST /start/confirm
pub async fn confirm_comprehension(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(answers): Form<ComprehensionAnswers>,
) -> Response {
    drive(&state, &headers, Ok(Event::ConfirmComprehension(answers))).await
}

/// POST /start/begin
pub async fn begin_survey(State(state): State<AppState>, headers: HeaderMap) -> Response {
    drive(&state, &headers, Ok(Event::StartSurvey)).await
}

/// POST /survey
pub async fn survey_step(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SurveyStepForm>,
) -> Response {
    let event = match form.action {
        SurveyAction::Back => Ok(Event::Back),
        SurveyAction::Next => form
            .choice
            .as_deref()
            .ok_or_else(|| "Please choose one of the options.".to_string())
            .and_then(str::parse::<Choice>)
            .map(|choice| Event::Next { choice })
            .map_err(SurveyError::Validation),
    };
    drive(&state, &headers, event).await
}

/// POST /demographics
pub async fn submit_demographics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<DemographicsForm>,
) -> Response {
    drive(&state, &headers, Ok(Event::SubmitDemographics(form))).await
}

async fn session_handle(state: &AppState, headers: &HeaderMap) -> SurveyResult<SessionHandle> {
    let id = session_id_from_headers(headers).ok_or(SurveyError::NoSession)?;
    state.sessions.get(id).await.ok_or(SurveyError::NoSession)
}

/// Apply one event to the caller's session and answer with a redirect or page
async fn drive(state: &AppState, headers: &HeaderMap, event: SurveyResult<Event>) -> Response {
    let handle = match session_handle(state, headers).await {
        Ok(handle) => handle,
        Err(err) => return err.into_response(),
    };
    let mut session = handle.lock().await;

    let draft = match &event {
        Ok(Event::SubmitDemographics(form)) => Some(form.clone()),
        _ => None,
    };

    let result = match event {
        Ok(event) => state.controller.apply(&mut session, event, &state.bank).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(None) => Redirect::to("/").into_response(),
        Ok(Some(message)) => html_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            render_page(state, &session, Some(&Notice::Error(message)), draft.as_ref()).await,
        ),
        Err(err @ (SurveyError::Validation(_) | SurveyError::InvalidTransition { .. })) => {
            let status = err.status();
            debug!(status = status.as_u16(), error = %err, "Re-rendering page with notice");
            html_response(
                status,
                render_page(state, &session, Some(&Notice::Error(err.to_string())), draft.as_ref())
                    .await,
            )
        }
        Err(err) => err.into_response(),
    }
}

fn html_response(status: StatusCode, page: SurveyResult<String>) -> Response {
    match page {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// HTML for the session's current page
///
/// On the survey page both door images are resolved first, so a missing
/// image fails the whole page rather than rendering a broken one.
pub async fn render_page(
    state: &AppState,
    session: &Session,
    notice: Option<&Notice>,
    draft: Option<&DemographicsForm>,
) -> SurveyResult<String> {
    match session.page {
        Page::Start => Ok(render::start_page(session, state.bank.len(), notice)),
        Page::Survey => {
            let task = state.bank.get(session.current_idx).ok_or_else(|| {
                SurveyError::Internal(format!("no question at index {}", session.current_idx))
            })?;
            for side in Side::BOTH {
                state.assets.resolve(task.door(side).walk_distance).await?;
            }
            Ok(render::survey_page(session, task, state.bank.len(), notice))
        }
        Page::Demographics => {
            let form = draft.cloned().unwrap_or_default();
            Ok(render::demographics_page(&form, notice))
        }
        Page::End => Ok(render::end_page(session, tdc_common::time::now())),
    }
}
