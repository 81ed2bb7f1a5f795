//! Error types for tdc-survey
//!
//! Every failure a participant can hit maps to a page: fatal configuration
//! problems and store failures render a blocking banner, validation problems
//! are shown inline by the page handlers.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::path::PathBuf;
use thiserror::Error;

use crate::api::render;
use crate::assets::AssetError;
use crate::design::DesignError;
use crate::flow::FlowError;
use crate::session::Page;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SurveyError {
    /// External state or credentials an operator must fix (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Door image missing under the `error` asset policy (500)
    #[error("Missing door image for D2D={d2d}: {}", .path.display())]
    MissingAsset { d2d: u32, path: PathBuf },

    /// Store still failing after retries (502)
    #[error("Could not save your answers: {0}")]
    Store(StoreError),

    /// Participant input that can be corrected (422)
    #[error("{0}")]
    Validation(String),

    /// Event not accepted on the current page (409)
    #[error("Action '{event}' is not available on the {page} page")]
    InvalidTransition { page: Page, event: &'static str },

    /// No live session for the request's cookie (400)
    #[error("Your survey session has expired or was not found")]
    NoSession,

    /// Malformed question table
    #[error("Question table error: {0}")]
    Design(#[from] DesignError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SurveyError {
    pub fn status(&self) -> StatusCode {
        match self {
            SurveyError::Config(_)
            | SurveyError::MissingAsset { .. }
            | SurveyError::Design(_)
            | SurveyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SurveyError::Store(_) => StatusCode::BAD_GATEWAY,
            SurveyError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SurveyError::InvalidTransition { .. } => StatusCode::CONFLICT,
            SurveyError::NoSession => StatusCode::BAD_REQUEST,
        }
    }

    fn banner_title(&self) -> &'static str {
        match self {
            SurveyError::Config(_) | SurveyError::Design(_) => "Survey is not configured",
            SurveyError::MissingAsset { .. } => "Survey page could not be displayed",
            SurveyError::Store(_) => "Your answers could not be saved",
            SurveyError::Validation(_) => "Please check your answers",
            SurveyError::InvalidTransition { .. } => "This step is already done",
            SurveyError::NoSession => "Session not found",
            SurveyError::Internal(_) => "Something went wrong",
        }
    }
}

impl From<StoreError> for SurveyError {
    fn from(err: StoreError) -> Self {
        if err.is_configuration() {
            SurveyError::Config(err.to_string())
        } else {
            SurveyError::Store(err)
        }
    }
}

impl From<AssetError> for SurveyError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::Missing { d2d, path } => SurveyError::MissingAsset { d2d, path },
            other => SurveyError::Internal(other.to_string()),
        }
    }
}

impl From<FlowError> for SurveyError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Validation(msg) => SurveyError::Validation(msg),
            FlowError::InvalidTransition { page, event } => {
                SurveyError::InvalidTransition { page, event }
            }
            FlowError::IncompleteResponses { missing } => SurveyError::Validation(format!(
                "Please answer every question before submitting (missing: {}).",
                missing
                    .iter()
                    .map(|i| (i + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

impl From<tdc_common::Error> for SurveyError {
    fn from(err: tdc_common::Error) -> Self {
        match err {
            tdc_common::Error::Config(msg) => SurveyError::Config(msg),
            other => SurveyError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for SurveyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = render::error_page(self.banner_title(), &self.to_string());
        (status, Html(body)).into_response()
    }
}

/// Result type for page handlers
pub type SurveyResult<T> = Result<T, SurveyError>;
