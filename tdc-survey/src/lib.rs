//! tdc-survey library - Train Door Choice web survey
//!
//! Participants read an introduction, pass a short comprehension check,
//! answer a fixed set of door choice questions and a demographics form.
//! Answers go to a spreadsheet with `Meta`, `Responses` and `Demographics`
//! worksheets.

use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tdc_common::config::SurveyConfig;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod assets;
pub mod controller;
pub mod credentials;
pub mod design;
pub mod error;
pub mod flow;
pub mod session;
pub mod store;

use assets::AssetResolver;
use controller::SurveyController;
use design::QuestionBank;
use session::SessionRegistry;

/// Largest accepted request body; the biggest form is the demographics comment
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SurveyConfig>,
    /// Question table, loaded once per process
    pub bank: Arc<QuestionBank>,
    pub assets: Arc<AssetResolver>,
    pub controller: Arc<SurveyController>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(config: SurveyConfig, bank: Arc<QuestionBank>, controller: SurveyController) -> Self {
        let assets = AssetResolver::new(config.asset_dir.clone(), config.missing_asset);
        Self {
            config: Arc::new(config),
            bank,
            assets: Arc::new(assets),
            controller: Arc::new(controller),
            sessions: SessionRegistry::new(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::page_routes())
        .merge(api::image_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
