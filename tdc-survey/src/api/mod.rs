//! HTTP handlers for tdc-survey

pub mod health;
pub mod images;
pub mod pages;
pub mod render;

pub use health::health_routes;
pub use images::image_routes;
pub use pages::page_routes;
