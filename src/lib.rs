//! Image generation gateway
//!
//! Accepts image-generation requests, screens and augments their prompts,
//! dispatches them to a ComfyUI rendering backend, and returns the image
//! inline or delivers it to a callback URL with bounded retry. Every
//! admission, rejection, and outcome is written to an append-only audit
//! trail.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
