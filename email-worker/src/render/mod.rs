//! Template rendering for outbound email bodies.
//!
//! The processor only sees the [`TemplateRenderer`] trait; the worker binary
//! wires in [`HandlebarsRenderer`], which resolves `<dir>/<template>.hbs`.

pub mod hbs;

use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

pub use hbs::HandlebarsRenderer;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid template id: {0:?}")]
    InvalidTemplateId(String),

    #[error("template {template:?} not found at {}", path.display())]
    NotFound { template: String, path: PathBuf },

    #[error("failed to read template {template:?}: {source}")]
    Io {
        template: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template {template:?} failed: {message}")]
    Template { template: String, message: String },
}

/// Turns a template id plus context into an HTML body.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Map<String, Value>) -> Result<String, RenderError>;
}

/// Template ids are plain names: no separators, no parent references.
pub fn validate_template_id(template: &str) -> Result<(), RenderError> {
    let valid = !template.is_empty()
        && template
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !template.contains("..");

    if valid {
        Ok(())
    } else {
        Err(RenderError::InvalidTemplateId(template.to_string()))
    }
}
