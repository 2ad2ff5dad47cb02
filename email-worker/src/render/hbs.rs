//! Handlebars renderer backed by a directory of `.hbs` files.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use handlebars::Handlebars;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{validate_template_id, RenderError, TemplateRenderer};

/// Handlebars-based template renderer.
///
/// Templates are read from `<dir>/<id>.hbs` the first time they are used and
/// stay compiled for the life of the renderer. Values are HTML-escaped unless
/// the template uses triple braces.
pub struct HandlebarsRenderer {
    dir: PathBuf,
    registry: RwLock<Handlebars<'static>>,
}

impl HandlebarsRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            registry: RwLock::new(Handlebars::new()),
        }
    }

    /// Register a template from source, replacing any file-backed version.
    pub fn register(&self, name: &str, source: &str) -> Result<(), RenderError> {
        validate_template_id(name)?;
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_template_string(name, source)
            .map_err(|e| RenderError::Template {
                template: name.to_string(),
                message: e.to_string(),
            })
    }

    pub fn template_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.hbs"))
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has_template(name)
    }

    fn load(&self, name: &str) -> Result<(), RenderError> {
        let path = self.template_path(name);
        let source = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RenderError::NotFound {
                template: name.to_string(),
                path: path.clone(),
            },
            _ => RenderError::Io {
                template: name.to_string(),
                source: e,
            },
        })?;

        self.register(name, &source)?;
        info!(template = name, path = %path.display(), "template_loaded");
        Ok(())
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, context: &Map<String, Value>) -> Result<String, RenderError> {
        validate_template_id(template)?;

        if !self.is_loaded(template) {
            self.load(template)?;
        }

        debug!(template, variable_count = context.len(), "template_rendering");

        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .render(template, context)
            .map_err(|e| RenderError::Template {
                template: template.to_string(),
                message: e.to_string(),
            })
    }
}
