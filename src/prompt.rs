use chrono::{DateTime, Local};
use std::sync::{Arc, RwLock};

const NOW_PLACEHOLDER: &str = "{now}";

/// The prompt sent to every provider, updatable between runs.
///
/// A run takes one rendered snapshot when it starts; later updates only
/// affect the next run.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    inner: Arc<RwLock<String>>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(template.into())),
        }
    }

    pub fn get(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set(&self, template: impl Into<String>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = template.into();
    }

    pub fn render(&self) -> String {
        render_at(&self.get(), Local::now())
    }
}

/// Substitutes `{now}` with `now` in RFC 3339 form.
pub fn render_at(template: &str, now: DateTime<Local>) -> String {
    template.replace(NOW_PLACEHOLDER, &now.to_rfc3339())
}
