//! Prompt template lookup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, ErrorContext};
use crate::template::PromptTemplate;
use crate::{PromptId, Result};

/// Source of prompt templates. Implemented by the host's persistence layer.
#[async_trait]
pub trait PromptCatalog: Send + Sync {
    async fn get(&self, id: PromptId) -> Result<Option<Arc<PromptTemplate>>>;
}

/// Process-local catalog.
#[derive(Debug, Default)]
pub struct InMemoryPromptCatalog {
    templates: RwLock<HashMap<PromptId, Arc<PromptTemplate>>>,
}

impl InMemoryPromptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a template. Published templates cannot be replaced.
    pub fn insert(&self, template: PromptTemplate) -> Result<Arc<PromptTemplate>> {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        if templates.contains_key(&template.id) {
            return Err(Error::configuration_with_context(
                format!("prompt template {} is already published", template.id),
                ErrorContext::new()
                    .with_field_path("id")
                    .with_details("publish a revision under a new id")
                    .with_source("prompt_catalog"),
            ));
        }
        let template = Arc::new(template);
        templates.insert(template.id, Arc::clone(&template));
        Ok(template)
    }

    pub fn with_template(self, template: PromptTemplate) -> Result<Self> {
        self.insert(template)?;
        Ok(self)
    }

    /// Templates ordered by id.
    pub fn list(&self) -> Vec<Arc<PromptTemplate>> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = templates.values().cloned().collect();
        all.sort_by_key(|t| t.id);
        all
    }

    pub fn len(&self) -> usize {
        self.templates.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PromptCatalog for InMemoryPromptCatalog {
    async fn get(&self, id: PromptId) -> Result<Option<Arc<PromptTemplate>>> {
        Ok(self
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let catalog = InMemoryPromptCatalog::new();
        catalog
            .insert(PromptTemplate::new(2, "b", "{x}"))
            .unwrap();
        catalog
            .insert(PromptTemplate::new(1, "a", "{y}"))
            .unwrap();
        assert_eq!(catalog.get(1).await.unwrap().unwrap().title, "a");
        assert!(catalog.get(3).await.unwrap().is_none());
        let ids: Vec<_> = catalog.list().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_republish_rejected() {
        let catalog = InMemoryPromptCatalog::new();
        catalog.insert(PromptTemplate::new(1, "a", "v1")).unwrap();
        let err = catalog
            .insert(PromptTemplate::new(1, "a", "v2"))
            .unwrap_err();
        assert!(err.to_string().contains("already published"));
        assert_eq!(catalog.len(), 1);
    }
}
