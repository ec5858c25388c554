//! Shared fixtures for the index integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sirius_search::backends::MemoryStore;
use sirius_search::error::{EntityError, IndexResult};
use sirius_search::schema::{Entity, EntityDescriptor, EntityMeta, Property};
use sirius_search::{Index, IndexConfig};

/// A plain customer record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(skip)]
    pub meta: EntityMeta,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Customer {
    pub fn new(name: &str, status: &str, country: &str) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
            country: country.to_string(),
            ..Default::default()
        }
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Entity for Customer {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Customer", "crm")
            .property(Property::text("name"))
            .property(Property::keyword("email"))
            .property(Property::enumeration(
                "status",
                [("active", "Active"), ("blocked", "Blocked")],
            ))
            .property(Property::keyword("country"))
            .property(Property::long("score"))
            .property(Property::keyword_list("tags"))
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

/// An account keyed by its code, with save and delete checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(skip)]
    pub meta: EntityMeta,
    pub code: String,
    pub locked: bool,
}

impl Account {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Account {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Account", "crm")
            .property(Property::keyword("code"))
            .property(Property::boolean("locked"))
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn compute_possible_id(&self) -> Option<String> {
        Some(self.code.clone())
    }

    fn before_save_checks(&mut self) {
        self.code = self.code.trim().to_uppercase();
    }

    fn perform_save_checks(&self) -> IndexResult<()> {
        if self.code.is_empty() {
            return Err(EntityError::CheckFailed {
                entity_type: "Account".to_string(),
                message: "code is required".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn perform_delete_checks(&self) -> IndexResult<()> {
        if self.locked {
            return Err(EntityError::CheckFailed {
                entity_type: "Account".to_string(),
                message: "locked accounts cannot be deleted".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// A ticket routed by its tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(skip)]
    pub meta: EntityMeta,
    pub tenant: String,
    pub title: String,
}

impl Ticket {
    pub fn new(tenant: &str, title: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Ticket {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Ticket", "support")
            .with_routing("tenant")
            .property(Property::keyword("tenant"))
            .property(Property::text("title"))
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

/// Creates an index over a fresh realtime memory store.
pub fn create_index() -> (Index, Arc<MemoryStore>) {
    create_index_with(IndexConfig::default())
}

/// Creates an index with `config` over a fresh realtime memory store.
pub fn create_index_with(config: IndexConfig) -> (Index, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let index = Index::new(store.clone(), config);
    index.register::<Customer>();
    index.register::<Account>();
    index.register::<Ticket>();
    (index, store)
}

/// Creates one customer per `(name, status, country, score)`.
pub async fn seed_customers(index: &Index, rows: &[(&str, &str, &str, i64)]) -> Vec<Customer> {
    let mut created = Vec::new();
    for (name, status, country, score) in rows {
        let mut customer = Customer::new(name, status, country).with_score(*score);
        index.create(&mut customer).await.unwrap();
        created.push(customer);
    }
    created
}

/// Creates `count` active customers scored `0..count`.
pub async fn seed_numbered(index: &Index, count: i64) {
    for score in 0..count {
        let mut customer =
            Customer::new(&format!("customer-{:02}", score), "active", "de").with_score(score);
        index.create(&mut customer).await.unwrap();
    }
}
