//! Human-readable names for savepoint labels.
//!
//! Multi-step operations name their checkpoints after the step that just
//! finished (`sale_items_added`, `inventory_quantity_updated`, ...). The
//! catalog maps those labels to descriptions so a failure can be reported
//! against the last step that completed.

use crate::core::{Result, TxError};
use crate::transaction::SavepointId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SALE_START: &str = "sale_start";
pub const SALE_CUSTOMER_DATA: &str = "sale_customer_data";
pub const SALE_ITEMS_ADDED: &str = "sale_items_added";
pub const SALE_INVENTORY_UPDATED: &str = "sale_inventory_updated";
pub const SALE_COMPLETED: &str = "sale_completed";

pub const INVENTORY_START: &str = "inventory_start";
pub const INVENTORY_MEDICINE_CHECKED: &str = "inventory_medicine_checked";
pub const INVENTORY_QUANTITY_UPDATED: &str = "inventory_quantity_updated";
pub const INVENTORY_COMPLETED: &str = "inventory_completed";

pub const MEDICINE_START: &str = "medicine_start";
pub const MEDICINE_VALIDATED: &str = "medicine_validated";
pub const MEDICINE_SUPPLIER_CHECKED: &str = "medicine_supplier_checked";
pub const MEDICINE_COMPLETED: &str = "medicine_completed";

pub const SUPPLIER_START: &str = "supplier_start";
pub const SUPPLIER_VALIDATED: &str = "supplier_validated";
pub const SUPPLIER_COMPLETED: &str = "supplier_completed";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavepointCatalog {
    descriptions: BTreeMap<String, String>,
}

impl SavepointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step labels of the pharmacy sale, inventory, medicine and supplier flows
    pub fn pharmacy() -> Self {
        let mut catalog = Self::new();
        for (label, description) in [
            (SALE_START, "Sale started"),
            (SALE_CUSTOMER_DATA, "Customer data saved"),
            (SALE_ITEMS_ADDED, "Items added to the sale"),
            (SALE_INVENTORY_UPDATED, "Stock levels updated"),
            (SALE_COMPLETED, "Sale completed"),
            (INVENTORY_START, "Inventory operation started"),
            (INVENTORY_MEDICINE_CHECKED, "Medicine checked"),
            (INVENTORY_QUANTITY_UPDATED, "Quantity updated"),
            (INVENTORY_COMPLETED, "Inventory operation completed"),
            (MEDICINE_START, "Medicine operation started"),
            (MEDICINE_VALIDATED, "Medicine validated"),
            (MEDICINE_SUPPLIER_CHECKED, "Supplier checked"),
            (MEDICINE_COMPLETED, "Medicine operation completed"),
            (SUPPLIER_START, "Supplier operation started"),
            (SUPPLIER_VALIDATED, "Supplier validated"),
            (SUPPLIER_COMPLETED, "Supplier operation completed"),
        ] {
            catalog.register(label, description);
        }
        catalog
    }

    /// Load a JSON object mapping labels to descriptions
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TxError::Config(e.to_string()))
    }

    pub fn register(&mut self, label: &str, description: &str) -> &mut Self {
        self.descriptions
            .insert(label.to_string(), description.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    pub fn describe_label(&self, label: &str) -> Option<&str> {
        self.descriptions.get(label).map(String::as_str)
    }

    /// Description of the step `id` marks, or `"Savepoint: {id}"`
    pub fn describe(&self, id: &SavepointId) -> String {
        match self.describe_label(id.label()) {
            Some(description) => description.to_string(),
            None => format!("Savepoint: {}", id),
        }
    }

    /// Describe the most recent savepoint of `savepoints`, i.e. the last step
    /// that completed before a failure
    pub fn last_completed_step(&self, savepoints: &[SavepointId]) -> Option<String> {
        savepoints.last().map(|id| self.describe(id))
    }
}
