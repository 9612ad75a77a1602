//! Form catalog and package entitlements.
//!
//! Groups bundle forms behind one entitlement boundary. A form is reachable
//! in a group either for free (per its [`FormGroupMapping`]) or through a
//! currently-entitling [`UserPackageGrant`] for that group.

mod entitlement;
mod purchase;
mod store;

pub use entitlement::{AccessDecision, EntitlementResolver};
pub use purchase::{record_purchase, PurchaseError};
pub use store::SqliteCatalogStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A named bundle of forms sharing one destination spreadsheet per user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormGroup {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
}

/// An externally hosted form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: i64,
    pub external_form_id: String,
    pub name: String,
    /// Destination tab name; falls back to `name` when unset.
    pub sheet_label: Option<String>,
}

impl Form {
    pub fn tab_label(&self) -> &str {
        match self.sheet_label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.name,
        }
    }
}

/// Placement of a form inside a group. One per (form, group) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormGroupMapping {
    pub form_id: i64,
    pub group_id: i64,
    pub is_free_in_group: bool,
    pub requires_package: bool,
    pub sort_order: i64,
}

impl FormGroupMapping {
    /// Free mappings that need no package grant access to every user.
    pub fn is_open(&self) -> bool {
        self.is_free_in_group && !self.requires_package
    }
}

/// A purchasable entitlement to one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub price_cents: i64,
    /// `None` means the grant never expires.
    pub duration_days: Option<i64>,
}

/// A recorded package purchase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPackageGrant {
    pub id: i64,
    pub user_id: i64,
    pub package_id: i64,
    pub group_id: i64,
    pub purchase_date: DateTime<Utc>,
    pub activation_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub transaction_id: Option<String>,
    pub amount_paid_cents: i64,
}

impl UserPackageGrant {
    /// Active and either unlimited or not yet expired at `now`.
    pub fn is_entitling_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expiry_date.map_or(true, |expiry| expiry > now)
    }
}

/// Values for a grant about to be inserted.
#[derive(Clone, Debug)]
pub struct NewGrant {
    pub user_id: i64,
    pub package_id: i64,
    pub group_id: i64,
    pub purchase_date: DateTime<Utc>,
    pub activation_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub amount_paid_cents: i64,
}

/// Read/write contract for catalog and billing data.
pub trait CatalogRepository: Send + Sync {
    fn get_group(&self, group_id: i64) -> Result<Option<FormGroup>>;

    fn get_form(&self, form_id: i64) -> Result<Option<Form>>;

    fn get_mapping(&self, form_id: i64, group_id: i64) -> Result<Option<FormGroupMapping>>;

    /// Groups containing at least one open (free, ungated) form mapping.
    fn groups_with_open_forms(&self) -> Result<Vec<FormGroup>>;

    fn get_package(&self, package_id: i64) -> Result<Option<Package>>;

    /// All grants of a user, active or not.
    fn grants_for_user(&self, user_id: i64) -> Result<Vec<UserPackageGrant>>;

    fn insert_grant(&self, grant: &NewGrant) -> Result<UserPackageGrant>;

    /// Deactivates the user's active grants for a package. Returns how many
    /// rows changed.
    fn deactivate_grants(&self, user_id: i64, package_id: i64) -> Result<usize>;
}
