//! Recording package purchases as grants.

use super::{CatalogRepository, NewGrant, UserPackageGrant};
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("package {0} not found")]
    PackageNotFound(i64),

    /// The user already holds an unlimited, active grant for the group.
    #[error("user already owns group {0}")]
    AlreadyEntitled(i64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Records a paid (or zero-priced) purchase of `package_id`.
///
/// The grant activates immediately and expires `duration_days` later, or
/// never when the package has no duration. Earlier active grants of the same
/// package are deactivated as superseded.
pub fn record_purchase(
    catalog: &dyn CatalogRepository,
    user_id: i64,
    package_id: i64,
    transaction_id: Option<String>,
    amount_paid_cents: i64,
) -> Result<UserPackageGrant, PurchaseError> {
    let package = catalog
        .get_package(package_id)?
        .ok_or(PurchaseError::PackageNotFound(package_id))?;

    let now = Utc::now();
    let fully_owned = catalog
        .grants_for_user(user_id)?
        .iter()
        .any(|g| g.group_id == package.group_id && g.expiry_date.is_none() && g.is_entitling_at(now));
    if fully_owned {
        return Err(PurchaseError::AlreadyEntitled(package.group_id));
    }

    let superseded = catalog.deactivate_grants(user_id, package.id)?;

    let grant = catalog.insert_grant(&NewGrant {
        user_id,
        package_id: package.id,
        group_id: package.group_id,
        purchase_date: now,
        activation_date: now,
        expiry_date: package.duration_days.map(|days| now + Duration::days(days)),
        transaction_id,
        amount_paid_cents,
    })?;

    info!(
        user_id,
        package_id = package.id,
        group_id = package.group_id,
        superseded,
        expires = ?grant.expiry_date,
        "Package grant recorded"
    );

    Ok(grant)
}
