//! Form access decisions.
//!
//! Read-only over the catalog; safe to call on every page render.

use super::{CatalogRepository, FormGroup};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Result of resolving access to a form within a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub has_access: bool,
    pub is_free: bool,
    pub requires_package: bool,
}

impl AccessDecision {
    const DENIED: Self = Self {
        has_access: false,
        is_free: false,
        requires_package: false,
    };
}

/// Decides whether a user may use a form right now.
#[derive(Clone)]
pub struct EntitlementResolver {
    catalog: Arc<dyn CatalogRepository>,
}

impl EntitlementResolver {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    pub fn resolve_access(&self, user_id: i64, form_id: i64, group_id: i64) -> Result<AccessDecision> {
        self.resolve_access_at(user_id, form_id, group_id, Utc::now())
    }

    /// Access decision evaluated at a fixed instant.
    ///
    /// 1. No mapping for (form, group) ⇒ denied.
    /// 2. Open mapping ⇒ granted, no grant lookup.
    /// 3. Otherwise granted iff some grant for (user, group) is entitling at `now`.
    pub fn resolve_access_at(
        &self,
        user_id: i64,
        form_id: i64,
        group_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision> {
        let Some(mapping) = self.catalog.get_mapping(form_id, group_id)? else {
            debug!(form_id, group_id, "No form mapping, access denied");
            return Ok(AccessDecision::DENIED);
        };

        if mapping.is_open() {
            return Ok(AccessDecision {
                has_access: true,
                is_free: true,
                requires_package: false,
            });
        }

        let has_access = self.has_active_package_at(user_id, group_id, now)?;
        Ok(AccessDecision {
            has_access,
            is_free: false,
            requires_package: true,
        })
    }

    /// True when the user holds a currently-entitling grant for the group.
    pub fn has_active_package(&self, user_id: i64, group_id: i64) -> Result<bool> {
        self.has_active_package_at(user_id, group_id, Utc::now())
    }

    fn has_active_package_at(&self, user_id: i64, group_id: i64, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .catalog
            .grants_for_user(user_id)?
            .iter()
            .any(|g| g.group_id == group_id && g.is_entitling_at(now)))
    }

    /// Groups the user can reach: those with an entitling grant plus those
    /// containing an open form. De-duplicated, ordered by sort order.
    pub fn resolve_available_groups(&self, user_id: i64) -> Result<Vec<FormGroup>> {
        self.resolve_available_groups_at(user_id, Utc::now())
    }

    pub fn resolve_available_groups_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<FormGroup>> {
        let mut groups: BTreeMap<i64, FormGroup> = BTreeMap::new();

        for grant in self.catalog.grants_for_user(user_id)? {
            if !grant.is_entitling_at(now) || groups.contains_key(&grant.group_id) {
                continue;
            }
            if let Some(group) = self.catalog.get_group(grant.group_id)? {
                groups.insert(group.id, group);
            }
        }

        for group in self.catalog.groups_with_open_forms()? {
            groups.entry(group.id).or_insert(group);
        }

        let mut groups: Vec<FormGroup> = groups.into_values().collect();
        groups.sort_by_key(|g| (g.sort_order, g.id));
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FormGroupMapping, NewGrant, SqliteCatalogStore};
    use chrono::Duration;

    struct Fixture {
        store: Arc<SqliteCatalogStore>,
        resolver: EntitlementResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteCatalogStore::new(":memory:").unwrap());
        let resolver = EntitlementResolver::new(store.clone());
        Fixture { store, resolver }
    }

    fn map(store: &SqliteCatalogStore, form_id: i64, group_id: i64, free: bool, requires_package: bool) {
        store
            .map_form(&FormGroupMapping {
                form_id,
                group_id,
                is_free_in_group: free,
                requires_package,
                sort_order: 0,
            })
            .unwrap();
    }

    fn grant(
        store: &SqliteCatalogStore,
        user_id: i64,
        group_id: i64,
        expiry: Option<DateTime<Utc>>,
    ) -> i64 {
        let package = store.create_package(group_id, "Pack", 100, None).unwrap();
        let now = Utc::now();
        store
            .insert_grant(&NewGrant {
                user_id,
                package_id: package.id,
                group_id,
                purchase_date: now,
                activation_date: now,
                expiry_date: expiry,
                transaction_id: None,
                amount_paid_cents: 100,
            })
            .unwrap();
        package.id
    }

    #[test]
    fn test_missing_mapping_fails_closed() {
        let f = fixture();
        let decision = f.resolver.resolve_access(1, 10, 20).unwrap();
        assert_eq!(decision, AccessDecision::DENIED);
    }

    #[test]
    fn test_open_form_grants_any_user() {
        let f = fixture();
        map(&f.store, 10, 20, true, false);

        for user_id in [1, 2, 999] {
            let decision = f.resolver.resolve_access(user_id, 10, 20).unwrap();
            assert!(decision.has_access);
            assert!(decision.is_free);
            assert!(!decision.requires_package);
        }
    }

    #[test]
    fn test_gated_form_without_grant() {
        let f = fixture();
        map(&f.store, 10, 20, false, true);

        let decision = f.resolver.resolve_access(1, 10, 20).unwrap();
        assert!(!decision.has_access);
        assert!(decision.requires_package);
    }

    #[test]
    fn test_free_but_package_gated_requires_grant() {
        let f = fixture();
        map(&f.store, 10, 20, true, true);

        let decision = f.resolver.resolve_access(1, 10, 20).unwrap();
        assert!(!decision.has_access);
        assert!(!decision.is_free);
        assert!(decision.requires_package);
    }

    #[test]
    fn test_expiry_boundary() {
        let f = fixture();
        map(&f.store, 10, 20, false, true);
        let now = Utc::now();

        grant(&f.store, 1, 20, Some(now - Duration::seconds(1)));
        assert!(!f.resolver.resolve_access_at(1, 10, 20, now).unwrap().has_access);

        grant(&f.store, 2, 20, Some(now + Duration::seconds(1)));
        assert!(f.resolver.resolve_access_at(2, 10, 20, now).unwrap().has_access);

        grant(&f.store, 3, 20, None);
        assert!(f
            .resolver
            .resolve_access_at(3, 10, 20, now + Duration::days(3650))
            .unwrap()
            .has_access);
    }

    #[test]
    fn test_inactive_grant_does_not_entitle() {
        let f = fixture();
        map(&f.store, 10, 20, false, true);
        let package_id = grant(&f.store, 1, 20, None);
        f.store.deactivate_grants(1, package_id).unwrap();

        assert!(!f.resolver.resolve_access(1, 10, 20).unwrap().has_access);
    }

    #[test]
    fn test_grant_for_other_group_does_not_entitle() {
        let f = fixture();
        map(&f.store, 10, 20, false, true);
        grant(&f.store, 1, 21, None);

        assert!(!f.resolver.resolve_access(1, 10, 20).unwrap().has_access);
    }

    #[test]
    fn test_available_groups_union_and_order() {
        let f = fixture();
        let premium = f.store.create_group("Premium", 5).unwrap();
        let open = f.store.create_group("Open", 1).unwrap();
        let expired = f.store.create_group("Expired", 0).unwrap();
        let both = f.store.create_group("Both", 3).unwrap();

        map(&f.store, 1, open.id, true, false);
        map(&f.store, 2, both.id, true, false);

        grant(&f.store, 1, premium.id, None);
        grant(&f.store, 1, both.id, None);
        grant(&f.store, 1, expired.id, Some(Utc::now() - Duration::days(1)));

        let groups = f.resolver.resolve_available_groups(1).unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Open", "Both", "Premium"]);

        // Another user only sees the open groups
        let groups = f.resolver.resolve_available_groups(2).unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Open", "Both"]);
    }
}
