//! SQLite persistence for groups, forms, packages and grants.

use super::{
    CatalogRepository, Form, FormGroup, FormGroupMapping, NewGrant, Package, UserPackageGrant,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Catalog store backed by SQLite.
///
/// `form_group_mappings` carries `UNIQUE(form_id, group_id)`, so a form has
/// at most one placement per group.
pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    /// Opens (or creates) the SQLite database and ensures the tables exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open catalog database")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS form_groups (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS forms (
                id INTEGER PRIMARY KEY,
                external_form_id TEXT NOT NULL,
                name TEXT NOT NULL,
                sheet_label TEXT
            );
            CREATE TABLE IF NOT EXISTS form_group_mappings (
                id INTEGER PRIMARY KEY,
                form_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                is_free_in_group INTEGER NOT NULL,
                requires_package INTEGER NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                UNIQUE(form_id, group_id)
            );
            CREATE TABLE IF NOT EXISTS packages (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                price_cents INTEGER NOT NULL,
                duration_days INTEGER
            );
            CREATE TABLE IF NOT EXISTS user_packages (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                package_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                purchase_date TEXT NOT NULL,
                activation_date TEXT NOT NULL,
                expiry_date TEXT,
                is_active INTEGER NOT NULL,
                transaction_id TEXT,
                amount_paid_cents INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_user_packages_user ON user_packages(user_id, group_id);
            "#,
        )
        .context("Failed to create catalog tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Catalog store connection mutex poisoned"))
    }

    pub fn create_group(&self, name: &str, sort_order: i64) -> Result<FormGroup> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO form_groups (name, sort_order) VALUES (?1, ?2)",
            params![name, sort_order],
        )
        .context("Failed to insert group")?;
        Ok(FormGroup {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            sort_order,
        })
    }

    pub fn create_form(
        &self,
        external_form_id: &str,
        name: &str,
        sheet_label: Option<&str>,
    ) -> Result<Form> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO forms (external_form_id, name, sheet_label) VALUES (?1, ?2, ?3)",
            params![external_form_id, name, sheet_label],
        )
        .context("Failed to insert form")?;
        Ok(Form {
            id: conn.last_insert_rowid(),
            external_form_id: external_form_id.to_string(),
            name: name.to_string(),
            sheet_label: sheet_label.map(str::to_string),
        })
    }

    /// Places a form in a group, replacing any existing placement.
    pub fn map_form(&self, mapping: &FormGroupMapping) -> Result<()> {
        self.conn()?
            .execute(
                r#"
                INSERT INTO form_group_mappings (
                    form_id, group_id, is_free_in_group, requires_package, sort_order
                )
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(form_id, group_id) DO UPDATE SET
                    is_free_in_group = excluded.is_free_in_group,
                    requires_package = excluded.requires_package,
                    sort_order = excluded.sort_order
                "#,
                params![
                    mapping.form_id,
                    mapping.group_id,
                    mapping.is_free_in_group,
                    mapping.requires_package,
                    mapping.sort_order,
                ],
            )
            .context("Failed to upsert form mapping")?;
        Ok(())
    }

    pub fn create_package(
        &self,
        group_id: i64,
        name: &str,
        price_cents: i64,
        duration_days: Option<i64>,
    ) -> Result<Package> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO packages (group_id, name, price_cents, duration_days) VALUES (?1, ?2, ?3, ?4)",
            params![group_id, name, price_cents, duration_days],
        )
        .context("Failed to insert package")?;
        Ok(Package {
            id: conn.last_insert_rowid(),
            group_id,
            name: name.to_string(),
            price_cents,
            duration_days,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", value))
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FormGroup> {
    Ok(FormGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        sort_order: row.get(2)?,
    })
}

/// Raw grant columns; timestamps are parsed outside the rusqlite closure.
type GrantRow = (
    i64,
    i64,
    i64,
    i64,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    i64,
);

fn grant_from_row(row: GrantRow) -> Result<UserPackageGrant> {
    let (
        id,
        user_id,
        package_id,
        group_id,
        purchase_date,
        activation_date,
        expiry_date,
        is_active,
        transaction_id,
        amount_paid_cents,
    ) = row;

    Ok(UserPackageGrant {
        id,
        user_id,
        package_id,
        group_id,
        purchase_date: parse_timestamp(&purchase_date)?,
        activation_date: parse_timestamp(&activation_date)?,
        expiry_date: expiry_date.as_deref().map(parse_timestamp).transpose()?,
        is_active,
        transaction_id,
        amount_paid_cents,
    })
}

impl CatalogRepository for SqliteCatalogStore {
    fn get_group(&self, group_id: i64) -> Result<Option<FormGroup>> {
        self.conn()?
            .query_row(
                "SELECT id, name, sort_order FROM form_groups WHERE id = ?1",
                params![group_id],
                group_from_row,
            )
            .optional()
            .context("Failed to load group")
    }

    fn get_form(&self, form_id: i64) -> Result<Option<Form>> {
        self.conn()?
            .query_row(
                "SELECT id, external_form_id, name, sheet_label FROM forms WHERE id = ?1",
                params![form_id],
                |row| {
                    Ok(Form {
                        id: row.get(0)?,
                        external_form_id: row.get(1)?,
                        name: row.get(2)?,
                        sheet_label: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to load form")
    }

    fn get_mapping(&self, form_id: i64, group_id: i64) -> Result<Option<FormGroupMapping>> {
        self.conn()?
            .query_row(
                r#"
                SELECT form_id, group_id, is_free_in_group, requires_package, sort_order
                FROM form_group_mappings
                WHERE form_id = ?1 AND group_id = ?2
                "#,
                params![form_id, group_id],
                |row| {
                    Ok(FormGroupMapping {
                        form_id: row.get(0)?,
                        group_id: row.get(1)?,
                        is_free_in_group: row.get(2)?,
                        requires_package: row.get(3)?,
                        sort_order: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to load form mapping")
    }

    fn groups_with_open_forms(&self) -> Result<Vec<FormGroup>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT DISTINCT g.id, g.name, g.sort_order
                FROM form_groups g
                JOIN form_group_mappings m ON m.group_id = g.id
                WHERE m.is_free_in_group = 1 AND m.requires_package = 0
                ORDER BY g.sort_order, g.id
                "#,
            )
            .context("Failed to prepare open groups query")?;

        let groups = stmt
            .query_map([], group_from_row)
            .context("Failed to query open groups")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read open groups")?;
        Ok(groups)
    }

    fn get_package(&self, package_id: i64) -> Result<Option<Package>> {
        self.conn()?
            .query_row(
                "SELECT id, group_id, name, price_cents, duration_days FROM packages WHERE id = ?1",
                params![package_id],
                |row| {
                    Ok(Package {
                        id: row.get(0)?,
                        group_id: row.get(1)?,
                        name: row.get(2)?,
                        price_cents: row.get(3)?,
                        duration_days: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to load package")
    }

    fn grants_for_user(&self, user_id: i64) -> Result<Vec<UserPackageGrant>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, user_id, package_id, group_id, purchase_date, activation_date,
                       expiry_date, is_active, transaction_id, amount_paid_cents
                FROM user_packages
                WHERE user_id = ?1
                ORDER BY purchase_date DESC, id DESC
                "#,
            )
            .context("Failed to prepare grants query")?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })
            .context("Failed to query grants")?
            .collect::<Result<Vec<GrantRow>, _>>()
            .context("Failed to read grants")?;

        rows.into_iter().map(grant_from_row).collect()
    }

    fn insert_grant(&self, grant: &NewGrant) -> Result<UserPackageGrant> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO user_packages (
                user_id, package_id, group_id, purchase_date, activation_date,
                expiry_date, is_active, transaction_id, amount_paid_cents
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)
            "#,
            params![
                grant.user_id,
                grant.package_id,
                grant.group_id,
                grant.purchase_date.to_rfc3339(),
                grant.activation_date.to_rfc3339(),
                grant.expiry_date.map(|d| d.to_rfc3339()),
                grant.transaction_id,
                grant.amount_paid_cents,
            ],
        )
        .context("Failed to insert grant")?;

        Ok(UserPackageGrant {
            id: conn.last_insert_rowid(),
            user_id: grant.user_id,
            package_id: grant.package_id,
            group_id: grant.group_id,
            purchase_date: grant.purchase_date,
            activation_date: grant.activation_date,
            expiry_date: grant.expiry_date,
            is_active: true,
            transaction_id: grant.transaction_id.clone(),
            amount_paid_cents: grant.amount_paid_cents,
        })
    }

    fn deactivate_grants(&self, user_id: i64, package_id: i64) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE user_packages SET is_active = 0 WHERE user_id = ?1 AND package_id = ?2 AND is_active = 1",
                params![user_id, package_id],
            )
            .context("Failed to deactivate grants")
    }
}
