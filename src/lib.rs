// Token encryption and secret value types
pub mod credentials;

// Users, Google credentials and spreadsheet bindings
pub mod users;

// Forms, groups, packages and entitlements
pub mod catalog;

// Google OAuth connect flow
pub mod oauth;

// Access token lifecycle
pub mod tokens;

// Google Sheets client and provisioning
pub mod sheets;

// Webhook submission pipeline
pub mod ingestion;

// Failed-authentication lockout
pub mod lockout;

// Bearer token extraction
pub mod auth;

// HTTP APIs
pub mod api;

// File and runtime configuration
pub mod config;
