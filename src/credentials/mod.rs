//! Encrypted OAuth token handling.
//!
//! Tokens cross the persistence boundary only as [`EncryptedToken`]. The
//! decrypted form, [`PlainToken`], has no `Display` impl and a redacted
//! `Debug`, so it cannot end up in a log line by accident.
//!
//! # Usage
//!
//! ```no_run
//! use formrelay::credentials::EncryptionService;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("FORMRELAY_ENCRYPTION_KEY")?;
//! let service = EncryptionService::from_base64_key(&key)?;
//!
//! let sealed = service.encrypt("ya29.access-token")?;
//! let opened = service.decrypt(&sealed)?;
//! assert_eq!(opened.expose(), "ya29.access-token");
//! # Ok(())
//! # }
//! ```

mod encryption;

pub use encryption::{validate_key, EncryptionService};

/// Ciphertext of a token, exactly as persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedToken(String);

impl EncryptedToken {
    /// Wraps a value read back from storage.
    pub fn from_ciphertext(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for EncryptedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedToken({} bytes)", self.0.len())
    }
}

/// Decrypted token material.
///
/// Only obtainable by decrypting an [`EncryptedToken`] or from a provider
/// response; read it with [`PlainToken::expose`] at the point of use.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainToken(String);

impl PlainToken {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PlainToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlainToken(***)")
    }
}
