//! Secret types for keeping credentials out of logs.
//!
//! Re-exports from the [`secrecy`] crate. The gateway uses [`SecretString`]
//! for the mounted service-account token and for bearer tokens lifted off
//! incoming requests, so any struct deriving `Debug` around them prints a
//! redacted placeholder instead of the credential.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Identity {
//!     host: String,
//!     token: SecretString,
//! }
//!
//! let identity = Identity {
//!     host: "https://10.96.0.1:443".to_string(),
//!     token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{identity:?}").contains("eyJhbGciOi"));
//! let raw: &str = identity.token.expose_secret();
//! assert!(raw.starts_with("eyJ"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("sa-token-value");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("sa-token-value"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("bearer-123");
        assert_eq!(secret.expose_secret(), "bearer-123");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct MountedIdentity {
            host: String,
            token: SecretString,
        }

        let identity = MountedIdentity {
            host: "https://10.96.0.1:443".to_string(),
            token: SecretString::from("projected-token"),
        };

        let debug_str = format!("{identity:?}");

        assert!(debug_str.contains("10.96.0.1"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("projected-token"));
    }

    #[test]
    fn test_clone_works() {
        let secret = SecretString::from("cloneable");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
