//! Service-account token authentication.
//!
//! - `discovery` - OIDC provider discovery
//! - `jwks` - signing-key cache with single-flight refresh
//! - `verifier` - signature and claims verification
//! - `claims` - structured claims handed to handlers
//! - `subjects` - subject allow-list

pub mod claims;
pub mod discovery;
pub mod jwks;
pub mod subjects;
pub mod verifier;

pub use claims::{Audience, Claims, KubernetesIdentity};
pub use discovery::{OidcProvider, ProviderMetadata};
pub use jwks::JwksCache;
pub use subjects::SubjectAllowList;
pub use verifier::{OidcVerifier, TokenVerifier, VerifiedToken, VerifierSettings};
