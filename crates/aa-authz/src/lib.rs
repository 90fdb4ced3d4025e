//! # aa-authz
//!
//! The AgentAuth authorization service.
//!
//! [`AuthorizationService`] ties the pure policy engine in `aa-policy` to
//! state and audit: it validates requests, loads agents and policies from a
//! store, evaluates under the agent's spend lock, opens consents for
//! PENDING decisions, and writes one audit record per decision.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use aa_authz::{AuthorizationService, AuthzConfig};
//! use aa_policy::AuthorizationRequest;
//!
//! let service = AuthorizationService::open(&AuthzConfig::for_project(".")).unwrap();
//! let request = AuthorizationRequest::new("shopper-1", "purchase")
//!     .with_amount(42.0)
//!     .with_merchant("books.example");
//! let result = service.authorize(&request).unwrap();
//! println!("{} ({})", result.decision, result.reason);
//! ```

pub mod config;
pub mod error;
pub mod service;
pub mod store;

pub use config::{AuthzConfig, EngineSettings};
pub use error::{AuthzError, ConfigError, StoreError};
pub use service::AuthorizationService;
pub use store::{AgentStore, ConsentStore, FileStore, MemoryStore, PolicyStore};
