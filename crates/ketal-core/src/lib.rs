//! OIDC sign-in and sign-out flows for Matrix homeservers.
//!
//! [`auth::SignInCoordinator`] drives a browser-based authorization code
//! exchange; [`auth::SignOutCoordinator`] discovers the provider's end-session
//! endpoint through [`discovery::DiscoveryResolver`] and opens it before local
//! teardown.

pub mod auth;
pub mod config;
pub mod discovery;

#[cfg(test)]
pub(crate) mod testing;
