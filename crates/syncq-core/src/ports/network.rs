//! Network state and authentication ports
//!
//! Both collaborators are queried synchronously by the engine before it
//! dispatches work. Connectivity change notifications are delivered
//! separately (see the sync crate's network listener).

/// Port trait exposing current connectivity
pub trait INetworkState: Send + Sync {
    /// Returns true if the device can currently reach the network
    fn is_connected(&self) -> bool;
}

/// Credentials of the signed-in user, opaque to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    /// Provider-specific user identifier
    pub user_id: String,
    /// Bearer token or similar, passed through to the transport
    pub token: String,
}

/// Port trait exposing the sign-in state
pub trait IAuthentication: Send + Sync {
    /// Returns true if a user is currently signed in
    fn is_signed_in(&self) -> bool;

    /// Credentials of the signed-in user, if any
    fn credentials(&self) -> Option<UserCredentials>;
}
