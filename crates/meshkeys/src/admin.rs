//! Single-admin bootstrap.
//!
//! The "only one admin" rule lives in the store as a singleton constraint;
//! nothing here caches whether an admin exists.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::auth::{AuthService, Credential, Session};
use crate::error::{Error, Result};
use crate::store::{Identity, Store, bounded};
use crate::validation::{validate_password, validate_username};

/// What callers get to see of the admin identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminView {
    #[serde(rename = "UserName")]
    pub username: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: i64,
}

impl From<Identity> for AdminView {
    fn from(identity: Identity) -> Self {
        Self { username: identity.username, created_at: identity.created_at }
    }
}

pub struct AdminBootstrap {
    store: Arc<dyn Store>,
    auth: Arc<AuthService>,
    deadline: Duration,
}

impl AdminBootstrap {
    pub fn new(store: Arc<dyn Store>, auth: Arc<AuthService>, deadline: Duration) -> Self {
        Self { store, auth, deadline }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn has_admin(&self) -> Result<bool> {
        Ok(bounded(self.deadline, self.store.count_identities()).await? == 1)
    }

    /// Create the admin identity. Requires the superuser capability.
    pub async fn create_admin(
        &self,
        credential: &Credential,
        username: &str,
        password: &str,
    ) -> Result<AdminView> {
        self.auth.require_superuser(credential)?;
        validate_username(username)?;
        validate_password(password)?;

        let hash = self.auth.hash_password(password).await?;
        let identity = Identity::new(username, hash);
        bounded(self.deadline, self.store.insert_identity_if_absent(&identity)).await.map_err(
            |e| match Error::from(e) {
                Error::Conflict(_) => Error::conflict("an admin already exists"),
                other => other,
            },
        )?;

        tracing::info!(username, "Created admin");
        Ok(identity.into())
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        self.auth.authenticate(username, password).await
    }

    /// Superuser, or a token naming `username` itself.
    fn authorize_self(&self, credential: &Credential, username: &str) -> Result<()> {
        if self.auth.is_superuser(credential) {
            return Ok(());
        }
        let token = credential
            .value()
            .ok_or_else(|| Error::unauthorized("missing bearer credential"))?;
        if self.auth.validate(token)? != username {
            return Err(Error::unauthorized("token does not belong to this user"));
        }
        Ok(())
    }

    pub async fn get_admin(&self, credential: &Credential, username: &str) -> Result<AdminView> {
        self.authorize_self(credential, username)?;
        bounded(self.deadline, self.store.get_identity(username))
            .await?
            .map(AdminView::from)
            .ok_or_else(|| Error::not_found(format!("user {username} not found")))
    }

    /// Delete the admin. Absence is reported as `NotFound`, never as a failure
    /// of the store.
    pub async fn delete_admin(&self, credential: &Credential, username: &str) -> Result<()> {
        self.authorize_self(credential, username)?;

        if bounded(self.deadline, self.store.delete_identity(username)).await? {
            tracing::info!(username, "Deleted admin");
            Ok(())
        } else {
            tracing::debug!(username, "Delete requested for absent admin");
            Err(Error::not_found(format!("user {username} not found")))
        }
    }
}
