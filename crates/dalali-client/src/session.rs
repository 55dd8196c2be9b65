//! Sign-in state: the stored credential, the current user, and the realtime
//! connection that follows them.

use crate::request::{RequestClient, RequestError, RequestOptions};
use crate::storage::{CredentialStore, StorageError};
use crate::transport::TransportClient;
use dalali_core::{ConnectionState, Credential, UserProfile};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Registration form.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: Credential,
    user: UserProfile,
}

/// `/api/auth/me` answers either with the profile or `{ "user": profile }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfileBody {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

impl From<ProfileBody> for UserProfile {
    fn from(body: ProfileBody) -> Self {
        match body {
            ProfileBody::Wrapped { user } | ProfileBody::Bare(user) => user,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("credential store: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct Session {
    requests: RequestClient,
    transport: TransportClient,
    store: Arc<dyn CredentialStore>,
    user: Arc<Mutex<Option<UserProfile>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user().map(|u| u.id))
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        requests: RequestClient,
        transport: TransportClient,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            requests,
            transport,
            store,
            user: Arc::new(Mutex::new(None)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<UserProfile>> {
        self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.slot().clone()
    }

    /// Whether a credential is stored. The server may still reject it.
    pub fn has_credential(&self) -> bool {
        self.store.load().is_some()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        let body = RequestOptions::post(LoginRequest { email, password })?;
        let auth: AuthResponse = self.requests.fetch("/api/auth/login", body).await?;
        tracing::info!("Signed in as {}", auth.user.id);
        self.establish(auth).await
    }

    pub async fn signup(&self, form: &SignupRequest) -> Result<UserProfile, SessionError> {
        let body = RequestOptions::post(form)?;
        let auth: AuthResponse = self.requests.fetch("/api/auth/register", body).await?;
        tracing::info!("Registered {}", auth.user.id);
        self.establish(auth).await
    }

    async fn establish(&self, auth: AuthResponse) -> Result<UserProfile, SessionError> {
        self.store.save(&auth.token)?;
        *self.slot() = Some(auth.user.clone());
        self.connect_as(&auth.user).await;
        Ok(auth.user)
    }

    /// Connect the transport announced as `user`. A live connection announced
    /// as anyone else is torn down first.
    async fn connect_as(&self, user: &UserProfile) {
        let announced = self.transport.current_user().map(|u| u.id);
        if announced.as_ref() != Some(&user.id)
            && self.transport.snapshot().state != ConnectionState::Disconnected
        {
            tracing::info!("Switching realtime connection to {}", user.id);
            self.transport.disconnect();
        }
        self.transport.connect(Some(user.clone())).await;
    }

    /// Sign out locally. The server is told first; if that fails the local
    /// sign-out still happens.
    pub async fn logout(&self) -> Result<(), SessionError> {
        if self.has_credential() {
            let notified = match RequestOptions::post(serde_json::json!({})) {
                Ok(body) => self.requests.send("/api/auth/logout", body).await,
                Err(e) => Err(e),
            };
            if let Err(e) = notified {
                tracing::debug!("Server logout failed, continuing: {}", e);
            }
        }
        self.forget()
    }

    fn forget(&self) -> Result<(), SessionError> {
        *self.slot() = None;
        self.transport.disconnect();
        self.store.clear()?;
        Ok(())
    }

    /// Re-read the profile for the stored credential.
    ///
    /// `Ok(None)` when there is no credential, or the server rejected it (the
    /// credential is then cleared and the transport disconnected). On success
    /// the transport is connected as that user.
    pub async fn refresh_profile(&self) -> Result<Option<UserProfile>, SessionError> {
        if !self.has_credential() {
            return Ok(None);
        }
        match self
            .requests
            .fetch::<ProfileBody>("/api/auth/me", RequestOptions::get())
            .await
        {
            Ok(body) => {
                let user = UserProfile::from(body);
                *self.slot() = Some(user.clone());
                self.connect_as(&user).await;
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                tracing::warn!("Stored credential rejected; signing out");
                self.forget()?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start-up: resume the previous session if a credential was kept.
    pub async fn restore(&self) -> Result<Option<UserProfile>, SessionError> {
        if !self.has_credential() {
            tracing::debug!("No stored credential; starting signed out");
            return Ok(None);
        }
        self.refresh_profile().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_form_uses_camel_case_and_skips_missing() {
        let form = SignupRequest {
            name: "Asha".into(),
            email: "asha@example.com".into(),
            password: "pw".into(),
            room_number: Some("B-12".into()),
            hostel: None,
        };
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["roomNumber"], "B-12");
        assert!(json.get("hostel").is_none());
    }

    #[test]
    fn profile_body_accepts_both_shapes() {
        let bare: ProfileBody = serde_json::from_str(r#"{"_id":"u1","name":"Asha"}"#).unwrap();
        assert_eq!(UserProfile::from(bare).id, "u1");
        let wrapped: ProfileBody =
            serde_json::from_str(r#"{"user":{"id":"u2","name":"Ravi"}}"#).unwrap();
        assert_eq!(UserProfile::from(wrapped).id, "u2");
    }
}
