use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::StorageHandle;
use crate::auth::{check_credentials, AuthError, AuthErrorCode, MIN_DISPLAY_NAME_LEN};
use crate::collab::IdentityProvider;
use crate::model::{format_timestamp, UserIdentity};

const KEY_LEN: usize = 32;
// OWASP baseline for argon2id: 19 MiB, 2 passes, 1 lane.
const MEMORY_KIB: u32 = 19 * 1024;
const ITERATIONS: u32 = 2;
const LANES: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    uid: String,
}

/// Email/password accounts kept in the notes database, with an optional
/// remembered session on disk.
pub struct LocalIdentity {
    storage: StorageHandle,
    session_file: PathBuf,
    current: RwLock<Option<UserIdentity>>,
    watchers: Mutex<Vec<Sender<Option<UserIdentity>>>>,
}

impl LocalIdentity {
    /// Opens the provider and restores a remembered session if one exists.
    pub fn open(storage: StorageHandle, session_file: PathBuf) -> anyhow::Result<Self> {
        let identity = Self {
            storage,
            session_file,
            current: RwLock::new(None),
            watchers: Mutex::new(Vec::new()),
        };
        if let Some(user) = identity.restore_session()? {
            tracing::debug!(uid = %user.uid, "restored session");
            *identity.current.write() = Some(user);
        }
        Ok(identity)
    }

    fn restore_session(&self) -> anyhow::Result<Option<UserIdentity>> {
        if !self.session_file.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.session_file)
            .with_context(|| format!("reading session {}", self.session_file.display()))?;
        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable session file");
                self.forget_session()?;
                return Ok(None);
            }
        };
        let user = self.find_by_uid(&record.uid)?;
        if user.is_none() {
            self.forget_session()?;
        }
        Ok(user)
    }

    fn remember_session(&self, user: &UserIdentity) -> anyhow::Result<()> {
        if let Some(parent) = self.session_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let record = SessionRecord {
            uid: user.uid.clone(),
        };
        fs::write(&self.session_file, serde_json::to_vec(&record)?)
            .with_context(|| format!("writing session {}", self.session_file.display()))?;
        Ok(())
    }

    fn forget_session(&self) -> anyhow::Result<()> {
        if self.session_file.exists() {
            fs::remove_file(&self.session_file)
                .with_context(|| format!("removing session {}", self.session_file.display()))?;
        }
        Ok(())
    }

    fn find_by_uid(&self, uid: &str) -> anyhow::Result<Option<UserIdentity>> {
        self.storage.with_connection(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, email, display_name FROM users WHERE id = ?1",
                    params![uid],
                    |row| {
                        Ok(UserIdentity {
                            uid: row.get(0)?,
                            email: row.get(1)?,
                            display_name: row.get(2)?,
                        })
                    },
                )
                .optional()
                .context("loading user")?;
            Ok(user)
        })
    }

    fn find_by_email(&self, email: &str) -> anyhow::Result<Option<(UserIdentity, String)>> {
        self.storage.with_connection(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, email, display_name, password_hash FROM users WHERE email = ?1",
                    params![email],
                    |row| {
                        Ok((
                            UserIdentity {
                                uid: row.get(0)?,
                                email: row.get(1)?,
                                display_name: row.get(2)?,
                            },
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .context("looking up account")?;
            Ok(user)
        })
    }

    fn set_current(&self, user: Option<UserIdentity>) {
        *self.current.write() = user.clone();
        let mut watchers = self.watchers.lock();
        watchers.retain(|watcher| watcher.send(user.clone()).is_ok());
    }
}

impl IdentityProvider for LocalIdentity {
    fn register(&self, email: &str, password: &str, display_name: &str) -> Result<UserIdentity, AuthError> {
        let email = email.trim().to_lowercase();
        check_credentials(&email, password)?;
        let display_name = display_name.trim();
        if display_name.chars().count() < MIN_DISPLAY_NAME_LEN {
            return Err(AuthError::new(
                AuthErrorCode::InvalidDisplayName,
                format!("Display name must be at least {MIN_DISPLAY_NAME_LEN} characters"),
            ));
        }
        if self.find_by_email(&email).map_err(internal)?.is_some() {
            return Err(AuthError::new(
                AuthErrorCode::EmailAlreadyInUse,
                format!("an account for {email} already exists"),
            ));
        }

        let user = UserIdentity {
            uid: Uuid::new_v4().simple().to_string(),
            email,
            display_name: display_name.to_string(),
        };
        let stored = hash_password(password).map_err(internal)?;
        self.storage
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO users (id, email, display_name, password_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        user.uid,
                        user.email,
                        user.display_name,
                        stored,
                        format_timestamp(OffsetDateTime::now_utc()),
                    ],
                )
                .context("inserting account")?;
                Ok(())
            })
            .map_err(internal)?;
        self.remember_session(&user).map_err(internal)?;
        tracing::info!(uid = %user.uid, "account registered");
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<UserIdentity, AuthError> {
        let email = email.trim().to_lowercase();
        let rejected = || AuthError::new(AuthErrorCode::InvalidCredential, "invalid email or password");
        let (user, stored) = self
            .find_by_email(&email)
            .map_err(internal)?
            .ok_or_else(rejected)?;
        if !verify_password(password, &stored).map_err(internal)? {
            tracing::debug!(uid = %user.uid, "password mismatch");
            return Err(rejected());
        }
        if remember_me {
            self.remember_session(&user).map_err(internal)?;
        } else {
            self.forget_session().map_err(internal)?;
        }
        tracing::info!(uid = %user.uid, remember_me, "signed in");
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn logout(&self) -> Result<(), AuthError> {
        self.forget_session().map_err(internal)?;
        if let Some(user) = self.current.read().as_ref() {
            tracing::info!(uid = %user.uid, "signed out");
        }
        self.set_current(None);
        Ok(())
    }

    fn current_user(&self) -> Option<UserIdentity> {
        self.current.read().clone()
    }

    fn watch(&self) -> Receiver<Option<UserIdentity>> {
        let (sender, receiver) = unbounded();
        let _ = sender.send(self.current_user());
        self.watchers.lock().push(sender);
        receiver
    }
}

fn internal(err: anyhow::Error) -> AuthError {
    tracing::warn!(error = %format!("{err:#}"), "identity backend failure");
    AuthError::new(AuthErrorCode::Internal, format!("{err:#}"))
}

fn argon2() -> anyhow::Result<Argon2<'static>> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, LANES, Some(KEY_LEN))
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(password: &str, salt: &[u8]) -> anyhow::Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    argon2()?
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|err| anyhow!("argon2 hashing failed: {err}"))?;
    Ok(key)
}

/// `salt$key`, both base64.
fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = *Uuid::new_v4().as_bytes();
    let key = derive(password, &salt)?;
    Ok(format!("{}${}", STANDARD.encode(salt), STANDARD.encode(key)))
}

fn verify_password(password: &str, stored: &str) -> anyhow::Result<bool> {
    let (salt, key) = stored
        .split_once('$')
        .context("malformed password hash")?;
    let salt = STANDARD.decode(salt).context("decoding password salt")?;
    let expected = STANDARD.decode(key).context("decoding password hash")?;
    let actual = derive(password, &salt)?;
    Ok(actual.as_slice() == expected.as_slice())
}
