use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use detection_wire::{Profile, ProfileUpdate};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Username and password are required")]
    MissingFields,
    #[error("Username already exists")]
    UsernameExists,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Password hashing failed: {0}")]
    Hash(String),
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// User accounts. Implementations hash passwords themselves and never hand
/// the hash back out.
pub trait AccountStore: Send + Sync + 'static {
    fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<Profile, AccountError>;

    /// Returns the account id when the credentials match.
    fn authenticate(&self, username: &str, password: &str) -> Result<u64, AccountError>;

    fn profile(&self, id: u64) -> Result<Profile, AccountError>;

    fn update_profile(&self, id: u64, update: &ProfileUpdate) -> Result<Profile, AccountError>;

    fn delete(&self, id: u64) -> Result<(), AccountError>;
}

struct Account {
    username: String,
    email: String,
    password_hash: String,
}

impl Account {
    fn profile(&self) -> Profile {
        Profile {
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Default)]
struct Accounts {
    by_id: HashMap<u64, Account>,
    last_id: u64,
}

impl Accounts {
    fn username_in_use(&self, username: &str) -> bool {
        self.by_id.values().any(|a| a.username == username)
    }
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::Hash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AccountError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AccountError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Accounts held in process memory. Hashing runs outside the lock.
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<Accounts>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<Profile, AccountError> {
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::MissingFields);
        }
        if self.accounts.read().username_in_use(username) {
            return Err(AccountError::UsernameExists);
        }
        let password_hash = hash_password(password)?;

        let mut accounts = self.accounts.write();
        if accounts.username_in_use(username) {
            return Err(AccountError::UsernameExists);
        }
        accounts.last_id += 1;
        let id = accounts.last_id;
        let account = Account {
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
        };
        let profile = account.profile();
        accounts.by_id.insert(id, account);
        tracing::info!("Registered account {} ({})", username, id);

        Ok(profile)
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<u64, AccountError> {
        let found = self
            .accounts
            .read()
            .by_id
            .iter()
            .find(|(_, a)| a.username == username)
            .map(|(id, a)| (*id, a.password_hash.clone()));

        match found {
            Some((id, hash)) if verify_password(password, &hash)? => Ok(id),
            _ => Err(AccountError::InvalidCredentials),
        }
    }

    fn profile(&self, id: u64) -> Result<Profile, AccountError> {
        self.accounts
            .read()
            .by_id
            .get(&id)
            .map(Account::profile)
            .ok_or(AccountError::NotAuthenticated)
    }

    fn update_profile(&self, id: u64, update: &ProfileUpdate) -> Result<Profile, AccountError> {
        let password_hash = match update.password.as_deref() {
            Some(password) if !password.is_empty() => Some(hash_password(password)?),
            _ => None,
        };

        let mut accounts = self.accounts.write();
        let new_username = update.username.as_deref().filter(|u| !u.is_empty());
        if let Some(username) = new_username {
            let current = accounts
                .by_id
                .get(&id)
                .ok_or(AccountError::NotAuthenticated)?;
            if current.username != username && accounts.username_in_use(username) {
                return Err(AccountError::UsernameTaken);
            }
        }

        let account = accounts
            .by_id
            .get_mut(&id)
            .ok_or(AccountError::NotAuthenticated)?;
        if let Some(username) = new_username {
            account.username = username.to_string();
        }
        if let Some(email) = &update.email {
            account.email = email.clone();
        }
        if let Some(hash) = password_hash {
            account.password_hash = hash;
        }

        Ok(account.profile())
    }

    fn delete(&self, id: u64) -> Result<(), AccountError> {
        match self.accounts.write().by_id.remove(&id) {
            Some(account) => {
                tracing::info!("Deleted account {} ({})", account.username, id);
                Ok(())
            }
            None => Err(AccountError::NotAuthenticated),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Signs and checks bearer tokens. Logged-out tokens stay rejected until
/// they would have expired anyway.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: u64,
    revoked: Mutex<HashMap<String, usize>>,
}

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
            revoked: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self, account_id: u64) -> Result<String, AccountError> {
        let iat = now();
        let claims = Claims {
            sub: account_id.to_string(),
            iat,
            exp: iat + self.ttl_secs as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Returns the account id carried by a valid, unrevoked token.
    pub fn verify(&self, token: &str) -> Result<u64, AccountError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| AccountError::NotAuthenticated)?
            .claims;
        if self.revoked.lock().contains_key(token) {
            return Err(AccountError::NotAuthenticated);
        }
        claims
            .sub
            .parse()
            .map_err(|_| AccountError::NotAuthenticated)
    }

    /// Account id of the caller, from the request's bearer token.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<u64, AccountError> {
        let token = bearer_token(headers).ok_or(AccountError::NotAuthenticated)?;
        self.verify(token)
    }

    /// Rejects `token` from now on. Unknown or already expired tokens are
    /// ignored.
    pub fn revoke(&self, token: &str) {
        let Ok(data) = decode::<Claims>(token, &self.decoding_key, &Validation::default()) else {
            return;
        };
        let now = now();
        let mut revoked = self.revoked.lock();
        revoked.retain(|_, exp| *exp > now);
        revoked.insert(token.to_string(), data.claims.exp);
    }
}
