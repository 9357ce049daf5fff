//! Opt-in registry of shared client instances.
//!
//! Applications should retain a single [`Client`] per environment. This registry
//! offers that sharing explicitly, keyed by the configuration identity (the
//! environment secret plus the configured URLs); nothing is registered unless a
//! caller asks for it.

use crate::errors::ClientError;
use crate::options::ClientBuilder;
use crate::utils::{lock, sha1};
use crate::Client;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

lazy_static! {
    static ref SHARED_CLIENTS: Mutex<HashMap<String, Arc<Client>>> = Mutex::new(HashMap::new());
}

/// Returns the shared client registered under the builder's configuration
/// identity, building and registering one if none exists yet.
///
/// # Errors
///
/// This method fails when a new client has to be built and the builder's
/// configuration is invalid.
pub fn get_or_create(builder: ClientBuilder) -> Result<Arc<Client>, ClientError> {
    let key = builder.identity_key();
    let mut clients = lock(&SHARED_CLIENTS);
    if let Some(existing) = clients.get(&key) {
        return Ok(Arc::clone(existing));
    }
    let client = Arc::new(builder.build()?);
    clients.insert(key, Arc::clone(&client));
    Ok(client)
}

/// Removes the shared client registered under the given configuration identity
/// and stops it. Holders of previously returned handles can keep evaluating
/// against the frozen store.
pub fn purge(env_secret: &str, streaming_url: &str, event_url: &str) {
    let key = sha1(format!("{env_secret}_{streaming_url}_{event_url}").as_str());
    let removed = lock(&SHARED_CLIENTS).remove(&key);
    if let Some(client) = removed {
        client.stop();
    }
}
