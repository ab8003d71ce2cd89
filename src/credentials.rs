//! Username/password retrieval from the OS keyring or the terminal.

use std::fmt;
use std::io::{self, Write};
use tracing::info;
use crate::error::{FsError, Result};

const KEYRING_SERVICE: &str = "portalfs";

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Persistent storage for the two credential fields.
pub trait CredentialStore {
    fn load(&self, field: &str) -> Option<String>;
    fn store(&self, field: &str, value: &str) -> Result<()>;
}

/// Interactive source for missing fields.
pub trait CredentialPrompt {
    fn username(&self) -> Option<String>;
    fn password(&self) -> Option<String>;
}

/// Keeps both fields in the keyring under a fixed service name, so only one
/// account can be stored.
pub struct KeyringStore;

impl CredentialStore for KeyringStore {
    fn load(&self, field: &str) -> Option<String> {
        keyring::Entry::new(KEYRING_SERVICE, field)
            .and_then(|entry| entry.get_password())
            .map_err(|e| info!("could not read {} from keyring: {}", field, e))
            .ok()
    }

    fn store(&self, field: &str, value: &str) -> Result<()> {
        keyring::Entry::new(KEYRING_SERVICE, field)
            .and_then(|entry| entry.set_password(value))
            .map_err(|e| FsError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
    }
}

pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn username(&self) -> Option<String> {
        eprint!("Username: ");
        io::stderr().flush().ok()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line).ok()?;
        Some(line.trim().to_string())
    }

    fn password(&self) -> Option<String> {
        rpassword::prompt_password("Password: ").ok()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Stored values first, prompting for whatever is still missing.
pub fn get_credentials_from(
    store: Option<&dyn CredentialStore>,
    prompt: Option<&dyn CredentialPrompt>,
) -> Result<Credentials> {
    let mut username = non_empty(store.and_then(|s| s.load("username")));
    let mut password = non_empty(store.and_then(|s| s.load("password")));

    if let Some(prompt) = prompt {
        if username.is_none() {
            username = non_empty(prompt.username());
        }
        if password.is_none() {
            password = non_empty(prompt.password());
        }
    }

    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials { username, password }),
        _ => Err(FsError::InvalidCredentials("no credentials available".into())),
    }
}

pub fn get_credentials(use_store: bool, prompt_if_missing: bool) -> Result<Credentials> {
    let store: Option<&dyn CredentialStore> = if use_store { Some(&KeyringStore) } else { None };
    let prompt: Option<&dyn CredentialPrompt> = if prompt_if_missing {
        Some(&TerminalPrompt)
    } else {
        None
    };
    get_credentials_from(store, prompt)
}

/// Best effort; failures are logged and otherwise ignored.
pub fn save_credentials_to(store: &dyn CredentialStore, credentials: &Credentials) {
    let saved = store
        .store("username", &credentials.username)
        .and_then(|_| store.store("password", &credentials.password));
    match saved {
        Ok(()) => info!("saved login to keyring"),
        Err(e) => info!("could not save login to keyring: {}", e),
    }
}

pub fn save_credentials(credentials: &Credentials) {
    save_credentials_to(&KeyringStore, credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
        broken: bool,
    }

    impl CredentialStore for MemoryStore {
        fn load(&self, field: &str) -> Option<String> {
            self.values.lock().get(field).cloned()
        }

        fn store(&self, field: &str, value: &str) -> Result<()> {
            if self.broken {
                return Err(FsError::Io(io::Error::new(io::ErrorKind::Other, "locked")));
            }
            self.values.lock().insert(field.to_string(), value.to_string());
            Ok(())
        }
    }

    struct Answers(Option<&'static str>, Option<&'static str>);

    impl CredentialPrompt for Answers {
        fn username(&self) -> Option<String> {
            self.0.map(str::to_string)
        }

        fn password(&self) -> Option<String> {
            self.1.map(str::to_string)
        }
    }

    #[test]
    fn test_store_then_prompt() {
        let store = MemoryStore::default();
        store.store("username", "ab1234").unwrap();

        let creds = get_credentials_from(Some(&store), Some(&Answers(Some("other"), Some("pw"))))
            .unwrap();
        assert_eq!(creds.username, "ab1234");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn test_missing_without_prompt_fails() {
        let store = MemoryStore::default();
        store.store("username", "ab1234").unwrap();
        assert!(matches!(
            get_credentials_from(Some(&store), None),
            Err(FsError::InvalidCredentials(_))
        ));
        assert!(matches!(
            get_credentials_from(None, Some(&Answers(Some("ab1234"), Some("")))),
            Err(FsError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_save_round_trip_and_swallowed_failure() {
        let store = MemoryStore::default();
        let creds = Credentials {
            username: "ab1234".into(),
            password: "secret".into(),
        };
        save_credentials_to(&store, &creds);
        assert_eq!(get_credentials_from(Some(&store), None).unwrap(), creds);

        let broken = MemoryStore {
            broken: true,
            ..Default::default()
        };
        save_credentials_to(&broken, &creds);
        assert!(broken.values.lock().is_empty());
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials {
            username: "ab1234".into(),
            password: "secret".into(),
        };
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_keyring_store_survives_reboot() {
        use keyring::credential::{CredentialBuilderApi, CredentialPersistence};
        let builder = keyring::default::default_credential_builder();
        assert!(matches!(
            builder.persistence(),
            CredentialPersistence::UntilDelete
        ));
    }
}
