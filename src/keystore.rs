use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MIN_KEY_LEN: usize = 10;

/// Provider credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Accepts a key once trimmed and at least ten characters long.
    pub fn parse(raw: &str) -> Result<Self, KeyStoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(KeyStoreError::Missing);
        }
        if trimmed.chars().count() < MIN_KEY_LEN {
            return Err(KeyStoreError::Invalid);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First and last four characters, for display.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.masked()).finish()
    }
}

#[derive(Debug)]
pub enum KeyStoreError {
    Missing,
    Invalid,
    Io(io::Error),
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStoreError::Missing => write!(f, "API key is required"),
            KeyStoreError::Invalid => {
                write!(f, "invalid API key format (expected at least {MIN_KEY_LEN} characters)")
            }
            KeyStoreError::Io(err) => write!(f, "key file error: {err}"),
        }
    }
}

impl std::error::Error for KeyStoreError {}

impl From<io::Error> for KeyStoreError {
    fn from(value: io::Error) -> Self {
        KeyStoreError::Io(value)
    }
}

/// Single-key file store.
///
/// The key is created on first use, read on every generation call and only
/// removed through [`KeyStore::clear`].
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when no key has been stored yet.
    pub fn load(&self) -> Result<Option<ApiKey>, KeyStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => ApiKey::parse(&contents).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, key: &ApiKey) -> Result<(), KeyStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, key.expose())?;
        restrict_permissions(&self.path)?;
        Ok(())
    }

    /// Removes the stored key. Returns whether a key was present.
    pub fn clear(&self) -> Result<bool, KeyStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_enforces_minimum_length() {
        assert!(matches!(ApiKey::parse("   "), Err(KeyStoreError::Missing)));
        assert!(matches!(ApiKey::parse("short"), Err(KeyStoreError::Invalid)));
        let key = ApiKey::parse("  AIzaSyExampleKey123  ").unwrap();
        assert_eq!(key.expose(), "AIzaSyExampleKey123");
        assert_eq!(key.masked(), "AIza…y123");
        assert!(!format!("{key:?}").contains("ExampleKey"));
    }

    #[test]
    fn store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("nested").join("key"));
        assert!(store.load().unwrap().is_none());

        let key = ApiKey::parse("AIzaSyExampleKey123").unwrap();
        store.save(&key).unwrap();
        assert_eq!(store.load().unwrap(), Some(key));

        assert!(store.clear().unwrap());
        assert!(!store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_key_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, "tiny").unwrap();
        let store = KeyStore::new(&path);
        assert!(matches!(store.load(), Err(KeyStoreError::Invalid)));
    }
}
