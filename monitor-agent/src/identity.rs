use std::{fmt, fs, io, path::Path, str::FromStr};

use log::info;

/// Stable installation id, the discriminating key of every remote key and endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentity(String);

impl AgentIdentity {
    /// Reads the id persisted at `path`, generating and persisting a new one if the file is absent.
    pub fn load_or_create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => match content.parse() {
                Ok(id) => Ok(id),
                Err(_) => Self::create(path),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::create(path),
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        fs::write(path, &id)?;
        info!("generated agent id {id} at {}", path.display());
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentIdentity {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("agent id must not be empty");
        }
        Ok(Self(s.to_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generates_once_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".uuid");

        let first = AgentIdentity::load_or_create(&path).unwrap();
        assert_eq!(first.as_str().len(), 32);
        assert!(!first.as_str().contains('-'));
        assert_eq!(fs::read_to_string(&path).unwrap(), first.as_str());

        let second = AgentIdentity::load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".uuid");
        fs::write(&path, "0123456789abcdef0123456789abcdef\n").unwrap();

        let id = AgentIdentity::load_or_create(&path).unwrap();
        assert_eq!(id.to_string(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join(".uuid");

        assert!(AgentIdentity::load_or_create(&path).is_err());
    }
}
