use crate::error::ShellError;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

bitflags! {
    /// Attribute bits carried by every environment variable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VariableAttributes: u32 {
        /// Users cannot set or delete the variable; only the shell updates it.
        const READ_ONLY = 0x1;
    }
}

/// One entry of the [`EnvironmentStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name as the user spelled it when the variable was created.
    pub name: String,
    /// Current value.
    pub value: String,
    /// Durable across sessions (written through to the [`VariableStore`]).
    pub persistent: bool,
    /// Attribute bits.
    pub attributes: VariableAttributes,
}

/// Persistent key-value service used for durable variables.
///
/// The shell never interprets how values are kept; it only loads the durable
/// set at startup and writes through every change to a persistent variable.
pub trait VariableStore {
    /// All durable variables, in any order.
    fn load(&self) -> Result<Vec<(String, String)>, ShellError>;
    /// Create or replace a durable variable.
    fn store(&mut self, name: &str, value: &str) -> Result<(), ShellError>;
    /// Delete a durable variable. Deleting an absent name is not an error.
    fn remove(&mut self, name: &str) -> Result<(), ShellError>;
}

/// Session-local stand-in for a durable store.
#[derive(Debug, Default)]
pub struct MemoryVariableStore {
    vars: BTreeMap<String, String>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VariableStore for MemoryVariableStore {
    fn load(&self) -> Result<Vec<(String, String)>, ShellError> {
        Ok(self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn store(&mut self, name: &str, value: &str) -> Result<(), ShellError> {
        self.vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), ShellError> {
        self.vars.remove(name);
        Ok(())
    }
}

/// Durable variables kept in a TOML table on disk.
#[derive(Debug)]
pub struct FileVariableStore {
    path: PathBuf,
    vars: BTreeMap<String, String>,
}

impl FileVariableStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ShellError> {
        let path = path.into();
        let vars = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|e| {
                ShellError::DeviceError(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, vars })
    }

    fn flush(&self) -> Result<(), ShellError> {
        let text = toml::to_string(&self.vars)
            .map_err(|e| ShellError::DeviceError(e.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

impl VariableStore for FileVariableStore {
    fn load(&self) -> Result<Vec<(String, String)>, ShellError> {
        Ok(self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn store(&mut self, name: &str, value: &str) -> Result<(), ShellError> {
        self.vars.insert(name.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, name: &str) -> Result<(), ShellError> {
        if self.vars.remove(name).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// Shell environment: name → (value, persistence flag, attributes).
///
/// Names are unique case-insensitively. Persistent entries are written
/// through to the backing [`VariableStore`]; volatile entries live only as
/// long as the session.
pub struct EnvironmentStore {
    vars: BTreeMap<String, Variable>,
    backend: Box<dyn VariableStore>,
}

impl EnvironmentStore {
    /// Build a store seeded with every durable variable the backend holds.
    pub fn new(backend: Box<dyn VariableStore>) -> Result<Self, ShellError> {
        let mut vars = BTreeMap::new();
        for (name, value) in backend.load()? {
            vars.insert(
                name.to_ascii_lowercase(),
                Variable {
                    name,
                    value,
                    persistent: true,
                    attributes: VariableAttributes::empty(),
                },
            );
        }
        Ok(Self { vars, backend })
    }

    /// Empty store backed by a [`MemoryVariableStore`].
    pub fn in_memory() -> Self {
        Self {
            vars: BTreeMap::new(),
            backend: Box::new(MemoryVariableStore::new()),
        }
    }

    /// Get the value of a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.variable(name).map(|v| v.value.as_str())
    }

    /// Full entry for a variable.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.vars.get(&name.to_ascii_lowercase())
    }

    pub fn is_persistent(&self, name: &str) -> bool {
        self.variable(name).is_some_and(|v| v.persistent)
    }

    /// Set or override a variable on behalf of a user command.
    ///
    /// Read-only variables are refused. Switching a persistent variable to
    /// volatile removes it from the backing store.
    pub fn set(&mut self, name: &str, value: &str, persistent: bool) -> Result<(), ShellError> {
        if name.is_empty() {
            return Err(ShellError::InvalidParameter("empty variable name".into()));
        }
        let key = name.to_ascii_lowercase();
        let (stored_as, attributes) = match self.vars.get(&key) {
            Some(existing) if existing.attributes.contains(VariableAttributes::READ_ONLY) => {
                return Err(ShellError::InvalidParameter(format!(
                    "'{name}' is read-only"
                )));
            }
            Some(existing) => (
                existing.persistent.then(|| existing.name.clone()),
                existing.attributes,
            ),
            None => (None, VariableAttributes::empty()),
        };
        // The backing store is keyed by spelling, so an old spelling must go
        // before the new one is written.
        if let Some(old) = stored_as.as_deref()
            && (!persistent || old != name)
        {
            self.backend.remove(old)?;
        }
        if persistent {
            self.backend.store(name, value)?;
        }
        self.vars.insert(
            key,
            Variable {
                name: name.to_string(),
                value: value.to_string(),
                persistent,
                attributes,
            },
        );
        Ok(())
    }

    /// Shorthand for a session-only variable.
    pub fn set_volatile(&mut self, name: &str, value: &str) -> Result<(), ShellError> {
        self.set(name, value, false)
    }

    /// Shell-internal update that bypasses the read-only check.
    pub(crate) fn set_shell(&mut self, name: &str, value: &str, attributes: VariableAttributes) {
        self.vars.insert(
            name.to_ascii_lowercase(),
            Variable {
                name: name.to_string(),
                value: value.to_string(),
                persistent: false,
                attributes,
            },
        );
    }

    /// Delete a variable.
    pub fn remove(&mut self, name: &str) -> Result<(), ShellError> {
        let key = name.to_ascii_lowercase();
        let Some(existing) = self.vars.get(&key) else {
            return Err(ShellError::NotFound(format!("variable '{name}'")));
        };
        if existing.attributes.contains(VariableAttributes::READ_ONLY) {
            return Err(ShellError::InvalidParameter(format!("'{name}' is read-only")));
        }
        if existing.persistent {
            self.backend.remove(&existing.name)?;
        }
        self.vars.remove(&key);
        Ok(())
    }

    /// All variables ordered by lower-cased name.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_set_and_get_var_case_insensitive() {
        let mut env = EnvironmentStore::in_memory();

        // initially absent
        assert_eq!(env.get("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_volatile("Key", "VALUE").unwrap();

        assert_eq!(env.get("KEY"), Some("VALUE"));
        assert_eq!(env.get("key"), Some("VALUE"));
        assert_eq!(env.variable("kEy").unwrap().name, "Key");
        assert_eq!(env.iter().count(), 1);
    }

    #[test]
    fn test_persistent_vars_survive_into_new_store() {
        let mut backend = MemoryVariableStore::new();
        backend.store("profile", "debug").unwrap();

        let env = EnvironmentStore::new(Box::new(backend)).unwrap();
        assert!(env.is_persistent("PROFILE"));
        assert_eq!(env.get("profile"), Some("debug"));
    }

    #[test]
    fn test_read_only_refuses_user_updates() {
        let mut env = EnvironmentStore::in_memory();
        env.set_shell("lasterror", "0x0", VariableAttributes::READ_ONLY);

        assert!(matches!(
            env.set_volatile("lasterror", "1"),
            Err(ShellError::InvalidParameter(_))
        ));
        assert!(env.remove("LastError").is_err());
        assert_eq!(env.get("lasterror"), Some("0x0"));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut env = EnvironmentStore::in_memory();
        assert!(matches!(env.remove("nope"), Err(ShellError::NotFound(_))));
    }

    #[test]
    fn test_respelled_persistent_var_is_durable_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.toml");
        let reopen = || EnvironmentStore::new(Box::new(FileVariableStore::open(&path).unwrap())).unwrap();

        let mut env = reopen();
        env.set("Foo", "old", true).unwrap();
        env.set("FOO", "new", true).unwrap();
        let env = reopen();
        assert_eq!(env.get("foo"), Some("new"));
        assert_eq!(env.variable("foo").unwrap().name, "FOO");
        assert_eq!(env.iter().count(), 1);

        let mut env = reopen();
        env.set("Foo", "1", true).unwrap();
        env.set("fOO", "2", true).unwrap();
        env.remove("foo").unwrap();
        let env = reopen();
        assert_eq!(env.get("foo"), None);
        assert!(
            FileVariableStore::open(&path).unwrap().load().unwrap().is_empty()
        );
    }

    #[test]
    fn test_volatile_override_drops_old_spelling_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.toml");

        let mut env = EnvironmentStore::new(Box::new(FileVariableStore::open(&path).unwrap())).unwrap();
        env.set("Mode", "disk", true).unwrap();
        env.set("MODE", "session", false).unwrap();
        assert_eq!(env.get("mode"), Some("session"));
        assert!(!env.is_persistent("mode"));

        let env = EnvironmentStore::new(Box::new(FileVariableStore::open(&path).unwrap())).unwrap();
        assert_eq!(env.get("mode"), None);
    }

    #[test]
    fn test_file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.toml");

        let mut store = FileVariableStore::open(&path).unwrap();
        store.store("color", "blue").unwrap();
        store.store("size", "10").unwrap();
        store.remove("size").unwrap();

        let reopened = FileVariableStore::open(&path).unwrap();
        assert_eq!(
            reopened.load().unwrap(),
            vec![("color".to_string(), "blue".to_string())]
        );
    }
}
