use crate::error::ShellError;
use std::collections::BTreeMap;

/// Aliases every session starts with. They cannot be deleted.
pub const BUILTIN_ALIASES: &[(&str, &str)] = &[("cat", "type"), ("cd..", "cd .."), ("cd\\", "cd \\")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub replacement: String,
    /// Defined by the configuration, so every session gets it again.
    pub persistent: bool,
    pub builtin: bool,
}

/// Alias name → replacement command text.
#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: BTreeMap<String, Alias>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let mut table = Self {
            aliases: BTreeMap::new(),
        };
        for (name, replacement) in BUILTIN_ALIASES {
            table.aliases.insert(
                name.to_ascii_lowercase(),
                Alias {
                    name: name.to_string(),
                    replacement: replacement.to_string(),
                    persistent: false,
                    builtin: true,
                },
            );
        }
        table
    }
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Alias> {
        self.aliases.get(&name.to_ascii_lowercase())
    }

    /// Define or replace an alias. Built-in aliases keep their definition.
    pub fn set(&mut self, name: &str, replacement: &str, persistent: bool) -> Result<(), ShellError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ShellError::InvalidParameter(format!("alias name '{name}'")));
        }
        let key = name.to_ascii_lowercase();
        if self.aliases.get(&key).is_some_and(|a| a.builtin) {
            return Err(ShellError::InvalidParameter(format!(
                "'{name}' is a built-in alias"
            )));
        }
        self.aliases.insert(
            key,
            Alias {
                name: name.to_string(),
                replacement: replacement.to_string(),
                persistent,
                builtin: false,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), ShellError> {
        let key = name.to_ascii_lowercase();
        match self.aliases.get(&key) {
            None => Err(ShellError::NotFound(format!("alias '{name}'"))),
            Some(alias) if alias.builtin => Err(ShellError::InvalidParameter(format!(
                "'{name}' is a built-in alias"
            ))),
            Some(_) => {
                self.aliases.remove(&key);
                Ok(())
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_aliases_are_seeded_and_pinned() {
        let mut table = AliasTable::new();
        assert_eq!(table.get("CAT").unwrap().replacement, "type");
        assert!(matches!(
            table.remove("cat"),
            Err(ShellError::InvalidParameter(_))
        ));
        assert!(table.set("cat", "echo", false).is_err());
        assert_eq!(table.get("cat").unwrap().replacement, "type");
    }

    #[test]
    fn test_user_alias_lifecycle() {
        let mut table = AliasTable::new();
        table.set("ll", "type -b", true).unwrap();
        assert!(table.get("LL").unwrap().persistent);

        table.remove("ll").unwrap();
        assert!(table.get("ll").is_none());
        assert!(matches!(table.remove("ll"), Err(ShellError::NotFound(_))));
    }
}
