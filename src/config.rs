use crate::error::ShellError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Shell configuration, read from a TOML file.
///
/// Every section is optional; a missing file or an empty document yields
/// [`ShellConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    #[serde(default)]
    pub shell: ShellSettings,
    /// Drive name (without the colon) → host directory.
    #[serde(default)]
    pub mappings: BTreeMap<String, PathBuf>,
    /// Volatile variables defined at startup, e.g. `path`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// User aliases defined at startup.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Where persistent variables are kept. Without it they live in memory.
    #[serde(default)]
    pub variables_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ShellSettings {
    /// How deep scripts, pipelines and nested lines may recurse.
    pub max_nesting_depth: usize,
    /// Extension that marks a file as a shell script.
    pub script_extension: String,
    /// Extensions tried, in order, for a bare command name.
    pub executable_extensions: Vec<String>,
    /// Initial state of the global script echo flag.
    pub echo: bool,
    /// Script run before the first prompt, if it exists.
    pub startup_script: Option<String>,
    /// Default log level for the binary (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            max_nesting_depth: 64,
            script_extension: "nsh".to_string(),
            executable_extensions: vec!["nsh".to_string(), "efi".to_string()],
            echo: true,
            startup_script: Some("startup.nsh".to_string()),
            log_level: None,
        }
    }
}

impl ShellConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, ShellError> {
        toml::from_str(text).map_err(|e| ShellError::InvalidParameter(format!("config: {e}")))
    }

    /// Read and parse the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ShellError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ShellError::NotFound(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn is_script_name(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.shell.script_extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(ShellConfig::from_toml_str("").unwrap(), ShellConfig::default());
    }

    #[test]
    fn test_full_document() {
        let config = ShellConfig::from_toml_str(
            r#"
            variables_file = "/var/lib/shell/vars.toml"

            [shell]
            max_nesting_depth = 8
            echo = false
            startup_script = "boot.nsh"

            [mappings]
            fs0 = "/srv/esp"

            [variables]
            path = "fs0:\\efi\\tools;."

            [aliases]
            ll = "type -b"
            "#,
        )
        .unwrap();

        assert_eq!(config.shell.max_nesting_depth, 8);
        assert!(!config.shell.echo);
        assert_eq!(config.shell.script_extension, "nsh");
        assert_eq!(config.mappings["fs0"], PathBuf::from("/srv/esp"));
        assert_eq!(config.variables["path"], "fs0:\\efi\\tools;.");
        assert_eq!(config.aliases["ll"], "type -b");
        assert_eq!(
            config.variables_file,
            Some(PathBuf::from("/var/lib/shell/vars.toml"))
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            ShellConfig::from_toml_str("[shell]\nmax_depth = 3\n"),
            Err(ShellError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_script_extension_is_case_insensitive() {
        let config = ShellConfig::default();
        assert!(config.is_script_name(Path::new("/x/Startup.NSH")));
        assert!(!config.is_script_name(Path::new("/x/tool.efi")));
    }
}
