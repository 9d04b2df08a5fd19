use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

const SOCKET_PREFIX: &str = "pipelink-";
const SOCKET_SUFFIX: &str = ".sock";

/// A named pipe endpoint resolved to a socket path.
///
/// Bare names (`"chat"`) live in the per-user runtime directory
/// (`$XDG_RUNTIME_DIR`, falling back to the temp dir). Names containing a `/`
/// are taken as explicit filesystem paths.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    path: PathBuf,
}

impl Endpoint {
    /// Resolve a pipe name.
    pub fn from_name(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        let path = if name.contains('/') {
            PathBuf::from(&name)
        } else {
            runtime_dir().join(format!("{SOCKET_PREFIX}{name}{SOCKET_SUFFIX}"))
        };

        Ok(Self { name, path })
    }

    /// Use an explicit socket path; the name is the path's display form.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
        }
    }

    /// The name this endpoint was created from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The socket path backing this endpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains('\0') {
        "name must not contain NUL bytes"
    } else if name.trim() != name {
        "name must not have leading or trailing whitespace"
    } else {
        return Ok(());
    };

    Err(TransportError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_maps_into_runtime_dir() {
        let endpoint = Endpoint::from_name("chat").unwrap();
        assert_eq!(endpoint.name(), "chat");
        assert_eq!(
            endpoint.path().file_name().unwrap().to_str().unwrap(),
            "pipelink-chat.sock"
        );
        assert_eq!(endpoint.path().parent().unwrap(), runtime_dir());
    }

    #[test]
    fn slash_name_is_used_as_path() {
        let endpoint = Endpoint::from_name("/tmp/some/place.sock").unwrap();
        assert_eq!(endpoint.path(), Path::new("/tmp/some/place.sock"));
    }

    #[test]
    fn rejects_empty_and_nul_names() {
        assert!(matches!(
            Endpoint::from_name(""),
            Err(TransportError::InvalidName { .. })
        ));
        assert!(matches!(
            Endpoint::from_name("a\0b"),
            Err(TransportError::InvalidName { .. })
        ));
        assert!(matches!(
            Endpoint::from_name(" padded "),
            Err(TransportError::InvalidName { .. })
        ));
    }

    #[test]
    fn from_path_keeps_path() {
        let endpoint = Endpoint::from_path("/tmp/x.sock");
        assert_eq!(endpoint.path(), Path::new("/tmp/x.sock"));
        assert_eq!(endpoint.to_string(), "/tmp/x.sock");
    }
}
