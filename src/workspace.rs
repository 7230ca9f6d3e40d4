//! Workspace folders and file-URI resolution.
//!
//! The store keys annotations by a workspace identifier plus a path
//! relative to that workspace. The identifier is the folder URI by
//! default; a `pcc.config.json` in the folder (or a client-supplied folder
//! name) replaces it with a symbolic name, which keeps annotations
//! portable across machines.

use serde::Deserialize;
use url::Url;

/// Marker file consulted for the symbolic workspace name.
pub const CONFIG_FILENAME: &str = "pcc.config.json";

/// A workspace folder as announced by the client in `initialize`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkspaceFolder {
    pub uri: String,
    /// Symbolic name; preferred over the URI as the store key when
    /// non-empty.
    #[serde(default)]
    pub name: String,
}

/// Shape of [`CONFIG_FILENAME`].
#[derive(Debug, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub workspace_name: String,
}

/// A URI that is not a `file:` URI where one was required.
#[derive(Debug, thiserror::Error)]
#[error("no `file` scheme in URI: {uri}")]
pub struct NotAFileUri {
    uri: String,
}

/// Find the workspace a file belongs to.
///
/// Returns the workspace key (resolved name when present, folder URI
/// otherwise) and the file path relative to the folder. The folder with
/// the longest matching URI prefix wins; with no match both components are
/// empty, which downstream read APIs reject.
pub fn find_workspace(
    folders: &[WorkspaceFolder],
    file_uri: &str,
) -> Result<(String, String), NotAFileUri> {
    if !file_uri.starts_with("file://") {
        return Err(NotAFileUri {
            uri: file_uri.to_string(),
        });
    }
    let mut key = String::new();
    let mut rpath = String::new();
    let mut matched_len = 0;
    for folder in folders {
        if let Some(rel) = file_uri.strip_prefix(&folder.uri)
            && folder.uri.len() > matched_len
        {
            matched_len = folder.uri.len();
            rpath = rel.to_string();
            key = if folder.name.is_empty() {
                folder.uri.clone()
            } else {
                folder.name.clone()
            };
        }
    }
    Ok((key, rpath))
}

/// Union `incoming` into `folders`, deduplicating by URI.
pub fn merge_folders(folders: &mut Vec<WorkspaceFolder>, incoming: Vec<WorkspaceFolder>) {
    for folder in incoming {
        if !folders.iter().any(|f| f.uri == folder.uri) {
            folders.push(folder);
        }
    }
}

/// Resolve symbolic workspace names from each folder's config file.
///
/// Folders without a readable config keep their current name; parse and
/// I/O problems are logged and skipped, matching the best-effort contract
/// of `initialize`.
pub fn resolve_names(folders: &mut [WorkspaceFolder]) {
    for folder in folders {
        let Some(dir) = Url::parse(&folder.uri)
            .ok()
            .and_then(|url| url.to_file_path().ok())
        else {
            continue;
        };
        let config_path = dir.join(CONFIG_FILENAME);
        let raw = match std::fs::read_to_string(&config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %config_path.display(), "could not read workspace config: {e}");
                continue;
            }
        };
        match serde_json::from_str::<WorkspaceConfig>(&raw) {
            Ok(config) if !config.workspace_name.is_empty() => {
                tracing::debug!(
                    uri = %folder.uri,
                    name = %config.workspace_name,
                    "resolved workspace name"
                );
                folder.name = config.workspace_name;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %config_path.display(), "could not parse workspace config: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(uri: &str, name: &str) -> WorkspaceFolder {
        WorkspaceFolder {
            uri: uri.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn relative_path_is_rooted_in_folder() {
        let folders = vec![folder("file:///foobar", "")];
        let (ws, rpath) = find_workspace(&folders, "file:///foobar/file.txt").unwrap();
        assert_eq!(ws, "file:///foobar");
        assert_eq!(rpath, "/file.txt");

        let (_, rpath) = find_workspace(&folders, "file:///foobar/baz/file.txt").unwrap();
        assert_eq!(rpath, "/baz/file.txt");
    }

    #[test]
    fn name_preferred_over_uri() {
        let folders = vec![folder("file:///ws", "myproject")];
        let (ws, rpath) = find_workspace(&folders, "file:///ws/src/lib.rs").unwrap();
        assert_eq!(ws, "myproject");
        assert_eq!(rpath, "/src/lib.rs");
    }

    #[test]
    fn longest_prefix_wins() {
        let folders = vec![folder("file:///ws", "outer"), folder("file:///ws/sub", "inner")];
        let (ws, rpath) = find_workspace(&folders, "file:///ws/sub/file.txt").unwrap();
        assert_eq!(ws, "inner");
        assert_eq!(rpath, "/file.txt");
        // Order must not matter.
        let reversed: Vec<_> = folders.into_iter().rev().collect();
        let (ws, _) = find_workspace(&reversed, "file:///ws/sub/file.txt").unwrap();
        assert_eq!(ws, "inner");
    }

    #[test]
    fn no_match_yields_empty_key() {
        let folders = vec![folder("file:///ws", "ws")];
        let (ws, rpath) = find_workspace(&folders, "file:///elsewhere/f.txt").unwrap();
        assert_eq!(ws, "");
        assert_eq!(rpath, "");
    }

    #[test]
    fn non_file_scheme_rejected() {
        let folders = vec![folder("file:///ws", "ws")];
        assert!(find_workspace(&folders, "https://example.com/f.txt").is_err());
        assert!(find_workspace(&folders, "not-a-uri").is_err());
    }

    #[test]
    fn merge_dedups_by_uri() {
        let mut folders = vec![folder("file:///a", "a")];
        merge_folders(
            &mut folders,
            vec![folder("file:///a", "renamed"), folder("file:///b", "b")],
        );
        assert_eq!(
            folders,
            vec![folder("file:///a", "a"), folder("file:///b", "b")]
        );
    }

    #[test]
    fn resolve_names_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            r#"{ "workspace_name": "shared-name" }"#,
        )
        .unwrap();
        let uri = Url::from_file_path(dir.path()).unwrap().to_string();

        let mut folders = vec![WorkspaceFolder {
            uri,
            name: String::new(),
        }];
        resolve_names(&mut folders);
        assert_eq!(folders[0].name, "shared-name");
    }

    #[test]
    fn resolve_names_skips_missing_and_broken_configs() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::from_file_path(dir.path()).unwrap().to_string();
        let mut folders = vec![WorkspaceFolder {
            uri: uri.clone(),
            name: "kept".to_string(),
        }];
        resolve_names(&mut folders);
        assert_eq!(folders[0].name, "kept");

        std::fs::write(dir.path().join(CONFIG_FILENAME), "not json").unwrap();
        let mut folders = vec![WorkspaceFolder {
            uri,
            name: "kept".to_string(),
        }];
        resolve_names(&mut folders);
        assert_eq!(folders[0].name, "kept");
    }

    #[test]
    fn empty_config_name_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), r#"{}"#).unwrap();
        let uri = Url::from_file_path(dir.path()).unwrap().to_string();
        let mut folders = vec![WorkspaceFolder {
            uri,
            name: "client-name".to_string(),
        }];
        resolve_names(&mut folders);
        assert_eq!(folders[0].name, "client-name");
    }
}
