//! Node configuration loading.
//!
//! The node tree is YAML. Without `-f` the first existing file among
//! `~/.sshw`, `~/.sshw.yml`, `~/.sshw.yaml` and `~/.config/sshw/config.yaml`
//! is used. With `-f` the named file is layered over that default: nodes
//! with the same name replace default ones, two folders with the same name
//! merge their children, and nodes marked `merge-ignore` are skipped.

use std::path::{Path, PathBuf};

use sshw_core::{expand_node, Node};
use tracing::debug;

use crate::error::{CliError, Result};

/// Default config files, relative to the home directory, in search order.
pub const DEFAULT_CONFIG_FILES: [&str; 4] = [
    ".sshw",
    ".sshw.yml",
    ".sshw.yaml",
    ".config/sshw/config.yaml",
];

/// A loaded and expanded node tree.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Files the tree was read from, base first.
    pub sources: Vec<PathBuf>,
    pub nodes: Vec<Node>,
}

/// Loads the node tree for the current user.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    load_from(explicit, dirs::home_dir().as_deref())
}

/// Like [`load`] with an explicit home directory.
pub fn load_from(explicit: Option<&Path>, home: Option<&Path>) -> Result<LoadedConfig> {
    let default_path = home.and_then(find_default);
    let mut sources = Vec::new();
    let mut nodes = Vec::new();

    if let Some(path) = &default_path {
        nodes = read_nodes(path)?;
        sources.push(path.clone());
    }

    if let Some(path) = explicit {
        let path = abs_path(&path.to_string_lossy(), home);
        let overlay = read_nodes(&path)?;
        merge_nodes(&mut nodes, overlay);
        sources.push(path);
    }

    if sources.is_empty() {
        let tried = match home {
            Some(home) => DEFAULT_CONFIG_FILES
                .iter()
                .map(|name| home.join(name).display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            None => "no home directory".to_string(),
        };
        return Err(CliError::ConfigNotFound(tried));
    }

    for node in &mut nodes {
        expand_node(node);
    }
    debug!(sources = ?sources, nodes = nodes.len(), "Loaded node config");
    Ok(LoadedConfig { sources, nodes })
}

fn find_default(home: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| home.join(name))
        .find(|path| path.is_file())
}

fn read_nodes(path: &Path) -> Result<Vec<Node>> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_nodes(&text).map_err(|source| CliError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a YAML node list. An empty document is an empty list.
pub fn parse_nodes(text: &str) -> std::result::Result<Vec<Node>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str::<Option<Vec<Node>>>(text)?.unwrap_or_default())
}

/// Layers `overlay` over `base`, matching nodes by name.
pub fn merge_nodes(base: &mut Vec<Node>, overlay: Vec<Node>) {
    let mut appended = Vec::new();
    for node in overlay {
        if node.merge_ignore {
            continue;
        }
        match base.iter_mut().find(|existing| existing.name == node.name) {
            Some(existing) if existing.is_folder() && node.is_folder() => {
                merge_nodes(&mut existing.children, node.children);
            }
            Some(existing) => *existing = node,
            None => appended.push(node),
        }
    }
    base.extend(appended);
}

/// Resolves a local path the way a shell user means it: `~` is the home
/// directory and relative paths are taken from the current directory.
///
/// The master daemon runs with a different working directory, so local
/// copy paths are made absolute before a node is sent to it.
pub fn abs_path(input: &str, home: Option<&Path>) -> PathBuf {
    if input.is_empty() {
        return PathBuf::new();
    }
    let path = match (input.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(input),
    };
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Files touched by [`merge_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub target: PathBuf,
    pub backup: PathBuf,
}

/// Merges `overlay` into the current user's config file.
pub fn merge(explicit: Option<&Path>, overlay: &Path) -> Result<MergeReport> {
    merge_file(explicit, overlay, dirs::home_dir().as_deref())
}

/// Merges the nodes of `overlay` into the config file and rewrites it.
///
/// The file is `explicit` when given, otherwise the default config. Nodes
/// are written back unexpanded. The previous content is kept next to the
/// file with a `.bak` suffix.
pub fn merge_file(
    explicit: Option<&Path>,
    overlay: &Path,
    home: Option<&Path>,
) -> Result<MergeReport> {
    let target = match explicit {
        Some(path) => abs_path(&path.to_string_lossy(), home),
        None => home
            .and_then(find_default)
            .ok_or_else(|| CliError::ConfigNotFound(DEFAULT_CONFIG_FILES.join(", ")))?,
    };
    let overlay = abs_path(&overlay.to_string_lossy(), home);

    let mut nodes = read_nodes(&target)?;
    merge_nodes(&mut nodes, read_nodes(&overlay)?);
    let merged = serde_yaml::to_string(&nodes).map_err(CliError::ConfigSerialize)?;

    let mut backup_name = target.file_name().unwrap_or_default().to_os_string();
    backup_name.push(".bak");
    let backup = target.with_file_name(backup_name);
    std::fs::copy(&target, &backup).map_err(|source| CliError::ConfigWrite {
        path: backup.clone(),
        source,
    })?;
    std::fs::write(&target, merged).map_err(|source| CliError::ConfigWrite {
        path: target.clone(),
        source,
    })?;

    debug!(target = %target.display(), overlay = %overlay.display(), "Merged config");
    Ok(MergeReport { target, backup })
}

/// Rewrites the local side of every copy job of `node` to an absolute path.
pub fn absolutize_copies(node: &mut Node, home: Option<&Path>) {
    for cp in &mut node.scps {
        let local = if cp.is_receive { &mut cp.tgt } else { &mut cp.src };
        *local = abs_path(local, home).to_string_lossy().into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshw_core::NodeCp;

    const SAMPLE: &str = r#"
- name: prod
  children:
    - name: web
      host: web.example.com
      user: deploy
      port: 2222
    - name: db
      alias: pg
      host: db.example.com
      keypath: ~/.ssh/db
      control-master: false
- name: bastioned
  host: 10.0.0.5
  jump:
    - host: bastion.example.com
      user: jump
  scps:
    - src: ./build.tar
      tgt: /tmp/
      timeout: 30
"#;

    #[test]
    fn test_parse_sample() {
        let nodes = parse_nodes(SAMPLE).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].is_folder());

        let db = &nodes[0].children[1];
        assert_eq!(db.label(), "pg");
        assert_eq!(db.key_path, "~/.ssh/db");
        assert!(!db.control_master());

        let web = &nodes[0].children[0];
        assert_eq!(web.identity(), "deploy@web.example.com:2222");

        let bastioned = &nodes[1];
        assert_eq!(bastioned.jump[0].host, "bastion.example.com");
        assert_eq!(bastioned.scps[0].timeout, 30);
        assert!(!bastioned.scps[0].is_receive);
    }

    #[test]
    fn test_empty_document_is_empty_list() {
        assert!(parse_nodes("").unwrap().is_empty());
        assert!(parse_nodes("\n# nothing yet\n").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_shape_is_error() {
        assert!(parse_nodes("name: not-a-list").is_err());
    }

    #[test]
    fn test_first_default_file_wins() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".sshw.yml"), "- name: yml\n  host: a\n").unwrap();
        std::fs::create_dir_all(home.path().join(".config/sshw")).unwrap();
        std::fs::write(
            home.path().join(".config/sshw/config.yaml"),
            "- name: xdg\n  host: b\n",
        )
        .unwrap();

        let loaded = load_from(None, Some(home.path())).unwrap();
        assert_eq!(loaded.sources, vec![home.path().join(".sshw.yml")]);
        assert_eq!(loaded.nodes[0].name, "yml");
    }

    #[test]
    fn test_merge_file_rewrites_default_and_keeps_backup() {
        let home = tempfile::tempdir().unwrap();
        let original = "- name: prod\n  children:\n    - name: web\n      host: ${WEB}\n";
        std::fs::write(home.path().join(".sshw"), original).unwrap();
        let extra = home.path().join("extra.yaml");
        std::fs::write(
            &extra,
            "- name: prod\n  children:\n    - name: api\n      host: api\n\
             - name: skip\n  merge-ignore: true\n",
        )
        .unwrap();

        let report = merge_file(None, &extra, Some(home.path())).unwrap();
        assert_eq!(report.target, home.path().join(".sshw"));
        assert_eq!(report.backup, home.path().join(".sshw.bak"));
        assert_eq!(std::fs::read_to_string(&report.backup).unwrap(), original);

        let merged = parse_nodes(&std::fs::read_to_string(&report.target).unwrap()).unwrap();
        assert_eq!(merged.len(), 1);
        let children: Vec<_> = merged[0].children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(children, ["web", "api"]);
        assert_eq!(merged[0].children[0].host, "${WEB}");
    }

    #[test]
    fn test_merge_file_prefers_explicit_target() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".sshw"), "- name: untouched\n").unwrap();
        let target = home.path().join("team.yml");
        std::fs::write(&target, "- name: a\n  host: old\n").unwrap();
        let extra = home.path().join("extra.yml");
        std::fs::write(&extra, "- name: a\n  host: new\n").unwrap();

        let report = merge_file(Some(&target), &extra, Some(home.path())).unwrap();
        assert_eq!(report.target, target);

        let merged = parse_nodes(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(merged[0].host, "new");
        assert_eq!(
            std::fs::read_to_string(home.path().join(".sshw")).unwrap(),
            "- name: untouched\n"
        );
    }

    #[test]
    fn test_merge_file_missing_overlay_leaves_target_alone() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".sshw"), "- name: a\n").unwrap();

        let missing = home.path().join("nope.yml");
        let err = merge_file(None, &missing, Some(home.path())).unwrap_err();
        assert!(matches!(err, CliError::ConfigRead { .. }));
        assert!(!home.path().join(".sshw.bak").exists());
    }

    #[test]
    fn test_missing_config_lists_candidates() {
        let home = tempfile::tempdir().unwrap();
        let err = load_from(None, Some(home.path())).unwrap_err();
        assert!(matches!(err, CliError::ConfigNotFound(_)));
        assert!(err.to_string().contains(".sshw.yaml"));
    }

    #[test]
    fn test_explicit_file_layers_over_default() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join(".sshw"),
            "- name: prod\n  children:\n    - name: web\n      host: old\n\
             - name: keep\n  host: k\n",
        )
        .unwrap();
        let extra = home.path().join("extra.yaml");
        std::fs::write(
            &extra,
            "- name: prod\n  children:\n    - name: web\n      host: new\n\
             \x20   - name: api\n      host: api\n\
             - name: skip\n  host: s\n  merge-ignore: true\n",
        )
        .unwrap();

        let loaded = load_from(Some(&extra), Some(home.path())).unwrap();
        assert_eq!(loaded.sources.len(), 2);

        let names: Vec<_> = loaded.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["prod", "keep"]);
        let prod = &loaded.nodes[0].children;
        assert_eq!(prod[0].host, "new");
        assert_eq!(prod[1].name, "api");
    }

    #[test]
    fn test_loading_expands_variables() {
        let home = tempfile::tempdir().unwrap();
        let path = home.path().join("nodes.yaml");
        std::fs::write(&path, "- name: e\n  host: ${SSHW_TEST_CONFIG_HOST}.internal\n").unwrap();
        std::env::set_var("SSHW_TEST_CONFIG_HOST", "build");

        let loaded = load_from(Some(&path), Some(home.path())).unwrap();
        assert_eq!(loaded.nodes[0].host, "build.internal");
    }

    #[test]
    fn test_abs_path() {
        let home = Path::new("/home/u");
        assert_eq!(abs_path("~/x/y", Some(home)), PathBuf::from("/home/u/x/y"));
        assert_eq!(abs_path("/etc/hosts", Some(home)), PathBuf::from("/etc/hosts"));
        assert_eq!(abs_path("", Some(home)), PathBuf::new());

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(abs_path("rel/file", Some(home)), cwd.join("rel/file"));
    }

    #[test]
    fn test_absolutize_only_local_side() {
        let mut node = Node::new("h", "u");
        node.scps = vec![
            NodeCp {
                src: "~/up.txt".to_string(),
                tgt: "remote/up.txt".to_string(),
                ..Default::default()
            },
            NodeCp {
                src: "remote/down.txt".to_string(),
                tgt: "~/down.txt".to_string(),
                is_receive: true,
                ..Default::default()
            },
        ];
        absolutize_copies(&mut node, Some(Path::new("/home/u")));

        assert_eq!(node.scps[0].src, "/home/u/up.txt");
        assert_eq!(node.scps[0].tgt, "remote/up.txt");
        assert_eq!(node.scps[1].src, "remote/down.txt");
        assert_eq!(node.scps[1].tgt, "/home/u/down.txt");
    }
}
