//! Node tree listing printed by `sshw` when no name is given.

use sshw_core::{walk_nodes, Node};

fn is_group(node: &Node) -> bool {
    node.host.is_empty() && node.execs_pre.is_empty()
}

/// Renders the tree one node per line, indented by depth.
///
/// Groups end in `/`; every other node shows its login target, or
/// `local` when it only runs local commands.
pub fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    for (depth, node) in walk_nodes(nodes) {
        let indent = "  ".repeat(depth);
        if is_group(node) {
            out.push_str(&format!("{indent}{}/\n", node.label()));
            continue;
        }
        let target = if node.host.is_empty() {
            "local".to_string()
        } else {
            format!("{}@{}", node.user(), node.addr())
        };
        out.push_str(&format!("{indent}{}  {target}\n", node.label()));
    }
    out
}
