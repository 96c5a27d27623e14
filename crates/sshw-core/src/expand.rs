//! `${VAR}` substitution for node string fields.

use crate::node::Node;

/// Replaces `${NAME}` and `$NAME` with `lookup(NAME)`.
///
/// Unknown names expand to the empty string. `$$` yields a literal `$`, and
/// a `$` not followed by a name is kept as is.
pub fn expand<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some((_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some((start, '{')) => {
                chars.next();
                let name_start = start + 1;
                let mut end = None;
                for (i, ch) in chars.by_ref() {
                    if ch == '}' {
                        end = Some(i);
                        break;
                    }
                }
                match end {
                    Some(end) => {
                        let name = input.get(name_start..end).unwrap_or_default();
                        out.push_str(&lookup(name).unwrap_or_default());
                    }
                    // Unterminated brace: keep the text verbatim.
                    None => out.push_str(input.get(start - 1..).unwrap_or_default()),
                }
            }
            Some((start, ch)) if is_name_char(ch) => {
                let mut end = input.len();
                while let Some(&(i, ch)) = chars.peek() {
                    if !is_name_char(ch) {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                let name = input.get(start..end).unwrap_or_default();
                out.push_str(&lookup(name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expands the templated fields of a node in place using the process environment.
///
/// `user` keeps a bare `$USER` so that [`Node::user`] can resolve it lazily.
pub fn expand_node(node: &mut Node) {
    expand_node_with(node, &|name| std::env::var(name).ok());
}

/// Like [`expand_node`] with an explicit lookup, recursing into children and jumps.
pub fn expand_node_with(node: &mut Node, lookup: &dyn Fn(&str) -> Option<String>) {
    let apply = |s: &mut String| *s = expand(s, lookup);

    apply(&mut node.host);
    if node.user != "$USER" {
        apply(&mut node.user);
    }
    apply(&mut node.password);
    apply(&mut node.passphrase);
    apply(&mut node.key_path);
    for cp in &mut node.scps {
        apply(&mut cp.src);
        apply(&mut cp.tgt);
    }
    for shell in &mut node.callback_shells {
        apply(&mut shell.cmd);
    }
    for interaction in &mut node.keyboard_interactions {
        apply(&mut interaction.answer);
    }
    for child in &mut node.children {
        expand_node_with(child, lookup);
    }
    for hop in &mut node.jump {
        expand_node_with(hop, lookup);
    }
}
