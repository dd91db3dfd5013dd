use std::collections::HashMap;

use serde::Serialize;

use crate::models::Comment;

/// A comment with its direct replies, newest first.
///
/// Not serializable: nested output would recurse once per level. Use
/// [`flatten_forest`] to put a forest on the wire.
#[derive(Debug)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

// Unlinks descendants onto a heap stack so a long reply chain is freed
// without one stack frame per level.
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

/// One comment of a thread in display order, with its nesting depth and the
/// ids of its direct replies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadedComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub depth: usize,
    pub reply_ids: Vec<String>,
}

impl CommentNode {
    /// Number of comments in this subtree, including this one.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.replies.iter());
        }
        count
    }
}

/// Builds the reply forest for a flat list of comments.
///
/// A comment becomes a root when its parent is unset, unknown, or itself.
/// Comments caught in a parent cycle are promoted to roots as well, so every
/// input comment appears exactly once. Works iteratively for any depth.
pub fn build_tree(comments: &[Comment]) -> Vec<CommentNode> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(comments.len());
    for (i, comment) in comments.iter().enumerate() {
        index.entry(comment.id.as_str()).or_insert(i);
    }

    let mut parent: Vec<Option<usize>> = comments
        .iter()
        .enumerate()
        .map(|(i, comment)| {
            comment
                .parent_id
                .as_deref()
                .and_then(|id| index.get(id).copied())
                .filter(|&p| p != i)
        })
        .collect();

    promote_cycles(&mut parent);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    let mut roots = Vec::new();
    for (i, p) in parent.iter().enumerate() {
        match p {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let newest_first = |a: &usize, b: &usize| comments[*b].created_at.cmp(&comments[*a].created_at);
    roots.sort_by(newest_first);
    for list in &mut children {
        list.sort_by(newest_first);
    }

    // Post-order so every node's replies are built before the node itself.
    let mut order = Vec::with_capacity(comments.len());
    let mut stack: Vec<(usize, bool)> = roots.iter().rev().map(|&r| (r, false)).collect();
    while let Some((i, expanded)) = stack.pop() {
        if expanded {
            order.push(i);
        } else {
            stack.push((i, true));
            stack.extend(children[i].iter().map(|&c| (c, false)));
        }
    }

    let mut built: Vec<Option<CommentNode>> = (0..comments.len()).map(|_| None).collect();
    for i in order {
        let replies = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        built[i] = Some(CommentNode {
            comment: comments[i].clone(),
            replies,
        });
    }

    roots.into_iter().filter_map(|r| built[r].take()).collect()
}

/// Lists a forest depth-first: every comment is followed by its replies, and
/// siblings keep their newest-first order. Roots have depth 0.
pub fn flatten_forest(forest: &[CommentNode]) -> Vec<ThreadedComment> {
    let mut entries = Vec::new();
    let mut stack: Vec<(&CommentNode, usize)> = forest.iter().rev().map(|n| (n, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        entries.push(ThreadedComment {
            comment: node.comment.clone(),
            depth,
            reply_ids: node.replies.iter().map(|r| r.comment.id.clone()).collect(),
        });
        stack.extend(node.replies.iter().rev().map(|r| (r, depth + 1)));
    }
    entries
}

// Detaches every member of a parent cycle, since no root can reach them.
fn promote_cycles(parent: &mut [Option<usize>]) {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNSEEN; parent.len()];
    for start in 0..parent.len() {
        let mut path = Vec::new();
        let mut current = Some(start);

        while let Some(i) = current {
            match state[i] {
                DONE => break,
                ON_PATH => {
                    let cycle_start = path.iter().position(|&n| n == i).unwrap_or(0);
                    for &member in &path[cycle_start..] {
                        parent[member] = None;
                    }
                    break;
                }
                _ => {
                    state[i] = ON_PATH;
                    path.push(i);
                    current = parent[i];
                }
            }
        }

        for i in path {
            state[i] = DONE;
        }
    }
}
