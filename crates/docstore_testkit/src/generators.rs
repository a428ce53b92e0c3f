//! Property-based test generators using proptest.
//!
//! Provides strategies for random node trees and random edits of a built
//! tree. Trees are described by [`NodeSpec`] values and materialized with
//! [`build_tree`], which assigns unique aliases.

use std::collections::BTreeMap;

use docstore_core::{DocStoreSession, NodeId, NodeKind};
use proptest::prelude::*;

/// Translated fields of a generated node.
#[derive(Debug, Clone)]
pub struct TranslationSpec {
    /// Language code.
    pub lang: String,
    /// Translated title.
    pub title: String,
    /// Translated content, applied to content nodes only.
    pub content: Option<Vec<u8>>,
}

/// Description of a node and its subtree.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Node kind; only groups have children.
    pub kind: NodeKind,
    /// Whether the node gets a generated alias.
    pub alias: bool,
    /// Original title.
    pub title: Option<String>,
    /// Original attributes.
    pub attributes: BTreeMap<String, String>,
    /// Original content of a content node.
    pub content: Option<Vec<u8>>,
    /// Optional translation.
    pub translation: Option<TranslationSpec>,
    /// Children of a group.
    pub children: Vec<NodeSpec>,
}

/// Strategy for short titles and attribute values.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,15}").expect("Invalid regex")
}

/// Strategy for language codes.
pub fn language_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("de".to_string()), Just("fr".to_string()), Just("ja".to_string())]
}

/// Strategy for content bytes, empty included.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

fn attributes_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        text_strategy(),
        0..3,
    )
}

fn translation_strategy() -> impl Strategy<Value = Option<TranslationSpec>> {
    prop::option::of(
        (language_strategy(), text_strategy(), prop::option::of(content_strategy())).prop_map(
            |(lang, title, content)| TranslationSpec {
                lang,
                title,
                content,
            },
        ),
    )
}

/// Strategy for a content node without children.
pub fn content_node_strategy() -> impl Strategy<Value = NodeSpec> {
    (
        prop_oneof![
            Just(NodeKind::XmlDoc),
            Just(NodeKind::Image),
            Just(NodeKind::File)
        ],
        any::<bool>(),
        prop::option::of(text_strategy()),
        attributes_strategy(),
        prop::option::of(content_strategy()),
        translation_strategy(),
    )
        .prop_map(|(kind, alias, title, attributes, content, translation)| NodeSpec {
            kind,
            alias,
            title,
            attributes,
            content,
            translation,
            children: Vec::new(),
        })
}

/// Strategy for a node and its subtree, at most `depth` group levels deep.
pub fn node_spec_strategy(depth: u32) -> impl Strategy<Value = NodeSpec> {
    content_node_strategy().prop_recursive(depth, 32, 4, |inner| {
        (
            any::<bool>(),
            prop::option::of(text_strategy()),
            attributes_strategy(),
            translation_strategy(),
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(alias, title, attributes, translation, children)| NodeSpec {
                kind: NodeKind::Group,
                alias,
                title,
                attributes,
                content: None,
                translation,
                children,
            })
    })
}

/// Strategy for the children of a version root.
pub fn tree_strategy() -> impl Strategy<Value = Vec<NodeSpec>> {
    prop::collection::vec(node_spec_strategy(3), 0..5)
}

/// Creates `specs` below `parent` and returns the number of created nodes.
///
/// Aliases are `n1`, `n2`, ... in creation order, so building the same
/// specs twice yields the same aliases.
pub fn build_tree(session: &mut dyn DocStoreSession, parent: &NodeId, specs: &[NodeSpec]) -> usize {
    let mut next_alias = 0;
    build_level(session, parent, specs, &mut next_alias)
}

fn build_level(
    session: &mut dyn DocStoreSession,
    parent: &NodeId,
    specs: &[NodeSpec],
    next_alias: &mut usize,
) -> usize {
    let mut count = 0;
    for spec in specs {
        let id = session
            .create_node(spec.kind, None)
            .expect("Failed to create node");
        session
            .append_child(parent, &id)
            .expect("Failed to append node");
        if spec.alias {
            *next_alias += 1;
            session
                .set_aliases(&id, &[format!("n{next_alias}")])
                .expect("Failed to set alias");
        }
        if let Some(title) = &spec.title {
            session
                .set_title(&id, Some(title), None)
                .expect("Failed to set title");
        }
        for (name, value) in &spec.attributes {
            session
                .set_attribute(&id, name, Some(value), None)
                .expect("Failed to set attribute");
        }
        if let (true, Some(content)) = (spec.kind.is_content(), &spec.content) {
            session
                .set_content_bytes(&id, None, content)
                .expect("Failed to set content");
        }
        if let Some(t) = &spec.translation {
            session
                .set_title(&id, Some(&t.title), Some(&t.lang))
                .expect("Failed to set translated title");
            if let (true, Some(content)) = (spec.kind.is_content(), &t.content) {
                session
                    .set_content_bytes(&id, Some(&t.lang), content)
                    .expect("Failed to set translated content");
            }
        }
        count += 1 + build_level(session, &id, &spec.children, next_alias);
    }
    count
}

/// A random change to a built tree.
///
/// Indexes select a node among the non-root nodes in pre-order, modulo
/// their count; edits on an empty tree do nothing.
#[derive(Debug, Clone)]
pub enum TreeEdit {
    /// Replaces the original title.
    Retitle(usize, String),
    /// Detaches the node, destroying its subtree.
    Remove(usize),
    /// Moves the node to the front of its parent group.
    MoveToFront(usize),
    /// Replaces the original content of a content node.
    Rewrite(usize, Vec<u8>),
}

/// Strategy for a single edit.
pub fn edit_strategy() -> impl Strategy<Value = TreeEdit> {
    prop_oneof![
        (any::<usize>(), text_strategy()).prop_map(|(i, t)| TreeEdit::Retitle(i, t)),
        any::<usize>().prop_map(TreeEdit::Remove),
        any::<usize>().prop_map(TreeEdit::MoveToFront),
        (any::<usize>(), content_strategy()).prop_map(|(i, c)| TreeEdit::Rewrite(i, c)),
    ]
}

/// Strategy for a short list of edits.
pub fn edits_strategy() -> impl Strategy<Value = Vec<TreeEdit>> {
    prop::collection::vec(edit_strategy(), 0..6)
}

/// Non-root nodes below `root` in pre-order.
pub fn descendants(session: &dyn DocStoreSession, root: &NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        if node != *root {
            out.push(node.clone());
        }
        if session.node_kind(&node).is_some_and(NodeKind::is_group) {
            let children = session.child_nodes(&node).expect("Failed to list children");
            stack.extend(children.into_iter().rev());
        }
    }
    out
}

/// Applies `edits` to the tree below `root`.
pub fn apply_edits(session: &mut dyn DocStoreSession, root: &NodeId, edits: &[TreeEdit]) {
    for edit in edits {
        let nodes = descendants(session, root);
        if nodes.is_empty() {
            return;
        }
        let pick = |i: usize| nodes[i % nodes.len()].clone();
        match edit {
            TreeEdit::Retitle(i, title) => {
                session
                    .set_title(&pick(*i), Some(title), None)
                    .expect("Failed to set title");
            }
            TreeEdit::Remove(i) => {
                let node = pick(*i);
                let parent = session.parent_group(&node).expect("Detached node");
                session
                    .remove_child(&parent, &node)
                    .expect("Failed to remove node");
            }
            TreeEdit::MoveToFront(i) => {
                let node = pick(*i);
                let parent = session.parent_group(&node).expect("Detached node");
                let first = session
                    .child_nodes(&parent)
                    .expect("Failed to list children")
                    .first()
                    .cloned();
                if first.as_ref() == Some(&node) {
                    continue;
                }
                session
                    .insert_before(&parent, &node, first.as_ref())
                    .expect("Failed to move node");
            }
            TreeEdit::Rewrite(i, bytes) => {
                let node = pick(*i);
                if session.node_kind(&node).is_some_and(NodeKind::is_content) {
                    session
                        .set_content_bytes(&node, None, bytes)
                        .expect("Failed to set content");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::{MemoryBackend, VersionId};

    proptest! {
        #[test]
        fn build_tree_counts_every_node(specs in tree_strategy()) {
            fn count(specs: &[NodeSpec]) -> usize {
                specs.iter().map(|s| 1 + count(&s.children)).sum()
            }
            let backend = MemoryBackend::default();
            let mut s = backend.session("gen");
            let v = VersionId::parse("1.0").unwrap();
            s.create_doc_store("gen", &[]).unwrap();
            s.create_version("gen", None, &v).unwrap();
            s.open_doc_store("gen", &v).unwrap();
            let root = s.root().unwrap();
            let created = build_tree(&mut s, &root, &specs);
            prop_assert_eq!(created, count(&specs));
            prop_assert_eq!(descendants(&s, &root).len(), created);
        }
    }
}
