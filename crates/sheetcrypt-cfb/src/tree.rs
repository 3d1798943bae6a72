//! Red-black sibling trees.
//!
//! Every storage keeps its children in a red-black binary search tree threaded through the
//! directory records' left/right links. The tree here lives in an index arena; the writer maps
//! arena positions to directory indices afterwards.

use std::cmp::Ordering;

use crate::directory::Color;

/// Directory name collation.
///
/// Shorter names (in UTF-16 code units) sort first; equal-length names compare by their uppercase
/// forms, with the raw names as the final tie-break.
///
/// This is the MS-CFB order, not a plain case-insensitive sort: `"Zz"` precedes `"aaa"`. Readers
/// such as the `cfb` crate search sibling trees with it, so a tree sorted any other way hides
/// entries from them.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.encode_utf16()
        .count()
        .cmp(&b.encode_utf16().count())
        .then_with(|| a.to_uppercase().cmp(&b.to_uppercase()))
        .then_with(|| a.cmp(b))
}

/// Links for one element of a [`SiblingTree`], as indices into the input slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingLinks {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingTree {
    pub root: Option<usize>,
    pub links: Vec<SiblingLinks>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    color: Color,
}

struct Arena<'a, S> {
    names: &'a [S],
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl<'a, S: AsRef<str>> Arena<'a, S> {
    fn new(names: &'a [S]) -> Self {
        let nodes = vec![
            Node {
                parent: None,
                left: None,
                right: None,
                color: Color::Red,
            };
            names.len()
        ];
        Self {
            names,
            nodes,
            root: None,
        }
    }

    fn is_red(&self, node: Option<usize>) -> bool {
        node.is_some_and(|idx| self.nodes[idx].color == Color::Red)
    }

    fn insert(&mut self, id: usize) {
        let mut parent = None;
        let mut cursor = self.root;
        let mut goes_left = false;
        while let Some(current) = cursor {
            parent = Some(current);
            goes_left = compare_names(self.names[id].as_ref(), self.names[current].as_ref())
                == Ordering::Less;
            cursor = if goes_left {
                self.nodes[current].left
            } else {
                self.nodes[current].right
            };
        }

        self.nodes[id].parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) if goes_left => self.nodes[p].left = Some(id),
            Some(p) => self.nodes[p].right = Some(id),
        }
        self.fix_insert(id);
    }

    fn fix_insert(&mut self, mut node: usize) {
        while let Some(parent) = self.nodes[node].parent {
            if self.nodes[parent].color != Color::Red {
                break;
            }
            // A red parent is never the root, so the grandparent exists.
            let Some(grandparent) = self.nodes[parent].parent else {
                break;
            };

            let parent_is_left = self.nodes[grandparent].left == Some(parent);
            let uncle = if parent_is_left {
                self.nodes[grandparent].right
            } else {
                self.nodes[grandparent].left
            };

            if self.is_red(uncle) {
                self.nodes[parent].color = Color::Black;
                if let Some(uncle) = uncle {
                    self.nodes[uncle].color = Color::Black;
                }
                self.nodes[grandparent].color = Color::Red;
                node = grandparent;
                continue;
            }

            let mut pivot = parent;
            if parent_is_left && self.nodes[parent].right == Some(node) {
                self.rotate_left(parent);
                pivot = node;
            } else if !parent_is_left && self.nodes[parent].left == Some(node) {
                self.rotate_right(parent);
                pivot = node;
            }

            self.nodes[pivot].color = Color::Black;
            self.nodes[grandparent].color = Color::Red;
            if parent_is_left {
                self.rotate_right(grandparent);
            } else {
                self.rotate_left(grandparent);
            }
            break;
        }

        if let Some(root) = self.root {
            self.nodes[root].color = Color::Black;
        }
    }

    fn replace_child(&mut self, parent: Option<usize>, old: usize, new: usize) {
        match parent {
            None => self.root = Some(new),
            Some(p) if self.nodes[p].left == Some(old) => self.nodes[p].left = Some(new),
            Some(p) => self.nodes[p].right = Some(new),
        }
    }

    fn rotate_left(&mut self, x: usize) {
        let Some(y) = self.nodes[x].right else {
            return;
        };
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if let Some(inner) = y_left {
            self.nodes[inner].parent = Some(x);
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        self.replace_child(x_parent, x, y);
        self.nodes[y].left = Some(x);
        self.nodes[x].parent = Some(y);
    }

    fn rotate_right(&mut self, x: usize) {
        let Some(y) = self.nodes[x].left else {
            return;
        };
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if let Some(inner) = y_right {
            self.nodes[inner].parent = Some(x);
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        self.replace_child(x_parent, x, y);
        self.nodes[y].right = Some(x);
        self.nodes[x].parent = Some(y);
    }
}

/// Arrange `names` into a red-black tree ordered by [`compare_names`].
///
/// Names are inserted in collation order; the returned links index into `names`.
pub fn balance<S: AsRef<str>>(names: &[S]) -> SiblingTree {
    let mut order: Vec<usize> = (0..names.len()).collect();
    order.sort_by(|&a, &b| compare_names(names[a].as_ref(), names[b].as_ref()));

    let mut arena = Arena::new(names);
    for id in order {
        arena.insert(id);
    }

    SiblingTree {
        root: arena.root,
        links: arena
            .nodes
            .iter()
            .map(|node| SiblingLinks {
                left: node.left,
                right: node.right,
                color: node.color,
            })
            .collect(),
    }
}

/// One entry of a hand-specified directory tree. Paths are relative to the root entry (`""`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedNode {
    pub(crate) path: &'static str,
    pub(crate) color: Color,
    pub(crate) left: Option<&'static str>,
    pub(crate) right: Option<&'static str>,
    pub(crate) child: Option<&'static str>,
}

const fn fixed(
    path: &'static str,
    color: Color,
    left: Option<&'static str>,
    right: Option<&'static str>,
    child: Option<&'static str>,
) -> FixedNode {
    FixedNode {
        path,
        color,
        left,
        right,
        child,
    }
}

/// Directory shape Excel writes for a password-encrypted package. Readers in the wild expect this
/// exact arrangement for this stream set, so it is reproduced verbatim rather than balanced.
pub(crate) const ENCRYPTION_ENVELOPE: &[FixedNode] = &[
    fixed("", Color::Red, None, None, Some("EncryptionInfo")),
    fixed(
        "EncryptionInfo",
        Color::Black,
        Some("\u{6}DataSpaces"),
        Some("EncryptedPackage"),
        None,
    ),
    fixed("EncryptedPackage", Color::Red, None, None, None),
    fixed(
        "\u{6}DataSpaces",
        Color::Red,
        None,
        None,
        Some("\u{6}DataSpaces/DataSpaceMap"),
    ),
    fixed(
        "\u{6}DataSpaces/DataSpaceMap",
        Color::Black,
        Some("\u{6}DataSpaces/Version"),
        Some("\u{6}DataSpaces/DataSpaceInfo"),
        None,
    ),
    fixed("\u{6}DataSpaces/Version", Color::Black, None, None, None),
    fixed(
        "\u{6}DataSpaces/DataSpaceInfo",
        Color::Black,
        None,
        Some("\u{6}DataSpaces/TransformInfo"),
        Some("\u{6}DataSpaces/DataSpaceInfo/StrongEncryptionDataSpace"),
    ),
    fixed(
        "\u{6}DataSpaces/DataSpaceInfo/StrongEncryptionDataSpace",
        Color::Black,
        None,
        None,
        None,
    ),
    fixed(
        "\u{6}DataSpaces/TransformInfo",
        Color::Red,
        None,
        None,
        Some("\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform"),
    ),
    fixed(
        "\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform",
        Color::Black,
        None,
        None,
        Some("\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform/\u{6}Primary"),
    ),
    fixed(
        "\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform/\u{6}Primary",
        Color::Black,
        None,
        None,
        None,
    ),
];

/// Whether `paths` (including the root `""`) is exactly the encryption envelope's entry set.
pub(crate) fn is_encryption_envelope<'a>(paths: impl IntoIterator<Item = &'a str>) -> bool {
    let mut count = 0;
    for path in paths {
        if !ENCRYPTION_ENVELOPE.iter().any(|node| node.path == path) {
            return false;
        }
        count += 1;
    }
    count == ENCRYPTION_ENVELOPE.len()
}
