//! Structural validation and depth-first traversal of a macro tree.
//!
//! A `BlockPath` addresses one block inside the nested sequence tree: each
//! segment names the child slot of the parent block (`body`, `then`, `else`)
//! plus the index within that sequence. Root blocks live in the implicit
//! `body` slot of the macro itself.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use super::blocks::{Block, BlockKind, LoopMode, Macro};

/// Which child sequence of a container block a path segment descends into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Body,
    Then,
    Else,
}

impl Slot {
    fn as_str(self) -> &'static str {
        match self {
            Slot::Body => "body",
            Slot::Then => "then",
            Slot::Else => "else",
        }
    }
}

/// One step of a `BlockPath`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PathSeg {
    pub slot: Slot,
    pub index: usize,
}

/// Position of a block within the nested sequence tree.
///
/// Displays as e.g. `2`, `2.body.0`, or `1.then.3`; the root segment prints
/// its index only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BlockPath(Vec<PathSeg>);

impl BlockPath {
    /// The empty path addressing the macro root sequence itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Extend this path with one more segment.
    pub fn child(&self, slot: Slot, index: usize) -> Self {
        let mut segs = self.0.clone();
        segs.push(PathSeg { slot, index });
        Self(segs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSeg] {
        &self.0
    }

    pub fn segment(&self, i: usize) -> Option<&PathSeg> {
        self.0.get(i)
    }

    /// True when `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &BlockPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl fmt::Display for BlockPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(root)");
        }
        for (i, seg) in self.0.iter().enumerate() {
            if i == 0 {
                write!(f, "{}", seg.index)?;
            } else {
                write!(f, ".{}.{}", seg.slot.as_str(), seg.index)?;
            }
        }
        Ok(())
    }
}

/// A malformed-macro finding. These are surfaced before a run starts and are
/// never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("macro has no blocks")]
    EmptyMacro,

    #[error("duplicate block id `{id}` at {path}")]
    DuplicateId { id: String, path: BlockPath },

    #[error("loop at {path} has an empty body")]
    EmptyLoopBody { path: BlockPath },

    #[error("branch at {path} has an empty `then` sequence")]
    EmptyThenBranch { path: BlockPath },

    #[error("branch at {path} has an empty `else` sequence")]
    EmptyElseBranch { path: BlockPath },

    #[error("tolerance {value} at {path} is outside [0, 1]")]
    ToleranceOutOfRange { path: BlockPath, value: f64 },

    #[error("block at {path} references unknown image `{name}`")]
    UnknownImage { path: BlockPath, name: String },
}

/// Lazy depth-first traversal over every block of the macro, nested
/// sequences included (each listed once, in execution order).
pub fn walk(mac: &Macro) -> Walk<'_> {
    Walk {
        stack: vec![Frame {
            seq: &mac.blocks,
            base: BlockPath::root(),
            slot: Slot::Body,
            next: 0,
        }],
    }
}

struct Frame<'a> {
    seq: &'a [Block],
    base: BlockPath,
    slot: Slot,
    next: usize,
}

/// Iterator returned by [`walk`].
pub struct Walk<'a> {
    stack: Vec<Frame<'a>>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (BlockPath, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(block) = frame.seq.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            let path = frame.base.child(frame.slot, frame.next);
            frame.next += 1;

            // Push children so they are yielded before later siblings.
            match &block.kind {
                BlockKind::Loop { body, .. } => {
                    self.stack.push(Frame {
                        seq: body,
                        base: path.clone(),
                        slot: Slot::Body,
                        next: 0,
                    });
                }
                BlockKind::Branch {
                    then_blocks,
                    else_blocks,
                    ..
                } => {
                    self.stack.push(Frame {
                        seq: else_blocks,
                        base: path.clone(),
                        slot: Slot::Else,
                        next: 0,
                    });
                    self.stack.push(Frame {
                        seq: then_blocks,
                        base: path.clone(),
                        slot: Slot::Then,
                        next: 0,
                    });
                }
                _ => {}
            }

            return Some((path, block));
        }
    }
}

/// Check the structural invariants that hold independent of any resolved
/// resources: non-empty macro, unique ids, non-empty loop/branch bodies,
/// tolerances within [0, 1].
pub fn validate(mac: &Macro) -> Vec<StructuralError> {
    let mut errors = Vec::new();
    if mac.blocks.is_empty() {
        errors.push(StructuralError::EmptyMacro);
    }

    let mut seen = BTreeSet::new();
    for (path, block) in walk(mac) {
        if !seen.insert(block.id.clone()) {
            errors.push(StructuralError::DuplicateId {
                id: block.id.clone(),
                path: path.clone(),
            });
        }

        match &block.kind {
            BlockKind::Loop { body, mode } => {
                if body.is_empty() {
                    errors.push(StructuralError::EmptyLoopBody { path: path.clone() });
                }
                if let LoopMode::Until { tolerance, .. } = mode {
                    check_tolerance(*tolerance, &path, &mut errors);
                }
            }
            BlockKind::Branch {
                then_blocks,
                else_blocks,
                tolerance,
                ..
            } => {
                if then_blocks.is_empty() {
                    errors.push(StructuralError::EmptyThenBranch { path: path.clone() });
                }
                if else_blocks.is_empty() {
                    errors.push(StructuralError::EmptyElseBranch { path: path.clone() });
                }
                check_tolerance(*tolerance, &path, &mut errors);
            }
            BlockKind::ImageWait { tolerance, .. } => {
                check_tolerance(*tolerance, &path, &mut errors);
            }
            _ => {}
        }
    }

    errors
}

/// Full pre-run validation: everything [`validate`] checks plus dangling
/// image references against the set of resolved reference-image names.
pub fn validate_resolved(mac: &Macro, image_names: &BTreeSet<String>) -> Vec<StructuralError> {
    let mut errors = validate(mac);
    for (path, block) in walk(mac) {
        let image = match &block.kind {
            BlockKind::ImageWait { image, .. } | BlockKind::Branch { image, .. } => Some(image),
            BlockKind::Loop {
                mode: LoopMode::Until { image, .. },
                ..
            } => Some(image),
            _ => None,
        };
        if let Some(name) = image
            && !image_names.contains(name)
        {
            errors.push(StructuralError::UnknownImage {
                path,
                name: name.clone(),
            });
        }
    }
    errors
}

fn check_tolerance(value: f64, path: &BlockPath, errors: &mut Vec<StructuralError>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(StructuralError::ToleranceOutOfRange {
            path: path.clone(),
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::blocks::{LoopMode, TimeoutPolicy};

    fn delay(id: &str, ms: u64) -> Block {
        Block::new(id, BlockKind::Delay { ms })
    }

    fn sample_macro() -> Macro {
        Macro {
            name: "sample".into(),
            blocks: vec![
                delay("d0", 10),
                Block::new(
                    "l0",
                    BlockKind::Loop {
                        body: vec![delay("d1", 20), delay("d2", 30)],
                        mode: LoopMode::Count { times: 2 },
                    },
                ),
                Block::new(
                    "b0",
                    BlockKind::Branch {
                        image: "marker".into(),
                        region: None,
                        tolerance: 0.9,
                        then_blocks: vec![delay("d3", 1)],
                        else_blocks: vec![delay("d4", 1)],
                    },
                ),
            ],
            ..Macro::default()
        }
    }

    #[test]
    fn walk_is_depth_first_in_execution_order() {
        let mac = sample_macro();
        let order: Vec<(String, String)> = walk(&mac)
            .map(|(p, b)| (p.to_string(), b.id.clone()))
            .collect();
        let expected = [
            ("0", "d0"),
            ("1", "l0"),
            ("1.body.0", "d1"),
            ("1.body.1", "d2"),
            ("2", "b0"),
            ("2.then.0", "d3"),
            ("2.else.0", "d4"),
        ];
        assert_eq!(
            order,
            expected
                .iter()
                .map(|(p, i)| (p.to_string(), i.to_string()))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn walk_is_restartable() {
        let mac = sample_macro();
        let first: Vec<String> = walk(&mac).map(|(p, _)| p.to_string()).collect();
        let second: Vec<String> = walk(&mac).map(|(p, _)| p.to_string()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn valid_macro_passes() {
        let mac = sample_macro();
        assert!(validate(&mac).is_empty());
        let names = BTreeSet::from(["marker".to_string()]);
        assert!(validate_resolved(&mac, &names).is_empty());
    }

    #[test]
    fn empty_macro_is_flagged() {
        let mac = Macro::default();
        assert_eq!(validate(&mac), vec![StructuralError::EmptyMacro]);
    }

    #[test]
    fn duplicate_ids_are_flagged() {
        let mac = Macro {
            blocks: vec![delay("same", 1), delay("same", 2)],
            ..Macro::default()
        };
        let errors = validate(&mac);
        assert!(matches!(
            errors.as_slice(),
            [StructuralError::DuplicateId { id, .. }] if id == "same"
        ));
    }

    #[test]
    fn empty_bodies_are_flagged() {
        let mac = Macro {
            blocks: vec![Block::new(
                "l",
                BlockKind::Loop {
                    body: vec![],
                    mode: LoopMode::Forever,
                },
            )],
            ..Macro::default()
        };
        assert_eq!(
            validate(&mac),
            vec![StructuralError::EmptyLoopBody {
                path: BlockPath::root().child(Slot::Body, 0)
            }]
        );
    }

    #[test]
    fn dangling_image_reference_is_flagged() {
        let mac = Macro {
            blocks: vec![Block::new(
                "w",
                BlockKind::ImageWait {
                    image: "missing".into(),
                    region: None,
                    tolerance: 0.8,
                    timeout_ms: 1000,
                    on_timeout: TimeoutPolicy::Abort,
                    click_on_match: false,
                },
            )],
            ..Macro::default()
        };
        assert!(validate(&mac).is_empty());
        let errors = validate_resolved(&mac, &BTreeSet::new());
        assert!(matches!(
            errors.as_slice(),
            [StructuralError::UnknownImage { name, .. }] if name == "missing"
        ));
    }

    #[test]
    fn bad_tolerance_is_flagged() {
        let mac = Macro {
            blocks: vec![Block::new(
                "w",
                BlockKind::ImageWait {
                    image: "x".into(),
                    region: None,
                    tolerance: 1.5,
                    timeout_ms: 1000,
                    on_timeout: TimeoutPolicy::Abort,
                    click_on_match: false,
                },
            )],
            ..Macro::default()
        };
        assert!(matches!(
            validate(&mac).as_slice(),
            [StructuralError::ToleranceOutOfRange { value, .. }] if *value == 1.5
        ));
    }

    #[test]
    fn path_prefix_and_display() {
        let root = BlockPath::root();
        let p = root.child(Slot::Body, 1).child(Slot::Then, 0);
        assert_eq!(p.to_string(), "1.then.0");
        assert!(p.starts_with(&root.child(Slot::Body, 1)));
        assert!(!p.starts_with(&root.child(Slot::Body, 2)));
    }
}
