use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stable hash of a Runnable tree's shape: kind, name, and ordered
/// children. Closure bodies and model configs are never hashed, so a
/// resumed run can swap adapter settings without invalidating its
/// persisted runs, but renaming or reordering a composition invalidates
/// resume exactly as `4.6` of the data model requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The shape of a single Runnable node, recursively describing its
/// children. Mirrors the five members of the Runnable algebra.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnableShape {
    Agent {
        name: String,
    },
    Step {
        name: String,
    },
    Sequence {
        name: String,
        children: Vec<RunnableShape>,
    },
    Parallel {
        name: String,
        children: Vec<RunnableShape>,
    },
    Loop {
        name: String,
        child: Box<RunnableShape>,
    },
}

impl RunnableShape {
    /// Canonical bytes fed to the hasher: depth-first, tag-prefixed so
    /// "Step(a)" and "Agent(a)" never collide on the name alone.
    fn write_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            RunnableShape::Agent { name } => {
                buf.extend_from_slice(b"agent\0");
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
            }
            RunnableShape::Step { name } => {
                buf.extend_from_slice(b"step\0");
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
            }
            RunnableShape::Sequence { name, children } => {
                buf.extend_from_slice(b"sequence\0");
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                for child in children {
                    child.write_canonical(buf);
                }
                buf.extend_from_slice(b"/sequence\0");
            }
            RunnableShape::Parallel { name, children } => {
                buf.extend_from_slice(b"parallel\0");
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                for child in children {
                    child.write_canonical(buf);
                }
                buf.extend_from_slice(b"/parallel\0");
            }
            RunnableShape::Loop { name, child } => {
                buf.extend_from_slice(b"loop\0");
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                child.write_canonical(buf);
                buf.extend_from_slice(b"/loop\0");
            }
        }
    }
}

pub fn compute_fingerprint(shape: &RunnableShape) -> Fingerprint {
    let mut buf = Vec::new();
    shape.write_canonical(&mut buf);
    let digest = Sha256::digest(&buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Fingerprint(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shapes_fingerprint_equal() {
        let a = RunnableShape::Sequence {
            name: "root".into(),
            children: vec![RunnableShape::Agent { name: "writer".into() }],
        };
        let b = RunnableShape::Sequence {
            name: "root".into(),
            children: vec![RunnableShape::Agent { name: "writer".into() }],
        };
        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn renamed_child_changes_fingerprint() {
        let a = RunnableShape::Sequence {
            name: "root".into(),
            children: vec![RunnableShape::Agent { name: "writer".into() }],
        };
        let b = RunnableShape::Sequence {
            name: "root".into(),
            children: vec![RunnableShape::Agent { name: "editor".into() }],
        };
        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn reordered_children_changes_fingerprint() {
        let a = RunnableShape::Sequence {
            name: "root".into(),
            children: vec![
                RunnableShape::Step { name: "one".into() },
                RunnableShape::Step { name: "two".into() },
            ],
        };
        let b = RunnableShape::Sequence {
            name: "root".into(),
            children: vec![
                RunnableShape::Step { name: "two".into() },
                RunnableShape::Step { name: "one".into() },
            ],
        };
        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn agent_and_step_with_same_name_differ() {
        let a = RunnableShape::Agent { name: "x".into() };
        let b = RunnableShape::Step { name: "x".into() };
        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&b));
    }
}
