use serde::{Deserialize, Serialize};

/// An observable unit of work shared between the worker and the host.
///
/// `status` is the externally observable representation of `progress`: the
/// diff-wait comparison looks at `(id, status)` only, so a progress change
/// that does not change the derived status string is invisible to pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub progress: f64,
    pub error: Option<String>,
}

impl Item {
    /// The `(id, status)` pair used as the diff-wait baseline key.
    pub fn key(&self) -> ItemKey {
        ItemKey {
            id: self.id,
            status: self.status.clone(),
        }
    }
}

/// Baseline pair a client sends with a `ping` to describe what it already
/// knows. Order-irrelevant; compared by equality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub id: u64,
    pub status: String,
}

/// Render a progress fraction in [0,1] as the canonical status label,
/// e.g. `0.5` becomes `"50.00 %"`.
pub fn status_label(progress: f64) -> String {
    format!("{:.2} %", progress * 100.0)
}
