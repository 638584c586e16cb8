//! Per-connection knowledge of which pull operations the server supports.

use std::fmt;

/// Pull operation families, each with its own support flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullFamily {
    EnumerateInstances,
    EnumerateInstancePaths,
    AssociatorInstances,
    AssociatorInstancePaths,
    ReferenceInstances,
    ReferenceInstancePaths,
    QueryInstances,
}

impl PullFamily {
    pub const ALL: [PullFamily; 7] = [
        PullFamily::EnumerateInstances,
        PullFamily::EnumerateInstancePaths,
        PullFamily::AssociatorInstances,
        PullFamily::AssociatorInstancePaths,
        PullFamily::ReferenceInstances,
        PullFamily::ReferenceInstancePaths,
        PullFamily::QueryInstances,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Name of the Open operation of this family.
    pub fn open_operation(self) -> &'static str {
        match self {
            PullFamily::EnumerateInstances => "OpenEnumerateInstances",
            PullFamily::EnumerateInstancePaths => "OpenEnumerateInstancePaths",
            PullFamily::AssociatorInstances => "OpenAssociatorInstances",
            PullFamily::AssociatorInstancePaths => "OpenAssociatorInstancePaths",
            PullFamily::ReferenceInstances => "OpenReferenceInstances",
            PullFamily::ReferenceInstancePaths => "OpenReferenceInstancePaths",
            PullFamily::QueryInstances => "OpenQueryInstances",
        }
    }
}

impl fmt::Display for PullFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.open_operation())
    }
}

/// Tri-state flags: `None` means not yet known, `Some(true)` means pull
/// operations are used, `Some(false)` means traditional operations are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    flags: [Option<bool>; 7],
}

impl Capabilities {
    /// All families start at `use_pull`.
    pub fn new(use_pull: Option<bool>) -> Self {
        Self {
            flags: [use_pull; 7],
        }
    }

    pub fn get(&self, family: PullFamily) -> Option<bool> {
        self.flags[family.index()]
    }

    pub fn set(&mut self, family: PullFamily, supported: Option<bool>) {
        self.flags[family.index()] = supported;
    }

    pub fn iter(&self) -> impl Iterator<Item = (PullFamily, Option<bool>)> + '_ {
        PullFamily::ALL.iter().map(|f| (*f, self.get(*f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent() {
        let mut caps = Capabilities::new(None);
        caps.set(PullFamily::ReferenceInstancePaths, Some(false));
        caps.set(PullFamily::EnumerateInstances, Some(true));
        assert_eq!(caps.get(PullFamily::ReferenceInstancePaths), Some(false));
        assert_eq!(caps.get(PullFamily::EnumerateInstances), Some(true));
        assert_eq!(
            caps.iter().filter(|(_, flag)| flag.is_none()).count(),
            5
        );
        assert!(Capabilities::new(Some(true))
            .iter()
            .all(|(_, flag)| flag == Some(true)));
        assert_eq!(PullFamily::QueryInstances.to_string(), "OpenQueryInstances");
    }
}
