//! The fixed scope hierarchy buses and events are addressed by.

use serde::{Deserialize, Serialize};

/// A node in the fixed ancestor/descendant chain identifying how broadly an
/// event or bus applies.
///
/// Scopes form a strict chain, broadest first:
///
/// ```text
/// Application < Session < Ui < View
/// ```
///
/// The derived `Ord` follows that chain, so "ancestor" means "strictly
/// less". Buses carry exactly one scope; listener registrations carry an
/// `Option<Scope>` constraint where `None` matches any scope.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Process-wide root scope.
    Application,
    /// One user session.
    Session,
    /// One UI instance (e.g. a browser tab).
    Ui,
    /// One navigable view within a UI.
    View,
}

impl Scope {
    /// All scopes, broadest first.
    pub const ALL: [Scope; 4] = [Scope::Application, Scope::Session, Scope::Ui, Scope::View];

    /// Strict ancestry: `self` is broader than `other` on the chain.
    ///
    /// A scope is never its own ancestor.
    pub fn is_ancestor_of(self, other: Scope) -> bool {
        self < other
    }

    /// Strict descent: `self` is narrower than `other` on the chain.
    pub fn is_descendant_of(self, other: Scope) -> bool {
        self > other
    }

    /// The next-broader scope, or `None` for the root of the chain.
    pub fn parent(self) -> Option<Scope> {
        match self {
            Scope::Application => None,
            Scope::Session => Some(Scope::Application),
            Scope::Ui => Some(Scope::Session),
            Scope::View => Some(Scope::Ui),
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Scope::Application => "application",
            Scope::Session => "session",
            Scope::Ui => "ui",
            Scope::View => "view",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_order_is_broadest_first() {
        assert!(Scope::Application < Scope::Session);
        assert!(Scope::Session < Scope::Ui);
        assert!(Scope::Ui < Scope::View);
    }

    #[test]
    fn ancestry_is_strict() {
        assert!(Scope::Application.is_ancestor_of(Scope::View));
        assert!(!Scope::Session.is_ancestor_of(Scope::Session));
        assert!(!Scope::View.is_ancestor_of(Scope::Application));
        assert!(Scope::View.is_descendant_of(Scope::Application));
    }

    #[test]
    fn parent_walks_toward_the_root() {
        assert_eq!(Scope::View.parent(), Some(Scope::Ui));
        assert_eq!(Scope::Ui.parent(), Some(Scope::Session));
        assert_eq!(Scope::Session.parent(), Some(Scope::Application));
        assert_eq!(Scope::Application.parent(), None);
    }

    #[test]
    fn serde_roundtrip_uses_lowercase_names() {
        let json = serde_json::to_string(&Scope::Ui).unwrap();
        assert_eq!(json, "\"ui\"");
        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Scope::Ui);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_scope() -> impl Strategy<Value = Scope> {
            proptest::sample::select(&Scope::ALL[..])
        }

        proptest! {
            /// Property: ancestry is irreflexive and antisymmetric.
            #[test]
            fn ancestry_irreflexive_antisymmetric(a in any_scope(), b in any_scope()) {
                prop_assert!(!a.is_ancestor_of(a));
                if a.is_ancestor_of(b) {
                    prop_assert!(!b.is_ancestor_of(a));
                }
            }

            /// Property: ancestry is transitive along the chain.
            #[test]
            fn ancestry_transitive(a in any_scope(), b in any_scope(), c in any_scope()) {
                if a.is_ancestor_of(b) && b.is_ancestor_of(c) {
                    prop_assert!(a.is_ancestor_of(c));
                }
            }

            /// Property: any two distinct scopes are related one way or the other.
            #[test]
            fn chain_is_total(a in any_scope(), b in any_scope()) {
                if a != b {
                    prop_assert!(a.is_ancestor_of(b) ^ b.is_ancestor_of(a));
                }
            }

            /// Property: the parent link agrees with the ordering.
            #[test]
            fn parent_agrees_with_order(a in any_scope()) {
                if let Some(p) = a.parent() {
                    prop_assert!(p.is_ancestor_of(a));
                }
            }
        }
    }
}
