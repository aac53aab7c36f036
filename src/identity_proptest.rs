//! Property-based tests for assembly identity parsing and comparison.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::identity::{AssemblyIdentity, AssemblyVersion, MatchMode};
    use proptest::prelude::*;

    fn arb_version() -> impl Strategy<Value = AssemblyVersion> {
        (any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>())
            .prop_map(|(a, b, c, d)| AssemblyVersion::new(a, b, c, d))
    }

    fn arb_identity() -> impl Strategy<Value = AssemblyIdentity> {
        (
            "[A-Za-z][A-Za-z0-9_.]{0,24}",
            proptest::option::of(arb_version()),
            proptest::option::of("[a-f0-9]{16}"),
            prop_oneof![Just(String::new()), "[a-z]{2}".prop_map(String::from)],
        )
            .prop_map(|(name, version, token, culture)| {
                let mut id = AssemblyIdentity::named(name);
                id.version = version;
                id.culture = crate::identity::normalize_culture(&culture);
                id.public_key_token = token.map(|t| t.parse().unwrap());
                id
            })
    }

    proptest! {
        /// Property: Display then FromStr is the identity function.
        #[test]
        fn fusion_name_round_trips(id in arb_identity()) {
            let text = id.to_string();
            let reparsed: AssemblyIdentity = text.parse().unwrap();
            prop_assert_eq!(id, reparsed);
        }

        /// Property: version Display/parse round-trips.
        #[test]
        fn version_round_trips(v in arb_version()) {
            let reparsed: AssemblyVersion = v.to_string().parse().unwrap();
            prop_assert_eq!(v, reparsed);
        }

        /// Property: version ordering agrees with tuple ordering.
        #[test]
        fn version_ordering_matches_tuples(a in arb_version(), b in arb_version()) {
            let lhs = (a.major, a.minor, a.build, a.revision);
            let rhs = (b.major, b.minor, b.build, b.revision);
            prop_assert_eq!(a.cmp(&b), lhs.cmp(&rhs));
        }

        /// Property: every identity simple-matches itself, and strictness
        /// only ever narrows a match.
        #[test]
        fn strict_match_implies_simple_match(a in arb_identity(), b in arb_identity()) {
            prop_assert!(a.matches(&a, MatchMode::Simple));
            prop_assert!(a.matches(&a, MatchMode::Strict));
            if a.matches(&b, MatchMode::Strict) {
                prop_assert!(a.matches(&b, MatchMode::Simple));
            }
        }

        /// Property: simple keys are equal iff identities simple-match.
        #[test]
        fn simple_key_agrees_with_simple_match(a in arb_identity(), b in arb_identity()) {
            prop_assert_eq!(
                a.simple_key() == b.simple_key(),
                a.matches(&b, MatchMode::Simple)
            );
        }

        /// Property: parsing never panics on arbitrary input.
        #[test]
        fn parse_never_panics(text in ".*") {
            let _ = text.parse::<AssemblyIdentity>();
        }
    }
}
