// This module is the annotation model: it turns the untyped text of a fixture into a
// typed FixtureCase. Two structured comment blocks are recognized, `@gallery-hints` for
// the scenario descriptor and `@gallery-expect` for pattern assertions, each handled by a
// dedicated line parser rather than any general-purpose structural parser. Errors are
// fixture-scoped: the corpus loader records the rejection and keeps loading.

//! Fixture annotations and corpus loading.

pub mod corpus;
pub mod expect;
pub mod fixture;
pub mod hints;

pub use corpus::{Corpus, RejectedFixture, DEFAULT_EXTENSIONS};
pub use expect::{AppliesTo, AssertionKind, InstructionPattern, MnemonicMatch, PatternAssertion};
pub use fixture::{Category, FixtureCase};
pub use hints::{FlagMode, ScenarioDescriptor, ToolchainMatcher};
