//! Frozen template catalogues for semantic classification.
//!
//! Each catalogue is a list of short example phrases, one semantic category
//! per phrase. The classifier embeds incoming text and picks the
//! highest-dot-product template; the category labels below are stable
//! identifiers consumed by downstream tagging, so extend them but never
//! rename them.

/// One reference phrase representing a semantic category.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub category: &'static str,
    pub text: &'static str,
}

/// The four shipped catalogues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Catalog {
    /// Imperative phrasings that signal a standing instruction.
    Directive,
    /// What kind of knowledge an assistant message carries.
    Category,
    /// What a user message is doing.
    Intent,
    /// Reference anchors that drive rule-proposal capture.
    Anchor,
}

const DIRECTIVE: &[Template] = &[
    Template { category: "always", text: "Always do it this way from now on" },
    Template { category: "never", text: "Never do that again" },
    Template { category: "stop", text: "Stop doing it like that" },
    Template { category: "remember", text: "Remember this for next time" },
    Template { category: "preference", text: "I prefer it done this way" },
    Template { category: "correction", text: "No, that's wrong, it should be done differently" },
];

const CATEGORY: &[Template] = &[
    Template { category: "decision", text: "We decided to use this approach for the project" },
    Template { category: "decision", text: "After comparing the options we are going with this one" },
    Template { category: "solution", text: "The fix was to change the configuration setting" },
    Template { category: "solution", text: "This resolves the error by handling the edge case" },
    Template { category: "discovery", text: "It turns out the library behaves differently than documented" },
    Template { category: "discovery", text: "I found that the root cause is in the initialization order" },
];

const INTENT: &[Template] = &[
    Template { category: "declaration", text: "From now on always use this approach" },
    Template { category: "declaration", text: "Going forward we should do it like this every time" },
    Template { category: "declaration", text: "Make sure to run the checks before finishing" },
    Template { category: "declaration", text: "Don't ever commit directly to the main branch" },
    Template { category: "identity", text: "My project is called something specific" },
    Template { category: "identity", text: "I built this app for tracking my work" },
    Template { category: "identity", text: "This is my repository for the backend service" },
    Template { category: "preference", text: "I prefer short functions over long ones" },
    Template { category: "preference", text: "I'd rather use tabs instead of spaces" },
    Template { category: "preference", text: "I like explicit error handling everywhere" },
    Template { category: "preference", text: "I want the tests colocated with the code" },
    Template { category: "frustration", text: "This is so annoying, it keeps breaking" },
    Template { category: "frustration", text: "I hate when the build fails like this" },
    Template { category: "frustration", text: "Why does this terrible error keep coming back" },
    Template { category: "ownership", text: "I own this part of the codebase" },
    Template { category: "ownership", text: "That module is mine, I maintain it" },
    Template { category: "ownership", text: "I'm responsible for the deployment pipeline" },
];

const ANCHOR: &[Template] = &[
    Template { category: "rule", text: "Always follow this rule when working in this codebase" },
    Template { category: "standard", text: "Keep the code style consistent and standardized everywhere" },
    Template { category: "correction", text: "That was wrong, do it the other way instead" },
    Template { category: "preference", text: "I prefer this way of doing things" },
    Template { category: "recommendation", text: "You should consider doing it like this" },
    Template { category: "debugging", text: "The error was fixed by finding the root cause" },
];

/// The frozen template list for a catalogue.
pub fn catalog_templates(catalog: Catalog) -> &'static [Template] {
    match catalog {
        Catalog::Directive => DIRECTIVE,
        Catalog::Category => CATEGORY,
        Catalog::Intent => INTENT,
        Catalog::Anchor => ANCHOR,
    }
}
