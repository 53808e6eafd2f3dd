//! `tb-privacy` — reversible PII redaction for payloads that leave the
//! machine.
//!
//! Anything bound for a remote provider passes through [`PrivacyFilter`]
//! first. Each PII match is replaced with a session-unique placeholder
//! (`[EMAIL_REDACTED]_3`) and recorded in the session redaction map; when
//! assistant text comes back, [`PrivacyFilter::restore`] substitutes the
//! originals so the user never sees a placeholder. The walkers are
//! shape-aware: one per typed provider body, matching on content-block
//! variants instead of probing JSON keys.

pub mod filter;
pub mod patterns;

pub use filter::PrivacyFilter;
pub use patterns::PatternKind;
