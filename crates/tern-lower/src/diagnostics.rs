//! Diagnostic rendering for lowering errors.
//!
//! Renders a [`LowerError`] against the original source text through
//! ariadne, producing the same labeled-span reports the rest of the
//! compiler emits.

use ariadne::{Config, Label, Report, ReportKind, Source};

use crate::error::LowerError;

/// Rendering options.
#[derive(Clone, Copy, Debug)]
pub struct DiagnosticOptions {
    pub color: bool,
}

impl DiagnosticOptions {
    /// Colorless output for deterministic test comparisons.
    pub fn colorless() -> Self {
        Self { color: false }
    }
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self { color: true }
    }
}

/// Render `err` as a labeled report over `src`.
pub fn render_diagnostic(
    err: &LowerError,
    src: &str,
    src_name: &str,
    opts: &DiagnosticOptions,
) -> String {
    let span = clamp(err.span().to_range(), src.len());
    let mut buf = Vec::new();
    let written = Report::build(ReportKind::Error, (src_name, span.clone()))
        .with_config(Config::default().with_color(opts.color))
        .with_message(err.to_string())
        .with_label(Label::new((src_name, span)).with_message(label_message(err)))
        .finish()
        .write((src_name, Source::from(src)), &mut buf);
    match written {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => err.to_string(),
    }
}

// Ariadne needs an in-bounds span of at least one character.
fn clamp(r: std::ops::Range<usize>, source_len: usize) -> std::ops::Range<usize> {
    let s = r.start.min(source_len);
    let e = r.end.min(source_len).max(s);
    if s == e {
        s..e.saturating_add(1).min(source_len)
    } else {
        s..e
    }
}

fn label_message(err: &LowerError) -> &'static str {
    match err {
        LowerError::UnresolvedJumpTarget { .. } => {
            "this jump's target is not on the enclosing scope stack"
        }
        LowerError::DanglingRewrite { .. } => "while rewriting this try expression",
    }
}
