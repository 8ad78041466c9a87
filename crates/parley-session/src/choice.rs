// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps end-user replies onto the choices of a pending bot input.

use parley_core::types::ChoiceEdge;

/// Finds the choice an end-user reply refers to.
///
/// Replies match a choice key after trimming and lowercasing, so `" 2 "` and
/// `"Support"` both resolve. Unmatched replies are forwarded verbatim.
pub fn resolve_choice<'a>(edges: &'a [ChoiceEdge], reply: &str) -> Option<&'a ChoiceEdge> {
    let normalized = reply.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    edges.iter().find(|edge| edge.choice_key == normalized)
}

/// The text to forward to the bot engine for `reply`.
pub fn reply_text(edges: &[ChoiceEdge], reply: &str) -> String {
    resolve_choice(edges, reply)
        .map(|edge| edge.label.clone())
        .unwrap_or_else(|| reply.to_string())
}
