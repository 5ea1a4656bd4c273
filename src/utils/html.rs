// src/utils/html.rs

/// Sanitizes user-supplied text with ammonia's whitelist.
///
/// Safe inline tags survive; `<script>` (with its content), `<iframe>` and
/// event-handler attributes are removed. Applied to exam text on authoring
/// and to announcements before they are broadcast.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
