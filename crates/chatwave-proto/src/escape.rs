//! HTML entity handling for text that crosses the broker boundary.
//!
//! The server escapes `<`, `>` and `"` (and sometimes `&`) before
//! broadcasting. Text must be un-escaped exactly once on receipt; a sink that
//! renders into HTML then escapes it again with [`escape_html`]. Decoding is a
//! single left-to-right pass, so `&amp;lt;` becomes `&lt;`, not `<`.

use std::borrow::Cow;

const ENTITIES: [(&str, char); 5] =
    [("&amp;", '&'), ("&lt;", '<'), ("&gt;", '>'), ("&quot;", '"'), ("&#39;", '\'')];

/// Decode the entities the server produces. Unknown entities pass through.
pub fn unescape_html(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match ENTITIES.iter().find(|(entity, _)| tail.starts_with(entity)) {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &tail[entity.len()..];
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            },
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Escape text for insertion into HTML.
pub fn escape_html(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn unescape_known_entities() {
        assert_eq!(unescape_html("&lt;b&gt; &quot;hi&quot; &amp; &#39;"), "<b> \"hi\" & '");
    }

    #[test]
    fn unescape_is_single_pass() {
        assert_eq!(unescape_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn unknown_entities_pass_through() {
        assert_eq!(unescape_html("fish & chips &nbsp;"), "fish & chips &nbsp;");
    }

    #[test]
    fn plain_text_is_borrowed() {
        assert!(matches!(unescape_html("hello"), Cow::Borrowed(_)));
        assert!(matches!(escape_html("hello"), Cow::Borrowed(_)));
    }

    #[test]
    fn server_escaped_text_is_not_double_encoded() {
        assert_eq!(escape_html(&unescape_html("&lt;script&gt;")), "&lt;script&gt;");
        assert_eq!(escape_html(&unescape_html("a & b")), "a &amp; b");
    }

    proptest! {
        #[test]
        fn unescape_inverts_escape(s in ".*") {
            let escaped = escape_html(&s);
            prop_assert_eq!(unescape_html(&escaped), s.as_str());
        }
    }
}
