// Just enough HTML scanning for the login form and inline scripts. The
// portal pages are not well-formed enough to be worth a DOM.

use std::sync::LazyLock;

use regex::Regex;

static FORM_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b([^>]*)>").expect("static regex must compile"));
static FORM_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</form\s*>").expect("static regex must compile"));
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("static regex must compile"));
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("static regex must compile")
});
static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").expect("static regex must compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form<'a> {
    pub attributes: Vec<(String, String)>,
    pub body: &'a str,
}

impl Form<'_> {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        attribute(&self.attributes, name)
    }

    /// `(name, value)` of every `type="hidden"` input; a missing value is
    /// an empty string. Inputs without a name are skipped.
    pub fn hidden_inputs(&self) -> Vec<(String, String)> {
        INPUT_RE
            .captures_iter(self.body)
            .filter_map(|caps| {
                let attrs = parse_attributes(caps.get(1)?.as_str());
                let is_hidden = attribute(&attrs, "type")
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case("hidden"));
                if !is_hidden {
                    return None;
                }
                let name = attribute(&attrs, "name").filter(|n| !n.is_empty())?;
                let value = attribute(&attrs, "value").unwrap_or_default();
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Attributes of a start tag, names lowercased, values entity-decoded.
pub fn parse_attributes(tag: &str) -> Vec<(String, String)> {
    ATTRIBUTE_RE
        .captures_iter(tag)
        .map(|caps| {
            let name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            (name, value)
        })
        .collect()
}

pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// The first `<form>` whose `id` equals `id`. An unclosed form runs to the
/// end of the document.
pub fn find_form<'a>(html: &'a str, id: &str) -> Option<Form<'a>> {
    FORM_OPEN_RE.captures_iter(html).find_map(|caps| {
        let attributes = parse_attributes(caps.get(1)?.as_str());
        if attribute(&attributes, "id") != Some(id) {
            return None;
        }
        let body_start = caps.get(0)?.end();
        let body_end = FORM_CLOSE_RE
            .find_at(html, body_start)
            .map(|m| m.start())
            .unwrap_or(html.len());
        Some(Form {
            attributes,
            body: &html[body_start..body_end],
        })
    })
}

/// Contents of every inline `<script>` block, in document order.
pub fn script_blocks(html: &str) -> Vec<&str> {
    SCRIPT_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .filter(|body| !body.is_empty())
        .collect()
}
