//! Resource path templates such as `shelves/{shelf}/books/{book=**}`.
//!
//! A template is a `/`-separated list of literals, `*` (one segment) and `**`
//! (one or more segments), optionally grouped into named `{var=...}`
//! bindings and followed by a `:verb` suffix. Wildcards outside a binding
//! are bound to positional variables `$0`, `$1`, ... in order.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::TemplateError;

/// Variable under which a matched or supplied host name is stored.
pub const HOSTNAME_VAR: &str = "$hostname";

fn custom_verb_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r":([^/*}{=]+)$").expect("custom verb pattern must compile")
    })
}

/// Split a trailing `:verb` off `path`.
fn split_custom_verb(path: &str) -> Option<(&str, &str)> {
    let caps = custom_verb_pattern().captures(path)?;
    let whole = caps.get(0)?;
    let verb = caps.get(1)?;
    Some((&path[..whole.start()], verb.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    CustomVerb(String),
    Wildcard,
    PathWildcard,
    Binding(String),
    EndBinding,
}

impl Segment {
    fn separator(&self) -> &'static str {
        match self {
            Self::CustomVerb(_) => ":",
            Self::EndBinding => "",
            _ => "/",
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Literal(s) | Self::CustomVerb(s) | Self::Binding(s) => s.as_str(),
            Self::Wildcard => "*",
            Self::PathWildcard => "**",
            Self::EndBinding => "",
        }
    }
}

fn parse(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let template = template.strip_prefix('/').unwrap_or(template);
    let (template, custom_verb) = match split_custom_verb(template) {
        Some((rest, verb)) => (rest, Some(verb)),
        None => (template, None),
    };
    let parse_error = |make: fn(String) -> TemplateError| make(template.to_string());

    let mut segments = Vec::new();
    let mut var_name: Option<String> = None;
    let mut free_wildcards = 0usize;
    let mut path_wildcards = 0usize;

    for raw in template.split('/') {
        let mut seg = raw.trim();
        let mut implicit_wildcard = false;

        if let Some(rest) = seg.strip_prefix('{') {
            if var_name.is_some() {
                return Err(parse_error(|template| TemplateError::NestedBinding { template }));
            }
            let name = match rest.find('=') {
                Some(0) => {
                    return Err(parse_error(|template| TemplateError::InvalidBinding {
                        template,
                    }))
                }
                Some(i) => {
                    seg = rest[i + 1..].trim();
                    rest[..i].trim()
                }
                _ => match rest.strip_suffix('}') {
                    // `{name}` binds a single wildcard segment.
                    Some(name) => {
                        implicit_wildcard = true;
                        seg = "}";
                        name.trim()
                    }
                    None => {
                        return Err(parse_error(|template| TemplateError::InvalidBinding {
                            template,
                        }))
                    }
                },
            };
            var_name = Some(name.to_string());
            segments.push(Segment::Binding(name.to_string()));
        }

        let binding_ends = seg.ends_with('}');
        if binding_ends {
            seg = seg[..seg.len() - 1].trim();
        }

        match seg {
            "*" | "**" => {
                let wildcard = if seg == "**" {
                    path_wildcards += 1;
                    Segment::PathWildcard
                } else {
                    Segment::Wildcard
                };
                if var_name.is_none() {
                    segments.push(Segment::Binding(format!("${free_wildcards}")));
                    free_wildcards += 1;
                    segments.push(wildcard);
                    segments.push(Segment::EndBinding);
                } else {
                    segments.push(wildcard);
                }
            }
            "" if binding_ends => {}
            "" => return Err(parse_error(|template| TemplateError::EmptySegment { template })),
            literal => segments.push(Segment::Literal(literal.to_string())),
        }

        if binding_ends {
            var_name = None;
            if implicit_wildcard {
                segments.push(Segment::Wildcard);
            }
            segments.push(Segment::EndBinding);
        }
        if path_wildcards > 1 {
            return Err(parse_error(|template| TemplateError::MultiplePathWildcards {
                template,
            }));
        }
    }

    if let Some(verb) = custom_verb {
        segments.push(Segment::CustomVerb(verb.to_string()));
    }
    Ok(segments)
}

/// Percent-encode everything outside the unreserved set, `/` included.
fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Undo percent-encoding. Malformed escapes are kept as-is.
fn decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse `template`.
    pub fn from_string(template: &str) -> Result<Self, TemplateError> {
        Self::from_segments(parse(template)?)
    }

    fn from_segments(segments: Vec<Segment>) -> Result<Self, TemplateError> {
        if segments.is_empty() {
            return Err(TemplateError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for seg in &segments {
            if let Segment::Binding(name) = seg {
                if !seen.insert(name.as_str()) {
                    return Err(TemplateError::DuplicateBinding { name: name.clone() });
                }
            }
        }
        Ok(Self { segments })
    }

    /// Variable names in binding order, positional `$n` names included.
    pub fn bindings(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Binding(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Match `path` and return the URL-decoded value of every variable.
    ///
    /// A path starting with `//` carries a host name, returned under
    /// [`HOSTNAME_VAR`]. Returns `None` if the path does not match.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        self.match_inner(path, false)
    }

    /// Like [`match_path`](Self::match_path), but the first segment is always
    /// taken as the host name.
    pub fn match_from_full_name(&self, path: &str) -> Option<HashMap<String, String>> {
        self.match_inner(path, true)
    }

    fn match_inner(&self, path: &str, force_host_name: bool) -> Option<HashMap<String, String>> {
        let mut path = path;
        if let Some(Segment::CustomVerb(verb)) = self.segments.last() {
            let (rest, found) = split_custom_verb(path)?;
            if decode(found) != *verb {
                return None;
            }
            path = rest;
        }

        let with_host_name = path.starts_with("//");
        if with_host_name {
            path = &path[2..];
        }
        let input: Vec<&str> = path.split('/').map(str::trim).collect();
        let mut values = HashMap::new();
        let mut pos = 0;
        if with_host_name || force_host_name {
            let host = input[0];
            let host = if with_host_name {
                format!("//{host}")
            } else {
                host.to_string()
            };
            values.insert(HOSTNAME_VAR.to_string(), host);
            pos = 1;
        }

        self.match_segments(&input, pos, &mut values).then_some(values)
    }

    fn match_segments(
        &self,
        input: &[&str],
        mut pos: usize,
        values: &mut HashMap<String, String>,
    ) -> bool {
        let mut current_var: Option<&str> = None;
        for (seg_pos, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::EndBinding => {
                    current_var = None;
                    continue;
                }
                Segment::Binding(name) => {
                    current_var = Some(name.as_str());
                    continue;
                }
                Segment::CustomVerb(_) => break,
                _ => {}
            }

            let Some(raw) = input.get(pos) else {
                return false;
            };
            let next = decode(raw);
            pos += 1;
            if let Segment::Literal(literal) = seg {
                if *literal != next {
                    return false;
                }
            }
            let Some(var) = current_var else {
                continue;
            };
            let value = values.entry(var.to_string()).or_default();
            if !value.is_empty() {
                value.push('/');
            }
            value.push_str(&next);

            if *seg == Segment::PathWildcard {
                // `**` swallows whatever the remaining segments leave over.
                let still_needed = self.segments[seg_pos + 1..]
                    .iter()
                    .filter(|s| {
                        !matches!(
                            s,
                            Segment::Binding(_) | Segment::EndBinding | Segment::CustomVerb(_)
                        )
                    })
                    .count();
                let available = input.len().saturating_sub(pos + still_needed);
                for raw in &input[pos..pos + available] {
                    value.push('/');
                    value.push_str(&decode(raw));
                }
                pos += available;
            }
        }
        pos == input.len()
    }

    /// Build a path from `bindings`, URL-escaping each value.
    ///
    /// Every variable must be bound. A value bound to `**`, or to a pattern
    /// spanning several segments, keeps its `/` separators.
    pub fn instantiate<'a>(
        &self,
        bindings: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<String, TemplateError> {
        let values = bindings
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.render(&values, false)
    }

    /// Like [`instantiate`](Self::instantiate), but unbound variables keep
    /// their template syntax, so the result is itself a template.
    pub fn instantiate_partial(
        &self,
        values: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        self.render(values, true)
    }

    fn render(
        &self,
        values: &HashMap<String, String>,
        allow_partial: bool,
    ) -> Result<String, TemplateError> {
        let segs = &self.segments;
        let mut out = String::new();
        if let Some(host) = values.get(HOSTNAME_VAR) {
            out.push_str(host);
            out.push('/');
        }

        let mut continue_last = true;
        let mut skip = false;
        let mut i = 0;
        while i < segs.len() {
            let seg = &segs[i];
            if !skip && !continue_last {
                out.push_str(seg.separator());
            }
            continue_last = false;

            match seg {
                Segment::Binding(name) => match values.get(name) {
                    None if !allow_partial => {
                        return Err(TemplateError::UnboundVariable { name: name.clone() });
                    }
                    None if name.starts_with('$') => {
                        out.push_str(segs.get(i + 1).map_or("", Segment::text));
                        i += 3;
                        continue;
                    }
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('=');
                        continue_last = true;
                    }
                    Some(value) => {
                        let keep_slashes = segs.get(i + 1) == Some(&Segment::PathWildcard)
                            || segs.get(i + 2) != Some(&Segment::EndBinding);
                        if keep_slashes {
                            let parts: Vec<String> =
                                value.split('/').map(|p| encode(p.trim())).collect();
                            out.push_str(&parts.join("/"));
                        } else {
                            out.push_str(&encode(value));
                        }
                        skip = true;
                    }
                },
                Segment::EndBinding => {
                    if !skip {
                        out.push('}');
                    }
                    skip = false;
                }
                other => {
                    if !skip {
                        out.push_str(other.text());
                    }
                }
            }
            i += 1;
        }
        Ok(out)
    }
}

impl fmt::Display for PathTemplate {
    /// Canonical syntax; positional bindings print as bare wildcards.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segs = &self.segments;
        let mut continue_last = true;
        let mut i = 0;
        while i < segs.len() {
            let seg = &segs[i];
            if !continue_last {
                f.write_str(seg.separator())?;
            }
            continue_last = false;

            match seg {
                Segment::Binding(name) if name.starts_with('$') => {
                    f.write_str(segs.get(i + 1).map_or("", Segment::text))?;
                    i += 3;
                    continue;
                }
                Segment::Binding(name) => {
                    write!(f, "{{{name}")?;
                    if segs.get(i + 1) == Some(&Segment::Wildcard)
                        && segs.get(i + 2) == Some(&Segment::EndBinding)
                    {
                        f.write_str("}")?;
                        i += 3;
                        continue;
                    }
                    f.write_str("=")?;
                    continue_last = true;
                }
                Segment::EndBinding => f.write_str("}")?,
                other => f.write_str(other.text())?,
            }
            i += 1;
        }
        Ok(())
    }
}

impl std::str::FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}
