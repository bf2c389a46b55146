use regex::Regex;

/// Character class a `:param` segment may consist of.
pub const PARAM_SEGMENT: &str = "[0-9A-Za-z_.-]+";

const PARAM_MARKER: char = ':';

/// Anchored matcher compiled once from a route template.
///
/// Every `/`-separated segment containing `:` becomes a single-segment
/// wildcard; all other segments match literally.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    template: String,
    regex: Regex,
}

impl PathMatcher {
    pub fn compile(template: &str) -> Result<Self, regex::Error> {
        let pattern = template
            .split('/')
            .map(|segment| {
                if segment.contains(PARAM_MARKER) {
                    PARAM_SEGMENT.to_string()
                } else {
                    regex::escape(segment)
                }
            })
            .collect::<Vec<_>>()
            .join("/");

        let regex = Regex::new(&format!("^{pattern}$"))?;

        Ok(Self {
            template: template.to_string(),
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// `path` must not carry the query string.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}
