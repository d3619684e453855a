//! Derivation of cache paths from remote image URLs.

use std::fmt::Write;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors building a [`CacheLayout`].
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The layout does not contain a single segment.
    #[error("cache layout has no segments")]
    Empty,
    /// A segment pattern is not a valid regular expression.
    #[error("invalid pattern for segment `{name}`")]
    InvalidPattern {
        /// Name of the offending segment.
        name: String,
        /// The underlying parse error.
        #[source]
        source: regex::Error,
    },
}

/// What separates a segment from the next one in the URL.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    /// The next segment follows immediately.
    #[default]
    None,
    /// An optional `/`.
    OptionalSlash,
    /// Anything up to and including the next `/`.
    SkipToSlash,
}

impl Separator {
    fn pattern(self) -> &'static str {
        match self {
            Self::None => "",
            Self::OptionalSlash => "/?",
            Self::SkipToSlash => ".*?/",
        }
    }
}

/// A named piece of the image URL that becomes part of the cache path.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PathSegment {
    /// Name of the segment, used in diagnostics only.
    pub name: String,

    /// Regular expression matching the value of this segment.
    pub pattern: String,

    /// What follows this segment in the URL.
    #[serde(default)]
    pub after: Separator,

    /// Whether the value is the file name of the cache path.
    ///
    /// A verbatim segment is appended as-is. All other segments become a directory.
    #[serde(default)]
    pub verbatim: bool,
}

impl PathSegment {
    /// Creates a directory segment.
    pub fn dir(name: &str, pattern: &str, after: Separator) -> Self {
        Self {
            name: name.to_owned(),
            pattern: pattern.to_owned(),
            after,
            verbatim: false,
        }
    }

    /// Creates a segment that is taken over verbatim.
    pub fn verbatim(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_owned(),
            pattern: pattern.to_owned(),
            after: Separator::None,
            verbatim: true,
        }
    }
}

/// Ordered list of [`PathSegment`]s deriving a cache path from an image URL.
///
/// Segments are matched against the full URL in order. Every non-empty segment contributes one
/// path component, empty segments are skipped:
///
/// ```
/// use imagecache_sources::CacheLayout;
///
/// let layout = CacheLayout::default();
/// let path = layout.cache_path("https://cdn.example.com/pre/a12345/6/photo.jpg");
/// assert_eq!(path.as_deref(), Some("pre/a/1/2/3/4/5/6/photo.jpg"));
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(try_from = "Vec<PathSegment>", into = "Vec<PathSegment>")]
pub struct CacheLayout {
    segments: Vec<PathSegment>,
    matcher: Regex,
}

impl CacheLayout {
    /// Compiles the given segments into a layout.
    pub fn new(segments: Vec<PathSegment>) -> Result<Self, LayoutError> {
        if segments.is_empty() {
            return Err(LayoutError::Empty);
        }

        let mut pattern = String::new();
        for (index, segment) in segments.iter().enumerate() {
            // Validate every segment on its own to report the offending name.
            Regex::new(&segment.pattern).map_err(|source| LayoutError::InvalidPattern {
                name: segment.name.clone(),
                source,
            })?;
            write!(
                pattern,
                "(?P<{}>(?:{})){}",
                group_name(index),
                segment.pattern,
                segment.after.pattern()
            )
            .ok();
        }

        let matcher = Regex::new(&pattern).map_err(|source| LayoutError::InvalidPattern {
            name: "*".to_owned(),
            source,
        })?;

        Ok(Self { segments, matcher })
    }

    /// The segments of this layout, in matching order.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Derives the relative cache path for `url`.
    ///
    /// Returns `None` if the URL does not match the layout, or if the matched segments do not
    /// end in a file name.
    pub fn cache_path(&self, url: &str) -> Option<String> {
        let captures = self.matcher.captures(url)?;

        let mut path = String::new();
        for (index, segment) in self.segments.iter().enumerate() {
            let Some(value) = captures.name(&group_name(index)) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            path.push_str(value.as_str());
            if !segment.verbatim {
                path.push('/');
            }
        }

        if path.is_empty() || path.ends_with('/') {
            tracing::trace!(url, "cache layout did not yield a file name");
            return None;
        }

        Some(path)
    }
}

fn group_name(index: usize) -> String {
    format!("segment_{index}")
}

impl Default for CacheLayout {
    /// The country/letter/digits layout used by image CDNs of the `pre` and `gp-xx` families.
    fn default() -> Self {
        let digit = |name| PathSegment::dir(name, r"\d?", Separator::None);
        let segments = vec![
            PathSegment::dir("country", "pre|gp-[a-z]{2}", Separator::SkipToSlash),
            PathSegment::dir("letter", "[a-zA-Z]", Separator::None),
            digit("number1"),
            digit("number2"),
            digit("number3"),
            digit("number4"),
            PathSegment::dir("number5", r"\d?", Separator::OptionalSlash),
            PathSegment::dir("number6", r"\d?", Separator::OptionalSlash),
            PathSegment::verbatim("image_name", ".*"),
        ];

        // The built-in segments are known to compile.
        match Self::new(segments) {
            Ok(layout) => layout,
            Err(error) => unreachable!("default cache layout is invalid: {error}"),
        }
    }
}

impl TryFrom<Vec<PathSegment>> for CacheLayout {
    type Error = LayoutError;

    fn try_from(segments: Vec<PathSegment>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<CacheLayout> for Vec<PathSegment> {
    fn from(layout: CacheLayout) -> Self {
        layout.segments
    }
}
