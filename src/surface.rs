//! Output surfaces: the in-memory stand-in for rendered page elements.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute marking a content-bearing surface. Its value is the raw text.
pub const DEFAULT_CONTENT_MARKER: &str = "data-math";

/// Attribute requesting display mode on a content-bearing surface.
pub const DISPLAY_ATTRIBUTE: &str = "data-display";

/// Stable identity of a surface, used for retry accounting and the blacklist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A render target holding markup, attributes and child surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub id: SurfaceId,
    pub markup: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<Surface>,
    /// Detached surfaces are not visible; backends refuse to render into them.
    #[serde(default = "attached_default")]
    pub attached: bool,
}

fn attached_default() -> bool {
    true
}

impl Surface {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SurfaceId(id.into()),
            markup: String::new(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            attached: true,
        }
    }

    /// An off-screen scratch surface for isolated rendering.
    pub fn scratch(id: &SurfaceId) -> Self {
        Self {
            attached: false,
            ..Self::new(format!("{}::scratch", id))
        }
    }

    /// A content-bearing surface carrying `raw` under `marker`.
    pub fn content(
        id: impl Into<String>,
        marker: &str,
        raw: impl Into<String>,
        display: bool,
    ) -> Self {
        let mut surface = Self::new(id);
        surface.set_attribute(marker, raw);
        if display {
            surface.set_attribute(DISPLAY_ATTRIBUTE, "true");
        }
        surface
    }

    pub fn with_child(mut self, child: Surface) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let classes = match self.attribute("class") {
            Some(existing) if !existing.is_empty() => format!("{} {}", existing, class),
            _ => class.to_string(),
        };
        self.set_attribute("class", classes);
    }

    pub fn remove_class(&mut self, class: &str) {
        if let Some(existing) = self.attributes.get_mut("class") {
            *existing = existing
                .split_whitespace()
                .filter(|c| *c != class)
                .collect::<Vec<_>>()
                .join(" ");
        }
    }

    /// Replace the surface's markup wholesale.
    pub fn replace_markup(&mut self, markup: impl Into<String>) {
        self.markup = markup.into();
    }

    pub fn is_content_bearing(&self, marker: &str) -> bool {
        self.attributes.contains_key(marker)
    }

    /// Raw text and display flag of a content-bearing surface.
    pub fn content_of(&self, marker: &str) -> Option<(&str, bool)> {
        let raw = self.attribute(marker)?;
        let display = self.attribute(DISPLAY_ATTRIBUTE) == Some("true");
        Some((raw, display))
    }

    /// Mutable references to every content-bearing descendant, in document
    /// order. A content-bearing surface is not searched further.
    pub fn content_targets<'a>(&'a mut self, marker: &str) -> Vec<&'a mut Surface> {
        let mut out = Vec::new();
        collect_targets(self, marker, &mut out);
        out
    }
}

fn collect_targets<'a>(surface: &'a mut Surface, marker: &str, out: &mut Vec<&'a mut Surface>) {
    for child in surface.children.iter_mut() {
        if child.is_content_bearing(marker) {
            out.push(child);
        } else {
            collect_targets(child, marker, out);
        }
    }
}
