use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Retouch intensity knob. Controls how aggressively the model reworks
/// lighting and attire; never the face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Light,
    Medium,
    Premium,
}

impl Intensity {
    pub const ALL: [Intensity; 3] = [Intensity::Light, Intensity::Medium, Intensity::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Light => "light",
            Intensity::Medium => "medium",
            Intensity::Premium => "premium",
        }
    }

    pub fn parse(raw: &str) -> Option<Intensity> {
        Self::ALL
            .into_iter()
            .find(|value| value.as_str() == raw.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Corporate,
    Linkedin,
    Profile,
    Fragmentation,
    HalfFragmentation,
    DualConcept,
    CinematicAura,
    Futuristic,
    Minimalist,
    CyberGlitch,
    OilPainting,
    SketchArt,
}

impl Style {
    pub const ALL: [Style; 12] = [
        Style::Corporate,
        Style::Linkedin,
        Style::Profile,
        Style::Fragmentation,
        Style::HalfFragmentation,
        Style::DualConcept,
        Style::CinematicAura,
        Style::Futuristic,
        Style::Minimalist,
        Style::CyberGlitch,
        Style::OilPainting,
        Style::SketchArt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Corporate => "corporate",
            Style::Linkedin => "linkedin",
            Style::Profile => "profile",
            Style::Fragmentation => "fragmentation",
            Style::HalfFragmentation => "half_fragmentation",
            Style::DualConcept => "dual_concept",
            Style::CinematicAura => "cinematic_aura",
            Style::Futuristic => "futuristic",
            Style::Minimalist => "minimalist",
            Style::CyberGlitch => "cyber_glitch",
            Style::OilPainting => "oil_painting",
            Style::SketchArt => "sketch_art",
        }
    }

    pub fn parse(raw: &str) -> Option<Style> {
        Self::ALL
            .into_iter()
            .find(|value| value.as_str() == raw.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleCategory {
    Professional,
    Corporate,
    Creative,
    Viral,
    Futurist,
}

impl StyleCategory {
    pub const ALL: [StyleCategory; 5] = [
        StyleCategory::Professional,
        StyleCategory::Corporate,
        StyleCategory::Creative,
        StyleCategory::Viral,
        StyleCategory::Futurist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StyleCategory::Professional => "professional",
            StyleCategory::Corporate => "corporate",
            StyleCategory::Creative => "creative",
            StyleCategory::Viral => "viral",
            StyleCategory::Futurist => "futurist",
        }
    }
}

/// Optional color/mood filter layered on top of a style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    GoldenHour,
    Noir,
    Vivid,
    Pastel,
    Sepia,
}

impl Effect {
    pub const ALL: [Effect; 5] = [
        Effect::GoldenHour,
        Effect::Noir,
        Effect::Vivid,
        Effect::Pastel,
        Effect::Sepia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::GoldenHour => "golden_hour",
            Effect::Noir => "noir",
            Effect::Vivid => "vivid",
            Effect::Pastel => "pastel",
            Effect::Sepia => "sepia",
        }
    }

    pub fn parse(raw: &str) -> Option<Effect> {
        Self::ALL
            .into_iter()
            .find(|value| value.as_str() == raw.trim().to_ascii_lowercase())
    }
}

/// Options chosen before submission. Immutable for the lifetime of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub intensity: Intensity,
    pub style: Style,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            intensity: Intensity::Medium,
            style: Style::Corporate,
            effect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleInfo {
    pub style: Style,
    pub label: String,
    pub category: StyleCategory,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct StyleCatalog {
    styles: IndexMap<Style, StyleInfo>,
}

impl StyleCatalog {
    pub fn get(&self, style: Style) -> &StyleInfo {
        // default_styles covers every variant; the catalog is total by construction.
        &self.styles[&style]
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleInfo> {
        self.styles.values()
    }

    pub fn by_category(&self, category: StyleCategory) -> Vec<&StyleInfo> {
        self.styles
            .values()
            .filter(|info| info.category == category)
            .collect()
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self {
            styles: default_styles(),
        }
    }
}

fn default_styles() -> IndexMap<Style, StyleInfo> {
    let mut map = IndexMap::new();

    let mut insert = |style: Style, label: &str, category: StyleCategory, description: &str| {
        map.insert(
            style,
            StyleInfo {
                style,
                label: label.to_string(),
                category,
                description: description.to_string(),
            },
        );
    };

    insert(
        Style::Corporate,
        "Corporate",
        StyleCategory::Corporate,
        "Suit and tie, executive setting.",
    );
    insert(
        Style::Linkedin,
        "LinkedIn",
        StyleCategory::Professional,
        "Business casual, bright crisp background.",
    );
    insert(
        Style::Profile,
        "Profile",
        StyleCategory::Professional,
        "Minimalist and modern for social profiles.",
    );
    insert(
        Style::Fragmentation,
        "Fragmentation",
        StyleCategory::Viral,
        "Digital particle and shatter effect.",
    );
    insert(
        Style::HalfFragmentation,
        "Half Fragmentation",
        StyleCategory::Viral,
        "Half real, half disintegrating into particles.",
    );
    insert(
        Style::DualConcept,
        "Duality",
        StyleCategory::Creative,
        "Artistic split between real and digital.",
    );
    insert(
        Style::CinematicAura,
        "Cinematic Aura",
        StyleCategory::Viral,
        "Smoke and dramatic movie lighting.",
    );
    insert(
        Style::Futuristic,
        "Futuristic",
        StyleCategory::Futurist,
        "Neon and technology of the future.",
    );
    insert(
        Style::Minimalist,
        "Minimalist",
        StyleCategory::Creative,
        "Full focus on face and silhouette.",
    );
    insert(
        Style::CyberGlitch,
        "Cyber Glitch",
        StyleCategory::Viral,
        "Digital distortion and cyberpunk art.",
    );
    insert(
        Style::OilPainting,
        "Oil Painting",
        StyleCategory::Creative,
        "Classic renaissance painting style.",
    );
    insert(
        Style::SketchArt,
        "Realistic Sketch",
        StyleCategory::Creative,
        "Hand-drawn artistic sketch.",
    );

    map
}
