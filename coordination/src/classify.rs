//! Emergency classification and service-type routing.
//!
//! Maps an incident's signals to one [`EmergencyType`]. Evaluation order is
//! fixed and first match wins:
//!
//! 1. vision tag keyword families
//! 2. free-text keyword families, in [`TEXT_FAMILIES`] order
//! 3. structured triage need type
//! 4. keywords in the severity stage's needs list
//! 5. `general`

use serde::{Deserialize, Serialize};

use crate::incident::{Incident, NeedType, Signals};
use crate::station::StationType;

/// Closed set of emergency labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    Fire,
    Flood,
    Earthquake,
    Medical,
    Rescue,
    TrafficAccident,
    Hazmat,
    BuildingCollapse,
    Landslide,
    Storm,
    Police,
    General,
}

impl EmergencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Flood => "flood",
            Self::Earthquake => "earthquake",
            Self::Medical => "medical",
            Self::Rescue => "rescue",
            Self::TrafficAccident => "traffic_accident",
            Self::Hazmat => "hazmat",
            Self::BuildingCollapse => "building_collapse",
            Self::Landslide => "landslide",
            Self::Storm => "storm",
            Self::Police => "police",
            Self::General => "general",
        }
    }

    pub fn all() -> &'static [EmergencyType] {
        &[
            Self::Fire,
            Self::Flood,
            Self::Earthquake,
            Self::Medical,
            Self::Rescue,
            Self::TrafficAccident,
            Self::Hazmat,
            Self::BuildingCollapse,
            Self::Landslide,
            Self::Storm,
            Self::Police,
            Self::General,
        ]
    }

    /// Human-readable name used in alert titles.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Fire => "Fire",
            Self::Flood => "Flood",
            Self::Earthquake => "Earthquake",
            Self::Medical => "Medical Emergency",
            Self::Rescue => "Rescue",
            Self::TrafficAccident => "Traffic Accident",
            Self::Hazmat => "Hazardous Materials",
            Self::BuildingCollapse => "Building Collapse",
            Self::Landslide => "Landslide",
            Self::Storm => "Storm",
            Self::Police => "Police Assistance",
            Self::General => "General Emergency",
        }
    }

    /// Station service types that receive this emergency.
    ///
    /// One primary type per emergency keeps unrelated stations out of the
    /// fan-out. [`FALLBACK_SERVICE_TYPES`] covers the case where none is near.
    pub fn primary_service_types(&self) -> &'static [StationType] {
        match self {
            Self::Fire | Self::Hazmat => &[StationType::Fire],
            Self::Medical => &[StationType::Hospital],
            Self::TrafficAccident => &[StationType::Ambulance],
            Self::Police => &[StationType::Police],
            Self::Flood
            | Self::Earthquake
            | Self::Rescue
            | Self::BuildingCollapse
            | Self::Landslide
            | Self::Storm
            | Self::General => &[StationType::Rescue],
        }
    }
}

impl std::fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmergencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown emergency type '{s}'"))
    }
}

/// Service types tried when no primary-type station was found.
pub const FALLBACK_SERVICE_TYPES: &[StationType] = &[StationType::Police, StationType::Rescue];

/// A keyword family: any keyword contained in the lowercased input selects
/// the family's emergency type.
#[derive(Debug, Clone, Copy)]
pub struct KeywordFamily {
    pub emergency_type: EmergencyType,
    pub keywords: &'static [&'static str],
}

const FIRE_KEYWORDS: &[&str] = &["fire", "smoke", "flame", "burning", "blaze", "explosion"];
const HAZMAT_KEYWORDS: &[&str] = &[
    "hazmat",
    "gas leak",
    "chemical",
    "toxic",
    "spill",
    "ammonia",
    "radiation",
];
const POLICE_KEYWORDS: &[&str] = &[
    "police",
    "security",
    "crowd",
    "riot",
    "stampede",
    "theft",
    "robbery",
    "violence",
    "assault",
    "crime",
    "weapon",
    "looting",
];
const RESCUE_KEYWORDS: &[&str] = &["rescue", "trapped", "stuck", "stranded", "drowning", "missing"];
const MEDICAL_KEYWORDS: &[&str] = &[
    "medical",
    "ambulance",
    "injur",
    "bleeding",
    "unconscious",
    "heart attack",
    "hospital",
    "wounded",
    "sick",
    "casualt",
];
const COLLAPSE_KEYWORDS: &[&str] = &["collapse", "rubble", "debris", "caved in"];
const ACCIDENT_KEYWORDS: &[&str] = &["accident", "crash", "collision", "overturned", "hit by"];
const FLOOD_KEYWORDS: &[&str] = &["flood", "inundat", "waterlogg", "water level"];
const EARTHQUAKE_KEYWORDS: &[&str] = &["earthquake", "tremor", "quake"];
const LANDSLIDE_KEYWORDS: &[&str] = &["landslide", "mudslide"];
const STORM_KEYWORDS: &[&str] = &["storm", "cyclone", "hurricane", "tornado", "lightning"];

/// Keyword families matched against the vision tag.
pub const TAG_FAMILIES: &[KeywordFamily] = &[
    KeywordFamily {
        emergency_type: EmergencyType::Fire,
        keywords: FIRE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Flood,
        keywords: FLOOD_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::BuildingCollapse,
        keywords: COLLAPSE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::TrafficAccident,
        keywords: ACCIDENT_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Medical,
        keywords: MEDICAL_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Rescue,
        keywords: RESCUE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Police,
        keywords: POLICE_KEYWORDS,
    },
];

/// Free-text families in priority order. Natural-hazard families come last
/// so they never shadow the ordered families above them.
pub const TEXT_FAMILIES: &[KeywordFamily] = &[
    KeywordFamily {
        emergency_type: EmergencyType::Fire,
        keywords: FIRE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Hazmat,
        keywords: HAZMAT_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Police,
        keywords: POLICE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Rescue,
        keywords: RESCUE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Medical,
        keywords: MEDICAL_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::BuildingCollapse,
        keywords: COLLAPSE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::TrafficAccident,
        keywords: ACCIDENT_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Flood,
        keywords: FLOOD_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Earthquake,
        keywords: EARTHQUAKE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Landslide,
        keywords: LANDSLIDE_KEYWORDS,
    },
    KeywordFamily {
        emergency_type: EmergencyType::Storm,
        keywords: STORM_KEYWORDS,
    },
];

/// Which rule produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    VisionTag,
    Text,
    NeedType,
    NeedsList,
    Default,
}

/// Classification result with the evidence that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub emergency_type: EmergencyType,
    pub rule: ClassificationRule,
    /// Keyword that matched, when a keyword rule fired.
    pub keyword: Option<String>,
}

impl Classification {
    fn new(emergency_type: EmergencyType, rule: ClassificationRule, keyword: Option<&str>) -> Self {
        Self {
            emergency_type,
            rule,
            keyword: keyword.map(String::from),
        }
    }
}

/// Classify an incident.
pub fn classify(incident: &Incident) -> EmergencyType {
    classify_signals(&incident.signals()).emergency_type
}

/// Classify a signal projection, keeping the evidence.
pub fn classify_signals(signals: &Signals) -> Classification {
    if let Some(tag) = signals.vision_tag.as_deref() {
        if let Some((ty, kw)) = first_family_match(TAG_FAMILIES, &tag.to_lowercase()) {
            return Classification::new(ty, ClassificationRule::VisionTag, Some(kw));
        }
    }

    if let Some((ty, kw)) = match_text(&signals.text.to_lowercase()) {
        return Classification::new(ty, ClassificationRule::Text, Some(kw));
    }

    if let Some(need_type) = signals.need_type {
        if let Some(ty) = need_type_mapping(need_type) {
            return Classification::new(ty, ClassificationRule::NeedType, None);
        }
    }

    for need in &signals.needs {
        if let Some((ty, kw)) = match_text(&need.to_lowercase()) {
            return Classification::new(ty, ClassificationRule::NeedsList, Some(kw));
        }
    }

    Classification::new(EmergencyType::General, ClassificationRule::Default, None)
}

/// Structured triage mapping. `None` falls through to the needs list.
pub fn need_type_mapping(need_type: NeedType) -> Option<EmergencyType> {
    match need_type {
        NeedType::Water => Some(EmergencyType::Flood),
        NeedType::Medical => Some(EmergencyType::Medical),
        NeedType::Rescue => Some(EmergencyType::Rescue),
        NeedType::Security => Some(EmergencyType::Police),
        NeedType::Fire => Some(EmergencyType::Fire),
        NeedType::Food | NeedType::Shelter => Some(EmergencyType::General),
        NeedType::Other => None,
    }
}

fn first_family_match(
    families: &'static [KeywordFamily],
    input: &str,
) -> Option<(EmergencyType, &'static str)> {
    families.iter().find_map(|family| {
        family
            .keywords
            .iter()
            .find(|kw| input.contains(*kw))
            .map(|kw| (family.emergency_type, *kw))
    })
}

/// Text stage with its two precedence exceptions.
///
/// A rescue keyword alongside a medical one ("trapped, need ambulance")
/// reads as a casualty, so medical wins. A collapse qualified by a natural
/// hazard ("collapsed in the earthquake") is left to the hazard family.
fn match_text(input: &str) -> Option<(EmergencyType, &'static str)> {
    if input.trim().is_empty() {
        return None;
    }

    let medical = MEDICAL_KEYWORDS
        .iter()
        .find(|kw| input.contains(*kw))
        .map(|kw| (EmergencyType::Medical, *kw));
    let qualified_collapse = EARTHQUAKE_KEYWORDS
        .iter()
        .chain(LANDSLIDE_KEYWORDS)
        .any(|kw| input.contains(kw));

    for family in TEXT_FAMILIES {
        let Some(kw) = family.keywords.iter().find(|kw| input.contains(*kw)) else {
            continue;
        };
        match family.emergency_type {
            EmergencyType::Rescue if medical.is_some() => return medical,
            EmergencyType::BuildingCollapse if qualified_collapse => continue,
            ty => return Some((ty, kw)),
        }
    }
    None
}
