//! Agent and team types.
//!
//! Agents are named identities bound to exactly one session handle. Teams
//! group agents for bulk addressing. Membership is tracked on both sides so
//! either direction can be answered without a scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::ids::SessionId;

/// A named identity bound to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent name.
    pub name: String,

    /// Session this agent drives.
    pub session_id: SessionId,

    /// Names of the teams this agent belongs to.
    #[serde(default)]
    pub teams: BTreeSet<String>,

    /// When the agent was registered.
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Creates a new agent with no team memberships.
    pub fn new(name: impl Into<String>, session_id: impl Into<SessionId>) -> Self {
        Self {
            name: name.into(),
            session_id: session_id.into(),
            teams: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Returns true if the agent is a member of `team`.
    pub fn is_member_of(&self, team: &str) -> bool {
        self.teams.contains(team)
    }
}

/// A named group of agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    /// Unique team name.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Names of member agents.
    #[serde(default)]
    pub members: BTreeSet<String>,

    /// Color assigned to the team, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<TeamColor>,

    /// When the team was created.
    pub created_at: DateTime<Utc>,
}

impl Team {
    /// Creates a new empty team.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            members: BTreeSet::new(),
            color: None,
            created_at: Utc::now(),
        }
    }
}

/// An HSL color used to give a team a visual identity.
///
/// Saturation and lightness are percentages in `[0, 100]`; hue is in
/// degrees in `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeamColor {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl TeamColor {
    /// Creates a new color.
    pub fn new(hue: f64, saturation: f64, lightness: f64) -> Self {
        Self {
            hue,
            saturation,
            lightness,
        }
    }

    /// Converts to 8-bit RGB.
    pub fn to_rgb(&self) -> (u8, u8, u8) {
        let s = (self.saturation / 100.0).clamp(0.0, 1.0);
        let l = (self.lightness / 100.0).clamp(0.0, 1.0);
        let h = self.hue.rem_euclid(360.0) / 60.0;

        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let m = l - c / 2.0;

        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        (channel(r), channel(g), channel(b))
    }

    /// Formats as `#rrggbb`.
    pub fn to_hex(&self) -> String {
        let (r, g, b) = self.to_rgb();
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

/// An organizational address of the form `(team, agent)`.
///
/// Written as `"Team Leads :: TL-Backend"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyPath {
    pub team: String,
    pub agent: String,
}

/// Separator used in the textual form of a [`HierarchyPath`].
pub const HIERARCHY_SEPARATOR: &str = "::";

impl HierarchyPath {
    /// Creates a new path.
    pub fn new(team: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            agent: agent.into(),
        }
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.team, HIERARCHY_SEPARATOR, self.agent)
    }
}

impl FromStr for HierarchyPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (team, agent) = s
            .split_once(HIERARCHY_SEPARATOR)
            .ok_or_else(|| format!("expected 'team {} agent', got '{}'", HIERARCHY_SEPARATOR, s))?;

        let team = team.trim();
        let agent = agent.trim();
        if team.is_empty() || agent.is_empty() {
            return Err(format!("hierarchy path has an empty component: '{}'", s));
        }

        Ok(Self::new(team, agent))
    }
}
