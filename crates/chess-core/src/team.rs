//! Team members: the flavour layer attached to piece identities.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::identity::PieceStateBySquare;
use crate::notation::PlayerSide;

const FIRST_NAMES: &[&str] = &[
    "Aldric", "Brunhild", "Cedric", "Dagny", "Edmund", "Freya", "Gareth", "Hilda",
    "Ivor", "Jorunn", "Kendrick", "Liesel", "Magnus", "Nerys", "Osric", "Perrin",
    "Quinta", "Rowena", "Sigurd", "Tamsin", "Ulric", "Viveka", "Wystan", "Yseult",
];

const LAST_NAMES: &[&str] = &[
    "Ashdown", "Blackwood", "Crowther", "Dunmore", "Eastwick", "Fairbanks", "Greaves",
    "Holloway", "Ironside", "Jessop", "Kettering", "Longstaff", "Marlowe", "Northcott",
    "Oakhurst", "Penrose", "Quarrie", "Redfern", "Stanhope", "Thornbury", "Underhill",
    "Varley", "Whitlock", "Yardley",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Humans,
    Undeads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFactions {
    pub w: Faction,
    pub b: Faction,
}

impl GameFactions {
    pub fn of(&self, side: PlayerSide) -> Faction {
        match side {
            PlayerSide::White => self.w,
            PlayerSide::Black => self.b,
        }
    }
}

impl Default for GameFactions {
    fn default() -> Self {
        Self {
            w: Faction::Humans,
            b: Faction::Undeads,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    /// Lowercase base identity token, e.g. "p1" or "q".
    pub role: String,
    /// First and last name. Empty for anonymous members.
    #[serde(default)]
    pub name: Vec<String>,
    pub faction: Faction,
}

impl TeamMember {
    pub fn display_name(&self) -> Option<String> {
        (!self.name.is_empty()).then(|| self.name.join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameTeams {
    pub w: Vec<TeamMember>,
    pub b: Vec<TeamMember>,
}

impl GameTeams {
    pub fn side(&self, side: PlayerSide) -> &[TeamMember] {
        match side {
            PlayerSide::White => &self.w,
            PlayerSide::Black => &self.b,
        }
    }

    fn side_mut(&mut self, side: PlayerSide) -> &mut Vec<TeamMember> {
        match side {
            PlayerSide::White => &mut self.w,
            PlayerSide::Black => &mut self.b,
        }
    }

    pub fn member(&self, side: PlayerSide, team_member_role: &str) -> Option<&TeamMember> {
        self.side(side).iter().find(|m| m.role == team_member_role)
    }
}

/// Stable 64-bit seed for a string id (FNV-1a).
pub fn seed_from_id(id: &str) -> u64 {
    id.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// One team member per identity. Only `named_side` gets names; the same seed
/// always produces the same roster.
pub fn build_teams(
    pieces: &PieceStateBySquare,
    factions: GameFactions,
    named_side: PlayerSide,
    seed: u64,
) -> GameTeams {
    let mut teams = GameTeams::default();
    for (_, identity) in pieces.iter() {
        let side = identity.player_side();
        teams.side_mut(side).push(TeamMember {
            role: identity.team_member_role(),
            name: Vec::new(),
            faction: factions.of(side),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut first_names = FIRST_NAMES.to_vec();
    let mut last_names = LAST_NAMES.to_vec();
    first_names.shuffle(&mut rng);
    last_names.shuffle(&mut rng);

    for (i, member) in teams.side_mut(named_side).iter_mut().enumerate() {
        member.name = vec![
            first_names[i % first_names.len()].to_string(),
            last_names[i % last_names.len()].to_string(),
        ];
    }

    teams
}
