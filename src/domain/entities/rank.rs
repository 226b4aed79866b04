use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission rank, ordered from lowest to highest.
///
/// The lower six are the usual IRC channel prefixes; `Power`, `Super` and
/// `Owner` only exist as global, bot-managed ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Rank {
    None,
    Voice,
    HalfOp,
    Op,
    Protected,
    Founder,
    Power,
    Super,
    Owner,
}

impl Rank {
    pub const ALL: [Rank; 9] = [
        Rank::None,
        Rank::Voice,
        Rank::HalfOp,
        Rank::Op,
        Rank::Protected,
        Rank::Founder,
        Rank::Power,
        Rank::Super,
        Rank::Owner,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Rank::None => "",
            Rank::Voice => "+",
            Rank::HalfOp => "%",
            Rank::Op => "@",
            Rank::Protected => "&",
            Rank::Founder => "~",
            Rank::Power => "P",
            Rank::Super => "S",
            Rank::Owner => "O",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Rank> {
        Rank::ALL.into_iter().find(|r| r.symbol() == symbol)
    }

    /// Highest rank among a membership prefix string such as `"@+"`. Bot
    /// ranks are never granted by channel status.
    pub fn from_prefixes(prefixes: &str) -> Option<Rank> {
        prefixes
            .chars()
            .filter_map(|c| Rank::from_symbol(c.encode_utf8(&mut [0; 4])))
            .filter(|rank| !rank.is_bot_rank())
            .max()
    }

    /// `true` if this rank meets or exceeds `required`.
    pub fn meets(self, required: Rank) -> bool {
        self.level() >= required.level()
    }

    pub fn is_bot_rank(self) -> bool {
        self >= Rank::Power
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::None => write!(f, "(none)"),
            other => write!(f, "{}", other.symbol()),
        }
    }
}

impl TryFrom<String> for Rank {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rank::from_symbol(&value).ok_or_else(|| format!("unknown rank '{}'", value))
    }
}

impl From<Rank> for String {
    fn from(rank: Rank) -> Self {
        rank.symbol().to_string()
    }
}
