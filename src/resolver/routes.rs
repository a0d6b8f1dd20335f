//! The declarative route table.
//!
//! Each [`RouteSpec`] names the inbound paths a logical operation is served
//! on, the parameters it takes, the upstream request template, the cache key
//! tag, and the default TTL. One generic handler interprets the table.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identity of a logical operation exposed by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteId {
    FixturesToday,
    FixturesTomorrow,
    FixturesLive,
    FixturesNext,
    FixturesPrevious,
    FixturesByDate,
    Fixture,
    Leagues,
    Countries,
    Seasons,
    Standings,
    Team,
    TeamStats,
    TeamPlayers,
    Player,
    HeadToHead,
    Transfers,
    Passthrough,
}

impl RouteId {
    /// Stable external name, used in logs and in `CACHE_TTL_OVERRIDES`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixturesToday => "fixtures-today",
            Self::FixturesTomorrow => "fixtures-tomorrow",
            Self::FixturesLive => "fixtures-live",
            Self::FixturesNext => "fixtures-next",
            Self::FixturesPrevious => "fixtures-previous",
            Self::FixturesByDate => "fixtures-by-date",
            Self::Fixture => "fixture",
            Self::Leagues => "leagues",
            Self::Countries => "countries",
            Self::Seasons => "seasons",
            Self::Standings => "standings",
            Self::Team => "team",
            Self::TeamStats => "team-stats",
            Self::TeamPlayers => "team-players",
            Self::Player => "player",
            Self::HeadToHead => "head-to-head",
            Self::Transfers => "transfers",
            Self::Passthrough => "passthrough",
        }
    }

    /// Returns the table entry for this route.
    pub fn spec(self) -> &'static RouteSpec {
        // ROUTES is ordered like the enum.
        &ROUTES[self as usize]
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a route name does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route `{0}`")]
pub struct UnknownRoute(pub String);

impl FromStr for RouteId {
    type Err = UnknownRoute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ROUTES
            .iter()
            .map(|spec| spec.id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownRoute(s.to_owned()))
    }
}

/// Accepted shape of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Non-empty ASCII digits (team, league, fixture, player ids).
    Id,
    /// A four-digit season year.
    Season,
    /// A calendar date written `YYYY-MM-DD`.
    Date,
    /// A relative upstream path: `[A-Za-z0-9_/-]`, no `..`.
    Path,
}

/// One parameter of a route.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
    }
}

/// A row of the route table.
#[derive(Debug)]
pub struct RouteSpec {
    pub id: RouteId,
    /// Inbound path patterns, in router syntax.
    pub paths: &'static [&'static str],
    /// Parameters in key order.
    pub params: &'static [ParamSpec],
    /// Upstream request relative to the base URL, with `{name}` placeholders.
    /// A query pair whose optional parameter is absent is dropped.
    pub upstream: &'static str,
    /// Prefix of every cache key produced for this route. Routes that share
    /// an upstream template share a tag, so they share cached documents.
    pub key_tag: &'static str,
    pub default_ttl: Duration,
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const HALF_DAY: u64 = 12 * HOUR;

const fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Name of the parameter that carries the wildcard tail of `/api/raw/*`.
pub const WILDCARD_PARAM: &str = "wildcard";

/// The canonical policy table.
pub static ROUTES: &[RouteSpec] = &[
    RouteSpec {
        id: RouteId::FixturesToday,
        paths: &["/api/fixtures/today"],
        params: &[required("date", ParamKind::Date)],
        upstream: "fixtures?date={date}",
        key_tag: "fixtures-date",
        default_ttl: secs(3 * MINUTE),
    },
    RouteSpec {
        id: RouteId::FixturesTomorrow,
        paths: &["/api/fixtures/tomorrow"],
        params: &[required("date", ParamKind::Date)],
        upstream: "fixtures?date={date}",
        key_tag: "fixtures-date",
        default_ttl: secs(30 * MINUTE),
    },
    RouteSpec {
        id: RouteId::FixturesLive,
        paths: &["/api/fixtures/live"],
        params: &[],
        upstream: "fixtures?live=all",
        key_tag: "fixtures-live",
        default_ttl: secs(MINUTE),
    },
    RouteSpec {
        id: RouteId::FixturesNext,
        paths: &["/api/fixtures/next"],
        params: &[],
        upstream: "fixtures?next=20",
        key_tag: "fixtures-next",
        default_ttl: secs(10 * MINUTE),
    },
    RouteSpec {
        id: RouteId::FixturesPrevious,
        paths: &["/api/fixtures/previous"],
        params: &[],
        upstream: "fixtures?last=20",
        key_tag: "fixtures-previous",
        default_ttl: secs(15 * MINUTE),
    },
    RouteSpec {
        id: RouteId::FixturesByDate,
        paths: &["/api/fixtures/date/:date", "/api/fixtures/date"],
        params: &[required("date", ParamKind::Date)],
        upstream: "fixtures?date={date}",
        key_tag: "fixtures-date",
        default_ttl: secs(30 * MINUTE),
    },
    RouteSpec {
        id: RouteId::Fixture,
        paths: &["/api/fixtures/:id"],
        params: &[required("id", ParamKind::Id)],
        upstream: "fixtures?id={id}",
        key_tag: "fixture",
        default_ttl: secs(10 * MINUTE),
    },
    RouteSpec {
        id: RouteId::Leagues,
        paths: &["/api/leagues"],
        params: &[optional("season", ParamKind::Season)],
        upstream: "leagues?season={season}",
        key_tag: "leagues",
        default_ttl: secs(HALF_DAY),
    },
    RouteSpec {
        id: RouteId::Countries,
        paths: &["/api/countries"],
        params: &[],
        upstream: "countries",
        key_tag: "countries",
        default_ttl: secs(HALF_DAY),
    },
    RouteSpec {
        id: RouteId::Seasons,
        paths: &["/api/seasons"],
        params: &[],
        upstream: "leagues/seasons",
        key_tag: "seasons",
        default_ttl: secs(HALF_DAY),
    },
    RouteSpec {
        id: RouteId::Standings,
        paths: &["/api/standings/:league/:season", "/api/standings"],
        params: &[
            required("league", ParamKind::Id),
            required("season", ParamKind::Season),
        ],
        upstream: "standings?league={league}&season={season}",
        key_tag: "standings",
        default_ttl: secs(10 * MINUTE),
    },
    RouteSpec {
        id: RouteId::Team,
        paths: &["/api/teams/:id"],
        params: &[required("id", ParamKind::Id)],
        upstream: "teams?id={id}",
        key_tag: "team",
        default_ttl: secs(HOUR),
    },
    RouteSpec {
        id: RouteId::TeamStats,
        paths: &["/api/teams/:id/stats/:league/:season"],
        params: &[
            required("id", ParamKind::Id),
            required("league", ParamKind::Id),
            required("season", ParamKind::Season),
        ],
        upstream: "teams/statistics?team={id}&league={league}&season={season}",
        key_tag: "team-stats",
        default_ttl: secs(10 * MINUTE),
    },
    RouteSpec {
        id: RouteId::TeamPlayers,
        paths: &["/api/players/:id/:season"],
        params: &[
            required("id", ParamKind::Id),
            required("season", ParamKind::Season),
        ],
        upstream: "players?team={id}&season={season}",
        key_tag: "players",
        default_ttl: secs(HOUR),
    },
    RouteSpec {
        id: RouteId::Player,
        paths: &["/api/player/:id/:season"],
        params: &[
            required("id", ParamKind::Id),
            required("season", ParamKind::Season),
        ],
        upstream: "players?id={id}&season={season}",
        key_tag: "player",
        default_ttl: secs(15 * MINUTE),
    },
    RouteSpec {
        id: RouteId::HeadToHead,
        paths: &["/api/h2h/:team1/:team2"],
        params: &[
            required("team1", ParamKind::Id),
            required("team2", ParamKind::Id),
        ],
        upstream: "fixtures/headtohead?h2h={team1}-{team2}",
        key_tag: "h2h",
        default_ttl: secs(10 * MINUTE),
    },
    RouteSpec {
        id: RouteId::Transfers,
        paths: &["/api/transfers/:team"],
        params: &[required("team", ParamKind::Id)],
        upstream: "transfers?team={team}",
        key_tag: "transfers",
        default_ttl: secs(HOUR),
    },
    RouteSpec {
        id: RouteId::Passthrough,
        paths: &["/api/raw/*"],
        params: &[required(WILDCARD_PARAM, ParamKind::Path)],
        upstream: "{wildcard}",
        key_tag: "raw",
        default_ttl: secs(HALF_DAY),
    },
];
