//! Third-party sports data: the player-prop projection market and the
//! public scoreboard.

pub mod error;
pub mod prizepicks;
pub mod scoreboard;

pub use error::{FeedError, FeedResult};
pub use prizepicks::{parse_projections, PrizePicksClient, ProjectionSource};
pub use scoreboard::{MatchSource, ScoreboardClient};
