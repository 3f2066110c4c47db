/// Discogs new releases
pub mod discogs;
/// kinopoisk.dev recommendations
pub mod kinopoisk;

pub use discogs::{Album, Discogs, DiscogsConfig, DiscogsQuery};
pub use kinopoisk::{Kinopoisk, KinopoiskConfig, KinopoiskQuery, Movie};
