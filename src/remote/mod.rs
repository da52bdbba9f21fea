pub mod game;
pub mod users;
